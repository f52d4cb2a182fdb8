fn main() {
    built::write_built_file().expect("Failed to acquire build-time information");

    // Release builds outside a git checkout pass the commit in explicitly
    println!("cargo:rerun-if-env-changed=APPROVE_GIT_HASH");
    if let Ok(hash) = std::env::var("APPROVE_GIT_HASH") {
        println!("cargo:rustc-env=APPROVE_GIT_HASH={}", hash);
    }
}
