pub mod config;
pub mod github;
pub mod handler;
pub mod interpreter;
pub mod platform;
pub mod webhook;

use std::sync::Arc;

use approve_core::{ApprovalConfig, OwnersOracle};

pub use github::*;
pub use handler::PrLocks;
pub use platform::{GitHubPlatform, InMemoryPlatform, Platform};

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

fn short_hash(hash: &str) -> String {
    hash.chars().take(8).collect()
}

pub fn get_bot_version() -> String {
    // Explicit hash from the release environment wins over git detection
    if let Some(git_hash) = option_env!("APPROVE_GIT_HASH") {
        short_hash(git_hash)
    } else if let Some(git_hash) = built_info::GIT_COMMIT_HASH {
        short_hash(git_hash)
    } else {
        built_info::PKG_VERSION.to_string()
    }
}

pub struct AppState {
    pub github_client: Arc<GitHubClient>,
    pub webhook_secret: String,
    pub owners: Arc<dyn OwnersOracle + Send + Sync>,
    pub approval: ApprovalConfig,
    pub pr_locks: Arc<PrLocks>,
}
