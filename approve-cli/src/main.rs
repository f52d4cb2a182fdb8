use anyhow::{anyhow, Context, Result};
use approve_core::{evaluate, ApprovalConfig, NotificationMeta, PullRequestSnapshot, StaticOwners};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Approve: offline tools for the approval engine
#[derive(Parser, Debug)]
#[command(name = "approve")]
#[command(about = "Offline tools for the pull request approval engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Evaluate a pull request snapshot and print what would be published
    Evaluate(EvaluateArgs),
    /// Print the approval metadata embedded in a notification comment
    Meta(MetaArgs),
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Parser, Debug)]
struct EvaluateArgs {
    /// Pull request snapshot (JSON)
    #[arg(long)]
    snapshot: PathBuf,

    /// Ownership map (JSON, directory -> approvers)
    #[arg(long)]
    owners: PathBuf,

    /// Engine configuration (JSON); defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "text")]
    format: Format,
}

#[derive(Parser, Debug)]
struct MetaArgs {
    /// File holding the comment body; reads stdin when omitted
    file: Option<PathBuf>,
}

#[derive(Serialize)]
struct EvaluateOutput<'a> {
    approved: bool,
    bypassed: bool,
    approvers: Vec<String>,
    suggested_approvers: Vec<String>,
    body: &'a str,
    effects: &'a [approve_core::Effect],
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {} from {}", what, path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse {} in {}", what, path.display()))
}

fn run_evaluate(args: EvaluateArgs) -> Result<()> {
    let snapshot: PullRequestSnapshot = read_json(&args.snapshot, "snapshot")?;
    let owners = StaticOwners::from_json_file(&args.owners)?;
    let config: ApprovalConfig = match &args.config {
        Some(path) => read_json(path, "config")?,
        None => ApprovalConfig::default(),
    };

    let evaluation = evaluate(&snapshot, &owners, &config)?;

    match args.format {
        Format::Json => {
            let output = EvaluateOutput {
                approved: evaluation.decision.approved,
                bypassed: evaluation.decision.bypassed,
                approvers: evaluation.decision.approver_logins(),
                suggested_approvers: evaluation
                    .decision
                    .suggested_approvers
                    .iter()
                    .map(|a| a.login().to_string())
                    .collect(),
                body: &evaluation.body,
                effects: &evaluation.effects,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Format::Text => {
            println!("{}", evaluation.body);
            println!();
            if evaluation.effects.is_empty() {
                println!("No changes would be made.");
            } else {
                println!("Effects (dry run):");
                for effect in &evaluation.effects {
                    println!("  {}", serde_json::to_string(effect)?);
                }
            }
        }
    }

    Ok(())
}

fn run_meta(args: MetaArgs) -> Result<()> {
    let body = match &args.file {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read stdin")?;
            buf
        }
    };

    let meta = NotificationMeta::parse(&body)
        .ok_or_else(|| anyhow!("No approval metadata found in comment"))?;
    println!("{}", serde_json::to_string_pretty(&meta)?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Evaluate(args) => run_evaluate(args),
        Commands::Meta(args) => run_meta(args),
    }
}
