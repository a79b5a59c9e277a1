use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "arbor",
    about = "arbor: a versioned, content-addressed tree store",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Server configuration (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a repository in an in-memory store
    Init(InitArgs),
    /// Let several writers push to one branch at the same time
    Simulate(SimulateArgs),
    /// Generate alternating pushes and show the grouped history
    History(HistoryArgs),
}

#[derive(Args)]
pub struct InitArgs {
    #[arg(default_value = "demo")]
    pub repository: String,
    #[arg(short, long)]
    pub branch: Option<String>,
    #[arg(long)]
    pub author: Option<String>,
}

#[derive(Args)]
pub struct SimulateArgs {
    #[arg(short, long, default_value = "3")]
    pub writers: u32,
    /// Children added by each writer, one version each
    #[arg(short, long, default_value = "10")]
    pub children: usize,
    #[arg(long, default_value = "demo")]
    pub repository: String,
}

#[derive(Args)]
pub struct HistoryArgs {
    #[arg(short = 'n', long, default_value = "100")]
    pub pushes: usize,
    /// Seconds between two generated pushes
    #[arg(long, default_value = "13")]
    pub step: i64,
    /// Width of the time buckets
    #[arg(long, default_value = "60")]
    pub interval: i64,
    /// Idle time that starts a new session
    #[arg(long, default_value = "30")]
    pub idle_gap: i64,
    #[arg(long, default_value = "20")]
    pub limit: usize,
}
