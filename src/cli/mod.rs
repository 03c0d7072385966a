//! branchscan CLI - scan branches and pull requests, synchronize repositories
//!
//! Every command is non-interactive and meant for CI runners: results go to
//! stdout (plain text or JSON), logs go to stderr, and the exit code tells
//! the pipeline what happened.

mod commands;
mod context;
mod output;

pub use context::CliContext;
pub use output::{OutputFormat, OutputWriter};

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::signal;

use branchscan_core::{Config, ErrorKind, ScanSyncError};

/// branchscan - keep per-branch static analysis projects up to date
#[derive(Parser, Debug)]
#[command(
    name = "branchscan",
    version,
    about = "Resilient scan orchestration for per-branch static analysis projects",
    long_about = "branchscan selects the commits of a branch that still need an analysis, \
                  runs the scanner against each of them and keeps one analysis project per \
                  branch in sync with the repository.\n\n\
                  Configuration is read from config/default.toml, config/$ENV.toml, \
                  config/local.toml, --config and BRANCHSCAN__* environment variables."
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, value_enum, default_value = "plain", global = true)]
    pub format: OutputFormat,

    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors and suppress informational output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file layered above the defaults
    #[arg(long, global = true, env = "BRANCHSCAN_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan one branch through the request pipeline
    Scan(commands::scan::ScanArgs),

    /// Scan the head commit of an open pull request
    Pr(commands::pr::PrArgs),

    /// Synchronize every branch of a repository
    Sync(commands::sync::SyncArgs),

    /// Find (and optionally delete) projects whose branch no longer exists
    Cleanup(commands::cleanup::CleanupArgs),
}

impl Commands {
    /// Command-line flags that override configuration values
    fn apply_overrides(&self, config: &mut Config) {
        if let Commands::Sync(args) = self {
            args.apply_overrides(config);
        }
    }
}

/// Exit codes for CI integration
pub mod exit_codes {
    /// Everything requested completed
    pub const SUCCESS: i32 = 0;
    /// A scan ran and failed, or a unit of work failed
    pub const SCAN_FAILED: i32 = 1;
    /// Configuration or input error
    pub const CONFIG_ERROR: i32 = 2;
    /// A remote service stayed unavailable
    pub const SERVICE_UNAVAILABLE: i32 = 3;
    /// Internal error
    pub const INTERNAL_ERROR: i32 = 99;
    /// Interrupted (128 + SIGINT)
    pub const CANCELLED: i32 = 130;
}

/// Map an orchestration error to the exit code a pipeline sees
pub fn exit_code_for(error: &ScanSyncError) -> i32 {
    if error.is_cancelled() {
        return exit_codes::CANCELLED;
    }
    // A transient error that reaches the top has already used up its retries
    if error.is_retryable() {
        return exit_codes::SERVICE_UNAVAILABLE;
    }
    match error.kind() {
        ErrorKind::Validation => exit_codes::CONFIG_ERROR,
        ErrorKind::Internal => exit_codes::INTERNAL_ERROR,
        _ => exit_codes::SCAN_FAILED,
    }
}

/// CLI application runner
pub struct CliApp {
    cli: Cli,
    context: CliContext,
}

impl CliApp {
    /// Load configuration, install logging and wire services
    pub fn new(cli: Cli) -> Result<Self> {
        let context = CliContext::new(&cli)?;
        Ok(Self { cli, context })
    }

    /// Run the selected command; Ctrl+C cancels in-flight work
    pub async fn run(self) -> Result<i32> {
        let token = self.context.app.shutdown_token.clone();
        tokio::spawn(async move {
            match signal::ctrl_c().await {
                Ok(()) => {
                    tracing::warn!("Received Ctrl+C, cancelling in-flight work");
                    token.cancel();
                }
                Err(e) => tracing::error!("Failed to install Ctrl+C handler: {}", e),
            }
        });

        match self.cli.command {
            Commands::Scan(ref args) => commands::scan::run(&self.context, args).await,
            Commands::Pr(ref args) => commands::pr::run(&self.context, args).await,
            Commands::Sync(ref args) => commands::sync::run(&self.context, args).await,
            Commands::Cleanup(ref args) => commands::cleanup::run(&self.context, args).await,
        }
    }
}
