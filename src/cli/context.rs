//! CLI Context - configuration, logging and wired services for one invocation

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use branchscan_core::config::LoggingConfig;
use branchscan_core::{Config, init_tracing};

use crate::app::AppContext;
use crate::cli::Cli;
use crate::cli::output::OutputWriter;

pub struct CliContext {
    pub app: AppContext,
    pub output: OutputWriter,
}

impl CliContext {
    pub fn new(cli: &Cli) -> Result<Self> {
        let mut config = Config::load_from(cli.config.as_deref())
            .context("Failed to load configuration. Check config files and BRANCHSCAN__* env vars")?;
        cli.command.apply_overrides(&mut config);

        init_tracing(&Self::logging_config(cli, &config.logging))
            .context("Failed to initialize logging")?;

        tracing::debug!(
            sync_concurrency = config.sync.max_concurrent_branches,
            failure_policy = ?config.sync.failure_policy,
            "Configuration loaded"
        );

        let app = AppContext::build(config, CancellationToken::new())?;
        let output = OutputWriter::new(cli.format, cli.quiet);

        Ok(Self { app, output })
    }

    /// `-v` and `-q` replace the configured level; `RUST_LOG` still wins
    fn logging_config(cli: &Cli, configured: &LoggingConfig) -> LoggingConfig {
        let level = if cli.verbose {
            "debug".to_string()
        } else if cli.quiet {
            "error".to_string()
        } else {
            configured.level.clone()
        };

        LoggingConfig {
            level,
            format: configured.format.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_verbosity_flags_override_level() {
        let configured = LoggingConfig::default();

        let cli = Cli::try_parse_from(["branchscan", "-q", "cleanup", "acme", "widgets"]).unwrap();
        assert_eq!(CliContext::logging_config(&cli, &configured).level, "error");

        let cli = Cli::try_parse_from(["branchscan", "cleanup", "acme", "widgets"]).unwrap();
        let logging = CliContext::logging_config(&cli, &configured);
        assert_eq!(logging.level, "info");
        assert_eq!(logging.format, "compact");
    }
}
