//! Sync Command - bring every branch of a repository up to date

use anyhow::Result;
use clap::Args;

use branchscan_core::Config;
use branchscan_core::config::FailurePolicy;

use super::report_error;
use crate::cli::context::CliContext;
use crate::cli::exit_codes;
use crate::cli::output::list_line;

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Repository owner or organization
    pub owner: String,

    /// Repository name
    pub repository: String,

    /// Maximum number of branches processed at once
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
    pub max_concurrent: Option<u16>,

    /// Keep going after a branch fails and report every failure at the end
    #[arg(long)]
    pub best_effort: bool,

    /// Delete orphaned projects instead of only reporting them
    #[arg(long)]
    pub force_cleanup: bool,

    /// Team whose members become administrators of each project
    #[arg(long)]
    pub admin_team: Option<String>,
}

impl SyncArgs {
    pub(crate) fn apply_overrides(&self, config: &mut Config) {
        if let Some(limit) = self.max_concurrent {
            config.sync.max_concurrent_branches = usize::from(limit);
        }
        if self.best_effort {
            config.sync.failure_policy = FailurePolicy::BestEffort;
        }
        if self.force_cleanup {
            config.sync.force_cleanup = true;
        }
        if let Some(team) = &self.admin_team {
            config.sync.admin_team = Some(team.clone());
        }
    }
}

pub async fn run(ctx: &CliContext, args: &SyncArgs) -> Result<i32> {
    ctx.output.info(&format!(
        "Synchronizing {}/{} (up to {} branches at once)",
        args.owner, args.repository, ctx.app.config.sync.max_concurrent_branches
    ));

    let result = ctx
        .app
        .synchronizer
        .sync_repository(&args.owner, &args.repository, &ctx.app.shutdown_token)
        .await;

    let report = match result {
        Ok(report) => report,
        Err(e) => return report_error(ctx, &e),
    };

    ctx.output.result(&report, || {
        vec![
            format!(
                "{}/{}: {} branches",
                report.owner, report.repository, report.branches
            ),
            list_line("scanned", &report.scanned),
            list_line("refreshed", &report.refreshed),
            list_line("stale projects", &report.stale_projects),
            list_line("deleted projects", &report.deleted_projects),
        ]
    })?;

    Ok(exit_codes::SUCCESS)
}
