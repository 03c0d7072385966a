//! Cleanup Command - find projects whose branch is gone

use anyhow::Result;
use clap::Args;

use super::report_error;
use crate::cli::context::CliContext;
use crate::cli::exit_codes;
use crate::cli::output::list_line;

#[derive(Args, Debug)]
pub struct CleanupArgs {
    /// Repository owner or organization
    pub owner: String,

    /// Repository name
    pub repository: String,

    /// Delete the orphaned projects; without it they are only listed
    #[arg(long)]
    pub force: bool,
}

pub async fn run(ctx: &CliContext, args: &CleanupArgs) -> Result<i32> {
    let result = ctx
        .app
        .synchronizer
        .cleanup_stale_projects(&args.owner, &args.repository, args.force)
        .await;

    let report = match result {
        Ok(report) => report,
        Err(e) => return report_error(ctx, &e),
    };

    if !args.force && !report.stale_projects.is_empty() {
        ctx.output.warn("orphaned projects were not deleted; rerun with --force");
    }
    ctx.output.result(&report, || {
        vec![
            format!("{}/{}", args.owner, args.repository),
            list_line("stale projects", &report.stale_projects),
            list_line("deleted projects", &report.deleted_projects),
        ]
    })?;

    // A forced cleanup that could not delete everything is a failure
    if args.force && report.deleted_projects.len() < report.stale_projects.len() {
        return Ok(exit_codes::SCAN_FAILED);
    }
    Ok(exit_codes::SUCCESS)
}
