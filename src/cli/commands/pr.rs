//! PR Command - scan the head commit of an open pull request

use anyhow::Result;
use clap::Args;

use super::report_error;
use crate::cli::context::CliContext;
use crate::cli::exit_codes;
use crate::cli::output::list_line;

#[derive(Args, Debug)]
pub struct PrArgs {
    /// Repository owner or organization
    pub owner: String,

    /// Repository name
    pub repository: String,

    /// Pull request number
    pub number: u64,
}

pub async fn run(ctx: &CliContext, args: &PrArgs) -> Result<i32> {
    ctx.output.info(&format!(
        "Scanning pull request #{} of {}/{}",
        args.number, args.owner, args.repository
    ));

    let result = ctx
        .app
        .branch_scanner
        .scan_pull_request(
            &args.owner,
            &args.repository,
            args.number,
            &ctx.app.shutdown_token,
        )
        .await;

    let report = match result {
        Ok(report) => report,
        Err(e) => return report_error(ctx, &e),
    };

    ctx.output.result(&report, || {
        vec![
            format!(
                "pull request #{} ({}) -> {}",
                args.number, report.branch, report.project_key
            ),
            list_line("scanned", &report.scanned),
            list_line("skipped", &report.skipped),
        ]
    })?;

    Ok(exit_codes::SUCCESS)
}
