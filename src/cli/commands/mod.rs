//! CLI subcommand implementations

pub mod cleanup;
pub mod pr;
pub mod scan;
pub mod sync;

use serde::Serialize;

use branchscan_core::ScanSyncError;

use crate::cli::context::CliContext;
use crate::cli::exit_code_for;
use crate::cli::output::OutputFormat;

#[derive(Debug, Serialize)]
struct ErrorOutput {
    error: String,
    kind: String,
    exit_code: i32,
    /// Per-unit failures of a best-effort run
    #[serde(skip_serializing_if = "Vec::is_empty")]
    failures: Vec<UnitFailureOutput>,
}

#[derive(Debug, Serialize)]
struct UnitFailureOutput {
    unit: String,
    error: String,
}

/// Print `error` in the selected format and return its exit code
pub(crate) fn report_error(ctx: &CliContext, error: &ScanSyncError) -> anyhow::Result<i32> {
    let exit_code = exit_code_for(error);
    let failures: Vec<UnitFailureOutput> = match error.root() {
        ScanSyncError::Aggregate(failures) => failures
            .iter()
            .map(|f| UnitFailureOutput {
                unit: f.unit.clone(),
                error: f.error.to_string(),
            })
            .collect(),
        _ => Vec::new(),
    };

    tracing::error!(error = %error, exit_code, "Command failed");

    let output = ErrorOutput {
        error: error.to_string(),
        kind: format!("{:?}", error.kind()),
        exit_code,
        failures,
    };
    match ctx.output.format() {
        OutputFormat::Json => ctx.output.json(&output)?,
        OutputFormat::Plain => {
            ctx.output.error(&output.error);
            for failure in &output.failures {
                ctx.output.error(&format!("  {}: {}", failure.unit, failure.error));
            }
        }
    }

    Ok(exit_code)
}
