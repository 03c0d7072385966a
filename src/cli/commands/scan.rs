//! Scan Command - one branch through validation, retries and the quality gate

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use branchscan_orchestrator::application::ProjectLayout;
use branchscan_orchestrator::domain::{ScanOptions, ScanRequest, ScanResponse, ScanStatus};

use super::report_error;
use crate::cli::context::CliContext;
use crate::cli::exit_codes;
use crate::cli::output::list_line;

/// Arguments for the scan command
#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Repository owner or organization
    pub owner: String,

    /// Repository name
    pub repository: String,

    /// Branch to scan
    pub branch: String,

    /// Analysis project key (derived from owner, repository and branch by default)
    #[arg(long)]
    pub project_key: Option<String>,

    /// Analysis project display name
    #[arg(long)]
    pub project_name: Option<String>,

    /// Working directory for the checkout (defaults to the workspace root plus the project key)
    #[arg(long)]
    pub path: Option<PathBuf>,

    /// Scan only this commit instead of selecting commits from the branch
    #[arg(long)]
    pub commit: Option<String>,

    /// Override the configured number of request-level retries
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Skip branch name and working directory checks
    #[arg(long)]
    pub skip_validation: bool,

    /// Do not query the quality gate after a successful scan
    #[arg(long)]
    pub no_quality_gate: bool,

    /// Extra request metadata as KEY=VALUE (repeatable)
    #[arg(long = "meta", value_parser = parse_key_value)]
    pub metadata: Vec<(String, String)>,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

impl ScanArgs {
    fn to_request(&self, layout: &ProjectLayout) -> ScanRequest {
        let derived = layout.project_for(&self.owner, &self.repository, &self.branch);
        let project_key = self
            .project_key
            .clone()
            .unwrap_or_else(|| derived.key.as_str().to_string());
        let project_path = self
            .path
            .clone()
            .unwrap_or_else(|| layout.workspace_root.join(&project_key));

        ScanRequest {
            project_name: self.project_name.clone().unwrap_or(derived.name),
            project_key,
            project_path,
            branch_name: self.branch.clone(),
            owner: self.owner.clone(),
            repository: self.repository.clone(),
            metadata: self.metadata.iter().cloned().collect::<HashMap<_, _>>(),
            options: Some(ScanOptions {
                skip_validation: self.skip_validation,
                max_retries: self.max_retries,
                commit: self.commit.clone(),
                quality_gate_check: self.no_quality_gate.then_some(false),
            }),
        }
    }
}

/// Run the scan command
pub async fn run(ctx: &CliContext, args: &ScanArgs) -> Result<i32> {
    let request = args.to_request(ctx.app.branch_scanner.layout());
    ctx.output.info(&format!(
        "Scanning {}/{} branch {} into {}",
        request.owner, request.repository, request.branch_name, request.project_key
    ));

    let response = match ctx
        .app
        .requests
        .scan_branch(&request, &ctx.app.shutdown_token)
        .await
    {
        Ok(response) => response,
        Err(e) => return report_error(ctx, &e),
    };

    for warning in &response.warnings {
        ctx.output.warn(warning);
    }
    ctx.output.result(&response, || plain_lines(&response))?;

    Ok(match response.status {
        ScanStatus::Completed => exit_codes::SUCCESS,
        _ => exit_codes::SCAN_FAILED,
    })
}

fn plain_lines(response: &ScanResponse) -> Vec<String> {
    let mut lines = vec![format!(
        "{} {} ({} ms)",
        response.scan_id,
        response.status,
        response.duration.as_millis()
    )];

    if let Some(report) = &response.report {
        lines.push(list_line("selected", &report.selected));
        lines.push(list_line("scanned", &report.scanned));
        lines.push(list_line("skipped", &report.skipped));
    }
    for error in &response.errors {
        lines.push(format!("  error: {}", error));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> ScanArgs {
        use clap::Parser;

        #[derive(Parser)]
        struct Wrapper {
            #[command(flatten)]
            args: ScanArgs,
        }

        let mut argv = vec!["scan", "acme", "widgets", "feature/login"];
        argv.extend_from_slice(extra);
        Wrapper::try_parse_from(argv).unwrap().args
    }

    #[test]
    fn test_request_defaults_come_from_layout() {
        let layout = ProjectLayout::new("ci_", "/work");
        let request = args(&[]).to_request(&layout);

        assert_eq!(request.project_key, "ci_acme_widgets_feature_login");
        assert_eq!(request.project_path, PathBuf::from("/work/ci_acme_widgets_feature_login"));
        assert_eq!(request.branch_name, "feature/login");
        let options = request.options.unwrap();
        assert!(!options.skip_validation);
        assert_eq!(options.quality_gate_check, None);
    }

    #[test]
    fn test_flags_map_to_options() {
        let layout = ProjectLayout::new("", "/work");
        let request = args(&[
            "--project-key",
            "custom",
            "--max-retries",
            "1",
            "--no-quality-gate",
            "--meta",
            "pipeline=1234",
        ])
        .to_request(&layout);

        assert_eq!(request.project_key, "custom");
        assert_eq!(request.project_path, PathBuf::from("/work/custom"));
        assert_eq!(request.metadata.get("pipeline").map(String::as_str), Some("1234"));
        let options = request.options.unwrap();
        assert_eq!(options.max_retries, Some(1));
        assert_eq!(options.quality_gate_check, Some(false));
    }

    #[test]
    fn test_metadata_requires_key() {
        assert!(parse_key_value("=value").is_err());
        assert!(parse_key_value("novalue").is_err());
        assert_eq!(
            parse_key_value("a=b=c").unwrap(),
            ("a".to_string(), "b=c".to_string())
        );
    }
}
