//! Entry point for externally submitted branch scans

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use branchscan_core::application::errors::RequestValidationError;
use branchscan_core::infrastructure::resilience::{RetryPolicy, retry_with_backoff};
use branchscan_core::ScanSyncError;

use crate::domain::{
    AnalysisService, BranchMetadata, BranchScanner, ProjectKey, ProjectRef,
    ScanOutcome, ScanRequest, ScanResponse, ScanStatus, ScanTarget,
};

/// Blank required fields fail before any collaborator is called
pub fn validate_request(request: &ScanRequest) -> Result<(), RequestValidationError> {
    let required: [(&'static str, &str); 5] = [
        ("project_key", &request.project_key),
        ("project_name", &request.project_name),
        ("branch_name", &request.branch_name),
        ("owner", &request.owner),
        ("repository", &request.repository),
    ];

    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(RequestValidationError::missing(field));
        }
    }

    if request.project_path.as_os_str().is_empty() {
        return Err(RequestValidationError::missing("project_path"));
    }

    Ok(())
}

/// Pre-scan branch checks, skipped with `skip_validation`
pub fn validate_branch(request: &ScanRequest) -> Result<(), RequestValidationError> {
    let branch = request.branch_name.as_str();

    if branch.chars().any(char::is_whitespace) {
        return Err(RequestValidationError::invalid(
            "branch_name",
            "must not contain whitespace",
        ));
    }
    if branch.starts_with('-') || branch.contains("..") || branch.ends_with('/') {
        return Err(RequestValidationError::invalid(
            "branch_name",
            format!("'{}' is not a valid branch name", branch),
        ));
    }
    if request.project_path.exists() && !request.project_path.is_dir() {
        return Err(RequestValidationError::invalid(
            "project_path",
            "exists and is not a directory",
        ));
    }

    Ok(())
}

pub struct ScanRequestOrchestrator {
    scanner: Arc<dyn BranchScanner>,
    analysis: Arc<dyn AnalysisService>,
    retry: RetryPolicy,
    quality_gate_check: bool,
}

impl ScanRequestOrchestrator {
    pub fn new(
        scanner: Arc<dyn BranchScanner>,
        analysis: Arc<dyn AnalysisService>,
        retry: RetryPolicy,
        quality_gate_check: bool,
    ) -> Self {
        Self {
            scanner,
            analysis,
            retry,
            quality_gate_check,
        }
    }

    /// Validate, scan with request-level retries, then check the quality gate.
    ///
    /// Returns `Err` only for validation failures and cancellation. A scan
    /// that fails after validation yields a response with
    /// [`ScanStatus::Failed`].
    #[instrument(skip_all, fields(project = %request.project_key, branch = %request.branch_name))]
    pub async fn scan_branch(
        &self,
        request: &ScanRequest,
        cancel: &CancellationToken,
    ) -> Result<ScanResponse, ScanSyncError> {
        let started = Instant::now();
        let timestamp = Utc::now();
        let scan_id = format!(
            "{}-{}-{}",
            request.project_key,
            request.branch_name,
            timestamp.timestamp()
        );

        validate_request(request)?;

        let options = request.options.clone().unwrap_or_default();
        if !options.skip_validation {
            validate_branch(request)?;
        }

        let policy = match options.max_retries {
            Some(retries) => self.retry.clone().with_max_attempts(retries),
            None => self.retry.clone(),
        };

        let project = ProjectRef::new(
            ProjectKey::from_raw(request.project_key.as_str()),
            request.project_name.as_str(),
        );
        let mut target = ScanTarget::new(
            request.owner.as_str(),
            request.repository.as_str(),
            request.branch_name.as_str(),
            request.project_path.clone(),
        );
        target.commit = options.commit.clone();

        info!(scan_id = %scan_id, retries = policy.max_attempts, "Scan request accepted");

        let scanner = self.scanner.as_ref();
        let (project_ref, target_ref) = (&project, &target);
        let result = retry_with_backoff(
            &policy,
            cancel,
            |e| policy.is_retryable(e),
            move |attempt| {
                debug!(attempt, "Starting scan attempt");
                scanner.scan_branch(project_ref, target_ref, cancel)
            },
        )
        .await;

        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let (status, outcome, report) = match result {
            Ok(report) => {
                let outcome = ScanOutcome::succeeded(report.scan_duration);
                (ScanStatus::Completed, Some(outcome), Some(report))
            }
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!(scan_id = %scan_id, error = %e, "Scan request failed");
                errors.push(e.to_string());
                let outcome = ScanOutcome::failed(started.elapsed(), errors.clone());
                (ScanStatus::Failed, Some(outcome), None)
            }
        };

        let check_gate = options.quality_gate_check.unwrap_or(self.quality_gate_check);
        if status == ScanStatus::Completed && check_gate {
            warnings.extend(self.check_quality_gate(&project).await);
        }

        let response = ScanResponse {
            scan_id,
            status,
            branch: BranchMetadata {
                name: request.branch_name.clone(),
                owner: request.owner.clone(),
                repository: request.repository.clone(),
                project_key: request.project_key.clone(),
                commit: options.commit,
            },
            outcome,
            report,
            errors,
            warnings,
            duration: started.elapsed(),
            timestamp,
        };

        info!(
            scan_id = %response.scan_id,
            status = %response.status,
            warnings = response.warnings.len(),
            duration_ms = response.duration.as_millis() as u64,
            "Scan request finished"
        );
        Ok(response)
    }

    /// Gate status and open issue count; problems become warnings
    async fn check_quality_gate(&self, project: &ProjectRef) -> Vec<String> {
        let key = project.key.as_str();
        let mut warnings = Vec::new();

        let issues = match self.analysis.list_issues(key).await {
            Ok(summary) => Some(summary.total),
            Err(e) => {
                warnings.push(format!("failed to count open issues: {}", e));
                None
            }
        };

        match self.analysis.quality_gate_status(key).await {
            Ok(status) if status.is_passing() => {
                debug!(gate = %status, issues = ?issues, "Quality gate passed");
            }
            Ok(status) => {
                let detail = issues
                    .map(|n| format!(" with {} open issues", n))
                    .unwrap_or_default();
                warnings.push(format!("quality gate status is {}{}", status, detail));
            }
            Err(e) => warnings.push(format!("quality gate check failed: {}", e)),
        }

        warnings
    }
}
