//! Branch and pull-request scans built from the selector and the executor

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use branchscan_core::application::errors::ResultExt;
use branchscan_core::{ScanSyncError, ServiceError};

use crate::application::commit_selector::CommitSelector;
use crate::application::scan_executor::ScanExecutor;
use crate::domain::{
    BranchScanReport, BranchScanner, ProjectKey, ProjectRef, ScanTarget, VersionControlHost,
    branch_project_name,
};

/// Maps branches to analysis projects and working directories
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    pub project_prefix: String,
    pub workspace_root: PathBuf,
}

impl ProjectLayout {
    pub fn new(project_prefix: impl Into<String>, workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            project_prefix: project_prefix.into(),
            workspace_root: workspace_root.into(),
        }
    }

    pub fn project_for(&self, owner: &str, repository: &str, branch: &str) -> ProjectRef {
        ProjectRef::new(
            ProjectKey::derive(&self.project_prefix, owner, repository, branch),
            branch_project_name(owner, repository, branch),
        )
    }

    /// Target whose working tree is `{workspace_root}/{project_key}`
    pub fn target_for(&self, project: &ProjectRef, owner: &str, repository: &str, branch: &str) -> ScanTarget {
        ScanTarget::new(
            owner,
            repository,
            branch,
            self.workspace_root.join(project.key.as_str()),
        )
    }

    pub fn repository_prefix(&self, owner: &str, repository: &str) -> String {
        ProjectKey::repository_prefix(&self.project_prefix, owner, repository)
    }
}

pub struct BranchScanOrchestrator {
    selector: Arc<CommitSelector>,
    executor: Arc<ScanExecutor>,
    vcs: Arc<dyn VersionControlHost>,
    layout: ProjectLayout,
}

impl BranchScanOrchestrator {
    pub fn new(
        selector: Arc<CommitSelector>,
        executor: Arc<ScanExecutor>,
        vcs: Arc<dyn VersionControlHost>,
        layout: ProjectLayout,
    ) -> Self {
        Self {
            selector,
            executor,
            vcs,
            layout,
        }
    }

    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    /// Scan the head commit of open pull request `number` into the project
    /// of its head branch
    #[instrument(skip(self, cancel))]
    pub async fn scan_pull_request(
        &self,
        owner: &str,
        repository: &str,
        number: u64,
        cancel: &CancellationToken,
    ) -> Result<BranchScanReport, ScanSyncError> {
        let pull_requests = self
            .vcs
            .list_pull_requests(owner, repository)
            .await
            .context("failed to list pull requests")?;

        let pr = pull_requests
            .into_iter()
            .find(|pr| pr.number == number)
            .ok_or_else(|| {
                ScanSyncError::version_control(ServiceError::NotFound(format!(
                    "open pull request #{} in {}/{}",
                    number, owner, repository
                )))
            })?;

        info!(number, head = %pr.head_ref, sha = %pr.head_sha, "Scanning pull request head");

        let project = self.layout.project_for(owner, repository, &pr.head_ref);
        let target = self
            .layout
            .target_for(&project, owner, repository, &pr.head_ref)
            .with_commit(pr.head_sha);

        self.scan_branch(&project, &target, cancel)
            .await
            .with_context(|| format!("failed to scan pull request #{}", number))
    }
}

#[async_trait]
impl BranchScanner for BranchScanOrchestrator {
    /// Commits are scanned strictly in selector order; the first failure
    /// aborts the remaining commits of the branch.
    #[instrument(skip_all, fields(project = %project.key, branch = %target.branch))]
    async fn scan_branch(
        &self,
        project: &ProjectRef,
        target: &ScanTarget,
        cancel: &CancellationToken,
    ) -> Result<BranchScanReport, ScanSyncError> {
        let selected = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ScanSyncError::Cancelled),
            selected = self.selector.select_commits(project, target) => selected?,
        };

        let mut report = BranchScanReport::new(project.key.clone(), target.branch.clone());
        if selected.is_empty() {
            info!("Branch already fully analyzed");
            return Ok(report);
        }
        report.selected = selected.clone();

        for commit in &selected {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ScanSyncError::Cancelled),
                result = self.executor.scan_commit(&project.key, target, commit) => result?,
            };
            report.record(commit, &result);
        }

        info!(
            scanned = report.scanned.len(),
            skipped = report.skipped.len(),
            "Branch scan finished"
        );
        Ok(report)
    }
}
