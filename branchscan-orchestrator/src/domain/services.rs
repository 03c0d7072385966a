//! Orchestrator domain services
//!
//! Collaborator seams. Production implementations live in
//! [`crate::infrastructure`]; tests substitute in-memory doubles.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use branchscan_core::{ScanSyncError, ScannerError};

use super::entities::{
    AnalysisProject, AnalysisRecord, Branch, BranchScanReport, IssueSummary,
    ProjectMetadataUpdate, ProjectRef, PullRequest, ScanOutcome, ScanTarget,
};
use super::value_objects::{CommitRange, QualityGateStatus, ScannerProperties};

/// Version-control host operations
#[async_trait]
pub trait VersionControlHost: Send + Sync {
    async fn default_branch(&self, owner: &str, repository: &str) -> Result<String, ScanSyncError>;

    /// First and last commit of `branch` relative to the default branch
    async fn branch_commit_range(
        &self,
        owner: &str,
        repository: &str,
        branch: &str,
    ) -> Result<CommitRange, ScanSyncError>;

    /// Commits reachable from `head` but not from `base`, oldest first
    async fn commits_between(
        &self,
        owner: &str,
        repository: &str,
        base: &str,
        head: &str,
    ) -> Result<Vec<String>, ScanSyncError>;

    async fn list_pull_requests(
        &self,
        owner: &str,
        repository: &str,
    ) -> Result<Vec<PullRequest>, ScanSyncError>;

    async fn list_branches(&self, owner: &str, repository: &str)
    -> Result<Vec<Branch>, ScanSyncError>;

    /// Logins of the members of `team` in organization `org`
    async fn list_team_members(&self, org: &str, team: &str) -> Result<Vec<String>, ScanSyncError>;
}

/// Places a specific commit into a working directory
#[async_trait]
pub trait SourceCheckout: Send + Sync {
    async fn checkout(
        &self,
        owner: &str,
        repository: &str,
        commit: &str,
        dir: &Path,
    ) -> Result<(), ScanSyncError>;
}

/// Code-quality analysis service operations
#[async_trait]
pub trait AnalysisService: Send + Sync {
    async fn get_project(&self, key: &str) -> Result<Option<AnalysisProject>, ScanSyncError>;

    /// Fails with an `AlreadyExists` service error when the key is taken
    async fn create_project(&self, key: &str, name: &str)
    -> Result<AnalysisProject, ScanSyncError>;

    async fn update_project_metadata(
        &self,
        key: &str,
        update: &ProjectMetadataUpdate,
    ) -> Result<(), ScanSyncError>;

    async fn add_project_admin(&self, key: &str, login: &str) -> Result<(), ScanSyncError>;

    async fn delete_project(&self, key: &str) -> Result<(), ScanSyncError>;

    /// Projects whose key starts with `key_prefix`
    async fn search_projects(&self, key_prefix: &str)
    -> Result<Vec<AnalysisProject>, ScanSyncError>;

    async fn list_analyses(&self, key: &str) -> Result<Vec<AnalysisRecord>, ScanSyncError>;

    async fn list_issues(&self, key: &str) -> Result<IssueSummary, ScanSyncError>;

    async fn quality_gate_status(&self, key: &str) -> Result<QualityGateStatus, ScanSyncError>;
}

/// Scan tool lifecycle
#[async_trait]
pub trait ScannerRuntime: Send + Sync {
    /// Download and cache `version` if needed; returns the executable path
    async fn ensure_installed(&self, version: &str) -> Result<PathBuf, ScannerError>;

    /// Execute one analysis of `dir`.
    ///
    /// A run that completes with a failing status is `Ok` with
    /// `success == false`; `Err` means the tool could not start or crashed.
    async fn run(
        &self,
        executable: &Path,
        properties: &ScannerProperties,
        dir: &Path,
    ) -> Result<ScanOutcome, ScannerError>;

    /// Remove temporary files the tool left in `dir`
    async fn cleanup(&self, dir: &Path) -> Result<(), ScannerError>;
}

/// Scans every outstanding commit of one branch
#[async_trait]
pub trait BranchScanner: Send + Sync {
    async fn scan_branch(
        &self,
        project: &ProjectRef,
        target: &ScanTarget,
        cancel: &CancellationToken,
    ) -> Result<BranchScanReport, ScanSyncError>;
}
