//! Circuit breaker and retry decorators for the external collaborators
//!
//! Each decorator owns one [`ResilienceExecutor`] per remote service, so a
//! failing analysis server opens its own circuit without affecting calls to
//! the version-control host.
//!
//! ```text
//! call -> circuit check -> inner client
//!            |                 +- ok            -> record success
//!            |                 +- transient err -> record failure, back off, retry
//!            |                 +- other err     -> record failure, return
//!            |                 +- expected err  -> record success, return
//!            +- open -> CircuitOpen, inner client never called
//! ```

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use branchscan_core::{ScanSyncError, ServiceError};
use branchscan_core::infrastructure::resilience::ResilienceExecutor;

use crate::domain::{
    AnalysisProject, AnalysisRecord, AnalysisService, Branch, CommitRange, IssueSummary,
    ProjectMetadataUpdate, PullRequest, QualityGateStatus, SourceCheckout, VersionControlHost,
};

pub struct ResilientVersionControlHost {
    inner: Arc<dyn VersionControlHost>,
    executor: Arc<ResilienceExecutor>,
    cancel: CancellationToken,
}

impl ResilientVersionControlHost {
    pub fn new(
        inner: Arc<dyn VersionControlHost>,
        executor: Arc<ResilienceExecutor>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner,
            executor,
            cancel,
        }
    }
}

#[async_trait]
impl VersionControlHost for ResilientVersionControlHost {
    async fn default_branch(&self, owner: &str, repository: &str) -> Result<String, ScanSyncError> {
        let inner = self.inner.as_ref();
        self.executor
            .execute_with_retry(&self.cancel, move || inner.default_branch(owner, repository))
            .await
    }

    async fn branch_commit_range(
        &self,
        owner: &str,
        repository: &str,
        branch: &str,
    ) -> Result<CommitRange, ScanSyncError> {
        let inner = self.inner.as_ref();
        self.executor
            .execute_with_retry(&self.cancel, move || {
                inner.branch_commit_range(owner, repository, branch)
            })
            .await
    }

    async fn commits_between(
        &self,
        owner: &str,
        repository: &str,
        base: &str,
        head: &str,
    ) -> Result<Vec<String>, ScanSyncError> {
        let inner = self.inner.as_ref();
        self.executor
            .execute_with_retry(&self.cancel, move || {
                inner.commits_between(owner, repository, base, head)
            })
            .await
    }

    async fn list_pull_requests(
        &self,
        owner: &str,
        repository: &str,
    ) -> Result<Vec<PullRequest>, ScanSyncError> {
        let inner = self.inner.as_ref();
        self.executor
            .execute_with_retry(&self.cancel, move || inner.list_pull_requests(owner, repository))
            .await
    }

    async fn list_branches(
        &self,
        owner: &str,
        repository: &str,
    ) -> Result<Vec<Branch>, ScanSyncError> {
        let inner = self.inner.as_ref();
        self.executor
            .execute_with_retry(&self.cancel, move || inner.list_branches(owner, repository))
            .await
    }

    async fn list_team_members(&self, org: &str, team: &str) -> Result<Vec<String>, ScanSyncError> {
        let inner = self.inner.as_ref();
        self.executor
            .execute_with_retry(&self.cancel, move || inner.list_team_members(org, team))
            .await
    }
}

/// Checkout runs behind its own `git` circuit, so a failing clone remote
/// leaves the host API circuit closed
pub struct ResilientSourceCheckout {
    inner: Arc<dyn SourceCheckout>,
    executor: Arc<ResilienceExecutor>,
    cancel: CancellationToken,
}

impl ResilientSourceCheckout {
    pub fn new(
        inner: Arc<dyn SourceCheckout>,
        executor: Arc<ResilienceExecutor>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner,
            executor,
            cancel,
        }
    }
}

#[async_trait]
impl SourceCheckout for ResilientSourceCheckout {
    async fn checkout(
        &self,
        owner: &str,
        repository: &str,
        commit: &str,
        dir: &Path,
    ) -> Result<(), ScanSyncError> {
        // Only pattern matches make a checkout failure retryable.
        let inner = self.inner.as_ref();
        self.executor
            .execute_with_retry(&self.cancel, move || {
                inner.checkout(owner, repository, commit, dir)
            })
            .await
    }
}

fn is_already_exists(error: &ScanSyncError) -> bool {
    matches!(
        error.root(),
        ScanSyncError::AnalysisService(ServiceError::AlreadyExists(_))
    )
}

pub struct ResilientAnalysisService {
    inner: Arc<dyn AnalysisService>,
    executor: Arc<ResilienceExecutor>,
    cancel: CancellationToken,
}

impl ResilientAnalysisService {
    pub fn new(
        inner: Arc<dyn AnalysisService>,
        executor: Arc<ResilienceExecutor>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner,
            executor,
            cancel,
        }
    }
}

#[async_trait]
impl AnalysisService for ResilientAnalysisService {
    async fn get_project(&self, key: &str) -> Result<Option<AnalysisProject>, ScanSyncError> {
        let inner = self.inner.as_ref();
        self.executor
            .execute_with_retry(&self.cancel, move || inner.get_project(key))
            .await
    }

    async fn create_project(
        &self,
        key: &str,
        name: &str,
    ) -> Result<AnalysisProject, ScanSyncError> {
        // A creation race answers "already exists"; the service is healthy.
        let inner = self.inner.as_ref();
        self.executor
            .execute_with_retry_expecting(&self.cancel, is_already_exists, move || {
                inner.create_project(key, name)
            })
            .await
    }

    async fn update_project_metadata(
        &self,
        key: &str,
        update: &ProjectMetadataUpdate,
    ) -> Result<(), ScanSyncError> {
        let inner = self.inner.as_ref();
        self.executor
            .execute_with_retry(&self.cancel, move || inner.update_project_metadata(key, update))
            .await
    }

    async fn add_project_admin(&self, key: &str, login: &str) -> Result<(), ScanSyncError> {
        let inner = self.inner.as_ref();
        self.executor
            .execute_with_retry(&self.cancel, move || inner.add_project_admin(key, login))
            .await
    }

    async fn delete_project(&self, key: &str) -> Result<(), ScanSyncError> {
        let inner = self.inner.as_ref();
        self.executor
            .execute_with_retry(&self.cancel, move || inner.delete_project(key))
            .await
    }

    async fn search_projects(
        &self,
        key_prefix: &str,
    ) -> Result<Vec<AnalysisProject>, ScanSyncError> {
        let inner = self.inner.as_ref();
        self.executor
            .execute_with_retry(&self.cancel, move || inner.search_projects(key_prefix))
            .await
    }

    async fn list_analyses(&self, key: &str) -> Result<Vec<AnalysisRecord>, ScanSyncError> {
        let inner = self.inner.as_ref();
        self.executor
            .execute_with_retry(&self.cancel, move || inner.list_analyses(key))
            .await
    }

    async fn list_issues(&self, key: &str) -> Result<IssueSummary, ScanSyncError> {
        let inner = self.inner.as_ref();
        self.executor
            .execute_with_retry(&self.cancel, move || inner.list_issues(key))
            .await
    }

    async fn quality_gate_status(&self, key: &str) -> Result<QualityGateStatus, ScanSyncError> {
        let inner = self.inner.as_ref();
        self.executor
            .execute_with_retry(&self.cancel, move || inner.quality_gate_status(key))
            .await
    }
}
