//! Decides which commits of a branch still need an analysis

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use branchscan_core::application::errors::ResultExt;
use branchscan_core::{ScanSyncError, ServiceError};

use crate::domain::{
    AnalysisProject, AnalysisService, ProjectRef, ScanTarget, SelectionStrategy,
    VersionControlHost,
};

/// Get the project for `project.key`, creating it when missing.
///
/// A creation that races with another worker and reports "already exists"
/// counts as success.
pub async fn ensure_project(
    analysis: &dyn AnalysisService,
    project: &ProjectRef,
) -> Result<AnalysisProject, ScanSyncError> {
    let key = project.key.as_str();

    if let Some(existing) = analysis
        .get_project(key)
        .await
        .with_context(|| format!("failed to look up project {}", key))?
    {
        return Ok(existing);
    }

    match analysis.create_project(key, &project.name).await {
        Ok(created) => {
            debug!(project = %key, "Created analysis project");
            Ok(created)
        }
        Err(e)
            if matches!(
                e.root(),
                ScanSyncError::AnalysisService(ServiceError::AlreadyExists(_))
            ) =>
        {
            debug!(project = %key, "Project created concurrently, reusing it");
            Ok(AnalysisProject {
                key: key.to_string(),
                name: project.name.clone(),
            })
        }
        Err(e) => Err(e.context(format!("failed to create project {}", key))),
    }
}

/// `candidates` minus `analyzed`, keeping candidate order
pub fn filter_analyzed(candidates: Vec<String>, analyzed: &HashSet<String>) -> Vec<String> {
    candidates
        .into_iter()
        .filter(|commit| !analyzed.contains(commit))
        .collect()
}

pub struct CommitSelector {
    vcs: Arc<dyn VersionControlHost>,
    analysis: Arc<dyn AnalysisService>,
    strategy: SelectionStrategy,
}

impl CommitSelector {
    pub fn new(vcs: Arc<dyn VersionControlHost>, analysis: Arc<dyn AnalysisService>) -> Self {
        Self {
            vcs,
            analysis,
            strategy: SelectionStrategy::default(),
        }
    }

    pub fn with_strategy(mut self, strategy: SelectionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Commits of `target` not yet analyzed in `project`, in scan order.
    ///
    /// A failing range query aborts selection. A failing analyses query does
    /// not: every candidate is returned so nothing is silently skipped.
    #[instrument(skip(self, project, target), fields(project = %project.key, branch = %target.branch))]
    pub async fn select_commits(
        &self,
        project: &ProjectRef,
        target: &ScanTarget,
    ) -> Result<Vec<String>, ScanSyncError> {
        ensure_project(self.analysis.as_ref(), project).await?;

        let candidates = self.candidates(target).await?;

        let analyzed: HashSet<String> = match self.analysis.list_analyses(project.key.as_str()).await
        {
            Ok(records) => records.into_iter().filter_map(|r| r.revision).collect(),
            Err(e) => {
                warn!(
                    error = %e,
                    candidates = candidates.len(),
                    "Failed to list existing analyses, scanning all candidates"
                );
                return Ok(candidates);
            }
        };

        let selected = filter_analyzed(candidates, &analyzed);
        debug!(selected = selected.len(), already_analyzed = analyzed.len(), "Selected commits");
        Ok(selected)
    }

    async fn candidates(&self, target: &ScanTarget) -> Result<Vec<String>, ScanSyncError> {
        if let Some(commit) = &target.commit {
            return Ok(vec![commit.clone()]);
        }

        match self.strategy {
            SelectionStrategy::Endpoints => self.range_endpoints(target).await,
            SelectionStrategy::FullRange => {
                let base = self
                    .vcs
                    .default_branch(&target.owner, &target.repository)
                    .await
                    .context("failed to resolve default branch")?;
                if base == target.branch {
                    return self.range_endpoints(target).await;
                }

                let commits = self
                    .vcs
                    .commits_between(&target.owner, &target.repository, &base, &target.branch)
                    .await
                    .with_context(|| {
                        format!("failed to list commits between {} and {}", base, target.branch)
                    })?;
                if commits.is_empty() {
                    self.range_endpoints(target).await
                } else {
                    Ok(commits)
                }
            }
        }
    }

    async fn range_endpoints(&self, target: &ScanTarget) -> Result<Vec<String>, ScanSyncError> {
        let range = self
            .vcs
            .branch_commit_range(&target.owner, &target.repository, &target.branch)
            .await
            .with_context(|| format!("failed to get commit range for branch {}", target.branch))?;
        Ok(range.endpoints())
    }
}
