//! Keeps every branch of a repository in sync with its analysis project
//!
//! One unit of work per branch runs under a bounded gate. Branches with an
//! existing project get a metadata refresh; new branches get a full scan.
//! Orphaned projects are reported, or deleted when forced.
//!
//! A project counts as this repository's only when its display name says so
//! (see [`ProjectOwnership`]); a shared key prefix is never enough.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use branchscan_core::application::errors::{RequestValidationError, ResultExt, UnitFailure};
use branchscan_core::config::SyncConfig;
use branchscan_core::ScanSyncError;

use crate::application::branch_scan::ProjectLayout;
use crate::domain::{
    AnalysisProject, AnalysisService, Branch, BranchScanner, FailurePolicy, ProjectMetadataUpdate,
    ProjectOwnership, ProjectRef, SyncReport, VersionControlHost,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BranchAction {
    Refresh,
    Scan,
}

struct BranchUnit {
    branch: String,
    project: ProjectRef,
    action: BranchAction,
}

/// Branches mapped to projects before any work starts
#[derive(Default)]
struct SyncPlan {
    units: Vec<BranchUnit>,
    /// Branches that cannot be synced without writing into a project they share
    conflicts: Vec<UnitFailure>,
    live_keys: HashSet<String>,
}

fn key_conflict(branch: &str, reason: String) -> UnitFailure {
    UnitFailure {
        unit: branch.to_string(),
        error: RequestValidationError::invalid("branch_name", reason).into(),
    }
}

/// Orphaned projects found by a cleanup pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub stale_projects: Vec<String>,
    pub deleted_projects: Vec<String>,
}

pub struct RepositorySynchronizer {
    vcs: Arc<dyn VersionControlHost>,
    analysis: Arc<dyn AnalysisService>,
    scanner: Arc<dyn BranchScanner>,
    layout: ProjectLayout,
    settings: SyncConfig,
}

/// Clones of everything one branch unit needs
#[derive(Clone)]
struct UnitContext {
    vcs: Arc<dyn VersionControlHost>,
    analysis: Arc<dyn AnalysisService>,
    scanner: Arc<dyn BranchScanner>,
    layout: ProjectLayout,
    admin_team: Option<String>,
}

impl RepositorySynchronizer {
    pub fn new(
        vcs: Arc<dyn VersionControlHost>,
        analysis: Arc<dyn AnalysisService>,
        scanner: Arc<dyn BranchScanner>,
        layout: ProjectLayout,
        settings: SyncConfig,
    ) -> Self {
        Self {
            vcs,
            analysis,
            scanner,
            layout,
            settings,
        }
    }

    fn unit_context(&self) -> UnitContext {
        UnitContext {
            vcs: self.vcs.clone(),
            analysis: self.analysis.clone(),
            scanner: self.scanner.clone(),
            layout: self.layout.clone(),
            admin_team: self.settings.admin_team.clone(),
        }
    }

    /// Synchronize every branch of `owner/repository`.
    ///
    /// With [`FailurePolicy::FailFast`] the first branch failure cancels all
    /// in-flight siblings and is returned. With [`FailurePolicy::BestEffort`]
    /// every branch runs and all failures come back as one aggregate error.
    /// Cleanup of orphaned projects only runs after every branch succeeded.
    #[instrument(skip(self, cancel))]
    pub async fn sync_repository(
        &self,
        owner: &str,
        repository: &str,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, ScanSyncError> {
        let branches = self
            .vcs
            .list_branches(owner, repository)
            .await
            .with_context(|| format!("failed to list branches of {}/{}", owner, repository))?;

        let projects = self
            .analysis
            .search_projects(&self.layout.repository_prefix(owner, repository))
            .await
            .with_context(|| format!("failed to list projects of {}/{}", owner, repository))?;

        let plan = self.plan_branches(owner, repository, &branches, &projects);

        info!(
            branches = branches.len(),
            projects = projects.len(),
            conflicts = plan.conflicts.len(),
            concurrency = self.settings.max_concurrent_branches,
            policy = ?self.settings.failure_policy,
            "Starting repository sync"
        );

        let mut failures = Vec::new();
        for conflict in plan.conflicts {
            warn!(branch = %conflict.unit, error = %conflict.error, "Branch cannot be synced");
            if self.settings.failure_policy == FailurePolicy::FailFast {
                let branch = conflict.unit;
                return Err(conflict.error.context(format!("failed to sync branch {}", branch)));
            }
            failures.push(conflict);
        }

        let units = cancel.child_token();
        let gate = Arc::new(Semaphore::new(self.settings.max_concurrent_branches.max(1)));
        let mut tasks = JoinSet::new();

        for BranchUnit {
            branch: branch_name,
            project,
            action,
        } in plan.units
        {
            let ctx = self.unit_context();
            let gate = gate.clone();
            let token = units.clone();
            let owner = owner.to_string();
            let repository = repository.to_string();

            tasks.spawn(async move {
                let result = async {
                    let _permit = tokio::select! {
                        biased;
                        _ = token.cancelled() => return Err(ScanSyncError::Cancelled),
                        permit = gate.acquire_owned() => permit.map_err(|_| ScanSyncError::Cancelled)?,
                    };
                    if token.is_cancelled() {
                        return Err(ScanSyncError::Cancelled);
                    }
                    ctx.run(action, &project, &owner, &repository, &branch_name, &token)
                        .await
                }
                .await;
                (branch_name, action, result)
            });
        }

        let mut report = SyncReport {
            owner: owner.to_string(),
            repository: repository.to_string(),
            branches: branches.len(),
            ..SyncReport::default()
        };

        while let Some(joined) = tasks.join_next().await {
            let (branch, action, result) = match joined {
                Ok(unit) => unit,
                Err(e) if e.is_cancelled() => continue,
                Err(e) => {
                    error!(error = %e, "Branch task panicked");
                    let failure = ScanSyncError::Internal(format!("branch task panicked: {}", e));
                    if self.settings.failure_policy == FailurePolicy::FailFast {
                        units.cancel();
                        tasks.abort_all();
                        return Err(failure.context("failed to sync branch"));
                    }
                    failures.push(UnitFailure {
                        unit: "<panicked>".to_string(),
                        error: failure,
                    });
                    continue;
                }
            };

            match result {
                Ok(()) => match action {
                    BranchAction::Refresh => report.refreshed.push(branch),
                    BranchAction::Scan => report.scanned.push(branch),
                },
                Err(e) if cancel.is_cancelled() => {
                    debug!(branch = %branch, error = %e, "Branch stopped by cancellation");
                    units.cancel();
                    tasks.abort_all();
                    return Err(ScanSyncError::Cancelled);
                }
                Err(e) => match self.settings.failure_policy {
                    FailurePolicy::FailFast => {
                        warn!(branch = %branch, error = %e, "Branch failed, cancelling remaining branches");
                        units.cancel();
                        tasks.abort_all();
                        return Err(e.context(format!("failed to sync branch {}", branch)));
                    }
                    FailurePolicy::BestEffort => {
                        warn!(branch = %branch, error = %e, "Branch failed, continuing");
                        failures.push(UnitFailure {
                            unit: branch,
                            error: e,
                        });
                    }
                },
            }
        }

        if !failures.is_empty() {
            return Err(ScanSyncError::Aggregate(failures));
        }

        let cleanup = self
            .cleanup_orphans(
                owner,
                repository,
                &projects,
                &plan.live_keys,
                self.settings.force_cleanup,
            )
            .await;
        report.stale_projects = cleanup.stale_projects;
        report.deleted_projects = cleanup.deleted_projects;

        info!(
            scanned = report.scanned.len(),
            refreshed = report.refreshed.len(),
            stale = report.stale_projects.len(),
            "Repository sync complete"
        );
        Ok(report)
    }

    /// Report or delete projects of `owner/repository` with no live branch
    #[instrument(skip(self))]
    pub async fn cleanup_stale_projects(
        &self,
        owner: &str,
        repository: &str,
        force: bool,
    ) -> Result<CleanupReport, ScanSyncError> {
        let branches = self
            .vcs
            .list_branches(owner, repository)
            .await
            .with_context(|| format!("failed to list branches of {}/{}", owner, repository))?;
        let projects = self
            .analysis
            .search_projects(&self.layout.repository_prefix(owner, repository))
            .await
            .with_context(|| format!("failed to list projects of {}/{}", owner, repository))?;

        let plan = self.plan_branches(owner, repository, &branches, &projects);
        Ok(self
            .cleanup_orphans(owner, repository, &projects, &plan.live_keys, force)
            .await)
    }

    /// Map every branch to its project and decide refresh or scan.
    ///
    /// Branches whose keys collide with each other, or with a project named
    /// after another repository, become conflicts instead of units.
    fn plan_branches(
        &self,
        owner: &str,
        repository: &str,
        branches: &[Branch],
        projects: &[AnalysisProject],
    ) -> SyncPlan {
        let existing: HashMap<&str, &AnalysisProject> =
            projects.iter().map(|p| (p.key.as_str(), p)).collect();

        let mapped: Vec<(&Branch, ProjectRef)> = branches
            .iter()
            .map(|b| (b, self.layout.project_for(owner, repository, &b.name)))
            .collect();

        let mut claimants: HashMap<&str, Vec<&str>> = HashMap::new();
        for (branch, project) in &mapped {
            claimants
                .entry(project.key.as_str())
                .or_default()
                .push(branch.name.as_str());
        }

        let mut plan = SyncPlan::default();
        for (branch, project) in &mapped {
            let key = project.key.as_str();
            plan.live_keys.insert(key.to_string());

            if let Some(names) = claimants.get(key).filter(|names| names.len() > 1) {
                plan.conflicts.push(key_conflict(
                    &branch.name,
                    format!("branches {} all map to project key {}", names.join(", "), key),
                ));
                continue;
            }

            let action = match existing.get(key) {
                None => BranchAction::Scan,
                Some(found)
                    if ProjectOwnership::of(&found.name, owner, repository)
                        == ProjectOwnership::Foreign =>
                {
                    plan.conflicts.push(key_conflict(
                        &branch.name,
                        format!("project key {} already belongs to {}", key, found.name),
                    ));
                    continue;
                }
                Some(_) => BranchAction::Refresh,
            };

            plan.units.push(BranchUnit {
                branch: branch.name.clone(),
                project: project.clone(),
                action,
            });
        }
        plan
    }

    async fn cleanup_orphans(
        &self,
        owner: &str,
        repository: &str,
        projects: &[AnalysisProject],
        live_keys: &HashSet<String>,
        force: bool,
    ) -> CleanupReport {
        let (owned, unowned): (Vec<&AnalysisProject>, Vec<&AnalysisProject>) =
            projects.iter().partition(|p| {
                ProjectOwnership::of(&p.name, owner, repository) == ProjectOwnership::Owned
            });
        if !unowned.is_empty() {
            debug!(
                count = unowned.len(),
                "Ignoring prefix matches not named after this repository"
            );
        }

        let stale: Vec<String> = owned
            .into_iter()
            .filter(|p| !live_keys.contains(&p.key))
            .map(|p| p.key.clone())
            .collect();

        let mut report = CleanupReport {
            stale_projects: stale.clone(),
            deleted_projects: Vec::new(),
        };

        if stale.is_empty() {
            debug!("No orphaned projects");
            return report;
        }

        if !force {
            // Retention by analysis age is undecided; orphans are only reported.
            warn!(
                count = stale.len(),
                projects = ?stale,
                "Orphaned projects found; age-based cleanup is not implemented, use force to delete"
            );
            return report;
        }

        for key in stale {
            match self.analysis.delete_project(&key).await {
                Ok(()) => {
                    info!(project = %key, "Deleted orphaned project");
                    report.deleted_projects.push(key);
                }
                Err(e) => warn!(project = %key, error = %e, "Failed to delete orphaned project"),
            }
        }

        report
    }
}

impl UnitContext {
    async fn run(
        &self,
        action: BranchAction,
        project: &ProjectRef,
        owner: &str,
        repository: &str,
        branch: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ScanSyncError> {
        match action {
            BranchAction::Refresh => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(ScanSyncError::Cancelled),
                    result = self.refresh(project, owner, repository, branch) => result,
                }
            }
            BranchAction::Scan => {
                let target = self.layout.target_for(project, owner, repository, branch);
                self.scanner.scan_branch(project, &target, cancel).await.map(|_| ())
            }
        }
    }

    /// Description and tags, then administrators from the configured team
    async fn refresh(
        &self,
        project: &ProjectRef,
        owner: &str,
        repository: &str,
        branch: &str,
    ) -> Result<(), ScanSyncError> {
        let key = project.key.as_str();
        let update = ProjectMetadataUpdate {
            description: format!("Static analysis of {}/{} branch {}", owner, repository, branch),
            tags: metadata_tags(owner, repository),
        };

        self.analysis
            .update_project_metadata(key, &update)
            .await
            .with_context(|| format!("failed to update metadata of {}", key))?;

        if let Some(team) = &self.admin_team {
            let members = self
                .vcs
                .list_team_members(owner, team)
                .await
                .with_context(|| format!("failed to list members of team {}", team))?;
            for login in &members {
                self.analysis
                    .add_project_admin(key, login)
                    .await
                    .with_context(|| format!("failed to grant {} admin on {}", login, key))?;
            }
            debug!(project = %key, admins = members.len(), "Synced project administrators");
        }

        Ok(())
    }
}

/// Lowercase tags limited to the characters the analysis service accepts
fn metadata_tags(owner: &str, repository: &str) -> Vec<String> {
    [owner, repository]
        .iter()
        .map(|part| {
            part.to_ascii_lowercase()
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '.') { c } else { '-' })
                .collect::<String>()
        })
        .filter(|tag| !tag.is_empty())
        .collect()
}
