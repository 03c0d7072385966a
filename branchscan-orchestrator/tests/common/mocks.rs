//! In-memory collaborators for orchestrator integration tests

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use branchscan_core::{ScanSyncError, ScannerError, ServiceError};
use branchscan_orchestrator::domain::{
    AnalysisProject, AnalysisRecord, AnalysisService, Branch, BranchScanReport, BranchScanner,
    CommitRange, IssueSummary, ProjectKey, ProjectMetadataUpdate, ProjectRef, PullRequest,
    QualityGateStatus, ScanOutcome, ScanTarget, ScannerProperties, ScannerRuntime, SourceCheckout,
    VersionControlHost, branch_project_name,
};

// ── Version-control host ─────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockVcs {
    pub default_branch: Mutex<String>,
    pub branches: Mutex<Vec<Branch>>,
    pub ranges: Mutex<HashMap<String, CommitRange>>,
    pub between: Mutex<HashMap<String, Vec<String>>>,
    pub pull_requests: Mutex<Vec<PullRequest>>,
    pub team_members: Mutex<Vec<String>>,
    /// Errors returned by `branch_commit_range` for a branch
    pub range_errors: Mutex<HashMap<String, ServiceError>>,
    pub calls: AtomicUsize,
}

impl MockVcs {
    pub fn new() -> Self {
        let vcs = Self::default();
        *vcs.default_branch.lock().unwrap() = "main".to_string();
        vcs
    }

    pub fn with_branch(self, name: &str, first: &str, last: &str) -> Self {
        self.branches.lock().unwrap().push(Branch {
            name: name.to_string(),
            sha: last.to_string(),
        });
        self.ranges
            .lock()
            .unwrap()
            .insert(name.to_string(), CommitRange::new(first, last));
        self
    }

    pub fn with_range_error(self, branch: &str, error: ServiceError) -> Self {
        self.range_errors
            .lock()
            .unwrap()
            .insert(branch.to_string(), error);
        self
    }

    pub fn with_commits_between(self, head: &str, commits: &[&str]) -> Self {
        self.between.lock().unwrap().insert(
            head.to_string(),
            commits.iter().map(|c| c.to_string()).collect(),
        );
        self
    }

    pub fn with_pull_request(self, number: u64, head_ref: &str, head_sha: &str) -> Self {
        self.pull_requests.lock().unwrap().push(PullRequest {
            number,
            title: format!("PR {}", number),
            head_ref: head_ref.to_string(),
            head_sha: head_sha.to_string(),
            base_ref: "main".to_string(),
        });
        self
    }

    pub fn with_team_members(self, members: &[&str]) -> Self {
        *self.team_members.lock().unwrap() = members.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn record(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl VersionControlHost for MockVcs {
    async fn default_branch(&self, _owner: &str, _repository: &str) -> Result<String, ScanSyncError> {
        self.record();
        Ok(self.default_branch.lock().unwrap().clone())
    }

    async fn branch_commit_range(
        &self,
        _owner: &str,
        _repository: &str,
        branch: &str,
    ) -> Result<CommitRange, ScanSyncError> {
        self.record();
        if let Some(error) = self.range_errors.lock().unwrap().get(branch) {
            return Err(ScanSyncError::version_control(error.clone()));
        }
        self.ranges
            .lock()
            .unwrap()
            .get(branch)
            .cloned()
            .ok_or_else(|| ScanSyncError::version_control(ServiceError::NotFound(branch.to_string())))
    }

    async fn commits_between(
        &self,
        _owner: &str,
        _repository: &str,
        _base: &str,
        head: &str,
    ) -> Result<Vec<String>, ScanSyncError> {
        self.record();
        Ok(self
            .between
            .lock()
            .unwrap()
            .get(head)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_pull_requests(
        &self,
        _owner: &str,
        _repository: &str,
    ) -> Result<Vec<PullRequest>, ScanSyncError> {
        self.record();
        Ok(self.pull_requests.lock().unwrap().clone())
    }

    async fn list_branches(&self, _owner: &str, _repository: &str) -> Result<Vec<Branch>, ScanSyncError> {
        self.record();
        Ok(self.branches.lock().unwrap().clone())
    }

    async fn list_team_members(&self, _org: &str, _team: &str) -> Result<Vec<String>, ScanSyncError> {
        self.record();
        Ok(self.team_members.lock().unwrap().clone())
    }
}

// ── Analysis service ─────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockAnalysis {
    pub projects: Mutex<BTreeMap<String, AnalysisProject>>,
    /// Analyzed revisions per project key
    pub analyses: Mutex<HashMap<String, Vec<String>>>,
    pub fail_analyses: Mutex<bool>,
    /// `create_project` reports a duplicate even though `get_project` saw nothing
    pub create_conflicts: Mutex<bool>,
    pub gate: Mutex<Option<QualityGateStatus>>,
    pub open_issues: Mutex<u64>,
    pub created: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<String>>,
    pub metadata_updates: Mutex<Vec<(String, ProjectMetadataUpdate)>>,
    pub admins: Mutex<Vec<(String, String)>>,
    pub failing_deletes: Mutex<HashSet<String>>,
    pub calls: AtomicUsize,
}

impl MockAnalysis {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_project(self, key: &str) -> Self {
        self.projects.lock().unwrap().insert(
            key.to_string(),
            AnalysisProject {
                key: key.to_string(),
                name: key.to_string(),
            },
        );
        self
    }

    /// Project as branchscan creates it for `owner/repository` branch `branch`
    pub fn with_branch_project(self, owner: &str, repository: &str, branch: &str) -> Self {
        let key = ProjectKey::derive("", owner, repository, branch);
        self.with_named_project(key.as_str(), &branch_project_name(owner, repository, branch))
    }

    pub fn with_named_project(self, key: &str, name: &str) -> Self {
        self.projects.lock().unwrap().insert(
            key.to_string(),
            AnalysisProject {
                key: key.to_string(),
                name: name.to_string(),
            },
        );
        self
    }

    pub fn with_analyses(self, key: &str, revisions: &[&str]) -> Self {
        self.analyses.lock().unwrap().insert(
            key.to_string(),
            revisions.iter().map(|r| r.to_string()).collect(),
        );
        self
    }

    pub fn with_failing_analyses(self) -> Self {
        *self.fail_analyses.lock().unwrap() = true;
        self
    }

    pub fn with_create_conflicts(self) -> Self {
        *self.create_conflicts.lock().unwrap() = true;
        self
    }

    pub fn with_gate(self, status: QualityGateStatus, open_issues: u64) -> Self {
        *self.gate.lock().unwrap() = Some(status);
        *self.open_issues.lock().unwrap() = open_issues;
        self
    }

    pub fn with_failing_delete(self, key: &str) -> Self {
        self.failing_deletes.lock().unwrap().insert(key.to_string());
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    fn record(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl AnalysisService for MockAnalysis {
    async fn get_project(&self, key: &str) -> Result<Option<AnalysisProject>, ScanSyncError> {
        self.record();
        Ok(self.projects.lock().unwrap().get(key).cloned())
    }

    async fn create_project(&self, key: &str, name: &str) -> Result<AnalysisProject, ScanSyncError> {
        self.record();
        if *self.create_conflicts.lock().unwrap() {
            return Err(ScanSyncError::analysis_service(ServiceError::AlreadyExists(
                key.to_string(),
            )));
        }
        let project = AnalysisProject {
            key: key.to_string(),
            name: name.to_string(),
        };
        self.projects
            .lock()
            .unwrap()
            .insert(key.to_string(), project.clone());
        self.created.lock().unwrap().push(key.to_string());
        Ok(project)
    }

    async fn update_project_metadata(
        &self,
        key: &str,
        update: &ProjectMetadataUpdate,
    ) -> Result<(), ScanSyncError> {
        self.record();
        self.metadata_updates
            .lock()
            .unwrap()
            .push((key.to_string(), update.clone()));
        Ok(())
    }

    async fn add_project_admin(&self, key: &str, login: &str) -> Result<(), ScanSyncError> {
        self.record();
        self.admins
            .lock()
            .unwrap()
            .push((key.to_string(), login.to_string()));
        Ok(())
    }

    async fn delete_project(&self, key: &str) -> Result<(), ScanSyncError> {
        self.record();
        if self.failing_deletes.lock().unwrap().contains(key) {
            return Err(ScanSyncError::analysis_service(ServiceError::Http {
                status: 500,
                message: "delete failed".to_string(),
            }));
        }
        self.projects.lock().unwrap().remove(key);
        self.deleted.lock().unwrap().push(key.to_string());
        Ok(())
    }

    async fn search_projects(&self, key_prefix: &str) -> Result<Vec<AnalysisProject>, ScanSyncError> {
        self.record();
        Ok(self
            .projects
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.key.starts_with(key_prefix))
            .cloned()
            .collect())
    }

    async fn list_analyses(&self, key: &str) -> Result<Vec<AnalysisRecord>, ScanSyncError> {
        self.record();
        if *self.fail_analyses.lock().unwrap() {
            return Err(ScanSyncError::analysis_service(ServiceError::ServiceUnavailable(
                "analyses index rebuilding".to_string(),
            )));
        }
        Ok(self
            .analyses
            .lock()
            .unwrap()
            .get(key)
            .map(|revisions| {
                revisions
                    .iter()
                    .enumerate()
                    .map(|(i, revision)| AnalysisRecord {
                        key: format!("analysis-{}", i),
                        revision: Some(revision.clone()),
                        date: Utc::now(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_issues(&self, _key: &str) -> Result<IssueSummary, ScanSyncError> {
        self.record();
        Ok(IssueSummary {
            total: *self.open_issues.lock().unwrap(),
            by_severity: BTreeMap::new(),
        })
    }

    async fn quality_gate_status(&self, _key: &str) -> Result<QualityGateStatus, ScanSyncError> {
        self.record();
        match *self.gate.lock().unwrap() {
            Some(status) => Ok(status),
            None => Err(ScanSyncError::analysis_service(ServiceError::NotFound(
                "quality gate".to_string(),
            ))),
        }
    }
}

// ── Checkout ─────────────────────────────────────────────────────────────────

/// Materializes a fixed directory listing per commit
#[derive(Default)]
pub struct MockCheckout {
    /// Top-level directories created for a commit; unknown commits get `src`
    pub trees: Mutex<HashMap<String, Vec<String>>>,
    pub checkouts: Mutex<Vec<(String, PathBuf)>>,
    pub failing: Mutex<HashSet<String>>,
}

impl MockCheckout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tree(self, commit: &str, dirs: &[&str]) -> Self {
        self.trees.lock().unwrap().insert(
            commit.to_string(),
            dirs.iter().map(|d| d.to_string()).collect(),
        );
        self
    }

    pub fn with_failure(self, commit: &str) -> Self {
        self.failing.lock().unwrap().insert(commit.to_string());
        self
    }

    pub fn checked_out(&self) -> Vec<String> {
        self.checkouts
            .lock()
            .unwrap()
            .iter()
            .map(|(commit, _)| commit.clone())
            .collect()
    }
}

#[async_trait]
impl SourceCheckout for MockCheckout {
    async fn checkout(
        &self,
        _owner: &str,
        _repository: &str,
        commit: &str,
        dir: &Path,
    ) -> Result<(), ScanSyncError> {
        self.checkouts
            .lock()
            .unwrap()
            .push((commit.to_string(), dir.to_path_buf()));
        if self.failing.lock().unwrap().contains(commit) {
            return Err(ScanSyncError::checkout(format!("commit {} missing", commit)));
        }

        let dirs = self
            .trees
            .lock()
            .unwrap()
            .get(commit)
            .cloned()
            .unwrap_or_else(|| vec!["src".to_string()]);

        // Replace the working tree like a forced checkout would
        if let Ok(entries) = std::fs::read_dir(dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() && entry.file_name() != ".git" {
                    std::fs::remove_dir_all(&path)?;
                }
            }
        }
        std::fs::create_dir_all(dir.join(".git"))?;
        for name in dirs {
            std::fs::create_dir_all(dir.join(name))?;
        }
        Ok(())
    }
}

// ── Scanner runtime ──────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockScanner {
    pub installs: AtomicUsize,
    pub runs: Mutex<Vec<ScannerProperties>>,
    pub cleanups: AtomicUsize,
    /// Revisions whose run reports `success == false`
    pub failing_revisions: Mutex<HashSet<String>>,
    pub spawn_failure: Mutex<bool>,
    pub run_delay: Mutex<Option<Duration>>,
}

impl MockScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failing_revision(self, revision: &str) -> Self {
        self.failing_revisions
            .lock()
            .unwrap()
            .insert(revision.to_string());
        self
    }

    pub fn with_spawn_failure(self) -> Self {
        *self.spawn_failure.lock().unwrap() = true;
        self
    }

    pub fn with_run_delay(self, delay: Duration) -> Self {
        *self.run_delay.lock().unwrap() = Some(delay);
        self
    }

    pub fn scanned_revisions(&self) -> Vec<String> {
        self.runs
            .lock()
            .unwrap()
            .iter()
            .filter_map(|p| p.get("sonar.scm.revision").map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl ScannerRuntime for MockScanner {
    async fn ensure_installed(&self, version: &str) -> Result<PathBuf, ScannerError> {
        self.installs.fetch_add(1, Ordering::SeqCst);
        Ok(PathBuf::from(format!("/opt/sonar-scanner-{}/bin/sonar-scanner", version)))
    }

    async fn run(
        &self,
        _executable: &Path,
        properties: &ScannerProperties,
        _dir: &Path,
    ) -> Result<ScanOutcome, ScannerError> {
        if *self.spawn_failure.lock().unwrap() {
            return Err(ScannerError::Initialization("java not found".to_string()));
        }
        self.runs.lock().unwrap().push(properties.clone());

        let delay = *self.run_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let revision = properties.get("sonar.scm.revision").unwrap_or_default();
        if self.failing_revisions.lock().unwrap().contains(revision) {
            return Ok(ScanOutcome::failed(
                Duration::from_millis(5),
                vec![format!("ERROR analysis of {} failed", revision)],
            ));
        }
        Ok(ScanOutcome::succeeded(Duration::from_millis(5)))
    }

    async fn cleanup(&self, _dir: &Path) -> Result<(), ScannerError> {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ── Branch scanner ───────────────────────────────────────────────────────────

/// Records concurrency and honours cancellation while "scanning"
#[derive(Default)]
pub struct RecordingBranchScanner {
    pub delay: Duration,
    pub failing_branches: HashSet<String>,
    /// Failures returned by the first N calls, then success
    pub transient_failures: AtomicUsize,
    pub transient_error: Option<ServiceError>,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub started: Mutex<Vec<String>>,
    pub completed: Mutex<Vec<String>>,
    pub cancelled: AtomicUsize,
    pub calls: AtomicUsize,
}

impl RecordingBranchScanner {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn failing(mut self, branches: &[&str]) -> Self {
        self.failing_branches = branches.iter().map(|b| b.to_string()).collect();
        self
    }

    pub fn transient(mut self, failures: usize, error: ServiceError) -> Self {
        self.transient_failures = AtomicUsize::new(failures);
        self.transient_error = Some(error);
        self
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().unwrap().clone()
    }
}

#[async_trait]
impl BranchScanner for RecordingBranchScanner {
    async fn scan_branch(
        &self,
        project: &ProjectRef,
        target: &ScanTarget,
        cancel: &CancellationToken,
    ) -> Result<BranchScanReport, ScanSyncError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = &self.transient_error {
            let remaining = self.transient_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.transient_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(ScanSyncError::analysis_service(error.clone()));
            }
        }

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        self.started.lock().unwrap().push(target.branch.clone());

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.cancelled.fetch_add(1, Ordering::SeqCst);
                Err(ScanSyncError::Cancelled)
            }
            _ = tokio::time::sleep(self.delay) => {
                if self.failing_branches.contains(&target.branch) {
                    Err(ScanSyncError::Scanner(ScannerError::Failed {
                        errors: vec![format!("branch {} is broken", target.branch)],
                    }))
                } else {
                    let mut report = BranchScanReport::new(project.key.clone(), target.branch.clone());
                    report.selected = vec![format!("{}-head", target.branch)];
                    report.scanned = report.selected.clone();
                    Ok(report)
                }
            }
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        if outcome.is_ok() {
            self.completed.lock().unwrap().push(target.branch.clone());
        }
        outcome
    }
}
