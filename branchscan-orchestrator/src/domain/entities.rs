//! Orchestrator domain entities

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::value_objects::{ProjectKey, ScanStatus};

/// Scope of one branch scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanTarget {
    pub owner: String,
    pub repository: String,
    pub branch: String,
    /// Scan only this commit instead of the branch range
    pub commit: Option<String>,
    /// Working tree the commits are checked out into
    pub source_dir: PathBuf,
}

impl ScanTarget {
    pub fn new(
        owner: impl Into<String>,
        repository: impl Into<String>,
        branch: impl Into<String>,
        source_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            owner: owner.into(),
            repository: repository.into(),
            branch: branch.into(),
            commit: None,
            source_dir: source_dir.into(),
        }
    }

    pub fn with_commit(mut self, commit: impl Into<String>) -> Self {
        self.commit = Some(commit.into());
        self
    }
}

/// Analysis project a branch reports into
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRef {
    pub key: ProjectKey,
    pub name: String,
}

impl ProjectRef {
    pub fn new(key: ProjectKey, name: impl Into<String>) -> Self {
        Self {
            key,
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    pub sha: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub head_ref: String,
    pub head_sha: String,
    pub base_ref: String,
}

/// Project as known to the analysis service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisProject {
    pub key: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectMetadataUpdate {
    pub description: String,
    pub tags: Vec<String>,
}

/// Completed analysis already recorded for a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub key: String,
    /// Commit the analysis ran against; absent for analyses without SCM data
    pub revision: Option<String>,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueSummary {
    pub total: u64,
    pub by_severity: BTreeMap<String, u64>,
}

/// Result reported by the scan tool for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanOutcome {
    pub success: bool,
    pub duration: Duration,
    pub errors: Vec<String>,
}

impl ScanOutcome {
    pub fn succeeded(duration: Duration) -> Self {
        Self {
            success: true,
            duration,
            errors: Vec::new(),
        }
    }

    pub fn failed(duration: Duration, errors: Vec<String>) -> Self {
        Self {
            success: false,
            duration,
            errors,
        }
    }
}

/// What happened to one commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CommitScanResult {
    Scanned(ScanOutcome),
    /// The working tree held no source directories
    SkippedNoSources,
}

/// Per-branch result of a branch scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchScanReport {
    pub project_key: ProjectKey,
    pub branch: String,
    /// Commits the selector returned, in scan order
    pub selected: Vec<String>,
    pub scanned: Vec<String>,
    pub skipped: Vec<String>,
    /// Total time the scan tool ran across `scanned`
    pub scan_duration: Duration,
}

impl BranchScanReport {
    pub fn new(project_key: ProjectKey, branch: impl Into<String>) -> Self {
        Self {
            project_key,
            branch: branch.into(),
            selected: Vec::new(),
            scanned: Vec::new(),
            skipped: Vec::new(),
            scan_duration: Duration::ZERO,
        }
    }

    pub fn record(&mut self, commit: &str, result: &CommitScanResult) {
        match result {
            CommitScanResult::Scanned(outcome) => {
                self.scanned.push(commit.to_string());
                self.scan_duration += outcome.duration;
            }
            CommitScanResult::SkippedNoSources => self.skipped.push(commit.to_string()),
        }
    }

    /// Nothing left to scan
    pub fn is_up_to_date(&self) -> bool {
        self.selected.is_empty()
    }
}

/// Result of synchronizing every branch of a repository
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub owner: String,
    pub repository: String,
    pub branches: usize,
    /// Branches that got a fresh project and a full scan
    pub scanned: Vec<String>,
    /// Branches whose existing project had its metadata refreshed
    pub refreshed: Vec<String>,
    /// Orphaned project keys found during cleanup
    pub stale_projects: Vec<String>,
    /// Orphaned project keys actually deleted
    pub deleted_projects: Vec<String>,
}

/// Externally submitted branch scan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRequest {
    pub project_key: String,
    pub project_name: String,
    pub project_path: PathBuf,
    pub branch_name: String,
    pub owner: String,
    pub repository: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub options: Option<ScanOptions>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    pub skip_validation: bool,
    /// Overrides the default number of retries
    pub max_retries: Option<u32>,
    /// Scan only this commit
    pub commit: Option<String>,
    /// Overrides the configured quality gate check
    pub quality_gate_check: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchMetadata {
    pub name: String,
    pub owner: String,
    pub repository: String,
    pub project_key: String,
    pub commit: Option<String>,
}

/// Structured answer to a [`ScanRequest`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResponse {
    pub scan_id: String,
    pub status: ScanStatus,
    pub branch: BranchMetadata,
    /// Aggregate scan tool result; absent when no scan ran
    pub outcome: Option<ScanOutcome>,
    pub report: Option<BranchScanReport>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub duration: Duration,
    pub timestamp: DateTime<Utc>,
}

impl ScanResponse {
    pub fn is_success(&self) -> bool {
        self.status == ScanStatus::Completed
    }
}
