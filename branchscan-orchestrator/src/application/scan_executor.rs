//! Per-commit scan pipeline: checkout, source check, configure, run

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use branchscan_core::application::errors::ResultExt;
use branchscan_core::config::Config;
use branchscan_core::{ScanSyncError, ScannerError};

use crate::domain::{
    CommitScanResult, PROP_BRANCH, PROP_HOST_URL, PROP_PROJECT_KEY, PROP_REVISION, PROP_SOURCES,
    PROP_TOKEN, ProjectKey, ScanTarget, ScannerProperties, ScannerRuntime, SourceCheckout,
};

const VCS_METADATA_DIRS: [&str; 3] = [".git", ".hg", ".svn"];

/// Settings the executor needs from configuration
#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub host_url: String,
    pub token: String,
    pub scanner_version: String,
    pub disable_branch_analysis: bool,
    pub extra_properties: HashMap<String, String>,
    pub scan_timeout: Duration,
}

impl ScanSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            host_url: config.analysis.url.clone(),
            token: config.analysis.token.clone().unwrap_or_default(),
            scanner_version: config.scanner.version.clone(),
            disable_branch_analysis: config.analysis.disable_branch_analysis,
            extra_properties: config.scanner.extra_properties.clone(),
            scan_timeout: config.scanner.timeout(),
        }
    }
}

/// Whether `dir` has at least one top-level directory that is neither
/// hidden nor version-control metadata
pub async fn has_source_directories(dir: &Path) -> std::io::Result<bool> {
    let mut entries = tokio::fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') || VCS_METADATA_DIRS.contains(&name.as_ref()) {
            continue;
        }
        if entry.file_type().await?.is_dir() {
            return Ok(true);
        }
    }

    Ok(false)
}

pub struct ScanExecutor {
    checkout: Arc<dyn SourceCheckout>,
    scanner: Arc<dyn ScannerRuntime>,
    settings: ScanSettings,
    // Installed once per process; concurrent branches wait on the first install.
    executable: OnceCell<PathBuf>,
}

impl ScanExecutor {
    pub fn new(
        checkout: Arc<dyn SourceCheckout>,
        scanner: Arc<dyn ScannerRuntime>,
        settings: ScanSettings,
    ) -> Self {
        Self {
            checkout,
            scanner,
            settings,
            executable: OnceCell::new(),
        }
    }

    /// Check out `commit` into the target directory and analyze it.
    ///
    /// Every step is fail-fast. A tree without source directories is a
    /// successful skip.
    #[instrument(skip(self, target), fields(project = %project_key, branch = %target.branch))]
    pub async fn scan_commit(
        &self,
        project_key: &ProjectKey,
        target: &ScanTarget,
        commit: &str,
    ) -> Result<CommitScanResult, ScanSyncError> {
        self.run_pipeline(project_key, target, commit)
            .await
            .with_context(|| format!("failed to scan commit {}", commit))
    }

    async fn run_pipeline(
        &self,
        project_key: &ProjectKey,
        target: &ScanTarget,
        commit: &str,
    ) -> Result<CommitScanResult, ScanSyncError> {
        tokio::fs::create_dir_all(&target.source_dir).await?;

        self.checkout
            .checkout(&target.owner, &target.repository, commit, &target.source_dir)
            .await?;

        if !has_source_directories(&target.source_dir).await? {
            info!(commit, "No source directories in commit, skipping scan");
            return Ok(CommitScanResult::SkippedNoSources);
        }

        let properties = self.build_properties(project_key, target, commit);
        properties.validate()?;

        let executable = self
            .executable
            .get_or_try_init(|| self.scanner.ensure_installed(&self.settings.scanner_version))
            .await?;

        debug!(commit, properties = ?properties, "Running scanner");
        let run = tokio::time::timeout(
            self.settings.scan_timeout,
            self.scanner.run(executable, &properties, &target.source_dir),
        )
        .await;

        if let Err(e) = self.scanner.cleanup(&target.source_dir).await {
            warn!(error = %e, dir = %target.source_dir.display(), "Failed to clean scanner work files");
        }

        let outcome = match run {
            Ok(result) => result?,
            Err(_) => return Err(ScanSyncError::DeadlineExceeded(self.settings.scan_timeout)),
        };

        if !outcome.success {
            return Err(ScannerError::Failed {
                errors: outcome.errors,
            }
            .into());
        }

        info!(
            commit,
            duration_ms = outcome.duration.as_millis() as u64,
            "Commit scanned"
        );
        Ok(CommitScanResult::Scanned(outcome))
    }

    /// Required properties first, configured extras only where unset
    pub fn build_properties(
        &self,
        project_key: &ProjectKey,
        target: &ScanTarget,
        commit: &str,
    ) -> ScannerProperties {
        let mut properties = ScannerProperties::new();
        properties
            .set(PROP_PROJECT_KEY, project_key.as_str())
            .set(PROP_SOURCES, ".")
            .set(PROP_HOST_URL, self.settings.host_url.as_str())
            .set(PROP_TOKEN, self.settings.token.as_str())
            .set(PROP_REVISION, commit);

        if !self.settings.disable_branch_analysis {
            properties.set(PROP_BRANCH, target.branch.as_str());
        }

        for (key, value) in &self.settings.extra_properties {
            properties.set_default(key.as_str(), value.as_str());
        }

        properties
    }
}
