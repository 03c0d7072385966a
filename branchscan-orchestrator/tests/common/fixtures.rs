//! Test data fixtures for branchscan-orchestrator

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use branchscan_core::config::{FailurePolicy, SyncConfig};
use branchscan_core::infrastructure::resilience::RetryPolicy;
use branchscan_orchestrator::application::{ProjectLayout, ScanSettings};
use branchscan_orchestrator::domain::ScanRequest;

pub const OWNER: &str = "acme";
pub const REPOSITORY: &str = "widgets";

pub fn scan_settings() -> ScanSettings {
    ScanSettings {
        host_url: "https://sonar.example.com".to_string(),
        token: "squ_test".to_string(),
        scanner_version: "6.2.1.4610".to_string(),
        disable_branch_analysis: false,
        extra_properties: HashMap::new(),
        scan_timeout: Duration::from_secs(60),
    }
}

pub fn layout(workspace_root: &Path) -> ProjectLayout {
    ProjectLayout::new("", workspace_root)
}

/// Exponential backoff starting at one second, as configured by default
pub fn retry_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        ..RetryPolicy::with_default_patterns()
    }
}

pub fn sync_config(max_concurrent_branches: usize, failure_policy: FailurePolicy) -> SyncConfig {
    SyncConfig {
        max_concurrent_branches,
        failure_policy,
        force_cleanup: false,
        admin_team: None,
    }
}

pub fn scan_request(project_path: &Path, branch: &str) -> ScanRequest {
    ScanRequest {
        project_key: format!("{}_{}_{}", OWNER, REPOSITORY, branch),
        project_name: format!("{}/{}", OWNER, REPOSITORY),
        project_path: project_path.to_path_buf(),
        branch_name: branch.to_string(),
        owner: OWNER.to_string(),
        repository: REPOSITORY.to_string(),
        ..ScanRequest::default()
    }
}
