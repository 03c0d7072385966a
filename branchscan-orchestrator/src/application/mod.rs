//! Orchestrator application layer - use cases

pub mod branch_scan;
pub mod commit_selector;
pub mod repository_sync;
pub mod scan_executor;
pub mod scan_request;

pub use branch_scan::{BranchScanOrchestrator, ProjectLayout};
pub use commit_selector::{CommitSelector, ensure_project, filter_analyzed};
pub use repository_sync::{CleanupReport, RepositorySynchronizer};
pub use scan_executor::{ScanExecutor, ScanSettings, has_source_directories};
pub use scan_request::{ScanRequestOrchestrator, validate_branch, validate_request};
