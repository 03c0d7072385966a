//! Orchestrator infrastructure layer

pub mod git;
pub mod github;
pub mod resilient;
pub mod scanner_cli;
pub mod sonar;

pub use git::*;
pub use github::{GitHubClient, GitHubClientConfig};
pub use resilient::{ResilientAnalysisService, ResilientSourceCheckout, ResilientVersionControlHost};
pub use scanner_cli::{ScannerCliConfig, SonarScannerCli};
pub use sonar::{SonarClient, SonarClientConfig};
