//! Application setup and wiring

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use branchscan_core::Config;
use branchscan_core::infrastructure::resilience::ResilienceExecutor;
use branchscan_orchestrator::application::{
    BranchScanOrchestrator, CommitSelector, ProjectLayout, RepositorySynchronizer, ScanExecutor,
    ScanRequestOrchestrator, ScanSettings,
};
use branchscan_orchestrator::domain::{AnalysisService, SourceCheckout, VersionControlHost};
use branchscan_orchestrator::infrastructure::{
    GitHubClient, GitHubClientConfig, GitService, GitServiceConfig, ResilientAnalysisService,
    ResilientSourceCheckout, ResilientVersionControlHost, ScannerCliConfig, SonarClient,
    SonarClientConfig, SonarScannerCli,
};

/// Fully wired services for one process.
///
/// Every external call goes through a resilience executor that observes
/// `shutdown_token`, so cancelling it stops retries and in-flight work.
pub struct AppContext {
    pub config: Arc<Config>,
    pub branch_scanner: Arc<BranchScanOrchestrator>,
    pub requests: ScanRequestOrchestrator,
    pub synchronizer: RepositorySynchronizer,
    pub shutdown_token: CancellationToken,
}

impl AppContext {
    pub fn build(config: Config, shutdown_token: CancellationToken) -> Result<Self> {
        let startup_time = Instant::now();

        let vcs_executor = Arc::new(ResilienceExecutor::new(
            "github",
            config.vcs.circuit_breaker.to_circuit_breaker_config(),
            config.vcs.retry.to_retry_policy(),
        ));
        let git_executor = Arc::new(ResilienceExecutor::new(
            "git",
            config.vcs.circuit_breaker.to_circuit_breaker_config(),
            config.vcs.retry.to_retry_policy(),
        ));
        let analysis_executor = Arc::new(ResilienceExecutor::new(
            "sonarqube",
            config.analysis.circuit_breaker.to_circuit_breaker_config(),
            config.analysis.retry.to_retry_policy(),
        ));

        let github = GitHubClient::new(GitHubClientConfig::from_config(&config.vcs))
            .context("Failed to create GitHub client")?;
        let vcs: Arc<dyn VersionControlHost> = Arc::new(ResilientVersionControlHost::new(
            Arc::new(github),
            vcs_executor,
            shutdown_token.clone(),
        ));

        let sonar = SonarClient::new(SonarClientConfig::from_config(&config.analysis))
            .context("Failed to create analysis service client")?;
        let analysis: Arc<dyn AnalysisService> = Arc::new(ResilientAnalysisService::new(
            Arc::new(sonar),
            analysis_executor,
            shutdown_token.clone(),
        ));

        let git = GitService::new(GitServiceConfig::from_config(&config.workspace, &config.vcs));
        let checkout: Arc<dyn SourceCheckout> = Arc::new(ResilientSourceCheckout::new(
            Arc::new(git),
            git_executor,
            shutdown_token.clone(),
        ));

        let scanner_runtime = SonarScannerCli::new(ScannerCliConfig::from_config(&config.scanner))
            .context("Failed to create scanner runtime")?;

        let selector = Arc::new(
            CommitSelector::new(vcs.clone(), analysis.clone())
                .with_strategy(config.selection.strategy),
        );
        let executor = Arc::new(ScanExecutor::new(
            checkout,
            Arc::new(scanner_runtime),
            ScanSettings::from_config(&config),
        ));
        let layout = ProjectLayout::new(
            config.analysis.project_prefix.clone(),
            config.workspace.root.clone(),
        );

        let branch_scanner = Arc::new(BranchScanOrchestrator::new(
            selector,
            executor,
            vcs.clone(),
            layout.clone(),
        ));

        let requests = ScanRequestOrchestrator::new(
            branch_scanner.clone(),
            analysis.clone(),
            config.requests.to_retry_policy(),
            config.requests.quality_gate_check,
        );

        let synchronizer = RepositorySynchronizer::new(
            vcs,
            analysis,
            branch_scanner.clone(),
            layout,
            config.sync.clone(),
        );

        tracing::debug!(
            elapsed_ms = startup_time.elapsed().as_millis() as u64,
            workspace = %config.workspace.root.display(),
            analysis_url = %config.analysis.url,
            "Application wired"
        );

        Ok(Self {
            config: Arc::new(config),
            branch_scanner,
            requests,
            synchronizer,
            shutdown_token,
        })
    }
}
