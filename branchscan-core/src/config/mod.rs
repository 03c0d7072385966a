//! Configuration management

pub mod validation;

pub use validation::{Validate, ValidationError};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::infrastructure::resilience::{CircuitBreakerConfig, RetryPolicy};

/// Circuit breaker configuration (serializable version)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfigSerializable {
    /// Number of consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Number of consecutive half-open successes before closing it again
    pub success_threshold: u32,
    /// Duration to wait before transitioning from Open to HalfOpen (in seconds)
    pub recovery_timeout_seconds: u64,
}

impl Default for CircuitBreakerConfigSerializable {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            recovery_timeout_seconds: 60,
        }
    }
}

impl CircuitBreakerConfigSerializable {
    /// Convert to the runtime CircuitBreakerConfig
    pub fn to_circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            recovery_timeout: Duration::from_secs(self.recovery_timeout_seconds),
        }
    }
}

/// Retry configuration (serializable version)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfigSerializable {
    /// Maximum number of retries after the first attempt
    pub max_attempts: u32,
    /// Initial delay between retries (in milliseconds)
    pub initial_delay_ms: u64,
    /// Maximum delay between retries (in milliseconds)
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfigSerializable {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfigSerializable {
    /// Convert to the runtime RetryPolicy
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_multiplier: self.backoff_multiplier,
            retryable_patterns: Vec::new(),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub vcs: VcsConfig,
    pub analysis: AnalysisConfig,
    pub scanner: ScannerConfig,
    pub workspace: WorkspaceConfig,
    pub sync: SyncConfig,
    pub selection: SelectionConfig,
    pub requests: RequestsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
    /// One of `json`, `pretty` or `compact`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// Version-control host (GitHub REST API) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VcsConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout_seconds: u64,
    pub per_page: u32,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfigSerializable,
    #[serde(default)]
    pub retry: RetryConfigSerializable,
}

impl Default for VcsConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.github.com".to_string(),
            token: None,
            timeout_seconds: 30,
            per_page: 100,
            circuit_breaker: CircuitBreakerConfigSerializable::default(),
            retry: RetryConfigSerializable::default(),
        }
    }
}

impl VcsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Analysis service (SonarQube Web API) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub url: String,
    pub token: Option<String>,
    /// Prepended to every derived project key
    pub project_prefix: String,
    /// Site-wide switch for servers without branch analysis support
    pub disable_branch_analysis: bool,
    pub timeout_seconds: u64,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfigSerializable,
    #[serde(default)]
    pub retry: RetryConfigSerializable,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9000".to_string(),
            token: None,
            project_prefix: String::new(),
            disable_branch_analysis: false,
            timeout_seconds: 30,
            circuit_breaker: CircuitBreakerConfigSerializable::default(),
            retry: RetryConfigSerializable {
                initial_delay_ms: 2000, // analysis server background tasks are slow to recover
                ..RetryConfigSerializable::default()
            },
        }
    }
}

impl AnalysisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Scan tool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub version: String,
    /// Where downloaded scanner distributions are unpacked
    pub cache_dir: PathBuf,
    pub download_base_url: String,
    pub auto_download: bool,
    /// Use an existing scanner executable instead of the cached distribution
    pub binary_path: Option<PathBuf>,
    /// Extra analysis properties; never override the required ones
    pub extra_properties: HashMap<String, String>,
    pub timeout_seconds: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            version: "6.2.1.4610".to_string(),
            cache_dir: std::env::temp_dir().join("branchscan").join("scanner"),
            download_base_url: "https://binaries.sonarsource.com/Distribution/sonar-scanner-cli"
                .to_string(),
            auto_download: true,
            binary_path: None,
            extra_properties: HashMap::new(),
            timeout_seconds: 1800,
        }
    }
}

impl ScannerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Working-tree configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Parent directory of every per-branch checkout
    pub root: PathBuf,
    /// Remote URL prefix; `{clone_base_url}/{owner}/{repository}.git`
    pub clone_base_url: String,
    pub fetch_timeout_seconds: u64,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: std::env::temp_dir().join("branchscan").join("work"),
            clone_base_url: "https://github.com".to_string(),
            fetch_timeout_seconds: 600,
        }
    }
}

impl WorkspaceConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_seconds)
    }
}

/// What repository synchronization does when one branch fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop every in-flight branch and return the first error
    #[default]
    FailFast,
    /// Process every branch and report all failures together
    BestEffort,
}

/// Repository synchronization configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub max_concurrent_branches: usize,
    pub failure_policy: FailurePolicy,
    /// Delete orphaned projects instead of only reporting them
    pub force_cleanup: bool,
    /// Team slug whose members become project administrators
    pub admin_team: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_branches: 10,
            failure_policy: FailurePolicy::FailFast,
            force_cleanup: false,
            admin_team: None,
        }
    }
}

/// How candidate commits are derived for a branch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// First and last commit of the branch range
    #[default]
    Endpoints,
    /// Every commit between the base and the branch head
    FullRange,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub strategy: SelectionStrategy,
}

/// Request-level retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestsConfig {
    #[serde(default)]
    pub retry: RetryConfigSerializable,
    /// Message substrings treated as transient in addition to typed retryability
    pub retryable_patterns: Vec<String>,
    pub quality_gate_check: bool,
}

impl Default for RequestsConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfigSerializable::default(),
            retryable_patterns: crate::infrastructure::resilience::DEFAULT_RETRYABLE_PATTERNS
                .iter()
                .map(|p| (*p).to_string())
                .collect(),
            quality_gate_check: true,
        }
    }
}

impl RequestsConfig {
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retryable_patterns: self.retryable_patterns.clone(),
            ..self.retry.to_retry_policy()
        }
    }
}

impl Validate for Config {
    fn validate(&self) -> Result<(), ValidationError> {
        self.logging.validate()?;
        self.vcs.validate()?;
        self.analysis.validate()?;
        self.scanner.validate()?;
        self.workspace.validate()?;
        self.sync.validate()?;
        self.requests.validate()?;
        Ok(())
    }
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigLoadError> {
        Self::load_from(None)
    }

    /// Load configuration, layering an explicit file above the defaults
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigLoadError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false));

        // Add environment-specific config if ENV is set
        if let Ok(env) = std::env::var("ENV") {
            builder = builder
                .add_source(config::File::with_name(&format!("config/{}", env)).required(false));
        }

        builder = builder.add_source(config::File::with_name("config/local").required(false));

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        // Environment variables last (highest priority)
        builder = builder.add_source(
            config::Environment::with_prefix("BRANCHSCAN")
                .prefix_separator("__")
                .separator("__"),
        );

        let mut config: Config = builder.build()?.try_deserialize()?;

        // Conventional token variables used by CI runners
        if config.vcs.token.is_none()
            && let Ok(token) = std::env::var("GITHUB_TOKEN")
        {
            config.vcs.token = Some(token);
        }
        if config.analysis.token.is_none()
            && let Ok(token) = std::env::var("SONAR_TOKEN")
        {
            config.analysis.token = Some(token);
        }

        config.validate()?;

        Ok(config)
    }
}

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("Configuration file error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Configuration validation error: {0}")]
    Validation(#[from] ValidationError),
}
