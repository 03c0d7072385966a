//! Configuration validation module

use crate::config::{
    AnalysisConfig, CircuitBreakerConfigSerializable, LoggingConfig, RequestsConfig,
    RetryConfigSerializable, ScannerConfig, SyncConfig, VcsConfig, WorkspaceConfig,
};

/// Trait for validating configuration sections
pub trait Validate {
    fn validate(&self) -> Result<(), ValidationError>;
}

/// Configuration validation error
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Logging configuration error: {message}")]
    Logging { message: String },

    #[error("Version control configuration error: {message}")]
    Vcs { message: String },

    #[error("Analysis service configuration error: {message}")]
    Analysis { message: String },

    #[error("Scanner configuration error: {message}")]
    Scanner { message: String },

    #[error("Workspace configuration error: {message}")]
    Workspace { message: String },

    #[error("Sync configuration error: {message}")]
    Sync { message: String },

    #[error("Request configuration error: {message}")]
    Requests { message: String },
}

impl ValidationError {
    pub fn logging(message: impl Into<String>) -> Self {
        Self::Logging {
            message: message.into(),
        }
    }

    pub fn vcs(message: impl Into<String>) -> Self {
        Self::Vcs {
            message: message.into(),
        }
    }

    pub fn analysis(message: impl Into<String>) -> Self {
        Self::Analysis {
            message: message.into(),
        }
    }

    pub fn scanner(message: impl Into<String>) -> Self {
        Self::Scanner {
            message: message.into(),
        }
    }

    pub fn workspace(message: impl Into<String>) -> Self {
        Self::Workspace {
            message: message.into(),
        }
    }

    pub fn sync(message: impl Into<String>) -> Self {
        Self::Sync {
            message: message.into(),
        }
    }

    pub fn requests(message: impl Into<String>) -> Self {
        Self::Requests {
            message: message.into(),
        }
    }
}

fn check_http_url(name: &str, url: &str) -> Result<(), String> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(format!(
            "{} must start with http:// or https://, got: {}",
            name, url
        ));
    }
    Ok(())
}

fn check_retry(retry: &RetryConfigSerializable) -> Result<(), String> {
    if retry.backoff_multiplier < 1.0 || !retry.backoff_multiplier.is_finite() {
        return Err(format!(
            "backoff_multiplier must be a finite value >= 1.0, got {}",
            retry.backoff_multiplier
        ));
    }
    if retry.initial_delay_ms > retry.max_delay_ms {
        return Err(format!(
            "initial_delay_ms ({}) cannot exceed max_delay_ms ({})",
            retry.initial_delay_ms, retry.max_delay_ms
        ));
    }
    Ok(())
}

fn check_circuit_breaker(breaker: &CircuitBreakerConfigSerializable) -> Result<(), String> {
    if breaker.failure_threshold == 0 {
        return Err("circuit_breaker.failure_threshold must be greater than 0".to_string());
    }
    if breaker.success_threshold == 0 {
        return Err("circuit_breaker.success_threshold must be greater than 0".to_string());
    }
    Ok(())
}

impl Validate for LoggingConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        match self.format.as_str() {
            "json" | "pretty" | "compact" => {}
            other => {
                return Err(ValidationError::logging(format!(
                    "format must be one of json, pretty, compact; got: {}",
                    other
                )));
            }
        }

        if self.level.trim().is_empty() {
            return Err(ValidationError::logging("level cannot be empty"));
        }

        Ok(())
    }
}

impl Validate for VcsConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        check_http_url("base_url", &self.base_url).map_err(ValidationError::vcs)?;

        if self.timeout_seconds == 0 {
            return Err(ValidationError::vcs(
                "timeout must be greater than 0 seconds",
            ));
        }

        // GitHub caps page size at 100
        if self.per_page == 0 || self.per_page > 100 {
            return Err(ValidationError::vcs(format!(
                "per_page must be in range 1-100, got {}",
                self.per_page
            )));
        }

        check_circuit_breaker(&self.circuit_breaker).map_err(ValidationError::vcs)?;
        check_retry(&self.retry).map_err(ValidationError::vcs)?;

        Ok(())
    }
}

impl Validate for AnalysisConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        check_http_url("url", &self.url).map_err(ValidationError::analysis)?;

        if self.timeout_seconds == 0 {
            return Err(ValidationError::analysis(
                "timeout must be greater than 0 seconds",
            ));
        }

        if let Some(bad) = self
            .project_prefix
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':')))
        {
            return Err(ValidationError::analysis(format!(
                "project_prefix contains invalid character '{}'",
                bad
            )));
        }

        check_circuit_breaker(&self.circuit_breaker).map_err(ValidationError::analysis)?;
        check_retry(&self.retry).map_err(ValidationError::analysis)?;

        Ok(())
    }
}

impl Validate for ScannerConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.binary_path.is_none() && self.version.trim().is_empty() {
            return Err(ValidationError::scanner(
                "version is required unless binary_path is set",
            ));
        }

        if self.auto_download {
            check_http_url("download_base_url", &self.download_base_url)
                .map_err(ValidationError::scanner)?;
        }

        if self.timeout_seconds == 0 {
            return Err(ValidationError::scanner(
                "timeout must be greater than 0 seconds",
            ));
        }

        Ok(())
    }
}

impl Validate for WorkspaceConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.root.as_os_str().is_empty() {
            return Err(ValidationError::workspace("root cannot be empty"));
        }

        if self.clone_base_url.trim().is_empty() {
            return Err(ValidationError::workspace("clone_base_url cannot be empty"));
        }

        if self.fetch_timeout_seconds == 0 {
            return Err(ValidationError::workspace(
                "fetch_timeout must be greater than 0 seconds",
            ));
        }

        Ok(())
    }
}

impl Validate for SyncConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.max_concurrent_branches == 0 {
            return Err(ValidationError::sync(
                "max_concurrent_branches must be greater than 0",
            ));
        }

        if let Some(team) = &self.admin_team
            && team.trim().is_empty()
        {
            return Err(ValidationError::sync("admin_team cannot be blank when set"));
        }

        Ok(())
    }
}

impl Validate for RequestsConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        check_retry(&self.retry).map_err(ValidationError::requests)?;

        if self.retryable_patterns.iter().any(|p| p.trim().is_empty()) {
            return Err(ValidationError::requests(
                "retryable_patterns cannot contain blank entries",
            ));
        }

        Ok(())
    }
}
