//! Error taxonomy shared by every branchscan crate
//!
//! Retryability is a property of the error kind rather than of its message.
//! Callers that need the legacy substring behaviour can layer patterns on top
//! through [`crate::infrastructure::resilience::RetryPolicy`].

use std::fmt;
use std::time::Duration;

/// Errors returned by the version-control host or the analysis service clients
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Rate limited by remote service")]
    RateLimited,

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ServiceError {
    /// Check if retrying the same call may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Network(_)
            | ServiceError::Timeout { .. }
            | ServiceError::ServiceUnavailable(_)
            | ServiceError::RateLimited => true,
            ServiceError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Map an HTTP status and body to the matching variant
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => ServiceError::Authentication(message),
            404 => ServiceError::NotFound(message),
            409 => ServiceError::AlreadyExists(message),
            429 => ServiceError::RateLimited,
            503 => ServiceError::ServiceUnavailable(message),
            _ => ServiceError::Http { status, message },
        }
    }
}

/// Errors raised while preparing or running the scan tool
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScannerError {
    #[error("Scanner installation failed: {0}")]
    Installation(String),

    #[error("Invalid scanner configuration: {0}")]
    Configuration(String),

    #[error("Scanner initialization failed: {0}")]
    Initialization(String),

    #[error("Scanner execution failed: {0}")]
    Execution(String),

    #[error("Scan reported failure: {}", .errors.join("; "))]
    Failed { errors: Vec<String> },
}

/// A required request field was blank or malformed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {reason}")]
pub struct RequestValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl RequestValidationError {
    pub fn missing(field: &'static str) -> Self {
        Self {
            field,
            reason: "is required".to_string(),
        }
    }

    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Coarse classification of a [`ScanSyncError`], looking through wrappers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    VersionControl,
    AnalysisService,
    Scanner,
    Checkout,
    Io,
    CircuitOpen,
    DeadlineExceeded,
    Cancelled,
    Internal,
    Aggregate,
}

/// One failed unit inside an aggregated error
#[derive(Debug)]
pub struct UnitFailure {
    pub unit: String,
    pub error: ScanSyncError,
}

impl fmt::Display for UnitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.unit, self.error)
    }
}

/// Top-level error for orchestration operations
#[derive(Debug, thiserror::Error)]
pub enum ScanSyncError {
    #[error("Validation error: {0}")]
    Validation(#[from] RequestValidationError),

    #[error("Version control host error: {0}")]
    VersionControl(ServiceError),

    #[error("Analysis service error: {0}")]
    AnalysisService(ServiceError),

    #[error("{0}")]
    Scanner(#[from] ScannerError),

    #[error("Checkout failed: {0}")]
    Checkout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Circuit breaker open for {circuit}: service unavailable")]
    CircuitOpen { circuit: String },

    #[error("Deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Retries exhausted after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<ScanSyncError>,
    },

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<ScanSyncError>,
    },

    #[error("{} unit(s) failed: {}", .0.len(), join_failures(.0))]
    Aggregate(Vec<UnitFailure>),
}

fn join_failures(failures: &[UnitFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ScanSyncError {
    pub fn version_control(error: ServiceError) -> Self {
        Self::VersionControl(error)
    }

    pub fn analysis_service(error: ServiceError) -> Self {
        Self::AnalysisService(error)
    }

    pub fn checkout(message: impl Into<String>) -> Self {
        Self::Checkout(message.into())
    }

    /// Wrap this error with operation context
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping context and retry wrappers
    pub fn root(&self) -> &ScanSyncError {
        match self {
            Self::Context { source, .. } | Self::RetriesExhausted { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            Self::Validation(_) => ErrorKind::Validation,
            Self::VersionControl(_) => ErrorKind::VersionControl,
            Self::AnalysisService(_) => ErrorKind::AnalysisService,
            Self::Scanner(_) => ErrorKind::Scanner,
            Self::Checkout(_) => ErrorKind::Checkout,
            Self::Io(_) => ErrorKind::Io,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::DeadlineExceeded(_) => ErrorKind::DeadlineExceeded,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Internal(_) => ErrorKind::Internal,
            Self::Aggregate(_) => ErrorKind::Aggregate,
            Self::Context { .. } | Self::RetriesExhausted { .. } => {
                unreachable!("root() never returns a wrapper")
            }
        }
    }

    /// Whether the failure is transient.
    ///
    /// Circuit rejections count as transient here: a later attempt may find
    /// the breaker half-open. The resilience executor itself never retries
    /// them within one call.
    pub fn is_retryable(&self) -> bool {
        match self.root() {
            Self::VersionControl(e) | Self::AnalysisService(e) => e.is_retryable(),
            Self::CircuitOpen { .. } | Self::DeadlineExceeded(_) => true,
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Self::Cancelled)
    }
}

/// Attach context to fallible results, mirroring `anyhow::Context`
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T, ScanSyncError>;

    fn with_context<C, F>(self, f: F) -> Result<T, ScanSyncError>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<ScanSyncError>,
{
    fn context(self, context: impl Into<String>) -> Result<T, ScanSyncError> {
        self.map_err(|e| e.into().context(context))
    }

    fn with_context<C, F>(self, f: F) -> Result<T, ScanSyncError>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|e| e.into().context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_error_retryability() {
        assert!(ServiceError::Network("connection refused".into()).is_retryable());
        assert!(ServiceError::Timeout { seconds: 30 }.is_retryable());
        assert!(ServiceError::RateLimited.is_retryable());
        assert!(ServiceError::from_status(502, "Bad Gateway").is_retryable());
        assert!(ServiceError::from_status(503, "down").is_retryable());

        assert!(!ServiceError::from_status(400, "Bad Request").is_retryable());
        assert!(!ServiceError::from_status(401, "Unauthorized").is_retryable());
        assert!(!ServiceError::from_status(404, "missing").is_retryable());
        assert!(!ServiceError::AlreadyExists("proj".into()).is_retryable());
    }

    #[test]
    fn test_from_status_mapping() {
        assert_eq!(
            ServiceError::from_status(404, "gone"),
            ServiceError::NotFound("gone".into())
        );
        assert_eq!(ServiceError::from_status(429, ""), ServiceError::RateLimited);
        assert_eq!(
            ServiceError::from_status(500, "boom"),
            ServiceError::Http {
                status: 500,
                message: "boom".into()
            }
        );
    }

    #[test]
    fn test_context_wraps_and_preserves_kind() {
        let err = ScanSyncError::version_control(ServiceError::Timeout { seconds: 5 })
            .context("failed to scan commit abc123");

        assert_eq!(
            err.to_string(),
            "failed to scan commit abc123: Version control host error: Request timed out after 5s"
        );
        assert_eq!(err.kind(), ErrorKind::VersionControl);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_retries_exhausted_names_attempts() {
        let err = ScanSyncError::RetriesExhausted {
            attempts: 4,
            source: Box::new(ScanSyncError::analysis_service(
                ServiceError::ServiceUnavailable("maintenance".into()),
            )),
        };

        assert!(err.to_string().contains("after 4 attempts"));
        assert_eq!(err.kind(), ErrorKind::AnalysisService);
    }

    #[test]
    fn test_validation_and_scanner_errors_are_not_retryable() {
        let err: ScanSyncError = RequestValidationError::missing("branch_name").into();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(!err.is_retryable());

        let err: ScanSyncError = ScannerError::Failed {
            errors: vec!["quality profile missing".into()],
        }
        .into();
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "Scan reported failure: quality profile missing");
    }

    #[test]
    fn test_circuit_open_message_mentions_unavailability() {
        let err = ScanSyncError::CircuitOpen {
            circuit: "analysis".into(),
        };
        assert!(err.to_string().contains("service unavailable"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_aggregate_lists_every_failure() {
        let err = ScanSyncError::Aggregate(vec![
            UnitFailure {
                unit: "main".into(),
                error: ScanSyncError::Cancelled,
            },
            UnitFailure {
                unit: "develop".into(),
                error: ScanSyncError::checkout("dirty tree"),
            },
        ]);

        let message = err.to_string();
        assert!(message.starts_with("2 unit(s) failed"));
        assert!(message.contains("main: Operation cancelled"));
        assert!(message.contains("develop: Checkout failed: dirty tree"));
    }

    #[test]
    fn test_result_ext_context() {
        let result: Result<(), ServiceErrorWrapper> = Err(ServiceErrorWrapper);
        let err = result.context("listing branches").unwrap_err();
        assert!(err.to_string().starts_with("listing branches: "));
    }

    struct ServiceErrorWrapper;

    impl From<ServiceErrorWrapper> for ScanSyncError {
        fn from(_: ServiceErrorWrapper) -> Self {
            ScanSyncError::version_control(ServiceError::RateLimited)
        }
    }
}
