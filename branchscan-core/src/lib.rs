//! branchscan core - shared foundation for the branchscan workspace
//!
//! # Modules
//!
//! - [`config`] - Layered configuration from files and `BRANCHSCAN__` environment variables
//! - [`application`] - Error taxonomy shared by every crate
//! - [`infrastructure`] - Circuit breaker and retry primitives
//! - [`logging`] - Structured logging with tracing
//!
//! # Configuration
//!
//! ```rust,ignore
//! use branchscan_core::Config;
//!
//! let config = Config::load()?;
//! ```
//!
//! Environment variables use the `BRANCHSCAN__` prefix with double underscore separators:
//!
//! ```bash
//! BRANCHSCAN__SYNC__MAX_CONCURRENT_BRANCHES=4
//! BRANCHSCAN__ANALYSIS__URL=https://sonar.example.com
//! ```

pub mod application;
pub mod config;
pub mod infrastructure;
pub mod logging;

pub use application::errors::{ErrorKind, ResultExt, ScanSyncError, ScannerError, ServiceError};
pub use config::Config;
pub use logging::init_tracing;
