mod service;

pub use service::{GitService, GitServiceConfig, GitServiceError};
