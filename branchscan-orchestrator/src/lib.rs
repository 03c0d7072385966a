//! branchscan orchestrator - keeps per-branch analysis projects in sync with a repository
//!
//! This crate decides which commits of a branch still need analysis, runs the
//! scan tool against each of them, and synchronizes every branch of a
//! repository under a bounded concurrency gate.
//!
//! # Features
//!
//! - **Commit selection** - Candidate commits minus revisions the analysis service already recorded
//! - **Scan execution** - Checkout, source detection, scanner properties and run per commit
//! - **Repository sync** - One unit per branch behind a semaphore, fail-fast or best-effort
//! - **Scan requests** - Validated, retried branch scans with a quality gate check
//! - **Resilience** - Circuit breaker and backoff around every remote collaborator
//!
//! # Architecture
//!
//! ```text
//! branchscan-orchestrator/
//! ├── application/      # Use cases
//! │   ├── commit_selector.rs
//! │   ├── scan_executor.rs
//! │   ├── branch_scan.rs
//! │   ├── repository_sync.rs
//! │   └── scan_request.rs
//! ├── infrastructure/   # External integrations
//! │   ├── git/          # libgit2 checkouts
//! │   ├── github.rs     # Version-control host client
//! │   ├── sonar.rs      # Analysis service client
//! │   ├── scanner_cli.rs
//! │   └── resilient.rs  # Breaker + retry decorators
//! └── domain/           # Entities, value objects, collaborator traits
//! ```

pub mod application;
pub mod domain;
pub mod infrastructure;
