//! branchscan - wires the core and orchestrator crates into a CLI

mod app;
pub mod cli;

pub use app::AppContext;
pub use branchscan_core::{Config, init_tracing};

pub use branchscan_core;
pub use branchscan_orchestrator;
