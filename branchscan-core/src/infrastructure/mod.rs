//! Infrastructure Layer - Resilience primitives for external calls

pub mod resilience;

pub use resilience::*;
