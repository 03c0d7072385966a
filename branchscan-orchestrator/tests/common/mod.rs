//! Shared doubles and builders for orchestrator integration tests
#![allow(dead_code)]

pub mod fixtures;
pub mod mocks;
