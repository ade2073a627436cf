//! Configuration models for the orchestrator.

pub mod orchestrator;

pub use orchestrator::{parse_resources, OrchestratorConfig, RetryConfig};
