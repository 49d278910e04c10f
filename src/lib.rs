//! agent-bench: benchmark harness for AI agents.
//!
//! Runs a fixture of prompts against an agent under test for a configured
//! number of iterations, scores every transcript and aggregates per-prompt
//! statistics.

pub mod cli;
pub mod error;
pub mod fixture;
pub mod runner;

// Re-export commonly used types
pub use error::{
    AgentInvocationError, ConfigValidationError, FixtureLoadError, RunnerError, ScoringError,
};
pub use fixture::{Fixture, PromptSpec};
pub use runner::{RunConfig, RunContext, Runner, RunnerResult};
