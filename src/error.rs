//! Error types for agent-bench operations.
//!
//! Only [`ConfigValidationError`] and [`FixtureLoadError`] are fatal: both are
//! raised before any task is dispatched. Everything that goes wrong after
//! dispatch starts ([`AgentInvocationError`], [`ScoringError`], cancellation)
//! is folded into a `FAIL` iteration result instead of being propagated.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while validating a run configuration.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigValidationError {
    #[error("iterations must be at least 1, got {0}")]
    InvalidIterations(u32),

    #[error("concurrency must be at least 1, got {0}")]
    InvalidConcurrency(usize),

    #[error("per-iteration timeout must be greater than zero")]
    ZeroTimeout,

    #[error("fixture reference is empty")]
    MissingFixture,

    #[error("success threshold must be a finite value in (0.0, 1.0], got {0}")]
    InvalidThreshold(f64),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors raised by a fixture loader.
#[derive(Debug, Error)]
pub enum FixtureLoadError {
    #[error("Fixture not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to parse fixture '{path}': {message}")]
    Parse { path: String, message: String },

    #[error("Invalid fixture: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FixtureLoadError {
    /// Returns true for the `NotFound` kind.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FixtureLoadError::NotFound(_))
    }
}

/// Errors raised inside an agent invoker.
///
/// These never leave the invoker: they are converted into a
/// [`RawExecution`](crate::runner::RawExecution) with an `Error` or `Timeout` status.
#[derive(Debug, Error)]
pub enum AgentInvocationError {
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Agent timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Agent responded with HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Malformed agent response: {0}")]
    MalformedResponse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while scoring a transcript.
#[derive(Debug, Error, PartialEq)]
pub enum ScoringError {
    #[error("transcript is not valid for {kind} scoring: {message}")]
    InvalidTranscript { kind: &'static str, message: String },

    #[error("{kind} scoring produced a non-finite value")]
    NonFinite { kind: &'static str },
}

/// Fatal, pre-dispatch errors returned by [`Runner::run`](crate::runner::Runner::run).
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigValidationError),

    #[error("Fixture error: {0}")]
    Fixture(#[from] FixtureLoadError),
}
