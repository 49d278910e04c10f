//! Configuration for benchmark runs.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigValidationError;

use super::scorer::ScoreThresholds;

/// Default number of iterations per prompt.
pub const DEFAULT_ITERATIONS: u32 = 1;
/// Default number of concurrent agent invocations.
pub const DEFAULT_CONCURRENCY: usize = 4;
/// Default per-iteration timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
/// Default time in-flight tasks get to finish after cancellation.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Invocation parameters merged into the fixture's agent spec.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentParams {
    /// Extra environment variables for command agents.
    #[serde(default)]
    pub env_vars: Vec<(String, String)>,
    /// Extra arguments appended to command agents' argument lists.
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Model to use for the agent (if applicable).
    #[serde(default)]
    pub model: Option<String>,
    /// API key for the agent (if applicable).
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

impl AgentParams {
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

// Keeps the API key out of logs.
impl fmt::Debug for AgentParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentParams")
            .field("env_vars", &self.env_vars)
            .field("extra_args", &self.extra_args)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Configuration for one benchmark run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Fixture reference handed to the fixture loader.
    pub fixture: PathBuf,
    /// Executions per prompt.
    pub iterations: u32,
    /// Maximum concurrent agent invocations.
    pub concurrency: usize,
    /// Budget for a single agent invocation.
    pub timeout: Duration,
    /// How long in-flight tasks may keep running after cancellation.
    pub grace_period: Duration,
    pub thresholds: ScoreThresholds,
    pub agent: AgentParams,
}

impl RunConfig {
    /// Creates a run configuration with defaults.
    pub fn new(fixture: impl Into<PathBuf>) -> Self {
        Self {
            fixture: fixture.into(),
            iterations: DEFAULT_ITERATIONS,
            concurrency: DEFAULT_CONCURRENCY,
            timeout: DEFAULT_TIMEOUT,
            grace_period: DEFAULT_GRACE_PERIOD,
            thresholds: ScoreThresholds::default(),
            agent: AgentParams::default(),
        }
    }

    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Sets the points threshold for `SUCCESS`.
    pub fn with_success_threshold(mut self, success: f64) -> Self {
        self.thresholds = ScoreThresholds::new(success);
        self
    }

    pub fn with_agent_params(mut self, agent: AgentParams) -> Self {
        self.agent = agent;
        self
    }

    /// Validates the configuration. Nothing may be dispatched for a config
    /// that fails here.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.iterations == 0 {
            return Err(ConfigValidationError::InvalidIterations(self.iterations));
        }
        if self.concurrency == 0 {
            return Err(ConfigValidationError::InvalidConcurrency(self.concurrency));
        }
        if self.timeout.is_zero() {
            return Err(ConfigValidationError::ZeroTimeout);
        }
        if self.fixture.as_os_str().is_empty() {
            return Err(ConfigValidationError::MissingFixture);
        }
        self.thresholds.validate()?;

        for (key, _) in &self.agent.env_vars {
            if key.is_empty() || key.contains('=') {
                return Err(ConfigValidationError::InvalidValue {
                    key: "agent.env_vars".to_string(),
                    message: format!("invalid variable name '{}'", key),
                });
            }
        }

        Ok(())
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::new("fixture.yaml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_config_defaults() {
        let config = RunConfig::new("bench.yaml");
        assert_eq!(config.fixture, PathBuf::from("bench.yaml"));
        assert_eq!(config.iterations, 1);
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.timeout, Duration::from_secs(300));
        assert_eq!(config.grace_period, Duration::from_secs(10));
        assert_eq!(config.thresholds.success, 1.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_run_config_builder() {
        let config = RunConfig::new("bench.yaml")
            .with_iterations(3)
            .with_concurrency(2)
            .with_timeout(Duration::from_secs(5))
            .with_grace_period(Duration::ZERO)
            .with_success_threshold(0.8)
            .with_agent_params(AgentParams::default().with_model("m"));

        assert_eq!(config.iterations, 3);
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.grace_period, Duration::ZERO);
        assert_eq!(config.thresholds.success, 0.8);
        assert_eq!(config.agent.model.as_deref(), Some("m"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert_eq!(
            RunConfig::new("f").with_iterations(0).validate(),
            Err(ConfigValidationError::InvalidIterations(0))
        );
        assert_eq!(
            RunConfig::new("f").with_concurrency(0).validate(),
            Err(ConfigValidationError::InvalidConcurrency(0))
        );
        assert_eq!(
            RunConfig::new("f").with_timeout(Duration::ZERO).validate(),
            Err(ConfigValidationError::ZeroTimeout)
        );
        assert_eq!(
            RunConfig::new("").validate(),
            Err(ConfigValidationError::MissingFixture)
        );
        assert_eq!(
            RunConfig::new("f").with_success_threshold(0.0).validate(),
            Err(ConfigValidationError::InvalidThreshold(0.0))
        );
        assert!(matches!(
            RunConfig::new("f")
                .with_agent_params(AgentParams::default().with_env("A=B", "c"))
                .validate(),
            Err(ConfigValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_agent_params_debug_redacts_key() {
        let params = AgentParams::default().with_api_key("sk-very-secret");
        let debug = format!("{:?}", params);
        assert!(!debug.contains("sk-very-secret"));
        assert!(debug.contains("<redacted>"));
    }
}
