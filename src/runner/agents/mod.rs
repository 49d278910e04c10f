//! Agent invokers.
//!
//! An [`AgentInvoker`] executes one prompt against the agent under test and
//! reports what happened as a [`RawExecution`]. Invokers never return errors:
//! spawn failures, transport failures and timeouts all become a status on the
//! raw execution, and every exit path releases the agent's process or
//! connection before returning.

pub mod http;
pub mod process;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AgentInvocationError;
use crate::fixture::PromptSpec;

use super::config::AgentParams;

pub use http::HttpInvoker;
pub use process::ProcessInvoker;

/// Environment variable carrying the model override for command agents.
pub const MODEL_ENV: &str = "AGENT_MODEL";
/// Environment variable carrying the API key for command agents.
pub const API_KEY_ENV: &str = "AGENT_API_KEY";
/// Environment variable carrying the id of the prompt being executed.
pub const PROMPT_ID_ENV: &str = "BENCH_PROMPT_ID";

/// Outcome status of a single agent execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionStatus {
    /// The agent finished within the timeout.
    Ok,
    /// The agent could not be started, failed, or the transport broke.
    Error,
    /// The agent did not finish within the timeout and was terminated.
    Timeout,
    /// The execution was cancelled before it finished.
    Cancelled,
}

impl ExecutionStatus {
    /// Statuses that force a `FAIL` classification regardless of transcript.
    pub fn is_failure(&self) -> bool {
        !matches!(self, ExecutionStatus::Ok)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Ok => write!(f, "ok"),
            ExecutionStatus::Error => write!(f, "error"),
            ExecutionStatus::Timeout => write!(f, "timeout"),
            ExecutionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// What an invoker observed while running one prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct RawExecution {
    pub status: ExecutionStatus,
    /// Agent output the criteria are evaluated against.
    pub transcript: String,
    pub duration: Duration,
    pub error: Option<String>,
    /// Process exit code, when the agent is a process that exited.
    pub exit_code: Option<i32>,
}

impl RawExecution {
    /// A successful execution.
    pub fn ok(transcript: impl Into<String>, duration: Duration) -> Self {
        Self {
            status: ExecutionStatus::Ok,
            transcript: transcript.into(),
            duration,
            error: None,
            exit_code: None,
        }
    }

    /// A failed execution with the captured error message.
    pub fn error(message: impl Into<String>, duration: Duration) -> Self {
        Self {
            status: ExecutionStatus::Error,
            transcript: String::new(),
            duration,
            error: Some(message.into()),
            exit_code: None,
        }
    }

    /// An execution terminated because it exceeded `timeout`.
    pub fn timeout(timeout: Duration, duration: Duration) -> Self {
        Self {
            status: ExecutionStatus::Timeout,
            transcript: String::new(),
            duration,
            error: Some(format!("agent timed out after {:?}", timeout)),
            exit_code: None,
        }
    }

    /// An execution cut short by run cancellation.
    pub fn cancelled(duration: Duration) -> Self {
        Self {
            status: ExecutionStatus::Cancelled,
            transcript: String::new(),
            duration,
            error: Some("execution cancelled".to_string()),
            exit_code: None,
        }
    }

    /// Converts an invocation error into the matching raw execution.
    pub fn from_error(err: AgentInvocationError, duration: Duration) -> Self {
        match err {
            AgentInvocationError::Timeout(timeout) => Self::timeout(timeout, duration),
            other => Self::error(other.to_string(), duration),
        }
    }

    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    pub fn with_transcript(mut self, transcript: impl Into<String>) -> Self {
        self.transcript = transcript.into();
        self
    }
}

/// How a command agent receives its prompt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptMode {
    /// Prompt written to stdin, which is then closed.
    #[default]
    Stdin,
    /// Prompt appended as the last command-line argument.
    Argument,
}

/// A local agent executable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandAgent {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub prompt_mode: PromptMode,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

/// An agent reachable over HTTP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpAgent {
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// JSON pointer selecting the transcript inside a JSON response body.
    /// When absent the whole body is the transcript.
    #[serde(default)]
    pub response_pointer: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

/// How to reach the agent under test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentSpec {
    Command(CommandAgent),
    Http(HttpAgent),
}

impl AgentSpec {
    /// Short name of the agent kind, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentSpec::Command(_) => "command",
            AgentSpec::Http(_) => "http",
        }
    }

    /// Returns a copy with the run's invocation parameters merged in.
    pub fn with_params(&self, params: &AgentParams) -> AgentSpec {
        match self {
            AgentSpec::Command(agent) => {
                let mut agent = agent.clone();
                agent.args.extend(params.extra_args.iter().cloned());
                for (key, value) in &params.env_vars {
                    agent.env.insert(key.clone(), value.clone());
                }
                if let Some(ref model) = params.model {
                    agent.env.insert(MODEL_ENV.to_string(), model.clone());
                }
                if let Some(ref api_key) = params.api_key {
                    agent.env.insert(API_KEY_ENV.to_string(), api_key.clone());
                }
                AgentSpec::Command(agent)
            }
            AgentSpec::Http(agent) => {
                let mut agent = agent.clone();
                if params.model.is_some() {
                    agent.model = params.model.clone();
                }
                if let Some(ref api_key) = params.api_key {
                    agent
                        .headers
                        .insert("Authorization".to_string(), format!("Bearer {}", api_key));
                }
                AgentSpec::Http(agent)
            }
        }
    }
}

impl fmt::Display for AgentSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentSpec::Command(agent) => write!(f, "command:{}", agent.program),
            AgentSpec::Http(agent) => write!(f, "http:{}", agent.url),
        }
    }
}

/// Executes one prompt against the agent.
///
/// Implementations must not panic on agent misbehaviour and must release
/// every resource they acquired before returning, including when the
/// returned future is dropped mid-flight.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn invoke(&self, prompt: &PromptSpec, agent: &AgentSpec, timeout: Duration)
        -> RawExecution;
}

/// Invoker that dispatches on the agent kind to a real process or HTTP endpoint.
#[derive(Debug, Clone, Default)]
pub struct SystemInvoker {
    process: ProcessInvoker,
    http: HttpInvoker,
}

impl SystemInvoker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AgentInvoker for SystemInvoker {
    async fn invoke(
        &self,
        prompt: &PromptSpec,
        agent: &AgentSpec,
        timeout: Duration,
    ) -> RawExecution {
        match agent {
            AgentSpec::Command(command) => self.process.run(prompt, command, timeout).await,
            AgentSpec::Http(endpoint) => self.http.run(prompt, endpoint, timeout).await,
        }
    }
}

/// Truncates agent output for error messages.
pub(crate) fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated]", &s[..end])
}
