//! HTTP-backed agent invoker.
//!
//! POSTs `{prompt_id, prompt, model}` as JSON to the agent endpoint and uses
//! the response body (or a JSON pointer into it) as the transcript.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::AgentInvocationError;
use crate::fixture::PromptSpec;

use super::{truncate, HttpAgent, RawExecution};

/// Request body sent to HTTP agents.
#[derive(Debug, Serialize)]
struct AgentRequest<'a> {
    prompt_id: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

/// Invoker for [`HttpAgent`]s.
#[derive(Debug, Clone, Default)]
pub struct HttpInvoker {
    client: reqwest::Client,
}

impl HttpInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a preconfigured client (proxies, TLS roots, ...).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Runs the agent once. Never fails: problems are reported on the
    /// returned [`RawExecution`].
    pub async fn run(&self, prompt: &PromptSpec, agent: &HttpAgent, timeout: Duration) -> RawExecution {
        let start = Instant::now();

        // On timeout the request future is dropped, which closes the connection.
        let outcome = tokio::time::timeout(timeout, self.execute(prompt, agent)).await;
        let duration = start.elapsed();

        match outcome {
            Ok(Ok(transcript)) => {
                debug!(
                    prompt_id = %prompt.id,
                    duration_ms = duration.as_millis() as u64,
                    "HTTP agent responded"
                );
                RawExecution::ok(transcript, duration)
            }
            Ok(Err(e)) => {
                warn!(prompt_id = %prompt.id, url = %agent.url, error = %e, "HTTP agent failed");
                RawExecution::from_error(e, duration)
            }
            Err(_) => RawExecution::timeout(timeout, duration),
        }
    }

    async fn execute(&self, prompt: &PromptSpec, agent: &HttpAgent) -> Result<String, AgentInvocationError> {
        let body = AgentRequest {
            prompt_id: &prompt.id,
            prompt: &prompt.prompt,
            model: agent.model.as_deref(),
        };

        let mut request = self.client.post(&agent.url).json(&body);
        for (name, value) in &agent.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| AgentInvocationError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AgentInvocationError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(AgentInvocationError::HttpStatus {
                status: status.as_u16(),
                body: truncate(&text, 500),
            });
        }

        match agent.response_pointer {
            Some(ref pointer) => extract_transcript(&text, pointer),
            None => Ok(text),
        }
    }
}

/// Selects the transcript from a JSON body. String values are returned
/// verbatim, anything else as compact JSON.
fn extract_transcript(body: &str, pointer: &str) -> Result<String, AgentInvocationError> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| AgentInvocationError::MalformedResponse(format!("invalid JSON: {}", e)))?;

    match value.pointer(pointer) {
        Some(serde_json::Value::String(s)) => Ok(s.clone()),
        Some(other) => Ok(other.to_string()),
        None => Err(AgentInvocationError::MalformedResponse(format!(
            "no value at '{}'",
            pointer
        ))),
    }
}
