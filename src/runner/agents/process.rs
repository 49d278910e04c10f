//! Process-backed agent invoker.
//!
//! Runs a local executable, feeds it the prompt through stdin or as an
//! argument, and uses its stdout as the transcript.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::AgentInvocationError;
use crate::fixture::PromptSpec;

use super::{truncate, CommandAgent, PromptMode, RawExecution, PROMPT_ID_ENV};

/// Maximum stderr excerpt kept in error messages.
const STDERR_EXCERPT: usize = 2000;

/// Invoker for [`CommandAgent`]s.
#[derive(Debug, Clone, Default)]
pub struct ProcessInvoker;

impl ProcessInvoker {
    pub fn new() -> Self {
        Self
    }

    /// Runs the agent once. Never fails: problems are reported on the
    /// returned [`RawExecution`].
    pub async fn run(
        &self,
        prompt: &PromptSpec,
        agent: &CommandAgent,
        timeout: Duration,
    ) -> RawExecution {
        let start = Instant::now();
        match self.execute(prompt, agent, timeout).await {
            Ok(execution) => execution,
            Err(e) => {
                warn!(prompt_id = %prompt.id, program = %agent.program, error = %e, "Agent invocation failed");
                RawExecution::from_error(e, start.elapsed())
            }
        }
    }

    async fn execute(
        &self,
        prompt: &PromptSpec,
        agent: &CommandAgent,
        timeout: Duration,
    ) -> Result<RawExecution, AgentInvocationError> {
        let start = Instant::now();

        let mut cmd = Command::new(&agent.program);
        cmd.args(&agent.args)
            .envs(&agent.env)
            .env(PROMPT_ID_ENV, &prompt.id)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the invocation future (run cancellation) must not leak the agent.
            .kill_on_drop(true);

        match agent.prompt_mode {
            PromptMode::Stdin => {
                cmd.stdin(Stdio::piped());
            }
            PromptMode::Argument => {
                cmd.arg(&prompt.prompt).stdin(Stdio::null());
            }
        }

        if let Some(ref dir) = agent.working_dir {
            cmd.current_dir(dir);
        }

        debug!(prompt_id = %prompt.id, program = %agent.program, "Spawning agent");

        let mut child = cmd.spawn().map_err(|source| AgentInvocationError::Spawn {
            program: agent.program.clone(),
            source,
        })?;

        let mut stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // Feed stdin while draining the output pipes so a chatty agent cannot
        // deadlock against a large prompt.
        let feed = async {
            if let Some(mut pipe) = stdin.take() {
                if let Err(e) = pipe.write_all(prompt.prompt.as_bytes()).await {
                    // Agents are free to exit without reading their input.
                    if e.kind() != std::io::ErrorKind::BrokenPipe {
                        return Err(e);
                    }
                }
                // Dropping the pipe closes stdin so the agent sees EOF.
            }
            Ok(())
        };
        let io = async { tokio::try_join!(feed, drain(stdout), drain(stderr), child.wait()) };

        let outcome = tokio::time::timeout(timeout, io).await;
        let duration = start.elapsed();

        match outcome {
            Ok(Ok(((), stdout, stderr, status))) => {
                let transcript = String::from_utf8_lossy(&stdout).to_string();
                let stderr = String::from_utf8_lossy(&stderr).to_string();
                let exit_code = status.code().unwrap_or(-1);

                debug!(
                    prompt_id = %prompt.id,
                    exit_code,
                    duration_ms = duration.as_millis() as u64,
                    "Agent exited"
                );

                if status.success() {
                    Ok(RawExecution::ok(transcript, duration).with_exit_code(exit_code))
                } else {
                    let mut message = format!("agent exited with code {}", exit_code);
                    if !stderr.trim().is_empty() {
                        message.push_str(": ");
                        message.push_str(&truncate(stderr.trim(), STDERR_EXCERPT));
                    }
                    Ok(RawExecution::error(message, duration)
                        .with_exit_code(exit_code)
                        .with_transcript(transcript))
                }
            }
            Ok(Err(e)) => {
                terminate(&mut child).await;
                Err(AgentInvocationError::Io(e))
            }
            Err(_) => {
                terminate(&mut child).await;
                Err(AgentInvocationError::Timeout(timeout))
            }
        }
    }
}

/// Kills the child and reaps it.
async fn terminate(child: &mut Child) {
    // `kill` waits for the process after signalling, so no zombie is left behind.
    if let Err(e) = child.kill().await {
        debug!(error = %e, "Agent already exited before kill");
    }
}

async fn drain<R: AsyncRead + Unpin>(reader: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        reader.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}
