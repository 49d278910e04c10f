//! Runner facade - the main benchmark run logic.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::error::RunnerError;
use crate::fixture::{FileFixtureLoader, Fixture, FixtureLoader};

use super::aggregator::aggregate;
use super::agents::{AgentInvoker, SystemInvoker};
use super::cancel::CancelToken;
use super::config::RunConfig;
use super::progress::RunProgress;
use super::result::{expand_tasks, RunnerResult};
use super::scheduler::IterationScheduler;
use super::scorer::Scorer;

/// Per-run handles shared between the caller and the runner.
///
/// The caller keeps a clone to cancel the run or watch its progress.
#[derive(Debug, Clone)]
pub struct RunContext {
    run_id: String,
    cancel: CancelToken,
    progress: RunProgress,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContext {
    pub fn new() -> Self {
        Self::with_run_id(format!("run-{}", Uuid::new_v4()))
    }

    pub fn with_run_id(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            cancel: CancelToken::new(),
            progress: RunProgress::new(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Requests cancellation of the run.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn progress(&self) -> &RunProgress {
        &self.progress
    }
}

/// Runs a fixture against an agent and reduces the outcome.
pub struct Runner {
    invoker: Arc<dyn AgentInvoker>,
    loader: Arc<dyn FixtureLoader>,
}

impl Runner {
    pub fn new(invoker: Arc<dyn AgentInvoker>, loader: Arc<dyn FixtureLoader>) -> Self {
        Self { invoker, loader }
    }

    /// A runner that loads fixture files and invokes real processes or endpoints.
    pub fn with_defaults() -> Self {
        Self::new(Arc::new(SystemInvoker::new()), Arc::new(FileFixtureLoader::new()))
    }

    /// Loads the configured fixture with the run's agent parameters applied.
    pub async fn load_fixture(&self, config: &RunConfig) -> Result<Fixture, RunnerError> {
        let fixture = self.loader.load(&config.fixture).await?;
        Ok(fixture.with_agent_params(&config.agent))
    }

    /// Runs the benchmark described by `config`.
    ///
    /// Fails only on configuration or fixture errors, both detected before
    /// anything is dispatched. Once dispatch starts the result is always
    /// returned, partial if the run was cancelled through `ctx`.
    pub async fn run(&self, config: &RunConfig, ctx: &RunContext) -> Result<RunnerResult, RunnerError> {
        let span = info_span!("bench_run", run_id = %ctx.run_id());
        self.run_inner(config, ctx).instrument(span).await
    }

    async fn run_inner(&self, config: &RunConfig, ctx: &RunContext) -> Result<RunnerResult, RunnerError> {
        let start = Instant::now();

        config.validate()?;
        let fixture = Arc::new(self.load_fixture(config).await?);

        let tasks = expand_tasks(&fixture, config.iterations);
        ctx.progress.begin(tasks.len());

        info!(
            fixture = %fixture.name,
            agent = %fixture.agent,
            prompts = fixture.len(),
            iterations = config.iterations,
            concurrency = config.concurrency,
            tasks = tasks.len(),
            "Starting benchmark run"
        );

        let scheduler = IterationScheduler::new(
            Arc::clone(&self.invoker),
            Scorer::new(config.thresholds),
            config.concurrency,
            config.timeout,
        )
        .with_grace_period(config.grace_period);

        let iteration_results = scheduler
            .run(fixture, tasks, &ctx.cancel, &ctx.progress)
            .await;
        let aggregated_results = aggregate(&iteration_results);

        let result = RunnerResult {
            iteration_results,
            aggregated_results,
        };
        let (succeeded, partial, failed) = result.classification_counts();

        info!(
            succeeded,
            partial,
            failed,
            cancelled = result.cancelled_count(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Benchmark run finished"
        );

        Ok(result)
    }
}
