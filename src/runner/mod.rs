//! Benchmark runner.
//!
//! Runs every prompt of a fixture against an agent for a number of
//! iterations, scores each execution and reduces the results per prompt.
//!
//! # Architecture
//!
//! ```text
//! RunConfig + Fixture → IterationScheduler → AgentInvoker → Scorer → Aggregator → RunnerResult
//! ```
//!
//! The runner:
//! 1. Validates the configuration and loads the fixture
//! 2. Expands (prompt × iteration) into independent tasks
//! 3. Dispatches them to at most `concurrency` concurrent agent invocations
//! 4. Scores each transcript against the prompt's criteria
//! 5. Aggregates points per prompt, in fixture order
//!
//! # Example
//!
//! ```ignore
//! use agent_bench::runner::{RunConfig, RunContext, Runner};
//!
//! let config = RunConfig::new("./fixtures/smoke.yaml")
//!     .with_iterations(3)
//!     .with_concurrency(2);
//!
//! let result = Runner::with_defaults().run(&config, &RunContext::new()).await?;
//! for aggregate in &result.aggregated_results {
//!     println!("{}: {:.2}", aggregate.prompt_id, aggregate.average_points);
//! }
//! ```

pub mod aggregator;
pub mod agents;
pub mod cancel;
pub mod config;
pub mod criteria;
pub mod executor;
pub mod progress;
pub mod result;
pub mod scheduler;
pub mod scorer;

pub use aggregator::aggregate;
pub use agents::{
    AgentInvoker, AgentSpec, CommandAgent, ExecutionStatus, HttpAgent, PromptMode, RawExecution,
    SystemInvoker,
};
pub use cancel::CancelToken;
pub use config::{AgentParams, RunConfig};
pub use criteria::{Criteria, RubricItem, ScoringStrategy};
pub use executor::{RunContext, Runner};
pub use progress::{ProgressMonitor, ProgressSnapshot, RunProgress};
pub use result::{
    expand_tasks, AggregatedResult, Classification, IterationResult, IterationTask, RunReport,
    RunnerResult, CANCELLED_MARKER,
};
pub use scheduler::IterationScheduler;
pub use scorer::{Score, ScoreThresholds, Scorer};
