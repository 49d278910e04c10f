//! Tasks, per-iteration results and run-level results.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fixture::Fixture;

use super::agents::{ExecutionStatus, RawExecution};
use super::scorer::Score;

/// Error note attached to results of tasks that were cancelled.
pub const CANCELLED_MARKER: &str = "CANCELLED";

/// Outcome category of one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Classification {
    Success,
    Partial,
    Fail,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Success => write!(f, "SUCCESS"),
            Classification::Partial => write!(f, "PARTIAL"),
            Classification::Fail => write!(f, "FAIL"),
        }
    }
}

/// One unit of dispatch: a prompt and an iteration number.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IterationTask {
    pub prompt_id: String,
    /// Position of the prompt in the fixture.
    pub prompt_index: usize,
    /// 1-based iteration number.
    pub iteration: u32,
}

impl IterationTask {
    /// Ordering key of the result this task produces.
    pub fn key(&self) -> (usize, u32) {
        (self.prompt_index, self.iteration)
    }
}

/// Expands a fixture into one task per (prompt, iteration) pair, prompt-major.
pub fn expand_tasks(fixture: &Fixture, iterations: u32) -> Vec<IterationTask> {
    let mut tasks = Vec::with_capacity(fixture.prompts.len() * iterations as usize);
    for (prompt_index, prompt) in fixture.prompts.iter().enumerate() {
        for iteration in 1..=iterations {
            tasks.push(IterationTask {
                prompt_id: prompt.spec.id.clone(),
                prompt_index,
                iteration,
            });
        }
    }
    tasks
}

/// Scored outcome of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationResult {
    pub prompt_id: String,
    pub iteration: u32,
    pub classification: Classification,
    pub points: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub(crate) prompt_index: usize,
    #[serde(skip)]
    pub(crate) cancelled: bool,
}

impl IterationResult {
    /// Builds the result of a task whose execution was scored.
    ///
    /// A `CANCELLED` execution yields a cancelled result whatever the score.
    pub fn from_score(task: &IterationTask, score: Score, raw: &RawExecution) -> Self {
        if raw.status == ExecutionStatus::Cancelled {
            return Self::cancelled(task);
        }
        Self {
            prompt_id: task.prompt_id.clone(),
            iteration: task.iteration,
            classification: score.classification,
            points: score.points,
            error: raw.error.clone(),
            prompt_index: task.prompt_index,
            cancelled: false,
        }
    }

    /// A `FAIL` result carrying the given error note.
    pub fn failed(task: &IterationTask, error: impl Into<String>) -> Self {
        Self {
            prompt_id: task.prompt_id.clone(),
            iteration: task.iteration,
            classification: Classification::Fail,
            points: 0.0,
            error: Some(error.into()),
            prompt_index: task.prompt_index,
            cancelled: false,
        }
    }

    /// A `FAIL` result for a task cut off by run cancellation.
    pub fn cancelled(task: &IterationTask) -> Self {
        Self {
            cancelled: true,
            ..Self::failed(task, CANCELLED_MARKER)
        }
    }

    /// Whether the task was cut off by cancellation. Such results are kept
    /// in the run output but left out of aggregates.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub(crate) fn key(&self) -> (usize, u32) {
        (self.prompt_index, self.iteration)
    }
}

/// Per-prompt reduction of iteration results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedResult {
    pub prompt_id: String,
    pub iterations: u32,
    pub average_points: f64,
}

/// What a run returns: every iteration result plus the per-prompt aggregates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerResult {
    pub iteration_results: Vec<IterationResult>,
    pub aggregated_results: Vec<AggregatedResult>,
}

impl RunnerResult {
    pub fn cancelled_count(&self) -> usize {
        self.iteration_results
            .iter()
            .filter(|r| r.is_cancelled())
            .count()
    }

    /// Counts results per classification as `(success, partial, fail)`.
    pub fn classification_counts(&self) -> (usize, usize, usize) {
        self.iteration_results
            .iter()
            .fold((0, 0, 0), |(s, p, f), r| match r.classification {
                Classification::Success => (s + 1, p, f),
                Classification::Partial => (s, p + 1, f),
                Classification::Fail => (s, p, f + 1),
            })
    }
}

/// A runner result with the run metadata the CLI writes out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: String,
    pub fixture: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub iterations: u32,
    pub concurrency: usize,
    pub cancelled: bool,
    pub iteration_results: Vec<IterationResult>,
    pub aggregated_results: Vec<AggregatedResult>,
}
