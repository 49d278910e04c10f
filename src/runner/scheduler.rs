//! Iteration scheduler.
//!
//! Runs a task set through a pool of `concurrency` workers pulling from a
//! shared queue. Each task is executed in its own tokio task so a panicking
//! invoker or scoring strategy only fails that task. Results are funneled
//! through a single channel and returned ordered by (prompt position,
//! iteration), whatever order they completed in.
//!
//! # Cancellation
//!
//! Once the run's [`CancelToken`] fires, workers stop taking tasks from the
//! queue. A task already running gets `grace_period` to finish; after that it
//! is aborted, which drops the invocation future and with it the agent's
//! process or connection. Tasks that never produced a result are recorded
//! as cancelled `FAIL`s.

use std::any::Any;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::fixture::Fixture;

use super::agents::{AgentInvoker, RawExecution};
use super::cancel::CancelToken;
use super::config::DEFAULT_GRACE_PERIOD;
use super::progress::RunProgress;
use super::result::{Classification, IterationResult, IterationTask};
use super::scorer::{Score, Scorer};

/// Extra time the scheduler grants an invoker past the task timeout before
/// it stops waiting and records a timeout itself.
const TIMEOUT_SLACK: Duration = Duration::from_secs(1);

/// Dispatches iteration tasks under a concurrency bound.
#[derive(Clone)]
pub struct IterationScheduler {
    invoker: Arc<dyn AgentInvoker>,
    scorer: Scorer,
    concurrency: usize,
    timeout: Duration,
    grace_period: Duration,
}

impl IterationScheduler {
    pub fn new(
        invoker: Arc<dyn AgentInvoker>,
        scorer: Scorer,
        concurrency: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            invoker,
            scorer,
            concurrency: concurrency.max(1),
            timeout,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Runs every task and returns one result per task, ordered by prompt
    /// position then iteration.
    ///
    /// Never fails: invocation errors, scoring errors, panics and
    /// cancellation all end up as `FAIL` results.
    pub async fn run(
        &self,
        fixture: Arc<Fixture>,
        tasks: Vec<IterationTask>,
        cancel: &CancelToken,
        progress: &RunProgress,
    ) -> Vec<IterationResult> {
        if tasks.is_empty() {
            return Vec::new();
        }

        let num_workers = self.concurrency.min(tasks.len());
        let queue = Arc::new(Mutex::new(tasks.iter().cloned().collect::<VecDeque<_>>()));
        let (results_tx, mut results_rx) = mpsc::unbounded_channel();

        debug!(tasks = tasks.len(), workers = num_workers, "Starting workers");

        let mut handles = Vec::with_capacity(num_workers);
        for i in 0..num_workers {
            let worker = Worker {
                id: format!("worker-{}", i),
                queue: Arc::clone(&queue),
                fixture: Arc::clone(&fixture),
                invoker: Arc::clone(&self.invoker),
                scorer: self.scorer,
                timeout: self.timeout,
                grace_period: self.grace_period,
                cancel: cancel.clone(),
                progress: progress.clone(),
                results: results_tx.clone(),
            };
            handles.push(tokio::spawn(worker.run()));
        }
        // Only the workers hold senders now, so the channel closes when the last one exits.
        drop(results_tx);

        let mut collected: BTreeMap<(usize, u32), IterationResult> = BTreeMap::new();
        while let Some(result) = results_rx.recv().await {
            collected.insert(result.key(), result);
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task panicked");
            }
        }

        let cancelled = cancel.is_cancelled();
        for task in &tasks {
            if collected.contains_key(&task.key()) {
                continue;
            }
            let result = if cancelled {
                IterationResult::cancelled(task)
            } else {
                IterationResult::failed(task, "worker exited before reporting a result")
            };
            progress.record(&result);
            collected.insert(task.key(), result);
        }

        if cancelled {
            info!(
                completed = collected.values().filter(|r| !r.is_cancelled()).count(),
                total = tasks.len(),
                "Run cancelled"
            );
        }

        collected.into_values().collect()
    }
}

/// A single worker pulling tasks from the shared queue.
struct Worker {
    id: String,
    queue: Arc<Mutex<VecDeque<IterationTask>>>,
    fixture: Arc<Fixture>,
    invoker: Arc<dyn AgentInvoker>,
    scorer: Scorer,
    timeout: Duration,
    grace_period: Duration,
    cancel: CancelToken,
    progress: RunProgress,
    results: mpsc::UnboundedSender<IterationResult>,
}

impl Worker {
    async fn run(self) {
        loop {
            if self.cancel.is_cancelled() {
                debug!(worker_id = %self.id, "Worker stopping on cancellation");
                break;
            }

            let Some(task) = self.queue.lock().await.pop_front() else {
                break;
            };

            let result = self.process(task).await;
            self.progress.record(&result);
            if self.results.send(result).is_err() {
                break;
            }
        }
    }

    async fn process(&self, task: IterationTask) -> IterationResult {
        debug!(
            worker_id = %self.id,
            prompt_id = %task.prompt_id,
            iteration = task.iteration,
            "Dispatching task"
        );

        self.progress.task_started();
        let started = Instant::now();
        let mut handle = self.spawn_execution(&task);

        let joined = tokio::select! {
            biased;
            joined = &mut handle => Some(joined),
            _ = self.cancel.cancelled() => None,
        };

        let joined = match joined {
            Some(joined) => joined,
            None => match tokio::time::timeout(self.grace_period, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    // Aborting drops the invocation future, which releases the agent.
                    handle.abort();
                    let _ = handle.await;
                    self.progress.task_finished();
                    warn!(
                        worker_id = %self.id,
                        prompt_id = %task.prompt_id,
                        iteration = task.iteration,
                        "Task did not finish within the grace period, cancelled"
                    );
                    let raw = RawExecution::cancelled(started.elapsed());
                    return IterationResult::from_score(&task, Score::failed(), &raw);
                }
            },
        };
        self.progress.task_finished();

        match joined {
            Ok(result) => {
                if result.classification == Classification::Fail {
                    warn!(
                        worker_id = %self.id,
                        prompt_id = %task.prompt_id,
                        iteration = task.iteration,
                        error = ?result.error,
                        "Task failed"
                    );
                }
                result
            }
            Err(e) => {
                let message = join_error_message(e);
                error!(
                    worker_id = %self.id,
                    prompt_id = %task.prompt_id,
                    iteration = task.iteration,
                    error = %message,
                    "Task panicked"
                );
                IterationResult::failed(&task, message)
            }
        }
    }

    /// Invokes the agent and scores the outcome in a separate tokio task.
    fn spawn_execution(&self, task: &IterationTask) -> JoinHandle<IterationResult> {
        let fixture = Arc::clone(&self.fixture);
        let invoker = Arc::clone(&self.invoker);
        let scorer = self.scorer;
        let timeout = self.timeout;
        let task = task.clone();

        tokio::spawn(async move {
            let Some(prompt) = fixture.prompts.get(task.prompt_index) else {
                return IterationResult::failed(&task, "task refers to an unknown prompt");
            };

            let deadline = timeout.saturating_add(TIMEOUT_SLACK);
            let invocation = invoker.invoke(&prompt.spec, &fixture.agent, timeout);
            let raw = match tokio::time::timeout(deadline, invocation).await {
                Ok(raw) => raw,
                Err(_) => RawExecution::timeout(timeout, deadline),
            };

            match scorer.classify(prompt.strategy.as_ref(), &raw) {
                Ok(score) => IterationResult::from_score(&task, score, &raw),
                Err(e) => IterationResult::failed(&task, e.to_string()),
            }
        })
    }
}

fn join_error_message(err: JoinError) -> String {
    if err.is_panic() {
        format!("task panicked: {}", panic_message(err.into_panic()))
    } else {
        format!("task aborted: {}", err)
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::PromptSpec;
    use crate::runner::agents::{AgentSpec, CommandAgent, PromptMode};
    use crate::runner::criteria::Criteria;
    use crate::runner::result::expand_tasks;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fixture(ids: &[&str]) -> Arc<Fixture> {
        let agent = AgentSpec::Command(CommandAgent {
            program: "fake".into(),
            args: vec![],
            prompt_mode: PromptMode::Stdin,
            env: BTreeMap::new(),
            working_dir: None,
        });
        let prompts = ids
            .iter()
            .map(|id| {
                PromptSpec::new(
                    *id,
                    format!("prompt {}", id),
                    Criteria::ExactMatch {
                        expected: "ok".into(),
                        case_sensitive: true,
                    },
                )
            })
            .collect();
        Arc::new(Fixture::new("test", agent, prompts).unwrap())
    }

    /// Answers "ok", slower for prompt `a` so that `b` finishes first.
    struct ReversedDelay;

    #[async_trait]
    impl AgentInvoker for ReversedDelay {
        async fn invoke(&self, prompt: &PromptSpec, _agent: &AgentSpec, _timeout: Duration) -> RawExecution {
            let delay = if prompt.id == "a" { 30 } else { 5 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            RawExecution::ok("ok", Duration::from_millis(delay))
        }
    }

    /// Panics for one prompt and answers "ok" otherwise.
    struct PanicsOn(&'static str);

    #[async_trait]
    impl AgentInvoker for PanicsOn {
        async fn invoke(&self, prompt: &PromptSpec, _agent: &AgentSpec, _timeout: Duration) -> RawExecution {
            if prompt.id == self.0 {
                panic!("invoker exploded");
            }
            RawExecution::ok("ok", Duration::ZERO)
        }
    }

    /// Never returns on its own.
    struct Hangs {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AgentInvoker for Hangs {
        async fn invoke(&self, _prompt: &PromptSpec, _agent: &AgentSpec, _timeout: Duration) -> RawExecution {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::future::pending::<RawExecution>().await
        }
    }

    /// Answers "ok" after a fixed delay.
    struct Slow(Duration);

    #[async_trait]
    impl AgentInvoker for Slow {
        async fn invoke(&self, _prompt: &PromptSpec, _agent: &AgentSpec, _timeout: Duration) -> RawExecution {
            tokio::time::sleep(self.0).await;
            RawExecution::ok("ok", self.0)
        }
    }

    fn scheduler(invoker: Arc<dyn AgentInvoker>, concurrency: usize) -> IterationScheduler {
        IterationScheduler::new(invoker, Scorer::default(), concurrency, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_results_are_ordered_by_prompt_then_iteration() {
        let fixture = fixture(&["a", "b"]);
        let tasks = expand_tasks(&fixture, 3);

        let results = scheduler(Arc::new(ReversedDelay), 6)
            .run(fixture, tasks, &CancelToken::new(), &RunProgress::new())
            .await;

        let keys: Vec<_> = results
            .iter()
            .map(|r| (r.prompt_id.as_str(), r.iteration))
            .collect();
        assert_eq!(
            keys,
            vec![("a", 1), ("a", 2), ("a", 3), ("b", 1), ("b", 2), ("b", 3)]
        );
        assert!(results
            .iter()
            .all(|r| r.classification == Classification::Success));
    }

    #[tokio::test]
    async fn test_panic_is_isolated_to_its_task() {
        let fixture = fixture(&["good", "bad"]);
        let tasks = expand_tasks(&fixture, 2);

        let results = scheduler(Arc::new(PanicsOn("bad")), 2)
            .run(fixture, tasks, &CancelToken::new(), &RunProgress::new())
            .await;

        assert_eq!(results.len(), 4);
        for result in &results {
            if result.prompt_id == "bad" {
                assert_eq!(result.classification, Classification::Fail);
                assert_eq!(result.points, 0.0);
                assert!(result.error.as_deref().unwrap().contains("invoker exploded"));
            } else {
                assert_eq!(result.classification, Classification::Success);
            }
        }
    }

    #[tokio::test]
    async fn test_invoker_ignoring_timeout_is_recorded_as_timeout() {
        let fixture = fixture(&["a"]);
        let tasks = expand_tasks(&fixture, 1);
        let invoker = Arc::new(Hangs {
            calls: AtomicUsize::new(0),
        });

        let results = IterationScheduler::new(invoker, Scorer::default(), 1, Duration::from_millis(50))
            .run(fixture, tasks, &CancelToken::new(), &RunProgress::new())
            .await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].classification, Classification::Fail);
        assert!(results[0].error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_cancel_aborts_in_flight_after_grace_period() {
        let fixture = fixture(&["a", "b"]);
        let tasks = expand_tasks(&fixture, 2);
        let invoker = Arc::new(Hangs {
            calls: AtomicUsize::new(0),
        });
        let cancel = CancelToken::new();
        let progress = RunProgress::new();
        progress.begin(tasks.len());

        let trigger = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                cancel.cancel();
            })
        };

        let results = tokio::time::timeout(
            Duration::from_secs(5),
            IterationScheduler::new(invoker.clone(), Scorer::default(), 2, Duration::from_secs(60))
                .with_grace_period(Duration::from_millis(20))
                .run(fixture, tasks, &cancel, &progress),
        )
        .await
        .unwrap();
        trigger.await.unwrap();

        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| r.is_cancelled()));
        assert_eq!(invoker.calls.load(Ordering::SeqCst), 2);

        let snap = progress.snapshot();
        assert_eq!(snap.in_flight, 0);
        assert_eq!(snap.cancelled, 4);
    }

    #[tokio::test]
    async fn test_in_flight_task_finishing_within_grace_keeps_its_result() {
        let fixture = fixture(&["a"]);
        let tasks = expand_tasks(&fixture, 3);
        let cancel = CancelToken::new();

        let trigger = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                cancel.cancel();
            })
        };

        let results = IterationScheduler::new(
            Arc::new(Slow(Duration::from_millis(50))),
            Scorer::default(),
            1,
            Duration::from_secs(5),
        )
        .with_grace_period(Duration::from_secs(1))
        .run(fixture, tasks, &cancel, &RunProgress::new())
        .await;
        trigger.await.unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].classification, Classification::Success);
        assert!(!results[0].is_cancelled());
        assert_eq!(results[0].error, None);
        assert!(results[1..].iter().all(|r| r.is_cancelled()));
    }

    #[tokio::test]
    async fn test_maximal_timeout_does_not_overflow() {
        let fixture = fixture(&["a", "b"]);
        let tasks = expand_tasks(&fixture, 1);

        let results = IterationScheduler::new(
            Arc::new(Slow(Duration::from_millis(1))),
            Scorer::default(),
            2,
            Duration::from_secs(u64::MAX),
        )
        .run(fixture, tasks, &CancelToken::new(), &RunProgress::new())
        .await;

        assert_eq!(results.len(), 2);
        for result in &results {
            assert_eq!(result.classification, Classification::Success);
            assert_eq!(result.error, None);
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_start_dispatches_nothing() {
        let fixture = fixture(&["a"]);
        let tasks = expand_tasks(&fixture, 3);
        let invoker = Arc::new(Hangs {
            calls: AtomicUsize::new(0),
        });
        let cancel = CancelToken::new();
        cancel.cancel();

        let results = scheduler(invoker.clone(), 2)
            .run(fixture, tasks, &cancel, &RunProgress::new())
            .await;

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.is_cancelled()));
        assert_eq!(invoker.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_task_set() {
        let results = scheduler(Arc::new(ReversedDelay), 2)
            .run(fixture(&["a"]), Vec::new(), &CancelToken::new(), &RunProgress::new())
            .await;
        assert!(results.is_empty());
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(42)), "unknown panic payload");
    }
}
