//! Progress tracking for benchmark runs.
//!
//! The scheduler updates a shared [`RunProgress`] as tasks are dispatched
//! and finish. A [`ProgressMonitor`] can log periodic snapshots of it so
//! long runs can be followed without reading per-task log lines.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use super::result::{Classification, IterationResult};

/// Shortest interval between progress logs.
const MIN_INTERVAL: Duration = Duration::from_millis(100);

/// Snapshot of run progress counters at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Tasks in the run.
    pub total: usize,
    /// Tasks handed to a worker.
    pub dispatched: usize,
    /// Tasks that produced a result, cancelled ones included.
    pub completed: usize,
    pub succeeded: usize,
    pub partial: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Agent invocations currently running.
    pub in_flight: usize,
    /// Highest value `in_flight` reached.
    pub peak_in_flight: usize,
}

/// Shared atomic counters for one run.
///
/// Clones share state. Counters are reset by [`RunProgress::begin`] so a
/// context can be reused across runs.
#[derive(Debug, Clone, Default)]
pub struct RunProgress {
    total: Arc<AtomicUsize>,
    dispatched: Arc<AtomicUsize>,
    completed: Arc<AtomicUsize>,
    succeeded: Arc<AtomicUsize>,
    partial: Arc<AtomicUsize>,
    failed: Arc<AtomicUsize>,
    cancelled: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

impl RunProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets all counters and records the size of the task set.
    pub fn begin(&self, total: usize) {
        for counter in [
            &self.dispatched,
            &self.completed,
            &self.succeeded,
            &self.partial,
            &self.failed,
            &self.cancelled,
            &self.in_flight,
            &self.peak_in_flight,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.total.store(total, Ordering::Relaxed);
    }

    pub(crate) fn task_started(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        let now = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::Relaxed);
    }

    pub(crate) fn task_finished(&self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn record(&self, result: &IterationResult) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        if result.is_cancelled() {
            self.cancelled.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let counter = match result.classification {
            Classification::Success => &self.succeeded,
            Classification::Partial => &self.partial,
            Classification::Fail => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.total.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            partial: self.partial.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            peak_in_flight: self.peak_in_flight.load(Ordering::Relaxed),
        }
    }
}

/// A background task that periodically logs run progress.
///
/// Call [`ProgressMonitor::stop`] when the run is over.
pub struct ProgressMonitor {
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressMonitor {
    /// Starts logging a snapshot of `progress` every `interval`, clamped to
    /// at least 100ms.
    pub fn start(progress: RunProgress, interval: Duration) -> Self {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let flag = stop_flag.clone();
        let start = Instant::now();
        let mut tick = tokio::time::interval(interval.max(MIN_INTERVAL));

        let handle = tokio::spawn(async move {
            tick.tick().await; // skip the immediate first tick

            loop {
                tick.tick().await;
                if flag.load(Ordering::Relaxed) {
                    break;
                }

                let snap = progress.snapshot();
                let pct = if snap.total > 0 {
                    (snap.completed as f64 / snap.total as f64 * 100.0).min(100.0)
                } else {
                    0.0
                };

                tracing::info!(
                    dispatched = snap.dispatched,
                    completed = snap.completed,
                    total = snap.total,
                    succeeded = snap.succeeded,
                    partial = snap.partial,
                    failed = snap.failed,
                    cancelled = snap.cancelled,
                    in_flight = snap.in_flight,
                    progress_pct = format!("{:.1}%", pct),
                    elapsed_secs = start.elapsed().as_secs(),
                    "Benchmark progress"
                );
            }
        });

        Self {
            stop_flag,
            handle: Some(handle),
        }
    }

    /// Stops the monitor without waiting for the next tick.
    pub async fn stop(mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Drop for ProgressMonitor {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::result::IterationTask;

    fn task(iteration: u32) -> IterationTask {
        IterationTask {
            prompt_id: "p".into(),
            prompt_index: 0,
            iteration,
        }
    }

    #[test]
    fn test_progress_default_is_zero() {
        let snap = RunProgress::new().snapshot();
        assert_eq!(snap.total, 0);
        assert_eq!(snap.completed, 0);
        assert_eq!(snap.peak_in_flight, 0);
    }

    #[test]
    fn test_progress_tracks_tasks() {
        let progress = RunProgress::new();
        progress.begin(3);

        progress.task_started();
        progress.task_started();
        progress.task_finished();
        progress.record(&IterationResult::failed(&task(1), "boom"));
        progress.record(&IterationResult::cancelled(&task(2)));

        let snap = progress.snapshot();
        assert_eq!(snap.total, 3);
        assert_eq!(snap.dispatched, 2);
        assert_eq!(snap.in_flight, 1);
        assert_eq!(snap.peak_in_flight, 2);
        assert_eq!(snap.completed, 2);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.cancelled, 1);
    }

    #[test]
    fn test_begin_resets_counters() {
        let progress = RunProgress::new();
        progress.begin(2);
        progress.task_started();
        progress.begin(5);

        let snap = progress.snapshot();
        assert_eq!(snap.total, 5);
        assert_eq!(snap.dispatched, 0);
        assert_eq!(snap.in_flight, 0);
    }

    #[test]
    fn test_clone_shares_state() {
        let progress = RunProgress::new();
        let clone = progress.clone();
        progress.task_started();
        assert_eq!(clone.snapshot().dispatched, 1);
    }

    #[tokio::test]
    async fn test_progress_monitor_start_stop() {
        let progress = RunProgress::new();
        progress.begin(10);

        let monitor = ProgressMonitor::start(progress, Duration::from_millis(50));

        tokio::time::sleep(Duration::from_millis(120)).await;
        monitor.stop().await;
    }

    #[tokio::test]
    async fn test_progress_monitor_zero_interval_is_clamped() {
        let monitor = ProgressMonitor::start(RunProgress::new(), Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(monitor.handle.as_ref().is_some_and(|h| !h.is_finished()));
        monitor.stop().await;
    }
}
