//! Task dispatch port: independent units of work run on a bounded worker pool.

use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};

/// Error reported by one unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TaskError(pub String);

impl TaskError {
    pub fn new(msg: impl Into<String>) -> Self {
        TaskError(msg.into())
    }
}

/// Failure to schedule work at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("no async runtime available to schedule '{0}'")]
    NoRuntime(String),
    #[error("dispatcher is shut down, refusing '{0}'")]
    ShutDown(String),
}

pub type Task = BoxFuture<'static, Result<(), TaskError>>;

/// Outcome of a batch once every task has finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchOutcome {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Work run once a batch completes, regardless of individual failures.
pub type Continuation = Box<dyn FnOnce(BatchOutcome) -> Task + Send>;

/// Handle to scheduled work. Dropping it does not cancel the work.
#[derive(Debug)]
pub struct TaskHandle {
    inner: JoinHandle<()>,
}

impl TaskHandle {
    /// Wait until the scheduled work (and any continuation) has finished.
    pub async fn wait(self) {
        if let Err(e) = self.inner.await {
            tracing::error!(error = %e, "Dispatched work panicked or was cancelled");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}

/// Scheduling port used by the orchestrators.
pub trait TaskDispatcher: Send + Sync + fmt::Debug {
    /// Schedule one task.
    fn schedule(&self, label: &str, task: Task) -> Result<TaskHandle, DispatchError>;

    /// Schedule a batch with allow-failures semantics: every task runs to
    /// completion (or timeout), then `then` receives the outcome.
    fn schedule_batch(
        &self,
        label: &str,
        tasks: Vec<Task>,
        then: Continuation,
    ) -> Result<TaskHandle, DispatchError>;
}

/// Tokio-backed dispatcher with a concurrency bound and per-task timeout.
#[derive(Debug, Clone)]
pub struct TokioDispatcher {
    permits: Arc<Semaphore>,
    task_timeout: Duration,
}

impl TokioDispatcher {
    pub fn new(max_workers: usize, task_timeout: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_workers.max(1))),
            task_timeout,
        }
    }

    /// Refuse all further scheduling. Work already running is unaffected.
    pub fn shutdown(&self) {
        self.permits.close();
    }

    fn runtime(&self, label: &str) -> Result<tokio::runtime::Handle, DispatchError> {
        if self.permits.is_closed() {
            return Err(DispatchError::ShutDown(label.to_string()));
        }
        tokio::runtime::Handle::try_current()
            .map_err(|_| DispatchError::NoRuntime(label.to_string()))
    }

    async fn run_bounded(
        permits: Arc<Semaphore>,
        task_timeout: Duration,
        label: String,
        task: Task,
    ) -> Result<(), TaskError> {
        let _permit = permits
            .acquire_owned()
            .await
            .map_err(|_| TaskError::new(format!("{label}: dispatcher shut down")))?;
        match tokio::time::timeout(task_timeout, task).await {
            Ok(result) => result,
            Err(_) => Err(TaskError::new(format!(
                "{label}: timed out after {}s",
                task_timeout.as_secs()
            ))),
        }
    }
}

impl TaskDispatcher for TokioDispatcher {
    fn schedule(&self, label: &str, task: Task) -> Result<TaskHandle, DispatchError> {
        let runtime = self.runtime(label)?;
        let permits = self.permits.clone();
        let timeout = self.task_timeout;
        let label = label.to_string();
        let inner = runtime.spawn(async move {
            if let Err(e) = Self::run_bounded(permits, timeout, label.clone(), task).await {
                tracing::warn!(task = %label, error = %e, "Task failed");
            }
        });
        Ok(TaskHandle { inner })
    }

    fn schedule_batch(
        &self,
        label: &str,
        tasks: Vec<Task>,
        then: Continuation,
    ) -> Result<TaskHandle, DispatchError> {
        let runtime = self.runtime(label)?;
        let permits = self.permits.clone();
        let timeout = self.task_timeout;
        let label = label.to_string();

        let inner = runtime.spawn(async move {
            let mut set = JoinSet::new();
            for (index, task) in tasks.into_iter().enumerate() {
                let task_label = format!("{label}#{index}");
                set.spawn(Self::run_bounded(permits.clone(), timeout, task_label, task));
            }

            let mut outcome = BatchOutcome::default();
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok(Ok(())) => outcome.succeeded += 1,
                    Ok(Err(e)) => {
                        outcome.failed += 1;
                        tracing::warn!(batch = %label, error = %e, "Batch task failed");
                    }
                    Err(e) => {
                        outcome.failed += 1;
                        tracing::error!(batch = %label, error = %e, "Batch task panicked");
                    }
                }
            }

            tracing::info!(
                batch = %label,
                succeeded = outcome.succeeded,
                failed = outcome.failed,
                "Batch finished, running continuation"
            );
            if let Err(e) = then(outcome).await {
                tracing::error!(batch = %label, error = %e, "Batch continuation failed");
            }
        });
        Ok(TaskHandle { inner })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn dispatcher() -> TokioDispatcher {
        TokioDispatcher::new(2, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_schedule_runs_task() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let handle = dispatcher()
            .schedule(
                "one",
                async move {
                    h.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
                .boxed(),
            )
            .unwrap();
        handle.wait().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_batch_tolerates_failures_and_panics() {
        let seen = Arc::new(Mutex::new(None));
        let s = seen.clone();
        let tasks: Vec<Task> = vec![
            async { Ok(()) }.boxed(),
            async { Err(TaskError::new("boom")) }.boxed(),
            async { panic!("worker crashed") }.boxed(),
            async { Ok(()) }.boxed(),
        ];
        let handle = dispatcher()
            .schedule_batch(
                "batch",
                tasks,
                Box::new(move |outcome: BatchOutcome| {
                    async move {
                        *s.lock().unwrap() = Some(outcome);
                        Ok::<(), TaskError>(())
                    }
                    .boxed()
                }),
            )
            .unwrap();
        handle.wait().await;

        let outcome = seen.lock().unwrap().unwrap();
        assert_eq!(outcome, BatchOutcome { succeeded: 2, failed: 2 });
        assert_eq!(outcome.total(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_timeout_counts_as_failure() {
        let d = TokioDispatcher::new(1, Duration::from_secs(1));
        let seen = Arc::new(Mutex::new(None));
        let s = seen.clone();
        let handle = d
            .schedule_batch(
                "slow",
                vec![async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                }
                .boxed()],
                Box::new(move |outcome: BatchOutcome| {
                    async move {
                        *s.lock().unwrap() = Some(outcome);
                        Ok::<(), TaskError>(())
                    }
                    .boxed()
                }),
            )
            .unwrap();
        handle.wait().await;
        assert_eq!(seen.lock().unwrap().unwrap().failed, 1);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let d = TokioDispatcher::new(2, Duration::from_secs(5));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<Task> = (0..8)
            .map(|_| {
                let running = running.clone();
                let peak = peak.clone();
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
                .boxed()
            })
            .collect();
        d.schedule_batch("bounded", tasks, Box::new(|_: BatchOutcome| async { Ok::<(), TaskError>(()) }.boxed()))
            .unwrap()
            .wait()
            .await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_work() {
        let d = dispatcher();
        d.shutdown();
        let err = d.schedule("late", async { Ok(()) }.boxed()).unwrap_err();
        assert!(matches!(err, DispatchError::ShutDown(_)));
    }

    #[test]
    fn test_schedule_without_runtime_fails() {
        let err = dispatcher()
            .schedule("orphan", async { Ok(()) }.boxed())
            .unwrap_err();
        assert!(matches!(err, DispatchError::NoRuntime(_)));
    }
}
