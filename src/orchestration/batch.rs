//! Multi-store settlement batches.
//!
//! Stores are split into batches of `store_batch_size`, one dispatcher task
//! per batch. Each task commits its stores one by one and bumps the job's
//! counters after every store, so one store failing never affects its
//! siblings. The continuation finalizes the job and sends the summary.

use crate::config::Config;
use crate::db::Repository;
use crate::domain::{BackgroundJob, JobStatus, Period, StoreId};
use crate::orchestration::calculator::Calculator;
use crate::orchestration::commit::SettlementCommitter;
use crate::orchestration::notify::{BatchNotifier, BatchSummary};
use crate::runtime::{BatchOutcome, DispatchError, Task, TaskDispatcher, TaskError, TaskHandle};
use futures::FutureExt;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("no stores given")]
    NoStores,
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

#[derive(Debug)]
pub struct BatchTicket {
    pub job_id: String,
    pub total: usize,
    pub handle: TaskHandle,
}

impl BatchTicket {
    /// Wait until the job is finalized and the summary sent.
    pub async fn wait(self) {
        self.handle.wait().await;
    }
}

#[derive(Clone)]
pub struct BatchCommitOrchestrator {
    committer: SettlementCommitter,
    calculator: Arc<Calculator>,
    repo: Arc<Repository>,
    dispatcher: Arc<dyn TaskDispatcher>,
    notifier: Arc<dyn BatchNotifier>,
    store_batch_size: usize,
}

/// Final status from the job counters.
fn final_status(total: i64, failed: i64) -> JobStatus {
    if failed == 0 {
        JobStatus::Completed
    } else if failed >= total {
        JobStatus::Failed
    } else {
        JobStatus::CompletedWithFailures
    }
}

impl BatchCommitOrchestrator {
    pub fn new(
        committer: SettlementCommitter,
        calculator: Arc<Calculator>,
        repo: Arc<Repository>,
        dispatcher: Arc<dyn TaskDispatcher>,
        notifier: Arc<dyn BatchNotifier>,
        config: &Config,
    ) -> Self {
        Self {
            committer,
            calculator,
            repo,
            dispatcher,
            notifier,
            store_batch_size: config.store_batch_size.max(1),
        }
    }

    pub fn with_store_batch_size(mut self, size: usize) -> Self {
        self.store_batch_size = size.max(1);
        self
    }

    /// Create the job record, schedule the store batches and return its id.
    pub async fn start(
        &self,
        period: Period,
        store_ids: Vec<StoreId>,
        actor_id: Option<String>,
    ) -> Result<BatchTicket, BatchError> {
        let mut seen = HashSet::new();
        let stores: Vec<StoreId> = store_ids.into_iter().filter(|s| seen.insert(*s)).collect();
        if stores.is_empty() {
            return Err(BatchError::NoStores);
        }

        let job_id = uuid::Uuid::new_v4().to_string();
        let total = stores.len();
        self.repo
            .create_job(&BackgroundJob {
                id: job_id.clone(),
                period,
                total: total as i64,
                processed: 0,
                failed: 0,
                status: JobStatus::Running,
                error: None,
                created_at_ms: chrono::Utc::now().timestamp_millis(),
                finished_at_ms: None,
            })
            .await?;

        let tasks: Vec<Task> = stores
            .chunks(self.store_batch_size)
            .map(|batch| {
                let this = self.clone();
                let job_id = job_id.clone();
                let actor_id = actor_id.clone();
                let batch = batch.to_vec();
                async move { this.run_batch(&job_id, period, &batch, actor_id.as_deref()).await }
                    .boxed()
            })
            .collect();
        let batches = tasks.len();

        let this = self.clone();
        let finish_job = job_id.clone();
        let finish_actor = actor_id.clone();
        let scheduled = self.dispatcher.schedule_batch(
            &job_id,
            tasks,
            Box::new(move |outcome: BatchOutcome| {
                async move {
                    if outcome.failed > 0 {
                        warn!(
                            job_id = %finish_job,
                            failed_tasks = outcome.failed,
                            "Some store batches did not finish"
                        );
                    }
                    this.finalize(&finish_job, period, finish_actor).await;
                    Ok::<(), TaskError>(())
                }
                .boxed()
            }),
        );

        let handle = match scheduled {
            Ok(handle) => handle,
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Failed to schedule settlement batch");
                self.repo
                    .finish_job(&job_id, JobStatus::Failed, Some(&e.to_string()))
                    .await?;
                return Err(e.into());
            }
        };

        info!(
            job_id = %job_id,
            period = %period,
            stores = total,
            batches,
            "Settlement batch scheduled"
        );
        Ok(BatchTicket {
            job_id,
            total,
            handle,
        })
    }

    async fn run_batch(
        &self,
        job_id: &str,
        period: Period,
        stores: &[StoreId],
        actor_id: Option<&str>,
    ) -> Result<(), TaskError> {
        let snapshot = match self.calculator.load_snapshot(period).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Failed to load calculation snapshot");
                let n = stores.len() as i64;
                self.record(job_id, n, n).await;
                return Err(TaskError::new(e.to_string()));
            }
        };

        for &store_id in stores {
            match self
                .committer
                .commit_with(&snapshot, store_id, period, actor_id, true)
                .await
            {
                Ok(receipt) => {
                    if receipt.ledger_entry.is_none() {
                        warn!(job_id = %job_id, store_id = %store_id, "Closed without ledger entry");
                    }
                    self.record(job_id, 1, 0).await;
                }
                Err(e) => {
                    warn!(job_id = %job_id, store_id = %store_id, error = %e, "Store settlement failed");
                    self.record(job_id, 1, 1).await;
                }
            }
        }
        Ok(())
    }

    async fn record(&self, job_id: &str, processed: i64, failed: i64) {
        if let Err(e) = self.repo.record_job_progress(job_id, processed, failed).await {
            error!(job_id = %job_id, error = %e, "Failed to record batch progress");
        }
    }

    /// Account for stores no task reached, close the job and notify.
    async fn finalize(&self, job_id: &str, period: Period, actor_id: Option<String>) {
        let job = match self.repo.get_job(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                error!(job_id = %job_id, "Batch job vanished before finalizing");
                return;
            }
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Failed to load batch job");
                return;
            }
        };

        let unreached = job.total - job.processed;
        if unreached > 0 {
            warn!(job_id = %job_id, unreached, "Stores never processed, counted as failed");
            self.record(job_id, unreached, unreached).await;
        }
        let failed = job.failed + unreached.max(0);
        let status = final_status(job.total, failed);
        let message = (failed > 0).then(|| format!("{failed} of {} stores failed", job.total));

        if let Err(e) = self.repo.finish_job(job_id, status, message.as_deref()).await {
            error!(job_id = %job_id, error = %e, "Failed to finish batch job");
        }

        self.notifier
            .notify(&BatchSummary {
                job_id: job_id.to_string(),
                period,
                total: job.total,
                succeeded: job.total - failed,
                failed,
                status,
                actor_id,
            })
            .await;
    }

    pub async fn job_status(&self, job_id: &str) -> Result<Option<BackgroundJob>, BatchError> {
        Ok(self.repo.get_job(job_id).await?)
    }
}
