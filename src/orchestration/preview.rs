//! Chunked parallel preview of a period's settlements.
//!
//! `start` partitions the unconsumed consolidated records into chunks, runs
//! one worker per chunk on the dispatcher and returns immediately. Workers
//! store partial per-store buckets in the key-value store and bump a shared
//! progress counter; a continuation merges the partials with the period's
//! closed settlements into the final listing.
//!
//! Key layout per job: `<job>:progress`, `<job>:chunk:<i>`, `<job>:result`.

use crate::config::Config;
use crate::db::Repository;
use crate::domain::Period;
use crate::engine::{
    calculate, progress_step, CalculationSnapshot, PreviewListing, PreviewMerger, StoreBucket,
};
use crate::orchestration::calculator::{CalculationError, Calculator};
use crate::runtime::{
    get_json, put_json, put_once_json, take_json, BatchOutcome, DispatchError, KeyValueStore, KvError, Task,
    TaskDispatcher, TaskError, TaskHandle,
};
use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

/// Progress value once the merged result is stored.
pub const PROGRESS_DONE: i64 = 100;
/// Progress value of a job that failed to schedule or merge.
pub const PROGRESS_FAILED: i64 = -1;

#[derive(Debug, Error)]
pub enum PreviewError {
    #[error(transparent)]
    Calculation(#[from] CalculationError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Kv(#[from] KvError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("partial for chunk {0} already stored")]
    ChunkAlreadyStored(usize),
}

/// Returned by `start`; the handle resolves once the merge stage finished.
#[derive(Debug)]
pub struct PreviewTicket {
    pub job_key: String,
    pub record_count: usize,
    pub chunk_count: usize,
    pub handle: Option<TaskHandle>,
}

impl PreviewTicket {
    /// Wait for the whole job, merge included. No-op for empty previews.
    pub async fn wait(self) {
        if let Some(handle) = self.handle {
            handle.wait().await;
        }
    }
}

#[derive(Clone)]
pub struct PreviewOrchestrator {
    calculator: Arc<Calculator>,
    repo: Arc<Repository>,
    kv: Arc<dyn KeyValueStore>,
    dispatcher: Arc<dyn TaskDispatcher>,
    chunk_size: usize,
    chunk_ttl: Duration,
    result_ttl: Duration,
}

fn progress_key(job_key: &str) -> String {
    format!("{job_key}:progress")
}

fn chunk_key(job_key: &str, index: usize) -> String {
    format!("{job_key}:chunk:{index}")
}

fn result_key(job_key: &str) -> String {
    format!("{job_key}:result")
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl PreviewOrchestrator {
    pub fn new(
        calculator: Arc<Calculator>,
        repo: Arc<Repository>,
        kv: Arc<dyn KeyValueStore>,
        dispatcher: Arc<dyn TaskDispatcher>,
        config: &Config,
    ) -> Self {
        Self {
            calculator,
            repo,
            kv,
            dispatcher,
            chunk_size: config.chunk_size.max(1),
            chunk_ttl: config.chunk_ttl,
            result_ttl: config.result_ttl,
        }
    }

    /// Override the chunk size (tests exercise every size).
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Schedule a preview for `period` and return without waiting for it.
    pub async fn start(&self, period: Period) -> Result<PreviewTicket, PreviewError> {
        let job_key = format!("preview:{}", uuid::Uuid::new_v4());
        let progress = progress_key(&job_key);

        let ids = self.repo.unconsumed_consolidated_ids(period).await?;
        self.kv.set_counter(&progress, 0, self.result_ttl).await?;

        if ids.is_empty() {
            // No pending records, but closed settlements still belong in the listing.
            info!(job_key = %job_key, period = %period, "No pending records, merging closed settlements only");
            if let Err(e) = self.finalize(&job_key, period, 0).await {
                error!(job_key = %job_key, error = %e, "Preview merge failed");
                self.kv
                    .set_counter(&progress, PROGRESS_FAILED, self.result_ttl)
                    .await?;
                return Err(e);
            }
            return Ok(PreviewTicket {
                job_key,
                record_count: 0,
                chunk_count: 0,
                handle: None,
            });
        }

        // One snapshot for the whole job keeps term ranking global.
        let snapshot = Arc::new(self.calculator.load_snapshot(period).await?);

        let chunks: Vec<Vec<i64>> = ids.chunks(self.chunk_size).map(<[i64]>::to_vec).collect();
        let chunk_count = chunks.len();
        let tasks: Vec<Task> = chunks
            .into_iter()
            .enumerate()
            .map(|(index, chunk)| {
                let this = self.clone();
                let job_key = job_key.clone();
                let snapshot = snapshot.clone();
                async move {
                    this.run_chunk(&job_key, index, chunk_count, &chunk, &snapshot)
                        .await
                        .map_err(|e| TaskError::new(format!("chunk {index}: {e}")))
                }
                .boxed()
            })
            .collect();

        let this = self.clone();
        let merge_job = job_key.clone();
        let scheduled = self.dispatcher.schedule_batch(
            &job_key,
            tasks,
            Box::new(move |outcome: BatchOutcome| {
                async move {
                    if outcome.failed > 0 {
                        warn!(
                            job_key = %merge_job,
                            failed = outcome.failed,
                            "Some preview chunks failed, merging what is available"
                        );
                    }
                    this.finalize_or_flag(&merge_job, period, chunk_count).await;
                    Ok::<(), TaskError>(())
                }
                .boxed()
            }),
        );

        let handle = match scheduled {
            Ok(handle) => handle,
            Err(e) => {
                error!(job_key = %job_key, error = %e, "Failed to schedule preview chunks");
                self.kv
                    .set_counter(&progress, PROGRESS_FAILED, self.result_ttl)
                    .await?;
                return Err(e.into());
            }
        };

        info!(
            job_key = %job_key,
            period = %period,
            records = ids.len(),
            chunks = chunk_count,
            "Preview scheduled"
        );
        Ok(PreviewTicket {
            job_key,
            record_count: ids.len(),
            chunk_count,
            handle: Some(handle),
        })
    }

    async fn run_chunk(
        &self,
        job_key: &str,
        index: usize,
        chunk_count: usize,
        ids: &[i64],
        snapshot: &CalculationSnapshot,
    ) -> Result<(), PreviewError> {
        let records = self.repo.consolidated_records_by_ids(ids).await?;
        let buckets: Vec<StoreBucket> = calculate(&records, snapshot).into_buckets();

        if !put_once_json(&*self.kv, &chunk_key(job_key, index), &buckets, self.chunk_ttl).await? {
            return Err(PreviewError::ChunkAlreadyStored(index));
        }
        self.kv
            .increment(
                &progress_key(job_key),
                progress_step(index, chunk_count),
                self.result_ttl,
            )
            .await?;
        Ok(())
    }

    async fn finalize_or_flag(&self, job_key: &str, period: Period, chunk_count: usize) {
        if let Err(e) = self.finalize(job_key, period, chunk_count).await {
            error!(job_key = %job_key, error = %e, "Preview merge failed");
            if let Err(e) = self
                .kv
                .set_counter(&progress_key(job_key), PROGRESS_FAILED, self.result_ttl)
                .await
            {
                error!(job_key = %job_key, error = %e, "Failed to flag preview as failed");
            }
        }
    }

    /// Merge closed settlements and every available chunk into the result.
    async fn finalize(
        &self,
        job_key: &str,
        period: Period,
        chunk_count: usize,
    ) -> Result<(), PreviewError> {
        let closed = self.repo.closed_settlements(period).await?;
        let mut merger = PreviewMerger::seeded(closed);

        for index in 0..chunk_count {
            match take_json::<Vec<StoreBucket>>(&*self.kv, &chunk_key(job_key, index)).await? {
                Some(buckets) => merger.absorb(buckets),
                None => warn!(job_key = %job_key, chunk = index, "Missing chunk partial, skipped"),
            }
        }

        let listing = merger.finish(now_ms());
        put_json(&*self.kv, &result_key(job_key), &listing, self.result_ttl).await?;
        self.kv
            .set_counter(&progress_key(job_key), PROGRESS_DONE, self.result_ttl)
            .await?;

        info!(
            job_key = %job_key,
            stores = listing.stores.len(),
            total = %listing.grand_total(),
            "Preview merged"
        );
        Ok(())
    }

    /// Progress in 0..=100, `-1` on failure, `None` for an unknown job.
    pub async fn progress(&self, job_key: &str) -> Result<Option<i64>, PreviewError> {
        Ok(self.kv.counter(&progress_key(job_key)).await?)
    }

    /// The merged listing, once available.
    pub async fn result(&self, job_key: &str) -> Result<Option<PreviewListing>, PreviewError> {
        Ok(get_json(&*self.kv, &result_key(job_key)).await?)
    }
}
