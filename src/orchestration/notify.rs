use crate::domain::{JobStatus, Period};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;

/// Summary delivered when a multi-store commit batch finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub job_id: String,
    pub period: Period,
    pub total: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub status: JobStatus,
    pub actor_id: Option<String>,
}

/// Delivery channel for batch summaries. Email or push delivery live behind
/// this trait outside the engine.
#[async_trait]
pub trait BatchNotifier: Send + Sync + fmt::Debug {
    async fn notify(&self, summary: &BatchSummary);
}

/// Emits the summary as a tracing event.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl BatchNotifier for LogNotifier {
    async fn notify(&self, summary: &BatchSummary) {
        if summary.failed == 0 {
            tracing::info!(
                job_id = %summary.job_id,
                period = %summary.period,
                total = summary.total,
                "Settlement batch completed"
            );
        } else {
            tracing::warn!(
                job_id = %summary.job_id,
                period = %summary.period,
                total = summary.total,
                succeeded = summary.succeeded,
                failed = summary.failed,
                status = summary.status.as_str(),
                "Settlement batch completed with failures"
            );
        }
    }
}
