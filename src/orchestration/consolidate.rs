use crate::db::Repository;
use crate::domain::Period;
use crate::engine::{consolidate_records, fingerprint};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Rebuilds the consolidated carrier set of a period.
#[derive(Clone)]
pub struct PeriodConsolidator {
    repo: Arc<Repository>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationReport {
    pub period: Period,
    pub raw_count: usize,
    /// Groups in the consolidated set (inserted + held).
    pub consolidated_count: usize,
    pub inserted: usize,
    /// Groups with records a settlement line already consumed.
    pub held: usize,
    /// Held groups that grew since settlement and got a supplementary record.
    pub supplemented: usize,
    pub removed: usize,
    /// SHA-256 over the consolidated set, stable across identical runs.
    pub fingerprint: String,
}

#[derive(Debug, Error)]
pub enum ConsolidationError {
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

impl PeriodConsolidator {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }

    /// Fold every raw record of `period` into one consolidated record per
    /// subscriber group. Running it twice yields the same set.
    pub async fn consolidate(&self, period: Period) -> Result<ConsolidationReport, ConsolidationError> {
        let raw = self.repo.raw_carrier_records(period).await?;
        if raw.is_empty() {
            tracing::info!(period = %period, "No raw carrier records, nothing to consolidate");
            return Ok(ConsolidationReport {
                period,
                raw_count: 0,
                consolidated_count: 0,
                inserted: 0,
                held: 0,
                supplemented: 0,
                removed: 0,
                fingerprint: fingerprint(&[]),
            });
        }

        let groups = consolidate_records(&raw);
        let records: Vec<_> = groups.iter().map(|(_, r)| r.clone()).collect();
        let digest = fingerprint(&records);

        let outcome = self.repo.replace_consolidated(period, &groups).await?;
        if outcome.held > 0 {
            tracing::info!(
                period = %period,
                held = outcome.held,
                supplemented = outcome.supplemented,
                "Consumed consolidated records kept as-is"
            );
        }

        tracing::info!(
            period = %period,
            raw = raw.len(),
            groups = groups.len(),
            fingerprint = %digest,
            "Consolidated carrier records"
        );

        Ok(ConsolidationReport {
            period,
            raw_count: raw.len(),
            consolidated_count: groups.len(),
            inserted: outcome.inserted,
            held: outcome.held,
            supplemented: outcome.supplemented,
            removed: outcome.removed,
            fingerprint: digest,
        })
    }
}
