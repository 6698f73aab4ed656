use crate::db::Repository;
use crate::domain::{CarrierRecord, Period, PeriodParseError};
use crate::engine::{calculate, CalculationResult, CalculationSnapshot};
use std::sync::Arc;
use thiserror::Error;

/// Loads calculation inputs from the repository and runs the pure engine.
#[derive(Clone)]
pub struct Calculator {
    repo: Arc<Repository>,
}

#[derive(Debug, Error)]
pub enum CalculationError {
    #[error(transparent)]
    Period(#[from] PeriodParseError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

impl Calculator {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }

    /// Directory, recharge and latest-term snapshot for one calculation run.
    pub async fn load_snapshot(&self, period: Period) -> Result<CalculationSnapshot, CalculationError> {
        let subscribers = self.repo.list_subscribers().await?;
        let stores = self.repo.list_stores().await?;
        let recharges = self.repo.recharge_events(period).await?;
        let terms = self.repo.latest_terms().await?;

        tracing::debug!(
            period = %period,
            subscribers = subscribers.len(),
            stores = stores.len(),
            recharges = recharges.len(),
            terms = terms.len(),
            "Loaded calculation snapshot"
        );
        Ok(CalculationSnapshot::new(&subscribers, stores, &recharges, terms))
    }

    /// Calculate a period from its `YYYY-MM` label.
    ///
    /// With `record_ids`, only those consolidated records are calculated;
    /// otherwise every unconsumed consolidated record of the period.
    pub async fn calculate(
        &self,
        period: &str,
        record_ids: Option<&[i64]>,
    ) -> Result<CalculationResult, CalculationError> {
        let period: Period = period.parse()?;
        let snapshot = self.load_snapshot(period).await?;
        self.calculate_with(&snapshot, period, record_ids).await
    }

    /// Calculate against an already-loaded snapshot.
    pub async fn calculate_with(
        &self,
        snapshot: &CalculationSnapshot,
        period: Period,
        record_ids: Option<&[i64]>,
    ) -> Result<CalculationResult, CalculationError> {
        let records = match record_ids {
            Some(ids) => self.records_in_period(ids, period).await?,
            None => {
                let ids = self.repo.unconsumed_consolidated_ids(period).await?;
                self.repo.consolidated_records_by_ids(&ids).await?
            }
        };
        Ok(calculate(&records, snapshot))
    }

    async fn records_in_period(
        &self,
        ids: &[i64],
        period: Period,
    ) -> Result<Vec<CarrierRecord>, CalculationError> {
        let mut records = self.repo.consolidated_records_by_ids(ids).await?;
        let before = records.len();
        records.retain(|r| r.period == period);
        if records.len() != before {
            tracing::warn!(
                period = %period,
                dropped = before - records.len(),
                "Ignoring records from another period"
            );
        }
        Ok(records)
    }
}
