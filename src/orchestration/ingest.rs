use crate::db::Repository;
use crate::domain::Period;
use crate::feed::{FeedError, RecordFeed};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Pulls a period's records from the feed into the repository.
#[derive(Clone)]
pub struct Ingestor {
    feed: Arc<dyn RecordFeed>,
    repo: Arc<Repository>,
}

impl Ingestor {
    pub fn new(feed: Arc<dyn RecordFeed>, repo: Arc<Repository>) -> Self {
        Self { feed, repo }
    }

    /// Ingest carrier reports, recharges and terms for `period`.
    ///
    /// Every insert is keyed, so re-ingesting the same feed is a no-op.
    /// Recharges whose label names another period are skipped; labels that
    /// cannot be parsed are attributed to the requested period.
    pub async fn ingest_period(&self, period: Period) -> Result<IngestionResult, IngestionError> {
        let carrier = self.feed.fetch_carrier_records(period).await?;
        let carrier_new = self.repo.insert_carrier_reports(&carrier).await?;

        let recharges = self.feed.fetch_recharges(period).await?;
        let recharges_fetched = recharges.len();
        let in_period: Vec<_> = recharges
            .into_iter()
            .filter(|r| match Period::from_label(&r.period_label) {
                Ok(label_period) => label_period == period,
                Err(e) => {
                    tracing::warn!(
                        label = %r.period_label,
                        error = %e,
                        "Unparseable recharge period label, attributing to requested period"
                    );
                    true
                }
            })
            .collect();
        let recharges_new = self.repo.insert_recharge_events(period, &in_period).await?;

        let terms = self.feed.fetch_terms(period).await?;
        let terms_new = self.repo.insert_term_reports(&terms).await?;

        let result = IngestionResult {
            period,
            carrier_fetched: carrier.len(),
            carrier_new,
            recharges_fetched,
            recharges_skipped: recharges_fetched - in_period.len(),
            recharges_new,
            terms_fetched: terms.len(),
            terms_new,
        };
        tracing::info!(
            period = %period,
            carrier_new = result.carrier_new,
            recharges_new = result.recharges_new,
            terms_new = result.terms_new,
            "Ingested period"
        );
        Ok(result)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionResult {
    pub period: Period,
    pub carrier_fetched: usize,
    pub carrier_new: usize,
    pub recharges_fetched: usize,
    pub recharges_skipped: usize,
    pub recharges_new: usize,
    pub terms_fetched: usize,
    pub terms_new: usize,
}

#[derive(Debug, Error)]
pub enum IngestionError {
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}
