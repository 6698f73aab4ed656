//! In-memory record feed for tests and local runs.

use super::{FeedError, RecordFeed};
use crate::domain::{CarrierReport, Period, RechargeReport, TermReport};
use async_trait::async_trait;

/// Feed that returns predefined reports; carrier records are filtered by period.
#[derive(Debug, Clone, Default)]
pub struct MockRecordFeed {
    carrier: Vec<CarrierReport>,
    recharges: Vec<RechargeReport>,
    terms: Vec<TermReport>,
    failure: Option<FeedError>,
}

impl MockRecordFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_carrier_record(mut self, report: CarrierReport) -> Self {
        self.carrier.push(report);
        self
    }

    pub fn with_carrier_records(mut self, reports: Vec<CarrierReport>) -> Self {
        self.carrier.extend(reports);
        self
    }

    pub fn with_recharge(mut self, report: RechargeReport) -> Self {
        self.recharges.push(report);
        self
    }

    pub fn with_term(mut self, report: TermReport) -> Self {
        self.terms.push(report);
        self
    }

    /// Make every fetch fail with `error`.
    pub fn failing(mut self, error: FeedError) -> Self {
        self.failure = Some(error);
        self
    }

    fn check(&self) -> Result<(), FeedError> {
        match &self.failure {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RecordFeed for MockRecordFeed {
    async fn fetch_carrier_records(
        &self,
        period: Period,
    ) -> Result<Vec<CarrierReport>, FeedError> {
        self.check()?;
        Ok(self
            .carrier
            .iter()
            .filter(|r| r.period == period)
            .cloned()
            .collect())
    }

    /// Recharges are returned unfiltered; the ingestor checks their labels.
    async fn fetch_recharges(&self, _period: Period) -> Result<Vec<RechargeReport>, FeedError> {
        self.check()?;
        Ok(self.recharges.clone())
    }

    async fn fetch_terms(&self, _period: Period) -> Result<Vec<TermReport>, FeedError> {
        self.check()?;
        Ok(self.terms.clone())
    }
}
