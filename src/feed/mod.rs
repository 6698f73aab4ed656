//! Record feed abstraction: the ingestion collaborator that delivers parsed
//! carrier reports, recharge events and commercial terms per period.

use crate::domain::{CarrierReport, Period, RechargeReport, TermReport};
use async_trait::async_trait;
use std::fmt;

pub mod mock;

pub use mock::MockRecordFeed;

/// Source of already-parsed per-period records.
///
/// Implementations own file parsing and type detection; the engine only sees
/// typed reports.
#[async_trait]
pub trait RecordFeed: Send + Sync + fmt::Debug {
    /// Carrier usage/commission reports for a billing period, every cutoff.
    async fn fetch_carrier_records(&self, period: Period)
        -> Result<Vec<CarrierReport>, FeedError>;

    /// Recharge (top-up) events whose period label falls in `period`.
    async fn fetch_recharges(&self, period: Period) -> Result<Vec<RechargeReport>, FeedError>;

    /// Current commercial sale terms. Terms are not scoped to `period`; the
    /// latest one per subscriber applies to every calculation.
    async fn fetch_terms(&self, period: Period) -> Result<Vec<TermReport>, FeedError>;
}

/// Error type for feed operations.
#[derive(Debug, Clone)]
pub enum FeedError {
    /// The upstream source could not be reached
    Unavailable(String),
    /// A delivered batch could not be decoded
    Malformed(String),
    /// Other error
    Other(String),
}

impl fmt::Display for FeedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedError::Unavailable(msg) => write!(f, "Feed unavailable: {}", msg),
            FeedError::Malformed(msg) => write!(f, "Malformed feed batch: {}", msg),
            FeedError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for FeedError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_error_display() {
        let err = FeedError::Unavailable("connection refused".to_string());
        assert_eq!(err.to_string(), "Feed unavailable: connection refused");

        let err = FeedError::Malformed("missing period".to_string());
        assert_eq!(err.to_string(), "Malformed feed batch: missing period");
    }
}
