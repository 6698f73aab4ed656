//! Commercial sale terms per subscriber.

use crate::domain::{Decimal, Idpos, Period, SubscriberId};
use serde::{Deserialize, Serialize};

/// A commercial term as delivered by the ingestion collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermReport {
    pub subscriber_id: SubscriberId,
    pub idpos: Idpos,
    pub sale_price: Decimal,
    pub residual_percentage: Option<Decimal>,
    pub period: Period,
    pub created_at_ms: i64,
}

impl TermReport {
    /// Natural key: one term per subscriber, store, period and creation instant.
    pub fn term_key(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.subscriber_id, self.idpos, self.period, self.created_at_ms
        )
    }
}

/// A persisted commercial term.
///
/// Several terms may exist per subscriber; only the latest by
/// (period, created_at) is authoritative for a calculation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommercialTerm {
    pub id: i64,
    pub subscriber_id: SubscriberId,
    pub idpos: Idpos,
    pub sale_price: Decimal,
    pub residual_percentage: Option<Decimal>,
    pub period: Period,
    pub created_at_ms: i64,
}

impl CommercialTerm {
    /// Residual percentage, zero when the term does not define one.
    pub fn residual_percent(&self) -> Decimal {
        self.residual_percentage.unwrap_or_default()
    }
}
