//! Settlement aggregates, their commission lines, ledger movements and
//! background job records.

use crate::domain::{Decimal, Idpos, Period, StoreId, SubscriberId};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Settlement status. Closed settlements are immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    Draft,
    Closed,
}

impl SettlementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementStatus::Draft => "draft",
            SettlementStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(SettlementStatus::Draft),
            "closed" => Some(SettlementStatus::Closed),
            _ => None,
        }
    }
}

impl std::fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A versioned settlement (liquidation) for one store and period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settlement {
    pub id: i64,
    pub store_id: StoreId,
    pub period: Period,
    pub version: i64,
    pub status: SettlementStatus,
    pub gross_amount: Decimal,
    pub net_amount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    pub created_at_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at_ms: Option<i64>,
}

/// One computed commission line.
///
/// Produced by the calculation engine and persisted verbatim as a settlement
/// line when a settlement is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionLine {
    pub carrier_record_id: i64,
    pub subscriber_id: Option<SubscriberId>,
    pub phone: Option<String>,
    pub iccid: Option<String>,
    pub store_id: StoreId,
    pub idpos: Option<Idpos>,
    pub commercial_term_id: Option<i64>,
    pub sale_price: Option<Decimal>,
    pub commission_split_a: Decimal,
    pub commission_split_b: Decimal,
    pub commission_total: Decimal,
    pub carrier_total_recharge: Decimal,
    pub recharge_period_amount: Decimal,
    pub recharge_amount: Decimal,
    pub base_real: Decimal,
    pub residual_percent: Decimal,
    pub payout: Decimal,
    pub activation_date: Option<NaiveDate>,
    pub cutoff_date: Option<NaiveDate>,
}

/// A credit against a store's running balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: i64,
    pub store_id: StoreId,
    pub settlement_id: i64,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    pub created_at_ms: i64,
}

/// Status of a background settlement batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    CompletedWithFailures,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::CompletedWithFailures => "completed_with_failures",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "completed_with_failures" => Some(JobStatus::CompletedWithFailures),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

/// Persisted progress record for a multi-store commit batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundJob {
    pub id: String,
    pub period: Period,
    pub total: i64,
    pub processed: i64,
    pub failed: i64,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at_ms: Option<i64>,
}
