//! Repository layer for database operations.
//!
//! This module provides the `Repository` struct for all database operations.
//! Methods are organized across submodules by domain:
//! - `carrier.rs` - Raw and consolidated carrier records, consumption queries
//! - `directory.rs` - Stores, subscribers, recharges and commercial terms
//! - `settlements.rs` - Settlement writes, closed settlements and the ledger
//! - `jobs.rs` - Background job bookkeeping

mod carrier;
mod directory;
mod jobs;
mod settlements;

pub use carrier::ReplaceOutcome;
pub use settlements::{SettlementDraft, SettlementWriteError, WriteOutcome};

use crate::domain::{Decimal, Period};
use chrono::NaiveDate;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::warn;

/// Repository for database operations.
#[derive(Debug)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    /// Cheap liveness probe used by the readiness endpoint.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Read a money column. Unparseable values degrade to zero with a warning.
fn decimal_col(row: &SqliteRow, column: &str) -> Decimal {
    let raw: String = row.get(column);
    Decimal::from_str(&raw).unwrap_or_else(|e| {
        warn!(column, value = %raw, error = %e, "Failed to parse decimal column, using zero");
        Decimal::default()
    })
}

fn opt_decimal_col(row: &SqliteRow, column: &str) -> Option<Decimal> {
    let raw: Option<String> = row.get(column);
    raw.and_then(|raw| match Decimal::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(column, value = %raw, error = %e, "Failed to parse optional decimal column");
            None
        }
    })
}

fn date_col(row: &SqliteRow, column: &str) -> Option<NaiveDate> {
    let raw: Option<String> = row.get(column);
    raw.and_then(|raw| match NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
        Ok(date) => Some(date),
        Err(e) => {
            warn!(column, value = %raw, error = %e, "Failed to parse date column");
            None
        }
    })
}

fn period_col(row: &SqliteRow) -> Result<Period, sqlx::Error> {
    let year: i32 = row.get("period_year");
    let month: i64 = row.get("period_month");
    Period::new(year, month as u32).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

fn date_text(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.format("%Y-%m-%d").to_string())
}
