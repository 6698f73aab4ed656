//! Carrier record operations for the repository.

use crate::domain::{CarrierRecord, CarrierReport, Decimal, Period, SubscriberId};
use crate::engine::{ConsolidatedRecord, GroupKey};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};
use std::collections::HashMap;
use tracing::warn;

use super::{date_col, date_text, decimal_col, now_ms, opt_decimal_col, period_col, Repository};

const CARRIER_COLUMNS: &str = "id, subscriber_id, phone, iccid, period_year, period_month, \
     commission_split_a, commission_split_b, recharge_period_amount, carrier_total_recharge, \
     activation_date, cutoff_date, commission_status, transaction_code, source_cutoffs, \
     is_consolidated, settlement_line_id, settled_carrier_total";

/// Separates a group's base key from a supplementary record's suffix.
const SUPPLEMENT_MARKER: &str = ":delta:";

/// SQLite caps bound parameters per statement; id lookups are split below it.
const ID_BATCH: usize = 500;

/// Result of rebuilding a period's consolidated set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaceOutcome {
    /// Unconsumed consolidated records deleted before the rebuild.
    pub removed: usize,
    pub inserted: usize,
    /// Groups with records already consumed by a settlement line; those
    /// records are left untouched.
    pub held: usize,
    /// Supplementary records inserted for held groups that grew since they
    /// were consumed.
    pub supplemented: usize,
}

fn encode_cutoffs(labels: &[String]) -> String {
    serde_json::to_string(labels).unwrap_or_else(|_| "[]".to_string())
}

fn carrier_from_row(row: &SqliteRow) -> Result<CarrierRecord, sqlx::Error> {
    let id: i64 = row.get("id");
    let cutoffs_raw: String = row.get("source_cutoffs");
    let source_cutoffs = serde_json::from_str::<Vec<String>>(&cutoffs_raw).unwrap_or_else(|e| {
        warn!(record_id = id, value = %cutoffs_raw, error = %e, "Failed to parse source cutoffs");
        Vec::new()
    });

    Ok(CarrierRecord {
        id,
        subscriber_id: row.get::<Option<i64>, _>("subscriber_id").map(SubscriberId::new),
        phone: row.get("phone"),
        iccid: row.get("iccid"),
        period: period_col(row)?,
        commission_split_a: decimal_col(row, "commission_split_a"),
        commission_split_b: decimal_col(row, "commission_split_b"),
        recharge_period_amount: decimal_col(row, "recharge_period_amount"),
        carrier_total_recharge: decimal_col(row, "carrier_total_recharge"),
        activation_date: date_col(row, "activation_date"),
        cutoff_date: date_col(row, "cutoff_date"),
        commission_status: row.get("commission_status"),
        transaction_code: row.get("transaction_code"),
        source_cutoffs,
        is_consolidated: row.get::<i64, _>("is_consolidated") != 0,
        settlement_line_id: row.get("settlement_line_id"),
        settled_carrier_total: opt_decimal_col(row, "settled_carrier_total"),
    })
}

/// Consumed consolidated records of a period keyed by their group's base key.
async fn consumed_by_group_tx(
    tx: &mut Transaction<'_, Sqlite>,
    period: Period,
) -> Result<HashMap<String, Vec<CarrierRecord>>, sqlx::Error> {
    let sql = format!(
        "SELECT record_key, {CARRIER_COLUMNS} FROM carrier_records
         WHERE period_year = ? AND period_month = ?
           AND is_consolidated = 1 AND settlement_line_id IS NOT NULL
         ORDER BY id ASC"
    );
    let rows = sqlx::query(&sql)
        .bind(period.year())
        .bind(period.month() as i64)
        .fetch_all(&mut **tx)
        .await?;

    let mut groups: HashMap<String, Vec<CarrierRecord>> = HashMap::new();
    for row in &rows {
        let key: String = row.get("record_key");
        let base = match key.rsplit_once(SUPPLEMENT_MARKER) {
            Some((base, id)) if id.parse::<i64>().is_ok() => base.to_string(),
            _ => key,
        };
        groups.entry(base).or_default().push(carrier_from_row(row)?);
    }
    Ok(groups)
}

async fn insert_consolidated_tx(
    tx: &mut Transaction<'_, Sqlite>,
    record_key: &str,
    record: &ConsolidatedRecord,
    settled_carrier_total: Option<Decimal>,
    created_at: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO carrier_records (
            record_key, subscriber_id, phone, iccid, period_year, period_month,
            commission_split_a, commission_split_b, recharge_period_amount,
            carrier_total_recharge, activation_date, cutoff_date, commission_status,
            transaction_code, source_cutoffs, is_consolidated, settled_carrier_total,
            created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
        "#,
    )
    .bind(record_key)
    .bind(record.subscriber_id.map(|s| s.as_i64()))
    .bind(record.phone.as_deref())
    .bind(record.iccid.as_deref())
    .bind(record.period.year())
    .bind(record.period.month() as i64)
    .bind(record.commission_split_a.to_canonical_string())
    .bind(record.commission_split_b.to_canonical_string())
    .bind(record.recharge_period_amount.to_canonical_string())
    .bind(record.carrier_total_recharge.to_canonical_string())
    .bind(date_text(record.activation_date))
    .bind(date_text(record.cutoff_date))
    .bind(record.commission_status.as_deref())
    .bind(record.transaction_code.as_deref())
    .bind(encode_cutoffs(&record.source_cutoffs))
    .bind(settled_carrier_total.map(|d| d.to_canonical_string()))
    .bind(created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

impl Repository {
    /// Insert raw carrier reports idempotently (keyed by `record_key`).
    ///
    /// Returns the number of newly inserted records.
    pub async fn insert_carrier_reports(
        &self,
        reports: &[CarrierReport],
    ) -> Result<usize, sqlx::Error> {
        if reports.is_empty() {
            return Ok(0);
        }

        let created_at = now_ms();
        let mut inserted = 0usize;
        let mut tx = self.pool.begin().await?;

        for report in reports {
            let result = sqlx::query(
                r#"
                INSERT INTO carrier_records (
                    record_key, subscriber_id, phone, iccid, period_year, period_month,
                    commission_split_a, commission_split_b, recharge_period_amount,
                    carrier_total_recharge, activation_date, cutoff_date, commission_status,
                    transaction_code, source_cutoffs, is_consolidated, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)
                ON CONFLICT(record_key) DO NOTHING
                "#,
            )
            .bind(report.record_key())
            .bind(report.subscriber_id.map(|s| s.as_i64()))
            .bind(report.phone.as_deref())
            .bind(report.iccid.as_deref())
            .bind(report.period.year())
            .bind(report.period.month() as i64)
            .bind(report.commission_split_a.to_canonical_string())
            .bind(report.commission_split_b.to_canonical_string())
            .bind(report.recharge_period_amount.to_canonical_string())
            .bind(report.carrier_total_recharge.to_canonical_string())
            .bind(date_text(report.activation_date))
            .bind(date_text(report.cutoff_date))
            .bind(report.commission_status.as_deref())
            .bind(report.transaction_code.as_deref())
            .bind(encode_cutoffs(&[report.source_cutoff_label.trim().to_string()]))
            .bind(created_at)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                inserted += 1;
            }
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// Raw (not consolidated) records for a period, in insertion order.
    pub async fn raw_carrier_records(
        &self,
        period: Period,
    ) -> Result<Vec<CarrierRecord>, sqlx::Error> {
        let sql = format!(
            "SELECT {CARRIER_COLUMNS} FROM carrier_records
             WHERE period_year = ? AND period_month = ? AND is_consolidated = 0
             ORDER BY id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(period.year())
            .bind(period.month() as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(carrier_from_row).collect()
    }

    /// Every consolidated record for a period, consumed or not.
    pub async fn consolidated_records(
        &self,
        period: Period,
    ) -> Result<Vec<CarrierRecord>, sqlx::Error> {
        let sql = format!(
            "SELECT {CARRIER_COLUMNS} FROM carrier_records
             WHERE period_year = ? AND period_month = ? AND is_consolidated = 1
             ORDER BY id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(period.year())
            .bind(period.month() as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(carrier_from_row).collect()
    }

    /// Rebuild the consolidated set of a period in one transaction.
    ///
    /// Unconsumed consolidated records are deleted and every group reinserted.
    /// A group with consumed records keeps them; if its raw records have grown
    /// since, a supplementary record carries the difference so the late money
    /// stays calculable.
    pub async fn replace_consolidated(
        &self,
        period: Period,
        groups: &[(GroupKey, ConsolidatedRecord)],
    ) -> Result<ReplaceOutcome, sqlx::Error> {
        let created_at = now_ms();
        let mut outcome = ReplaceOutcome::default();
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query(
            r#"
            DELETE FROM carrier_records
            WHERE period_year = ? AND period_month = ?
              AND is_consolidated = 1 AND settlement_line_id IS NULL
            "#,
        )
        .bind(period.year())
        .bind(period.month() as i64)
        .execute(&mut *tx)
        .await?;
        outcome.removed = removed.rows_affected() as usize;

        let mut consumed = consumed_by_group_tx(&mut tx, period).await?;

        for (key, record) in groups {
            let base_key = format!("consolidated:{period}:{key}");
            let Some(settled) = consumed.remove(&base_key) else {
                insert_consolidated_tx(&mut tx, &base_key, record, None, created_at).await?;
                outcome.inserted += 1;
                continue;
            };

            outcome.held += 1;
            if let Some(supplement) = record.outstanding(&settled) {
                let last_id = settled.iter().map(|r| r.id).max().unwrap_or_default();
                insert_consolidated_tx(
                    &mut tx,
                    &format!("{base_key}{SUPPLEMENT_MARKER}{last_id}"),
                    &supplement.record,
                    Some(supplement.settled_carrier_total),
                    created_at,
                )
                .await?;
                outcome.supplemented += 1;
            }
        }

        tx.commit().await?;
        Ok(outcome)
    }

    /// Ids of consolidated records of a period not yet consumed by any line.
    pub async fn unconsumed_consolidated_ids(&self, period: Period) -> Result<Vec<i64>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id FROM carrier_records
            WHERE period_year = ? AND period_month = ?
              AND is_consolidated = 1 AND settlement_line_id IS NULL
            ORDER BY id ASC
            "#,
        )
        .bind(period.year())
        .bind(period.month() as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|r| r.get::<i64, _>("id")).collect())
    }

    /// Load consolidated records by id, ordered by id.
    pub async fn consolidated_records_by_ids(
        &self,
        ids: &[i64],
    ) -> Result<Vec<CarrierRecord>, sqlx::Error> {
        let mut records = Vec::with_capacity(ids.len());
        for batch in ids.chunks(ID_BATCH) {
            let placeholders = vec!["?"; batch.len()].join(", ");
            let sql = format!(
                "SELECT {CARRIER_COLUMNS} FROM carrier_records
                 WHERE is_consolidated = 1 AND id IN ({placeholders})"
            );
            let mut query = sqlx::query(&sql);
            for id in batch {
                query = query.bind(*id);
            }
            let rows = query.fetch_all(&self.pool).await?;
            for row in &rows {
                records.push(carrier_from_row(row)?);
            }
        }
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    /// Consolidated records a commit may settle: unconsumed ones plus those
    /// held by the given non-closed settlement (released on regeneration).
    pub async fn commit_candidates(
        &self,
        period: Period,
        held_by_settlement: Option<i64>,
    ) -> Result<Vec<CarrierRecord>, sqlx::Error> {
        let sql = format!(
            "SELECT {CARRIER_COLUMNS} FROM carrier_records
             WHERE period_year = ? AND period_month = ? AND is_consolidated = 1
               AND (settlement_line_id IS NULL
                    OR settlement_line_id IN
                       (SELECT id FROM settlement_lines WHERE settlement_id = ?))
             ORDER BY id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(period.year())
            .bind(period.month() as i64)
            .bind(held_by_settlement)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(carrier_from_row).collect()
    }
}
