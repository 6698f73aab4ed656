//! Settlement, settlement-line and ledger operations.

use crate::domain::{
    CommissionLine, Decimal, Idpos, LedgerEntry, Period, Settlement, SettlementStatus, StoreId,
    SubscriberId,
};
use crate::engine::ClosedSettlement;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};
use thiserror::Error;
use tracing::{debug, warn};

use super::{date_col, date_text, decimal_col, now_ms, opt_decimal_col, period_col, Repository};

const SETTLEMENT_COLUMNS: &str = "id, store_id, period_year, period_month, version, status, \
     gross_amount, net_amount, actor_id, created_at, closed_at";

/// Input of one transactional settlement write.
#[derive(Debug, Clone)]
pub struct SettlementDraft<'a> {
    pub store_id: StoreId,
    pub period: Period,
    pub actor_id: Option<&'a str>,
    pub lines: &'a [CommissionLine],
    /// Close the settlement in the same transaction; otherwise it stays a draft.
    pub close: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub settlement: Settlement,
    pub line_count: usize,
    /// Carrier records released from the previous version's lines.
    pub released: usize,
    pub regenerated: bool,
}

#[derive(Debug, Error)]
pub enum SettlementWriteError {
    #[error("settlement {settlement_id} for store {store_id} in {period} is already closed")]
    AlreadyClosed {
        store_id: StoreId,
        period: Period,
        settlement_id: i64,
    },
    #[error("carrier record {0} is already consumed by another settlement line")]
    RecordAlreadyConsumed(i64),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

fn settlement_from_row(row: &SqliteRow) -> Result<Settlement, sqlx::Error> {
    let status_raw: String = row.get("status");
    let status = SettlementStatus::parse(&status_raw).ok_or_else(|| {
        sqlx::Error::Decode(format!("unknown settlement status '{status_raw}'").into())
    })?;

    Ok(Settlement {
        id: row.get("id"),
        store_id: StoreId::new(row.get("store_id")),
        period: period_col(row)?,
        version: row.get("version"),
        status,
        gross_amount: decimal_col(row, "gross_amount"),
        net_amount: decimal_col(row, "net_amount"),
        actor_id: row.get("actor_id"),
        created_at_ms: row.get("created_at"),
        closed_at_ms: row.get("closed_at"),
    })
}

fn line_from_row(row: &SqliteRow) -> CommissionLine {
    CommissionLine {
        carrier_record_id: row.get("carrier_record_id"),
        subscriber_id: row.get::<Option<i64>, _>("subscriber_id").map(SubscriberId::new),
        phone: row.get("phone"),
        iccid: row.get("iccid"),
        store_id: StoreId::new(row.get("store_id")),
        idpos: row.get::<Option<String>, _>("idpos").map(Idpos::new),
        commercial_term_id: row.get("commercial_term_id"),
        sale_price: opt_decimal_col(row, "sale_price"),
        commission_split_a: decimal_col(row, "commission_split_a"),
        commission_split_b: decimal_col(row, "commission_split_b"),
        commission_total: decimal_col(row, "commission_total"),
        carrier_total_recharge: decimal_col(row, "carrier_total_recharge"),
        recharge_period_amount: decimal_col(row, "recharge_period_amount"),
        recharge_amount: decimal_col(row, "recharge_amount"),
        base_real: decimal_col(row, "base_real"),
        residual_percent: decimal_col(row, "residual_percent"),
        payout: decimal_col(row, "payout"),
        activation_date: date_col(row, "activation_date"),
        cutoff_date: date_col(row, "cutoff_date"),
    }
}

fn ledger_from_row(row: &SqliteRow) -> LedgerEntry {
    LedgerEntry {
        id: row.get("id"),
        store_id: StoreId::new(row.get("store_id")),
        settlement_id: row.get("settlement_id"),
        amount: decimal_col(row, "amount"),
        balance_after: decimal_col(row, "balance_after"),
        description: row.get("description"),
        actor_id: row.get("actor_id"),
        created_at_ms: row.get("created_at"),
    }
}

/// Take the database write lock before any read, so concurrent writers wait
/// on the busy timeout instead of failing on a stale WAL snapshot.
async fn lock_store_tx(
    tx: &mut Transaction<'_, Sqlite>,
    store_id: StoreId,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE stores SET balance = balance WHERE id = ?")
        .bind(store_id.as_i64())
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn fetch_settlement_tx(
    tx: &mut Transaction<'_, Sqlite>,
    store_id: StoreId,
    period: Period,
) -> Result<Option<Settlement>, sqlx::Error> {
    let sql = format!(
        "SELECT {SETTLEMENT_COLUMNS} FROM settlements
         WHERE store_id = ? AND period_year = ? AND period_month = ?"
    );
    let row = sqlx::query(&sql)
        .bind(store_id.as_i64())
        .bind(period.year())
        .bind(period.month() as i64)
        .fetch_optional(&mut **tx)
        .await?;
    row.as_ref().map(settlement_from_row).transpose()
}

async fn insert_line_tx(
    tx: &mut Transaction<'_, Sqlite>,
    settlement_id: i64,
    line: &CommissionLine,
) -> Result<i64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO settlement_lines (
            settlement_id, carrier_record_id, commercial_term_id, subscriber_id, phone, iccid,
            idpos, sale_price, commission_split_a, commission_split_b, commission_total,
            carrier_total_recharge, recharge_period_amount, recharge_amount, base_real,
            residual_percent, payout, activation_date, cutoff_date
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(settlement_id)
    .bind(line.carrier_record_id)
    .bind(line.commercial_term_id)
    .bind(line.subscriber_id.map(|s| s.as_i64()))
    .bind(line.phone.as_deref())
    .bind(line.iccid.as_deref())
    .bind(line.idpos.as_ref().map(|i| i.as_str()))
    .bind(line.sale_price.map(|p| p.to_canonical_string()))
    .bind(line.commission_split_a.to_canonical_string())
    .bind(line.commission_split_b.to_canonical_string())
    .bind(line.commission_total.to_canonical_string())
    .bind(line.carrier_total_recharge.to_canonical_string())
    .bind(line.recharge_period_amount.to_canonical_string())
    .bind(line.recharge_amount.to_canonical_string())
    .bind(line.base_real.to_canonical_string())
    .bind(line.residual_percent.to_canonical_string())
    .bind(line.payout.to_canonical_string())
    .bind(date_text(line.activation_date))
    .bind(date_text(line.cutoff_date))
    .execute(&mut **tx)
    .await?;
    Ok(result.last_insert_rowid())
}

impl Repository {
    pub async fn find_settlement(
        &self,
        store_id: StoreId,
        period: Period,
    ) -> Result<Option<Settlement>, sqlx::Error> {
        let sql = format!(
            "SELECT {SETTLEMENT_COLUMNS} FROM settlements
             WHERE store_id = ? AND period_year = ? AND period_month = ?"
        );
        let row = sqlx::query(&sql)
            .bind(store_id.as_i64())
            .bind(period.year())
            .bind(period.month() as i64)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(settlement_from_row).transpose()
    }

    /// Lines of a settlement, in insertion order.
    pub async fn settlement_lines(
        &self,
        settlement_id: i64,
    ) -> Result<Vec<CommissionLine>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT l.*, s.store_id
            FROM settlement_lines l
            JOIN settlements s ON s.id = l.settlement_id
            WHERE l.settlement_id = ?
            ORDER BY l.id ASC
            "#,
        )
        .bind(settlement_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(line_from_row).collect())
    }

    /// Closed settlements of a period with their store identity and lines.
    pub async fn closed_settlements(
        &self,
        period: Period,
    ) -> Result<Vec<ClosedSettlement>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT s.id, s.store_id, s.period_year, s.period_month, s.version, s.status,
                   s.gross_amount, s.net_amount, s.actor_id, s.created_at, s.closed_at,
                   st.idpos AS store_idpos, st.name AS store_name
            FROM settlements s
            JOIN stores st ON st.id = s.store_id
            WHERE s.period_year = ? AND s.period_month = ? AND s.status = 'closed'
            ORDER BY s.id ASC
            "#,
        )
        .bind(period.year())
        .bind(period.month() as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut closed = Vec::with_capacity(rows.len());
        for row in &rows {
            let settlement = settlement_from_row(row)?;
            let lines = self.settlement_lines(settlement.id).await?;
            closed.push(ClosedSettlement {
                settlement,
                idpos: Idpos::new(row.get("store_idpos")),
                name: row.get("store_name"),
                lines,
            });
        }
        Ok(closed)
    }

    /// Write a settlement version in a single transaction.
    ///
    /// - No settlement yet: insert version 1.
    /// - Existing draft: bump the version, release the carrier records its
    ///   lines consumed and delete those lines.
    /// - Existing closed settlement: refuse.
    ///
    /// Each new line marks its carrier record only while the record is still
    /// unmarked; a record consumed elsewhere aborts the whole write.
    pub async fn write_settlement(
        &self,
        draft: SettlementDraft<'_>,
    ) -> Result<WriteOutcome, SettlementWriteError> {
        let now = now_ms();
        let mut tx = self.pool.begin().await?;
        lock_store_tx(&mut tx, draft.store_id).await?;

        let existing = fetch_settlement_tx(&mut tx, draft.store_id, draft.period).await?;
        let (settlement_id, released, regenerated) = match existing {
            Some(s) if s.status == SettlementStatus::Closed => {
                return Err(SettlementWriteError::AlreadyClosed {
                    store_id: draft.store_id,
                    period: draft.period,
                    settlement_id: s.id,
                });
            }
            Some(s) => {
                // Markers first: carrier_records references the lines.
                let released = sqlx::query(
                    r#"
                    UPDATE carrier_records SET settlement_line_id = NULL
                    WHERE settlement_line_id IN
                        (SELECT id FROM settlement_lines WHERE settlement_id = ?)
                    "#,
                )
                .bind(s.id)
                .execute(&mut *tx)
                .await?
                .rows_affected() as usize;

                sqlx::query("DELETE FROM settlement_lines WHERE settlement_id = ?")
                    .bind(s.id)
                    .execute(&mut *tx)
                    .await?;

                sqlx::query(
                    r#"
                    UPDATE settlements
                    SET version = version + 1, status = 'draft', actor_id = ?,
                        gross_amount = '0', net_amount = '0'
                    WHERE id = ?
                    "#,
                )
                .bind(draft.actor_id)
                .bind(s.id)
                .execute(&mut *tx)
                .await?;

                debug!(settlement_id = s.id, released, "Recycled draft settlement");
                (s.id, released, true)
            }
            None => {
                let result = sqlx::query(
                    r#"
                    INSERT INTO settlements (
                        store_id, period_year, period_month, version, status,
                        gross_amount, net_amount, actor_id, created_at
                    ) VALUES (?, ?, ?, 1, 'draft', '0', '0', ?, ?)
                    "#,
                )
                .bind(draft.store_id.as_i64())
                .bind(draft.period.year())
                .bind(draft.period.month() as i64)
                .bind(draft.actor_id)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                (result.last_insert_rowid(), 0, false)
            }
        };

        let mut gross = Decimal::zero();
        for line in draft.lines {
            let line_id = insert_line_tx(&mut tx, settlement_id, line).await?;
            let marked = sqlx::query(
                r#"
                UPDATE carrier_records SET settlement_line_id = ?
                WHERE id = ? AND settlement_line_id IS NULL
                "#,
            )
            .bind(line_id)
            .bind(line.carrier_record_id)
            .execute(&mut *tx)
            .await?;

            if marked.rows_affected() == 0 {
                warn!(
                    record_id = line.carrier_record_id,
                    store_id = %draft.store_id,
                    "Carrier record already consumed, rolling back settlement"
                );
                return Err(SettlementWriteError::RecordAlreadyConsumed(
                    line.carrier_record_id,
                ));
            }
            gross += line.payout;
        }

        let (status, closed_at) = if draft.close {
            (SettlementStatus::Closed, Some(now))
        } else {
            (SettlementStatus::Draft, None)
        };
        sqlx::query(
            r#"
            UPDATE settlements
            SET gross_amount = ?, net_amount = ?, status = ?, closed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(gross.to_canonical_string())
        .bind(gross.to_canonical_string())
        .bind(status.as_str())
        .bind(closed_at)
        .bind(settlement_id)
        .execute(&mut *tx)
        .await?;

        let settlement = fetch_settlement_tx(&mut tx, draft.store_id, draft.period)
            .await?
            .ok_or(SettlementWriteError::Db(sqlx::Error::RowNotFound))?;

        tx.commit().await?;

        Ok(WriteOutcome {
            settlement,
            line_count: draft.lines.len(),
            released,
            regenerated,
        })
    }

    /// Credit a store's running balance and record the movement.
    pub async fn append_ledger_entry(
        &self,
        store_id: StoreId,
        settlement_id: i64,
        amount: Decimal,
        description: &str,
        actor_id: Option<&str>,
    ) -> Result<LedgerEntry, sqlx::Error> {
        let now = now_ms();
        let mut tx = self.pool.begin().await?;
        lock_store_tx(&mut tx, store_id).await?;

        let row = sqlx::query("SELECT balance FROM stores WHERE id = ?")
            .bind(store_id.as_i64())
            .fetch_one(&mut *tx)
            .await?;
        let balance_after = decimal_col(&row, "balance") + amount;

        sqlx::query("UPDATE stores SET balance = ? WHERE id = ?")
            .bind(balance_after.to_canonical_string())
            .bind(store_id.as_i64())
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query(
            r#"
            INSERT INTO ledger_entries (
                store_id, settlement_id, amount, balance_after, description, actor_id, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(store_id.as_i64())
        .bind(settlement_id)
        .bind(amount.to_canonical_string())
        .bind(balance_after.to_canonical_string())
        .bind(description)
        .bind(actor_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(LedgerEntry {
            id: result.last_insert_rowid(),
            store_id,
            settlement_id,
            amount,
            balance_after,
            description: description.to_string(),
            actor_id: actor_id.map(str::to_string),
            created_at_ms: now,
        })
    }

    pub async fn ledger_entries(&self, store_id: StoreId) -> Result<Vec<LedgerEntry>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, store_id, settlement_id, amount, balance_after, description, actor_id, created_at
            FROM ledger_entries
            WHERE store_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(store_id.as_i64())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(ledger_from_row).collect())
    }
}
