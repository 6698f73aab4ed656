//! Store, subscriber, recharge and commercial-term operations.

use crate::domain::{
    CommercialTerm, Idpos, Period, RechargeEvent, RechargeReport, Store, StoreId, Subscriber,
    SubscriberId, TermReport,
};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{decimal_col, now_ms, opt_decimal_col, period_col, Repository};

fn store_from_row(row: &SqliteRow) -> Store {
    Store {
        id: StoreId::new(row.get("id")),
        idpos: Idpos::new(row.get("idpos")),
        name: row.get("name"),
        balance: decimal_col(row, "balance"),
    }
}

fn term_from_row(row: &SqliteRow) -> Result<CommercialTerm, sqlx::Error> {
    Ok(CommercialTerm {
        id: row.get("id"),
        subscriber_id: SubscriberId::new(row.get("subscriber_id")),
        idpos: Idpos::new(row.get("idpos")),
        sale_price: decimal_col(row, "sale_price"),
        residual_percentage: opt_decimal_col(row, "residual_percentage"),
        period: period_col(row)?,
        created_at_ms: row.get("created_at"),
    })
}

impl Repository {
    // =========================================================================
    // Stores
    // =========================================================================

    /// Create a store or rename an existing one with the same code.
    pub async fn upsert_store(&self, idpos: &Idpos, name: &str) -> Result<Store, sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO stores (idpos, name, balance, created_at)
            VALUES (?, ?, '0', ?)
            ON CONFLICT(idpos) DO UPDATE SET name = excluded.name
            "#,
        )
        .bind(idpos.as_str())
        .bind(name)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT id, idpos, name, balance FROM stores WHERE idpos = ?")
            .bind(idpos.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(store_from_row(&row))
    }

    pub async fn get_store(&self, id: StoreId) -> Result<Option<Store>, sqlx::Error> {
        let row = sqlx::query("SELECT id, idpos, name, balance FROM stores WHERE id = ?")
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(store_from_row))
    }

    pub async fn list_stores(&self) -> Result<Vec<Store>, sqlx::Error> {
        let rows = sqlx::query("SELECT id, idpos, name, balance FROM stores ORDER BY idpos ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(store_from_row).collect())
    }

    // =========================================================================
    // Subscribers
    // =========================================================================

    pub async fn insert_subscriber(
        &self,
        iccid: Option<&str>,
        phone: Option<&str>,
    ) -> Result<SubscriberId, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO subscribers (iccid, phone, created_at) VALUES (?, ?, ?)",
        )
        .bind(iccid)
        .bind(phone)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(SubscriberId::new(result.last_insert_rowid()))
    }

    pub async fn list_subscribers(&self) -> Result<Vec<Subscriber>, sqlx::Error> {
        let rows = sqlx::query("SELECT id, iccid, phone FROM subscribers ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| Subscriber {
                id: SubscriberId::new(row.get("id")),
                iccid: row.get("iccid"),
                phone: row.get("phone"),
            })
            .collect())
    }

    // =========================================================================
    // Recharges
    // =========================================================================

    /// Insert recharge events for a period idempotently (keyed by `event_key`).
    pub async fn insert_recharge_events(
        &self,
        period: Period,
        reports: &[RechargeReport],
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
                INSERT INTO recharge_events (
                    event_key, subscriber_id, phone, iccid, amount,
                    period_year, period_month, period_label, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(event_key) DO NOTHING
                "#,
            )
            .bind(report.event_key())
            .bind(report.subscriber_id.map(|s| s.as_i64()))
            .bind(report.phone.as_deref())
            .bind(report.iccid.as_deref())
            .bind(report.amount.to_canonical_string())
            .bind(period.year())
            .bind(period.month() as i64)
            .bind(report.period_label.trim())
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

    pub async fn recharge_events(&self, period: Period) -> Result<Vec<RechargeEvent>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, subscriber_id, phone, iccid, amount, period_year, period_month, period_label
            FROM recharge_events
            WHERE period_year = ? AND period_month = ?
            ORDER BY id ASC
            "#,
        )
        .bind(period.year())
        .bind(period.month() as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(RechargeEvent {
                    id: row.get("id"),
                    subscriber_id: row.get::<Option<i64>, _>("subscriber_id").map(SubscriberId::new),
                    phone: row.get("phone"),
                    iccid: row.get("iccid"),
                    amount: decimal_col(row, "amount"),
                    period: period_col(row)?,
                    period_label: row.get("period_label"),
                })
            })
            .collect()
    }

    // =========================================================================
    // Commercial terms
    // =========================================================================

    /// Insert commercial terms idempotently (keyed by `term_key`).
    pub async fn insert_term_reports(&self, reports: &[TermReport]) -> Result<usize, sqlx::Error> {
        if reports.is_empty() {
            return Ok(0);
        }

        let mut inserted = 0usize;
        let mut tx = self.pool.begin().await?;

        for report in reports {
            let result = sqlx::query(
                r#"
                INSERT INTO commercial_terms (
                    term_key, subscriber_id, idpos, sale_price, residual_percentage,
                    period_year, period_month, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(term_key) DO NOTHING
                "#,
            )
            .bind(report.term_key())
            .bind(report.subscriber_id.as_i64())
            .bind(report.idpos.as_str())
            .bind(report.sale_price.to_canonical_string())
            .bind(report.residual_percentage.map(|p| p.to_canonical_string()))
            .bind(report.period.year())
            .bind(report.period.month() as i64)
            .bind(report.created_at_ms)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                inserted += 1;
            }
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// The authoritative term per subscriber: the latest by
    /// (year, month, created_at, id) across every period, so a term signed
    /// after the calculated period still wins. Ranking stays in SQL so every
    /// caller sees the same projection.
    pub async fn latest_terms(&self) -> Result<Vec<CommercialTerm>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, subscriber_id, idpos, sale_price, residual_percentage,
                   period_year, period_month, created_at
            FROM (
                SELECT ct.*,
                       ROW_NUMBER() OVER (
                           PARTITION BY subscriber_id
                           ORDER BY period_year DESC, period_month DESC, created_at DESC, id DESC
                       ) AS term_rank
                FROM commercial_terms ct
            )
            WHERE term_rank = 1
            ORDER BY subscriber_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(term_from_row).collect()
    }
}
