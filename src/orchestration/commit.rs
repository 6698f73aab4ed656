//! Per-store settlement commit.
//!
//! State per (store, period): none -> draft -> closed. Closed is terminal.
//! Committing or drafting over an existing draft regenerates it: the version
//! is bumped and the records held by its previous lines are released first.

use crate::db::{Repository, SettlementDraft, SettlementWriteError};
use crate::domain::{LedgerEntry, Period, Settlement, SettlementStatus, StoreId};
use crate::engine::{calculate, CalculationSnapshot};
use crate::orchestration::calculator::{CalculationError, Calculator};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("the unassigned bucket cannot be settled")]
    UnassignedStore,
    #[error("unknown store {0}")]
    UnknownStore(StoreId),
    #[error("settlement for store {store_id} in {period} is already closed")]
    AlreadyClosed { store_id: StoreId, period: Period },
    #[error("nothing to settle for store {store_id} in {period}")]
    NothingToSettle { store_id: StoreId, period: Period },
    #[error("carrier record {0} was consumed concurrently")]
    RecordAlreadyConsumed(i64),
    #[error(transparent)]
    Calculation(#[from] CalculationError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

impl SettlementError {
    /// State conflicts the caller can act on, as opposed to infrastructure failures.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            SettlementError::AlreadyClosed { .. }
                | SettlementError::NothingToSettle { .. }
                | SettlementError::RecordAlreadyConsumed(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitReceipt {
    pub settlement: Settlement,
    pub line_count: usize,
    pub released: usize,
    pub regenerated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger_entry: Option<LedgerEntry>,
}

#[derive(Clone)]
pub struct SettlementCommitter {
    calculator: Arc<Calculator>,
    repo: Arc<Repository>,
}

impl SettlementCommitter {
    pub fn new(calculator: Arc<Calculator>, repo: Arc<Repository>) -> Self {
        Self { calculator, repo }
    }

    /// Calculate, write and close the store's settlement, then credit its ledger.
    pub async fn commit_settlement(
        &self,
        store_id: StoreId,
        period: Period,
        actor_id: Option<&str>,
    ) -> Result<CommitReceipt, SettlementError> {
        let snapshot = self.calculator.load_snapshot(period).await?;
        self.commit_with(&snapshot, store_id, period, actor_id, true)
            .await
    }

    /// Same transactional path, leaving the settlement as a draft with no ledger entry.
    pub async fn draft_settlement(
        &self,
        store_id: StoreId,
        period: Period,
        actor_id: Option<&str>,
    ) -> Result<CommitReceipt, SettlementError> {
        let snapshot = self.calculator.load_snapshot(period).await?;
        self.commit_with(&snapshot, store_id, period, actor_id, false)
            .await
    }

    /// Commit against a snapshot shared by several stores of a batch.
    pub async fn commit_with(
        &self,
        snapshot: &CalculationSnapshot,
        store_id: StoreId,
        period: Period,
        actor_id: Option<&str>,
        close: bool,
    ) -> Result<CommitReceipt, SettlementError> {
        if store_id.is_unassigned() {
            return Err(SettlementError::UnassignedStore);
        }
        if self.repo.get_store(store_id).await?.is_none() {
            return Err(SettlementError::UnknownStore(store_id));
        }

        let existing = self.repo.find_settlement(store_id, period).await?;
        let closed = matches!(&existing, Some(s) if s.status == SettlementStatus::Closed);
        let held_by = existing.filter(|s| s.status != SettlementStatus::Closed).map(|s| s.id);

        // Period-wide calculation so the store sees the same resolution as the preview.
        let candidates = self.repo.commit_candidates(period, held_by).await?;
        let mut result = calculate(&candidates, snapshot);
        let bucket = match result.take_store(store_id) {
            Some(bucket) if !bucket.lines.is_empty() => bucket,
            _ => return Err(SettlementError::NothingToSettle { store_id, period }),
        };
        if closed {
            return Err(SettlementError::AlreadyClosed { store_id, period });
        }

        let outcome = self
            .repo
            .write_settlement(SettlementDraft {
                store_id,
                period,
                actor_id,
                lines: &bucket.lines,
                close,
            })
            .await
            .map_err(|e| match e {
                SettlementWriteError::AlreadyClosed { .. } => {
                    SettlementError::AlreadyClosed { store_id, period }
                }
                SettlementWriteError::RecordAlreadyConsumed(id) => {
                    SettlementError::RecordAlreadyConsumed(id)
                }
                SettlementWriteError::Db(e) => SettlementError::Db(e),
            })?;

        let settlement = outcome.settlement;
        tracing::info!(
            store_id = %store_id,
            period = %period,
            settlement_id = settlement.id,
            version = settlement.version,
            status = settlement.status.as_str(),
            lines = outcome.line_count,
            released = outcome.released,
            net = %settlement.net_amount,
            "Settlement written"
        );

        let ledger_entry = if close {
            self.credit_ledger(&settlement, actor_id).await
        } else {
            None
        };

        Ok(CommitReceipt {
            settlement,
            line_count: outcome.line_count,
            released: outcome.released,
            regenerated: outcome.regenerated,
            ledger_entry,
        })
    }

    /// The settlement is already committed here; a ledger failure is logged
    /// and reported as a missing entry on the receipt.
    async fn credit_ledger(
        &self,
        settlement: &Settlement,
        actor_id: Option<&str>,
    ) -> Option<LedgerEntry> {
        let description = format!(
            "Settlement {} v{} for {}",
            settlement.id, settlement.version, settlement.period
        );
        match self
            .repo
            .append_ledger_entry(
                settlement.store_id,
                settlement.id,
                settlement.net_amount,
                &description,
                actor_id,
            )
            .await
        {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::error!(
                    settlement_id = settlement.id,
                    error = %e,
                    "Settlement closed but ledger entry failed"
                );
                None
            }
        }
    }
}
