//! Merges partial chunk results with already-closed settlements into the final
//! per-store preview listing.

use crate::domain::{CommissionLine, Decimal, Idpos, Settlement, StoreId};
use crate::engine::calculation::StoreBucket;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where a store's preview total comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviewStatus {
    /// Only already-closed settlement money.
    Liquidated,
    /// Closed settlement money plus newly eligible lines.
    Partial,
    /// Only newly eligible lines.
    Pending,
}

impl PreviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreviewStatus::Liquidated => "liquidated",
            PreviewStatus::Partial => "partial",
            PreviewStatus::Pending => "pending",
        }
    }
}

/// A closed settlement with its lines, as loaded for the merge stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedSettlement {
    pub settlement: Settlement,
    pub idpos: Idpos,
    pub name: String,
    pub lines: Vec<CommissionLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewStore {
    pub store_id: StoreId,
    pub idpos: Option<Idpos>,
    pub name: Option<String>,
    pub total: Decimal,
    pub status: PreviewStatus,
    pub lines: Vec<CommissionLine>,
}

/// Final preview dataset; callers paginate, sort and filter over it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewListing {
    pub stores: Vec<PreviewStore>,
    /// Milliseconds since the epoch.
    #[serde(rename = "generatedAt")]
    pub generated_at_ms: i64,
}

impl PreviewListing {
    pub fn grand_total(&self) -> Decimal {
        self.stores.iter().map(|s| s.total).sum()
    }
}

/// Accumulates closed settlements and chunk partials keyed by store.
#[derive(Debug, Default)]
pub struct PreviewMerger {
    stores: BTreeMap<StoreId, PreviewStore>,
}

impl PreviewMerger {
    /// Seed the result with every closed settlement of the period.
    pub fn seeded(closed: Vec<ClosedSettlement>) -> Self {
        let mut merger = Self::default();
        for closed in closed {
            let store_id = closed.settlement.store_id;
            match merger.stores.get_mut(&store_id) {
                Some(existing) => {
                    existing.total += closed.settlement.net_amount;
                    existing.lines.extend(closed.lines);
                }
                None => {
                    merger.stores.insert(
                        store_id,
                        PreviewStore {
                            store_id,
                            idpos: Some(closed.idpos),
                            name: Some(closed.name),
                            total: closed.settlement.net_amount,
                            status: PreviewStatus::Liquidated,
                            lines: closed.lines,
                        },
                    );
                }
            }
        }
        merger
    }

    /// Add one chunk's buckets.
    ///
    /// Closed and newly computed amounts for the same store are additive: a store
    /// can mix already-settled subscribers and newly eligible ones.
    pub fn absorb(&mut self, buckets: Vec<StoreBucket>) {
        for bucket in buckets {
            match self.stores.get_mut(&bucket.store_id) {
                Some(existing) => {
                    existing.total += bucket.total;
                    existing.lines.extend(bucket.lines);
                    if existing.status == PreviewStatus::Liquidated {
                        existing.status = PreviewStatus::Partial;
                    }
                    if existing.idpos.is_none() {
                        existing.idpos = bucket.idpos;
                    }
                    if existing.name.is_none() {
                        existing.name = bucket.name;
                    }
                }
                None => {
                    self.stores.insert(
                        bucket.store_id,
                        PreviewStore {
                            store_id: bucket.store_id,
                            idpos: bucket.idpos,
                            name: bucket.name,
                            total: bucket.total,
                            status: PreviewStatus::Pending,
                            lines: bucket.lines,
                        },
                    );
                }
            }
        }
    }

    /// Drop zero-total stores and order by store code; unassigned sorts last.
    pub fn finish(self, generated_at_ms: i64) -> PreviewListing {
        let mut stores: Vec<PreviewStore> = self
            .stores
            .into_values()
            .filter(|s| !s.total.is_zero())
            .collect();
        stores.sort_by(|a, b| {
            let key = |s: &PreviewStore| (s.idpos.is_none(), s.idpos.clone(), s.store_id);
            key(a).cmp(&key(b))
        });
        PreviewListing {
            stores,
            generated_at_ms,
        }
    }
}
