//! Folds per-cutoff carrier records into one canonical record per subscriber.

use crate::domain::{normalize_phone, CarrierRecord, Decimal, Period, SubscriberId};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Grouping key for consolidation, in priority order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GroupKey {
    Subscriber(SubscriberId),
    Phone(String),
    Transaction(String),
    /// Nothing identifies the line; it stays on its own.
    Row(i64),
}

impl GroupKey {
    pub fn for_record(record: &CarrierRecord) -> Self {
        if let Some(subscriber) = record.subscriber_id {
            return GroupKey::Subscriber(subscriber);
        }
        if let Some(phone) = record.phone.as_deref().and_then(normalize_phone) {
            return GroupKey::Phone(phone);
        }
        if let Some(code) = record
            .transaction_code
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            return GroupKey::Transaction(format!("txn:{code}"));
        }
        GroupKey::Row(record.id)
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKey::Subscriber(id) => write!(f, "sub:{id}"),
            GroupKey::Phone(phone) => write!(f, "phone:{phone}"),
            GroupKey::Transaction(code) => f.write_str(code),
            GroupKey::Row(id) => write!(f, "row:{id}"),
        }
    }
}

/// The consolidated record for one (subscriber, period) group, ready to insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsolidatedRecord {
    pub subscriber_id: Option<SubscriberId>,
    pub phone: Option<String>,
    pub iccid: Option<String>,
    pub period: Period,
    pub commission_split_a: Decimal,
    pub commission_split_b: Decimal,
    pub recharge_period_amount: Decimal,
    pub carrier_total_recharge: Decimal,
    pub activation_date: Option<NaiveDate>,
    pub cutoff_date: Option<NaiveDate>,
    pub commission_status: Option<String>,
    pub transaction_code: Option<String>,
    pub source_cutoffs: Vec<String>,
}

impl ConsolidatedRecord {
    fn seed(first: &CarrierRecord) -> Self {
        Self {
            subscriber_id: first.subscriber_id,
            phone: first.phone.clone(),
            iccid: first.iccid.clone(),
            period: first.period,
            commission_split_a: Decimal::zero(),
            commission_split_b: Decimal::zero(),
            recharge_period_amount: Decimal::zero(),
            carrier_total_recharge: Decimal::zero(),
            activation_date: first.activation_date,
            cutoff_date: first.cutoff_date,
            commission_status: first.commission_status.clone(),
            transaction_code: first.transaction_code.clone(),
            source_cutoffs: Vec::new(),
        }
    }

    fn absorb(&mut self, record: &CarrierRecord) {
        self.commission_split_a += record.commission_split_a;
        self.commission_split_b += record.commission_split_b;
        self.recharge_period_amount += record.recharge_period_amount;
        self.carrier_total_recharge += record.carrier_total_recharge;
        for label in &record.source_cutoffs {
            if !self.source_cutoffs.contains(label) {
                self.source_cutoffs.push(label.clone());
            }
        }
    }

    pub fn commission_total(&self) -> Decimal {
        self.commission_split_a + self.commission_split_b
    }

    /// Grouping key of the consolidated record itself.
    pub fn group_key(&self) -> Option<GroupKey> {
        if let Some(subscriber) = self.subscriber_id {
            return Some(GroupKey::Subscriber(subscriber));
        }
        if let Some(phone) = self.phone.as_deref().and_then(normalize_phone) {
            return Some(GroupKey::Phone(phone));
        }
        self.transaction_code
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|code| GroupKey::Transaction(format!("txn:{code}")))
    }
}

/// The part of a group not covered by its already-consumed records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Supplement {
    pub record: ConsolidatedRecord,
    /// Carrier total recharge the consumed records already settled.
    pub settled_carrier_total: Decimal,
}

impl ConsolidatedRecord {
    /// Difference between this group and the records already consumed for it,
    /// so late cutoffs stay calculable. `None` when nothing changed.
    pub fn outstanding(&self, settled: &[CarrierRecord]) -> Option<Supplement> {
        let mut delta = self.clone();
        let mut settled_carrier_total = Decimal::zero();
        for record in settled {
            delta.commission_split_a = delta.commission_split_a - record.commission_split_a;
            delta.commission_split_b = delta.commission_split_b - record.commission_split_b;
            delta.recharge_period_amount =
                delta.recharge_period_amount - record.recharge_period_amount;
            delta.carrier_total_recharge =
                delta.carrier_total_recharge - record.carrier_total_recharge;
            delta
                .source_cutoffs
                .retain(|label| !record.source_cutoffs.contains(label));
            settled_carrier_total += record.carrier_total_recharge;
        }

        let unchanged = delta.commission_split_a.is_zero()
            && delta.commission_split_b.is_zero()
            && delta.recharge_period_amount.is_zero()
            && delta.carrier_total_recharge.is_zero();
        if unchanged {
            return None;
        }
        Some(Supplement {
            record: delta,
            settled_carrier_total,
        })
    }
}

/// Consolidate raw records into one record per group.
///
/// The first record of each group (in input order) provides identity and date
/// fields; amounts are summed. Output keeps first-appearance order, so the
/// same input always yields the same sequence.
pub fn consolidate_records(raw: &[CarrierRecord]) -> Vec<(GroupKey, ConsolidatedRecord)> {
    let mut order: Vec<(GroupKey, ConsolidatedRecord)> = Vec::new();
    let mut index: HashMap<GroupKey, usize> = HashMap::new();

    for record in raw.iter().filter(|r| !r.is_consolidated) {
        let key = GroupKey::for_record(record);
        let slot = match index.get(&key) {
            Some(&slot) => slot,
            None => {
                order.push((key.clone(), ConsolidatedRecord::seed(record)));
                index.insert(key, order.len() - 1);
                order.len() - 1
            }
        };
        order[slot].1.absorb(record);
    }

    order
}

/// SHA-256 fingerprint (hex) over the canonical JSON of a consolidated set.
pub fn fingerprint(records: &[ConsolidatedRecord]) -> String {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    for record in records {
        // Serializing plain data with string decimals cannot fail.
        let encoded = serde_json::to_vec(record).unwrap_or_default();
        hasher.update((encoded.len() as u32).to_le_bytes());
        hasher.update(&encoded);
    }
    hex::encode(hasher.finalize())
}
