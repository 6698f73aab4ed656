//! Carrier commission records, raw and consolidated.

use crate::domain::{Decimal, Period, SubscriberId};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One carrier usage/commission row as delivered by the ingestion collaborator.
///
/// A subscriber may appear several times per period, once per carrier cutoff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarrierReport {
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
    pub source_cutoff_label: String,
}

impl CarrierReport {
    /// Stable unique key so re-ingesting the same file is a no-op.
    ///
    /// Priority: carrier transaction code scoped by cutoff label > hash of the
    /// identifying fields.
    pub fn record_key(&self) -> String {
        if let Some(code) = self
            .transaction_code
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            return format!(
                "txn:{}:{}:{}",
                self.period,
                self.source_cutoff_label.trim(),
                code
            );
        }

        use sha2::{Digest, Sha256};

        fn hash_var(hasher: &mut Sha256, data: &str) {
            hasher.update((data.len() as u32).to_le_bytes());
            hasher.update(data.as_bytes());
        }

        let mut hasher = Sha256::new();
        hasher.update(self.subscriber_id.map(|s| s.as_i64()).unwrap_or(0).to_le_bytes());
        hash_var(&mut hasher, self.phone.as_deref().unwrap_or(""));
        hash_var(&mut hasher, self.iccid.as_deref().unwrap_or(""));
        hash_var(&mut hasher, &self.period.to_string());
        hash_var(&mut hasher, self.source_cutoff_label.trim());
        hash_var(&mut hasher, &self.commission_split_a.to_canonical_string());
        hash_var(&mut hasher, &self.commission_split_b.to_canonical_string());
        hash_var(&mut hasher, &self.recharge_period_amount.to_canonical_string());
        hash_var(&mut hasher, &self.carrier_total_recharge.to_canonical_string());

        let hash = hasher.finalize();
        format!("hash:{}", hex::encode(&hash[..16]))
    }
}

/// A persisted carrier record.
///
/// Raw records carry the single cutoff they came from; consolidated records
/// list every cutoff that contributed to them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarrierRecord {
    pub id: i64,
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
    pub is_consolidated: bool,
    /// Consumption marker: the settlement line that consumed this record.
    pub settlement_line_id: Option<i64>,
    /// Set on supplementary consolidated records: the carrier total recharge
    /// already settled for the group by earlier consumed records.
    pub settled_carrier_total: Option<Decimal>,
}

impl CarrierRecord {
    /// Total carrier commission (both splits).
    pub fn commission_total(&self) -> Decimal {
        self.commission_split_a + self.commission_split_b
    }

    pub fn is_consumed(&self) -> bool {
        self.settlement_line_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(code: Option<&str>) -> CarrierReport {
        CarrierReport {
            subscriber_id: Some(SubscriberId::new(7)),
            phone: Some("3001234567".to_string()),
            iccid: None,
            period: "2025-07".parse().unwrap(),
            commission_split_a: Decimal::from(800),
            commission_split_b: Decimal::from(200),
            recharge_period_amount: Decimal::zero(),
            carrier_total_recharge: Decimal::from(10000),
            activation_date: None,
            cutoff_date: None,
            commission_status: None,
            transaction_code: code.map(str::to_string),
            source_cutoff_label: "C1".to_string(),
        }
    }

    #[test]
    fn test_record_key_prefers_transaction_code() {
        assert_eq!(report(Some(" T-1 ")).record_key(), "txn:2025-07:C1:T-1");
    }

    #[test]
    fn test_record_key_hash_is_stable_and_field_sensitive() {
        let a = report(None);
        let mut b = report(None);
        assert_eq!(a.record_key(), b.record_key());
        assert!(a.record_key().starts_with("hash:"));

        b.source_cutoff_label = "C2".to_string();
        assert_ne!(a.record_key(), b.record_key());
    }
}
