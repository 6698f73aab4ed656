//! Subscriber top-up (recharge) events.

use crate::domain::{Decimal, Period, SubscriberId};
use serde::{Deserialize, Serialize};

/// A recharge row as delivered by the ingestion collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RechargeReport {
    pub subscriber_id: Option<SubscriberId>,
    pub phone: Option<String>,
    pub iccid: Option<String>,
    pub amount: Decimal,
    /// Period label or date as it appeared in the source file.
    pub period_label: String,
    /// Source reference (file row, provider id) when known.
    pub reference: Option<String>,
}

impl RechargeReport {
    /// Stable unique key for idempotent ingestion.
    pub fn event_key(&self) -> String {
        if let Some(reference) = self
            .reference
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            return format!("ref:{reference}");
        }

        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        for part in [
            self.subscriber_id
                .map(|s| s.to_string())
                .unwrap_or_default(),
            self.phone.clone().unwrap_or_default(),
            self.iccid.clone().unwrap_or_default(),
            self.amount.to_canonical_string(),
            self.period_label.trim().to_string(),
        ] {
            hasher.update((part.len() as u32).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        let hash = hasher.finalize();
        format!("hash:{}", hex::encode(&hash[..16]))
    }
}

/// A persisted recharge event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RechargeEvent {
    pub id: i64,
    pub subscriber_id: Option<SubscriberId>,
    pub phone: Option<String>,
    pub iccid: Option<String>,
    pub amount: Decimal,
    pub period: Period,
    pub period_label: String,
}
