//! Subscriber and store directory entries.

use crate::domain::{Decimal, Idpos, StoreId, SubscriberId};
use serde::{Deserialize, Serialize};

/// Simcard identity anchor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: SubscriberId,
    pub iccid: Option<String>,
    pub phone: Option<String>,
}

/// A point of sale receiving settlements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Store {
    pub id: StoreId,
    pub idpos: Idpos,
    pub name: String,
    pub balance: Decimal,
}
