//! Domain primitives: StoreId, SubscriberId, Idpos and identifier normalization.

use serde::{Deserialize, Serialize};

/// Internal store identifier.
///
/// `StoreId::UNASSIGNED` (-1) is the holding bucket for lines whose store could
/// not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreId(pub i64);

impl StoreId {
    pub const UNASSIGNED: StoreId = StoreId(-1);

    pub fn new(id: i64) -> Self {
        StoreId(id)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }

    pub fn is_unassigned(&self) -> bool {
        *self == Self::UNASSIGNED
    }
}

impl std::fmt::Display for StoreId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Internal subscriber (simcard) identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberId(pub i64);

impl SubscriberId {
    pub fn new(id: i64) -> Self {
        SubscriberId(id)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// External point-of-sale code used to join commercial terms to stores.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Idpos(pub String);

impl Idpos {
    pub fn new(code: String) -> Self {
        Idpos(code.trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Idpos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Number of trailing digits that identify a phone line regardless of
/// country prefix formatting.
pub const NORMALIZED_PHONE_DIGITS: usize = 10;

/// Normalize a phone number to its last ten digits.
///
/// Returns None when the input carries no digits.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    let start = digits.len().saturating_sub(NORMALIZED_PHONE_DIGITS);
    Some(digits[start..].to_string())
}

/// Trimmed phone for exact matching, None when blank.
pub fn exact_phone(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Clean an ICCID down to its digits.
///
/// Carrier files sometimes carry the trailing `F` filler, spaces or quotes.
pub fn clean_iccid(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        None
    } else {
        Some(digits)
    }
}
