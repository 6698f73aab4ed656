//! Domain types for the liquidation engine.
//!
//! This module provides:
//! - Lossless money handling via the Decimal wrapper
//! - Billing periods and identifier primitives
//! - Carrier, recharge and commercial-term records (ingested inputs)
//! - Settlements, commission lines, ledger entries and batch job records

pub mod carrier;
pub mod decimal;
pub mod directory;
pub mod period;
pub mod primitives;
pub mod recharge;
pub mod settlement;
pub mod term;

pub use carrier::{CarrierRecord, CarrierReport};
pub use decimal::Decimal;
pub use directory::{Store, Subscriber};
pub use period::{Period, PeriodParseError};
pub use primitives::{
    clean_iccid, exact_phone, normalize_phone, Idpos, StoreId, SubscriberId,
};
pub use recharge::{RechargeEvent, RechargeReport};
pub use settlement::{
    BackgroundJob, CommissionLine, JobStatus, LedgerEntry, Settlement, SettlementStatus,
};
pub use term::{CommercialTerm, TermReport};
