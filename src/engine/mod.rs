//! Pure computation engines for settlement logic.
//!
//! Nothing in this module touches the database or the task runtime.

pub mod calculation;
pub mod consolidation;
pub mod merge;

pub use calculation::{
    calculate, compute_line, CalculationResult, CalculationSnapshot, LatestTerms, RechargeIndex,
    StoreBucket, StoreDirectory, SubscriberDirectory,
};
pub use consolidation::{consolidate_records, fingerprint, ConsolidatedRecord, GroupKey};
pub use merge::{ClosedSettlement, PreviewListing, PreviewMerger, PreviewStatus, PreviewStore};

/// Progress added when chunk `index` of `total` completes.
///
/// Steps are cumulative-floor differences so that they sum to exactly
/// [`CHUNK_PROGRESS_SHARE`] without ever overshooting it.
pub fn progress_step(index: usize, total: usize) -> i64 {
    if total == 0 || index >= total {
        return 0;
    }
    let share = CHUNK_PROGRESS_SHARE as usize;
    let before = share * index / total;
    let after = share * (index + 1) / total;
    (after - before) as i64
}

/// Progress reserved for chunk workers; the rest belongs to the merge stage.
pub const CHUNK_PROGRESS_SHARE: i64 = 90;
