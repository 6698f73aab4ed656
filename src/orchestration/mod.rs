//! Orchestration: wires the repository, the pure engines and the runtime
//! ports into the engine's operations.

pub mod batch;
pub mod calculator;
pub mod commit;
pub mod consolidate;
pub mod ingest;
pub mod notify;
pub mod preview;

pub use batch::{BatchCommitOrchestrator, BatchError, BatchTicket};
pub use calculator::{CalculationError, Calculator};
pub use commit::{CommitReceipt, SettlementCommitter, SettlementError};
pub use consolidate::{ConsolidationError, ConsolidationReport, PeriodConsolidator};
pub use ingest::{IngestionError, IngestionResult, Ingestor};
pub use notify::{BatchNotifier, BatchSummary, LogNotifier};
pub use preview::{PreviewError, PreviewOrchestrator, PreviewTicket, PROGRESS_DONE, PROGRESS_FAILED};
