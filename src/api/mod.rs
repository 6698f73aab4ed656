pub mod consolidation;
pub mod health;
pub mod previews;
pub mod settlements;

use crate::config::Config;
use crate::db::Repository;
use crate::domain::Period;
use crate::error::AppError;
use crate::feed::RecordFeed;
use crate::orchestration::{
    BatchCommitOrchestrator, BatchNotifier, Calculator, Ingestor, PeriodConsolidator,
    PreviewOrchestrator, SettlementCommitter,
};
use crate::runtime::{KeyValueStore, TaskDispatcher};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    /// Absent when no record feed is configured.
    pub ingestor: Option<Arc<Ingestor>>,
    pub consolidator: Arc<PeriodConsolidator>,
    pub previews: Arc<PreviewOrchestrator>,
    pub committer: Arc<SettlementCommitter>,
    pub batches: Arc<BatchCommitOrchestrator>,
}

impl AppState {
    /// Wire every service over one repository and one set of runtime ports.
    pub fn new(
        repo: Arc<Repository>,
        feed: Option<Arc<dyn RecordFeed>>,
        kv: Arc<dyn KeyValueStore>,
        dispatcher: Arc<dyn TaskDispatcher>,
        notifier: Arc<dyn BatchNotifier>,
        config: &Config,
    ) -> Self {
        let calculator = Arc::new(Calculator::new(repo.clone()));
        let committer = SettlementCommitter::new(calculator.clone(), repo.clone());
        let previews = PreviewOrchestrator::new(
            calculator.clone(),
            repo.clone(),
            kv,
            dispatcher.clone(),
            config,
        );
        let batches = BatchCommitOrchestrator::new(
            committer.clone(),
            calculator,
            repo.clone(),
            dispatcher,
            notifier,
            config,
        );

        Self {
            ingestor: feed.map(|feed| Arc::new(Ingestor::new(feed, repo.clone()))),
            consolidator: Arc::new(PeriodConsolidator::new(repo.clone())),
            previews: Arc::new(previews),
            committer: Arc::new(committer),
            batches: Arc::new(batches),
            repo,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route(
            "/v1/periods/:period/ingest",
            post(consolidation::ingest_period),
        )
        .route(
            "/v1/periods/:period/consolidate",
            post(consolidation::consolidate_period),
        )
        .route("/v1/periods/:period/previews", post(previews::start_preview))
        .route(
            "/v1/previews/:job_key/progress",
            get(previews::get_progress),
        )
        .route("/v1/previews/:job_key", get(previews::get_preview))
        .route(
            "/v1/periods/:period/stores/:store_id/settlement",
            post(settlements::commit_settlement),
        )
        .route(
            "/v1/periods/:period/stores/:store_id/draft",
            post(settlements::draft_settlement),
        )
        .route(
            "/v1/periods/:period/settlement-batches",
            post(settlements::start_batch),
        )
        .route(
            "/v1/settlement-batches/:job_id",
            get(settlements::get_batch),
        )
        .layer(cors)
        .with_state(state)
}

/// Parse a `YYYY-MM` path segment.
fn parse_period(raw: &str) -> Result<Period, AppError> {
    Ok(raw.parse::<Period>()?)
}
