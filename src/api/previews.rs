use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{parse_period, AppState};
use crate::domain::Decimal;
use crate::engine::{PreviewStatus, PreviewStore};
use crate::error::AppError;
use crate::orchestration::PROGRESS_FAILED;

const DEFAULT_PER_PAGE: usize = 50;
const MAX_PER_PAGE: usize = 500;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewStarted {
    pub job_key: String,
    pub record_count: usize,
    pub chunk_count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressResponse {
    pub job_key: String,
    pub progress: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewQuery {
    pub page: Option<usize>,
    pub per_page: Option<usize>,
    pub status: Option<PreviewStatus>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewPage {
    pub job_key: String,
    #[serde(rename = "generatedAt")]
    pub generated_at_ms: i64,
    pub page: usize,
    pub per_page: usize,
    /// Stores matching the filter, across all pages.
    pub total_stores: usize,
    /// Sum over the filtered stores, across all pages.
    pub grand_total: Decimal,
    pub stores: Vec<PreviewStore>,
}

pub async fn start_preview(
    Path(period): Path<String>,
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<PreviewStarted>), AppError> {
    let period = parse_period(&period)?;
    let ticket = state.previews.start(period).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(PreviewStarted {
            job_key: ticket.job_key,
            record_count: ticket.record_count,
            chunk_count: ticket.chunk_count,
        }),
    ))
}

pub async fn get_progress(
    Path(job_key): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<ProgressResponse>, AppError> {
    let progress = state
        .previews
        .progress(&job_key)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("preview {job_key}")))?;
    Ok(Json(ProgressResponse { job_key, progress }))
}

/// The merged listing, paginated. Answers 202 with the progress while the
/// job is still running.
pub async fn get_preview(
    Path(job_key): Path<String>,
    Query(params): Query<PreviewQuery>,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    let Some(listing) = state.previews.result(&job_key).await? else {
        return match state.previews.progress(&job_key).await? {
            None => Err(AppError::NotFound(format!("preview {job_key}"))),
            Some(PROGRESS_FAILED) => Err(AppError::Internal(format!("preview {job_key} failed"))),
            Some(progress) => Ok((
                StatusCode::ACCEPTED,
                Json(ProgressResponse { job_key, progress }),
            )
                .into_response()),
        };
    };

    let page = params.page.unwrap_or(1).max(1);
    let per_page = params
        .per_page
        .unwrap_or(DEFAULT_PER_PAGE)
        .clamp(1, MAX_PER_PAGE);

    let filtered: Vec<PreviewStore> = listing
        .stores
        .into_iter()
        .filter(|s| params.status.map_or(true, |status| s.status == status))
        .collect();
    let total_stores = filtered.len();
    let grand_total: Decimal = filtered.iter().map(|s| s.total).sum();
    let stores: Vec<PreviewStore> = filtered
        .into_iter()
        .skip((page - 1).saturating_mul(per_page))
        .take(per_page)
        .collect();

    Ok(Json(PreviewPage {
        job_key,
        generated_at_ms: listing.generated_at_ms,
        page,
        per_page,
        total_stores,
        grand_total,
        stores,
    })
    .into_response())
}
