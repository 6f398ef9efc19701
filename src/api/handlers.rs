use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::AppState;
use super::error::{ApiError, ApiResult};
use super::export::results_csv;
use crate::model::{Job, JobId, JobStatus, NewJob, PageRequest, ResultStatus};
use crate::telemetry::metrics;

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub client_id: String,
    pub domains: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub job_id: JobId,
    pub status: JobStatus,
}

#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
}

impl From<Job> for JobStatusResponse {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            progress: job.progress(),
            total: job.total,
            completed: job.completed,
            failed: job.failed,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ResultItem {
    pub domain: String,
    pub favicon_url: Option<String>,
    pub status: ResultStatus,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ResultsPage {
    pub results: Vec<ResultItem>,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
}

fn parse_job_id(raw: &str) -> ApiResult<JobId> {
    raw.parse().map_err(|_| ApiError::JobNotFound)
}

async fn existing_job(state: &AppState, id: JobId) -> ApiResult<Job> {
    state.store.get_job(id).await?.ok_or(ApiError::JobNotFound)
}

/// POST /jobs
pub async fn submit_job(
    State(state): State<AppState>,
    body: Result<Json<SubmitJobRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(req) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let new = NewJob::new(req.client_id, req.domains)?;

    let job = state.store.create_job(&new).await?;
    state.queue.enqueue(job.id).await?;

    metrics::jobs_submitted().add(1, &[KeyValue::new("result", "ok")]);
    info!(job_id = %job.id, total = job.total, "job submitted");

    Ok((
        StatusCode::CREATED,
        Json(SubmitJobResponse {
            job_id: job.id,
            status: job.status,
        }),
    ))
}

/// GET /jobs/{job_id}
pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatusResponse>> {
    let job = existing_job(&state, parse_job_id(&job_id)?).await?;
    Ok(Json(job.into()))
}

/// GET /jobs/{job_id}/results?page&per_page
pub async fn job_results(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    params: Result<Query<PageParams>, QueryRejection>,
) -> ApiResult<Json<ResultsPage>> {
    let Query(params) = params.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let defaults = PageRequest::default();
    let page = PageRequest::new(
        params.page.unwrap_or(defaults.page),
        params.per_page.unwrap_or(defaults.per_page),
    )?;

    let job = existing_job(&state, parse_job_id(&job_id)?).await?;
    let page = state.store.page_results(job.id, page).await?;

    Ok(Json(ResultsPage {
        results: page
            .items
            .into_iter()
            .map(|r| ResultItem {
                domain: r.domain,
                favicon_url: r.favicon_url,
                status: r.status,
                error: r.error,
            })
            .collect(),
        page: page.page,
        per_page: page.per_page,
        total: page.total,
    }))
}

/// GET /jobs/{job_id}/download
pub async fn download_results(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let job = existing_job(&state, parse_job_id(&job_id)?).await?;
    let results = state.store.list_results(job.id).await?;
    let disposition = format!("attachment; filename=\"job-{}.csv\"", job.id);

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        results_csv(&results),
    ))
}

/// GET /health
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
