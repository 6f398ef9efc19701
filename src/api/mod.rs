//! HTTP surface: job submission, status, paged results and CSV download.

pub mod error;
pub mod export;
pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use crate::queue::JobQueue;
use crate::store::JobStore;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub queue: Arc<dyn JobQueue>,
}

impl AppState {
    pub fn new(store: Arc<dyn JobStore>, queue: Arc<dyn JobQueue>) -> Self {
        Self { store, queue }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/jobs", post(handlers::submit_job))
        .route("/jobs/{job_id}", get(handlers::job_status))
        .route("/jobs/{job_id}/results", get(handlers::job_results))
        .route("/jobs/{job_id}/download", get(handlers::download_results))
        .with_state(state)
}
