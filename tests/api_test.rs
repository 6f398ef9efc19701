//! HTTP-level tests for the job API on the in-memory store.
//!
//! Uses `tower::ServiceExt::oneshot` to send requests directly to the router.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode, header};
use favq::api::{AppState, router};
use favq::config::EngineConfig;
use favq::engine::{JobProcessor, TracingProgress};
use favq::resolver::SimulatedResolver;
use favq::store::{MemoryQueue, MemoryStore};
use serde_json::{Value, json};
use tower::ServiceExt;

struct TestApp {
    store: Arc<MemoryStore>,
    queue: Arc<MemoryQueue>,
}

impl TestApp {
    fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            queue: Arc::new(MemoryQueue::new()),
        }
    }

    fn router(&self) -> Router {
        router(AppState::new(self.store.clone(), self.queue.clone()))
    }

    async fn get(&self, uri: &str) -> Response<Body> {
        self.router()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn post_json(&self, uri: &str, body: Value) -> Response<Body> {
        self.router()
            .oneshot(
                Request::post(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    /// Submit a job and return its id.
    async fn submit(&self, domains: Value) -> String {
        let response = self
            .post_json("/jobs", json!({ "client_id": "acme", "domains": domains }))
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        body_json(response).await["job_id"]
            .as_str()
            .unwrap()
            .to_string()
    }

    /// Drain the queue through the engine.
    async fn process_queued(&self) {
        let engine = JobProcessor::new(
            self.store.clone(),
            Arc::new(SimulatedResolver::new(
                Duration::from_millis(1),
                Duration::from_millis(1),
            )),
            Arc::new(TracingProgress),
            EngineConfig::default(),
        );
        while let Some(job_id) = self.queue.pop() {
            engine.process(job_id).await.unwrap();
        }
    }
}

async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

// ---------------------------------------------------------------------------
// POST /jobs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_dedups_domains_and_enqueues_once() {
    let app = TestApp::new();
    let response = app
        .post_json(
            "/jobs",
            json!({ "client_id": "acme", "domains": ["a.com", "b.com", "a.com"] }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let json = body_json(response).await;
    assert_eq!(json["status"], "PROCESSING");
    let job_id = json["job_id"].as_str().unwrap().to_string();
    assert_eq!(app.queue.len(), 1);

    let status = body_json(app.get(&format!("/jobs/{job_id}")).await).await;
    assert_eq!(status["total"], 2);
    assert_eq!(status["completed"], 0);
    assert_eq!(status["failed"], 0);
    assert_eq!(status["progress"], 0);
}

#[tokio::test]
async fn submit_rejects_empty_domain_list() {
    let app = TestApp::new();
    let response = app
        .post_json("/jobs", json!({ "client_id": "acme", "domains": [] }))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(app.queue.is_empty());
}

#[tokio::test]
async fn submit_rejects_blank_domain() {
    let app = TestApp::new();
    let response = app
        .post_json("/jobs", json!({ "client_id": "acme", "domains": ["a.com", "  "] }))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("domains[1]"));
}

#[tokio::test]
async fn submit_rejects_non_array_domains() {
    let app = TestApp::new();
    let response = app
        .post_json("/jobs", json!({ "client_id": "acme", "domains": "a.com" }))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(app.queue.is_empty());
}

// ---------------------------------------------------------------------------
// GET /jobs/{job_id}
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_job_is_not_found() {
    let app = TestApp::new();
    for uri in [
        "/jobs/00000000-0000-0000-0000-000000000000",
        "/jobs/not-a-uuid",
        "/jobs/00000000-0000-0000-0000-000000000000/results",
        "/jobs/00000000-0000-0000-0000-000000000000/download",
    ] {
        let response = app.get(uri).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
        assert_eq!(body_json(response).await, json!({ "error": "Job not found" }));
    }
}

#[tokio::test]
async fn processed_job_reports_completion() {
    let app = TestApp::new();
    let job_id = app.submit(json!(["a.com", "b.com"])).await;
    app.process_queued().await;

    let status = body_json(app.get(&format!("/jobs/{job_id}")).await).await;
    assert_eq!(status["job_id"], job_id);
    assert_eq!(status["status"], "COMPLETED");
    assert_eq!(status["progress"], 100);
    assert_eq!(status["completed"], 2);
}

// ---------------------------------------------------------------------------
// GET /jobs/{job_id}/results
// ---------------------------------------------------------------------------

#[tokio::test]
async fn results_are_paged_in_submission_order() {
    let app = TestApp::new();
    let domains: Vec<String> = (1..=45).map(|i| format!("d{i}.com")).collect();
    let job_id = app.submit(json!(domains)).await;

    let page = body_json(
        app.get(&format!("/jobs/{job_id}/results?page=2&per_page=20"))
            .await,
    )
    .await;
    assert_eq!(page["page"], 2);
    assert_eq!(page["per_page"], 20);
    assert_eq!(page["total"], 45);
    let results = page["results"].as_array().unwrap();
    assert_eq!(results.len(), 20);
    assert_eq!(results[0]["domain"], "d21.com");
    assert_eq!(results[19]["domain"], "d40.com");
    assert_eq!(results[0]["status"], "PENDING");
}

#[tokio::test]
async fn results_default_to_first_page_of_twenty() {
    let app = TestApp::new();
    let domains: Vec<String> = (1..=25).map(|i| format!("d{i}.com")).collect();
    let job_id = app.submit(json!(domains)).await;

    let page = body_json(app.get(&format!("/jobs/{job_id}/results")).await).await;
    assert_eq!(page["page"], 1);
    assert_eq!(page["per_page"], 20);
    assert_eq!(page["results"].as_array().unwrap().len(), 20);
}

#[tokio::test]
async fn results_reject_out_of_range_paging() {
    let app = TestApp::new();
    let job_id = app.submit(json!(["a.com"])).await;

    for query in ["page=0", "per_page=0", "per_page=101", "page=abc"] {
        let response = app.get(&format!("/jobs/{job_id}/results?{query}")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{query}");
    }
}

// ---------------------------------------------------------------------------
// GET /jobs/{job_id}/download
// ---------------------------------------------------------------------------

#[tokio::test]
async fn download_returns_csv_attachment() {
    let app = TestApp::new();
    let job_id = app.submit(json!(["a.com", "b.com"])).await;
    app.process_queued().await;

    let response = app.get(&format!("/jobs/{job_id}/download")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/csv");
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        format!("attachment; filename=\"job-{job_id}.csv\"").as_str()
    );

    let csv = String::from_utf8(body_bytes(response).await).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines[0], "domain,status,faviconUrl,error,tries");
    assert_eq!(lines.len(), 3);
    assert!(lines.contains(&"a.com,SUCCESS,https://a.com/favicon.ico,,1"));
    assert!(lines.contains(&"b.com,SUCCESS,https://b.com/favicon.ico,,1"));
}

#[tokio::test]
async fn health_is_ok() {
    let app = TestApp::new();
    let response = app.get("/health").await;
    assert_eq!(response.status(), StatusCode::OK);
}
