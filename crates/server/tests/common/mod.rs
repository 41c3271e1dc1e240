//! Common test utilities for API tests.
//!
//! The fixture builds the router in-process over a temporary SQLite store.
//! Workers are optional; when enabled they run against the mock
//! collaborators from `mediarelay_core::testing`.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use mediarelay_core::{
    policy::{BackoffPolicy, StallConfig},
    publisher::Publisher,
    resolver::Resolver,
    testing::{MockPublisher, MockResolver, MockTransporter},
    transporter::Transporter,
    Collaborators, Config, ItemStore, SqliteItemStore, WorkerPool,
};
use mediarelay_server::api::create_router;
use mediarelay_server::state::AppState;

/// In-process server over a temp database.
pub struct TestFixture {
    pub router: Router,
    pub store: Arc<dyn ItemStore>,
    pub resolver: Arc<MockResolver>,
    pub transporter: Arc<MockTransporter>,
    pub publisher: Arc<MockPublisher>,
    pub workers: Option<Arc<WorkerPool>>,
    /// Holds the database and download directory
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

#[derive(Debug, Clone, Default)]
pub struct TestConfig {
    /// Run one worker per role against the mocks
    pub enable_workers: bool,
}

impl TestFixture {
    /// Fixture without workers; items stay where the API puts them.
    pub async fn new() -> Self {
        Self::with_config(TestConfig::default()).await
    }

    pub async fn with_workers() -> Self {
        Self::with_config(TestConfig {
            enable_workers: true,
        })
        .await
    }

    pub async fn with_config(test_config: TestConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let mut config = Config::default();
        config.database.path = db_path.clone();
        config.retry = BackoffPolicy::new(2, Duration::from_millis(5), Duration::from_millis(20));
        config.stall = StallConfig {
            sample_interval_ms: 5,
            max_unchanged_samples: 3,
            persist_every_samples: 1,
        };
        config.workers.poll_interval_ms = 20;
        config.workers.error_retry_delay_ms = 20;
        config.workers.stagger_ms = 0;
        config.workers.store_timeout_ms = 2000;
        config.workers.transfer.download_dir = temp_dir.path().join("downloads");
        for role in [
            &mut config.workers.resolve,
            &mut config.workers.transfer,
            &mut config.workers.publish,
        ] {
            role.count = usize::from(test_config.enable_workers);
        }

        let store: Arc<dyn ItemStore> =
            Arc::new(SqliteItemStore::new(&db_path).expect("Failed to create item store"));

        let resolver = Arc::new(MockResolver::new());
        let transporter = Arc::new(MockTransporter::new());
        let publisher = Arc::new(MockPublisher::new());

        let workers = if test_config.enable_workers {
            let collaborators = Collaborators {
                resolver: Some(Arc::clone(&resolver) as Arc<dyn Resolver>),
                transporter: Some(Arc::clone(&transporter) as Arc<dyn Transporter>),
                publisher: Some(Arc::clone(&publisher) as Arc<dyn Publisher>),
            };
            let pool = WorkerPool::start(&config, Arc::clone(&store), collaborators)
                .await
                .expect("Failed to start workers");
            Some(Arc::new(pool))
        } else {
            None
        };

        let state = Arc::new(AppState::new(config, Arc::clone(&store), workers.clone()));
        let router = create_router(state);

        Self {
            router,
            store,
            resolver,
            transporter,
            publisher,
            workers,
            temp_dir,
        }
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// POST a raw body (for malformed JSON).
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    /// GET a plain-text endpoint.
    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let request = Request::builder().uri(path).body(Body::empty()).unwrap();
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Poll an item until it reaches `stage` or the timeout passes.
    pub async fn wait_for_stage(&self, id: &str, stage: &str, timeout: Duration) -> Value {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let response = self.get(&format!("/api/v1/items/{}", id)).await;
            if response.body["stage"] == stage || tokio::time::Instant::now() >= deadline {
                return response.body;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    pub async fn shutdown(&self) {
        if let Some(pool) = &self.workers {
            pool.shutdown(Duration::from_secs(2)).await;
        }
    }

    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        self.send(request_builder.body(body).unwrap()).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }
}
