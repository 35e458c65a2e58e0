//! Shared fixtures: in-process mock services and registry helpers.

#![allow(dead_code)]

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use fleet_tester::ServiceDescriptor;

/// In-process stand-in for a service under test. Serves the health,
/// performance, stress, and communication surfaces on an ephemeral port.
pub struct MockService {
    pub port: u16,
    state: MockServiceState,
    server: JoinHandle<()>,
}

#[derive(Clone)]
struct MockServiceState {
    healthy: Arc<AtomicBool>,
    fail_performance: Arc<AtomicBool>,
    stress_failures: Arc<AtomicUsize>,
}

impl MockService {
    pub async fn spawn() -> Self {
        let state = MockServiceState {
            healthy: Arc::new(AtomicBool::new(true)),
            fail_performance: Arc::new(AtomicBool::new(false)),
            stress_failures: Arc::new(AtomicUsize::new(0)),
        };
        let app = Router::new()
            .route("/health", get(health))
            .route("/performance_test", get(performance))
            .route("/stress_test", get(stress))
            .route("/test_communication", post(communication))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock service");
        let port = listener.local_addr().expect("local addr").port();
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { port, state, server }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.state.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn set_fail_performance(&self, fail: bool) {
        self.state.fail_performance.store(fail, Ordering::SeqCst);
    }

    /// Make the next `count` stress requests fail with HTTP 500.
    pub fn fail_next_stress_requests(&self, count: usize) {
        self.state.stress_failures.store(count, Ordering::SeqCst);
    }
}

impl Drop for MockService {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn health(State(state): State<MockServiceState>) -> StatusCode {
    if state.healthy.load(Ordering::SeqCst) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn performance(
    State(state): State<MockServiceState>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if state.fail_performance.load(Ordering::SeqCst) {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    Ok(Json(serde_json::json!({
        "operations_per_second": 125_000.0,
        "queue_depth": 3,
    })))
}

async fn stress(State(state): State<MockServiceState>) -> StatusCode {
    let claimed = state
        .stress_failures
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    if claimed.is_ok() {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    }
}

#[derive(Deserialize)]
struct CommunicationRequest {
    target: String,
}

/// The source service "reaching" its target: one outbound GET.
async fn communication(Json(request): Json<CommunicationRequest>) -> StatusCode {
    let url = format!("{}/health", request.target);
    match reqwest::get(&url).await {
        Ok(response) if response.status().is_success() => StatusCode::OK,
        _ => StatusCode::BAD_GATEWAY,
    }
}

/// A descriptor whose process is a long-lived no-op, useful when the HTTP
/// surface is provided by a [`MockService`] on the same port.
pub fn sleeper(id: &str, port: u16) -> ServiceDescriptor {
    ServiceDescriptor::new(id, "", "/bin/sh", port)
        .with_args(["-c", "sleep 30"])
        .with_startup_budget(Duration::from_millis(200))
}
