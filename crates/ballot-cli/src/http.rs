//! HTTP status surface: `/health`, `/metrics` and a banner on `/`.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Json;
use ballot_core::app::HealthChecker;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Clone)]
pub struct AppState {
    pub health: Arc<HealthChecker>,
    pub queue_key: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(banner))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .fallback(not_found)
        .with_state(state)
}

/// Serve until `shutdown` is cancelled, then finish in-flight requests.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "HTTP server listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn banner() -> &'static str {
    concat!("ballot-worker ", env!("CARGO_PKG_VERSION"), "\n")
}

async fn health(State(state): State<AppState>) -> Response {
    let report = state.health.check().await;
    let code = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(report)).into_response()
}

async fn metrics(State(state): State<AppState>) -> Response {
    // 取得できなければ gauge を省略する
    let depth = match state.health.queue().len(&state.queue_key).await {
        Ok(depth) => Some(depth),
        Err(e) => {
            warn!(error = %e, "Failed to sample queue depth");
            None
        }
    };
    let body = state.health.metrics().render_prometheus(depth);
    ([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], body).into_response()
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use ballot_core::app::HealthReport;
    use ballot_core::impls::{InMemoryVoteQueue, InMemoryVoteStore};
    use ballot_core::observability::WorkerMetrics;
    use ballot_core::ports::{FixedClock, VoteQueue};
    use chrono::{TimeZone, Utc};
    use tower::ServiceExt;

    struct Fixture {
        queue: InMemoryVoteQueue,
        store: InMemoryVoteStore,
        metrics: Arc<WorkerMetrics>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                queue: InMemoryVoteQueue::new(),
                store: InMemoryVoteStore::new(),
                metrics: Arc::new(WorkerMetrics::new()),
            }
        }

        fn app(&self) -> Router {
            let at = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
            let checker = HealthChecker::new(
                "ballot-worker",
                Arc::new(self.queue.clone()),
                Arc::new(self.store.clone()),
                Arc::new(FixedClock::new(at)),
                Arc::clone(&self.metrics),
            );
            router(AppState {
                health: Arc::new(checker),
                queue_key: "votes".to_string(),
            })
        }
    }

    async fn get(app: Router, path: &str) -> (StatusCode, Option<String>, String) {
        let response = app
            .oneshot(Request::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_string());
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, content_type, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn health_ok_when_dependencies_answer() {
        let fixture = Fixture::new();
        let (status, _, body) = get(fixture.app(), "/health").await;

        assert_eq!(status, StatusCode::OK);
        let report: HealthReport = serde_json::from_str(&body).unwrap();
        assert!(report.is_healthy());
        assert_eq!(report.timestamp, "2024-01-01T10:00:00Z");
    }

    #[tokio::test]
    async fn health_503_when_queue_down() {
        let fixture = Fixture::new();
        fixture.queue.set_available(false);
        let (status, _, body) = get(fixture.app(), "/health").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["redis"], "disconnected");
        assert_eq!(json["database"], "connected");
        assert_eq!(json["status"], "unhealthy");
        assert!(json["redis_error"].is_string());
    }

    #[tokio::test]
    async fn metrics_are_prometheus_text() {
        let fixture = Fixture::new();
        fixture.metrics.inc_processed("cats");
        fixture.queue.push("votes", "{}").await.unwrap();

        let (status, content_type, body) = get(fixture.app(), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(content_type.unwrap().starts_with("text/plain; version=0.0.4"));
        assert!(body.contains("votes_processed_total{choice=\"cats\"} 1"));
        assert!(body.contains("vote_queue_depth 1"));
        assert!(body.contains("vote_process_duration_seconds_bucket"));
    }

    #[tokio::test]
    async fn health_checks_show_up_in_metrics() {
        let fixture = Fixture::new();
        get(fixture.app(), "/health").await;
        fixture.store.set_available(false);
        get(fixture.app(), "/health").await;

        let (_, _, body) = get(fixture.app(), "/metrics").await;
        assert!(body.contains("health_checks_total{status=\"healthy\"} 1"));
        assert!(body.contains("health_checks_total{status=\"unhealthy\"} 1"));
    }

    #[tokio::test]
    async fn metrics_without_queue_skip_depth() {
        let fixture = Fixture::new();
        fixture.queue.set_available(false);
        let (status, _, body) = get(fixture.app(), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(!body.contains("vote_queue_depth "));
    }

    #[tokio::test]
    async fn banner_and_unknown_paths() {
        let fixture = Fixture::new();
        let (status, _, body) = get(fixture.app(), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.starts_with("ballot-worker"));

        let (status, _, _) = get(fixture.app(), "/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
