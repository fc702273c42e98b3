//! HTTP server for the Prometheus metrics endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{info, trace};

use crate::render::{CONTENT_TYPE, Renderer};
use crate::snapshot::CollectionError;
use crate::store::{PollStatus, SharedStore};

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    store: SharedStore,
    renderer: Arc<Renderer>,
}

/// Body of the `/status` endpoint.
#[derive(Debug, Serialize)]
struct StatusBody {
    poll: PollStatus,
    snapshot: Option<SnapshotSummary>,
}

#[derive(Debug, Serialize)]
struct SnapshotSummary {
    collected_at: DateTime<Utc>,
    age_secs: f64,
    servable: bool,
    jails: Vec<String>,
    collection_errors: Vec<CollectionError>,
}

/// Create the HTTP router.
pub fn create_router(store: SharedStore, renderer: Arc<Renderer>, metrics_path: &str) -> Router {
    let state = AppState { store, renderer };

    Router::new()
        .route(metrics_path, get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/status", get(status_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Handler for the metrics endpoint. Always answers 200; availability is
/// expressed through the `up` gauge.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let snapshot = state.store.current();
    let body = state.renderer.render(snapshot.as_deref(), Utc::now());
    trace!(bytes = body.len(), "Rendered metrics");

    (StatusCode::OK, [("content-type", CONTENT_TYPE)], body).into_response()
}

/// Handler for the /health endpoint.
async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

/// Handler for the /ready endpoint.
async fn ready_handler(State(state): State<AppState>) -> Response {
    match state.store.current() {
        Some(snapshot) if state.renderer.is_servable(&snapshot, Utc::now()) => {
            (StatusCode::OK, "ready\n").into_response()
        }
        Some(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            "not ready - snapshot is stale\n",
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "not ready - no successful poll yet\n",
        )
            .into_response(),
    }
}

/// Handler for the /status endpoint.
async fn status_handler(State(state): State<AppState>) -> Json<StatusBody> {
    let now = Utc::now();
    let snapshot = state.store.current().map(|s| SnapshotSummary {
        collected_at: s.collected_at(),
        age_secs: s.age(now).as_secs_f64(),
        servable: state.renderer.is_servable(&s, now),
        jails: s.jails().iter().map(|j| j.name.clone()).collect(),
        collection_errors: s.collection_errors().iter().cloned().collect(),
    });

    Json(StatusBody {
        poll: state.store.status(),
        snapshot,
    })
}

/// HTTP server configuration.
pub struct HttpServer {
    store: SharedStore,
    renderer: Arc<Renderer>,
    metrics_path: String,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(store: SharedStore, renderer: Renderer, metrics_path: String) -> Self {
        Self {
            store,
            renderer: Arc::new(renderer),
            metrics_path,
        }
    }

    /// Serve on an already bound listener until the shutdown signal is received.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let addr = listener.local_addr()?;
        let router = create_router(self.store, self.renderer, &self.metrics_path);

        info!(
            addr = %addr,
            path = %self.metrics_path,
            "HTTP server listening"
        );

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                loop {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PrometheusConfig, StalenessConfig};
    use crate::snapshot::Snapshot;
    use crate::snapshot::tests::record;
    use crate::store::SnapshotStore;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use std::collections::BTreeSet;
    use std::time::Duration;
    use tower::ServiceExt;

    fn make_router(store: SharedStore, path: &str) -> Router {
        let renderer = Renderer::new(&PrometheusConfig::default(), &StalenessConfig::default());
        create_router(store, Arc::new(renderer), path)
    }

    fn published_store(collected_at: DateTime<Utc>) -> SharedStore {
        let store = Arc::new(SnapshotStore::new());
        store.publish(Snapshot::new(
            collected_at,
            Duration::from_millis(10),
            vec![record("sshd", 3)],
            BTreeSet::new(),
        ));
        store
    }

    async fn body_string(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_metrics_endpoint_before_first_poll() {
        let router = make_router(Arc::new(SnapshotStore::new()), "/metrics");

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get("content-type").unwrap();
        assert_eq!(content_type.to_str().unwrap(), CONTENT_TYPE);

        let body = body_string(response).await;
        assert!(body.contains("fail2ban_up 0\n"));
        assert!(!body.contains("jail="));
    }

    #[tokio::test]
    async fn test_metrics_endpoint_with_snapshot() {
        let router = make_router(published_store(Utc::now()), "/metrics");

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let body = body_string(response).await;
        assert!(body.contains("fail2ban_up 1\n"));
        assert!(body.contains("fail2ban_jail_banned_current{jail=\"sshd\"} 3\n"));
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let router = make_router(Arc::new(SnapshotStore::new()), "/metrics");

        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ready_endpoint_not_ready() {
        let router = make_router(Arc::new(SnapshotStore::new()), "/metrics");

        let response = router
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_ready_endpoint_ready() {
        let router = make_router(published_store(Utc::now()), "/metrics");

        let response = router
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ready_endpoint_stale() {
        let collected = Utc::now() - chrono::Duration::hours(1);
        let router = make_router(published_store(collected), "/metrics");

        let response = router
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let store = published_store(Utc::now());
        store.record_failure("Fail2ban control channel unreachable: socket missing");
        let router = make_router(store, "/metrics");

        let response = router
            .oneshot(Request::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["poll"]["polls_failed"], 1);
        assert_eq!(body["snapshot"]["jails"][0], "sshd");
        assert_eq!(body["snapshot"]["servable"], true);
    }

    #[tokio::test]
    async fn test_custom_metrics_path() {
        let router = make_router(Arc::new(SnapshotStore::new()), "/f2b/metrics");

        let response = router
            .clone()
            .oneshot(Request::get("/f2b/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
