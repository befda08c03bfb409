//! HTTP API
//!
//! | Route | |
//! |-------|---|
//! | `GET /isalive` | liveness |
//! | `GET /version` | build version and revision |
//! | `GET /metrics` | Prometheus text format |
//! | `POST /configure` | run one configuration request |

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::metrics::Metrics;
use crate::provisioner::Provisioner;
use crate::request::ConfigurationRequest;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Source revision, set at build time through `NAMED_REVISION`
pub fn revision() -> &'static str {
    option_env!("NAMED_REVISION").unwrap_or("unknown")
}

#[derive(Clone)]
pub struct AppState {
    pub provisioner: Arc<Provisioner>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(provisioner: Provisioner) -> Self {
        let metrics = Arc::clone(provisioner.metrics());
        Self {
            provisioner: Arc::new(provisioner),
            metrics,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/isalive", get(is_alive))
        .route("/version", get(version))
        .route("/metrics", get(metrics))
        .route("/configure", post(configure))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn is_alive(State(state): State<AppState>) -> &'static str {
    state.metrics.request("isalive");
    ""
}

async fn version(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.metrics.request("version");
    Json(serde_json::json!({
        "version": VERSION,
        "revision": revision(),
    }))
}

async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.encode_text() {
        Ok(text) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            error!("Could not encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn configure(
    State(state): State<AppState>,
    payload: Result<Json<ConfigurationRequest>, JsonRejection>,
) -> Response {
    state.metrics.request("configure");

    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            warn!("Unable to unmarshal configuration request: {}", rejection);
            return (
                StatusCode::BAD_REQUEST,
                format!("Unable to unmarshal configuration request: {}\n", rejection.body_text()),
            )
                .into_response();
        }
    };

    let application = request.application.clone();
    match state.provisioner.provision(request).await {
        Ok(message) => (StatusCode::OK, message).into_response(),
        Err(e) => {
            error!(
                application = %application,
                kind = %e.kind(),
                status = e.status_code,
                endpoint = e.endpoint.as_deref().unwrap_or(""),
                "Configuration failed: {}",
                e
            );
            e.into_response()
        }
    }
}
