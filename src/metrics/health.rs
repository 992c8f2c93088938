//! HTTP endpoints for health probes and Prometheus scraping
//!
//! `/alive` and `/ready` are meant for orchestrator probes. `/health` and
//! `/stats` return JSON for humans.

use crate::metrics::collector::MetricsCollector;
use crate::service::app::AppState;
use crate::service::health::{HealthCheck, HealthStatus};
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

const SERVICE_NAME: &str = "anteroom";

#[derive(Debug, Clone)]
pub struct HealthServerConfig {
    pub port: u16,
    /// Bind address, "0.0.0.0" for all interfaces
    pub host: String,
}

impl Default for HealthServerConfig {
    fn default() -> Self {
        Self {
            port: 9090,
            host: "0.0.0.0".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct HealthServerState {
    pub metrics_collector: Arc<MetricsCollector>,
    pub app_state: Option<Arc<AppState>>,
}

pub struct HealthServer {
    config: HealthServerConfig,
    state: HealthServerState,
}

impl HealthServer {
    pub fn new(config: HealthServerConfig, metrics_collector: Arc<MetricsCollector>) -> Self {
        Self {
            config,
            state: HealthServerState {
                metrics_collector,
                app_state: None,
            },
        }
    }

    pub fn with_app_state(mut self, app_state: Arc<AppState>) -> Self {
        self.state.app_state = Some(app_state);
        self
    }

    /// Serve until `shutdown` flips to true
    pub async fn serve(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .context("Invalid health server address")?;

        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind health server to {}", addr))?;
        info!("Health server listening on http://{}", addr);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                while !*shutdown.borrow() {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                }
                debug!("Health server shutdown signal received");
            })
            .await?;

        info!("Health server stopped");
        Ok(())
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(root_handler))
            .route("/health", get(health_handler))
            .route("/ready", get(ready_handler))
            .route("/alive", get(alive_handler))
            .route("/metrics", get(metrics_handler))
            .route("/stats", get(stats_handler))
            .with_state(self.state.clone())
    }
}

fn status_code(status: HealthStatus) -> StatusCode {
    match status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn not_initialized() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({
            "status": "unhealthy",
            "service": SERVICE_NAME,
            "error": "Service not initialized"
        })),
    )
        .into_response()
}

async fn root_handler() -> impl IntoResponse {
    Json(json!({
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": ["/health", "/ready", "/alive", "/metrics", "/stats"]
    }))
}

async fn health_handler(State(state): State<HealthServerState>) -> Response {
    let Some(app_state) = state.app_state else {
        return not_initialized();
    };

    match HealthCheck::check(app_state).await {
        Ok(health) => (status_code(health.status), Json(health)).into_response(),
        Err(e) => {
            error!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unhealthy", "service": SERVICE_NAME })),
            )
                .into_response()
        }
    }
}

async fn ready_handler(State(state): State<HealthServerState>) -> Response {
    let Some(app_state) = state.app_state else {
        return (StatusCode::SERVICE_UNAVAILABLE, "Service not initialized").into_response();
    };

    match HealthCheck::readiness_check(app_state).await {
        Ok(HealthStatus::Healthy) => (StatusCode::OK, "Ready").into_response(),
        Ok(HealthStatus::Degraded) => (StatusCode::OK, "Degraded but ready").into_response(),
        Ok(HealthStatus::Unhealthy) => (StatusCode::SERVICE_UNAVAILABLE, "Not ready").into_response(),
        Err(e) => {
            error!("Readiness check failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "Not ready").into_response()
        }
    }
}

async fn alive_handler(State(state): State<HealthServerState>) -> Response {
    let Some(app_state) = state.app_state else {
        return (StatusCode::SERVICE_UNAVAILABLE, "Service not initialized").into_response();
    };

    match HealthCheck::liveness_check(app_state).await {
        Ok(HealthStatus::Healthy) => (StatusCode::OK, "Alive").into_response(),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "Not alive").into_response(),
    }
}

async fn metrics_handler(State(state): State<HealthServerState>) -> Response {
    let metric_families = state.metrics_collector.registry().gather();
    let encoder = TextEncoder::new();

    match encoder.encode_to_string(&metric_families) {
        Ok(body) => {
            debug!("Serving {} metric families", metric_families.len());
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, encoder.format_type().to_string())],
                body,
            )
                .into_response()
        }
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}

/// Manager counters plus per-partition occupancy and persistence state
async fn stats_handler(State(state): State<HealthServerState>) -> Response {
    let Some(app_state) = state.app_state else {
        return not_initialized();
    };

    let manager = app_state.manager();
    match (manager.stats().await, manager.status().await) {
        (Ok(stats), Ok(status)) => (
            StatusCode::OK,
            Json(json!({
                "service": {
                    "name": SERVICE_NAME,
                    "version": env!("CARGO_PKG_VERSION"),
                    "uptime_seconds": app_state.uptime().as_secs(),
                },
                "stats": stats,
                "status": status,
                "timestamp": chrono::Utc::now(),
            })),
        )
            .into_response(),
        (Err(e), _) | (_, Err(e)) => {
            error!("Failed to collect stats: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": e.to_string(), "tag": e.tag() })),
            )
                .into_response()
        }
    }
}
