//! Health checks
//!
//! Liveness only asks whether the service is running. Readiness also
//! requires that lobby commands are accepted, so a paused instance drops
//! out of rotation during a coordinated restart.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::lobby::LobbyManagerStats;
use crate::service::app::AppState;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Gauge value: 0=unhealthy, 1=degraded, 2=healthy
    pub fn as_gauge(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 2,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 0,
        }
    }

    fn worst(self, other: HealthStatus) -> HealthStatus {
        if self.as_gauge() <= other.as_gauge() {
            self
        } else {
            other
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub uptime_seconds: u64,
    pub checks: Vec<ComponentCheck>,
    pub stats: LobbyManagerStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    pub message: Option<String>,
}

impl ComponentCheck {
    fn healthy(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: HealthStatus::Healthy,
            message: None,
        }
    }

    fn with(name: &str, status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            message: Some(message.into()),
        }
    }
}

impl HealthCheck {
    /// Full check of every component
    pub async fn check(app_state: Arc<AppState>) -> Result<Self> {
        let checks = vec![
            Self::check_service_running(&app_state).await,
            Self::check_lobby_commands(&app_state),
            Self::check_snapshots(&app_state),
            Self::check_events(&app_state),
        ];
        let status = checks
            .iter()
            .fold(HealthStatus::Healthy, |acc, c| acc.worst(c.status));

        let stats = match app_state.manager().stats().await {
            Ok(stats) => stats,
            Err(e) => {
                debug!("Failed to read lobby stats for health check: {}", e);
                LobbyManagerStats::default()
            }
        };

        Ok(HealthCheck {
            status,
            service: app_state.config().service.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            uptime_seconds: app_state.uptime().as_secs(),
            checks,
            stats,
        })
    }

    pub async fn liveness_check(app_state: Arc<AppState>) -> Result<HealthStatus> {
        if app_state.is_running().await {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Unhealthy)
        }
    }

    pub async fn readiness_check(app_state: Arc<AppState>) -> Result<HealthStatus> {
        if !app_state.is_running().await || app_state.manager().is_paused() {
            return Ok(HealthStatus::Unhealthy);
        }
        Ok(Self::check_snapshots(&app_state)
            .status
            .worst(Self::check_events(&app_state).status))
    }

    async fn check_service_running(app_state: &AppState) -> ComponentCheck {
        if app_state.is_running().await {
            ComponentCheck::healthy("service_running")
        } else {
            ComponentCheck::with(
                "service_running",
                HealthStatus::Unhealthy,
                "Service is not running",
            )
        }
    }

    fn check_lobby_commands(app_state: &AppState) -> ComponentCheck {
        let manager = app_state.manager();
        if manager.is_paused() {
            ComponentCheck::with("lobby_commands", HealthStatus::Degraded, "Commands paused")
        } else if !manager.hosting_enabled() {
            ComponentCheck::with("lobby_commands", HealthStatus::Degraded, "Hosting disabled")
        } else {
            ComponentCheck::healthy("lobby_commands")
        }
    }

    fn check_snapshots(app_state: &AppState) -> ComponentCheck {
        match app_state.snapshots().status().last_error {
            Some(error) => ComponentCheck::with(
                "snapshot",
                HealthStatus::Degraded,
                format!("Last write failed: {}", error),
            ),
            None => ComponentCheck::healthy("snapshot"),
        }
    }

    fn check_events(app_state: &AppState) -> ComponentCheck {
        match app_state.amqp_open() {
            None => ComponentCheck::with("amqp_connection", HealthStatus::Healthy, "disabled"),
            Some(true) => ComponentCheck::healthy("amqp_connection"),
            Some(false) => ComponentCheck::with(
                "amqp_connection",
                HealthStatus::Degraded,
                "Connection closed; events are being dropped",
            ),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}
