//! Metrics collection using Prometheus
//!
//! This module provides metrics collection for the anteroom lobby service
//! using Prometheus metrics.

use crate::error::LobbyError;
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the lobby service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    pub service: ServiceMetrics,
    pub lobby: LobbyMetrics,
    pub persistence: PersistenceMetrics,
    pub lookups: LookupMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Outbound events by kind and delivery status
    pub events_published_total: IntCounterVec,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// Lobby-related metrics
#[derive(Clone)]
pub struct LobbyMetrics {
    /// Active lobbies per partition
    pub active_lobbies: IntGaugeVec,

    /// Participants currently in lobbies per partition
    pub waiting_participants: IntGaugeVec,

    pub lobbies_created_total: IntCounterVec,

    /// Closed lobbies by outcome (started, cancelled, pruned, cleared)
    pub lobbies_closed_total: IntCounterVec,

    /// Joins by mode (host, region)
    pub joins_total: IntCounterVec,

    /// Command outcomes, labelled with the error tag on failure
    pub commands_total: IntCounterVec,

    pub command_duration_seconds: HistogramVec,

    pub list_rate_limited_total: IntCounterVec,
}

/// Snapshot persistence metrics
#[derive(Clone)]
pub struct PersistenceMetrics {
    pub snapshot_writes_total: IntCounterVec,
    pub snapshot_write_duration_seconds: Histogram,
}

/// Rank service lookup metrics
#[derive(Clone)]
pub struct LookupMetrics {
    pub tier_lookups_total: IntCounterVec,
    pub tier_lookup_duration_seconds: Histogram,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service = ServiceMetrics::new(&registry)?;
        let lobby = LobbyMetrics::new(&registry)?;
        let persistence = PersistenceMetrics::new(&registry)?;
        let lookups = LookupMetrics::new(&registry)?;

        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        Ok(Self {
            registry,
            service,
            lobby,
            persistence,
            lookups,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Record a command outcome and its duration
    pub fn record_command<T>(
        &self,
        command: &str,
        result: &std::result::Result<T, LobbyError>,
        duration: Duration,
    ) {
        let outcome = match result {
            Ok(_) => "ok",
            Err(e) => e.tag(),
        };
        self.lobby
            .commands_total
            .with_label_values(&[command, outcome])
            .inc();
        self.lobby
            .command_duration_seconds
            .with_label_values(&[command])
            .observe(duration.as_secs_f64());
    }

    pub fn record_lobby_created(&self, partition: &str) {
        self.lobby
            .lobbies_created_total
            .with_label_values(&[partition])
            .inc();
    }

    pub fn record_lobby_closed(&self, partition: &str, outcome: &str) {
        self.lobby
            .lobbies_closed_total
            .with_label_values(&[partition, outcome])
            .inc();
    }

    pub fn record_join(&self, partition: &str, mode: &str) {
        self.lobby
            .joins_total
            .with_label_values(&[partition, mode])
            .inc();
    }

    pub fn record_rate_limited(&self, partition: &str) {
        self.lobby
            .list_rate_limited_total
            .with_label_values(&[partition])
            .inc();
    }

    pub fn record_event(&self, kind: &str, delivered: bool) {
        let status = if delivered { "delivered" } else { "failed" };
        self.service
            .events_published_total
            .with_label_values(&[kind, status])
            .inc();
    }

    /// Refresh per-partition gauges from (partition, lobbies, participants)
    pub fn update_partition_counts(&self, counts: &[(String, usize, usize)]) {
        for (partition, lobbies, participants) in counts {
            self.lobby
                .active_lobbies
                .with_label_values(&[partition.as_str()])
                .set(*lobbies as i64);
            self.lobby
                .waiting_participants
                .with_label_values(&[partition.as_str()])
                .set(*participants as i64);
        }
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl PersistenceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let snapshot_writes_total = IntCounterVec::new(
            Opts::new("anteroom_snapshot_writes_total", "Snapshot writes by status"),
            &["status"],
        )?;
        registry.register(Box::new(snapshot_writes_total.clone()))?;

        let snapshot_write_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "anteroom_snapshot_write_duration_seconds",
            "Time spent copying and writing a snapshot",
        ))?;
        registry.register(Box::new(snapshot_write_duration_seconds.clone()))?;

        Ok(Self {
            snapshot_writes_total,
            snapshot_write_duration_seconds,
        })
    }

    pub fn record_write(&self, success: bool, seconds: f64) {
        let status = if success { "success" } else { "failed" };
        self.snapshot_writes_total.with_label_values(&[status]).inc();
        self.snapshot_write_duration_seconds.observe(seconds);
    }
}

impl LookupMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let tier_lookups_total = IntCounterVec::new(
            Opts::new("anteroom_tier_lookups_total", "Rank service lookups by status"),
            &["status"],
        )?;
        registry.register(Box::new(tier_lookups_total.clone()))?;

        let tier_lookup_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "anteroom_tier_lookup_duration_seconds",
                "Rank service lookup latency",
            )
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        )?;
        registry.register(Box::new(tier_lookup_duration_seconds.clone()))?;

        Ok(Self {
            tier_lookups_total,
            tier_lookup_duration_seconds,
        })
    }

    pub fn record(&self, status: &str, seconds: f64) {
        self.tier_lookups_total.with_label_values(&[status]).inc();
        self.tier_lookup_duration_seconds.observe(seconds);
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("anteroom_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let events_published_total = IntCounterVec::new(
            Opts::new(
                "anteroom_events_published_total",
                "Outbound lobby events by kind and status",
            ),
            &["kind", "status"],
        )?;
        registry.register(Box::new(events_published_total.clone()))?;

        let health_status = IntGauge::new(
            "anteroom_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("anteroom_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            events_published_total,
            health_status,
            component_health,
        })
    }
}

impl LobbyMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let active_lobbies = IntGaugeVec::new(
            Opts::new("anteroom_active_lobbies", "Number of active lobbies"),
            &["partition"],
        )?;
        registry.register(Box::new(active_lobbies.clone()))?;

        let waiting_participants = IntGaugeVec::new(
            Opts::new(
                "anteroom_waiting_participants",
                "Participants currently in lobbies",
            ),
            &["partition"],
        )?;
        registry.register(Box::new(waiting_participants.clone()))?;

        let lobbies_created_total = IntCounterVec::new(
            Opts::new("anteroom_lobbies_created_total", "Total lobbies created"),
            &["partition"],
        )?;
        registry.register(Box::new(lobbies_created_total.clone()))?;

        let lobbies_closed_total = IntCounterVec::new(
            Opts::new("anteroom_lobbies_closed_total", "Total lobbies closed"),
            &["partition", "outcome"],
        )?;
        registry.register(Box::new(lobbies_closed_total.clone()))?;

        let joins_total = IntCounterVec::new(
            Opts::new("anteroom_joins_total", "Successful joins"),
            &["partition", "mode"],
        )?;
        registry.register(Box::new(joins_total.clone()))?;

        let commands_total = IntCounterVec::new(
            Opts::new("anteroom_commands_total", "Lobby commands by outcome"),
            &["command", "outcome"],
        )?;
        registry.register(Box::new(commands_total.clone()))?;

        let command_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "anteroom_command_duration_seconds",
                "Lobby command latency",
            ),
            &["command"],
        )?;
        registry.register(Box::new(command_duration_seconds.clone()))?;

        let list_rate_limited_total = IntCounterVec::new(
            Opts::new(
                "anteroom_list_rate_limited_total",
                "Listing requests rejected by the cooldown",
            ),
            &["partition"],
        )?;
        registry.register(Box::new(list_rate_limited_total.clone()))?;

        Ok(Self {
            active_lobbies,
            waiting_participants,
            lobbies_created_total,
            lobbies_closed_total,
            joins_total,
            commands_total,
            command_duration_seconds,
            list_rate_limited_total,
        })
    }
}
