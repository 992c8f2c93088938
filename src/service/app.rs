//! Application state and service coordination
//!
//! `AppState` wires the lobby manager to its collaborators, owns the
//! background tasks and drives startup and shutdown.

use crate::amqp::connection::{AmqpConfig, AmqpConnection};
use crate::amqp::publisher::{
    event_queue, AmqpEventPublisher, EventDispatcher, EventPublisher, LogEventPublisher,
    PublisherConfig,
};
use crate::clock::{Clock, SystemClock};
use crate::config::{validate_config, AppConfig};
use crate::lobby::{LobbyManager, LobbyStore, StaticPartitionProvider};
use crate::metrics::{HealthServer, HealthServerConfig, MetricsCollector};
use crate::rank::{StaticTierLookup, TierLookup, TimedTierLookup};
use crate::service::health::{HealthCheck, HealthStatus};
use crate::snapshot::{FileSnapshotStorage, SnapshotManager, SnapshotStorage};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("AMQP connection error: {message}")]
    AmqpConnection { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Replaceable collaborators of the lobby manager
pub struct Components {
    pub clock: Arc<dyn Clock>,
    pub tiers: Arc<dyn TierLookup>,
    pub publisher: Arc<dyn EventPublisher>,
    pub storage: Arc<dyn SnapshotStorage>,
}

pub struct AppState {
    config: AppConfig,
    manager: Arc<LobbyManager>,
    snapshots: Arc<SnapshotManager>,
    metrics: Arc<MetricsCollector>,
    amqp: Mutex<Option<AmqpConnection>>,
    amqp_enabled: bool,
    dispatcher: Mutex<Option<EventDispatcher>>,
    started_at: Instant,
    is_running: RwLock<bool>,
    shutdown_tx: watch::Sender<bool>,
    background_tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl AppState {
    /// Build the production service from configuration
    ///
    /// Connects to the broker when AMQP is enabled; otherwise events are
    /// only logged.
    pub async fn new(config: AppConfig) -> Result<Arc<Self>, ServiceError> {
        validate_config(&config).map_err(|e| ServiceError::Configuration {
            message: format!("{:#}", e),
        })?;

        let tiers: Arc<dyn TierLookup> = match &config.rank.tiers_file {
            Some(path) => {
                let lookup = StaticTierLookup::from_file(path).map_err(|e| {
                    ServiceError::Initialization {
                        message: format!("{:#}", e),
                    }
                })?;
                info!("Loaded {} tiers from {}", lookup.len(), path.display());
                Arc::new(lookup)
            }
            None => {
                warn!("No tiers file configured; every tier lookup will report an unknown tier");
                Arc::new(StaticTierLookup::new())
            }
        };

        let (publisher, amqp): (Arc<dyn EventPublisher>, Option<AmqpConnection>) =
            if config.amqp.enabled {
                let (publisher, connection) = Self::connect_publisher(&config).await?;
                (publisher, Some(connection))
            } else {
                info!("AMQP disabled; lobby events will be logged only");
                (Arc::new(LogEventPublisher), None)
            };

        let components = Components {
            clock: Arc::new(SystemClock),
            tiers,
            publisher,
            storage: Arc::new(FileSnapshotStorage::new(
                config.persistence.snapshot_path.clone(),
            )),
        };

        Self::assemble(config, components, amqp).await
    }

    /// Build the service around caller-supplied collaborators, without AMQP
    pub async fn with_components(
        config: AppConfig,
        components: Components,
    ) -> Result<Arc<Self>, ServiceError> {
        Self::assemble(config, components, None).await
    }

    async fn connect_publisher(
        config: &AppConfig,
    ) -> Result<(Arc<dyn EventPublisher>, AmqpConnection), ServiceError> {
        let amqp_error = |e: anyhow::Error| ServiceError::AmqpConnection {
            message: format!("{:#}", e),
        };

        let amqp_config = AmqpConfig::from_settings(&config.amqp).map_err(amqp_error)?;
        info!(
            "Connecting to AMQP broker at {}:{}",
            amqp_config.host, amqp_config.port
        );
        let connection = AmqpConnection::new(amqp_config).await.map_err(amqp_error)?;
        let channel = connection.open_channel().await.map_err(amqp_error)?;

        let publisher_config = PublisherConfig {
            exchange: config.amqp.exchange_name.clone(),
            max_retries: config.amqp.max_retry_attempts,
            retry_delay_ms: config.amqp.retry_delay_ms,
            ..PublisherConfig::default()
        };
        let publisher = AmqpEventPublisher::new(channel, publisher_config)
            .await
            .map_err(amqp_error)?;
        info!("Publishing lobby events to exchange {}", config.amqp.exchange_name);

        Ok((Arc::new(publisher), connection))
    }

    async fn assemble(
        config: AppConfig,
        components: Components,
        amqp: Option<AmqpConnection>,
    ) -> Result<Arc<Self>, ServiceError> {
        let init_error = |message: String| ServiceError::Initialization { message };

        let metrics = Arc::new(
            MetricsCollector::new().map_err(|e| init_error(format!("metrics: {:#}", e)))?,
        );

        let provider = Arc::new(
            StaticPartitionProvider::from_leagues(&config.leagues)
                .map_err(|e| ServiceError::Configuration {
                    message: e.to_string(),
                })?,
        );
        let partitions = provider.partition_names();

        let store = Arc::new(LobbyStore::new(
            &partitions,
            config.lobby.capacity,
            components.clock,
        ));
        let snapshots = Arc::new(
            SnapshotManager::new(
                store,
                components.storage,
                partitions,
                config.snapshot_debounce(),
            )
            .with_metrics(metrics.clone()),
        );
        snapshots
            .load_on_start()
            .await
            .map_err(|e| init_error(format!("snapshot restore: {:#}", e)))?;

        let tiers = TimedTierLookup::new(components.tiers, config.lobby.tier_lookup_timeout())
            .with_metrics(metrics.clone());
        let (queue, dispatcher) = event_queue(components.publisher);
        let manager = LobbyManager::new(
            snapshots.clone(),
            provider,
            tiers,
            Arc::new(queue),
            &config.lobby,
        )
        .map_err(|e| init_error(e.to_string()))?
        .with_metrics(metrics.clone());

        let (shutdown_tx, _) = watch::channel(false);
        Ok(Arc::new(Self {
            amqp_enabled: amqp.is_some(),
            amqp: Mutex::new(amqp),
            dispatcher: Mutex::new(Some(dispatcher.with_metrics(metrics.clone()))),
            config,
            manager: Arc::new(manager),
            snapshots,
            metrics,
            started_at: Instant::now(),
            is_running: RwLock::new(false),
            shutdown_tx,
            background_tasks: tokio::sync::Mutex::new(Vec::new()),
        }))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<LobbyManager> {
        &self.manager
    }

    pub fn snapshots(&self) -> &Arc<SnapshotManager> {
        &self.snapshots
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    /// `None` when AMQP is disabled
    pub fn amqp_open(&self) -> Option<bool> {
        if !self.amqp_enabled {
            return None;
        }
        Some(
            self.amqp
                .lock()
                .map(|c| c.as_ref().is_some_and(|c| c.is_open()))
                .unwrap_or(false),
        )
    }

    /// Start the event dispatcher, the snapshot writer, the metrics refresher
    /// and the health server
    pub async fn start(self: &Arc<Self>) -> Result<(), ServiceError> {
        {
            let mut running = self.is_running.write().await;
            if *running {
                return Err(ServiceError::Initialization {
                    message: "Service already started".to_string(),
                });
            }
            *running = true;
        }

        let mut tasks = self.background_tasks.lock().await;

        let dispatcher = self.dispatcher.lock().ok().and_then(|mut d| d.take());
        if let Some(dispatcher) = dispatcher {
            let shutdown = self.shutdown_tx.subscribe();
            tasks.push(tokio::spawn(dispatcher.run(shutdown)));
        }

        let writer = self.snapshots.clone();
        let shutdown = self.shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            writer.run_writer(shutdown).await;
        }));

        let state = self.clone();
        let shutdown = self.shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            state.refresh_metrics(shutdown).await;
        }));

        let server = HealthServer::new(
            HealthServerConfig {
                port: self.config.service.health_port,
                ..HealthServerConfig::default()
            },
            self.metrics.clone(),
        )
        .with_app_state(self.clone());
        let shutdown = self.shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = server.serve(shutdown).await {
                error!("Health server failed: {:#}", e);
            }
        }));

        info!(
            "{} started with {} background tasks",
            self.config.service.name,
            tasks.len()
        );
        Ok(())
    }

    async fn refresh_metrics(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_secs(self.config.service.metrics_refresh_seconds.max(1));
        let mut interval = tokio::time::interval(period);
        debug!("Metrics refresh task started ({:?} interval)", period);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }

            self.metrics
                .service
                .uptime_seconds
                .set(self.uptime().as_secs() as i64);

            match self.manager.store().counts().await {
                Ok(counts) => self.metrics.update_partition_counts(&counts),
                Err(e) => warn!("Failed to read partition counts: {}", e),
            }

            match HealthCheck::check(self.clone()).await {
                Ok(health) => {
                    self.metrics.update_health_status(health.status.as_gauge());
                    for check in &health.checks {
                        self.metrics.update_component_health(
                            &check.name,
                            check.status == HealthStatus::Healthy,
                        );
                    }
                }
                Err(e) => warn!("Health check failed: {}", e),
            }
        }

        debug!("Metrics refresh task stopped");
    }

    /// Stop background tasks, write a final snapshot and close the broker
    /// connection
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        {
            let mut running = self.is_running.write().await;
            if !*running {
                debug!("Shutdown requested but service is not running");
            }
            *running = false;
        }

        self.shutdown_tx.send_replace(true);

        let tasks: Vec<JoinHandle<()>> = self.background_tasks.lock().await.drain(..).collect();
        let count = tasks.len();
        let timeout = self.config.shutdown_timeout();
        for task in tasks {
            let abort = task.abort_handle();
            match tokio::time::timeout(timeout, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Background task ended abnormally: {}", e),
                Err(_) => {
                    warn!("Background task did not stop within {:?}; aborting", timeout);
                    abort.abort();
                }
            }
        }
        info!("Stopped {} background tasks", count);

        let mut result = Ok(());
        if let Err(e) = self.snapshots.flush().await {
            error!("Final snapshot write failed: {}", e);
            result = Err(ServiceError::BackgroundTask {
                message: e.to_string(),
            });
        }

        let connection = self.amqp.lock().ok().and_then(|mut c| c.take());
        if let Some(connection) = connection {
            if let Err(e) = connection.close().await {
                warn!("Failed to close AMQP connection: {:#}", e);
            }
        }

        if let Ok(stats) = self.manager.stats().await {
            info!(
                "Final stats: {} created, {} started, {} cancelled, {} pruned, {} active",
                stats.lobbies_created,
                stats.lobbies_started,
                stats.lobbies_cancelled,
                stats.lobbies_pruned,
                stats.active_lobbies
            );
        }

        result
    }
}
