//! Event publishers for outbound lobby events

use amqprs::{
    channel::{BasicPublishArguments, Channel, ExchangeDeclareArguments},
    BasicProperties,
};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::amqp::messages::MessageEnvelope;
use crate::error::Result;
use crate::metrics::MetricsCollector;
use crate::types::LobbyEvent;

/// Sink for lobby events
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: LobbyEvent) -> Result<()>;
}

/// Retry policy for publishing
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub exchange: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub publish_timeout_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            exchange: "anteroom.lobby_events".to_string(),
            max_retries: 3,
            retry_delay_ms: 500,
            publish_timeout_ms: 5000,
        }
    }
}

/// Publishes events to a topic exchange
pub struct AmqpEventPublisher {
    channel: Channel,
    config: PublisherConfig,
}

impl AmqpEventPublisher {
    /// Declares the exchange before returning
    pub async fn new(channel: Channel, config: PublisherConfig) -> Result<Self> {
        let publisher = Self { channel, config };
        publisher.declare_exchange().await?;
        Ok(publisher)
    }

    async fn declare_exchange(&self) -> Result<()> {
        let args = ExchangeDeclareArguments::new(&self.config.exchange, "topic")
            .durable(true)
            .finish();
        self.channel
            .exchange_declare(args)
            .await
            .with_context(|| format!("Failed to declare exchange {}", self.config.exchange))?;

        info!("Declared lobby event exchange '{}'", self.config.exchange);
        Ok(())
    }

    async fn publish_with_retry(&self, envelope: &MessageEnvelope<LobbyEvent>) -> Result<()> {
        let mut attempt = 0;
        let mut delay = Duration::from_millis(self.config.retry_delay_ms);

        loop {
            match self.try_publish(envelope).await {
                Ok(()) => {
                    debug!(
                        "Published {} as {}",
                        envelope.routing_key, envelope.correlation_id
                    );
                    return Ok(());
                }
                Err(e) => {
                    attempt += 1;
                    if attempt > self.config.max_retries {
                        error!(
                            "Failed to publish {} after {} retries: {:#}",
                            envelope.routing_key, self.config.max_retries, e
                        );
                        return Err(e);
                    }

                    warn!(
                        "Publish attempt {} for {} failed: {:#}. Retrying in {:?}",
                        attempt, envelope.routing_key, e, delay
                    );
                    sleep(delay).await;
                    delay = Duration::from_millis((delay.as_millis() as u64 * 2).min(5000));
                }
            }
        }
    }

    async fn try_publish(&self, envelope: &MessageEnvelope<LobbyEvent>) -> Result<()> {
        let payload = envelope.to_bytes()?;

        let args = BasicPublishArguments::new(&self.config.exchange, &envelope.routing_key);
        let mut properties = BasicProperties::default();
        properties
            .with_message_id(&envelope.correlation_id)
            .with_timestamp(envelope.timestamp.timestamp() as u64)
            .with_content_type("application/json")
            .with_persistence(true);

        let timeout = Duration::from_millis(self.config.publish_timeout_ms);
        match tokio::time::timeout(timeout, self.channel.basic_publish(properties, payload, args))
            .await
        {
            Ok(result) => result.context("Failed to publish message"),
            Err(_) => Err(anyhow!("Publish timed out after {:?}", timeout)),
        }
    }
}

#[async_trait]
impl EventPublisher for AmqpEventPublisher {
    async fn publish(&self, event: LobbyEvent) -> Result<()> {
        let envelope = MessageEnvelope::for_event(event);
        self.publish_with_retry(&envelope).await
    }
}

/// Writes events to the log instead of a broker
#[derive(Debug, Default)]
pub struct LogEventPublisher;

#[async_trait]
impl EventPublisher for LogEventPublisher {
    async fn publish(&self, event: LobbyEvent) -> Result<()> {
        let body = serde_json::to_string(&event)?;
        info!(target: "anteroom::events", "{} {}", event.kind(), body);
        Ok(())
    }
}

/// Hands events to an [`EventDispatcher`] without waiting for delivery
#[derive(Debug, Clone)]
pub struct QueuedEventPublisher {
    tx: mpsc::UnboundedSender<LobbyEvent>,
}

#[async_trait]
impl EventPublisher for QueuedEventPublisher {
    async fn publish(&self, event: LobbyEvent) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|e| anyhow!("Event dispatcher stopped, dropped {}", e.0.kind()))
    }
}

/// Delivers queued events in order to the real publisher
pub struct EventDispatcher {
    rx: mpsc::UnboundedReceiver<LobbyEvent>,
    inner: Arc<dyn EventPublisher>,
    metrics: Option<Arc<MetricsCollector>>,
}

/// Split a publisher into a non-blocking front and the task that drains it
pub fn event_queue(inner: Arc<dyn EventPublisher>) -> (QueuedEventPublisher, EventDispatcher) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        QueuedEventPublisher { tx },
        EventDispatcher {
            rx,
            inner,
            metrics: None,
        },
    )
}

impl EventDispatcher {
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    async fn deliver(
        inner: &Arc<dyn EventPublisher>,
        metrics: Option<&Arc<MetricsCollector>>,
        event: LobbyEvent,
    ) {
        let kind = event.kind();
        let delivered = match inner.publish(event).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to publish {} event: {:#}", kind, e);
                false
            }
        };
        if let Some(metrics) = metrics {
            metrics.record_event(kind, delivered);
        }
    }

    /// Deliver until shutdown, then flush whatever is still queued
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        debug!("Event dispatcher started");
        loop {
            tokio::select! {
                event = self.rx.recv() => match event {
                    Some(event) => {
                        Self::deliver(&self.inner, self.metrics.as_ref(), event).await
                    }
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.rx.close();
        let mut flushed = 0;
        while let Ok(event) = self.rx.try_recv() {
            Self::deliver(&self.inner, self.metrics.as_ref(), event).await;
            flushed += 1;
        }
        info!("Event dispatcher stopped ({} events flushed)", flushed);
    }
}

/// Records events in memory; for tests
#[derive(Debug, Default)]
pub struct MockEventPublisher {
    events: Mutex<Vec<LobbyEvent>>,
    fail: AtomicBool,
}

impl MockEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent publish fail
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<LobbyEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Event kinds in publish order
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .map(|events| events.iter().map(LobbyEvent::kind).collect())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

#[async_trait]
impl EventPublisher for MockEventPublisher {
    async fn publish(&self, event: LobbyEvent) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("Simulated publish failure"));
        }
        self.events
            .lock()
            .map_err(|_| anyhow!("Failed to acquire events lock"))?
            .push(event);
        Ok(())
    }
}
