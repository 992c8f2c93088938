//! AMQP integration for outbound lobby events
//!
//! Lobby state changes are published to a topic exchange. Commands only
//! queue events; a background dispatcher delivers them. Delivery is best
//! effort: a failed publish is logged and counted, never surfaced to callers.

pub mod connection;
pub mod messages;
pub mod publisher;

pub use connection::{AmqpConfig, AmqpConnection};
pub use messages::{routing_key, MessageEnvelope};
pub use publisher::{
    event_queue, AmqpEventPublisher, EventDispatcher, EventPublisher, LogEventPublisher,
    MockEventPublisher, QueuedEventPublisher,
};
