//! AMQP message envelope and routing keys

use anyhow::Context;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::Result;
use crate::types::LobbyEvent;

/// Prefix for all lobby event routing keys
pub const ROUTING_KEY_PREFIX: &str = "lobby";

/// Routing key for an event, e.g. `lobby.started.bishop-lobbies-eu`
///
/// Consumers can bind on `lobby.started.#` or `lobby.*.<partition>`.
pub fn routing_key(event: &LobbyEvent) -> String {
    format!(
        "{}.{}.{}",
        ROUTING_KEY_PREFIX,
        event.kind(),
        event.partition()
    )
}

/// Message envelope with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope<T> {
    pub payload: T,
    pub correlation_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub routing_key: String,
}

impl<T> MessageEnvelope<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(payload: T, routing_key: String) -> Self {
        Self {
            payload,
            correlation_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now(),
            routing_key,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("Failed to serialize message envelope")
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).context("Failed to deserialize message envelope")
    }
}

impl MessageEnvelope<LobbyEvent> {
    /// Wrap an event, deriving its routing key
    pub fn for_event(event: LobbyEvent) -> Self {
        let key = routing_key(&event);
        Self::new(event, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LobbyFilled, PartitionCleared};

    fn filled() -> LobbyEvent {
        LobbyEvent::LobbyFilled(LobbyFilled {
            partition: "bishop-lobbies-eu".to_string(),
            host: "h1".to_string(),
            timestamp: chrono::Utc::now(),
        })
    }

    #[test]
    fn test_routing_key_includes_kind_and_partition() {
        assert_eq!(routing_key(&filled()), "lobby.filled.bishop-lobbies-eu");

        let cleared = LobbyEvent::PartitionCleared(PartitionCleared {
            partition: "open-lobbies".to_string(),
            lobbies_removed: 3,
            timestamp: chrono::Utc::now(),
        });
        assert_eq!(routing_key(&cleared), "lobby.cleared.open-lobbies");
    }

    #[test]
    fn test_envelope_bytes() {
        let envelope = MessageEnvelope::for_event(filled());
        assert!(!envelope.correlation_id.is_empty());

        let decoded = MessageEnvelope::<LobbyEvent>::from_bytes(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.routing_key, envelope.routing_key);
        assert_eq!(decoded.payload.kind(), "filled");
    }

    #[test]
    fn test_garbage_bytes_fail() {
        assert!(MessageEnvelope::<LobbyEvent>::from_bytes(b"nope").is_err());
    }
}
