//! Message broker seam
//!
//! The bridge only needs four things from a broker session: publish,
//! subscribe, a stream of inbound messages and an orderly disconnect. The
//! `Broker` trait captures that so the routers can be driven by the MQTT
//! client in production and by a recording double in tests.

pub mod memory;
mod mqtt;

use async_trait::async_trait;
use tokio::sync::broadcast;

pub use memory::MemoryBroker;
pub use mqtt::MqttBroker;

use crate::Result;

/// Capacity of the inbound message fan-out
pub const INBOUND_CAPACITY: usize = 256;

/// A message received from the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    /// Topic the message arrived on
    pub topic: String,

    /// Raw payload
    pub payload: Vec<u8>,
}

impl BrokerMessage {
    /// Create a message from a topic and payload
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Payload as UTF-8 text, lossily decoded
    #[must_use]
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Trait for broker sessions
///
/// Implementations must be safe to call concurrently from every device's
/// routers; serialising access to the transport is their concern.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Broker name for logging
    fn name(&self) -> &'static str;

    /// Publish a payload to a topic
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    /// Subscribe to a topic filter
    async fn subscribe(&self, topic: &str) -> Result<()>;

    /// Stream of inbound messages
    ///
    /// Each call returns an independent receiver that sees every message
    /// arriving after the call.
    fn messages(&self) -> broadcast::Receiver<BrokerMessage>;

    /// Close the session
    ///
    /// Default implementation is a no-op for brokers without a session
    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_text_is_decoded() {
        let message = BrokerMessage::new("deboot/D1/cmd/cleanarea", r#"{"areaid":"3"}"#);
        assert_eq!(message.payload_str(), r#"{"areaid":"3"}"#);
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let message = BrokerMessage::new("t", vec![0xff, b'a']);
        assert_eq!(message.payload_str(), "\u{fffd}a");
    }
}
