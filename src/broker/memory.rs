//! In-memory broker
//!
//! Records publications and subscriptions, can be told to fail specific
//! topics, and lets callers inject inbound messages. Used by the test suite
//! in place of a live MQTT session.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{Broker, BrokerMessage, INBOUND_CAPACITY};
use crate::{Error, Result};

/// In-memory broker session
pub struct MemoryBroker {
    published: Mutex<Vec<BrokerMessage>>,
    subscriptions: Mutex<Vec<String>>,
    failing_publish: Mutex<HashSet<String>>,
    failing_subscribe: Mutex<HashSet<String>>,
    inbound: broadcast::Sender<BrokerMessage>,
    outbound: broadcast::Sender<BrokerMessage>,
    disconnected: AtomicBool,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    /// Create an empty broker
    #[must_use]
    pub fn new() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            failing_publish: Mutex::new(HashSet::new()),
            failing_subscribe: Mutex::new(HashSet::new()),
            inbound: broadcast::channel(INBOUND_CAPACITY).0,
            outbound: broadcast::channel(INBOUND_CAPACITY).0,
            disconnected: AtomicBool::new(false),
        }
    }

    /// Make every publish to `topic` fail
    pub fn fail_publish(&self, topic: &str) {
        self.failing_publish
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(topic.to_string());
    }

    /// Make every subscribe to `topic` fail
    pub fn fail_subscribe(&self, topic: &str) {
        self.failing_subscribe
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(topic.to_string());
    }

    /// Deliver an inbound message to every receiver, returning how many got it
    pub fn inject(&self, topic: &str, payload: impl Into<Vec<u8>>) -> usize {
        self.inbound
            .send(BrokerMessage::new(topic, payload))
            .unwrap_or(0)
    }

    /// Stream of successful publications made after the call
    #[must_use]
    pub fn outbound(&self) -> broadcast::Receiver<BrokerMessage> {
        self.outbound.subscribe()
    }

    /// Every successful publication, in order
    #[must_use]
    pub fn published(&self) -> Vec<BrokerMessage> {
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Payloads published to one topic, as text
    #[must_use]
    pub fn published_to(&self, topic: &str) -> Vec<String> {
        self.published()
            .into_iter()
            .filter(|m| m.topic == topic)
            .map(|m| m.payload_str().into_owned())
            .collect()
    }

    /// Every subscribe call that succeeded, duplicates included
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Whether `disconnect` has been called
    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let failing = self
            .failing_publish
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(topic);
        if failing {
            return Err(Error::Publish {
                topic: topic.to_string(),
                reason: "rejected by broker".to_string(),
            });
        }

        let message = BrokerMessage::new(topic, payload);
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message.clone());
        // Nobody watching the outbound stream is fine
        let _ = self.outbound.send(message);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<()> {
        let failing = self
            .failing_subscribe
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(topic);
        if failing {
            return Err(Error::Subscribe {
                topic: topic.to_string(),
                reason: "rejected by broker".to_string(),
            });
        }

        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(topic.to_string());
        Ok(())
    }

    fn messages(&self) -> broadcast::Receiver<BrokerMessage> {
        self.inbound.subscribe()
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnected.store(true, Ordering::SeqCst);
        Ok(())
    }
}
