//! Bridge liveness on the status topic

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::broker::Broker;

/// Status value while the bridge is attached
pub const ONLINE: &str = "online";

/// Status value after shutdown, also the broker last-will
pub const OFFLINE: &str = "offline";

/// Publishes the bridge's liveness value
#[derive(Clone)]
pub struct StatusPublisher {
    broker: Arc<dyn Broker>,
    topic: String,
}

impl StatusPublisher {
    /// Create a publisher for the given status topic
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>, topic: impl Into<String>) -> Self {
        Self {
            broker,
            topic: topic.into(),
        }
    }

    /// Status topic
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish a status value, logging instead of failing
    ///
    /// Returns whether the broker accepted the publish.
    pub async fn publish(&self, status: &str) -> bool {
        match self.broker.publish(&self.topic, status.as_bytes().to_vec()).await {
            Ok(()) => {
                tracing::debug!(topic = %self.topic, status, "published bridge status");
                true
            }
            Err(e) => {
                tracing::warn!(topic = %self.topic, status, error = %e, "failed to publish bridge status");
                false
            }
        }
    }

    /// Re-publish `online` every `interval` until the handle is aborted
    ///
    /// The first publication happens one interval after the call.
    #[must_use]
    pub fn spawn_heartbeat(&self, interval: Duration) -> JoinHandle<()> {
        let publisher = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                publisher.publish(ONLINE).await;
            }
        })
    }
}
