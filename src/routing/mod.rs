//! Per-device routing between the broker and the cloud
//!
//! Each ready device gets one [`DeviceContext`] that owns its topics and the
//! subscription handles created for it. The [`EventRouter`] turns device
//! events into publications; the [`CommandRouter`] turns inbound command
//! messages into device actions. Both claim a key in the context before
//! subscribing, so attaching twice never registers a second handler.

mod commands;
mod events;

use std::collections::HashSet;
use std::fmt;

use tokio::task::JoinHandle;

pub use commands::{CommandRouter, CommandSpec, CommandTable, Invocation};
pub use events::{EventMapping, EventRouter, EventTable, Publication, Transform};

use crate::device::ReadyDevice;
use crate::topics::TopicScheme;

/// A live subscription
///
/// Dropping the handle stops the task that serves it.
pub struct Subscription {
    key: String,
    task: JoinHandle<()>,
}

impl Subscription {
    /// Wrap the task serving a subscription
    #[must_use]
    pub fn new(key: impl Into<String>, task: JoinHandle<()>) -> Self {
        Self {
            key: key.into(),
            task,
        }
    }

    /// Key the subscription was claimed under
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether the serving task is still running
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Everything the routers hold for one device
#[derive(Debug)]
pub struct DeviceContext {
    device: ReadyDevice,
    topics: TopicScheme,
    claimed: HashSet<String>,
    subscriptions: Vec<Subscription>,
}

impl DeviceContext {
    /// Create an empty context for a ready device
    #[must_use]
    pub fn new(device: ReadyDevice, topics: TopicScheme) -> Self {
        Self {
            device,
            topics,
            claimed: HashSet::new(),
            subscriptions: Vec::new(),
        }
    }

    /// The device this context serves
    #[must_use]
    pub const fn device(&self) -> &ReadyDevice {
        &self.device
    }

    /// Device identifier
    #[must_use]
    pub fn id(&self) -> &str {
        self.device.id()
    }

    /// Topic scheme the device's topics are built from
    #[must_use]
    pub const fn topics(&self) -> &TopicScheme {
        &self.topics
    }

    /// Claim a routing key, returning `false` if it is already held
    pub fn claim(&mut self, key: &str) -> bool {
        self.claimed.insert(key.to_string())
    }

    /// Give up a claim whose subscription could not be established
    pub fn release(&mut self, key: &str) {
        self.claimed.remove(key);
    }

    /// Whether a routing key is held
    #[must_use]
    pub fn is_claimed(&self, key: &str) -> bool {
        self.claimed.contains(key)
    }

    /// Keep a subscription alive for as long as the context
    pub fn hold(&mut self, subscription: Subscription) {
        self.subscriptions.push(subscription);
    }

    /// Live subscriptions, in the order they were created
    #[must_use]
    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    /// Drop every subscription and claim, returning how many were dropped
    pub fn detach(&mut self) -> usize {
        let count = self.subscriptions.len();
        self.subscriptions.clear();
        self.claimed.clear();
        tracing::debug!(device = %self.device.id(), count, "device detached");
        count
    }
}
