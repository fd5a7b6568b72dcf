//! Device event to broker publication routing

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};

use super::{DeviceContext, Subscription};
use crate::broker::Broker;
use crate::topics::{self, TopicScheme};
use crate::{Error, Result};

/// How a multi-valued event result is split into per-item publications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    /// The result is an array; publish each item under the value of `key`
    EachItem {
        /// Field naming the item's sub-topic
        key: &'static str,
    },
    /// The result is one object; publish it under the value of `key`
    ByField {
        /// Field naming the sub-topic
        key: &'static str,
    },
}

/// Static rule from a named device event to outbound topics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventMapping {
    /// Device event name
    pub name: &'static str,

    /// Action that makes the device emit the event
    pub trigger: &'static str,

    /// Topic suffix under the device's base topic
    pub suffix: &'static str,

    /// Per-item fan-out, if the result is published item by item
    pub transform: Option<Transform>,
}

impl EventMapping {
    /// Mapping whose result is published as-is
    #[must_use]
    pub const fn plain(name: &'static str, trigger: &'static str, suffix: &'static str) -> Self {
        Self {
            name,
            trigger,
            suffix,
            transform: None,
        }
    }

    /// Mapping whose result fans out per item
    #[must_use]
    pub const fn fanned(
        name: &'static str,
        trigger: &'static str,
        suffix: &'static str,
        transform: Transform,
    ) -> Self {
        Self {
            name,
            trigger,
            suffix,
            transform: Some(transform),
        }
    }

    /// Turn one event result into the publications it produces
    ///
    /// Items without a usable key are skipped with a warning.
    #[must_use]
    pub fn render(&self, topics: &TopicScheme, device_id: &str, result: &Value) -> Vec<Publication> {
        match self.transform {
            None => vec![Publication {
                topic: topics.event(device_id, self.suffix),
                payload: stringify(result),
            }],
            Some(Transform::EachItem { key }) => {
                let Some(items) = result.as_array() else {
                    tracing::warn!(device = %device_id, event = self.name, "expected a list result");
                    return Vec::new();
                };
                items
                    .iter()
                    .filter_map(|item| self.item(topics, device_id, item, key))
                    .collect()
            }
            Some(Transform::ByField { key }) => {
                self.item(topics, device_id, result, key).into_iter().collect()
            }
        }
    }

    fn item(
        &self,
        topics: &TopicScheme,
        device_id: &str,
        item: &Value,
        key: &str,
    ) -> Option<Publication> {
        let Some(sub_topic) = item_key(item, key) else {
            tracing::warn!(device = %device_id, event = self.name, key, "result item has no usable key");
            return None;
        };
        Some(Publication {
            topic: topics.event_item(device_id, self.suffix, &sub_topic),
            payload: item.to_string(),
        })
    }
}

/// Result values become text: strings as-is, anything else as JSON
fn stringify(result: &Value) -> String {
    match result {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Sub-topic for an item, if its key field is a single topic segment
fn item_key(item: &Value, key: &str) -> Option<String> {
    let segment = match item.get(key)? {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if segment.is_empty() || segment.contains('/') || topics::has_wildcards(&segment) {
        return None;
    }
    Some(segment)
}

/// One outbound message produced from an event result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    /// Destination topic
    pub topic: String,

    /// Text payload
    pub payload: String,
}

/// The set of events every device is routed for
#[derive(Debug, Clone)]
pub struct EventTable {
    mappings: Vec<EventMapping>,
}

impl EventTable {
    /// Build a table, rejecting duplicate event names
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if two mappings share an event name
    pub fn new(mappings: Vec<EventMapping>) -> Result<Self> {
        let mut seen = HashSet::new();
        for mapping in &mappings {
            if !seen.insert(mapping.name) {
                return Err(Error::Config(format!(
                    "event `{}` is mapped twice",
                    mapping.name
                )));
            }
        }
        Ok(Self { mappings })
    }

    /// Vacuum state, clean logs, position and map areas
    #[must_use]
    pub fn standard() -> Self {
        Self {
            mappings: vec![
                EventMapping::plain("ChargeState", "chargestate", "chargestate"),
                EventMapping::plain("BatteryInfo", "batterystate", "batterystate"),
                EventMapping::plain("CleanReport", "cleanstate", "cleanstate"),
                EventMapping::fanned(
                    "CleanLog",
                    "getlogapicleanlogs",
                    "cleanlogs",
                    Transform::EachItem { key: "id" },
                ),
                EventMapping::plain("DeebotPosition", "getposition", "position"),
                EventMapping::fanned(
                    "MapSpotAreaInfo",
                    "getMapSet",
                    "mapareas",
                    Transform::ByField {
                        key: "mapSpotAreaID",
                    },
                ),
            ],
        }
    }

    /// Mappings in routing order
    pub fn iter(&self) -> impl Iterator<Item = &EventMapping> {
        self.mappings.iter()
    }

    /// Look up a mapping by event name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&EventMapping> {
        self.mappings.iter().find(|m| m.name == name)
    }

    /// Number of mappings
    #[must_use]
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

/// Publishes device events to the broker
pub struct EventRouter {
    broker: Arc<dyn Broker>,
    table: Arc<EventTable>,
}

impl EventRouter {
    /// Create a router over a shared broker and event table
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>, table: Arc<EventTable>) -> Self {
        Self { broker, table }
    }

    /// Subscribe to every mapped event of the device
    ///
    /// Events already routed for this context are skipped. Returns the number
    /// of new subscriptions.
    pub fn attach(&self, ctx: &mut DeviceContext) -> usize {
        let mut added = 0;
        for mapping in self.table.iter() {
            let key = format!("event:{}", mapping.name);
            if !ctx.claim(&key) {
                tracing::debug!(device = %ctx.id(), event = mapping.name, "event already routed");
                continue;
            }

            let events = ctx.device().handle().subscribe(mapping.name);
            let task = tokio::spawn(forward_events(
                Arc::clone(&self.broker),
                mapping.clone(),
                ctx.topics().clone(),
                ctx.id().to_string(),
                events,
            ));
            ctx.hold(Subscription::new(key, task));
            added += 1;

            tracing::debug!(device = %ctx.id(), event = mapping.name, "subscribed to event");
        }
        added
    }

    /// Publish the device descriptor to its info topic
    ///
    /// Returns `false` if the publish failed; the failure is logged.
    pub async fn publish_descriptor(&self, ctx: &DeviceContext) -> bool {
        let topic = ctx.topics().info(ctx.id());
        let payload = ctx.device().handle().descriptor().to_string();
        match self.broker.publish(&topic, payload.into_bytes()).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(device = %ctx.id(), topic = %topic, error = %e, "failed to publish device info");
                false
            }
        }
    }

    /// Run every mapped trigger action once so current state gets published
    ///
    /// Returns the number of triggers the device accepted.
    pub async fn prime(&self, ctx: &DeviceContext) -> usize {
        let device = ctx.device().handle();
        let mut accepted = 0;
        for mapping in self.table.iter() {
            match device.run(mapping.trigger, &[]).await {
                Ok(()) => {
                    accepted += 1;
                    tracing::debug!(device = %ctx.id(), trigger = mapping.trigger, "executed event trigger");
                }
                Err(e) => {
                    tracing::warn!(device = %ctx.id(), trigger = mapping.trigger, error = %e, "event trigger failed");
                }
            }
        }
        accepted
    }
}

/// Publish every result of one event stream (background task)
async fn forward_events(
    broker: Arc<dyn Broker>,
    mapping: EventMapping,
    topics: TopicScheme,
    device_id: String,
    mut events: broadcast::Receiver<Value>,
) {
    loop {
        match events.recv().await {
            Ok(result) => {
                for publication in mapping.render(&topics, &device_id, &result) {
                    if let Err(e) = broker
                        .publish(&publication.topic, publication.payload.into_bytes())
                        .await
                    {
                        tracing::warn!(
                            device = %device_id,
                            event = mapping.name,
                            topic = %publication.topic,
                            error = %e,
                            "failed to republish event"
                        );
                    }
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(device = %device_id, event = mapping.name, skipped, "event stream lagged");
            }
            Err(RecvError::Closed) => {
                tracing::debug!(device = %device_id, event = mapping.name, "event stream closed");
                break;
            }
        }
    }
}
