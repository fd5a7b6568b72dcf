//! In-memory cloud backend
//!
//! Backs the `simulated` cloud backend of the binary and the test suite.
//! Devices record every action they run, can be told to fail actions, and
//! answer actions with canned event results.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::{broadcast, watch};

use super::{CloudSession, Device};
use crate::config::{CloudConfig, SimulatedDevice};
use crate::{Error, Result};

/// Buffered results per event stream
const EVENT_CAPACITY: usize = 32;

/// An action invocation recorded by a [`MemoryDevice`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionCall {
    /// Action name
    pub action: String,

    /// Positional arguments
    pub args: Vec<String>,
}

impl ActionCall {
    /// Create a call record
    #[must_use]
    pub fn new(action: &str, args: &[&str]) -> Self {
        Self {
            action: action.to_string(),
            args: args.iter().map(ToString::to_string).collect(),
        }
    }
}

/// In-memory device
pub struct MemoryDevice {
    id: String,
    nickname: String,
    class: String,
    ready_tx: watch::Sender<bool>,
    ready_after: Option<Duration>,
    events: Mutex<HashMap<String, broadcast::Sender<Value>>>,
    responses: HashMap<String, Vec<(String, Value)>>,
    failing: HashSet<String>,
    calls: Mutex<Vec<ActionCall>>,
    call_count: watch::Sender<usize>,
}

impl MemoryDevice {
    /// Create a device that is not ready until [`signal_ready`](Self::signal_ready) is called
    #[must_use]
    pub fn new(id: impl Into<String>, nickname: impl Into<String>) -> Self {
        let (ready_tx, _) = watch::channel(false);
        Self {
            id: id.into(),
            nickname: nickname.into(),
            class: "memory".to_string(),
            ready_tx,
            ready_after: None,
            events: Mutex::new(HashMap::new()),
            responses: HashMap::new(),
            failing: HashSet::new(),
            calls: Mutex::new(Vec::new()),
            call_count: watch::channel(0).0,
        }
    }

    /// Signal readiness on its own after `delay`, measured from the first wait
    #[must_use]
    pub fn with_ready_after(mut self, delay: Duration) -> Self {
        self.ready_after = Some(delay);
        self
    }

    /// Set the device class reported in the descriptor
    #[must_use]
    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = class.into();
        self
    }

    /// Emit `event` with `result` whenever `action` runs
    #[must_use]
    pub fn with_response(mut self, action: &str, event: &str, result: Value) -> Self {
        self.responses
            .entry(action.to_string())
            .or_default()
            .push((event.to_string(), result));
        self
    }

    /// Make `action` fail when run
    #[must_use]
    pub fn with_failing_action(mut self, action: &str) -> Self {
        self.failing.insert(action.to_string());
        self
    }

    /// Canned answers to the standard trigger and command actions
    #[must_use]
    pub fn with_standard_responses(self) -> Self {
        self.with_response("chargestate", "ChargeState", json!("idle"))
            .with_response("batterystate", "BatteryInfo", json!(100))
            .with_response("cleanstate", "CleanReport", json!("stop"))
            .with_response(
                "getlogapicleanlogs",
                "CleanLog",
                json!([
                    {"id": "1", "area": 24, "time": 1380, "type": "auto"},
                    {"id": "2", "area": 6, "time": 420, "type": "spotArea"},
                ]),
            )
            .with_response("getposition", "DeebotPosition", json!("0,0"))
            .with_response(
                "getMapSet",
                "MapSpotAreaInfo",
                json!({"mapSpotAreaID": "0", "mapSpotAreaName": "Living room"}),
            )
            .with_response("clean", "CleanReport", json!("auto"))
            .with_response("SpotArea", "CleanReport", json!("spot_area"))
            .with_response("customarea", "CleanReport", json!("custom_area"))
            .with_response("charge", "ChargeState", json!("returning"))
            .with_response("pause", "CleanReport", json!("pause"))
            .with_response("stop", "CleanReport", json!("stop"))
    }

    /// Mark the device ready
    pub fn signal_ready(&self) {
        self.ready_tx.send_replace(true);
    }

    /// Emit an event result, returning how many subscribers received it
    pub fn emit(&self, event: &str, result: Value) -> usize {
        let sender = self.sender(event);
        sender.send(result).unwrap_or(0)
    }

    /// Number of live subscribers for an event
    #[must_use]
    pub fn subscriber_count(&self, event: &str) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(event)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Every action run so far, in order
    #[must_use]
    pub fn calls(&self) -> Vec<ActionCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Wait until at least `count` actions have run
    pub async fn wait_for_calls(&self, count: usize) {
        let mut rx = self.call_count.subscribe();
        let _ = rx.wait_for(|n| *n >= count).await;
    }

    fn sender(&self, event: &str) -> broadcast::Sender<Value> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(event.to_string())
            .or_insert_with(|| broadcast::channel(EVENT_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl Device for MemoryDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn nickname(&self) -> &str {
        &self.nickname
    }

    fn descriptor(&self) -> Value {
        json!({
            "did": self.id,
            "nick": self.nickname,
            "class": self.class,
        })
    }

    async fn ready(&self) {
        if let Some(delay) = self.ready_after {
            tokio::time::sleep(delay).await;
            self.signal_ready();
        }

        let mut rx = self.ready_tx.subscribe();
        // The sender lives as long as the device, so this only ends on readiness
        let _ = rx.wait_for(|ready| *ready).await;
    }

    async fn run(&self, action: &str, args: &[String]) -> Result<()> {
        let count = {
            let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
            calls.push(ActionCall {
                action: action.to_string(),
                args: args.to_vec(),
            });
            calls.len()
        };
        self.call_count.send_replace(count);

        if self.failing.contains(action) {
            return Err(Error::Action {
                device_id: self.id.clone(),
                action: action.to_string(),
                reason: "rejected by device".to_string(),
            });
        }

        if let Some(responses) = self.responses.get(action) {
            for (event, result) in responses {
                self.emit(event, result.clone());
            }
        }

        Ok(())
    }

    fn subscribe(&self, event: &str) -> broadcast::Receiver<Value> {
        self.sender(event).subscribe()
    }
}

/// In-memory cloud session
pub struct MemoryCloud {
    devices: Vec<Arc<MemoryDevice>>,
    connect_error: Option<String>,
    connected: AtomicBool,
}

impl MemoryCloud {
    /// Create a session serving the given devices
    #[must_use]
    pub fn new(devices: Vec<Arc<MemoryDevice>>) -> Self {
        Self {
            devices,
            connect_error: None,
            connected: AtomicBool::new(false),
        }
    }

    /// Make `connect` fail with the given reason
    #[must_use]
    pub fn with_connect_error(mut self, reason: impl Into<String>) -> Self {
        self.connect_error = Some(reason.into());
        self
    }

    /// Build the simulated backend described by the cloud configuration
    ///
    /// Falls back to a single simulated device when none are configured.
    #[must_use]
    pub fn simulated(config: &CloudConfig) -> Self {
        let specs = if config.devices.is_empty() {
            vec![SimulatedDevice::default()]
        } else {
            config.devices.clone()
        };

        let devices = specs
            .into_iter()
            .map(|spec| {
                let nickname = spec.nickname.unwrap_or_else(|| spec.id.clone());
                let device = MemoryDevice::new(spec.id, nickname)
                    .with_class("simulated")
                    .with_standard_responses();
                let device = if spec.never_ready {
                    device
                } else {
                    device.with_ready_after(Duration::from_millis(spec.ready_after_ms))
                };
                Arc::new(device)
            })
            .collect();

        Self::new(devices)
    }

    /// Whether `connect` has succeeded
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CloudSession for MemoryCloud {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn connect(&self) -> Result<()> {
        if let Some(reason) = &self.connect_error {
            return Err(Error::CloudConnect(reason.clone()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn devices(&self) -> Result<Vec<Arc<dyn Device>>> {
        if !self.is_connected() {
            return Err(Error::Enumeration("session is not connected".to_string()));
        }

        Ok(self
            .devices
            .iter()
            .map(|d| Arc::clone(d) as Arc<dyn Device>)
            .collect())
    }
}
