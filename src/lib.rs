//! Deboot - MQTT bridge for cloud-connected robot vacuums
//!
//! This library provides the bridge between an MQTT broker and the devices
//! of a vendor cloud session:
//! - Device discovery with a bounded readiness wait
//! - Device events republished as topics
//! - Command topics dispatched as device actions
//! - Bridge liveness on a status topic
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    MQTT broker                       │
//! │   bridge/status  │  <id>/info  │  <id>/<event>  │ cmd │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                  Deboot bridge                       │
//! │   Status  │  EventRouter  │  CommandRouter          │
//! │           DeviceRegistry (readiness gate)           │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                 Vendor cloud session                 │
//! │   devices  │  ready  │  run(action)  │  events       │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod bridge;
pub mod broker;
pub mod cloud;
pub mod config;
pub mod device;
pub mod error;
pub mod routing;
pub mod status;
pub mod topics;

pub use bridge::{Bridge, BridgeOptions};
pub use config::Config;
pub use device::{DeviceRegistry, ReadyDevice, await_ready};
pub use error::{Error, Result};
pub use routing::{CommandRouter, CommandTable, DeviceContext, EventRouter, EventTable};
pub use status::StatusPublisher;
pub use topics::TopicScheme;
