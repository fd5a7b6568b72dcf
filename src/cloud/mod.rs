//! Vendor cloud seam
//!
//! The cloud session owns authentication and the device handles. The bridge
//! sees a device as an id, a nickname, a JSON descriptor, a readiness signal,
//! an action runner and a set of named event streams.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

pub use memory::{ActionCall, MemoryCloud, MemoryDevice};

use crate::Result;

/// A device handle owned by the cloud session
#[async_trait]
pub trait Device: Send + Sync {
    /// Opaque device identifier, used in topics
    fn id(&self) -> &str;

    /// Display name
    fn nickname(&self) -> &str;

    /// JSON descriptor published on the device's info topic
    fn descriptor(&self) -> serde_json::Value;

    /// Resolve once the device has signalled readiness
    ///
    /// May never resolve; callers bound the wait themselves.
    async fn ready(&self);

    /// Run a named action with positional arguments
    async fn run(&self, action: &str, args: &[String]) -> Result<()>;

    /// Subscribe to results of a named event
    fn subscribe(&self, event: &str) -> broadcast::Receiver<serde_json::Value>;
}

/// An authenticated vendor cloud session
#[async_trait]
pub trait CloudSession: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Authenticate and open the session
    async fn connect(&self) -> Result<()>;

    /// Enumerate every device the account can reach
    async fn devices(&self) -> Result<Vec<Arc<dyn Device>>>;
}
