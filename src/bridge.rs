//! Bridge composition root
//!
//! Wires the status publisher, the device registry and both routers over one
//! shared broker and one shared cloud session.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;

use crate::broker::Broker;
use crate::cloud::CloudSession;
use crate::config::{Config, DEFAULT_READINESS_TIMEOUT, DeviceProfile, DiscoveryFailurePolicy};
use crate::device::{DeviceRegistry, ReadyDevice};
use crate::routing::{CommandRouter, CommandTable, DeviceContext, EventRouter, EventTable};
use crate::status::{OFFLINE, ONLINE, StatusPublisher};
use crate::topics::TopicScheme;
use crate::Result;

/// Everything the bridge needs besides its collaborators
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    /// Topic namespace
    pub topics: TopicScheme,

    /// Device capacity profile
    pub profile: DeviceProfile,

    /// Wait for each device's ready signal
    pub readiness_timeout: Duration,

    /// What a failed discovery does to the bridge
    pub on_discovery_failure: DiscoveryFailurePolicy,

    /// Routed commands
    pub commands: CommandTable,

    /// Routed events
    pub events: EventTable,

    /// Heartbeat period for the status topic
    pub status_interval: Option<Duration>,
}

impl BridgeOptions {
    /// Defaults for a root topic: single device, every command and event
    #[must_use]
    pub fn new(root: &str) -> Self {
        Self {
            topics: TopicScheme::new(root),
            profile: DeviceProfile::default(),
            readiness_timeout: DEFAULT_READINESS_TIMEOUT,
            on_discovery_failure: DiscoveryFailurePolicy::default(),
            commands: CommandTable::standard(),
            events: EventTable::standard(),
            status_interval: None,
        }
    }

    /// Options described by a loaded configuration
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the configured command subset is invalid
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            topics: config.topics(),
            profile: config.bridge.profile,
            readiness_timeout: config.bridge.readiness_timeout,
            on_discovery_failure: config.bridge.on_discovery_failure,
            commands: config.command_table()?,
            events: EventTable::standard(),
            status_interval: config.bridge.status_interval,
        })
    }
}

/// The running bridge
pub struct Bridge {
    options: BridgeOptions,
    broker: Arc<dyn Broker>,
    cloud: Arc<dyn CloudSession>,
    status: StatusPublisher,
    events: EventRouter,
    commands: CommandRouter,
    linked: Mutex<Vec<DeviceContext>>,
}

impl Bridge {
    /// Create a bridge over a connected broker and an unconnected cloud session
    #[must_use]
    pub fn new(
        options: BridgeOptions,
        broker: Arc<dyn Broker>,
        cloud: Arc<dyn CloudSession>,
    ) -> Self {
        let status = StatusPublisher::new(Arc::clone(&broker), options.topics.status());
        let events = EventRouter::new(Arc::clone(&broker), Arc::new(options.events.clone()));
        let commands = CommandRouter::new(Arc::clone(&broker), Arc::new(options.commands.clone()));

        Self {
            options,
            broker,
            cloud,
            status,
            events,
            commands,
            linked: Mutex::new(Vec::new()),
        }
    }

    /// Announce the bridge, then discover and attach every ready device
    ///
    /// A cloud connect failure is logged and leaves the bridge without
    /// devices. A discovery failure does the same under the `degrade`
    /// policy. Returns the number of devices linked by this call.
    ///
    /// # Errors
    ///
    /// Returns the discovery error under the `exit` policy
    pub async fn link(&self) -> Result<usize> {
        self.status.publish(ONLINE).await;

        if let Err(e) = self.cloud.connect().await {
            tracing::warn!(backend = self.cloud.name(), error = %e, "failed to connect to the vendor cloud");
            return Ok(0);
        }
        tracing::info!(backend = self.cloud.name(), "connected to the vendor cloud");

        let registry = DeviceRegistry::new(
            Arc::clone(&self.cloud),
            self.options.profile,
            self.options.readiness_timeout,
        );
        let ready = match registry.discover_ready_devices().await {
            Ok(ready) => ready,
            Err(e) => match self.options.on_discovery_failure {
                DiscoveryFailurePolicy::Degrade => {
                    tracing::warn!(error = %e, "device discovery failed, continuing without devices");
                    return Ok(0);
                }
                DiscoveryFailurePolicy::Exit => return Err(e),
            },
        };

        let contexts = join_all(ready.into_iter().map(|device| self.attach(device))).await;
        let count = contexts.len();
        self.linked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(contexts);
        Ok(count)
    }

    /// Route one ready device: descriptor, event and command subscriptions,
    /// then the initial event triggers
    pub async fn attach(&self, device: ReadyDevice) -> DeviceContext {
        let mut ctx = DeviceContext::new(device, self.options.topics.clone());

        self.events.publish_descriptor(&ctx).await;
        self.events.attach(&mut ctx);
        self.commands.attach(&mut ctx).await;
        self.events.prime(&ctx).await;

        tracing::info!(
            device = %ctx.id(),
            nickname = %ctx.device().nickname(),
            "device linked"
        );
        ctx
    }

    /// Ids of the linked devices
    #[must_use]
    pub fn linked(&self) -> Vec<String> {
        self.linked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|ctx| ctx.id().to_string())
            .collect()
    }

    /// Link, serve until `shutdown` resolves, then shut down
    ///
    /// A shutdown request during startup abandons the devices not yet linked.
    ///
    /// # Errors
    ///
    /// Returns the discovery error under the `exit` policy, after shutting
    /// down
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let heartbeat = self
            .options
            .status_interval
            .map(|interval| self.status.spawn_heartbeat(interval));

        let linked = tokio::select! {
            result = self.link() => Some(result),
            () = &mut shutdown => None,
        };

        let result = match linked {
            Some(Ok(count)) => {
                tracing::info!(devices = count, "bridge running");
                shutdown.await;
                Ok(())
            }
            Some(Err(e)) => {
                tracing::error!(error = %e, "device discovery failed");
                Err(e)
            }
            None => {
                tracing::info!("shutdown requested during startup");
                Ok(())
            }
        };

        if let Some(heartbeat) = heartbeat {
            heartbeat.abort();
        }
        self.shutdown().await;
        result
    }

    /// Publish `offline`, drop every device subscription and close the broker
    pub async fn shutdown(&self) {
        self.status.publish(OFFLINE).await;

        let contexts: Vec<DeviceContext> = std::mem::take(
            &mut *self.linked.lock().unwrap_or_else(|e| e.into_inner()),
        );
        let dropped: usize = contexts.into_iter().map(|mut ctx| ctx.detach()).sum();
        tracing::debug!(subscriptions = dropped, "dropped device subscriptions");

        if let Err(e) = self.broker.disconnect().await {
            tracing::warn!(broker = self.broker.name(), error = %e, "broker disconnect failed");
        }
        tracing::info!("bridge stopped");
    }
}
