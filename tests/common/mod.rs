//! Shared test utilities

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use deboot_bridge::broker::{BrokerMessage, MemoryBroker};
use deboot_bridge::cloud::{MemoryCloud, MemoryDevice};
use deboot_bridge::config::DeviceProfile;
use deboot_bridge::{Bridge, BridgeOptions};
use tokio::sync::broadcast;

/// Root topic used by every test
pub const ROOT: &str = "deboot";

/// Upper bound for anything a test waits on
pub const WAIT: Duration = Duration::from_secs(5);

/// Create a device that is already ready
#[must_use]
pub fn ready_device(id: &str) -> Arc<MemoryDevice> {
    let device = Arc::new(MemoryDevice::new(id, format!("{id} nick")));
    device.signal_ready();
    device
}

/// Build a bridge over an in-memory broker and cloud
#[must_use]
pub fn build_bridge(
    profile: DeviceProfile,
    devices: Vec<Arc<MemoryDevice>>,
) -> (Bridge, Arc<MemoryBroker>) {
    let broker = Arc::new(MemoryBroker::new());
    let cloud = Arc::new(MemoryCloud::new(devices));
    let mut options = BridgeOptions::new(ROOT);
    options.profile = profile;
    let bridge = Bridge::new(options, broker.clone(), cloud);
    (bridge, broker)
}

/// Wait for the next publication on `topic`, returning its payload
pub async fn next_on(outbound: &mut broadcast::Receiver<BrokerMessage>, topic: &str) -> String {
    tokio::time::timeout(WAIT, async {
        loop {
            let message = outbound.recv().await.expect("outbound stream closed");
            if message.topic == topic {
                return message.payload_str().into_owned();
            }
        }
    })
    .await
    .expect("timed out waiting for publication")
}

/// Wait until a device has run at least `count` actions
pub async fn wait_for_calls(device: &MemoryDevice, count: usize) {
    tokio::time::timeout(WAIT, device.wait_for_calls(count))
        .await
        .expect("timed out waiting for device actions");
}
