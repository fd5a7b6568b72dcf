//! Device registry: enumerate and gate every device of the cloud session

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use super::readiness::{ReadyDevice, await_ready};
use crate::cloud::CloudSession;
use crate::config::DeviceProfile;
use crate::{Error, Result};

/// Discovers the devices the bridge operates on
pub struct DeviceRegistry {
    cloud: Arc<dyn CloudSession>,
    profile: DeviceProfile,
    timeout: Duration,
}

impl DeviceRegistry {
    /// Create a registry over a cloud session
    #[must_use]
    pub fn new(cloud: Arc<dyn CloudSession>, profile: DeviceProfile, timeout: Duration) -> Self {
        Self {
            cloud,
            profile,
            timeout,
        }
    }

    /// Enumerate devices once and gate each of them concurrently
    ///
    /// Devices that miss the readiness timeout are logged and left out of
    /// the result; the other devices are unaffected.
    ///
    /// # Errors
    ///
    /// Returns error if enumeration fails, or if the device count does not
    /// fit the profile (in which case no device is gated)
    pub async fn discover_ready_devices(&self) -> Result<Vec<ReadyDevice>> {
        let devices = self.cloud.devices().await?;
        tracing::info!(
            backend = self.cloud.name(),
            count = devices.len(),
            profile = %self.profile,
            "enumerated devices"
        );

        check_capacity(self.profile, devices.len())?;

        let timeout = self.timeout;
        let gates = devices.into_iter().map(|device| async move {
            let id = device.id().to_string();
            let nickname = device.nickname().to_string();
            tracing::debug!(device = %id, "waiting for device to become ready");
            (id, nickname, await_ready(device, timeout).await)
        });

        let mut ready = Vec::new();
        for (id, nickname, outcome) in join_all(gates).await {
            match outcome {
                Ok(device) => {
                    tracing::info!(device = %id, nickname = %nickname, "device is ready");
                    ready.push(device);
                }
                Err(e) => {
                    tracing::warn!(device = %id, nickname = %nickname, error = %e, "device excluded");
                }
            }
        }

        Ok(ready)
    }
}

/// Check an enumerated device count against the deployment profile
///
/// # Errors
///
/// Returns `Error::DeviceCountMismatch` when the single-device profile sees
/// anything other than exactly one device
pub fn check_capacity(profile: DeviceProfile, found: usize) -> Result<()> {
    match profile {
        DeviceProfile::Single if found != 1 => Err(Error::DeviceCountMismatch { expected: 1, found }),
        DeviceProfile::Multi if found == 0 => {
            tracing::warn!("cloud session returned no devices");
            Ok(())
        }
        _ => Ok(()),
    }
}
