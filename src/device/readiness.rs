//! Bounded wait for a device's ready signal

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::cloud::Device;
use crate::{Error, Result};

/// A device that completed its readiness handshake
///
/// Only [`await_ready`] constructs one, so holding a `ReadyDevice` is proof
/// the device won its race against the timeout.
pub struct ReadyDevice {
    device: Arc<dyn Device>,
}

impl ReadyDevice {
    /// Device identifier
    #[must_use]
    pub fn id(&self) -> &str {
        self.device.id()
    }

    /// Display name
    #[must_use]
    pub fn nickname(&self) -> &str {
        self.device.nickname()
    }

    /// Underlying device handle
    #[must_use]
    pub fn handle(&self) -> &Arc<dyn Device> {
        &self.device
    }
}

impl fmt::Debug for ReadyDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadyDevice")
            .field("id", &self.id())
            .field("nickname", &self.nickname())
            .finish()
    }
}

/// Wait for `device` to signal readiness, failing after `timeout`
///
/// The ready signal and the timer race; whichever completes first decides
/// the outcome and the other is dropped. A ready signal arriving after the
/// timeout has no effect on this call.
///
/// # Errors
///
/// Returns `Error::ReadinessTimeout` if the timer elapses first
pub async fn await_ready(device: Arc<dyn Device>, timeout: Duration) -> Result<ReadyDevice> {
    let became_ready = tokio::select! {
        biased;
        () = device.ready() => true,
        () = tokio::time::sleep(timeout) => false,
    };

    if became_ready {
        Ok(ReadyDevice { device })
    } else {
        Err(Error::ReadinessTimeout {
            device_id: device.id().to_string(),
            timeout_secs: timeout.as_secs(),
        })
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_pending, assert_ready_ok};

    use super::*;
    use crate::cloud::MemoryDevice;

    const TIMEOUT: Duration = Duration::from_secs(30);

    #[tokio::test(start_paused = true)]
    async fn ready_before_timeout_resolves() {
        let device = Arc::new(
            MemoryDevice::new("D1", "Kitchen").with_ready_after(Duration::from_secs(1)),
        );
        let started = tokio::time::Instant::now();

        let ready = await_ready(device, TIMEOUT).await.unwrap();

        assert_eq!(ready.id(), "D1");
        assert_eq!(ready.nickname(), "Kitchen");
        assert_eq!(started.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_device_times_out() {
        let device = Arc::new(MemoryDevice::new("D1", "Kitchen"));
        let started = tokio::time::Instant::now();

        let err = await_ready(device, TIMEOUT).await.unwrap_err();

        assert!(matches!(
            err,
            Error::ReadinessTimeout { ref device_id, timeout_secs: 30 } if device_id == "D1"
        ));
        assert_eq!(started.elapsed(), TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn late_ready_signal_is_ignored() {
        let device = Arc::new(MemoryDevice::new("D1", "Kitchen"));

        let result = await_ready(device.clone(), TIMEOUT).await;
        device.signal_ready();

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn pending_until_signalled() {
        let device = Arc::new(MemoryDevice::new("D1", "Kitchen"));
        let mut wait = tokio_test::task::spawn(await_ready(
            device.clone(),
            TIMEOUT,
        ));

        assert_pending!(wait.poll());

        device.signal_ready();

        let ready = assert_ready_ok!(wait.poll());
        assert_eq!(ready.id(), "D1");
    }

    #[tokio::test]
    async fn already_ready_device_resolves_immediately() {
        let device = Arc::new(MemoryDevice::new("D1", "Kitchen"));
        device.signal_ready();

        let ready = await_ready(device, Duration::from_millis(1)).await.unwrap();
        assert_eq!(format!("{ready:?}"), "ReadyDevice { id: \"D1\", nickname: \"Kitchen\" }");
    }
}
