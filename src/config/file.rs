//! TOML configuration file loading
//!
//! Supports `~/.config/deboot/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::{CloudBackend, DeviceProfile, DiscoveryFailurePolicy, SimulatedDevice};
use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfigFile {
    /// MQTT broker connection
    #[serde(default)]
    pub mqtt: MqttFileConfig,

    /// Vendor cloud account
    #[serde(default)]
    pub cloud: CloudFileConfig,

    /// Bridge behaviour
    #[serde(default)]
    pub bridge: BridgeFileConfig,
}

/// MQTT broker configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MqttFileConfig {
    /// Broker host name
    pub server: Option<String>,

    /// Broker port
    pub port: Option<u16>,

    pub username: Option<String>,
    pub password: Option<String>,

    /// MQTT client identifier
    pub client_id: Option<String>,

    /// Root topic every bridge topic lives under
    pub topic: Option<String>,

    /// Keep-alive interval in seconds
    pub keep_alive_secs: Option<u64>,
}

/// Vendor cloud configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CloudFileConfig {
    pub username: Option<String>,
    pub password: Option<String>,

    /// Account country code (e.g. "DE")
    pub country: Option<String>,

    /// Session backend
    pub backend: Option<CloudBackend>,

    /// Devices served by the simulated backend
    #[serde(default)]
    pub devices: Vec<SimulatedDevice>,
}

/// Bridge behaviour configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeFileConfig {
    /// Device capacity profile
    pub profile: Option<DeviceProfile>,

    /// Seconds to wait for each device's ready signal
    pub readiness_timeout_secs: Option<u64>,

    /// What a failed discovery does to the process
    pub on_discovery_failure: Option<DiscoveryFailurePolicy>,

    /// Subset of command names to expose (all when absent)
    pub commands: Option<Vec<String>>,

    /// Heartbeat period for the status topic (disabled when absent)
    pub status_interval_secs: Option<u64>,
}

/// Load the TOML config file
///
/// An explicit path must exist. Without one, the standard path is tried and
/// a missing file yields `BridgeConfigFile::default()`.
///
/// # Errors
///
/// Returns error if an explicit file is missing, or if a file exists but
/// cannot be read or parsed
pub fn load_config_file(explicit: Option<&Path>) -> Result<BridgeConfigFile> {
    let path = match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            path.to_path_buf()
        }
        None => match config_file_path() {
            Some(path) if path.exists() => path,
            _ => {
                tracing::debug!("no config file, using defaults");
                return Ok(BridgeConfigFile::default());
            }
        },
    };

    let content = std::fs::read_to_string(&path)?;
    let config = parse_config(&content)?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Parse config file contents
///
/// # Errors
///
/// Returns error if the content is not valid TOML for the schema
pub fn parse_config(content: &str) -> Result<BridgeConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Return the config file path: `~/.config/deboot/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("deboot").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn full_file_parses() {
        let fc = parse_config(
            r#"
            [mqtt]
            server = "broker.lan"
            port = 8883
            username = "bridge"
            password = "secret"
            topic = "ecovacs"

            [cloud]
            username = "me@example.com"
            password = "hunter2"
            country = "FR"
            backend = "simulated"

            [[cloud.devices]]
            id = "E1"
            nickname = "Kitchen"
            ready_after_ms = 250

            [bridge]
            profile = "multi"
            readiness_timeout_secs = 10
            on_discovery_failure = "exit"
            commands = ["clean", "charge"]
            status_interval_secs = 60
            "#,
        )
        .unwrap();

        assert_eq!(fc.mqtt.server.as_deref(), Some("broker.lan"));
        assert_eq!(fc.mqtt.port, Some(8883));
        assert_eq!(fc.cloud.backend, Some(CloudBackend::Simulated));
        assert_eq!(fc.cloud.devices.len(), 1);
        assert_eq!(fc.cloud.devices[0].ready_after_ms, 250);
        assert_eq!(fc.bridge.profile, Some(DeviceProfile::Multi));
        assert_eq!(
            fc.bridge.on_discovery_failure,
            Some(DiscoveryFailurePolicy::Exit)
        );
        assert_eq!(fc.bridge.commands.as_deref().map(<[String]>::len), Some(2));
    }

    #[test]
    fn empty_file_is_default() {
        let fc = parse_config("").unwrap();
        assert!(fc.mqtt.server.is_none());
        assert!(fc.cloud.devices.is_empty());
        assert!(fc.bridge.profile.is_none());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(parse_config("[mqtt]\nhost = \"x\"\n").is_err());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config_file(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn explicit_file_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[mqtt]\ntopic = \"vacuums\"").unwrap();

        let fc = load_config_file(Some(file.path())).unwrap();
        assert_eq!(fc.mqtt.topic.as_deref(), Some("vacuums"));
    }
}
