//! Configuration management for the Deboot bridge
//!
//! Values are layered env > toml > default. The merge takes the parsed file
//! and an environment lookup so it can be exercised without touching the
//! process environment.

pub mod file;

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::routing::CommandTable;
use crate::topics::{self, TopicScheme};
use crate::{Error, Result};

pub use file::BridgeConfigFile;

/// Default root topic
pub const DEFAULT_TOPIC: &str = "deboot";

/// Default wait for a device's ready signal
pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(30);

/// Deboot bridge configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// MQTT broker connection
    pub mqtt: MqttConfig,

    /// Vendor cloud account and backend
    pub cloud: CloudConfig,

    /// Bridge behaviour
    pub bridge: BridgeConfig,
}

/// MQTT broker connection
#[derive(Debug, Clone)]
pub struct MqttConfig {
    /// Broker host name
    pub server: String,

    /// Broker port
    pub port: u16,

    /// Optional username
    pub username: Option<String>,

    /// Optional password
    pub password: Option<String>,

    /// MQTT client identifier (defaults to `deboot-<uuid>`)
    pub client_id: String,

    /// Root topic
    pub topic: String,

    /// Keep-alive interval in seconds
    pub keep_alive_secs: u64,
}

/// Vendor cloud session configuration
#[derive(Debug, Clone, Default)]
pub struct CloudConfig {
    /// Account user name
    pub username: Option<String>,

    /// Account password
    pub password: Option<String>,

    /// Account country code
    pub country: String,

    /// Session backend
    pub backend: CloudBackend,

    /// Devices served by the simulated backend
    pub devices: Vec<SimulatedDevice>,
}

/// Cloud session backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudBackend {
    /// In-process simulated devices
    #[default]
    Simulated,
}

/// A device served by the simulated backend
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulatedDevice {
    /// Device id
    pub id: String,

    /// Display name (defaults to the id)
    #[serde(default)]
    pub nickname: Option<String>,

    /// Delay before the device signals readiness
    #[serde(default = "default_ready_after_ms")]
    pub ready_after_ms: u64,

    /// Never signal readiness (exercises the readiness timeout)
    #[serde(default)]
    pub never_ready: bool,
}

const fn default_ready_after_ms() -> u64 {
    500
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self {
            id: "sim-1".to_string(),
            nickname: Some("Simulated Deebot".to_string()),
            ready_after_ms: default_ready_after_ms(),
            never_ready: false,
        }
    }
}

/// How many devices a deployment serves
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceProfile {
    /// Exactly one device; any other count fails discovery
    #[default]
    Single,
    /// Any number of devices
    Multi,
}

impl FromStr for DeviceProfile {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "single" => Ok(Self::Single),
            "multi" => Ok(Self::Multi),
            other => Err(Error::Config(format!("unknown device profile: {other}"))),
        }
    }
}

impl fmt::Display for DeviceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single => write!(f, "single"),
            Self::Multi => write!(f, "multi"),
        }
    }
}

/// What a failed device discovery does to the process
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryFailurePolicy {
    /// Log and keep the bridge running without devices
    #[default]
    Degrade,
    /// Stop the bridge with an error
    Exit,
}

impl FromStr for DiscoveryFailurePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "degrade" => Ok(Self::Degrade),
            "exit" => Ok(Self::Exit),
            other => Err(Error::Config(format!(
                "unknown discovery failure policy: {other}"
            ))),
        }
    }
}

impl fmt::Display for DiscoveryFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Degrade => write!(f, "degrade"),
            Self::Exit => write!(f, "exit"),
        }
    }
}

/// Bridge behaviour
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Device capacity profile
    pub profile: DeviceProfile,

    /// Wait for each device's ready signal
    pub readiness_timeout: Duration,

    /// What a failed discovery does to the process
    pub on_discovery_failure: DiscoveryFailurePolicy,

    /// Exposed command names (`None` = all recognised commands)
    pub commands: Option<Vec<String>>,

    /// Heartbeat period for the status topic
    pub status_interval: Option<Duration>,
}

impl Config {
    /// Load configuration from the config file and process environment
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be loaded or the result is invalid
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let fc = file::load_config_file(path)?;
        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Merge a parsed config file with environment values and defaults
    ///
    /// # Errors
    ///
    /// Returns error if an environment value cannot be parsed or the merged
    /// configuration is invalid
    pub fn from_sources(
        fc: BridgeConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        // MQTT (env > toml > default)
        let mqtt = MqttConfig {
            server: env("DEBOOT_MQTT_SERVER")
                .or(fc.mqtt.server)
                .unwrap_or_else(|| "localhost".to_string()),
            port: env("DEBOOT_MQTT_PORT")
                .and_then(|s| s.parse().ok())
                .or(fc.mqtt.port)
                .unwrap_or(1883),
            username: env("DEBOOT_MQTT_USERNAME").or(fc.mqtt.username),
            password: env("DEBOOT_MQTT_PASSWORD").or(fc.mqtt.password),
            client_id: env("DEBOOT_MQTT_CLIENT_ID")
                .or(fc.mqtt.client_id)
                .unwrap_or_else(|| format!("deboot-{}", uuid::Uuid::new_v4().simple())),
            topic: env("DEBOOT_MQTT_TOPIC")
                .or(fc.mqtt.topic)
                .unwrap_or_else(|| DEFAULT_TOPIC.to_string()),
            keep_alive_secs: fc.mqtt.keep_alive_secs.unwrap_or(30),
        };

        // Cloud account (env > toml > default)
        let cloud = CloudConfig {
            username: env("DEBOOT_CLOUD_USERNAME").or(fc.cloud.username),
            password: env("DEBOOT_CLOUD_PASSWORD").or(fc.cloud.password),
            country: env("DEBOOT_CLOUD_COUNTRY")
                .or(fc.cloud.country)
                .unwrap_or_else(|| "DE".to_string())
                .to_uppercase(),
            backend: fc.cloud.backend.unwrap_or_default(),
            devices: fc.cloud.devices,
        };

        // Bridge behaviour (env > toml > default)
        let profile = match env("DEBOOT_PROFILE") {
            Some(value) => value.parse()?,
            None => fc.bridge.profile.unwrap_or_default(),
        };
        let on_discovery_failure = match env("DEBOOT_ON_DISCOVERY_FAILURE") {
            Some(value) => value.parse()?,
            None => fc.bridge.on_discovery_failure.unwrap_or_default(),
        };
        let readiness_timeout = env("DEBOOT_READINESS_TIMEOUT_SECS")
            .and_then(|s| s.parse().ok())
            .or(fc.bridge.readiness_timeout_secs)
            .map_or(DEFAULT_READINESS_TIMEOUT, Duration::from_secs);

        let bridge = BridgeConfig {
            profile,
            readiness_timeout,
            on_discovery_failure,
            commands: fc.bridge.commands,
            status_interval: fc.bridge.status_interval_secs.map(Duration::from_secs),
        };

        let config = Self {
            mqtt,
            cloud,
            bridge,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the merged configuration for values the bridge cannot run with
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first invalid value
    pub fn validate(&self) -> Result<()> {
        let root = self.mqtt.topic.trim_matches('/');
        if root.is_empty() {
            return Err(Error::Config("mqtt topic must not be empty".to_string()));
        }
        if topics::has_wildcards(root) {
            return Err(Error::Config(format!(
                "mqtt topic must not contain wildcards: {root}"
            )));
        }
        if self.bridge.readiness_timeout.is_zero() {
            return Err(Error::Config(
                "readiness timeout must be greater than zero".to_string(),
            ));
        }
        if self.bridge.status_interval.is_some_and(|d| d.is_zero()) {
            return Err(Error::Config(
                "status interval must be greater than zero".to_string(),
            ));
        }
        if let Some(names) = &self.bridge.commands {
            CommandTable::standard().select(names)?;
        }
        for device in &self.cloud.devices {
            if device.id.is_empty() || device.id.contains('/') || topics::has_wildcards(&device.id)
            {
                return Err(Error::Config(format!(
                    "simulated device id is not usable in a topic: {:?}",
                    device.id
                )));
            }
        }
        Ok(())
    }

    /// Topic scheme rooted at the configured topic
    #[must_use]
    pub fn topics(&self) -> TopicScheme {
        TopicScheme::new(&self.mqtt.topic)
    }

    /// Command table restricted to the configured command names
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a configured name is not a known command
    pub fn command_table(&self) -> Result<CommandTable> {
        let table = CommandTable::standard();
        match &self.bridge.commands {
            Some(names) => table.select(names),
            None => Ok(table),
        }
    }
}

fn redact(value: Option<&String>) -> &'static str {
    if value.is_some() { "********" } else { "(none)" }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[mqtt]")?;
        writeln!(f, "server = {}", self.mqtt.server)?;
        writeln!(f, "port = {}", self.mqtt.port)?;
        writeln!(
            f,
            "username = {}",
            self.mqtt.username.as_deref().unwrap_or("(none)")
        )?;
        writeln!(f, "password = {}", redact(self.mqtt.password.as_ref()))?;
        writeln!(f, "client_id = {}", self.mqtt.client_id)?;
        writeln!(f, "topic = {}", self.mqtt.topic)?;
        writeln!(f, "keep_alive_secs = {}", self.mqtt.keep_alive_secs)?;
        writeln!(f)?;
        writeln!(f, "[cloud]")?;
        writeln!(
            f,
            "username = {}",
            self.cloud.username.as_deref().unwrap_or("(none)")
        )?;
        writeln!(f, "password = {}", redact(self.cloud.password.as_ref()))?;
        writeln!(f, "country = {}", self.cloud.country)?;
        writeln!(f, "backend = {:?}", self.cloud.backend)?;
        for device in &self.cloud.devices {
            writeln!(
                f,
                "device = {} ({}ms{})",
                device.id,
                device.ready_after_ms,
                if device.never_ready { ", never ready" } else { "" }
            )?;
        }
        writeln!(f)?;
        writeln!(f, "[bridge]")?;
        writeln!(f, "profile = {}", self.bridge.profile)?;
        writeln!(
            f,
            "readiness_timeout_secs = {}",
            self.bridge.readiness_timeout.as_secs()
        )?;
        writeln!(
            f,
            "on_discovery_failure = {}",
            self.bridge.on_discovery_failure
        )?;
        match &self.bridge.commands {
            Some(names) => writeln!(f, "commands = {}", names.join(", "))?,
            None => writeln!(f, "commands = (all)")?,
        }
        match self.bridge.status_interval {
            Some(interval) => writeln!(f, "status_interval_secs = {}", interval.as_secs()),
            None => writeln!(f, "status_interval_secs = (disabled)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_file_or_env() {
        let config = Config::from_sources(BridgeConfigFile::default(), env_from(&[])).unwrap();

        assert_eq!(config.mqtt.server, "localhost");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.topic, DEFAULT_TOPIC);
        assert!(config.mqtt.client_id.starts_with("deboot-"));
        assert_eq!(config.cloud.country, "DE");
        assert_eq!(config.bridge.profile, DeviceProfile::Single);
        assert_eq!(config.bridge.readiness_timeout, DEFAULT_READINESS_TIMEOUT);
        assert_eq!(
            config.bridge.on_discovery_failure,
            DiscoveryFailurePolicy::Degrade
        );
        assert!(config.bridge.status_interval.is_none());
    }

    #[test]
    fn env_overrides_file() {
        let fc = file::parse_config(
            "[mqtt]\nserver = \"file-host\"\nport = 1884\n[bridge]\nprofile = \"single\"\n",
        )
        .unwrap();
        let env = env_from(&[
            ("DEBOOT_MQTT_SERVER", "env-host"),
            ("DEBOOT_PROFILE", "multi"),
        ]);

        let config = Config::from_sources(fc, env).unwrap();

        assert_eq!(config.mqtt.server, "env-host");
        assert_eq!(config.mqtt.port, 1884);
        assert_eq!(config.bridge.profile, DeviceProfile::Multi);
    }

    #[test]
    fn invalid_profile_in_env_is_rejected() {
        let err = Config::from_sources(
            BridgeConfigFile::default(),
            env_from(&[("DEBOOT_PROFILE", "fleet")]),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn wildcard_root_topic_is_rejected() {
        let fc = file::parse_config("[mqtt]\ntopic = \"home/+\"\n").unwrap();
        assert!(Config::from_sources(fc, env_from(&[])).is_err());
    }

    #[test]
    fn empty_root_topic_is_rejected() {
        let err = Config::from_sources(
            BridgeConfigFile::default(),
            env_from(&[("DEBOOT_MQTT_TOPIC", "/")]),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn zero_readiness_timeout_is_rejected() {
        let fc = file::parse_config("[bridge]\nreadiness_timeout_secs = 0\n").unwrap();
        assert!(Config::from_sources(fc, env_from(&[])).is_err());
    }

    #[test]
    fn unknown_command_is_rejected() {
        let fc = file::parse_config("[bridge]\ncommands = [\"clean\", \"dance\"]\n").unwrap();
        let err = Config::from_sources(fc, env_from(&[])).unwrap_err();
        assert!(err.to_string().contains("dance"));
    }

    #[test]
    fn command_subset_builds_table() {
        let fc = file::parse_config("[bridge]\ncommands = [\"clean\", \"charge\"]\n").unwrap();
        let config = Config::from_sources(fc, env_from(&[])).unwrap();

        let table = config.command_table().unwrap();
        assert_eq!(table.names(), vec!["clean", "charge"]);
    }

    #[test]
    fn display_redacts_passwords() {
        let env = env_from(&[
            ("DEBOOT_MQTT_PASSWORD", "mqtt-secret"),
            ("DEBOOT_CLOUD_PASSWORD", "cloud-secret"),
        ]);
        let config = Config::from_sources(BridgeConfigFile::default(), env).unwrap();

        let shown = config.to_string();
        assert!(!shown.contains("mqtt-secret"));
        assert!(!shown.contains("cloud-secret"));
        assert!(shown.contains("password = ********"));
    }

    #[test]
    fn topics_use_configured_root() {
        let env = env_from(&[("DEBOOT_MQTT_TOPIC", "ecovacs")]);
        let config = Config::from_sources(BridgeConfigFile::default(), env).unwrap();
        assert_eq!(config.topics().info("E1"), "ecovacs/E1/info");
    }
}
