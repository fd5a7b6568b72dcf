//! Error types for the Deboot bridge

use thiserror::Error;

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the Deboot bridge
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// The MQTT broker could not be reached or refused the session
    #[error("broker connect failed: {0}")]
    BrokerConnect(String),

    /// The vendor cloud session could not be established
    #[error("cloud connect failed: {0}")]
    CloudConnect(String),

    /// Device enumeration failed
    #[error("device enumeration failed: {0}")]
    Enumeration(String),

    /// A device did not signal readiness in time
    #[error("device {device_id} did not become ready within {timeout_secs}s")]
    ReadinessTimeout {
        /// Device that timed out
        device_id: String,
        /// Wait that elapsed
        timeout_secs: u64,
    },

    /// The cloud returned a device count the deployment cannot serve
    #[error("received {found} device(s), expected exactly {expected}")]
    DeviceCountMismatch {
        /// Devices the profile can handle
        expected: usize,
        /// Devices the cloud returned
        found: usize,
    },

    /// Publishing to the broker failed
    #[error("publish to {topic} failed: {reason}")]
    Publish {
        /// Destination topic
        topic: String,
        /// Transport error text
        reason: String,
    },

    /// Subscribing to a broker topic failed
    #[error("subscribe to {topic} failed: {reason}")]
    Subscribe {
        /// Topic filter
        topic: String,
        /// Transport error text
        reason: String,
    },

    /// A command payload was well formed but missing required data
    #[error("invalid `{command}` command: {reason}")]
    CommandValidation {
        /// Command name
        command: String,
        /// What was wrong
        reason: String,
    },

    /// A command payload could not be parsed
    #[error("malformed `{command}` payload: {source}")]
    MalformedPayload {
        /// Command name
        command: String,
        /// Parse failure
        #[source]
        source: serde_json::Error,
    },

    /// A command topic named a command the router does not know
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// A device action failed at the cloud boundary
    #[error("action `{action}` failed on {device_id}: {reason}")]
    Action {
        /// Device the action ran on
        device_id: String,
        /// Action name
        action: String,
        /// Failure text
        reason: String,
    },

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether the failure came from a command payload (validation or parse)
    #[must_use]
    pub const fn is_command_rejection(&self) -> bool {
        matches!(
            self,
            Self::CommandValidation { .. } | Self::MalformedPayload { .. } | Self::UnknownCommand(_)
        )
    }
}
