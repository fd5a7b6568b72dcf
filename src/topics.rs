//! Topic namespace for the bridge
//!
//! Everything the bridge publishes or subscribes to lives under one
//! configurable root:
//!
//! ```text
//! <root>/bridge/status
//! <root>/<device>/info
//! <root>/<device>/<event suffix>[/<item key>]
//! <root>/<device>/cmd/<command>
//! ```

/// Segment separating a device's command topics from its state topics
pub const COMMAND_SEGMENT: &str = "cmd";

/// Topic builder rooted at the configured prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicScheme {
    root: String,
}

impl TopicScheme {
    /// Create a scheme for the given root, trimming stray separators
    #[must_use]
    pub fn new(root: &str) -> Self {
        Self {
            root: root.trim_matches('/').to_string(),
        }
    }

    /// Root prefix
    #[must_use]
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Bridge liveness topic
    #[must_use]
    pub fn status(&self) -> String {
        format!("{}/bridge/status", self.root)
    }

    /// Base topic of a device, parent of all its state topics
    #[must_use]
    pub fn device_base(&self, device_id: &str) -> String {
        format!("{}/{device_id}", self.root)
    }

    /// Device descriptor topic
    #[must_use]
    pub fn info(&self, device_id: &str) -> String {
        format!("{}/info", self.device_base(device_id))
    }

    /// Topic for a plain event publication
    #[must_use]
    pub fn event(&self, device_id: &str, suffix: &str) -> String {
        format!("{}/{suffix}", self.device_base(device_id))
    }

    /// Topic for one item of a fanned-out event result
    #[must_use]
    pub fn event_item(&self, device_id: &str, suffix: &str, key: &str) -> String {
        format!("{}/{key}", self.event(device_id, suffix))
    }

    /// Prefix shared by every command topic of a device (ends with `/`)
    #[must_use]
    pub fn command_prefix(&self, device_id: &str) -> String {
        format!("{}/{COMMAND_SEGMENT}/", self.device_base(device_id))
    }

    /// Inbound topic for one command
    #[must_use]
    pub fn command(&self, device_id: &str, command: &str) -> String {
        format!("{}{command}", self.command_prefix(device_id))
    }
}

/// Final path segment of a topic
///
/// The command router names commands by this segment only.
#[must_use]
pub fn last_segment(topic: &str) -> &str {
    topic.rsplit('/').next().unwrap_or(topic)
}

/// Whether a topic or root contains MQTT wildcard characters
#[must_use]
pub fn has_wildcards(topic: &str) -> bool {
    topic.contains('+') || topic.contains('#')
}
