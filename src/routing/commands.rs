//! Broker command topic to device action routing

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};

use super::{DeviceContext, Subscription};
use crate::broker::{Broker, BrokerMessage};
use crate::cloud::Device;
use crate::topics;
use crate::{Error, Result};

/// Claim key of the per-device inbound message handler
const HANDLER_KEY: &str = "commands";

/// Static rule from a command topic to a device action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    /// Command name, the last segment of its topic
    pub name: &'static str,

    /// Device action to run
    pub action: &'static str,

    /// Arguments passed before the payload fields
    pub leading_args: &'static [&'static str],

    /// Payload fields passed as arguments, in order
    ///
    /// Commands without fields never look at the payload.
    pub required_fields: &'static [&'static str],
}

impl CommandSpec {
    /// Build the action invocation for a payload
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedPayload` if a command with fields gets a
    /// payload that is not JSON, and `Error::CommandValidation` if the payload
    /// is not an object or a field is missing, null, empty or not a scalar
    pub fn plan(&self, payload: &[u8]) -> Result<Invocation> {
        let mut args: Vec<String> = self.leading_args.iter().map(ToString::to_string).collect();
        if self.required_fields.is_empty() {
            return Ok(Invocation {
                action: self.action.to_string(),
                args,
            });
        }

        let value: Value =
            serde_json::from_slice(payload).map_err(|source| Error::MalformedPayload {
                command: self.name.to_string(),
                source,
            })?;
        let Some(fields) = value.as_object() else {
            return Err(self.invalid("payload must be a JSON object"));
        };

        for field in self.required_fields {
            let arg = match fields.get(*field) {
                None | Some(Value::Null) => {
                    return Err(self.invalid(&format!("missing `{field}`")));
                }
                Some(Value::String(s)) if s.is_empty() => {
                    return Err(self.invalid(&format!("`{field}` is empty")));
                }
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                Some(Value::Bool(b)) => b.to_string(),
                Some(_) => {
                    return Err(self.invalid(&format!("`{field}` must be a string or number")));
                }
            };
            args.push(arg);
        }

        Ok(Invocation {
            action: self.action.to_string(),
            args,
        })
    }

    fn invalid(&self, reason: &str) -> Error {
        Error::CommandValidation {
            command: self.name.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// A device action ready to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Action name
    pub action: String,

    /// Positional arguments
    pub args: Vec<String>,
}

/// Every command the bridge recognises
const STANDARD_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "clean",
        action: "clean",
        leading_args: &[],
        required_fields: &[],
    },
    CommandSpec {
        name: "cleanarea",
        action: "SpotArea",
        leading_args: &["start"],
        required_fields: &["areaid"],
    },
    CommandSpec {
        name: "cleancustomarea",
        action: "customarea",
        leading_args: &["start"],
        required_fields: &["area", "runs"],
    },
    CommandSpec {
        name: "charge",
        action: "charge",
        leading_args: &[],
        required_fields: &[],
    },
    CommandSpec {
        name: "pause",
        action: "pause",
        leading_args: &[],
        required_fields: &[],
    },
    CommandSpec {
        name: "stop",
        action: "stop",
        leading_args: &[],
        required_fields: &[],
    },
];

/// The set of commands every device accepts
#[derive(Debug, Clone)]
pub struct CommandTable {
    specs: Vec<CommandSpec>,
}

impl CommandTable {
    /// All recognised commands
    #[must_use]
    pub fn standard() -> Self {
        Self {
            specs: STANDARD_COMMANDS.to_vec(),
        }
    }

    /// Restrict the table to the named commands, in the given order
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a name is not in the table
    pub fn select(&self, names: &[String]) -> Result<Self> {
        let mut specs: Vec<CommandSpec> = Vec::with_capacity(names.len());
        for name in names {
            let spec = self
                .get(name)
                .ok_or_else(|| Error::Config(format!("unknown command: {name}")))?;
            if !specs.iter().any(|s| s.name == spec.name) {
                specs.push(*spec);
            }
        }
        Ok(Self { specs })
    }

    /// Look up a command by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&CommandSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    /// Command names in table order
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.specs.iter().map(|s| s.name).collect()
    }

    /// Commands in table order
    pub fn iter(&self) -> impl Iterator<Item = &CommandSpec> {
        self.specs.iter()
    }

    /// Build the invocation for a named command
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownCommand` for names outside the table, otherwise
    /// whatever [`CommandSpec::plan`] rejects
    pub fn plan(&self, name: &str, payload: &[u8]) -> Result<Invocation> {
        self.get(name)
            .ok_or_else(|| Error::UnknownCommand(name.to_string()))?
            .plan(payload)
    }
}

/// Dispatches inbound command messages to device actions
pub struct CommandRouter {
    broker: Arc<dyn Broker>,
    table: Arc<CommandTable>,
}

impl CommandRouter {
    /// Create a router over a shared broker and command table
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>, table: Arc<CommandTable>) -> Self {
        Self { broker, table }
    }

    /// Start the device's message handler and subscribe its command topics
    ///
    /// The handler listens before any subscription is made. Topics already
    /// subscribed for this context are skipped; a failed subscription is
    /// logged and left unclaimed. Returns the number of new topic
    /// subscriptions.
    pub async fn attach(&self, ctx: &mut DeviceContext) -> usize {
        if ctx.claim(HANDLER_KEY) {
            let task = tokio::spawn(handle_commands(
                Arc::clone(&self.table),
                Arc::clone(ctx.device().handle()),
                ctx.topics().command_prefix(ctx.id()),
                self.broker.messages(),
            ));
            ctx.hold(Subscription::new(HANDLER_KEY, task));
        }

        let mut added = 0;
        for spec in self.table.iter() {
            let topic = ctx.topics().command(ctx.id(), spec.name);
            let key = format!("command:{topic}");
            if !ctx.claim(&key) {
                tracing::debug!(device = %ctx.id(), topic = %topic, "command topic already subscribed");
                continue;
            }

            match self.broker.subscribe(&topic).await {
                Ok(()) => {
                    added += 1;
                    tracing::debug!(device = %ctx.id(), topic = %topic, "subscribed to command topic");
                }
                Err(e) => {
                    ctx.release(&key);
                    tracing::warn!(device = %ctx.id(), topic = %topic, error = %e, "failed to subscribe to command topic");
                }
            }
        }
        added
    }
}

/// Whether a topic is one of the device's command topics
fn is_command_topic(topic: &str, prefix: &str) -> bool {
    topic
        .strip_prefix(prefix)
        .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
}

/// Serve one device's inbound commands (background task)
async fn handle_commands(
    table: Arc<CommandTable>,
    device: Arc<dyn Device>,
    prefix: String,
    mut messages: broadcast::Receiver<BrokerMessage>,
) {
    loop {
        match messages.recv().await {
            Ok(message) => {
                if is_command_topic(&message.topic, &prefix) {
                    dispatch(&table, device.as_ref(), &message).await;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(device = %device.id(), skipped, "inbound messages dropped");
            }
            Err(RecvError::Closed) => {
                tracing::debug!(device = %device.id(), "inbound message stream closed");
                break;
            }
        }
    }
}

async fn dispatch(table: &CommandTable, device: &dyn Device, message: &BrokerMessage) {
    let command = topics::last_segment(&message.topic);
    tracing::info!(device = %device.id(), command, "received command");

    let invocation = match table.plan(command, &message.payload) {
        Ok(invocation) => invocation,
        Err(e) => {
            tracing::warn!(device = %device.id(), command, error = %e, "command rejected");
            return;
        }
    };

    if let Err(e) = device.run(&invocation.action, &invocation.args).await {
        tracing::warn!(
            device = %device.id(),
            command,
            action = %invocation.action,
            error = %e,
            "command action failed"
        );
    }
}
