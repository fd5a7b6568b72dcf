//! MQTT broker session backed by `rumqttc`

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet,
    QoS,
};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;

use super::{Broker, BrokerMessage, INBOUND_CAPACITY};
use crate::config::MqttConfig;
use crate::{Error, Result};

/// Pending requests the client may queue before `publish` waits
const REQUEST_CAPACITY: usize = 64;

/// How long to wait for the broker's CONNACK
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause between event loop polls after a connection error
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// How long `disconnect` waits for the DISCONNECT packet to go out
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// MQTT session shared by every device router
pub struct MqttBroker {
    client: AsyncClient,
    inbound: broadcast::Sender<BrokerMessage>,
    /// Topic filters to restore after a reconnect
    subscriptions: Arc<Mutex<BTreeSet<String>>>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl MqttBroker {
    /// Connect to the broker and wait for it to accept the session
    ///
    /// `status_topic` receives an `offline` last-will message if the
    /// connection drops without a clean disconnect.
    ///
    /// # Errors
    ///
    /// Returns `Error::BrokerConnect` if the broker is unreachable, refuses
    /// the session, or does not answer within the connect timeout
    pub async fn connect(config: &MqttConfig, status_topic: &str) -> Result<Self> {
        let mut options = MqttOptions::new(&config.client_id, &config.server, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        options.set_last_will(LastWill::new(
            status_topic,
            crate::status::OFFLINE,
            QoS::AtLeastOnce,
            false,
        ));
        if let Some(username) = &config.username {
            options.set_credentials(username, config.password.as_deref().unwrap_or_default());
        }

        let (client, mut event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);

        tracing::debug!(
            server = %config.server,
            port = config.port,
            client_id = %config.client_id,
            "connecting to MQTT broker"
        );

        tokio::time::timeout(CONNECT_TIMEOUT, wait_for_connack(&mut event_loop))
            .await
            .map_err(|_| {
                Error::BrokerConnect(format!(
                    "no answer from {}:{} within {}s",
                    config.server,
                    config.port,
                    CONNECT_TIMEOUT.as_secs()
                ))
            })??;

        tracing::info!(server = %config.server, port = config.port, "connected to MQTT broker");

        let (inbound, _) = broadcast::channel(INBOUND_CAPACITY);
        let subscriptions = Arc::new(Mutex::new(BTreeSet::new()));

        let task = tokio::spawn(drive_event_loop(
            event_loop,
            client.clone(),
            inbound.clone(),
            Arc::clone(&subscriptions),
        ));

        Ok(Self {
            client,
            inbound,
            subscriptions,
            event_loop: Mutex::new(Some(task)),
        })
    }
}

#[async_trait]
impl Broker for MqttBroker {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| Error::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn subscribe(&self, topic: &str) -> Result<()> {
        self.subscriptions.lock().await.insert(topic.to_string());
        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| Error::Subscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    fn messages(&self) -> broadcast::Receiver<BrokerMessage> {
        self.inbound.subscribe()
    }

    async fn disconnect(&self) -> Result<()> {
        if let Err(e) = self.client.disconnect().await {
            tracing::warn!(error = %e, "MQTT disconnect request failed");
        }

        if let Some(mut task) = self.event_loop.lock().await.take() {
            if tokio::time::timeout(DISCONNECT_GRACE, &mut task).await.is_err() {
                task.abort();
            }
        }

        tracing::info!("disconnected from MQTT broker");
        Ok(())
    }
}

/// Poll the event loop until the broker answers the CONNECT
async fn wait_for_connack(event_loop: &mut EventLoop) -> Result<()> {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(Error::BrokerConnect(format!(
                        "broker refused the session: {:?}",
                        ack.code
                    )))
                };
            }
            Ok(_) => {}
            Err(e) => return Err(Error::BrokerConnect(e.to_string())),
        }
    }
}

/// Run the event loop (background task)
///
/// Forwards inbound publishes, restores subscriptions after a reconnect and
/// keeps polling through connection errors until the client disconnects.
async fn drive_event_loop(
    mut event_loop: EventLoop,
    client: AsyncClient,
    inbound: broadcast::Sender<BrokerMessage>,
    subscriptions: Arc<Mutex<BTreeSet<String>>>,
) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                tracing::trace!(topic = %publish.topic, bytes = publish.payload.len(), "inbound message");
                // No receivers just means no device is listening yet
                let _ = inbound.send(BrokerMessage::new(publish.topic, publish.payload.to_vec()));
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                let topics = subscriptions.lock().await.clone();
                tracing::info!(count = topics.len(), "reconnected to MQTT broker, restoring subscriptions");
                for topic in topics {
                    // The event loop is the consumer of the request queue, so never await here
                    if let Err(e) = client.try_subscribe(&topic, QoS::AtLeastOnce) {
                        tracing::warn!(topic = %topic, error = %e, "failed to restore subscription");
                    }
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                tracing::debug!("MQTT event loop stopping");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "MQTT connection error, retrying");
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}
