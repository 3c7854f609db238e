//! MQTT broker adapter
//!
//! Uses rumqttc. The event loop is driven by a background task that forwards
//! inbound publishes into an `mpsc` channel; a lost connection ends the task
//! and closes that channel, which the scheduler treats as fatal.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use super::{BrokerClient, INBOUND_CAPACITY, InboundMessage, OutgoingMessage, QoS};
use crate::config::BrokerConfig;
use crate::{Error, Result};

/// Capacity of the client's request queue
const REQUEST_CAPACITY: usize = 64;

/// Shortest keepalive accepted by the client
const MIN_KEEPALIVE_SECS: u64 = 5;

/// How long disconnect waits for the event loop to flush
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// QoS used for command subscriptions
const SUBSCRIBE_QOS: QoS = QoS::AtLeastOnce;

/// MQTT broker client
pub struct MqttBroker {
    client: AsyncClient,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

impl MqttBroker {
    /// Connect to the broker
    ///
    /// Waits for the broker's CONNACK before returning, then hands the event
    /// loop to a background task. Returns the client and a receiver for
    /// messages arriving on subscribed topics.
    ///
    /// # Errors
    ///
    /// Returns error if the connection is refused or cannot be established
    pub async fn connect(config: &BrokerConfig) -> Result<(Self, mpsc::Receiver<InboundMessage>)> {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keepalive.max(MIN_KEEPALIVE_SECS)));

        if let Some((username, password)) = config.credentials() {
            tracing::info!(username, "setting credentials");
            options.set_credentials(username, password);
        }

        if config.has_will() {
            tracing::info!(
                topic = %config.will_topic,
                payload = %config.will_message,
                qos = u8::from(config.will_qos),
                retain = config.will_retain,
                "setting will message"
            );
            options.set_last_will(LastWill::new(
                &config.will_topic,
                config.will_message.as_bytes().to_vec(),
                config.will_qos.into(),
                config.will_retain,
            ));
        }

        tracing::info!(
            host = %config.host,
            port = config.port,
            keepalive = config.keepalive,
            "connecting to MQTT broker"
        );

        let (client, mut event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
        loop {
            match event_loop.poll().await? {
                Event::Incoming(Packet::ConnAck(ack)) => {
                    tracing::info!(code = ?ack.code, "connected to MQTT broker");
                    break;
                }
                event => tracing::trace!(?event, "waiting for CONNACK"),
            }
        }

        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        let event_task = tokio::spawn(drive_event_loop(event_loop, tx));

        Ok((
            Self {
                client,
                event_task: Mutex::new(Some(event_task)),
            },
            rx,
        ))
    }
}

/// Poll the event loop until disconnect or failure, forwarding publishes
async fn drive_event_loop(mut event_loop: EventLoop, tx: mpsc::Sender<InboundMessage>) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = InboundMessage {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                };
                if !forward(&tx, message) {
                    tracing::debug!("inbound receiver dropped, stopping event loop");
                    break;
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                tracing::debug!("disconnect sent");
                break;
            }
            Ok(event) => tracing::trace!(?event, "mqtt event"),
            Err(e) => {
                tracing::error!(error = %e, "MQTT connection lost");
                break;
            }
        }
    }
}

/// Hand a message to the scheduler without waiting
///
/// A full queue drops the message. Returns `false` once the receiver is gone.
fn forward(tx: &mpsc::Sender<InboundMessage>, message: InboundMessage) -> bool {
    match tx.try_send(message) {
        Ok(()) => true,
        Err(TrySendError::Full(message)) => {
            tracing::warn!(topic = %message.topic, "inbound queue full, command dropped");
            true
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

#[async_trait]
impl BrokerClient for MqttBroker {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    async fn subscribe(&self, topic: &str) -> Result<()> {
        self.client.subscribe(topic, SUBSCRIBE_QOS.into()).await?;
        Ok(())
    }

    async fn publish(&self, message: OutgoingMessage) -> Result<()> {
        self.client
            .publish(message.topic, message.qos.into(), message.retain, message.payload)
            .await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        tracing::info!("disconnecting from MQTT broker");
        self.client.disconnect().await?;

        let Some(task) = self.event_task.lock().await.take() else {
            return Ok(());
        };
        match tokio::time::timeout(DISCONNECT_TIMEOUT, task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(Error::Broker(format!("event loop task failed: {e}"))),
            Err(_) => {
                tracing::warn!("event loop did not stop in time");
                Ok(())
            }
        }
    }
}
