//! Broker client adapters
//!
//! The generator talks to the message bus through [`BrokerClient`]. Inbound
//! messages are not delivered through the trait: each adapter hands out an
//! `mpsc::Receiver<InboundMessage>` fed by its own background task, and the
//! scheduler is that receiver's only consumer.

mod memory;
mod mqtt;

use std::borrow::Cow;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use memory::MemoryBroker;
pub use mqtt::MqttBroker;

use crate::Result;

/// Capacity of inbound message channels
pub const INBOUND_CAPACITY: usize = 100;

/// MQTT delivery guarantee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QoS {
    /// Fire and forget (0)
    #[default]
    AtMostOnce,
    /// Acknowledged delivery (1)
    AtLeastOnce,
    /// Assured delivery (2)
    ExactlyOnce,
}

impl TryFrom<u8> for QoS {
    type Error = String;

    fn try_from(level: u8) -> std::result::Result<Self, Self::Error> {
        match level {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            other => Err(format!("invalid QoS level {other}, expected 0, 1 or 2")),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

impl From<QoS> for rumqttc::QoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => Self::AtMostOnce,
            QoS::AtLeastOnce => Self::AtLeastOnce,
            QoS::ExactlyOnce => Self::ExactlyOnce,
        }
    }
}

/// A message to publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Destination topic
    pub topic: String,

    /// Raw payload
    pub payload: Vec<u8>,

    /// Delivery guarantee
    pub qos: QoS,

    /// Retain flag
    pub retain: bool,
}

impl OutgoingMessage {
    /// Payload as text, for logging and tests
    #[must_use]
    pub fn payload_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// A message received on a subscribed topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Topic the message arrived on
    pub topic: String,

    /// Raw payload
    pub payload: Vec<u8>,
}

impl InboundMessage {
    /// Create a message from text
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Payload decoded as UTF-8, invalid sequences replaced
    #[must_use]
    pub fn body(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Broker client trait - the generator's view of the message bus
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Get the client name
    fn name(&self) -> &'static str;

    /// Subscribe to a command topic
    async fn subscribe(&self, topic: &str) -> Result<()>;

    /// Publish a message
    async fn publish(&self, message: OutgoingMessage) -> Result<()>;

    /// Flush and close the connection
    async fn disconnect(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qos_levels_round_trip_through_config_numbers() {
        let qos: QoS = serde_json::from_str("2").unwrap();
        assert_eq!(qos, QoS::ExactlyOnce);
        assert_eq!(serde_json::to_string(&QoS::AtLeastOnce).unwrap(), "1");
        assert!(serde_json::from_str::<QoS>("3").is_err());
    }

    #[test]
    fn inbound_body_is_lossy_utf8() {
        let msg = InboundMessage::new("a", vec![b'4', 0xff, b'2']);
        assert_eq!(msg.body(), "4\u{fffd}2");
    }
}
