//! In-memory broker
//!
//! Records subscriptions and publications instead of sending them anywhere.
//! Backs `run --dry-run` and the test suite; inbound messages are injected
//! through the sender returned by [`MemoryBroker::channel`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};

use super::{BrokerClient, INBOUND_CAPACITY, InboundMessage, OutgoingMessage};
use crate::{Error, Result};

#[derive(Debug)]
struct MemoryState {
    connected: bool,
    subscriptions: Vec<String>,
    published: Vec<OutgoingMessage>,
}

/// Broker that keeps everything in memory
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<MemoryState>>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    /// Create a connected broker
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                connected: true,
                subscriptions: Vec::new(),
                published: Vec::new(),
            })),
        }
    }

    /// Create a broker with an inbound channel
    ///
    /// Returns the broker, a sender to inject inbound messages and the
    /// receiver to hand to the scheduler
    #[must_use]
    pub fn channel() -> (
        Self,
        mpsc::Sender<InboundMessage>,
        mpsc::Receiver<InboundMessage>,
    ) {
        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        (Self::new(), tx, rx)
    }

    /// Messages published so far
    pub async fn published(&self) -> Vec<OutgoingMessage> {
        self.state.lock().await.published.clone()
    }

    /// Topics subscribed so far
    pub async fn subscriptions(&self) -> Vec<String> {
        self.state.lock().await.subscriptions.clone()
    }

    /// Whether disconnect has not been called yet
    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.connected
    }
}

#[async_trait]
impl BrokerClient for MemoryBroker {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn subscribe(&self, topic: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.connected {
            return Err(Error::Broker("not connected".to_string()));
        }
        state.subscriptions.push(topic.to_string());
        Ok(())
    }

    async fn publish(&self, message: OutgoingMessage) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.connected {
            return Err(Error::Broker("not connected".to_string()));
        }
        state.published.push(message);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.state.lock().await.connected = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::QoS;

    #[tokio::test]
    async fn records_until_disconnected() {
        let broker = MemoryBroker::new();
        broker.subscribe("a/set").await.unwrap();
        broker
            .publish(OutgoingMessage {
                topic: "a".to_string(),
                payload: b"1".to_vec(),
                qos: QoS::AtMostOnce,
                retain: false,
            })
            .await
            .unwrap();

        broker.disconnect().await.unwrap();
        assert!(!broker.is_connected().await);
        assert!(broker.subscribe("b/set").await.is_err());
        assert_eq!(broker.subscriptions().await, vec!["a/set"]);
        assert_eq!(broker.published().await.len(), 1);
    }
}
