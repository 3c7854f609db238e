//! Shared test utilities

#![allow(dead_code)]

use std::time::Duration;

use mqttgen::broker::{InboundMessage, MemoryBroker};
use mqttgen::{CommandRegistry, Config, Evaluator, Scheduler, SchedulerOptions};
use serde_json::Value;
use tokio::sync::mpsc;

/// A scheduler wired to an in-memory broker
pub struct Harness {
    pub scheduler: Scheduler<MemoryBroker>,
    pub broker: MemoryBroker,
    /// Keeps the inbound channel open; dropping every sender ends the run
    pub inject: mpsc::Sender<InboundMessage>,
    pub inbound: mpsc::Receiver<InboundMessage>,
}

/// Build a seeded scheduler from a configuration document, subscribing its
/// command topics the way the binary does
pub async fn harness(document: Value) -> mqttgen::Result<Harness> {
    let config = Config::from_document(document)?;
    let commands = CommandRegistry::build(&config.topics)?;
    let options = SchedulerOptions {
        interval: config.misc.interval()?,
        qos: config.broker.qos,
    };

    let (broker, inject, inbound) = MemoryBroker::channel();
    let scheduler = Scheduler::new(config.topics, commands, broker.clone(), options)
        .with_evaluator(Evaluator::with_seed(7));
    scheduler.subscribe().await?;

    Ok(Harness {
        scheduler,
        broker,
        inject,
        inbound,
    })
}

/// Send `body` to `topic` after `delay`
pub fn inject_after(
    inject: &mpsc::Sender<InboundMessage>,
    delay: Duration,
    topic: &str,
    body: &str,
) {
    let inject = inject.clone();
    let message = InboundMessage::new(topic, body);
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        inject.send(message).await.expect("inbound channel closed");
    });
}

/// Published payloads parsed back to JSON, in order
pub async fn published_payloads(broker: &MemoryBroker) -> Vec<(String, Value)> {
    broker
        .published()
        .await
        .into_iter()
        .map(|m| {
            let payload = serde_json::from_slice(&m.payload)
                .unwrap_or_else(|_| Value::String(m.payload_str().into_owned()));
            (m.topic, payload)
        })
        .collect()
}
