//! Topic scheduler
//!
//! Owns every template tree and is the single consumer of inbound commands,
//! so parameter state is only ever touched from one task. Set commands that
//! arrive while the loop waits between topics land before the next
//! evaluation; the last write wins.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::broker::{BrokerClient, InboundMessage, OutgoingMessage, QoS};
use crate::command::{CommandKind, CommandRegistry, parse_set_body};
use crate::config::TopicSpec;
use crate::template::Evaluator;
use crate::{Error, Result};

/// Scheduler lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Built, not started
    Idle,
    /// Publishing and serving commands
    Running,
    /// Stopped, connection closed
    Shutdown,
}

/// Scheduling parameters
#[derive(Debug, Clone, Copy)]
pub struct SchedulerOptions {
    /// Wait between two publications
    pub interval: Duration,
    /// QoS of generated publications
    pub qos: QoS,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            qos: QoS::AtLeastOnce,
        }
    }
}

/// A generated message, as published
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    /// Topic it was sent to
    pub topic: String,
    /// Generated payload
    pub payload: Value,
}

/// Evaluates topics, publishes them and dispatches inbound commands
pub struct Scheduler<B: BrokerClient> {
    topics: Vec<TopicSpec>,
    commands: CommandRegistry,
    evaluator: Evaluator,
    broker: B,
    options: SchedulerOptions,
    state: SchedulerState,
}

impl<B: BrokerClient> Scheduler<B> {
    /// Create an idle scheduler
    ///
    /// `commands` must have been built from `topics`.
    #[must_use]
    pub fn new(
        topics: Vec<TopicSpec>,
        commands: CommandRegistry,
        broker: B,
        options: SchedulerOptions,
    ) -> Self {
        Self {
            topics,
            commands,
            evaluator: Evaluator::new(),
            broker,
            options,
            state: SchedulerState::Idle,
        }
    }

    /// Replace the evaluator, e.g. with a seeded one
    #[must_use]
    pub fn with_evaluator(mut self, evaluator: Evaluator) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Current lifecycle state
    #[must_use]
    pub const fn state(&self) -> SchedulerState {
        self.state
    }

    /// Topic entries
    #[must_use]
    pub fn topics(&self) -> &[TopicSpec] {
        &self.topics
    }

    /// Command registry
    #[must_use]
    pub const fn commands(&self) -> &CommandRegistry {
        &self.commands
    }

    /// Broker client
    #[must_use]
    pub const fn broker(&self) -> &B {
        &self.broker
    }

    /// Subscribe to every command topic
    ///
    /// # Errors
    ///
    /// Returns the first subscription failure
    pub async fn subscribe(&self) -> Result<()> {
        self.commands.subscribe_all(&self.broker).await
    }

    /// Evaluate and publish one topic entry
    ///
    /// Returns `None` when generation failed; the failure is logged and the
    /// entry is skipped for this round.
    ///
    /// # Errors
    ///
    /// Returns error if `index` is out of range or the broker rejects the
    /// publication
    pub async fn publish_topic(&mut self, index: usize) -> Result<Option<Published>> {
        let spec = self
            .topics
            .get_mut(index)
            .ok_or_else(|| Error::Config(format!("no topic entry at index {index}")))?;

        tracing::debug!(name = %spec.name, "treating topic");
        let generated = generate(&mut self.evaluator, spec);
        let (topic, payload) = match generated {
            Ok(generated) => generated,
            Err(e) => {
                tracing::warn!(name = %spec.name, error = %e, "generation failed, topic skipped");
                return Ok(None);
            }
        };

        let body = render_payload(&payload)?;
        tracing::info!("-> {topic} {}", String::from_utf8_lossy(&body));

        self.broker
            .publish(OutgoingMessage {
                topic: topic.clone(),
                payload: body,
                qos: self.options.qos,
                retain: spec.retain,
            })
            .await?;

        Ok(Some(Published { topic, payload }))
    }

    /// Handle one inbound message
    ///
    /// Set commands overwrite a parameter in place, get commands publish the
    /// owning topic immediately, unknown topics are logged and ignored.
    ///
    /// # Errors
    ///
    /// Returns error only if a get-triggered publication fails at the broker
    pub async fn dispatch(&mut self, message: &InboundMessage) -> Result<()> {
        let body = message.body();
        tracing::info!("<- {} {body}", message.topic);

        let Some(binding) = self.commands.lookup(&message.topic).cloned() else {
            tracing::warn!(topic = %message.topic, "unknown command topic, ignored");
            return Ok(());
        };

        match binding.kind {
            CommandKind::Set { key } => {
                let value = parse_set_body(&body);
                let owner = binding.owner;
                let params = self
                    .topics
                    .get_mut(owner.topic)
                    .and_then(|spec| spec.tree_mut(owner.tree).params_mut(&owner.path));
                if let Some(params) = params {
                    tracing::info!("{key} set to {value}");
                    params.set(&key, value);
                } else {
                    tracing::warn!(topic = %message.topic, path = %owner.path, "set target vanished");
                }
            }
            CommandKind::Get => {
                self.publish_topic(binding.owner.topic).await?;
            }
        }

        Ok(())
    }

    /// Run until `shutdown` resolves
    ///
    /// Publishes `once` entries one time each, then cycles through periodic
    /// entries in declaration order, waiting the configured interval after
    /// each publication. Inbound commands are served while waiting. The
    /// broker is disconnected before returning, whatever the outcome.
    ///
    /// # Errors
    ///
    /// Returns error if the broker fails or the inbound stream closes
    pub async fn run<F>(
        &mut self,
        mut inbound: mpsc::Receiver<InboundMessage>,
        shutdown: F,
    ) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        self.state = SchedulerState::Running;
        tracing::info!(
            topics = self.topics.len(),
            commands = self.commands.len(),
            interval = ?self.options.interval,
            "generator running"
        );

        let outcome = self.drive(&mut inbound, shutdown).await;

        self.state = SchedulerState::Shutdown;
        tracing::info!("ending mqttgen execution");
        if let Err(e) = self.broker.disconnect().await {
            tracing::warn!(error = %e, "disconnect failed");
        }

        outcome
    }

    async fn drive<F>(
        &mut self,
        inbound: &mut mpsc::Receiver<InboundMessage>,
        mut shutdown: Pin<&mut F>,
    ) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let once: Vec<usize> = (0..self.topics.len())
            .filter(|&i| self.topics[i].once)
            .collect();
        let periodic: Vec<usize> = (0..self.topics.len())
            .filter(|&i| self.topics[i].is_periodic())
            .collect();

        for index in once {
            let deadline = Instant::now() + self.options.interval;
            self.publish_topic(index).await?;
            if !self.wait(Some(deadline), inbound, &mut shutdown).await? {
                return Ok(());
            }
        }

        if periodic.is_empty() {
            tracing::info!("no periodic topic, serving commands only");
            while self.wait(None, inbound, &mut shutdown).await? {}
            return Ok(());
        }

        loop {
            for &index in &periodic {
                let deadline = Instant::now() + self.options.interval;
                self.publish_topic(index).await?;
                if !self.wait(Some(deadline), inbound, &mut shutdown).await? {
                    return Ok(());
                }
            }
        }
    }

    /// Serve commands until `deadline` (forever when `None`)
    ///
    /// Returns `false` when shutdown was requested.
    async fn wait<F>(
        &mut self,
        deadline: Option<Instant>,
        inbound: &mut mpsc::Receiver<InboundMessage>,
        shutdown: &mut Pin<&mut F>,
    ) -> Result<bool>
    where
        F: Future<Output = ()>,
    {
        loop {
            let sleep = async move {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                biased;
                () = shutdown.as_mut() => {
                    tracing::info!("shutdown requested");
                    return Ok(false);
                }
                message = inbound.recv() => match message {
                    Some(message) => self.dispatch(&message).await?,
                    None => {
                        return Err(Error::Broker("inbound message stream closed".to_string()));
                    }
                },
                () = sleep => return Ok(true),
            }
        }
    }
}

/// Evaluate the topic and payload templates of an entry
fn generate(evaluator: &mut Evaluator, spec: &mut TopicSpec) -> Result<(String, Value)> {
    let topic = match evaluator.evaluate(&mut spec.topic)? {
        Value::String(topic) => topic,
        Value::Null => String::new(),
        other => other.to_string(),
    };
    if topic.is_empty() {
        return Err(Error::Generator(format!(
            "topic of \"{}\" evaluated to an empty string",
            spec.name
        )));
    }

    let payload = evaluator.evaluate(&mut spec.payload)?;
    Ok((topic, payload))
}

/// Encode a payload: strings go out verbatim, everything else as JSON
///
/// # Errors
///
/// Returns error if JSON encoding fails
pub fn render_payload(payload: &Value) -> Result<Vec<u8>> {
    match payload {
        Value::String(text) => Ok(text.as_bytes().to_vec()),
        other => Ok(serde_json::to_vec(other)?),
    }
}
