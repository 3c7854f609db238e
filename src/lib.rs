//! mqttgen - Synthetic telemetry generator for MQTT
//!
//! This library provides the core functionality of the generator:
//! - Declarative payload templates with stateful generator functions
//! - Get/set command topics acting on live generator state
//! - Periodic and one-shot publication scheduling
//! - Replay of recorded message flows
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  Configuration                       │
//! │      mqtt  │  misc  │  topics (JSON/YAML/TOML)       │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                    Scheduler                         │
//! │  Templates  │  Generators  │  Command Registry      │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │               Broker Client (MQTT)                   │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod broker;
pub mod command;
pub mod config;
pub mod error;
pub mod generator;
pub mod replay;
pub mod scheduler;
pub mod template;

pub use broker::{BrokerClient, InboundMessage, MemoryBroker, MqttBroker, OutgoingMessage, QoS};
pub use command::{CommandBinding, CommandKind, CommandRegistry};
pub use config::{BrokerConfig, BrokerOverrides, Config, MiscConfig, TopicSpec};
pub use error::{Error, Result};
pub use generator::{Generator, ParamState};
pub use scheduler::{Published, Scheduler, SchedulerOptions, SchedulerState};
pub use template::{Evaluator, TemplateNode};
