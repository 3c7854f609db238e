//! Generator configuration
//!
//! One document with three sections:
//!
//! - `mqtt`: broker connection parameters
//! - `misc`: logging and publish interval
//! - `topics` (or `messages`): ordered collection of [`TopicSpec`]s
//!
//! Keys starting with `#` are comments at every level.

pub mod file;
mod topic;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

pub use file::{DocumentFormat, load_document, parse_document};
pub use topic::{TopicSpec, TreeKind};

use crate::broker::QoS;
use crate::template::is_comment;
use crate::{Error, Result};

const MQTT_SECTION: &str = "mqtt";
const MISC_SECTION: &str = "misc";
const TOPICS_SECTION: &str = "topics";
const MESSAGES_SECTION: &str = "messages";

/// Generator configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Broker connection parameters
    pub broker: BrokerConfig,

    /// Logging and scheduling parameters
    pub misc: MiscConfig,

    /// Topic entries in declaration order, comments removed
    pub topics: Vec<TopicSpec>,
}

/// Broker connection parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker host
    pub host: String,

    /// Broker port
    pub port: u16,

    /// MQTT client identifier
    #[serde(alias = "clientId")]
    pub client_id: String,

    /// Username, credentials are only sent when non-empty
    pub username: Option<String>,

    /// Password
    pub password: Option<String>,

    /// Keepalive in seconds
    pub keepalive: u64,

    /// Last will topic
    #[serde(rename = "willTopic")]
    pub will_topic: String,

    /// Last will payload, no will is registered when empty
    #[serde(rename = "willMessage")]
    pub will_message: String,

    /// Last will QoS
    #[serde(rename = "willQoS")]
    pub will_qos: QoS,

    /// Last will retain flag
    #[serde(rename = "willRetain")]
    pub will_retain: bool,

    /// QoS of generated publications
    pub qos: QoS,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "mqttgen".to_string(),
            username: None,
            password: None,
            keepalive: 60,
            will_topic: String::new(),
            will_message: String::new(),
            will_qos: QoS::AtMostOnce,
            will_retain: false,
            qos: QoS::AtLeastOnce,
        }
    }
}

/// Command-line / environment overrides for the `mqtt` section
#[derive(Debug, Clone, Default)]
pub struct BrokerOverrides {
    /// Broker host
    pub host: Option<String>,
    /// Broker port
    pub port: Option<u16>,
    /// Username
    pub username: Option<String>,
    /// Password
    pub password: Option<String>,
}

impl BrokerConfig {
    /// Replace fields set in `overrides`
    pub fn apply(&mut self, overrides: &BrokerOverrides) {
        if let Some(host) = &overrides.host {
            self.host.clone_from(host);
        }
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if overrides.username.is_some() {
            self.username.clone_from(&overrides.username);
        }
        if overrides.password.is_some() {
            self.password.clone_from(&overrides.password);
        }
    }

    /// Username if credentials should be sent
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        self.username
            .as_deref()
            .filter(|user| !user.is_empty())
            .map(|user| (user, self.password.as_deref().unwrap_or_default()))
    }

    /// Whether a last will message is configured
    #[must_use]
    pub fn has_will(&self) -> bool {
        !self.will_message.is_empty()
    }
}

/// Logging and scheduling parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MiscConfig {
    /// Log level directive (e.g. "info", "debug")
    pub logging_level: String,

    /// Log file, stderr when empty
    pub logging_file: String,

    /// Seconds between two publications
    #[serde(alias = "sleep_s")]
    pub time_interval: f64,
}

impl Default for MiscConfig {
    fn default() -> Self {
        Self {
            logging_level: "info".to_string(),
            logging_file: String::new(),
            time_interval: 1.0,
        }
    }
}

impl MiscConfig {
    /// Publish interval
    ///
    /// # Errors
    ///
    /// Returns error if `time_interval` is negative or not finite
    pub fn interval(&self) -> Result<Duration> {
        Duration::try_from_secs_f64(self.time_interval).map_err(|e| {
            Error::Config(format!("invalid time_interval {}: {e}", self.time_interval))
        })
    }

    /// Log file path, if one is configured
    #[must_use]
    pub fn log_file(&self) -> Option<PathBuf> {
        (!self.logging_file.is_empty()).then(|| PathBuf::from(&self.logging_file))
    }

    /// Log level as an `EnvFilter` directive
    #[must_use]
    pub fn level_directive(&self) -> String {
        match self.logging_level.to_ascii_lowercase().as_str() {
            "warning" => "warn".to_string(),
            "critical" | "fatal" => "error".to_string(),
            other => other.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or does not describe a valid
    /// generator
    pub fn load(path: &Path) -> Result<Self> {
        Self::from_document(load_document(path)?)
    }

    /// Build configuration from a parsed document
    ///
    /// # Errors
    ///
    /// Returns a configuration error for malformed sections, unknown
    /// sections or an empty topic collection
    pub fn from_document(document: Value) -> Result<Self> {
        let Value::Object(root) = document else {
            return Err(Error::Config("document root must be an object".to_string()));
        };

        let mut broker = BrokerConfig::default();
        let mut misc = MiscConfig::default();
        let mut topics = None;

        for (section, value) in root {
            match section.as_str() {
                MQTT_SECTION => broker = section_from(MQTT_SECTION, value)?,
                MISC_SECTION => misc = section_from(MISC_SECTION, value)?,
                TOPICS_SECTION | MESSAGES_SECTION => topics = Some(parse_topics(value)?),
                s if is_comment(s) => {}
                other => {
                    return Err(Error::Config(format!("unknown section \"{other}\"")));
                }
            }
        }

        let topics = topics.unwrap_or_default();
        if topics.is_empty() {
            return Err(Error::Config(
                "no topics specified in config, nothing to do".to_string(),
            ));
        }

        misc.interval()?;

        Ok(Self {
            broker,
            misc,
            topics,
        })
    }
}

fn section_from<T: for<'de> Deserialize<'de>>(name: &str, value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| Error::Config(format!("section \"{name}\": {e}")))
}

fn parse_topics(value: Value) -> Result<Vec<TopicSpec>> {
    let Value::Object(entries) = value else {
        return Err(Error::Config(format!(
            "\"{TOPICS_SECTION}\" must be an object keyed by topic name"
        )));
    };

    entries
        .into_iter()
        .filter(|(name, _)| !is_comment(name))
        .map(|(name, entry)| TopicSpec::from_entry(&name, entry))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sections_have_defaults() {
        let config = Config::from_document(json!({
            "topics": {"a": {"topic": "t/a", "payload": 1}}
        }))
        .unwrap();

        assert_eq!(config.broker.host, "localhost");
        assert_eq!(config.broker.port, 1883);
        assert_eq!(config.broker.qos, QoS::AtLeastOnce);
        assert_eq!(config.misc.interval().unwrap(), Duration::from_secs(1));
        assert!(config.misc.log_file().is_none());
        assert!(!config.broker.has_will());
    }

    #[test]
    fn reads_camel_case_broker_keys_and_aliases() {
        let config = Config::from_document(json!({
            "mqtt": {
                "host": "broker.local",
                "port": 8883,
                "username": "gen",
                "password": "pw",
                "keepalive": 30,
                "willTopic": "gen/status",
                "willMessage": "offline",
                "willQoS": 1,
                "willRetain": true,
                "qos": 0
            },
            "misc": {"logging_level": "WARNING", "sleep_s": 0.25},
            "messages": {
                "#disabled": {"topic": "x"},
                "b": {"topic": "t/b", "payload": {}},
                "a": {"topic": "t/a", "payload": {}}
            }
        }))
        .unwrap();

        assert_eq!(config.broker.credentials(), Some(("gen", "pw")));
        assert!(config.broker.has_will());
        assert_eq!(config.broker.will_qos, QoS::AtLeastOnce);
        assert_eq!(config.broker.qos, QoS::AtMostOnce);
        assert_eq!(config.misc.interval().unwrap(), Duration::from_millis(250));
        assert_eq!(config.misc.level_directive(), "warn");
        let names: Vec<_> = config.topics.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn empty_username_sends_no_credentials() {
        let mut broker = BrokerConfig {
            username: Some(String::new()),
            ..BrokerConfig::default()
        };
        assert!(broker.credentials().is_none());

        broker.apply(&BrokerOverrides {
            host: Some("10.0.0.2".to_string()),
            username: Some("ops".to_string()),
            ..BrokerOverrides::default()
        });
        assert_eq!(broker.host, "10.0.0.2");
        assert_eq!(broker.credentials(), Some(("ops", "")));
    }

    #[test]
    fn rejects_empty_or_missing_topics() {
        assert!(Config::from_document(json!({"mqtt": {}})).is_err());
        assert!(Config::from_document(json!({"topics": {"#only": {}}})).is_err());
        assert!(Config::from_document(json!({"topics": []})).is_err());
    }

    #[test]
    fn rejects_unknown_sections_and_bad_interval() {
        let topics = json!({"a": {"topic": "t", "payload": 1}});
        assert!(Config::from_document(json!({"topics": topics.clone(), "extra": {}})).is_err());
        assert!(
            Config::from_document(json!({"topics": topics.clone(), "misc": {"time_interval": -1}}))
                .is_err()
        );
        assert!(Config::from_document(json!({"topics": topics, "mqtt": {"qos": 3}})).is_err());
    }
}
