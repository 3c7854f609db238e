//! Topic entries

use serde_json::Value;

use crate::template::{CommandMarker, TemplateNode, is_comment};
use crate::{Error, Result};

const TOPIC_KEY: &str = "topic";
const PAYLOAD_KEY: &str = "payload";
const SYNC_KEY: &str = "sync";
const ONCE_KEY: &str = "once";
const RETAIN_KEY: &str = "retain";

/// Which template of a topic entry a node lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TreeKind {
    /// The `topic` template
    Topic,
    /// The `payload` template
    Payload,
}

impl std::fmt::Display for TreeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Topic => f.write_str(TOPIC_KEY),
            Self::Payload => f.write_str(PAYLOAD_KEY),
        }
    }
}

/// One entry of the topic collection
#[derive(Debug, Clone, PartialEq)]
pub struct TopicSpec {
    /// Logical name (the key in the collection)
    pub name: String,

    /// Publish topic, usually a literal string
    pub topic: TemplateNode,

    /// Payload template
    pub payload: TemplateNode,

    /// Markers declared at entry level (`get`)
    pub markers: Vec<CommandMarker>,

    /// Published by the periodic loop
    pub sync: bool,

    /// Published exactly once at startup, never periodically
    pub once: bool,

    /// Publish with the retain flag
    pub retain: bool,
}

impl TopicSpec {
    /// Build an entry from its configuration value
    ///
    /// # Errors
    ///
    /// Returns `MissingField` when `topic` or `payload` is absent, and a
    /// configuration error for malformed flags, templates or unknown keys
    pub fn from_entry(name: &str, value: Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(Error::Config(format!(
                "topic \"{name}\" must be an object"
            )));
        };

        let mut topic = None;
        let mut payload = None;
        let mut markers = Vec::new();
        let mut sync = true;
        let mut once = false;
        let mut retain = false;

        for (key, value) in map {
            match key.as_str() {
                TOPIC_KEY => topic = Some(TemplateNode::from_value(value)?),
                PAYLOAD_KEY => payload = Some(TemplateNode::from_value(value)?),
                SYNC_KEY => sync = flag(name, SYNC_KEY, &value)?,
                ONCE_KEY => once = flag(name, ONCE_KEY, &value)?,
                RETAIN_KEY => retain = flag(name, RETAIN_KEY, &value)?,
                k if is_comment(k) => {}
                _ => match CommandMarker::parse(&key, &value)? {
                    Some(marker) => markers.push(marker),
                    None => {
                        return Err(Error::Config(format!(
                            "unexpected key \"{key}\" for topic \"{name}\""
                        )));
                    }
                },
            }
        }

        let topic = topic.ok_or_else(|| Error::MissingField {
            name: name.to_string(),
            field: TOPIC_KEY,
        })?;
        let payload = payload.ok_or_else(|| Error::MissingField {
            name: name.to_string(),
            field: PAYLOAD_KEY,
        })?;

        Ok(Self {
            name: name.to_string(),
            topic,
            payload,
            markers,
            sync,
            once,
            retain,
        })
    }

    /// Whether the periodic loop publishes this entry
    #[must_use]
    pub const fn is_periodic(&self) -> bool {
        self.sync && !self.once
    }

    /// Template selected by `tree`
    pub const fn tree_mut(&mut self, tree: TreeKind) -> &mut TemplateNode {
        match tree {
            TreeKind::Topic => &mut self.topic,
            TreeKind::Payload => &mut self.payload,
        }
    }
}

fn flag(name: &str, key: &str, value: &Value) -> Result<bool> {
    value.as_bool().ok_or_else(|| {
        Error::Config(format!(
            "\"{key}\" of topic \"{name}\" must be a boolean, got {value}"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_to_sync_not_once() {
        let spec = TopicSpec::from_entry("t", json!({"topic": "a/b", "payload": 1})).unwrap();
        assert!(spec.sync);
        assert!(!spec.once);
        assert!(!spec.retain);
        assert!(spec.is_periodic());
        assert_eq!(spec.topic.as_literal_str(), Some("a/b"));
    }

    #[test]
    fn once_is_never_periodic() {
        let spec = TopicSpec::from_entry(
            "t",
            json!({"topic": "a", "payload": 1, "once": true, "sync": true}),
        )
        .unwrap();
        assert!(!spec.is_periodic());
    }

    #[test]
    fn missing_payload_names_the_entry() {
        let err = TopicSpec::from_entry("boiler", json!({"topic": "a"})).unwrap_err();
        assert!(matches!(
            err,
            Error::MissingField { ref name, field: "payload" } if name == "boiler"
        ));
        assert_eq!(err.to_string(), "missing key \"payload\" for topic \"boiler\"");
    }

    #[test]
    fn entry_level_markers_and_comments() {
        let spec = TopicSpec::from_entry(
            "t",
            json!({"#": "note", "topic": "a", "payload": {}, "get": "a/get"}),
        )
        .unwrap();
        assert_eq!(
            spec.markers,
            vec![CommandMarker::Get {
                topic: "a/get".to_string()
            }]
        );
    }

    #[test]
    fn rejects_bad_flags_and_unknown_keys() {
        assert!(TopicSpec::from_entry("t", json!({"topic": "a", "payload": 1, "sync": "yes"})).is_err());
        assert!(TopicSpec::from_entry("t", json!({"topic": "a", "payload": 1, "qos": 2})).is_err());
        assert!(TopicSpec::from_entry("t", json!(["topic"])).is_err());
    }
}
