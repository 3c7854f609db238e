//! Command registry
//!
//! Built once at startup by scanning every topic entry for `get` and
//! `set:<topic>` markers. Maps each command topic to the node it acts on and
//! enforces that every topic string in the configuration is used only once.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde_json::{Number, Value};

use crate::broker::BrokerClient;
use crate::config::{TopicSpec, TreeKind};
use crate::generator::ParamState;
use crate::template::{CommandMarker, FunctionCall, NodePath, TemplateNode};
use crate::{Error, Result};

/// What a command topic does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    /// Evaluate and publish the owning topic immediately
    Get,
    /// Overwrite one parameter of the owning node
    Set {
        /// Parameter name
        key: String,
    },
}

impl CommandKind {
    /// Short label for logs
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Set { .. } => "set",
        }
    }
}

/// Location of the node a command acts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRef {
    /// Index of the owning topic entry
    pub topic: usize,
    /// Template holding the node
    pub tree: TreeKind,
    /// Path from the template root
    pub path: NodePath,
}

/// Binding of one command topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBinding {
    /// Operation
    pub kind: CommandKind,
    /// Node declaring the marker
    pub owner: NodeRef,
}

/// Command topics and their bindings
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    bindings: IndexMap<String, CommandBinding>,
}

/// Scan state: every topic string claimed so far, plus the bindings found
struct Scan<'a> {
    topics: &'a [TopicSpec],
    claimed: HashSet<String>,
    bindings: IndexMap<String, CommandBinding>,
}

impl Scan<'_> {
    fn claim(&mut self, topic: &str) -> Result<()> {
        if self.claimed.insert(topic.to_string()) {
            Ok(())
        } else {
            Err(Error::DuplicateTopic(topic.to_string()))
        }
    }

    fn register(
        &mut self,
        marker: &CommandMarker,
        owner: NodeRef,
        params: Option<&ParamState>,
    ) -> Result<()> {
        self.claim(marker.topic())?;

        let kind = match marker {
            CommandMarker::Get { .. } => CommandKind::Get,
            CommandMarker::Set { topic, key } => {
                if !params.is_some_and(|p| p.contains(key)) {
                    let name = &self.topics[owner.topic].name;
                    return Err(Error::SetTarget {
                        topic: topic.clone(),
                        key: key.clone(),
                        node: if owner.path.is_root() {
                            format!("{name}.{}", owner.tree)
                        } else {
                            format!("{name}.{}.{}", owner.tree, owner.path)
                        },
                    });
                }
                CommandKind::Set { key: key.clone() }
            }
        };

        tracing::debug!(
            topic = marker.topic(),
            kind = kind.label(),
            owner = %self.topics[owner.topic].name,
            path = %owner.path,
            "registered command"
        );
        self.bindings
            .insert(marker.topic().to_string(), CommandBinding { kind, owner });
        Ok(())
    }

    fn scan_tree(&mut self, index: usize, tree: TreeKind, root: &TemplateNode) -> Result<()> {
        root.walk(&mut NodePath::root(), &mut |path, node| {
            let params = match node {
                TemplateNode::Call(FunctionCall { params, .. }) => Some(params),
                _ => None,
            };
            for marker in node.markers() {
                let owner = NodeRef {
                    topic: index,
                    tree,
                    path: path.clone(),
                };
                self.register(marker, owner, params)?;
            }
            Ok(())
        })
    }
}

impl CommandRegistry {
    /// Scan all topic entries and validate their topic strings
    ///
    /// Entries are processed in declaration order: the literal publish topic
    /// first, then entry-level markers, then markers in the topic and payload
    /// templates.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateTopic` when a topic string is used twice and
    /// `SetTarget` when a set marker names a parameter its node lacks
    pub fn build(topics: &[TopicSpec]) -> Result<Self> {
        let mut scan = Scan {
            topics,
            claimed: HashSet::new(),
            bindings: IndexMap::new(),
        };

        for (index, spec) in topics.iter().enumerate() {
            if let Some(topic) = spec.topic.as_literal_str() {
                scan.claim(topic)?;
            }
            for marker in &spec.markers {
                let owner = NodeRef {
                    topic: index,
                    tree: TreeKind::Payload,
                    path: NodePath::root(),
                };
                scan.register(marker, owner, None)?;
            }
            scan.scan_tree(index, TreeKind::Topic, &spec.topic)?;
            scan.scan_tree(index, TreeKind::Payload, &spec.payload)?;
        }

        tracing::info!(commands = scan.bindings.len(), "command topics registered");
        Ok(Self {
            bindings: scan.bindings,
        })
    }

    /// Subscribe to every command topic
    ///
    /// # Errors
    ///
    /// Returns the first subscription failure
    pub async fn subscribe_all<B: BrokerClient + ?Sized>(&self, broker: &B) -> Result<()> {
        for topic in self.bindings.keys() {
            tracing::info!(topic = %topic, broker = broker.name(), "subscribing");
            broker.subscribe(topic).await?;
        }
        Ok(())
    }

    /// Binding for a command topic
    #[must_use]
    pub fn lookup(&self, topic: &str) -> Option<&CommandBinding> {
        self.bindings.get(topic)
    }

    /// Command topics with their bindings, in registration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CommandBinding)> {
        self.bindings.iter().map(|(topic, binding)| (topic.as_str(), binding))
    }

    /// Number of command topics
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether no command topic is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Interpret the body of a set command
///
/// Tries an integer, then a finite float, then any JSON value; falls back to
/// the body itself as a string. Never fails.
#[must_use]
pub fn parse_set_body(body: &str) -> Value {
    let text = body.trim();

    if let Ok(int) = text.parse::<i64>() {
        return Value::from(int);
    }
    if let Some(number) = text.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(number);
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(body.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn specs(entries: Value) -> Vec<TopicSpec> {
        entries
            .as_object()
            .unwrap()
            .iter()
            .map(|(name, entry)| TopicSpec::from_entry(name, entry.clone()).unwrap())
            .collect()
    }

    #[test]
    fn registers_get_and_nested_set() {
        let topics = specs(json!({
            "room": {
                "topic": "home/room",
                "get": "home/room/get",
                "payload": {
                    "sensors": [
                        {"temp": {
                            "func": "randomWalk",
                            "param": {"cur": 20, "rand": 1},
                            "set:home/room/temp": "cur"
                        }}
                    ]
                }
            }
        }));

        let registry = CommandRegistry::build(&topics).unwrap();
        assert_eq!(registry.len(), 2);

        let get = registry.lookup("home/room/get").unwrap();
        assert_eq!(get.kind, CommandKind::Get);
        assert_eq!(get.owner.topic, 0);

        let set = registry.lookup("home/room/temp").unwrap();
        assert_eq!(set.kind, CommandKind::Set { key: "cur".to_string() });
        assert_eq!(set.owner.tree, TreeKind::Payload);
        assert_eq!(set.owner.path.to_string(), "sensors[0].temp");
    }

    #[test]
    fn duplicate_publish_topics_fail() {
        let topics = specs(json!({
            "a": {"topic": "same", "payload": 1},
            "b": {"topic": "same", "payload": 2}
        }));
        let err = CommandRegistry::build(&topics).unwrap_err();
        assert!(matches!(err, Error::DuplicateTopic(t) if t == "same"));
    }

    #[test]
    fn command_topic_colliding_with_publish_topic_fails() {
        let topics = specs(json!({
            "a": {"topic": "t/a", "get": "t/b", "payload": 1},
            "b": {"topic": "t/b", "payload": 2}
        }));
        assert!(matches!(
            CommandRegistry::build(&topics),
            Err(Error::DuplicateTopic(t)) if t == "t/b"
        ));

        let topics = specs(json!({
            "a": {"topic": "t/a", "payload": {
                "x": {"func": "constant", "param": {"cur": 1}, "set:t/a": "cur"}
            }}
        }));
        assert!(matches!(
            CommandRegistry::build(&topics),
            Err(Error::DuplicateTopic(t)) if t == "t/a"
        ));
    }

    #[test]
    fn set_on_missing_param_fails() {
        let topics = specs(json!({
            "a": {"topic": "t/a", "payload": {
                "x": {"func": "constant", "param": {"cur": 1}, "set:t/a/x": "delta"}
            }}
        }));
        let err = CommandRegistry::build(&topics).unwrap_err();
        assert_eq!(
            err.to_string(),
            "set topic \"t/a/x\" targets \"param.delta\", not found in a.payload.x"
        );
    }

    #[test]
    fn set_outside_function_call_fails() {
        let topics = specs(json!({
            "a": {"topic": "t/a", "set:t/a/v": "v", "payload": {"v": 1}}
        }));
        assert!(matches!(
            CommandRegistry::build(&topics),
            Err(Error::SetTarget { .. })
        ));
    }

    #[test]
    fn templated_publish_topics_are_not_claimed() {
        let topics = specs(json!({
            "a": {"topic": {"func": "cyclicChoice", "param": {"list": ["x", "y"]}}, "payload": 1},
            "b": {"topic": "t/b", "payload": 2}
        }));
        assert!(CommandRegistry::build(&topics).unwrap().is_empty());
    }

    #[test]
    fn set_body_parsing_prefers_numbers() {
        assert_eq!(parse_set_body("42"), json!(42));
        assert_eq!(parse_set_body(" -7\n"), json!(-7));
        assert_eq!(parse_set_body("3.14").to_string(), "3.14");
        assert!(parse_set_body("3.14").is_f64());
        assert_eq!(parse_set_body("true"), json!(true));
        assert_eq!(parse_set_body("[1, 2]"), json!([1, 2]));
        assert_eq!(parse_set_body("{\"a\": null}"), json!({"a": null}));
        assert_eq!(parse_set_body("NaN"), json!("NaN"));
        assert_eq!(parse_set_body("hot"), json!("hot"));
    }
}
