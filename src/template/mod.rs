//! Payload templates
//!
//! A template is the typed form of one `topic` or `payload` entry of the
//! configuration. It is built once from the ordered document and keeps its
//! shape for the lifetime of the process; only the [`ParamState`] inside
//! function calls changes afterwards.
//!
//! ```text
//! {"temp": {"func": "randomWalk", "param": {"cur": 20, "rand": 0.5},
//!           "set:room/temp/set": "cur"},
//!  "#note": "comments are dropped",
//!  "unit": "C"}
//! ```

mod eval;

use std::fmt;

use indexmap::IndexMap;
use serde_json::Value;

pub use eval::Evaluator;

use crate::generator::{Generator, ParamState};
use crate::{Error, Result};

/// Prefix marking a key as a comment
pub const COMMENT_PREFIX: char = '#';

/// Key naming the generator of a function call
pub const FUNC_KEY: &str = "func";

/// Key holding a function call's parameters
pub const PARAM_KEY: &str = "param";

/// Marker key declaring a get command topic
pub const GET_KEY: &str = "get";

/// Prefix of marker keys declaring set command topics
pub const SET_PREFIX: &str = "set:";

/// Whether a key is a comment
#[must_use]
pub fn is_comment(key: &str) -> bool {
    key.starts_with(COMMENT_PREFIX)
}

/// Command marker declared on a template node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandMarker {
    /// Messages on `topic` trigger an immediate publish of the owning topic
    Get {
        /// Topic to subscribe to
        topic: String,
    },
    /// Messages on `topic` overwrite `param[key]` of the declaring node
    Set {
        /// Topic to subscribe to
        topic: String,
        /// Parameter field to overwrite
        key: String,
    },
}

impl CommandMarker {
    /// Subscribed topic
    #[must_use]
    pub fn topic(&self) -> &str {
        match self {
            Self::Get { topic } | Self::Set { topic, .. } => topic,
        }
    }

    /// Parse a marker entry, `None` when `key` is not a marker key
    ///
    /// # Errors
    ///
    /// Returns error if a marker carries a non-string value or an empty topic
    pub fn parse(key: &str, value: &Value) -> Result<Option<Self>> {
        if key == GET_KEY {
            let topic = marker_string(key, value)?;
            return Ok(Some(Self::Get { topic }));
        }

        if let Some(topic) = key.strip_prefix(SET_PREFIX) {
            if topic.is_empty() {
                return Err(Error::Config(format!("\"{key}\" has no topic")));
            }
            let target = marker_string(key, value)?;
            return Ok(Some(Self::Set {
                topic: topic.to_string(),
                key: target,
            }));
        }

        Ok(None)
    }
}

fn marker_string(key: &str, value: &Value) -> Result<String> {
    match value {
        Value::String(s) if !s.is_empty() => Ok(s.clone()),
        other => Err(Error::Config(format!(
            "\"{key}\" expects a non-empty string, got {other}"
        ))),
    }
}

/// A generator invocation and its persistent parameters
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    /// Generator to run
    pub generator: Generator,
    /// State carried between evaluations
    pub params: ParamState,
    /// Command markers declared beside `func`/`param`
    pub markers: Vec<CommandMarker>,
}

/// One node of a template tree
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateNode {
    /// Scalar emitted as-is
    Literal(Value),
    /// Ordered map of child templates
    Object {
        /// Children in declaration order, comments removed
        fields: IndexMap<String, TemplateNode>,
        /// Command markers declared on this object
        markers: Vec<CommandMarker>,
    },
    /// Ordered list of child templates
    Array(Vec<TemplateNode>),
    /// Generator invocation
    Call(FunctionCall),
}

impl TemplateNode {
    /// Build a template from a configuration value
    ///
    /// Objects holding both `func` and `param` become function calls, other
    /// objects and arrays are recursed into, scalars become literals.
    ///
    /// # Errors
    ///
    /// Returns error for unknown generators, invalid parameters, malformed
    /// markers or stray keys beside `func`/`param`
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => {
                if map.contains_key(FUNC_KEY) && map.contains_key(PARAM_KEY) {
                    Self::call_from_map(map)
                } else {
                    let mut fields = IndexMap::with_capacity(map.len());
                    let mut markers = Vec::new();
                    for (key, child) in map {
                        if is_comment(&key) {
                            continue;
                        }
                        if let Some(marker) = CommandMarker::parse(&key, &child)? {
                            markers.push(marker);
                            continue;
                        }
                        fields.insert(key, Self::from_value(child)?);
                    }
                    Ok(Self::Object { fields, markers })
                }
            }
            Value::Array(items) => items
                .into_iter()
                .map(Self::from_value)
                .collect::<Result<Vec<_>>>()
                .map(Self::Array),
            scalar => Ok(Self::Literal(scalar)),
        }
    }

    fn call_from_map(map: serde_json::Map<String, Value>) -> Result<Self> {
        let mut generator = None;
        let mut params = None;
        let mut markers = Vec::new();

        for (key, value) in map {
            match key.as_str() {
                FUNC_KEY => {
                    let name = value.as_str().ok_or_else(|| {
                        Error::Config(format!("\"{FUNC_KEY}\" expects a string, got {value}"))
                    })?;
                    generator = Some(
                        Generator::from_name(name)
                            .ok_or_else(|| Error::UnknownGenerator(name.to_string()))?,
                    );
                }
                PARAM_KEY => match value {
                    Value::Object(fields) => params = Some(ParamState::new(fields)),
                    other => {
                        return Err(Error::Config(format!(
                            "\"{PARAM_KEY}\" expects an object, got {other}"
                        )));
                    }
                },
                k if is_comment(k) => {}
                _ => match CommandMarker::parse(&key, &value)? {
                    Some(marker) => markers.push(marker),
                    None => {
                        return Err(Error::Config(format!(
                            "unexpected key \"{key}\" beside \"{FUNC_KEY}\"/\"{PARAM_KEY}\""
                        )));
                    }
                },
            }
        }

        // both keys were present, so both are set
        let (Some(generator), Some(params)) = (generator, params) else {
            return Err(Error::Config("incomplete function call".to_string()));
        };
        generator.validate(&params)?;

        Ok(Self::Call(FunctionCall {
            generator,
            params,
            markers,
        }))
    }

    /// Literal string value, if this node is one
    #[must_use]
    pub fn as_literal_str(&self) -> Option<&str> {
        match self {
            Self::Literal(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Markers declared directly on this node
    #[must_use]
    pub fn markers(&self) -> &[CommandMarker] {
        match self {
            Self::Object { markers, .. } | Self::Call(FunctionCall { markers, .. }) => markers,
            Self::Literal(_) | Self::Array(_) => &[],
        }
    }

    /// Visit this node and all descendants, parents first
    ///
    /// # Errors
    ///
    /// Stops at and returns the first error raised by `visit`
    pub fn walk<F>(&self, path: &mut NodePath, visit: &mut F) -> Result<()>
    where
        F: FnMut(&NodePath, &Self) -> Result<()>,
    {
        visit(path, self)?;
        match self {
            Self::Object { fields, .. } => {
                for (key, child) in fields {
                    path.push(PathSegment::Key(key.clone()));
                    child.walk(path, visit)?;
                    path.pop();
                }
            }
            Self::Array(items) => {
                for (index, child) in items.iter().enumerate() {
                    path.push(PathSegment::Index(index));
                    child.walk(path, visit)?;
                    path.pop();
                }
            }
            Self::Literal(_) | Self::Call(_) => {}
        }
        Ok(())
    }

    /// Descendant at `path`
    pub fn node_mut(&mut self, path: &NodePath) -> Option<&mut Self> {
        let mut node = self;
        for segment in &path.0 {
            node = match (node, segment) {
                (Self::Object { fields, .. }, PathSegment::Key(key)) => fields.get_mut(key)?,
                (Self::Array(items), PathSegment::Index(index)) => items.get_mut(*index)?,
                _ => return None,
            };
        }
        Some(node)
    }

    /// Parameters of the function call at `path`
    pub fn params_mut(&mut self, path: &NodePath) -> Option<&mut ParamState> {
        match self.node_mut(path)? {
            Self::Call(call) => Some(&mut call.params),
            _ => None,
        }
    }
}

/// Step from a node to one of its children
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// Object field
    Key(String),
    /// Array element
    Index(usize),
}

/// Location of a node inside a template tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodePath(Vec<PathSegment>);

impl NodePath {
    /// Path of the root node
    #[must_use]
    pub const fn root() -> Self {
        Self(Vec::new())
    }

    /// Descend one level
    pub fn push(&mut self, segment: PathSegment) {
        self.0.push(segment);
    }

    /// Ascend one level
    pub fn pop(&mut self) -> Option<PathSegment> {
        self.0.pop()
    }

    /// Whether this is the root path
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("<root>");
        }
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                PathSegment::Key(key) if i == 0 => write!(f, "{key}")?,
                PathSegment::Key(key) => write!(f, ".{key}")?,
                PathSegment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}
