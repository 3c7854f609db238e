//! Error types for mqttgen

use thiserror::Error;

/// Result type alias for mqttgen operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading, scanning or running a generator
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Required key absent from a topic entry
    #[error("missing key \"{field}\" for topic \"{name}\"")]
    MissingField {
        /// Logical name of the topic entry
        name: String,
        /// Key that was expected
        field: &'static str,
    },

    /// Same topic string declared more than once
    #[error("topic \"{0}\" is defined several times")]
    DuplicateTopic(String),

    /// `set:` marker pointing at a parameter the node does not have
    #[error("set topic \"{topic}\" targets \"param.{key}\", not found in {node}")]
    SetTarget {
        /// Subscribed command topic
        topic: String,
        /// Parameter name the marker wants to overwrite
        key: String,
        /// Location of the offending node
        node: String,
    },

    /// `func` names a generator that does not exist
    #[error("unknown generator function \"{0}\"")]
    UnknownGenerator(String),

    /// Generator parameters rejected at load time
    #[error("invalid parameters for {func}: {reason}")]
    InvalidParam {
        /// Generator name
        func: &'static str,
        /// What is wrong
        reason: String,
    },

    /// Generator failed while producing a value
    #[error("generator error: {0}")]
    Generator(String),

    /// Broker client error
    #[error("broker error: {0}")]
    Broker(String),

    /// Flow file replay error
    #[error("replay error: {0}")]
    Replay(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether this error comes from a bad configuration document
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::MissingField { .. }
                | Self::DuplicateTopic(_)
                | Self::SetTarget { .. }
                | Self::UnknownGenerator(_)
                | Self::InvalidParam { .. }
        )
    }
}

impl From<rumqttc::ClientError> for Error {
    fn from(e: rumqttc::ClientError) -> Self {
        Self::Broker(e.to_string())
    }
}

impl From<rumqttc::ConnectionError> for Error {
    fn from(e: rumqttc::ConnectionError) -> Self {
        Self::Broker(e.to_string())
    }
}
