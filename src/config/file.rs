//! Configuration document loading
//!
//! The generator reads one ordered document in JSON (default), YAML or TOML,
//! picked by file extension. Every format is normalised to an order-preserving
//! `serde_json::Value` so topics and payload fields keep their declared order.

use std::path::Path;

use serde_json::Value;

use crate::{Error, Result};

/// Supported document formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    /// `.json` and anything unrecognised
    Json,
    /// `.yaml` / `.yml`
    Yaml,
    /// `.toml`
    Toml,
}

impl DocumentFormat {
    /// Pick the format from a file extension
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("yaml" | "yml") => Self::Yaml,
            Some("toml") => Self::Toml,
            _ => Self::Json,
        }
    }
}

/// Parse document text
///
/// # Errors
///
/// Returns the parser's error for malformed input
pub fn parse_document(text: &str, format: DocumentFormat) -> Result<Value> {
    let value = match format {
        DocumentFormat::Json => serde_json::from_str(text)?,
        DocumentFormat::Yaml => serde_yaml::from_str(text)?,
        DocumentFormat::Toml => toml::from_str(text)?,
    };
    Ok(value)
}

/// Read and parse a configuration document
///
/// # Errors
///
/// Returns error if the file is missing, unreadable or malformed
pub fn load_document(path: &Path) -> Result<Value> {
    if !path.exists() {
        return Err(Error::Config(format!(
            "file {} does not exist",
            path.display()
        )));
    }

    let text = std::fs::read_to_string(path)?;
    let format = DocumentFormat::from_path(path);
    let value = parse_document(&text, format).map_err(|e| {
        tracing::error!(path = %path.display(), error = %e, "failed to parse config file");
        Error::Config(format!("{e} in file {}", path.display()))
    })?;

    tracing::debug!(path = %path.display(), ?format, "loaded config file");
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn format_follows_extension() {
        assert_eq!(DocumentFormat::from_path(Path::new("a.yml")), DocumentFormat::Yaml);
        assert_eq!(DocumentFormat::from_path(Path::new("a.YAML")), DocumentFormat::Yaml);
        assert_eq!(DocumentFormat::from_path(Path::new("a.toml")), DocumentFormat::Toml);
        assert_eq!(DocumentFormat::from_path(Path::new("a.json")), DocumentFormat::Json);
        assert_eq!(DocumentFormat::from_path(Path::new("config")), DocumentFormat::Json);
    }

    #[test]
    fn json_keeps_key_order() {
        let value = parse_document(r#"{"z": 1, "a": 2, "m": 3}"#, DocumentFormat::Json).unwrap();
        let keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn yaml_and_toml_normalise_to_json() {
        let yaml = "topics:\n  b:\n    topic: t/b\n  a:\n    topic: t/a\n";
        let value = parse_document(yaml, DocumentFormat::Yaml).unwrap();
        let keys: Vec<_> = value["topics"].as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["b", "a"]);

        let toml = "[misc]\ntime_interval = 0.5\n";
        let value = parse_document(toml, DocumentFormat::Toml).unwrap();
        assert_eq!(value, json!({"misc": {"time_interval": 0.5}}));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = load_document(Path::new("/nonexistent/mqttgen.json")).unwrap_err();
        assert!(err.is_config());
    }
}
