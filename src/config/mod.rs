//! Configuration value lookup.
//!
//! Telemetry settings are read once at startup through [`ConfigSource`].
//! A missing key is not an error: callers fall back to empty or default values.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Well-known configuration keys.
pub mod keys {
    pub const INSTRUMENTATION_KEY: &str = "APPINSIGHTS_INSTRUMENTATIONKEY";
    pub const SERVICE_NAME: &str = "SERVICE_NAME";
    pub const LOG_LEVEL: &str = "LOG_LEVEL";
    pub const APM_ENDPOINT: &str = "APPINSIGHTS_ENDPOINT";
}

/// Errors that can occur while loading a configuration source
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// A synchronous key/value lookup.
pub trait ConfigSource {
    /// Look up `key`, returning `None` when it is not set.
    fn get_var(&self, key: &str) -> Option<String>;

    /// Look up `key`, falling back to `default` when it is not set.
    fn get_var_or_default(&self, key: &str, default: &str) -> String {
        self.get_var(key).unwrap_or_else(|| default.to_string())
    }
}

/// Reads values from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSource;

impl ConfigSource for EnvSource {
    fn get_var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// In-memory values, mostly useful for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct MapSource {
    values: HashMap<String, String>,
}

impl MapSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return this source with `key` set to `value`.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapSource {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl ConfigSource for MapSource {
    fn get_var(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// Values loaded once from a flat YAML mapping.
///
/// ```yaml
/// APPINSIGHTS_INSTRUMENTATIONKEY: 00000000-0000-0000-0000-000000000000
/// SERVICE_NAME: billing
/// LOG_LEVEL: info
/// ```
#[derive(Debug, Clone)]
pub struct FileSource {
    values: MapSource,
}

impl FileSource {
    /// Load a YAML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse YAML content. Scalar values of any type are read as strings;
    /// an empty document yields an empty source.
    pub fn parse(content: &str) -> Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self {
                values: MapSource::new(),
            });
        }
        let raw: Option<HashMap<String, serde_yaml::Value>> = serde_yaml::from_str(content)?;
        let values = raw
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(key, value)| scalar_to_string(value).map(|v| (key, v)))
            .collect();
        Ok(Self { values })
    }
}

impl ConfigSource for FileSource {
    fn get_var(&self, key: &str) -> Option<String> {
        self.values.get_var(key)
    }
}

fn scalar_to_string(value: serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_source() {
        let source = MapSource::new().with(keys::SERVICE_NAME, "billing");
        assert_eq!(source.get_var(keys::SERVICE_NAME).as_deref(), Some("billing"));
        assert_eq!(source.get_var(keys::LOG_LEVEL), None);
        assert_eq!(source.get_var_or_default(keys::LOG_LEVEL, "info"), "info");
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = "SERVICE_NAME: billing\nLOG_LEVEL: warn\nPORT: 8080\nDEBUG: true\nNESTED:\n  a: b\n";
        let source = FileSource::parse(yaml).unwrap();
        assert_eq!(source.get_var("SERVICE_NAME").as_deref(), Some("billing"));
        assert_eq!(source.get_var("PORT").as_deref(), Some("8080"));
        assert_eq!(source.get_var("DEBUG").as_deref(), Some("true"));
        assert_eq!(source.get_var("NESTED"), None);
    }

    #[test]
    fn test_parse_empty_yaml() {
        let source = FileSource::parse("").unwrap();
        assert_eq!(source.get_var("SERVICE_NAME"), None);
    }

    #[test]
    fn test_parse_invalid_yaml() {
        assert!(FileSource::parse("{{{{not yaml").is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let result = FileSource::load(Path::new("/nonexistent/telemux.yaml"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}
