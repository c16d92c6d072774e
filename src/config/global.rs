//! Persisted global configuration.
//!
//! Options live in `<spool home>/config.toml` as a flat TOML table.
//! Every option is optional; readers go through
//! [`GlobalConfig::get`] and the truthiness helpers on
//! [`crate::config::Config`]. The file is user-owned and never written
//! by the install pipeline.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// The option table parsed from `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Raw options, name -> TOML value.
    #[serde(flatten)]
    options: BTreeMap<String, toml::Value>,
}

impl GlobalConfig {
    /// Load the option table from `path`. A missing file yields the
    /// empty table.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Invalid TOML syntax in config file: {}", path.display()))
    }

    /// Look up a raw option value.
    pub fn get(&self, name: &str) -> Option<&toml::Value> {
        self.options.get(name)
    }

    /// Set an option (used by tests and programmatic callers).
    pub fn set(&mut self, name: impl Into<String>, value: toml::Value) {
        self.options.insert(name.into(), value);
    }
}

/// Truthiness of a TOML option value, matching how flags are coerced:
/// `false`, `0`, `""`, `"false"` and `"0"` are falsy, everything else
/// present is truthy.
pub fn value_is_truthy(value: &toml::Value) -> bool {
    match value {
        toml::Value::Boolean(b) => *b,
        toml::Value::Integer(i) => *i != 0,
        toml::Value::Float(f) => *f != 0.0,
        toml::Value::String(s) => !s.is_empty() && s != "false" && s != "0",
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_empty() {
        let temp = TempDir::new().unwrap();
        let config = GlobalConfig::load(&temp.path().join("config.toml")).unwrap();
        assert!(config.get("force").is_none());
    }

    #[test]
    fn loads_flat_table() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "force = true\noffline-mirror = \"./mirror\"\n").unwrap();
        let config = GlobalConfig::load(&path).unwrap();
        assert!(value_is_truthy(config.get("force").unwrap()));
        assert_eq!(
            config.get("offline-mirror").unwrap().as_str().unwrap(),
            "./mirror"
        );
    }

    #[test]
    fn truthiness_coercion() {
        assert!(value_is_truthy(&toml::Value::Boolean(true)));
        assert!(value_is_truthy(&toml::Value::String("yes".into())));
        assert!(!value_is_truthy(&toml::Value::String("false".into())));
        assert!(!value_is_truthy(&toml::Value::String(String::new())));
        assert!(!value_is_truthy(&toml::Value::Integer(0)));
    }
}
