use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::static_config::{StaticConfigItem, STATIC_CONFIG_TABLE};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SystemConfig {
    values: HashMap<String, String>,
}

impl SystemConfig {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn get_string(&self, key: &str) -> String {
        self.get(key)
            .map(str::to_string)
            .or_else(|| default_value(key))
            .unwrap_or_default()
    }

    pub fn get_number(&self, key: &str) -> i64 {
        self.get(key)
            .and_then(|value| value.parse::<i64>().ok())
            .or_else(|| default_value(key).and_then(|value| value.parse::<i64>().ok()))
            .unwrap_or_default()
    }

    /// Like [`SystemConfig::get_number`], falling back to the table default
    /// when the configured value is not positive.
    pub fn get_positive(&self, key: &str) -> u64 {
        let value = self.get_number(key);
        if value > 0 {
            return value as u64;
        }
        default_value(key)
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(1)
    }

    pub fn keys(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }

    pub fn with_value(mut self, key: &str, value: impl Into<String>) -> Result<Self, ConfigError> {
        if config_item(key).is_none() {
            return Err(ConfigError::UnknownKey(key.to_string()));
        }
        self.values.insert(key.to_string(), value.into());
        Ok(self)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(String),
    #[error("unknown config key: {0}")]
    UnknownKey(String),
    #[error("type mismatch for key {0}: expected {1}")]
    TypeMismatch(String, String),
    #[error("config io error: {0}")]
    Io(String),
}

pub struct SystemConfigLoader;

impl SystemConfigLoader {
    pub fn from_str(input: &str) -> Result<SystemConfig, ConfigError> {
        let value: toml::Value =
            toml::from_str(input).map_err(|err| ConfigError::Parse(err.to_string()))?;
        let mut values = HashMap::new();
        let mut errors = Vec::new();
        flatten_values(&mut values, String::new(), &value, &mut errors);
        if let Some(err) = errors.into_iter().next() {
            return Err(err);
        }
        Ok(SystemConfig { values })
    }

    /// Reads `path`, writing [`default_template`] there first when it does
    /// not exist yet.
    pub fn load_or_create(path: &Path) -> Result<SystemConfig, ConfigError> {
        if !path.exists() {
            std::fs::write(path, default_template()).map_err(|err| ConfigError::Io(err.to_string()))?;
        }
        let input = std::fs::read_to_string(path).map_err(|err| ConfigError::Io(err.to_string()))?;
        Self::from_str(&input)
    }
}

/// TOML document listing every known key with its default value.
pub fn default_template() -> String {
    let mut sections: BTreeMap<&str, Vec<&StaticConfigItem>> = BTreeMap::new();
    for item in STATIC_CONFIG_TABLE {
        let section = item.key.split('.').next().unwrap_or(item.key);
        sections.entry(section).or_default().push(item);
    }
    let mut output = String::new();
    for (section, items) in sections {
        if !output.is_empty() {
            output.push('\n');
        }
        output.push_str(&format!("[{section}]\n"));
        for item in items {
            let name = item.key.rsplit('.').next().unwrap_or(item.key);
            let value = match item.value_type {
                "string" => format!("{:?}", item.default_value),
                _ => item.default_value.to_string(),
            };
            output.push_str(&format!("# {}\n{name} = {value}\n", item.description));
        }
    }
    output
}

fn flatten_values(
    output: &mut HashMap<String, String>,
    prefix: String,
    value: &toml::Value,
    errors: &mut Vec<ConfigError>,
) {
    match value {
        toml::Value::Table(table) => {
            for (key, nested) in table {
                let new_prefix = if prefix.is_empty() {
                    key.to_string()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_values(output, new_prefix, nested, errors);
            }
        }
        toml::Value::String(value) => {
            insert_checked(output, &prefix, value.to_string(), "string", errors);
        }
        toml::Value::Integer(value) => {
            insert_checked(output, &prefix, value.to_string(), "number", errors);
        }
        toml::Value::Float(value) => {
            insert_checked(output, &prefix, value.to_string(), "number", errors);
        }
        toml::Value::Boolean(value) => {
            insert_checked(output, &prefix, value.to_string(), "boolean", errors);
        }
        _ => {
            errors.push(ConfigError::TypeMismatch(prefix, "string|number|boolean".to_string()));
        }
    }
}

fn insert_checked(
    output: &mut HashMap<String, String>,
    key: &str,
    value: String,
    expected_type: &str,
    errors: &mut Vec<ConfigError>,
) {
    let Some(item) = config_item(key) else {
        errors.push(ConfigError::UnknownKey(key.to_string()));
        return;
    };
    if item.value_type != expected_type {
        errors.push(ConfigError::TypeMismatch(key.to_string(), item.value_type.to_string()));
        return;
    }
    output.insert(key.to_string(), value);
}

fn config_item(key: &str) -> Option<&'static StaticConfigItem> {
    STATIC_CONFIG_TABLE.iter().find(|item| item.key == key)
}

fn default_value(key: &str) -> Option<String> {
    config_item(key).map(|item| item.default_value.to_string())
}
