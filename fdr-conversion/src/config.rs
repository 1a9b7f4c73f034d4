use forwarder::config::{Config as ForwarderConfig, ValidationError};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::fs::File;
use std::path::Path;

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_prefix() -> String {
    "fdr_conversion".into()
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default)]
    pub sentry_dsn: Option<String>,
    /// Default filter directive, used when `RUST_LOG` is unset
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            sentry_dsn: None,
            level: default_level(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub metrics: Option<MetricsConfig>,
    pub logging: Option<LoggingConfig>,
    pub forwarder: ForwarderConfig,
}

/// Environment variables copied verbatim into the config tree.
const STRING_OVERRIDES: &[(&str, &[&str])] = &[
    ("FDR_FASE1_BASE_URL", &["forwarder", "downstream", "base_url"]),
    ("FDR_FASE1_API_KEY", &["forwarder", "downstream", "api_key"]),
    ("FDR_FASE1_CONVERSION_PATH", &["forwarder", "downstream", "path"]),
    ("FDR_PAYLOAD_FORM", &["forwarder", "downstream", "payload_form"]),
    ("BLOB_STORAGE_FDR3_CONTAINER", &["forwarder", "blob_store", "container"]),
    ("ERROR_TABLE_NAME", &["forwarder", "dead_letter", "table"]),
    ("SENTRY_DSN", &["logging", "sentry_dsn"]),
];

const NUMERIC_OVERRIDES: &[(&str, &[&str])] = &[
    ("MAX_RETRY_COUNT", &["forwarder", "retry", "max_retry_count"]),
    ("RETRY_MINIMUM_INTERVAL_SECS", &["forwarder", "retry", "minimum_interval_secs"]),
    ("RETRY_MAXIMUM_INTERVAL_SECS", &["forwarder", "retry", "maximum_interval_secs"]),
];

/// Connection strings switch the matching store to Azure.
const CONNECTION_OVERRIDES: &[(&str, &str)] = &[
    ("FDR_SA_CONNECTION_STRING", "blob_store"),
    ("TABLE_STORAGE_CONN_STRING", "dead_letter"),
];

impl Config {
    /// Loads the YAML file at `path` (if any), applies environment
    /// overrides and validates the result.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, |name| std::env::var(name).ok())
    }

    fn load_with_env<F>(path: Option<&Path>, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut tree = match path {
            Some(path) => serde_yaml::from_reader(File::open(path)?)?,
            None => Value::Null,
        };
        if tree.is_null() {
            tree = Value::Mapping(Mapping::new());
        }

        apply_env_overrides(&mut tree, env)?;

        let config: Config = serde_yaml::from_value(tree)?;
        config.forwarder.validate()?;
        Ok(config)
    }
}

fn apply_env_overrides<F>(tree: &mut Value, env: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    for (name, path) in STRING_OVERRIDES {
        if let Some(value) = env(name) {
            set_path(tree, path, Value::String(value));
        }
    }

    for (name, path) in NUMERIC_OVERRIDES {
        if let Some(value) = env(name) {
            let number: u64 = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                name: name.to_string(),
                value: value.clone(),
            })?;
            set_path(tree, path, Value::Number(number.into()));
        }
    }

    for (name, store) in CONNECTION_OVERRIDES {
        if let Some(value) = env(name) {
            set_path(tree, &["forwarder", store, "type"], Value::String("azure".into()));
            set_path(tree, &["forwarder", store, "connection_string"], Value::String(value));
        }
    }

    // A store section created only for its container or table name keeps
    // the in-memory backend.
    for (_, store) in CONNECTION_OVERRIDES {
        if let Some(Value::Mapping(section)) = tree
            .get_mut("forwarder")
            .and_then(|forwarder| forwarder.get_mut(*store))
        {
            let type_key = Value::String("type".into());
            if !section.contains_key(&type_key) {
                section.insert(type_key, Value::String("memory".into()));
            }
        }
    }

    Ok(())
}

/// Sets `path` in a YAML tree, creating or replacing intermediate mappings.
fn set_path(tree: &mut Value, path: &[&str], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };

    let mut node = tree;
    for key in parents {
        if !node.is_mapping() {
            *node = Value::Mapping(Mapping::new());
        }
        let Value::Mapping(mapping) = node else {
            return;
        };
        node = mapping
            .entry(Value::String(key.to_string()))
            .or_insert(Value::Null);
    }

    if !node.is_mapping() {
        *node = Value::Mapping(Mapping::new());
    }
    if let Value::Mapping(mapping) = node {
        mapping.insert(Value::String(last.to_string()), value);
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid value {value:?} for environment variable {name}")]
    InvalidEnv { name: String, value: String },
    #[error("invalid config: {0}")]
    ValidationError(#[from] ValidationError),
}
