//! Application configuration with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`AppConfig::default()`]
//! 2. If a config file is given, deep-merge its values over the defaults
//! 3. Apply `MARIONETTE_*` environment variable overrides
//! 4. The binary applies CLI flags last
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use marionette_link::LinkConfig;
use marionette_server::{ServerConfig, Transport};
use marionette_telemetry::{parse_level, LogFormat, TelemetryConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSection,
    pub instances: InstanceSection,
    pub logging: LoggingSection,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub transport: Transport,
    pub host: String,
    pub port: u16,
    pub max_send_queue: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        let defaults = ServerConfig::default();
        Self {
            transport: defaults.transport,
            host: defaults.host,
            port: defaults.port,
            max_send_queue: defaults.max_send_queue,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceSection {
    pub host: String,
    pub base_port: u16,
    pub max_instances: u32,
    pub connect_timeout_ms: u64,
    pub max_line_length: usize,
    pub history_size: usize,
}

impl Default for InstanceSection {
    fn default() -> Self {
        let defaults = LinkConfig::default();
        Self {
            host: defaults.host,
            base_port: defaults.base_port,
            max_instances: defaults.max_instances,
            connect_timeout_ms: u64::try_from(defaults.connect_timeout.as_millis())
                .unwrap_or(u64::MAX),
            max_line_length: defaults.max_line_length,
            history_size: defaults.history_size,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub format: LogFormat,
    /// Per-module level overrides, e.g. `{"marionette_link": "debug"}`.
    pub modules: BTreeMap<String, String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Json,
            modules: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    /// Load from an optional file path, then apply process environment overrides.
    ///
    /// A path that was given explicitly must exist.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Defaults with the file's values deep-merged over them.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content)?;
        let defaults = serde_json::to_value(Self::default())?;
        Ok(serde_json::from_value(deep_merge(defaults, user))?)
    }

    /// Apply `MARIONETTE_*` overrides read through `lookup`.
    ///
    /// Invalid values are logged and ignored.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let read = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = read("MARIONETTE_PORT") {
            match v.trim().parse() {
                Ok(port) => self.server.port = port,
                Err(_) => warn!(key = "MARIONETTE_PORT", value = %v, "invalid port env var, ignoring"),
            }
        }
        if let Some(v) = read("MARIONETTE_HOST") {
            self.server.host = v;
        }
        if let Some(v) = read("MARIONETTE_TRANSPORT") {
            match v.parse() {
                Ok(transport) => self.server.transport = transport,
                Err(e) => warn!(key = "MARIONETTE_TRANSPORT", error = %e, "ignoring env var"),
            }
        }
        if let Some(v) = read("MARIONETTE_INSTANCE_HOST") {
            self.instances.host = v;
        }
        if let Some(v) = read("MARIONETTE_BASE_PORT") {
            match v.trim().parse() {
                Ok(port) => self.instances.base_port = port,
                Err(_) => {
                    warn!(key = "MARIONETTE_BASE_PORT", value = %v, "invalid port env var, ignoring")
                }
            }
        }
        if let Some(v) = read("MARIONETTE_LOG_LEVEL") {
            match parse_level(&v) {
                Ok(_) => self.logging.level = v.trim().to_ascii_lowercase(),
                Err(e) => warn!(key = "MARIONETTE_LOG_LEVEL", error = %e, "ignoring env var"),
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.max_send_queue == 0 {
            return Err(invalid("server.max_send_queue", "must be at least 1"));
        }
        if self.instances.max_instances == 0 {
            return Err(invalid("instances.max_instances", "must be at least 1"));
        }
        if self.instances.connect_timeout_ms == 0 {
            return Err(invalid("instances.connect_timeout_ms", "must be at least 1"));
        }
        if self.instances.max_line_length == 0 {
            return Err(invalid("instances.max_line_length", "must be at least 1"));
        }
        if self.instances.host.trim().is_empty() {
            return Err(invalid("instances.host", "must not be empty"));
        }
        parse_level(&self.logging.level)
            .map_err(|e| invalid("logging.level", e.to_string()))?;
        Ok(())
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            transport: self.server.transport,
            host: self.server.host.clone(),
            port: self.server.port,
            max_send_queue: self.server.max_send_queue,
        }
    }

    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            host: self.instances.host.clone(),
            base_port: self.instances.base_port,
            max_instances: self.instances.max_instances,
            connect_timeout: Duration::from_millis(self.instances.connect_timeout_ms),
            max_line_length: self.instances.max_line_length,
            history_size: self.instances.history_size,
        }
    }

    pub fn telemetry_config(&self) -> Result<TelemetryConfig, ConfigError> {
        let log_level =
            parse_level(&self.logging.level).map_err(|e| invalid("logging.level", e.to_string()))?;
        let module_levels = self
            .logging
            .modules
            .iter()
            .map(|(module, level)| {
                parse_level(level)
                    .map(|level| (module.clone(), level))
                    .map_err(|e| invalid("logging.modules", e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TelemetryConfig {
            log_level,
            module_levels,
            format: self.logging.format,
        })
    }
}

fn invalid(key: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.into(),
    }
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}
