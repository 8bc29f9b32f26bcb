//! Serde-loadable configuration for servers and clients.
//!
//! Every field has a default, so a config file only names what it changes:
//!
//! ```
//! use busrpc::config::ServerConfig;
//! use busrpc::Strategy;
//!
//! let config = ServerConfig::from_json(r#"{
//!     "service_name": "com.example.HelloService",
//!     "strategy": { "kind": "thread_per_request" }
//! }"#).unwrap();
//!
//! assert_eq!(config.strategy, Strategy::ThreadPerRequest);
//! assert!(config.standard_interfaces);
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::bus::{BusType, NameFlags, DEFAULT_CALL_TIMEOUT};
use crate::error::{BusrpcError, Result};
use crate::message::names;
use crate::server::Strategy;
use crate::writer::WriterConfig;

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bus to connect to.
    pub bus: BusType,
    /// Well-known name to own; `None` serves on the unique name only.
    pub service_name: Option<String>,
    /// Flags used when requesting the name.
    pub name_flags: NameFlags,
    /// How calls are executed.
    pub strategy: Strategy,
    /// Answer `Introspect` and `Ping` automatically.
    pub standard_interfaces: bool,
    /// Reply writer settings.
    pub writer: WriterConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bus: BusType::default(),
            service_name: None,
            name_flags: NameFlags::server(),
            strategy: Strategy::default(),
            standard_interfaces: true,
            writer: WriterConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Parse and validate a JSON config.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values a server cannot start with.
    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.service_name {
            names::validate_bus_name(name)
                .map_err(|e| BusrpcError::InvalidConfig(format!("service_name: {e}")))?;
            if names::is_unique_name(name) {
                return Err(BusrpcError::InvalidConfig(format!(
                    "service_name: {name} is a unique name"
                )));
            }
        }
        if let Strategy::TaskPool { max_concurrent: 0 } = self.strategy {
            return Err(BusrpcError::InvalidConfig(
                "strategy: max_concurrent must be at least 1".to_string(),
            ));
        }
        self.writer.validate()
    }
}

/// Durations in config files are plain milliseconds.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Bus to connect to.
    pub bus: BusType,
    /// How long to wait for each reply, in milliseconds.
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            bus: BusType::default(),
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Parse and validate a JSON config.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        if config.timeout.is_zero() {
            return Err(BusrpcError::InvalidConfig("timeout must be positive".to_string()));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_defaults() {
        let config = ServerConfig::from_json("{}").unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.name_flags, NameFlags::server());
        assert_eq!(config.bus, BusType::Session);
    }

    #[test]
    fn test_server_full() {
        let config = ServerConfig::from_json(
            r#"{
                "bus": "system",
                "service_name": "com.example.HelloService",
                "name_flags": { "allow_replacement": true },
                "strategy": { "kind": "task_pool", "max_concurrent": 8 },
                "standard_interfaces": false,
                "writer": { "channel_capacity": 16 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.bus, BusType::System);
        assert_eq!(config.service_name.as_deref(), Some("com.example.HelloService"));
        assert!(config.name_flags.allow_replacement);
        assert!(!config.name_flags.replace_existing);
        assert_eq!(config.strategy, Strategy::TaskPool { max_concurrent: 8 });
        assert!(!config.standard_interfaces);
        assert_eq!(config.writer.channel_capacity, 16);
    }

    #[test]
    fn test_server_rejects_bad_values() {
        let err = ServerConfig::from_json(r#"{"service_name": "nodots"}"#).unwrap_err();
        assert!(matches!(err, BusrpcError::InvalidConfig(_)));

        let err = ServerConfig::from_json(r#"{"service_name": ":1.4"}"#).unwrap_err();
        assert!(matches!(err, BusrpcError::InvalidConfig(_)));

        let err = ServerConfig::from_json(r#"{"strategy": {"kind": "task_pool", "max_concurrent": 0}}"#)
            .unwrap_err();
        assert!(matches!(err, BusrpcError::InvalidConfig(_)));

        let err = ServerConfig::from_json(r#"{"bus": 3}"#).unwrap_err();
        assert!(matches!(err, BusrpcError::Json(_)));
    }

    #[test]
    fn test_client_config() {
        let config = ClientConfig::from_json(r#"{"timeout": 1500}"#).unwrap();
        assert_eq!(config.timeout, Duration::from_millis(1500));
        assert_eq!(ClientConfig::default().timeout, DEFAULT_CALL_TIMEOUT);
        assert!(ClientConfig::from_json(r#"{"timeout": 0}"#).is_err());
    }
}
