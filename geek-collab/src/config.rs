//! Server configuration.

use crate::hub::HubConfig;

/// Default WebSocket route, the room id follows it: `/api/ws/{roomId}`.
pub const DEFAULT_PATH_PREFIX: &str = "/api/ws/";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// URL path prefix in front of the room id
    pub path_prefix: String,
    /// Mailbox and room queue bounds
    pub hub: HubConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            path_prefix: DEFAULT_PATH_PREFIX.to_string(),
            hub: HubConfig::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be a positive integer, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },
}

impl ServerConfig {
    /// Read `HOST`, `PORT`, `WS_PATH_PREFIX`, `MAILBOX_CAPACITY` and
    /// `ROOM_QUEUE_CAPACITY` from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`ServerConfig::from_env`] with an injectable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let read = |name: &str| lookup(name).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());

        let host = read("HOST").unwrap_or_else(|| "0.0.0.0".to_owned());
        let port = read("PORT").unwrap_or_else(|| "8080".to_owned());
        let path_prefix = read("WS_PATH_PREFIX").unwrap_or(defaults.path_prefix);

        let mailbox_capacity = match read("MAILBOX_CAPACITY") {
            Some(value) => parse_positive("MAILBOX_CAPACITY", value)?,
            None => defaults.hub.mailbox_capacity,
        };
        let room_queue_capacity = match read("ROOM_QUEUE_CAPACITY") {
            Some(value) => parse_positive("ROOM_QUEUE_CAPACITY", value)?,
            None => defaults.hub.room_queue_capacity,
        };

        Ok(Self {
            bind_addr: format!("{host}:{port}"),
            path_prefix,
            hub: HubConfig {
                mailbox_capacity,
                room_queue_capacity,
            },
        })
    }
}

fn parse_positive(name: &'static str, value: String) -> Result<usize, ConfigError> {
    match value.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::InvalidNumber { name, value }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.path_prefix, "/api/ws/");
        assert_eq!(config.hub.mailbox_capacity, 256);
        assert_eq!(config.hub.room_queue_capacity, 1024);
    }

    #[test]
    fn test_empty_environment_uses_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.hub, HubConfig::default());
    }

    #[test]
    fn test_environment_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("HOST", "127.0.0.1"),
            ("PORT", "9001"),
            ("MAILBOX_CAPACITY", "32"),
            ("ROOM_QUEUE_CAPACITY", "64"),
            ("WS_PATH_PREFIX", "/ws/"),
        ]))
        .unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:9001");
        assert_eq!(config.path_prefix, "/ws/");
        assert_eq!(config.hub.mailbox_capacity, 32);
        assert_eq!(config.hub.room_queue_capacity, 64);
    }

    #[test]
    fn test_blank_port_falls_back() {
        let config = ServerConfig::from_lookup(lookup(&[("PORT", "  ")])).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
    }

    #[test]
    fn test_invalid_capacity_rejected() {
        let err = ServerConfig::from_lookup(lookup(&[("MAILBOX_CAPACITY", "0")])).unwrap_err();
        assert!(err.to_string().contains("MAILBOX_CAPACITY"));

        assert!(ServerConfig::from_lookup(lookup(&[("ROOM_QUEUE_CAPACITY", "lots")])).is_err());
    }
}
