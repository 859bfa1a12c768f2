//! Dev server configuration.

use crate::backend::client::DEFAULT_DATAFILE_URL;
use crate::backend::DEFAULT_READY_TIMEOUT;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Configuration for the dev server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Extra settings exposed to functions, e.g. the access key.
    pub env: HashMap<String, String>,
    /// Whether to serve `/_health`.
    pub enable_health: bool,
    /// Maximum request body size in bytes.
    pub max_body_size: usize,
    /// Upper bound on the wait for a flag client to become ready.
    #[serde(with = "millis")]
    pub ready_timeout: Duration,
    /// Base URL datafiles are downloaded from.
    pub datafile_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            env: HashMap::new(),
            enable_health: true,
            max_body_size: 1024 * 1024, // 1MB
            ready_timeout: DEFAULT_READY_TIMEOUT,
            datafile_url: DEFAULT_DATAFILE_URL.to_string(),
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `HOST`, `PORT`, `OPTIMIZELY_SDK_KEY`, `RTS_READY_TIMEOUT_MS` and
    /// `RTS_DATAFILE_URL` from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = lookup("HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("PORT") {
            config.port = port.parse().map_err(|_| ConfigError::Invalid {
                name: "PORT",
                value: port.clone(),
            })?;
        }
        if let Some(key) = lookup(crate::rts::SDK_KEY_ENV) {
            config.env.insert(crate::rts::SDK_KEY_ENV.to_string(), key);
        }
        if let Some(ms) = lookup("RTS_READY_TIMEOUT_MS") {
            let ms: u64 = ms.parse().map_err(|_| ConfigError::Invalid {
                name: "RTS_READY_TIMEOUT_MS",
                value: ms.clone(),
            })?;
            config.ready_timeout = Duration::from_millis(ms);
        }
        if let Some(url) = lookup("RTS_DATAFILE_URL") {
            config.datafile_url = url.trim_end_matches('/').to_string();
        }

        Ok(config)
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn max_body_size(mut self, bytes: usize) -> Self {
        self.max_body_size = bytes;
        self
    }

    pub fn enable_health(mut self, enabled: bool) -> Self {
        self.enable_health = enabled;
        self
    }

    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn datafile_url(mut self, url: impl Into<String>) -> Self {
        self.datafile_url = url.into();
        self
    }

    /// The configured access key, if any.
    pub fn access_key(&self) -> Option<&str> {
        self.env
            .get(crate::rts::SDK_KEY_ENV)
            .map(String::as_str)
            .filter(|key| !key.is_empty())
    }

    /// Get the bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
