use crate::connection::{
    ConnectionSettings, HEARTBEAT_INTERVAL, MAX_RECONNECT_ATTEMPTS, RECONNECT_DELAY,
};
use crate::endpoint::validate_base;
use echosoul_proto::{Id, DEFAULT_MAX_FRAME_SIZE, MAX_FRAME_SIZE};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    pub server: ServerSettings,
    pub user: UserSettings,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Deployment the client talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerSettings {
    #[serde(default)]
    pub environment: Environment,
    pub endpoints: Endpoints,
}

/// Base WebSocket address per environment (`ws://` or `wss://`)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Endpoints {
    pub development: String,
    /// Falls back to `production` when unset
    #[serde(default)]
    pub staging: Option<String>,
    pub production: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserSettings {
    pub user_id: Id,
    /// Auth token for the AI chat service
    pub token: String,
    #[serde(default)]
    pub default_character_id: Option<Id>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Maximum inbound frame size in bytes
    #[serde(default = "default_max_frame")]
    pub max_frame_bytes: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Output logs as JSON
    #[serde(default)]
    pub json_logs: bool,
}

fn default_heartbeat_interval() -> u64 {
    HEARTBEAT_INTERVAL.as_secs()
}

fn default_reconnect_delay() -> u64 {
    RECONNECT_DELAY.as_secs()
}

fn default_max_reconnect_attempts() -> u32 {
    MAX_RECONNECT_ATTEMPTS
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_max_frame() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval(),
            reconnect_delay_secs: default_reconnect_delay(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            connect_timeout_secs: default_connect_timeout(),
            max_frame_bytes: default_max_frame(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

impl ConnectionConfig {
    pub fn to_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            reconnect_delay: Duration::from_secs(self.reconnect_delay_secs),
            max_reconnect_attempts: self.max_reconnect_attempts,
            max_frame_size: self.max_frame_bytes,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl ClientConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        Self {
            server: ServerSettings {
                environment: Environment::Development,
                endpoints: Endpoints {
                    development: "ws://localhost:8000".to_string(),
                    staging: None,
                    production: "wss://api.echosoul.ai".to_string(),
                },
            },
            user: UserSettings {
                user_id: Id::Num(1),
                token: "change-me".to_string(),
                default_character_id: None,
            },
            connection: ConnectionConfig::default(),
            logging: LoggingSettings::default(),
        }
    }

    /// Base address of the configured environment
    pub fn endpoint(&self) -> crate::Result<&str> {
        let endpoints = &self.server.endpoints;
        let base = match self.server.environment {
            Environment::Development => endpoints.development.as_str(),
            Environment::Staging => endpoints
                .staging
                .as_deref()
                .unwrap_or(endpoints.production.as_str()),
            Environment::Production => endpoints.production.as_str(),
        };
        validate_base(base)?;
        Ok(base)
    }

    fn validate(&self) -> anyhow::Result<()> {
        self.endpoint()?;

        let conn = &self.connection;
        if conn.heartbeat_interval_secs == 0 {
            anyhow::bail!("heartbeat_interval_secs must be greater than zero");
        }
        if conn.max_frame_bytes == 0 || conn.max_frame_bytes > MAX_FRAME_SIZE {
            anyhow::bail!(
                "max_frame_bytes must be between 1 and {} bytes",
                MAX_FRAME_SIZE
            );
        }
        Ok(())
    }
}
