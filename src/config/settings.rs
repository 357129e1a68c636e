use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub token: TokenConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    /// Heartbeat sweep interval in seconds (server sends heartbeat frames)
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,
    /// Idle timeout in seconds (disconnect if no inbound traffic)
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
    /// Reaper sweep interval in seconds
    #[serde(default = "default_reaper_interval")]
    pub reaper_interval: u64,
    /// Per-connection broadcast interval in seconds
    #[serde(default = "default_broadcast_interval")]
    pub broadcast_interval: u64,
    /// Maximum inbound payload size in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Maximum concurrent connections per scope (0 admits nothing)
    #[serde(default = "default_max_connections_per_scope")]
    pub max_connections_per_scope: usize,
}

fn default_heartbeat_interval() -> u64 {
    30 // 30 seconds
}

fn default_idle_timeout() -> u64 {
    120 // 2 minutes
}

fn default_reaper_interval() -> u64 {
    60 // 1 minute
}

fn default_broadcast_interval() -> u64 {
    5
}

fn default_max_message_size() -> usize {
    64 * 1024
}

fn default_max_connections_per_scope() -> usize {
    100
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub secret: String,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8082
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8082)?
            .set_default("token.secret", "change-me")?
            .set_default("realtime.heartbeat_interval", 30)?
            .set_default("realtime.idle_timeout", 120)?
            .set_default("realtime.reaper_interval", 60)?
            .set_default("realtime.broadcast_interval", 5)?
            .set_default("realtime.max_message_size", 64 * 1024)?
            .set_default("realtime.max_connections_per_scope", 100)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables
            // SERVER_HOST, SERVER_PORT, TOKEN_SECRET, REALTIME_IDLE_TIMEOUT, etc.
            .add_source(
                Environment::default()
                    .separator("_")
                    .try_parsing(true)
                    .list_separator(","),
            );

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: default_heartbeat_interval(),
            idle_timeout: default_idle_timeout(),
            reaper_interval: default_reaper_interval(),
            broadcast_interval: default_broadcast_interval(),
            max_message_size: default_max_message_size(),
            max_connections_per_scope: default_max_connections_per_scope(),
        }
    }
}
