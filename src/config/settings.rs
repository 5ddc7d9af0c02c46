use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

use crate::aggregation::ReadinessPolicy;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub feeds: FeedSettings,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Which collections to watch and how to reach them
#[derive(Debug, Clone, Deserialize)]
pub struct FeedSettings {
    /// "memory" or "redis"
    #[serde(default = "default_feed_backend")]
    pub backend: String,
    #[serde(default = "default_users_feed")]
    pub users: String,
    #[serde(default = "default_profiles_feed")]
    pub profiles: String,
    #[serde(default = "default_flags_feed")]
    pub flags: String,
    #[serde(default = "default_comments_feed")]
    pub comments: String,
    /// Document field holding the user verification status
    #[serde(default = "default_status_field")]
    pub status_field: String,
    /// Buffered events per subscription (redis backend)
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Prefix for snapshot keys and change channels
    #[serde(default = "default_redis_prefix")]
    pub prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DashboardConfig {
    /// When the dashboard leaves the loading state
    #[serde(default)]
    pub readiness: ReadinessPolicy,
    /// Authorization signal supplied by the upstream access check at boot
    #[serde(default)]
    pub authorized: bool,
    /// Keep-alive interval for the statistics stream, in seconds
    #[serde(default = "default_stream_keepalive")]
    pub stream_keepalive: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub format: LogFormat,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8082
}

fn default_feed_backend() -> String {
    "memory".to_string()
}

fn default_users_feed() -> String {
    "users".to_string()
}

fn default_profiles_feed() -> String {
    "profiles".to_string()
}

fn default_flags_feed() -> String {
    "flags".to_string()
}

fn default_comments_feed() -> String {
    "comments".to_string()
}

fn default_status_field() -> String {
    "verificationStatus".to_string()
}

fn default_channel_capacity() -> usize {
    64
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_prefix() -> String {
    "dashboard:feed".to_string()
}

fn default_stream_keepalive() -> u64 {
    15
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", i64::from(default_port()))?
            .set_default("feeds.backend", default_feed_backend())?
            .set_default("dashboard.authorized", false)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // DASHBOARD_SERVER__PORT, DASHBOARD_FEEDS__STATUS_FIELD, DASHBOARD_DASHBOARD__READINESS, ...
            .add_source(
                Environment::with_prefix("DASHBOARD")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
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
        }
    }
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            backend: default_feed_backend(),
            users: default_users_feed(),
            profiles: default_profiles_feed(),
            flags: default_flags_feed(),
            comments: default_comments_feed(),
            status_field: default_status_field(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            prefix: default_redis_prefix(),
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            readiness: ReadinessPolicy::default(),
            authorized: false,
            stream_keepalive: default_stream_keepalive(),
        }
    }
}
