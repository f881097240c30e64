//! Application configuration.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Redis configuration. Without it events are only fanned out in-process.
    #[serde(default)]
    pub redis: Option<RedisConfig>,
    /// Messaging rules.
    #[serde(default)]
    pub messaging: MessagingConfig,
    /// Attachment storage.
    #[serde(default)]
    pub storage: StorageSettings,
    /// Background maintenance.
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public URL of this instance.
    pub url: String,
}

/// Database connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL (`postgres://` or `sqlite:`).
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL.
    pub url: String,
    /// Prefix for all pub/sub channel names.
    #[serde(default = "default_redis_prefix")]
    pub prefix: String,
}

/// Time windows and paging limits for messages.
#[derive(Debug, Clone, Deserialize)]
pub struct MessagingConfig {
    /// Minutes after creation during which the sender may edit a message.
    #[serde(default = "default_edit_window")]
    pub edit_window_minutes: i64,
    /// Minutes after creation during which the sender may delete a message for everyone.
    #[serde(default = "default_delete_window")]
    pub delete_window_minutes: i64,
    /// Page size used when the client does not ask for one.
    #[serde(default = "default_page_size")]
    pub page_size: u64,
    /// Largest page a client may request.
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u64,
    /// Characters of text kept in conversation list previews.
    #[serde(default = "default_preview_length")]
    pub preview_length: usize,
    /// Seconds after which clients drop a typing indicator.
    #[serde(default = "default_typing_timeout")]
    pub typing_timeout_secs: u64,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            edit_window_minutes: default_edit_window(),
            delete_window_minutes: default_delete_window(),
            page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            preview_length: default_preview_length(),
            typing_timeout_secs: default_typing_timeout(),
        }
    }
}

/// Where attachment files live.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    /// Name of the disk recorded on every attachment row.
    #[serde(default = "default_disk")]
    pub disk: String,
    /// Root directory of the local disk.
    #[serde(default = "default_base_path")]
    pub base_path: PathBuf,
    /// URL prefix under which stored files are served.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Directory (relative to the disk root) for attachment files.
    #[serde(default = "default_attachments_dir")]
    pub attachments_dir: String,
    /// Directory (relative to the disk root) for generated thumbnails.
    #[serde(default = "default_thumbnails_dir")]
    pub thumbnails_dir: String,
    /// Largest accepted attachment in bytes.
    #[serde(default = "default_max_attachment_bytes")]
    pub max_attachment_bytes: usize,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            disk: default_disk(),
            base_path: default_base_path(),
            base_url: default_base_url(),
            attachments_dir: default_attachments_dir(),
            thumbnails_dir: default_thumbnails_dir(),
            max_attachment_bytes: default_max_attachment_bytes(),
        }
    }
}

/// Background maintenance configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MaintenanceConfig {
    /// Seconds between attachment purge runs.
    #[serde(default = "default_purge_interval")]
    pub attachment_purge_interval_secs: u64,
    /// Attachments handled per purge run.
    #[serde(default = "default_purge_batch")]
    pub attachment_purge_batch_size: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            attachment_purge_interval_secs: default_purge_interval(),
            attachment_purge_batch_size: default_purge_batch(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    3000
}

const fn default_max_connections() -> u32 {
    100
}

const fn default_min_connections() -> u32 {
    5
}

fn default_redis_prefix() -> String {
    "atrium".to_string()
}

const fn default_edit_window() -> i64 {
    15
}

const fn default_delete_window() -> i64 {
    60
}

const fn default_page_size() -> u64 {
    50
}

const fn default_max_page_size() -> u64 {
    100
}

const fn default_preview_length() -> usize {
    50
}

const fn default_typing_timeout() -> u64 {
    5
}

fn default_disk() -> String {
    "local".to_string()
}

fn default_base_path() -> PathBuf {
    PathBuf::from("./storage")
}

fn default_base_url() -> String {
    "/files".to_string()
}

fn default_attachments_dir() -> String {
    "messages/attachments".to_string()
}

fn default_thumbnails_dir() -> String {
    "messages/thumbnails".to_string()
}

const fn default_max_attachment_bytes() -> usize {
    10 * 1024 * 1024
}

const fn default_purge_interval() -> u64 {
    3600
}

const fn default_purge_batch() -> u64 {
    100
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `config/default.toml`
    /// 2. `config/{environment}.toml` (based on `ATRIUM_ENV`)
    /// 3. Environment variables with `ATRIUM__` prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let env = std::env::var("ATRIUM_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("ATRIUM")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("ATRIUM")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_messaging_defaults() {
        let messaging = MessagingConfig::default();
        assert_eq!(messaging.edit_window_minutes, 15);
        assert_eq!(messaging.delete_window_minutes, 60);
        assert_eq!(messaging.page_size, 50);
    }

    #[test]
    fn test_minimal_config_fills_sections() {
        let raw = config::Config::builder()
            .add_source(config::File::from_str(
                r#"
                [server]
                url = "http://localhost:3000"

                [database]
                url = "sqlite::memory:"

                [messaging]
                edit_window_minutes = 5
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();

        let config: Config = raw.try_deserialize().unwrap();
        assert_eq!(config.server.port, 3000);
        assert!(config.redis.is_none());
        assert_eq!(config.messaging.edit_window_minutes, 5);
        assert_eq!(config.messaging.delete_window_minutes, 60);
        assert_eq!(config.storage.disk, "local");
        assert_eq!(config.storage.attachments_dir, "messages/attachments");
    }
}
