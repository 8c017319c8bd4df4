//! Configuration for the Flow Chat dispatcher

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Cache / fast-lane configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// WhatsApp gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Media and object storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Inbound webhook authentication
    #[serde(default)]
    pub webhook: WebhookConfig,

    /// Background worker tuning
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Hostname
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// Bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            bind_address: default_bind_address(),
        }
    }
}

fn default_hostname() -> String {
    "localhost".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Postgres URL; overridden by `DATABASE_URL`
    pub url: Option<String>,

    /// Separate URL for the durable queue; defaults to the main database.
    /// Overridden by `DURABLE_QUEUE_URL`.
    pub durable_queue_url: Option<String>,

    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            durable_queue_url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
        }
    }
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    5
}

/// Cache / fast-lane configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Redis URL; overridden by `CACHE_URL`
    #[serde(default = "default_cache_url")]
    pub url: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: default_cache_url(),
        }
    }
}

fn default_cache_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

/// WhatsApp gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Base HTTP URL of the gateway; overridden by `GATEWAY_BASE_URL`
    #[serde(default = "default_gateway_base_url")]
    pub base_url: String,

    /// WebSocket URL of the gateway event stream. Derived from `base_url`
    /// when absent.
    pub ws_url: Option<String>,

    /// Fallback API key; per-instance keys take precedence.
    /// Overridden by `GATEWAY_API_KEY`.
    pub api_key: Option<String>,

    /// Hard timeout for text sends, seconds
    #[serde(default = "default_text_timeout")]
    pub text_timeout_secs: u64,

    /// Hard timeout for media sends and downloads, seconds
    #[serde(default = "default_media_timeout")]
    pub media_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_gateway_base_url(),
            ws_url: None,
            api_key: None,
            text_timeout_secs: default_text_timeout(),
            media_timeout_secs: default_media_timeout(),
        }
    }
}

impl GatewayConfig {
    /// WebSocket endpoint, falling back to base_url with the scheme swapped
    pub fn websocket_url(&self) -> String {
        if let Some(ws) = &self.ws_url {
            return ws.clone();
        }
        self.base_url
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1)
    }
}

fn default_gateway_base_url() -> String {
    "http://localhost:8088".to_string()
}

fn default_text_timeout() -> u64 {
    15
}

fn default_media_timeout() -> u64 {
    120
}

/// Media and object storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Local media cache root
    #[serde(default = "default_media_path")]
    pub media_path: PathBuf,

    /// Days before locally cached attachments are swept
    #[serde(default = "default_media_cache_ttl_days")]
    pub media_cache_ttl_days: i64,

    /// Permanent object store base URL; overridden by `OBJECT_STORE_URL`
    pub object_store_url: Option<String>,

    /// Object store credentials (bearer token); overridden by
    /// `OBJECT_STORE_CREDENTIALS`
    pub object_store_credentials: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            media_path: default_media_path(),
            media_cache_ttl_days: default_media_cache_ttl_days(),
            object_store_url: None,
            object_store_credentials: None,
        }
    }
}

fn default_media_path() -> PathBuf {
    PathBuf::from("./media/chat")
}

fn default_media_cache_ttl_days() -> i64 {
    7
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API port
    #[serde(default = "default_api_port")]
    pub port: u16,

    /// CORS allowed origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_api_port(),
            cors_origins: Vec::new(),
        }
    }
}

fn default_api_port() -> u16 {
    8080
}

/// Inbound webhook authentication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Shared secret for webhook signatures; overridden by `SECRET_KEY`
    pub secret: Option<String>,

    /// CIDR allowlist for webhook callers; empty allows all
    #[serde(default)]
    pub allowed_networks: Vec<String>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: None,
            allowed_networks: Vec::new(),
        }
    }
}

/// Background worker tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Durable lane poll interval, seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Maximum concurrent durable consumers
    #[serde(default = "default_worker_concurrency")]
    pub concurrency: usize,

    /// Batch size for claiming durable jobs
    #[serde(default = "default_worker_batch")]
    pub batch_size: i64,

    /// Sweep interval for media GC and fingerprint purge, seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            concurrency: default_worker_concurrency(),
            batch_size: default_worker_batch(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_poll_interval() -> u64 {
    5
}

fn default_worker_concurrency() -> usize {
    10
}

fn default_worker_batch() -> i64 {
    50
}

fn default_sweep_interval() -> u64 {
    3600
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;

        config.apply_env();
        Ok(config)
    }

    /// Load configuration from default locations, falling back to defaults
    /// plus environment variables when no file is present.
    pub fn load() -> crate::Result<Self> {
        let paths = [
            std::path::PathBuf::from("./flowchat.toml"),
            std::path::PathBuf::from("/etc/flowchat/config.toml"),
        ];

        for path in paths {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        let mut config = Config {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            cache: CacheConfig::default(),
            gateway: GatewayConfig::default(),
            storage: StorageConfig::default(),
            api: ApiConfig::default(),
            webhook: WebhookConfig::default(),
            worker: WorkerConfig::default(),
            logging: LoggingConfig::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Environment variables override file values
    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("DATABASE_URL") {
            self.database.url = Some(v);
        }
        if let Ok(v) = std::env::var("DURABLE_QUEUE_URL") {
            self.database.durable_queue_url = Some(v);
        }
        if let Ok(v) = std::env::var("CACHE_URL") {
            self.cache.url = v;
        }
        if let Ok(v) = std::env::var("GATEWAY_BASE_URL") {
            self.gateway.base_url = v;
        }
        if let Ok(v) = std::env::var("GATEWAY_API_KEY") {
            self.gateway.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("OBJECT_STORE_URL") {
            self.storage.object_store_url = Some(v);
        }
        if let Ok(v) = std::env::var("OBJECT_STORE_CREDENTIALS") {
            self.storage.object_store_credentials = Some(v);
        }
        if let Ok(v) = std::env::var("SECRET_KEY") {
            self.webhook.secret = Some(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let server = ServerConfig::default();
        assert_eq!(server.hostname, "localhost");
        assert_eq!(server.bind_address, "0.0.0.0");

        let gateway = GatewayConfig::default();
        assert_eq!(gateway.text_timeout_secs, 15);
        assert_eq!(gateway.media_timeout_secs, 120);

        let storage = StorageConfig::default();
        assert_eq!(storage.media_cache_ttl_days, 7);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
hostname = "chat.example.com"

[database]
url = "postgres://localhost/flowchat"

[gateway]
base_url = "https://gw.example.com"
text_timeout_secs = 20

[webhook]
allowed_networks = ["10.0.0.0/8"]
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.hostname, "chat.example.com");
        assert_eq!(config.gateway.base_url, "https://gw.example.com");
        assert_eq!(config.gateway.text_timeout_secs, 20);
        assert_eq!(config.webhook.allowed_networks, vec!["10.0.0.0/8"]);
    }

    #[test]
    fn test_websocket_url_derivation() {
        let mut gateway = GatewayConfig::default();
        gateway.base_url = "https://gw.example.com".to_string();
        assert_eq!(gateway.websocket_url(), "wss://gw.example.com");

        gateway.ws_url = Some("wss://stream.example.com".to_string());
        assert_eq!(gateway.websocket_url(), "wss://stream.example.com");
    }
}
