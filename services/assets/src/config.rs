use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the asset service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// HTTP API configuration
    #[serde(default)]
    pub api: ApiConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Object store configuration
    #[serde(default)]
    pub s3: S3Config,
    /// Upload policy configuration
    #[serde(default)]
    pub upload: UploadConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// The single origin allowed to call the API from a browser
    #[serde(default = "default_allowed_origin")]
    pub allowed_origin: String,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

impl DatabaseConfig {
    /// Pool acquire timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Idle connection timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// S3 configuration
///
/// Without both credential fields the service starts in metadata-only mode:
/// listing and retrieval work, everything that needs a signed URL or an
/// existence check fails with an internal error.
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Bucket holding asset bytes
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Static access key
    pub access_key_id: Option<String>,
    /// Static secret key
    pub secret_access_key: Option<String>,
    /// Lifetime of upload (PUT) URLs in seconds
    #[serde(default = "default_presign_ttl_secs")]
    pub presign_put_ttl_secs: u64,
    /// Lifetime of view (GET) URLs in seconds, also the ceiling for caller-supplied TTLs
    #[serde(default = "default_presign_ttl_secs")]
    pub presign_get_ttl_secs: u64,
}

/// Upload policy configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Largest declared file size accepted, in bytes
    #[serde(default = "default_max_file_size_bytes")]
    pub max_file_size_bytes: i64,
    /// MIME types clients may declare
    #[serde(default = "default_allowed_content_types")]
    pub allowed_content_types: Vec<String>,
    /// Maximum number of ids in one view-url batch
    #[serde(default = "default_max_view_batch")]
    pub max_view_batch: usize,
}

// Default value functions
fn default_service_name() -> String {
    "asset-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_allowed_origin() -> String {
    "http://localhost:5173".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

fn default_bucket() -> String {
    "app-images".to_string()
}

fn default_region() -> String {
    "ap-northeast-1".to_string()
}

fn default_presign_ttl_secs() -> u64 {
    300
}

fn default_max_file_size_bytes() -> i64 {
    50 * 1024 * 1024 // 50MiB
}

fn default_allowed_content_types() -> Vec<String> {
    ["image/jpeg", "image/png", "image/webp", "image/heic"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_max_view_batch() -> usize {
    100
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .set_default("service.name", "asset-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            .add_source(config::File::with_name("config/assets").required(false))
            .add_source(config::File::with_name("/etc/assets/assets").required(false))
            // ASSETS__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("ASSETS")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("upload.allowed_content_types")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Get upload URL lifetime as Duration
    pub fn presign_put_ttl(&self) -> Duration {
        Duration::from_secs(self.s3.presign_put_ttl_secs)
    }

    /// Get view URL lifetime as Duration
    pub fn presign_get_ttl(&self) -> Duration {
        Duration::from_secs(self.s3.presign_get_ttl_secs)
    }
}

impl S3Config {
    /// Static credentials, present only when both halves are configured and non-empty
    pub fn static_credentials(&self) -> Option<(&str, &str)> {
        match (self.access_key_id.as_deref(), self.secret_access_key.as_deref()) {
            (Some(key), Some(secret)) if !key.is_empty() && !secret.is_empty() => {
                Some((key, secret))
            }
            _ => None,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            allowed_origin: default_allowed_origin(),
        }
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
            access_key_id: None,
            secret_access_key: None,
            presign_put_ttl_secs: default_presign_ttl_secs(),
            presign_get_ttl_secs: default_presign_ttl_secs(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: default_max_file_size_bytes(),
            allowed_content_types: default_allowed_content_types(),
            max_view_batch: default_max_view_batch(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        assert_eq!(default_presign_ttl_secs(), 300);
        assert_eq!(default_max_file_size_bytes(), 52_428_800);
        assert_eq!(default_max_view_batch(), 100);
        assert_eq!(
            default_allowed_content_types(),
            vec!["image/jpeg", "image/png", "image/webp", "image/heic"]
        );
    }

    #[test]
    fn test_static_credentials_require_both_halves() {
        let mut s3 = S3Config::default();
        assert!(s3.static_credentials().is_none());

        s3.access_key_id = Some("AKIA".to_string());
        assert!(s3.static_credentials().is_none());

        s3.secret_access_key = Some(String::new());
        assert!(s3.static_credentials().is_none());

        s3.secret_access_key = Some("secret".to_string());
        assert_eq!(s3.static_credentials(), Some(("AKIA", "secret")));
    }

    #[test]
    fn test_database_timeouts_from_defaults() {
        let db: DatabaseConfig = serde_json::from_value(serde_json::json!({
            "url": "postgres://localhost/assets",
            "connect_timeout_secs": 5
        }))
        .unwrap();

        assert_eq!(db.connect_timeout(), Duration::from_secs(5));
        assert_eq!(
            db.idle_timeout(),
            Duration::from_secs(default_idle_timeout_secs())
        );
        assert!(db.run_migrations);
    }
}
