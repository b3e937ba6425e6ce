//! Configuration types for order-dl

use crate::error::{Error, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::Path, path::PathBuf, time::Duration};

/// Prefix for environment overrides (`ORDER_DL_ARCHIVE__MAX_ZIP_SIZE=...`)
pub const ENV_PREFIX: &str = "ORDER_DL_";

/// Main configuration for the order service
///
/// Every knob the pipeline needs is passed down from here into constructors;
/// no component reads the environment on its own.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Root directory holding `<tenant-id>/<order-number>/` trees (default: "./data")
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Archive building
    #[serde(default)]
    pub archive: ArchiveConfig,

    /// Source fetching
    #[serde(default)]
    pub network: NetworkConfig,

    /// Order lock behaviour
    #[serde(default)]
    pub lock: LockConfig,

    /// Completion callback
    #[serde(default)]
    pub callback: CallbackConfig,

    /// Download-link tokens
    #[serde(default)]
    pub tokens: TokenConfig,

    /// REST API
    #[serde(default)]
    pub api: ApiConfig,

    /// Fulfillment worker pool
    #[serde(default)]
    pub workers: WorkerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            archive: ArchiveConfig::default(),
            network: NetworkConfig::default(),
            lock: LockConfig::default(),
            callback: CallbackConfig::default(),
            tokens: TokenConfig::default(),
            api: ApiConfig::default(),
            workers: WorkerConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration: defaults, then an optional TOML file, then `ORDER_DL_*` env vars
    ///
    /// Nested keys use a double underscore, e.g. `ORDER_DL_NETWORK__RETRY__MAX_ATTEMPTS=3`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));

        if let Some(path) = path {
            if !path.exists() {
                return Err(Error::Config {
                    message: format!("config file {} not found", path.display()),
                    key: None,
                });
            }
            figment = figment.merge(Toml::file(path));
        }

        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| Error::Config {
                message: e.to_string(),
                key: e.path.last().cloned(),
            })
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.archive.max_zip_size == 0 {
            return Err(Error::Config {
                message: "max_zip_size must be greater than zero".to_string(),
                key: Some("archive.max_zip_size".to_string()),
            });
        }
        if self.workers.max_concurrent_jobs == 0 {
            return Err(Error::Config {
                message: "at least one worker is required".to_string(),
                key: Some("workers.max_concurrent_jobs".to_string()),
            });
        }
        if self.api.public_url.trim().is_empty() {
            return Err(Error::Config {
                message: "public_url must not be empty".to_string(),
                key: Some("api.public_url".to_string()),
            });
        }
        Ok(())
    }

    /// Key file used by the token service
    pub fn key_file(&self) -> PathBuf {
        self.tokens
            .key_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join(".order_secrets.key"))
    }
}

/// Archive building configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Maximum size of one output chunk in bytes (default: 4 GiB - 1)
    ///
    /// Chunks that hold a single file larger than this are the only ones
    /// allowed to exceed it.
    #[serde(default = "default_max_zip_size")]
    pub max_zip_size: u64,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            max_zip_size: default_max_zip_size(),
        }
    }
}

/// Source fetching configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Connect and per-read timeout (default: 120 seconds)
    #[serde(default = "default_network_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Retry policy shared by downloads and callback delivery
    #[serde(default)]
    pub retry: RetryConfig,

    /// User-Agent presented to HTTP sources
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Accept invalid TLS certificates from sources (default: true)
    ///
    /// Source hosts are heterogeneous and many serve broken chains; turning
    /// this off makes those downloads fail as unreachable.
    #[serde(default = "default_true")]
    pub accept_invalid_certs: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout: default_network_timeout(),
            retry: RetryConfig::default(),
            user_agent: default_user_agent(),
            accept_invalid_certs: true,
        }
    }
}

/// Retry configuration for transient failures
///
/// Defaults give a fixed delay: five retries, five minutes apart.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (default: 300 seconds)
    #[serde(default = "default_retry_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 300 seconds)
    #[serde(default = "default_retry_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier applied to the delay after each retry (default: 1.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_retry_delay(),
            max_delay: default_retry_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
        }
    }
}

/// Order lock configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LockConfig {
    /// Delay between checks of a held lock marker, in milliseconds (default: 1000)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Break markers older than this (default: never)
    #[serde(default, with = "optional_duration_serde")]
    pub stale_after: Option<Duration>,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            stale_after: None,
        }
    }
}

impl LockConfig {
    /// Poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Completion callback configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CallbackConfig {
    /// URL the run report is POSTed to (None = no callback)
    #[serde(default)]
    pub url: Option<String>,

    /// Optional authentication header value
    #[serde(default)]
    pub auth_header: Option<String>,

    /// Timeout for one callback request (default: 30 seconds)
    #[serde(default = "default_callback_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            url: None,
            auth_header: None,
            timeout: default_callback_timeout(),
        }
    }
}

/// Download-link token configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TokenConfig {
    /// File holding the 32-byte token key (default: `<data_dir>/.order_secrets.key`)
    #[serde(default)]
    pub key_file: Option<PathBuf>,
}

/// REST API configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Address to bind to (default: 127.0.0.1:8080)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Base URL prepended to minted download links (default: "http://localhost:8080")
    #[serde(default = "default_public_url")]
    pub public_url: String,

    /// Optional API key for the management routes
    #[serde(default)]
    pub api_key: Option<String>,

    /// Enable CORS for browser access (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            public_url: default_public_url(),
            api_key: None,
            cors_enabled: true,
            cors_origins: default_cors_origins(),
        }
    }
}

/// Fulfillment worker pool configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Maximum fulfillment runs executing at once (default: 4)
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// How long finished task statuses stay queryable (default: 1 hour)
    #[serde(default = "default_status_retention", with = "duration_serde")]
    pub status_retention: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            status_retention: default_status_retention(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_max_zip_size() -> u64 {
    u32::MAX as u64
}

fn default_network_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36"
        .to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    5
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(300)
}

fn default_backoff_multiplier() -> f64 {
    1.0
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_callback_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_public_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".into()]
}

fn default_max_concurrent_jobs() -> usize {
    4
}

fn default_status_retention() -> Duration {
    Duration::from_secs(3600)
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Optional Duration serialization helper
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
