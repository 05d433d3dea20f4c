//! Configuration types for bunkr-dl

use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};
use utoipa::ToSchema;

/// Size units used by the chunk-size bands
pub const KB: u64 = 1024;
/// One mebibyte
pub const MB: u64 = 1024 * KB;
/// One gibibyte
pub const GB: u64 = 1024 * MB;

/// Maximum filename length in bytes (extension included)
pub const MAX_FILENAME_BYTES: usize = 120;

/// Delays applied between retries while a subdomain reports maintenance
pub const MAINTENANCE_BACKOFF_DELAYS: [Duration; 3] = [
    Duration::from_secs(2 * 60),
    Duration::from_secs(5 * 60),
    Duration::from_secs(10 * 60),
];

/// Download behavior configuration (directories, concurrency, session log)
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct DownloadConfig {
    /// Download root directory (default: "Downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Default number of concurrent item downloads per job (default: 3)
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Upper bound accepted for a job's `max_workers` (default: 10)
    #[serde(default = "default_max_workers_limit")]
    pub max_workers_limit: usize,

    /// Line-oriented log of problematic URLs and outages (default: "session.log")
    #[serde(default = "default_session_log")]
    pub session_log: Option<PathBuf>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            max_workers: default_max_workers(),
            max_workers_limit: default_max_workers_limit(),
            session_log: default_session_log(),
        }
    }
}

/// Network endpoints and headers used to talk to the hosting site
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct NetworkConfig {
    /// Status page listing per-subdomain operational state
    #[serde(default = "default_status_page")]
    pub status_page: String,

    /// API endpoint returning the encrypted download payload for a slug
    #[serde(default = "default_api_endpoint")]
    pub api_endpoint: String,

    /// Referer header sent with file downloads
    #[serde(default = "default_download_referer")]
    pub download_referer: String,

    /// Domain used once after a 403 response on a page fetch
    #[serde(default = "default_fallback_domain")]
    pub fallback_domain: String,

    /// User agent for every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Timeout for page, API and status requests (default: 10 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    #[schema(value_type = u64)]
    pub request_timeout: Duration,

    /// Timeout for connecting and for each body read of a file download (default: 30 seconds)
    #[serde(default = "default_download_timeout", with = "duration_serde")]
    #[schema(value_type = u64)]
    pub download_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            status_page: default_status_page(),
            api_endpoint: default_api_endpoint(),
            download_referer: default_download_referer(),
            fallback_domain: default_fallback_domain(),
            user_agent: default_user_agent(),
            request_timeout: default_request_timeout(),
            download_timeout: default_download_timeout(),
        }
    }
}

impl NetworkConfig {
    /// Return a copy with the per-job overrides applied
    pub fn with_overrides(&self, overrides: &NetworkOverrides) -> Self {
        let mut merged = self.clone();
        if let Some(ref v) = overrides.status_page {
            merged.status_page = v.clone();
        }
        if let Some(ref v) = overrides.api_endpoint {
            merged.api_endpoint = v.clone();
        }
        if let Some(ref v) = overrides.download_referer {
            merged.download_referer = v.clone();
        }
        if let Some(ref v) = overrides.fallback_domain {
            merged.fallback_domain = v.clone();
        }
        if let Some(ref v) = overrides.user_agent {
            merged.user_agent = v.clone();
        }
        merged
    }
}

/// Optional per-job overrides for [`NetworkConfig`]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct NetworkOverrides {
    /// Status page URL override
    #[serde(default)]
    pub status_page: Option<String>,
    /// API endpoint override
    #[serde(default)]
    pub api_endpoint: Option<String>,
    /// Referer header override
    #[serde(default)]
    pub download_referer: Option<String>,
    /// Fallback domain used after 403 responses
    #[serde(default)]
    pub fallback_domain: Option<String>,
    /// Custom user agent
    #[serde(default)]
    pub user_agent: Option<String>,
}

/// Status page checking behavior
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct StatusCheckConfig {
    /// Consult the status page when a download looks like an outage (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// How long a fetched subdomain status stays fresh (default: 60 seconds)
    #[serde(default = "default_status_cache_ttl", with = "duration_serde")]
    #[schema(value_type = u64)]
    pub cache_ttl: Duration,
}

impl Default for StatusCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_ttl: default_status_cache_ttl(),
        }
    }
}

/// What to do with a file whose subdomain is under maintenance
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MaintenanceStrategy {
    /// Retry after escalating delays
    #[default]
    Backoff,
    /// Log the outage and skip the file
    Skip,
}

impl std::str::FromStr for MaintenanceStrategy {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "backoff" => Ok(Self::Backoff),
            "skip" => Ok(Self::Skip),
            other => Err(crate::error::Error::Config {
                message: format!("unknown maintenance strategy '{}'", other),
                key: Some("maintenance_strategy".to_string()),
            }),
        }
    }
}

/// Maintenance handling configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct MaintenanceConfig {
    /// Default strategy for jobs that do not set one (default: backoff)
    #[serde(default)]
    pub strategy: MaintenanceStrategy,

    /// Delays between maintenance retries (default: 2, 5 and 10 minutes)
    #[serde(default = "default_maintenance_delays", with = "duration_vec_serde")]
    #[schema(value_type = Vec<u64>)]
    pub backoff_delays: Vec<Duration>,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            strategy: MaintenanceStrategy::default(),
            backoff_delays: default_maintenance_delays(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct RetryConfig {
    /// Maximum number of inline retries for one attempt (default: 2)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 3 seconds)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    #[schema(value_type = u64)]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    #[schema(value_type = u64)]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 3.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Disk space checking configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct DiskSpaceConfig {
    /// Enable disk space checking (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Minimum free space required before a job starts (default: 2 GB)
    #[serde(default = "default_min_free_space")]
    pub min_free_space: u64,
}

impl Default for DiskSpaceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_free_space: default_min_free_space(),
        }
    }
}

/// Event log retention
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct BrokerConfig {
    /// How long a finished job's events stay available for replay (default: 10 minutes)
    #[serde(default = "default_grace_period", with = "duration_serde")]
    #[schema(value_type = u64)]
    pub grace_period: Duration,

    /// How often expired job logs are collected (default: 60 seconds)
    #[serde(default = "default_reap_interval", with = "duration_serde")]
    #[schema(value_type = u64)]
    pub reap_interval: Duration,

    /// Capacity of each job's live broadcast channel (default: 1024)
    #[serde(default = "default_live_capacity")]
    pub live_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            grace_period: default_grace_period(),
            reap_interval: default_reap_interval(),
            live_capacity: default_live_capacity(),
        }
    }
}

/// REST API configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiConfig {
    /// Address to bind to (default: 127.0.0.1:8000)
    #[serde(default = "default_bind_address")]
    #[schema(value_type = String)]
    pub bind_address: SocketAddr,

    /// Enable CORS for browser access (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Enable Swagger UI at /swagger-ui (default: true)
    #[serde(default = "default_true")]
    pub swagger_ui: bool,

    /// Directory listings never leave this root when set
    #[serde(default)]
    pub browse_root: Option<PathBuf>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            cors_enabled: true,
            cors_origins: default_cors_origins(),
            swagger_ui: true,
            browse_root: None,
        }
    }
}

/// Main configuration for [`BunkrDownloader`](crate::BunkrDownloader)
///
/// Every field has a default so `Config::default()` works out of the box.
/// Per-job settings in [`JobRequest`](crate::types::JobRequest) override the
/// matching defaults here.
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct Config {
    /// Directories, concurrency and session log
    #[serde(default)]
    pub download: DownloadConfig,

    /// Site endpoints, headers and timeouts
    #[serde(default)]
    pub network: NetworkConfig,

    /// Status page checks
    #[serde(default)]
    pub status: StatusCheckConfig,

    /// Transient failure backoff
    #[serde(default)]
    pub retry: RetryConfig,

    /// Maintenance handling
    #[serde(default)]
    pub maintenance: MaintenanceConfig,

    /// Disk space pre-flight check
    #[serde(default)]
    pub disk_space: DiskSpaceConfig,

    /// Event log retention
    #[serde(default)]
    pub broker: BrokerConfig,

    /// REST API server
    #[serde(default)]
    pub api: ApiConfig,
}

impl Config {
    /// Check values that serde cannot validate on its own
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.download.max_workers == 0 {
            return Err(crate::error::Error::Config {
                message: "max_workers must be at least 1".to_string(),
                key: Some("max_workers".to_string()),
            });
        }
        if self.download.max_workers_limit < self.download.max_workers {
            return Err(crate::error::Error::Config {
                message: "max_workers_limit must not be below max_workers".to_string(),
                key: Some("max_workers_limit".to_string()),
            });
        }
        if self.broker.reap_interval.is_zero() {
            return Err(crate::error::Error::Config {
                message: "reap_interval must be greater than zero".to_string(),
                key: Some("reap_interval".to_string()),
            });
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(crate::error::Error::Config {
                message: "backoff_multiplier must be >= 1.0".to_string(),
                key: Some("backoff_multiplier".to_string()),
            });
        }
        Ok(())
    }
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("Downloads")
}

fn default_max_workers() -> usize {
    3
}

fn default_max_workers_limit() -> usize {
    10
}

fn default_session_log() -> Option<PathBuf> {
    Some(PathBuf::from("session.log"))
}

fn default_status_page() -> String {
    "https://status.bunkr.ru/".to_string()
}

fn default_api_endpoint() -> String {
    "https://bunkr.cr/api/vs".to_string()
}

fn default_download_referer() -> String {
    "https://get.bunkrr.su/".to_string()
}

fn default_fallback_domain() -> String {
    "bunkr.cr".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:136.0) Gecko/20100101 Firefox/136.0".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_download_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_status_cache_ttl() -> Duration {
    Duration::from_secs(60)
}

fn default_maintenance_delays() -> Vec<Duration> {
    MAINTENANCE_BACKOFF_DELAYS.to_vec()
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    2
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(3)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    3.0
}

fn default_min_free_space() -> u64 {
    2 * GB
}

fn default_grace_period() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_reap_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_live_capacity() -> usize {
    1024
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8000))
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".into()]
}

// Duration serialization helper
pub(crate) mod duration_serde {
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

// Vec<Duration> serialization helper (seconds)
mod duration_vec_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(durations: &[Duration], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let secs: Vec<u64> = durations.iter().map(Duration::as_secs).collect();
        secs.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Vec::<u64>::deserialize(deserializer)?;
        Ok(secs.into_iter().map(Duration::from_secs).collect())
    }
}
