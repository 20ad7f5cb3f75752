use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::cli::CliConfig;
use super::constants::{
    ARCHIVE_RETRY_ATTEMPTS, ARCHIVE_RETRY_BASE_DELAY_MS, BATCH_FLUSH_INTERVAL_MS,
    BATCH_FLUSH_SIZE, DEFAULT_ARCHIVE_TOPIC, DEFAULT_HOST, DEFAULT_KAFKA_BROKERS, DEFAULT_PORT,
    ENV_ARCHIVE_BACKEND, ENV_ARCHIVE_TOPIC, ENV_CACHE_BACKEND, ENV_HOST, ENV_KAFKA_BROKERS,
    ENV_PORT, ENV_POSTGRES_URL, ENV_REDIS_URL, ENV_STORE_BACKEND, INGEST_BUFFER_CAPACITY,
    QUEUE_POLL_INTERVAL_MS, SESSION_TTL_SECS, SESSION_UPDATE_THRESHOLD_SECS,
};

// =============================================================================
// Cache Backend Enum
// =============================================================================

/// Cache + pub/sub backend type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendType {
    #[default]
    Memory,
    Redis,
}

impl fmt::Display for CacheBackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheBackendType::Memory => write!(f, "memory"),
            CacheBackendType::Redis => write!(f, "redis"),
        }
    }
}

// =============================================================================
// Store Backend Enum
// =============================================================================

/// Durable message store backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackendType {
    #[default]
    Memory,
    Postgres,
}

impl fmt::Display for StoreBackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreBackendType::Memory => write!(f, "memory"),
            StoreBackendType::Postgres => write!(f, "postgres"),
        }
    }
}

// =============================================================================
// Archive Backend Enum
// =============================================================================

/// Append-only archive log backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveBackendType {
    #[default]
    Memory,
    Kafka,
}

impl fmt::Display for ArchiveBackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveBackendType::Memory => write!(f, "memory"),
            ArchiveBackendType::Kafka => write!(f, "kafka"),
        }
    }
}

// =============================================================================
// Config Sections
// =============================================================================

/// HTTP/WS server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// Cache + pub/sub configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CacheConfig {
    pub backend: CacheBackendType,
    pub redis_url: Option<String>,
}

/// Durable store configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StoreConfig {
    pub backend: StoreBackendType,
    pub postgres_url: Option<String>,
}

/// Archive log configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArchiveConfig {
    pub backend: ArchiveBackendType,
    pub brokers: String,
    pub topic: String,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            backend: ArchiveBackendType::default(),
            brokers: DEFAULT_KAFKA_BROKERS.to_string(),
            topic: DEFAULT_ARCHIVE_TOPIC.to_string(),
        }
    }
}

/// Message pipeline tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Capacity of the in-memory ingest-to-archive buffer
    pub buffer_capacity: usize,
    /// Batch writer flush threshold
    pub batch_flush_size: usize,
    /// Batch writer flush interval in milliseconds
    pub batch_flush_interval_ms: u64,
    /// Reliable-queue worker poll interval in milliseconds
    pub queue_poll_interval_ms: u64,
    /// Archive write retry attempts
    pub archive_retry_attempts: u32,
    /// Base delay for archive retries in milliseconds
    pub archive_retry_base_delay_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: INGEST_BUFFER_CAPACITY,
            batch_flush_size: BATCH_FLUSH_SIZE,
            batch_flush_interval_ms: BATCH_FLUSH_INTERVAL_MS,
            queue_poll_interval_ms: QUEUE_POLL_INTERVAL_MS,
            archive_retry_attempts: ARCHIVE_RETRY_ATTEMPTS,
            archive_retry_base_delay_ms: ARCHIVE_RETRY_BASE_DELAY_MS,
        }
    }
}

impl PipelineConfig {
    pub fn batch_flush_interval(&self) -> Duration {
        Duration::from_millis(self.batch_flush_interval_ms)
    }

    pub fn queue_poll_interval(&self) -> Duration {
        Duration::from_millis(self.queue_poll_interval_ms)
    }
}

/// Session tier configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Session TTL in seconds
    pub ttl_secs: u64,
    /// Minimum interval between `last_activity` writes in seconds
    pub update_threshold_secs: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: SESSION_TTL_SECS,
            update_threshold_secs: SESSION_UPDATE_THRESHOLD_SECS,
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

// =============================================================================
// AppConfig
// =============================================================================

/// Application configuration, resolved env-first with CLI overrides
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub store: StoreConfig,
    pub archive: ArchiveConfig,
    pub pipeline: PipelineConfig,
    pub session: SessionConfig,
}

impl AppConfig {
    /// Resolve configuration from environment variables and CLI flags.
    ///
    /// Precedence: CLI flag > environment variable > default.
    pub fn load(cli: &CliConfig) -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(host) = cli.host.clone().or_else(|| env_string(ENV_HOST)) {
            config.server.host = host;
        }
        if let Some(port) = cli.port.or_else(|| env_parse(ENV_PORT)) {
            config.server.port = port;
        }

        if let Some(backend) = cli
            .cache_backend
            .or_else(|| env_backend(ENV_CACHE_BACKEND, parse_cache_backend))
        {
            config.cache.backend = backend;
        }
        config.cache.redis_url = cli.redis_url.clone().or_else(|| env_string(ENV_REDIS_URL));

        if let Some(backend) = cli
            .store_backend
            .or_else(|| env_backend(ENV_STORE_BACKEND, parse_store_backend))
        {
            config.store.backend = backend;
        }
        config.store.postgres_url = cli
            .postgres_url
            .clone()
            .or_else(|| env_string(ENV_POSTGRES_URL));

        if let Some(backend) = cli
            .archive_backend
            .or_else(|| env_backend(ENV_ARCHIVE_BACKEND, parse_archive_backend))
        {
            config.archive.backend = backend;
        }
        if let Some(brokers) = cli
            .kafka_brokers
            .clone()
            .or_else(|| env_string(ENV_KAFKA_BROKERS))
        {
            config.archive.brokers = brokers;
        }
        if let Some(topic) = env_string(ENV_ARCHIVE_TOPIC) {
            config.archive.topic = topic;
        }

        // A production backend without its URL is a config error, not a
        // runtime surprise.
        if config.cache.backend == CacheBackendType::Redis && config.cache.redis_url.is_none() {
            anyhow::bail!("redis cache backend selected but {ENV_REDIS_URL} is not set");
        }
        if config.store.backend == StoreBackendType::Postgres && config.store.postgres_url.is_none()
        {
            anyhow::bail!("postgres store backend selected but {ENV_POSTGRES_URL} is not set");
        }

        Ok(config)
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_backend<T>(name: &str, parse: fn(&str) -> Option<T>) -> Option<T> {
    std::env::var(name).ok().and_then(|v| parse(&v))
}

pub(crate) fn parse_cache_backend(value: &str) -> Option<CacheBackendType> {
    match value.to_ascii_lowercase().as_str() {
        "memory" => Some(CacheBackendType::Memory),
        "redis" => Some(CacheBackendType::Redis),
        _ => None,
    }
}

pub(crate) fn parse_store_backend(value: &str) -> Option<StoreBackendType> {
    match value.to_ascii_lowercase().as_str() {
        "memory" => Some(StoreBackendType::Memory),
        "postgres" => Some(StoreBackendType::Postgres),
        _ => None,
    }
}

pub(crate) fn parse_archive_backend(value: &str) -> Option<ArchiveBackendType> {
    match value.to_ascii_lowercase().as_str() {
        "memory" => Some(ArchiveBackendType::Memory),
        "kafka" => Some(ArchiveBackendType::Kafka),
        _ => None,
    }
}
