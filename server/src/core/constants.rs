// =============================================================================
// Environment Variables
// =============================================================================

/// Environment variable for server host
pub const ENV_HOST: &str = "PARLEY_HOST";

/// Environment variable for server port
pub const ENV_PORT: &str = "PARLEY_PORT";

/// Environment variable for log level/filter
pub const ENV_LOG: &str = "PARLEY_LOG";

/// Environment variable for cache backend selection (`memory` or `redis`)
pub const ENV_CACHE_BACKEND: &str = "PARLEY_CACHE_BACKEND";

/// Environment variable for Redis URL
pub const ENV_REDIS_URL: &str = "PARLEY_REDIS_URL";

/// Environment variable for message store backend selection (`memory` or `postgres`)
pub const ENV_STORE_BACKEND: &str = "PARLEY_STORE_BACKEND";

/// Environment variable for PostgreSQL URL
pub const ENV_POSTGRES_URL: &str = "PARLEY_POSTGRES_URL";

/// Environment variable for archive backend selection (`memory` or `kafka`)
pub const ENV_ARCHIVE_BACKEND: &str = "PARLEY_ARCHIVE_BACKEND";

/// Environment variable for Kafka bootstrap brokers
pub const ENV_KAFKA_BROKERS: &str = "PARLEY_KAFKA_BROKERS";

/// Environment variable for the archive topic name
pub const ENV_ARCHIVE_TOPIC: &str = "PARLEY_ARCHIVE_TOPIC";

// =============================================================================
// Server Defaults
// =============================================================================

/// Default server host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default server port
pub const DEFAULT_PORT: u16 = 5460;

/// Graceful shutdown timeout for background tasks in seconds
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// Cache Keys & Pub/Sub Channels
//
// Key layout is shared with cooperating services; treat as a wire format.
// =============================================================================

/// Prefix for direct conversation sorted sets: `chat:conv:<u1>:<u2>`
pub const KEY_PREFIX_CONVERSATION: &str = "chat:conv:";

/// Prefix for group conversation sorted sets: `chat:group:<gid>:messages`
pub const KEY_PREFIX_GROUP: &str = "chat:group:";

/// Suffix for group conversation sorted sets
pub const KEY_SUFFIX_GROUP_MESSAGES: &str = ":messages";

/// Prefix for unread-counter hashes: `chat:unread:<user>`
pub const KEY_PREFIX_UNREAD: &str = "chat:unread:";

/// Prefix for session hashes: `session:<id>`
pub const KEY_PREFIX_SESSION: &str = "session:";

/// Overflow/retry queue list
pub const KEY_PENDING_MESSAGES: &str = "chat:pending_messages";

/// In-flight reliable-queue claims list
pub const KEY_PROCESSING_MESSAGES: &str = "chat:processing_messages";

/// Pub/sub channel carrying every ingested message once
pub const CHANNEL_CHAT_MESSAGES: &str = "chat:messages";

/// Pub/sub channel for cross-process WebSocket fan-out
pub const CHANNEL_WS_BROADCAST: &str = "ws:broadcast:global";

// =============================================================================
// Message Pipeline
// =============================================================================

/// Maximum message content size in bytes
pub const MAX_CONTENT_BYTES: usize = 4096;

/// Messages kept per conversation in the cache sorted set
pub const CONVERSATION_CACHE_MAX: usize = 100;

/// TTL for conversation sorted sets in seconds (24 h)
pub const CONVERSATION_CACHE_TTL_SECS: u64 = 24 * 60 * 60;

/// Capacity of the in-memory ingest-to-archive buffer
pub const INGEST_BUFFER_CAPACITY: usize = 1000;

/// Batch writer flushes after accumulating this many messages
pub const BATCH_FLUSH_SIZE: usize = 100;

/// Batch writer flushes after this interval even when the batch is short
pub const BATCH_FLUSH_INTERVAL_MS: u64 = 100;

/// Reliable-queue worker poll interval
pub const QUEUE_POLL_INTERVAL_MS: u64 = 1000;

/// Archive write retry attempts (per message)
pub const ARCHIVE_RETRY_ATTEMPTS: u32 = 3;

/// Base delay for archive write retries in milliseconds (doubled per attempt)
pub const ARCHIVE_RETRY_BASE_DELAY_MS: u64 = 5000;

/// History page size for store fallback queries
pub const HISTORY_PAGE_SIZE: usize = 100;

// =============================================================================
// Archive Log (Kafka)
// =============================================================================

/// Default archive topic
pub const DEFAULT_ARCHIVE_TOPIC: &str = "chat-history";

/// Default Kafka bootstrap brokers
pub const DEFAULT_KAFKA_BROKERS: &str = "localhost:9092";

/// Producer-side per-message retries
pub const KAFKA_PRODUCER_RETRIES: u32 = 3;

// =============================================================================
// Fan-out Layer (WebSocket)
// =============================================================================

/// Per-client send buffer capacity
pub const CLIENT_SEND_BUFFER: usize = 256;

/// Read deadline refreshed on every inbound frame
pub const WS_READ_TIMEOUT_SECS: u64 = 60;

/// Write deadline for a single outbound frame
pub const WS_WRITE_TIMEOUT_SECS: u64 = 10;

/// Ping interval (per-client writer and manager global tick)
pub const WS_PING_INTERVAL_SECS: u64 = 30;

/// Manager command channel capacity
pub const MANAGER_QUEUE_CAPACITY: usize = 1024;

// =============================================================================
// Sessions
// =============================================================================

/// Session TTL in seconds (24 h)
pub const SESSION_TTL_SECS: u64 = 24 * 60 * 60;

/// Minimum interval between `last_activity` writes
pub const SESSION_UPDATE_THRESHOLD_SECS: i64 = 60;

// =============================================================================
// Circuit Breakers
// =============================================================================

/// Consecutive half-open successes required to close a breaker
pub const BREAKER_HALF_OPEN_MAX_REQUESTS: u32 = 3;

/// Rolling observation window for closed-state counts in seconds
pub const BREAKER_WINDOW_SECS: u64 = 60;
