// Constants module - centralized default values for configuration
//
// Every configurable default used by the request core lives here so the
// config structs and the runtime components agree on the same numbers.

// =============================================================================
// API defaults
// =============================================================================

/// Default base URL for relative request paths
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080";

/// Default per-attempt request timeout in milliseconds
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

// =============================================================================
// Cache defaults
// =============================================================================

/// Default response cache TTL in seconds
pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 300;

/// Default maximum number of cached responses
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 1000;

// =============================================================================
// Circuit breaker defaults
// =============================================================================

/// Default number of consecutive failures before circuit opens
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default number of half-open successes needed to close circuit
pub const DEFAULT_SUCCESS_THRESHOLD: u32 = 1;

/// Default time an open circuit waits before admitting a trial request
pub const DEFAULT_RESET_TIMEOUT_SECS: u64 = 60;

/// Default maximum concurrent trial requests in half-open state
pub const DEFAULT_HALF_OPEN_MAX_REQUESTS: u32 = 1;

/// Default maximum number of endpoints tracked by the breaker registry
pub const DEFAULT_MAX_TRACKED_ENDPOINTS: u64 = 1024;

// =============================================================================
// Retry defaults
// =============================================================================

/// Default maximum attempts (including the initial attempt)
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default initial backoff in milliseconds
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 1000;

/// Default maximum backoff in milliseconds
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Default multiplicative factor for exponential backoff
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;

// =============================================================================
// Offline queue defaults
// =============================================================================

/// Default store key holding the persisted offline queue
pub const DEFAULT_QUEUE_PERSISTENCE_KEY: &str = "offline_queue";

/// Default number of queue-level retries after the first attempt
pub const DEFAULT_QUEUE_MAX_RETRIES: u32 = 3;

/// Default directory for the file-backed store used by the CLI
pub const DEFAULT_STORAGE_DIR: &str = ".kawaraban";

/// Version tag written into the persisted queue document
pub const QUEUE_FORMAT_VERSION: u32 = 1;

// =============================================================================
// Logging defaults
// =============================================================================

/// Default log level filter
pub const DEFAULT_LOG_LEVEL: &str = "info";
