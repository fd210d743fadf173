/// Application name
pub const APP_NAME: &str = "Ephemera";

/// Sender id recorded when the caller supplies none
pub const ANONYMOUS_SENDER: &str = "anonymous";

/// Maximum message body length in characters
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 500;

/// Messages retained per channel buffer
pub const DEFAULT_CHANNEL_CAPACITY: usize = 150;

/// Messages returned by a fetch that names no limit
pub const DEFAULT_FETCH_LIMIT: usize = 50;

/// Hard upper bound on messages returned by one fetch
pub const FETCH_LIMIT_CEILING: usize = 100;

/// Local channels untouched for this long are reclaimed (60 minutes)
pub const DEFAULT_LOCAL_IDLE_SECS: u64 = 60 * 60;

/// Reclaimer sweep period (10 minutes)
pub const DEFAULT_RECLAIM_INTERVAL_SECS: u64 = 10 * 60;

/// Default HTTP API port
pub const DEFAULT_HTTP_PORT: u16 = 3000;

/// Key derivation context for rate-limit keys (BLAKE3)
pub const KDF_CONTEXT_RATE_KEY: &str = "ephemera-rate-limit-key-v1";

/// Random bytes appended to the creation time in a message id
pub const MESSAGE_ID_RANDOM_BYTES: usize = 8;
