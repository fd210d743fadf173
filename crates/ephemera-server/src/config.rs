//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use ephemera_shared::constants::{
    DEFAULT_CHANNEL_CAPACITY, DEFAULT_FETCH_LIMIT, DEFAULT_HTTP_PORT, DEFAULT_LOCAL_IDLE_SECS,
    DEFAULT_MAX_MESSAGE_LENGTH, DEFAULT_RECLAIM_INTERVAL_SECS, FETCH_LIMIT_CEILING,
};
use ephemera_shared::ChannelClass;

/// Salt used when `RATE_LIMIT_SALT` is unset. Development only.
pub const DEV_RATE_LIMIT_SALT: &str = "ephemera-dev-salt-change-me";

/// Budget for one rate limiter instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateBudget {
    pub window: Duration,
    pub max_requests: u32,
}

impl RateBudget {
    pub const fn new(window_secs: u64, max_requests: u32) -> Self {
        Self {
            window: Duration::from_secs(window_secs),
            max_requests,
        }
    }
}

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP API.
    /// Env: `HTTP_ADDR` (or `PORT`, binding all interfaces)
    /// Default: `0.0.0.0:3000`
    pub http_addr: SocketAddr,

    /// Secret mixed into every redacted rate-limit key.
    /// Env: `RATE_LIMIT_SALT`
    /// Default: a fixed development salt.
    pub rate_limit_salt: String,

    /// Whether a single reverse proxy sits in front of the relay. When set,
    /// the hop that proxy appended to `X-Forwarded-For` (the right-most one)
    /// names the caller instead of the socket peer.
    /// Env: `TRUST_PROXY` (true/false)
    /// Default: `false`
    pub trust_proxy: bool,

    /// Maximum message body length in characters.
    /// Env: `MAX_MESSAGE_LENGTH`
    pub max_message_length: usize,

    /// Messages retained per channel.
    /// Env: `CHANNEL_CAPACITY`
    pub channel_capacity: usize,

    /// Hard ceiling on messages returned by one fetch.
    /// Env: `FETCH_LIMIT_CEILING`
    pub fetch_limit_ceiling: usize,

    /// Messages returned when a fetch names no limit.
    /// Env: `DEFAULT_FETCH_LIMIT`
    pub default_fetch_limit: usize,

    /// Escape `<` and `>` in message bodies.
    /// Env: `SANITIZE_HTML` (true/false)
    /// Default: `true`
    pub sanitize_html: bool,

    /// Channel class used when a request omits one.
    /// Env: `DEFAULT_CHANNEL_CLASS` (global/local)
    /// Default: `global`
    pub default_channel_class: ChannelClass,

    /// Local channels idle for longer than this are reclaimed.
    /// Env: `LOCAL_IDLE_TIMEOUT_SECS`
    pub local_idle_timeout: Duration,

    /// Reclaimer sweep period.
    /// Env: `RECLAIM_INTERVAL_SECS`
    pub reclaim_interval: Duration,

    /// Env: `GENERAL_RATE_WINDOW_SECS`, `GENERAL_RATE_MAX`
    pub general_budget: RateBudget,

    /// Env: `SESSION_RATE_WINDOW_SECS`, `SESSION_RATE_MAX`
    pub session_budget: RateBudget,

    /// Env: `SEND_RATE_WINDOW_SECS`, `SEND_RATE_MAX`
    pub send_budget: RateBudget,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            rate_limit_salt: DEV_RATE_LIMIT_SALT.to_string(),
            trust_proxy: false,
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            fetch_limit_ceiling: FETCH_LIMIT_CEILING,
            default_fetch_limit: DEFAULT_FETCH_LIMIT,
            sanitize_html: true,
            default_channel_class: ChannelClass::Global,
            local_idle_timeout: Duration::from_secs(DEFAULT_LOCAL_IDLE_SECS),
            reclaim_interval: Duration::from_secs(DEFAULT_RECLAIM_INTERVAL_SECS),
            general_budget: RateBudget::new(15 * 60, 100),
            session_budget: RateBudget::new(60, 5),
            send_budget: RateBudget::new(60, 10),
        }
    }
}

// Hand-written so the salt never lands in a log line.
impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("rate_limit_salt", &"<redacted>")
            .field("trust_proxy", &self.trust_proxy)
            .field("max_message_length", &self.max_message_length)
            .field("channel_capacity", &self.channel_capacity)
            .field("fetch_limit_ceiling", &self.fetch_limit_ceiling)
            .field("default_fetch_limit", &self.default_fetch_limit)
            .field("sanitize_html", &self.sanitize_html)
            .field("default_channel_class", &self.default_channel_class)
            .field("local_idle_timeout", &self.local_idle_timeout)
            .field("reclaim_interval", &self.reclaim_interval)
            .field("general_budget", &self.general_budget)
            .field("session_budget", &self.session_budget)
            .field("send_budget", &self.send_budget)
            .finish()
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(port) = lookup("PORT") {
            match port.trim().parse::<u16>() {
                Ok(port) => config.http_addr.set_port(port),
                Err(_) => tracing::warn!(value = %port, "Invalid PORT, using default"),
            }
        }

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        match lookup("RATE_LIMIT_SALT") {
            Some(salt) if !salt.is_empty() => config.rate_limit_salt = salt,
            _ => tracing::warn!("RATE_LIMIT_SALT not set, using development salt"),
        }

        if let Some(val) = lookup("TRUST_PROXY") {
            config.trust_proxy = parse_flag(&val);
        }

        if let Some(val) = lookup("SANITIZE_HTML") {
            config.sanitize_html = parse_flag(&val);
        }

        if let Some(val) = lookup("DEFAULT_CHANNEL_CLASS") {
            match val.parse::<ChannelClass>() {
                Ok(class) => config.default_channel_class = class,
                Err(e) => tracing::warn!(error = %e, "Invalid DEFAULT_CHANNEL_CLASS, using default"),
            }
        }

        set_parsed(&lookup, "MAX_MESSAGE_LENGTH", &mut config.max_message_length);
        set_parsed(&lookup, "CHANNEL_CAPACITY", &mut config.channel_capacity);
        set_parsed(&lookup, "FETCH_LIMIT_CEILING", &mut config.fetch_limit_ceiling);
        set_parsed(&lookup, "DEFAULT_FETCH_LIMIT", &mut config.default_fetch_limit);

        set_secs(&lookup, "LOCAL_IDLE_TIMEOUT_SECS", &mut config.local_idle_timeout);
        set_secs(&lookup, "RECLAIM_INTERVAL_SECS", &mut config.reclaim_interval);

        set_secs(&lookup, "GENERAL_RATE_WINDOW_SECS", &mut config.general_budget.window);
        set_parsed(&lookup, "GENERAL_RATE_MAX", &mut config.general_budget.max_requests);
        set_secs(&lookup, "SESSION_RATE_WINDOW_SECS", &mut config.session_budget.window);
        set_parsed(&lookup, "SESSION_RATE_MAX", &mut config.session_budget.max_requests);
        set_secs(&lookup, "SEND_RATE_WINDOW_SECS", &mut config.send_budget.window);
        set_parsed(&lookup, "SEND_RATE_MAX", &mut config.send_budget.max_requests);

        // A zero period would spin the reclaimer.
        if config.reclaim_interval.is_zero() {
            tracing::warn!("RECLAIM_INTERVAL_SECS must be positive, using default");
            config.reclaim_interval = Duration::from_secs(DEFAULT_RECLAIM_INTERVAL_SECS);
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn parse_flag(val: &str) -> bool {
    val != "false" && val != "0"
}

fn set_parsed<F, T>(lookup: &F, key: &str, slot: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(val) = lookup(key) {
        match val.trim().parse::<T>() {
            Ok(parsed) => *slot = parsed,
            Err(_) => tracing::warn!(key, value = %val, "Invalid value, using default"),
        }
    }
}

fn set_secs<F>(lookup: &F, key: &str, slot: &mut Duration)
where
    F: Fn(&str) -> Option<String>,
{
    let mut secs = slot.as_secs();
    set_parsed(lookup, key, &mut secs);
    *slot = Duration::from_secs(secs);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> ServerConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 3000).into());
        assert_eq!(config.default_channel_class, ChannelClass::Global);
        assert_eq!(config.send_budget, RateBudget::new(60, 10));
        assert_eq!(config.general_budget.window, Duration::from_secs(900));
        assert!(!config.trust_proxy);
    }

    #[test]
    fn test_trust_proxy_is_opt_in() {
        assert!(config_from(&[("TRUST_PROXY", "true")]).trust_proxy);
        assert!(!config_from(&[("TRUST_PROXY", "0")]).trust_proxy);
    }

    #[test]
    fn test_env_overrides() {
        let config = config_from(&[
            ("PORT", "8081"),
            ("DEFAULT_CHANNEL_CLASS", "local"),
            ("SEND_RATE_MAX", "15"),
            ("CHANNEL_CAPACITY", "300"),
            ("SANITIZE_HTML", "false"),
        ]);

        assert_eq!(config.http_addr.port(), 8081);
        assert_eq!(config.default_channel_class, ChannelClass::Local);
        assert_eq!(config.send_budget.max_requests, 15);
        assert_eq!(config.channel_capacity, 300);
        assert!(!config.sanitize_html);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = config_from(&[
            ("HTTP_ADDR", "not-an-addr"),
            ("CHANNEL_CAPACITY", "lots"),
            ("DEFAULT_CHANNEL_CLASS", "team"),
            ("RECLAIM_INTERVAL_SECS", "0"),
        ]);

        assert_eq!(config.http_addr, ServerConfig::default().http_addr);
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
        assert_eq!(config.default_channel_class, ChannelClass::Global);
        assert_eq!(config.reclaim_interval, Duration::from_secs(600));
    }

    #[test]
    fn test_debug_hides_salt() {
        let config = config_from(&[("RATE_LIMIT_SALT", "super-secret")]);
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("super-secret"));
    }
}
