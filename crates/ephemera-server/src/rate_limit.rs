use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio::sync::Mutex;
use tracing::warn;

use crate::api::AppState;
use crate::config::RateBudget;
use crate::error::RelayError;
use crate::redact::{short_key, IdentityRedactor};

/// Origin string used when no caller address can be determined.
const UNKNOWN_ORIGIN: &str = "unknown";

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allow,
    Deny,
}

/// How a limiter picks the key a request is counted against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStrategy {
    /// Always the redacted caller address.
    Origin,
    /// The caller-supplied user id when present, else the redacted address.
    CallerThenOrigin,
}

/// Per-key counter for the current fixed window.
#[derive(Debug, Clone)]
struct RateWindow {
    count: u32,
    started_at: Instant,
}

/// Fixed-window request counter.
///
/// Windows do not slide: a burst straddling a window boundary can admit up
/// to twice the budget in a short span. Each key costs one map entry and
/// O(1) work per check.
#[derive(Clone)]
pub struct RateLimiter {
    name: &'static str,
    reject_message: &'static str,
    budget: RateBudget,
    strategy: KeyStrategy,
    redactor: IdentityRedactor,
    windows: Arc<Mutex<HashMap<String, RateWindow>>>,
}

impl RateLimiter {
    pub fn new(
        name: &'static str,
        budget: RateBudget,
        strategy: KeyStrategy,
        redactor: IdentityRedactor,
        reject_message: &'static str,
    ) -> Self {
        Self {
            name,
            reject_message,
            budget,
            strategy,
            redactor,
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Resolve the counting key for a request.
    pub fn key_for(&self, caller_id: Option<&str>, origin: &str) -> String {
        match (self.strategy, caller_id.map(str::trim)) {
            (KeyStrategy::CallerThenOrigin, Some(id)) if !id.is_empty() => format!("user:{id}"),
            _ => self.redactor.redact(origin),
        }
    }

    /// Count a request and decide whether it may proceed.
    pub async fn check(&self, caller_id: Option<&str>, origin: &str) -> Admission {
        let key = self.key_for(caller_id, origin);
        let admission = self.check_key_at(&key, Instant::now()).await;
        if admission == Admission::Deny {
            warn!(limiter = self.name, key = short_key(&key), "Rate limit exceeded");
        }
        admission
    }

    /// Like [`check`](Self::check) but maps a denial to [`RelayError`].
    pub async fn admit(&self, caller_id: Option<&str>, origin: &str) -> Result<(), RelayError> {
        match self.check(caller_id, origin).await {
            Admission::Allow => Ok(()),
            Admission::Deny => Err(RelayError::RateLimited(self.reject_message)),
        }
    }

    /// Count a request for an already resolved key at time `now`.
    pub async fn check_key_at(&self, key: &str, now: Instant) -> Admission {
        if self.budget.max_requests == 0 {
            return Admission::Deny;
        }

        let mut windows = self.windows.lock().await;
        match windows.get_mut(key) {
            Some(window) if now.saturating_duration_since(window.started_at) < self.budget.window => {
                if window.count >= self.budget.max_requests {
                    Admission::Deny
                } else {
                    window.count += 1;
                    Admission::Allow
                }
            }
            Some(window) => {
                window.count = 1;
                window.started_at = now;
                Admission::Allow
            }
            None => {
                windows.insert(
                    key.to_string(),
                    RateWindow {
                        count: 1,
                        started_at: now,
                    },
                );
                Admission::Allow
            }
        }
    }

    /// Drop windows that have already expired.
    pub async fn purge_stale(&self) -> usize {
        self.purge_stale_at(Instant::now()).await
    }

    pub async fn purge_stale_at(&self, now: Instant) -> usize {
        let mut windows = self.windows.lock().await;
        let before = windows.len();
        let window = self.budget.window;
        windows.retain(|_, w| now.saturating_duration_since(w.started_at) < window);
        before - windows.len()
    }
}

/// The three independent limiters a relay runs.
#[derive(Clone)]
pub struct Limiters {
    pub general: RateLimiter,
    pub session: RateLimiter,
    pub send: RateLimiter,
}

impl Limiters {
    pub fn new(
        redactor: IdentityRedactor,
        general: RateBudget,
        session: RateBudget,
        send: RateBudget,
    ) -> Self {
        Self {
            general: RateLimiter::new(
                "general",
                general,
                KeyStrategy::Origin,
                redactor.clone(),
                "Rate limit exceeded",
            ),
            session: RateLimiter::new(
                "session",
                session,
                KeyStrategy::CallerThenOrigin,
                redactor.clone(),
                "Too many session requests.",
            ),
            send: RateLimiter::new(
                "send",
                send,
                KeyStrategy::CallerThenOrigin,
                redactor,
                "You are sending messages too fast! Slow down.",
            ),
        }
    }

    /// Purge expired windows from every limiter.
    pub async fn purge_stale(&self) -> usize {
        self.general.purge_stale().await
            + self.session.purge_stale().await
            + self.send.purge_stale().await
    }
}

/// The caller's network origin, as far as it can be determined.
///
/// Without a trusted proxy the socket peer is the only source. Behind one
/// trusted proxy the last `X-Forwarded-For` hop (the one the proxy itself
/// appended) wins, then `X-Real-IP`. Earlier hops are client-controlled and
/// never used.
#[derive(Debug, Clone)]
pub struct ClientOrigin(pub String);

impl ClientOrigin {
    pub fn from_request<B>(req: &Request<B>, trust_proxy: bool) -> Self {
        let socket = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip().to_string());

        let forwarded = if trust_proxy {
            last_forwarded_hop(req).or_else(|| header_ip(req, "x-real-ip"))
        } else {
            None
        };

        Self(
            forwarded
                .or(socket)
                .unwrap_or_else(|| UNKNOWN_ORIGIN.to_string()),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn last_forwarded_hop<B>(req: &Request<B>) -> Option<String> {
    let value = req.headers().get("x-forwarded-for")?.to_str().ok()?;
    parse_ip(value.rsplit(',').next()?)
}

fn header_ip<B>(req: &Request<B>, name: &str) -> Option<String> {
    parse_ip(req.headers().get(name)?.to_str().ok()?)
}

fn parse_ip(raw: &str) -> Option<String> {
    raw.trim()
        .parse::<std::net::IpAddr>()
        .ok()
        .map(|ip| ip.to_string())
}

/// Resolves the caller origin, applies the general limiter, and stashes the
/// origin in request extensions for the per-operation limiters.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let origin = ClientOrigin::from_request(&req, state.config.trust_proxy);

    if let Err(e) = state.limiters.general.admit(None, origin.as_str()).await {
        return e.into_response();
    }

    req.extensions_mut().insert(origin);
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn limiter(window_secs: u64, max: u32, strategy: KeyStrategy) -> RateLimiter {
        RateLimiter::new(
            "test",
            RateBudget::new(window_secs, max),
            strategy,
            IdentityRedactor::new("test-salt"),
            "slow down",
        )
    }

    #[tokio::test]
    async fn test_eleventh_request_in_window_is_denied() {
        let limiter = limiter(60, 10, KeyStrategy::CallerThenOrigin);
        let start = Instant::now();

        for i in 0..10 {
            let now = start + Duration::from_secs(i);
            assert_eq!(limiter.check_key_at("user:a", now).await, Admission::Allow);
        }
        let now = start + Duration::from_secs(30);
        assert_eq!(limiter.check_key_at("user:a", now).await, Admission::Deny);
    }

    #[tokio::test]
    async fn test_window_reset_after_expiry() {
        let limiter = limiter(60, 10, KeyStrategy::CallerThenOrigin);
        let start = Instant::now();

        for _ in 0..10 {
            limiter.check_key_at("user:a", start).await;
        }
        assert_eq!(limiter.check_key_at("user:a", start).await, Admission::Deny);

        let later = start + Duration::from_millis(60_001);
        assert_eq!(limiter.check_key_at("user:a", later).await, Admission::Allow);
    }

    #[tokio::test]
    async fn test_window_resets_exactly_at_boundary() {
        let limiter = limiter(60, 1, KeyStrategy::Origin);
        let start = Instant::now();

        assert_eq!(limiter.check_key_at("k", start).await, Admission::Allow);
        let just_before = start + Duration::from_millis(59_999);
        assert_eq!(limiter.check_key_at("k", just_before).await, Admission::Deny);
        let boundary = start + Duration::from_secs(60);
        assert_eq!(limiter.check_key_at("k", boundary).await, Admission::Allow);
    }

    #[tokio::test]
    async fn test_zero_budget_denies_after_window_expiry() {
        let limiter = limiter(60, 0, KeyStrategy::Origin);
        let start = Instant::now();
        limiter.windows.lock().await.insert(
            "k".to_string(),
            RateWindow {
                count: 3,
                started_at: start,
            },
        );

        let later = start + Duration::from_secs(120);
        assert_eq!(limiter.check_key_at("k", later).await, Admission::Deny);
        assert_eq!(limiter.check_key_at("fresh", later).await, Admission::Deny);
    }

    #[tokio::test]
    async fn test_fixed_window_admits_double_budget_across_boundary() {
        // Accepted tradeoff of fixed windows: a full budget at the end of one
        // window followed by a full budget at the start of the next.
        let limiter = limiter(60, 10, KeyStrategy::Origin);
        let start = Instant::now();
        let end_of_first = start + Duration::from_secs(59);
        let start_of_second = start + Duration::from_millis(60_001);

        assert_eq!(limiter.check_key_at("k", start).await, Admission::Allow);
        for _ in 0..9 {
            assert_eq!(limiter.check_key_at("k", end_of_first).await, Admission::Allow);
        }
        let mut admitted = 0;
        for _ in 0..10 {
            if limiter.check_key_at("k", start_of_second).await == Admission::Allow {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let limiter = limiter(60, 1, KeyStrategy::CallerThenOrigin);
        assert_eq!(limiter.check(Some("alice"), "10.0.0.1").await, Admission::Allow);
        assert_eq!(limiter.check(Some("alice"), "10.0.0.1").await, Admission::Deny);
        assert_eq!(limiter.check(Some("bob"), "10.0.0.1").await, Admission::Allow);
    }

    #[tokio::test]
    async fn test_origin_strategy_ignores_caller_id() {
        let limiter = limiter(60, 1, KeyStrategy::Origin);
        assert_eq!(limiter.check(Some("alice"), "10.0.0.1").await, Admission::Allow);
        assert_eq!(limiter.check(Some("bob"), "10.0.0.1").await, Admission::Deny);
    }

    #[test]
    fn test_key_resolution() {
        let limiter = limiter(60, 1, KeyStrategy::CallerThenOrigin);
        assert_eq!(limiter.key_for(Some("alice"), "10.0.0.1"), "user:alice");

        let fallback = limiter.key_for(Some("  "), "10.0.0.1");
        assert!(fallback.starts_with("addr:"));
        assert_eq!(fallback, limiter.key_for(None, "10.0.0.1"));
        assert!(!fallback.contains("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_admit_maps_denial_to_error() {
        let limiter = limiter(60, 0, KeyStrategy::Origin);
        let err = limiter.admit(None, "10.0.0.1").await.unwrap_err();
        assert!(matches!(err, RelayError::RateLimited("slow down")));
    }

    #[tokio::test]
    async fn test_purge_stale() {
        let limiter = limiter(60, 5, KeyStrategy::Origin);
        let start = Instant::now();
        limiter.check_key_at("a", start).await;
        limiter.check_key_at("b", start + Duration::from_secs(50)).await;

        let removed = limiter.purge_stale_at(start + Duration::from_secs(100)).await;

        assert_eq!(removed, 1);
        assert_eq!(limiter.windows.lock().await.len(), 1);
    }

    #[test]
    fn test_origin_uses_proxy_appended_hop_when_trusted() {
        let req = Request::builder()
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .body(())
            .unwrap();

        assert_eq!(ClientOrigin::from_request(&req, true).as_str(), "10.0.0.1");
        assert_eq!(ClientOrigin::from_request(&req, false).as_str(), UNKNOWN_ORIGIN);
    }

    #[test]
    fn test_untrusted_origin_ignores_forwarding_headers() {
        let peer: SocketAddr = "192.0.2.7:51000".parse().unwrap();
        let mut req = Request::builder()
            .header("x-forwarded-for", "198.51.100.1")
            .header("x-real-ip", "198.51.100.2")
            .body(())
            .unwrap();
        req.extensions_mut().insert(ConnectInfo(peer));

        assert_eq!(ClientOrigin::from_request(&req, false).as_str(), "192.0.2.7");
    }

    #[test]
    fn test_real_ip_used_when_forwarded_hop_is_unparsable() {
        let req = Request::builder()
            .header("x-forwarded-for", "198.51.100.1, garbage")
            .header("x-real-ip", "198.51.100.2")
            .body(())
            .unwrap();

        assert_eq!(ClientOrigin::from_request(&req, true).as_str(), "198.51.100.2");
    }

    #[tokio::test]
    async fn test_rotating_leftmost_forwarded_hop_shares_one_budget() {
        let limiter = limiter(60, 2, KeyStrategy::CallerThenOrigin);
        let mut admitted = 0;
        for i in 0..20 {
            let req = Request::builder()
                .header("x-forwarded-for", format!("198.51.100.{i}, 10.0.0.1"))
                .body(())
                .unwrap();
            let origin = ClientOrigin::from_request(&req, true);
            if limiter.check(None, origin.as_str()).await == Admission::Allow {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 2);
    }
}
