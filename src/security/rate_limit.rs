//! Per-client token bucket rate limiting.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::config::RateLimitConfig;
use crate::error::GatewayError;
use crate::http::response::error_response;
use crate::observability::metrics;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// Key used when no client address can be resolved.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Bucket parameters shared by every client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketSettings {
    pub capacity: u64,
    pub refill_tokens: u64,
    pub refill_interval: Duration,
}

impl From<&RateLimitConfig> for BucketSettings {
    fn from(config: &RateLimitConfig) -> Self {
        Self {
            capacity: config.capacity,
            refill_tokens: config.refill_tokens,
            refill_interval: Duration::from_millis(config.refill_interval_ms),
        }
    }
}

/// A token bucket refilled lazily in whole periods.
#[derive(Debug)]
pub struct TokenBucket {
    settings: BucketSettings,
    tokens: u64,
    last_refill: Instant,
    last_seen: Instant,
}

impl TokenBucket {
    /// A full bucket.
    pub fn new(settings: BucketSettings, now: Instant) -> Self {
        Self {
            settings,
            tokens: settings.capacity,
            last_refill: now,
            last_seen: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let interval = self.settings.refill_interval;
        let elapsed = now.saturating_duration_since(self.last_refill);
        if interval.is_zero() || elapsed < interval {
            return;
        }

        let periods = elapsed.as_nanos() / interval.as_nanos();
        let added = u64::try_from(periods)
            .unwrap_or(u64::MAX)
            .saturating_mul(self.settings.refill_tokens);
        self.tokens = self.tokens.saturating_add(added).min(self.settings.capacity);
        // Advance by whole periods only; the remainder counts toward the next refill.
        let advance = periods * interval.as_nanos();
        self.last_refill += Duration::from_nanos(u64::try_from(advance).unwrap_or(u64::MAX));
    }

    /// Take one token. Returns the tokens left, or `None` when empty.
    pub fn try_consume(&mut self, now: Instant) -> Option<u64> {
        self.refill(now);
        self.last_seen = now;
        if self.tokens > 0 {
            self.tokens -= 1;
            Some(self.tokens)
        } else {
            None
        }
    }

    pub fn tokens(&self) -> u64 {
        self.tokens
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen)
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u64,
}

/// Admission control keyed by client.
///
/// Buckets are created once per key and locked individually; no lock spans
/// more than one key.
pub struct TokenBucketLimiter {
    buckets: DashMap<String, Arc<Mutex<TokenBucket>>>,
    settings: BucketSettings,
}

impl TokenBucketLimiter {
    pub fn new(settings: BucketSettings) -> Self {
        Self {
            buckets: DashMap::new(),
            settings,
        }
    }

    pub fn settings(&self) -> BucketSettings {
        self.settings
    }

    /// Consume a token for `key` now.
    pub fn try_consume(&self, key: &str) -> RateLimitDecision {
        self.try_consume_at(key, Instant::now())
    }

    /// Consume a token for `key` as of `now`.
    pub fn try_consume_at(&self, key: &str, now: Instant) -> RateLimitDecision {
        let bucket = self.bucket(key, now);
        let mut bucket = bucket.lock().unwrap_or_else(PoisonError::into_inner);
        match bucket.try_consume(now) {
            Some(remaining) => RateLimitDecision { allowed: true, remaining },
            None => RateLimitDecision { allowed: false, remaining: 0 },
        }
    }

    fn bucket(&self, key: &str, now: Instant) -> Arc<Mutex<TokenBucket>> {
        if let Some(existing) = self.buckets.get(key) {
            return existing.value().clone();
        }
        // Entry API holds the shard lock, so concurrent first access inserts once.
        self.buckets
            .entry(key.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(TokenBucket::new(self.settings, now))))
            .value()
            .clone()
    }

    /// Number of tracked client buckets.
    pub fn tracked(&self) -> usize {
        self.buckets.len()
    }

    /// Drop buckets idle for at least `ttl`. Returns how many were removed.
    pub fn evict_idle(&self, now: Instant, ttl: Duration) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| {
            let bucket = bucket.lock().unwrap_or_else(PoisonError::into_inner);
            bucket.idle_for(now) < ttl
        });
        before.saturating_sub(self.buckets.len())
    }

    /// Periodically evict idle buckets until shutdown.
    pub async fn run_sweeper(
        self: Arc<Self>,
        every: Duration,
        ttl: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = self.evict_idle(Instant::now(), ttl);
                    metrics::record_bucket_count(self.tracked());
                    if evicted > 0 {
                        tracing::debug!(evicted, remaining = self.tracked(), "Evicted idle rate limit buckets");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::debug!("Rate limit sweeper stopping");
                    break;
                }
            }
        }
    }
}

/// Resolve the client key: X-Forwarded-For (first hop), X-Real-IP, then peer address.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    if let Some(xff) = header(headers, "x-forwarded-for") {
        let first = xff.split(',').next().unwrap_or(xff).trim();
        if !first.is_empty() {
            return first.to_owned();
        }
    }

    if let Some(real_ip) = header(headers, "x-real-ip") {
        return real_ip.to_owned();
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_owned())
}

/// Admission control stage of the gateway pipeline.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<TokenBucketLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = client_key(request.headers(), peer);
    let settings = limiter.settings();
    let decision = limiter.try_consume(&key);

    if !decision.allowed {
        tracing::warn!(client = %key, "Rate limit exceeded");
        metrics::record_rate_limited();
        let err = GatewayError::RateLimitExceeded {
            client: key,
            retry_after: settings.refill_interval,
        };
        return error_response(&err, request.headers(), request.uri().path());
    }

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(settings.capacity));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    response
}
