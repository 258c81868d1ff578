//! Per-identity token-bucket rate limiting.
//!
//! Requests are keyed on the bearer credential string (or API key), falling
//! back to the client address when unauthenticated. Two buckets exist: the
//! default bucket for reads/writes and a stricter bucket for search.

use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use uuid::Uuid;

use remembr_core::Settings;

use crate::context::RequestId;
use crate::error::ApiError;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

// ============================================================================
// STATE
// ============================================================================

/// Which bucket a request draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Default,
    Search,
}

/// Shared rate-limiter state; one token bucket per (bucket, identity key).
#[derive(Clone)]
pub struct RateLimitState {
    default_per_minute: u32,
    search_per_minute: u32,
    default_limiters: Arc<DashMap<String, Arc<DirectRateLimiter>>>,
    search_limiters: Arc<DashMap<String, Arc<DirectRateLimiter>>>,
}

fn quota(per_minute: u32) -> Quota {
    Quota::per_minute(NonZeroU32::new(per_minute.max(1)).expect("clamped to nonzero"))
}

impl RateLimitState {
    pub fn new(settings: &Settings) -> Self {
        Self {
            default_per_minute: settings.rate_limit_default_per_minute,
            search_per_minute: settings.rate_limit_search_per_minute,
            default_limiters: Arc::new(DashMap::new()),
            search_limiters: Arc::new(DashMap::new()),
        }
    }

    fn limit_for(&self, bucket: Bucket) -> u32 {
        match bucket {
            Bucket::Default => self.default_per_minute,
            Bucket::Search => self.search_per_minute,
        }
    }

    fn limiter_for(&self, bucket: Bucket, key: &str) -> Arc<DirectRateLimiter> {
        let (map, per_minute) = match bucket {
            Bucket::Default => (&self.default_limiters, self.default_per_minute),
            Bucket::Search => (&self.search_limiters, self.search_per_minute),
        };
        map.entry(key.to_string())
            .or_insert_with(|| Arc::new(RateLimiter::direct(quota(per_minute))))
            .clone()
    }

    /// Check one request against the bucket. Returns `Err(retry_after_secs)`
    /// when the bucket is exhausted.
    pub fn check(&self, bucket: Bucket, key: &str) -> Result<(), u64> {
        let limiter = self.limiter_for(bucket, key);
        match limiter.check() {
            Ok(()) => Ok(()),
            Err(not_until) => {
                let retry_after = not_until
                    .wait_time_from(governor::clock::Clock::now(&DefaultClock::default()))
                    .as_secs()
                    .max(1);
                Err(retry_after)
            }
        }
    }
}

// ============================================================================
// KEY EXTRACTION
// ============================================================================

/// Resolve the limiter key: bearer token string, then API key, then client
/// address.
pub fn rate_limit_key(request: &Request, addr: SocketAddr) -> String {
    if let Some(token) = request
        .headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
    {
        return token.to_string();
    }

    if let Some(key) = request
        .headers()
        .get("x-api-key")
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty())
    {
        return key.to_string();
    }

    addr.ip().to_string()
}

fn bucket_for_path(path: &str) -> Bucket {
    if path.ends_with("/memory/search") {
        Bucket::Search
    } else {
        Bucket::Default
    }
}

// ============================================================================
// MIDDLEWARE
// ============================================================================

/// Axum middleware enforcing the token buckets.
///
/// Runs before authentication; it also seeds the per-request id so that
/// rate-limit and authentication errors carry one.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let request_id = Uuid::new_v4().to_string();
    request
        .extensions_mut()
        .insert(RequestId(request_id.clone()));

    let bucket = bucket_for_path(request.uri().path());
    let key = rate_limit_key(&request, addr);

    match state.check(bucket, &key) {
        Ok(()) => Ok(next.run(request).await),
        Err(retry_after) => {
            tracing::warn!(bucket = ?bucket, retry_after, "Rate limit exceeded");
            Err(
                ApiError::rate_limited(retry_after, state.limit_for(bucket))
                    .with_request_id(&request_id),
            )
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn settings(default: u32, search: u32) -> Settings {
        let mut settings = Settings::default();
        settings.rate_limit_default_per_minute = default;
        settings.rate_limit_search_per_minute = search;
        settings
    }

    #[test]
    fn test_bucket_selection() {
        assert_eq!(bucket_for_path("/api/v1/memory/search"), Bucket::Search);
        assert_eq!(bucket_for_path("/api/v1/memory"), Bucket::Default);
        assert_eq!(bucket_for_path("/api/v1/sessions"), Bucket::Default);
    }

    #[test]
    fn test_default_bucket_exhaustion() {
        let state = RateLimitState::new(&settings(120, 30));

        for _ in 0..120 {
            assert!(state.check(Bucket::Default, "token-a").is_ok());
        }
        let retry_after = state
            .check(Bucket::Default, "token-a")
            .expect_err("121st request should be limited");
        assert!(retry_after >= 1);
    }

    #[test]
    fn test_buckets_are_independent_per_key() {
        let state = RateLimitState::new(&settings(2, 30));

        assert!(state.check(Bucket::Default, "token-a").is_ok());
        assert!(state.check(Bucket::Default, "token-a").is_ok());
        assert!(state.check(Bucket::Default, "token-a").is_err());

        // A different identity has its own bucket
        assert!(state.check(Bucket::Default, "token-b").is_ok());
    }

    #[test]
    fn test_search_bucket_is_stricter() {
        let state = RateLimitState::new(&settings(120, 2));

        assert!(state.check(Bucket::Search, "token-a").is_ok());
        assert!(state.check(Bucket::Search, "token-a").is_ok());
        assert!(state.check(Bucket::Search, "token-a").is_err());

        // The default bucket for the same identity is untouched
        assert!(state.check(Bucket::Default, "token-a").is_ok());
    }

    fn request_with(headers: &[(&str, &str)]) -> Request {
        let mut builder = axum::http::Request::builder().uri("/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).expect("request builds")
    }

    #[test]
    fn test_key_extraction_order() {
        let addr: SocketAddr = "10.0.0.7:4411".parse().expect("valid address");

        let request = request_with(&[
            ("authorization", "Bearer tok-123"),
            ("x-api-key", "rmbr_abc"),
        ]);
        assert_eq!(rate_limit_key(&request, addr), "tok-123");

        let request = request_with(&[("x-api-key", "rmbr_abc")]);
        assert_eq!(rate_limit_key(&request, addr), "rmbr_abc");

        let request = request_with(&[]);
        assert_eq!(rate_limit_key(&request, addr), "10.0.0.7");
    }
}
