//! Namespaced key/value cache primitive on Redis.
//!
//! Used by the short-term window engine, auth-context caching, and refresh
//! token revocation. Values are JSON-serialized. Store errors never
//! propagate: callers observe `None`/`false`/`0` and fall back, so a cache
//! outage degrades reads instead of failing requests.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub use redis::RedisError;

// ============================================================================
// TTL CONSTANTS (seconds)
// ============================================================================

/// Session-level cache entries (1 hour).
pub const SESSION_TTL: u64 = 3600;

/// Short-term window blobs (30 minutes).
pub const SHORT_TERM_TTL: u64 = 1800;

/// Long-term cache entries (24 hours).
pub const LONG_TERM_TTL: u64 = 86400;

/// API-key lookup results (60 seconds).
pub const API_KEY_TTL: u64 = 60;

/// Create a namespaced cache key.
///
/// All keys follow the single convention `remembr:<namespace>:<part>:…`.
///
/// ```
/// use remembr_cache::make_key;
/// assert_eq!(make_key("short_term", &["abc", "window"]), "remembr:short_term:abc:window");
/// ```
pub fn make_key(namespace: &str, parts: &[&str]) -> String {
    let mut key = String::from("remembr:");
    key.push_str(namespace);
    for part in parts {
        key.push(':');
        key.push_str(part);
    }
    key
}

// ============================================================================
// CACHE SERVICE
// ============================================================================

/// Cache service over a shared Redis connection manager.
#[derive(Clone)]
pub struct CacheService {
    manager: ConnectionManager,
}

impl CacheService {
    /// Wrap an existing connection manager.
    pub fn new(manager: ConnectionManager) -> Self {
        Self { manager }
    }

    /// Connect to Redis and build a managed connection.
    pub async fn connect(redis_url: &str) -> redis::RedisResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let manager = client.get_connection_manager().await?;
        Ok(Self::new(manager))
    }

    /// Set a value with an optional TTL. Returns false on any failure.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl_seconds: Option<u64>) -> bool {
        let serialized = match serde_json::to_string(value) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(key, error = %e, "Cache set failed to serialize");
                return false;
            }
        };

        let mut conn = self.manager.clone();
        let result: redis::RedisResult<()> = match ttl_seconds {
            Some(ttl) => conn.set_ex(key, serialized, ttl).await,
            None => conn.set(key, serialized).await,
        };

        match result {
            Ok(()) => {
                tracing::debug!(key, ttl = ?ttl_seconds, "Cache set");
                true
            }
            Err(e) => {
                tracing::error!(key, error = %e, "Cache set failed");
                false
            }
        }
    }

    /// Get a value. Returns None on miss, decode failure, or store error.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut conn = self.manager.clone();
        let value: redis::RedisResult<Option<String>> = conn.get(key).await;

        match value {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(decoded) => {
                    tracing::debug!(key, "Cache hit");
                    Some(decoded)
                }
                Err(e) => {
                    tracing::error!(key, error = %e, "Cache get failed to deserialize");
                    None
                }
            },
            Ok(None) => {
                tracing::debug!(key, "Cache miss");
                None
            }
            Err(e) => {
                tracing::error!(key, error = %e, "Cache get failed");
                None
            }
        }
    }

    /// Delete a key. Returns true when a key was removed.
    pub async fn delete(&self, key: &str) -> bool {
        let mut conn = self.manager.clone();
        let result: redis::RedisResult<i64> = conn.del(key).await;
        match result {
            Ok(deleted) => deleted > 0,
            Err(e) => {
                tracing::error!(key, error = %e, "Cache delete failed");
                false
            }
        }
    }

    /// Check whether a key exists.
    pub async fn exists(&self, key: &str) -> bool {
        let mut conn = self.manager.clone();
        let result: redis::RedisResult<i64> = conn.exists(key).await;
        match result {
            Ok(n) => n > 0,
            Err(e) => {
                tracing::error!(key, error = %e, "Cache exists check failed");
                false
            }
        }
    }

    /// Increment a numeric value; returns the new value or None on error.
    pub async fn increment(&self, key: &str, amount: i64) -> Option<i64> {
        let mut conn = self.manager.clone();
        let result: redis::RedisResult<i64> = conn.incr(key, amount).await;
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(key, error = %e, "Cache increment failed");
                None
            }
        }
    }

    /// Remaining TTL in seconds: -1 when no expiration, -2 when absent.
    pub async fn ttl(&self, key: &str) -> i64 {
        let mut conn = self.manager.clone();
        let result: redis::RedisResult<i64> = conn.ttl(key).await;
        match result {
            Ok(ttl) => ttl,
            Err(e) => {
                tracing::error!(key, error = %e, "Cache TTL check failed");
                -2
            }
        }
    }

    /// Set an expiration on an existing key.
    pub async fn expire(&self, key: &str, ttl_seconds: u64) -> bool {
        let mut conn = self.manager.clone();
        let result: redis::RedisResult<bool> = conn.expire(key, ttl_seconds as i64).await;
        match result {
            Ok(set) => set,
            Err(e) => {
                tracing::error!(key, error = %e, "Cache expire failed");
                false
            }
        }
    }

    /// Set multiple key/value pairs in one pipeline, with an optional shared
    /// TTL.
    pub async fn set_many<T: Serialize>(
        &self,
        entries: &[(String, T)],
        ttl_seconds: Option<u64>,
    ) -> bool {
        if entries.is_empty() {
            return true;
        }

        let mut pipe = redis::pipe();
        for (key, value) in entries {
            let serialized = match serde_json::to_string(value) {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(key, error = %e, "Cache set_many failed to serialize");
                    return false;
                }
            };
            match ttl_seconds {
                Some(ttl) => {
                    pipe.set_ex(key, serialized, ttl).ignore();
                }
                None => {
                    pipe.set(key, serialized).ignore();
                }
            }
        }

        let mut conn = self.manager.clone();
        match pipe.query_async::<_, ()>(&mut conn).await {
            Ok(()) => {
                tracing::debug!(count = entries.len(), ttl = ?ttl_seconds, "Cache set many");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Cache set many failed");
                false
            }
        }
    }

    /// Get multiple values; only present, decodable entries are returned.
    pub async fn get_many<T: DeserializeOwned>(&self, keys: &[String]) -> Vec<(String, T)> {
        if keys.is_empty() {
            return Vec::new();
        }

        let mut conn = self.manager.clone();
        let result: redis::RedisResult<Vec<Option<String>>> = conn.mget(keys).await;

        match result {
            Ok(values) => keys
                .iter()
                .zip(values)
                .filter_map(|(key, value)| {
                    let raw = value?;
                    match serde_json::from_str(&raw) {
                        Ok(decoded) => Some((key.clone(), decoded)),
                        Err(_) => {
                            tracing::warn!(key, "Failed to deserialize cached value");
                            None
                        }
                    }
                })
                .collect(),
            Err(e) => {
                tracing::error!(error = %e, "Cache get many failed");
                Vec::new()
            }
        }
    }

    /// Delete all keys matching a pattern (e.g. `remembr:session:*`).
    /// Returns the number of keys deleted.
    pub async fn delete_pattern(&self, pattern: &str) -> u64 {
        let mut scan_conn = self.manager.clone();
        let keys: Vec<String> = {
            let iter: redis::RedisResult<redis::AsyncIter<'_, String>> =
                scan_conn.scan_match(pattern).await;
            match iter {
                Ok(mut iter) => {
                    let mut keys = Vec::new();
                    while let Some(key) = iter.next_item().await {
                        keys.push(key);
                    }
                    keys
                }
                Err(e) => {
                    tracing::error!(pattern, error = %e, "Cache scan failed");
                    return 0;
                }
            }
        };

        if keys.is_empty() {
            return 0;
        }

        let mut conn = self.manager.clone();
        let result: redis::RedisResult<u64> = conn.del(&keys).await;
        match result {
            Ok(deleted) => {
                tracing::debug!(pattern, deleted, "Cache delete pattern");
                deleted
            }
            Err(e) => {
                tracing::error!(pattern, error = %e, "Cache delete pattern failed");
                0
            }
        }
    }

    /// Atomically replace a key's value inside one MULTI/EXEC pipeline
    /// (delete + setex with no interleave). The short-term window relies on
    /// this for its overwrite-whole-blob semantics.
    ///
    /// Unlike the other operations, failures here surface to the caller:
    /// losing a window write is a data-loss risk the caller must see.
    pub async fn swap<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_seconds: u64,
    ) -> redis::RedisResult<()> {
        let serialized = serde_json::to_string(value).map_err(|e| {
            redis::RedisError::from((
                redis::ErrorKind::TypeError,
                "serialize failed",
                e.to_string(),
            ))
        })?;

        let mut conn = self.manager.clone();
        redis::pipe()
            .atomic()
            .del(key)
            .ignore()
            .set_ex(key, serialized, ttl_seconds)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_key_convention() {
        assert_eq!(make_key("session", &[]), "remembr:session");
        assert_eq!(
            make_key("short_term", &["sid-123", "window"]),
            "remembr:short_term:sid-123:window"
        );
        assert_eq!(
            make_key("api_key", &["deadbeef"]),
            "remembr:api_key:deadbeef"
        );
    }

    #[test]
    fn test_ttl_constants() {
        assert_eq!(SESSION_TTL, 3600);
        assert_eq!(SHORT_TERM_TTL, 1800);
        assert_eq!(LONG_TERM_TTL, 86400);
        assert_eq!(API_KEY_TTL, 60);
    }
}
