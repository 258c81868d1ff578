//! API key generation, validation, and cached lookup.
//!
//! Keys are opaque strings `rmbr_` + 32 URL-safe random characters, stored
//! as their hex SHA-256 digest. The raw value is returned exactly once at
//! creation. Lookups are cached for a short TTL and invalidated on
//! revocation.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use remembr_cache::{make_key, CacheService, API_KEY_TTL};
use remembr_core::{AgentId, ApiKeyId, OrgId, UserId};

use crate::db::DbClient;
use crate::error::ApiResult;
use crate::repo;

/// Prefix identifying Remembr API keys.
pub const API_KEY_PREFIX: &str = "rmbr_";

/// Random characters after the prefix.
pub const API_KEY_LENGTH: usize = 32;

// ============================================================================
// KEY MATERIAL
// ============================================================================

/// Generate a new API key.
///
/// Returns `(raw_key, key_hash)`; the raw key is shown to the caller once
/// and only the hash is stored.
pub fn generate_api_key() -> (String, String) {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    let random_part: String = URL_SAFE_NO_PAD
        .encode(bytes)
        .chars()
        .take(API_KEY_LENGTH)
        .collect();
    let raw_key = format!("{API_KEY_PREFIX}{random_part}");
    let key_hash = hash_api_key(&raw_key);
    (raw_key, key_hash)
}

/// Hash an API key for storage: hex-encoded SHA-256 of the raw value.
pub fn hash_api_key(raw_key: &str) -> String {
    hex::encode(Sha256::digest(raw_key.as_bytes()))
}

/// Verify a raw key against a stored hash in constant time.
pub fn verify_api_key(raw_key: &str, stored_hash: &str) -> bool {
    let computed = hash_api_key(raw_key);
    computed.as_bytes().ct_eq(stored_hash.as_bytes()).into()
}

// ============================================================================
// LOOKUP
// ============================================================================

/// Identity resolved from a valid API key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyContext {
    pub key_id: ApiKeyId,
    pub org_id: OrgId,
    pub user_id: Option<UserId>,
    pub agent_id: Option<AgentId>,
}

fn lookup_cache_key(key_hash: &str) -> String {
    make_key("api_key", &[key_hash])
}

/// Look up an API key and return its identity context.
///
/// Results are cached for [`API_KEY_TTL`] seconds; expired or unknown keys
/// resolve to `None`.
pub async fn lookup_api_key(
    db: &DbClient,
    cache: &CacheService,
    raw_key: &str,
) -> ApiResult<Option<ApiKeyContext>> {
    if !raw_key.starts_with(API_KEY_PREFIX) {
        return Ok(None);
    }

    let key_hash = hash_api_key(raw_key);
    let cache_key = lookup_cache_key(&key_hash);

    if let Some(context) = cache.get::<ApiKeyContext>(&cache_key).await {
        tracing::debug!(key_hash = &key_hash[..16], "API key cache hit");
        return Ok(Some(context));
    }

    let conn = db.get_conn().await?;
    let api_key = match repo::api_keys::find_by_hash(&**conn, &key_hash).await? {
        Some(key) => key,
        None => {
            tracing::warn!(key_hash = &key_hash[..16], "API key not found");
            return Ok(None);
        }
    };

    // Belt-and-braces recheck of the digest in constant time
    if !verify_api_key(raw_key, &api_key.key_hash) {
        return Ok(None);
    }

    let now = Utc::now();
    if api_key.is_expired(now) {
        tracing::warn!(key_id = %api_key.api_key_id, "API key expired");
        return Ok(None);
    }

    repo::api_keys::touch_last_used(&**conn, api_key.api_key_id, now).await?;

    let context = ApiKeyContext {
        key_id: api_key.api_key_id,
        org_id: api_key.org_id,
        user_id: api_key.user_id,
        agent_id: api_key.agent_id,
    };
    cache.set(&cache_key, &context, Some(API_KEY_TTL)).await;

    tracing::debug!(key_id = %context.key_id, org_id = %context.org_id, "API key validated");
    Ok(Some(context))
}

/// Drop a revoked key's cached lookup result.
pub async fn invalidate_lookup(cache: &CacheService, key_hash: &str) {
    cache.delete(&lookup_cache_key(key_hash)).await;
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_key_format() {
        let (raw, hash) = generate_api_key();
        assert!(raw.starts_with(API_KEY_PREFIX));
        assert_eq!(raw.len(), API_KEY_PREFIX.len() + API_KEY_LENGTH);
        // URL-safe alphabet only
        assert!(raw[API_KEY_PREFIX.len()..]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        // Hex SHA-256 digest
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_keys_are_unique() {
        let (a, _) = generate_api_key();
        let (b, _) = generate_api_key();
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_is_deterministic() {
        let key = "rmbr_abcdefghijklmnopqrstuvwxyz012345";
        assert_eq!(hash_api_key(key), hash_api_key(key));
    }

    #[test]
    fn test_verify_round_trip() {
        let (raw, hash) = generate_api_key();
        assert!(verify_api_key(&raw, &hash));
        assert!(!verify_api_key("rmbr_wrongwrongwrongwrongwrongwrong", &hash));
        assert!(!verify_api_key(&raw, "deadbeef"));
    }

    #[test]
    fn test_lookup_cache_key_convention() {
        let key = lookup_cache_key("cafe1234");
        assert_eq!(key, "remembr:api_key:cafe1234");
    }
}
