//! JWT token management and password hashing.
//!
//! Two token kinds are issued: short-lived `access` tokens and long-lived
//! `refresh` tokens, both HS256-signed with the service secret. Logout
//! revokes a refresh token by placing its SHA-256 digest in the cache with a
//! TTL no longer than the token's remaining lifetime; presence means
//! "revoked".

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use remembr_core::{AgentId, Settings, UserId};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use remembr_cache::{make_key, CacheService};

use crate::error::{ApiError, ApiResult};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Authentication configuration.
#[derive(Clone)]
pub struct AuthConfig {
    /// HS256 signing secret.
    secret_key: SecretString,
    /// Access token lifetime in minutes.
    pub access_token_expire_minutes: i64,
    /// Refresh token lifetime in days.
    pub refresh_token_expire_days: i64,
}

impl AuthConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            secret_key: settings.secret_key.clone(),
            access_token_expire_minutes: settings.access_token_expire_minutes,
            refresh_token_expire_days: settings.refresh_token_expire_days,
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("secret_key", &"[REDACTED]")
            .field(
                "access_token_expire_minutes",
                &self.access_token_expire_minutes,
            )
            .field("refresh_token_expire_days", &self.refresh_token_expire_days)
            .finish()
    }
}

// ============================================================================
// CLAIMS
// ============================================================================

/// Token kind carried in the `type` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
}

/// JWT claims for both token kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user id.
    pub sub: String,

    /// Expiration time (Unix timestamp).
    pub exp: i64,

    /// Token kind; access tokens authenticate requests, refresh tokens only
    /// mint new access tokens.
    #[serde(rename = "type")]
    pub token_type: TokenType,

    /// User email, carried through refresh.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub email: Option<String>,

    /// Acting agent identity, when the token was minted for an agent.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub agent_id: Option<String>,
}

impl Claims {
    /// Parse the subject as a user id.
    pub fn user_id(&self) -> ApiResult<UserId> {
        self.sub
            .parse()
            .map_err(|_| ApiError::authentication("Invalid token subject"))
    }

    /// Parse the optional agent claim.
    pub fn agent_id(&self) -> ApiResult<Option<AgentId>> {
        match &self.agent_id {
            None => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| ApiError::authentication("Invalid agent_id claim")),
        }
    }
}

// ============================================================================
// TOKEN FUNCTIONS
// ============================================================================

fn encode_claims(config: &AuthConfig, claims: &Claims) -> ApiResult<String> {
    let key = EncodingKey::from_secret(config.secret_key.expose_secret().as_bytes());
    encode(&Header::new(Algorithm::HS256), claims, &key)
        .map_err(|e| ApiError::internal(format!("Failed to sign token: {}", e)))
}

/// Create a short-lived access token for a user (optionally as an agent).
pub fn create_access_token(
    config: &AuthConfig,
    user_id: UserId,
    email: Option<&str>,
    agent_id: Option<AgentId>,
) -> ApiResult<String> {
    let claims = Claims {
        sub: user_id.to_string(),
        exp: (Utc::now() + chrono::Duration::minutes(config.access_token_expire_minutes))
            .timestamp(),
        token_type: TokenType::Access,
        email: email.map(str::to_string),
        agent_id: agent_id.map(|id| id.to_string()),
    };
    encode_claims(config, &claims)
}

/// Create a long-lived refresh token.
pub fn create_refresh_token(
    config: &AuthConfig,
    user_id: UserId,
    email: Option<&str>,
) -> ApiResult<String> {
    let claims = Claims {
        sub: user_id.to_string(),
        exp: (Utc::now() + chrono::Duration::days(config.refresh_token_expire_days)).timestamp(),
        token_type: TokenType::Refresh,
        email: email.map(str::to_string),
        agent_id: None,
    };
    encode_claims(config, &claims)
}

/// Decode and validate a token's signature and expiry.
pub fn decode_token(config: &AuthConfig, token: &str) -> ApiResult<Claims> {
    let key = DecodingKey::from_secret(config.secret_key.expose_secret().as_bytes());
    let validation = Validation::new(Algorithm::HS256);

    decode::<Claims>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                ApiError::authentication("Token has expired")
            }
            _ => ApiError::authentication("Could not validate credentials"),
        })
}

/// Decode a token and require the given kind.
pub fn decode_token_of_type(
    config: &AuthConfig,
    token: &str,
    expected: TokenType,
) -> ApiResult<Claims> {
    let claims = decode_token(config, token)?;
    if claims.token_type != expected {
        return Err(ApiError::authentication("Invalid token type"));
    }
    Ok(claims)
}

// ============================================================================
// REFRESH TOKEN REVOCATION
// ============================================================================

fn revocation_key(refresh_token: &str) -> String {
    let digest = hex::encode(Sha256::digest(refresh_token.as_bytes()));
    make_key("auth", &["revoked", &digest])
}

/// Revoke a refresh token until its natural expiry.
pub async fn revoke_refresh_token(cache: &CacheService, refresh_token: &str, exp: i64) {
    let remaining = exp - Utc::now().timestamp();
    if remaining > 0 {
        cache
            .set(&revocation_key(refresh_token), &1u8, Some(remaining as u64))
            .await;
    }
}

/// Whether a refresh token has been revoked.
pub async fn is_refresh_token_revoked(cache: &CacheService, refresh_token: &str) -> bool {
    cache.exists(&revocation_key(refresh_token)).await
}

// ============================================================================
// PASSWORD HASHING
// ============================================================================

/// Hash a password with bcrypt.
pub fn hash_password(password: &str) -> ApiResult<String> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST)
        .map_err(|e| ApiError::internal(format!("Password hashing failed: {}", e)))
}

/// Verify a password against its stored hash.
pub fn verify_password(password: &str, hashed: &str) -> bool {
    match bcrypt::verify(password, hashed) {
        Ok(matched) => matched,
        Err(e) => {
            tracing::error!(error = %e, "Password verification failed");
            false
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use remembr_core::EntityIdType;

    fn test_config() -> AuthConfig {
        AuthConfig {
            secret_key: SecretString::new("test_secret".to_string().into()),
            access_token_expire_minutes: 30,
            refresh_token_expire_days: 7,
        }
    }

    #[test]
    fn test_access_token_round_trip() -> ApiResult<()> {
        let config = test_config();
        let user_id = UserId::new_v4();

        let token = create_access_token(&config, user_id, Some("a@example.com"), None)?;
        let claims = decode_token_of_type(&config, &token, TokenType::Access)?;

        assert_eq!(claims.user_id()?, user_id);
        assert_eq!(claims.email.as_deref(), Some("a@example.com"));
        assert_eq!(claims.agent_id()?, None);
        Ok(())
    }

    #[test]
    fn test_agent_claim_round_trip() -> ApiResult<()> {
        let config = test_config();
        let user_id = UserId::new_v4();
        let agent_id = AgentId::new_v4();

        let token = create_access_token(&config, user_id, None, Some(agent_id))?;
        let claims = decode_token(&config, &token)?;

        assert_eq!(claims.agent_id()?, Some(agent_id));
        Ok(())
    }

    #[test]
    fn test_refresh_token_type_enforced() -> ApiResult<()> {
        let config = test_config();
        let user_id = UserId::new_v4();

        let refresh = create_refresh_token(&config, user_id, None)?;
        assert!(decode_token_of_type(&config, &refresh, TokenType::Refresh).is_ok());

        // A refresh token must not pass as an access token
        let result = decode_token_of_type(&config, &refresh, TokenType::Access);
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn test_expired_token_rejected() -> ApiResult<()> {
        let mut config = test_config();
        // Far enough in the past to clear default validation leeway
        config.access_token_expire_minutes = -5;

        let token = create_access_token(&config, UserId::new_v4(), None, None)?;
        let result = decode_token(&config, &token);
        assert!(result.is_err());
        assert_eq!(
            result.unwrap_err().code,
            crate::error::ErrorCode::AuthenticationError
        );
        Ok(())
    }

    #[test]
    fn test_wrong_secret_rejected() -> ApiResult<()> {
        let config = test_config();
        let token = create_access_token(&config, UserId::new_v4(), None, None)?;

        let other = AuthConfig {
            secret_key: SecretString::new("different_secret".to_string().into()),
            ..test_config()
        };
        assert!(decode_token(&other, &token).is_err());
        Ok(())
    }

    #[test]
    fn test_token_type_serialization() {
        let json = serde_json::to_string(&TokenType::Access).expect("serializable");
        assert_eq!(json, "\"access\"");
        let json = serde_json::to_string(&TokenType::Refresh).expect("serializable");
        assert_eq!(json, "\"refresh\"");
    }

    #[test]
    fn test_revocation_key_is_hashed() {
        let key = revocation_key("some.refresh.token");
        assert!(key.starts_with("remembr:auth:revoked:"));
        // The raw token never appears in the cache key
        assert!(!key.contains("some.refresh.token"));
    }

    #[test]
    fn test_password_hash_and_verify() -> ApiResult<()> {
        let hashed = hash_password("hunter2-but-longer")?;
        assert!(verify_password("hunter2-but-longer", &hashed));
        assert!(!verify_password("wrong-password", &hashed));
        assert!(!verify_password("hunter2-but-longer", "not-a-bcrypt-hash"));
        Ok(())
    }
}
