//! Service configuration loaded from environment variables.

use secrecy::{ExposeSecret, SecretString};

use crate::enums::Environment;
use crate::error::{CoreError, CoreResult};

const INSECURE_DEFAULT_SECRET: &str = "INSECURE_DEFAULT_SECRET_CHANGE_IN_PRODUCTION";

/// Application settings.
///
/// Loaded once at startup from `REMEMBR_*` environment variables with
/// development defaults. `validate()` must pass before the server starts;
/// production refuses the insecure default signing secret.
#[derive(Clone)]
pub struct Settings {
    // Database
    pub db_host: String,
    pub db_port: u16,
    pub db_name: String,
    pub db_user: String,
    pub db_password: SecretString,
    pub db_pool_size: usize,

    // Redis
    pub redis_url: SecretString,

    // JWT authentication
    pub secret_key: SecretString,
    pub algorithm: String,
    pub access_token_expire_minutes: i64,
    pub refresh_token_expire_days: i64,

    // Embedding service
    pub embedding_api_key: SecretString,
    pub embedding_base_url: String,
    pub embedding_model: String,
    pub embedding_batch_size: usize,
    pub embedding_workers: usize,
    pub embedding_queue_len: usize,

    // Short-term memory
    pub short_term_max_tokens: i32,
    pub short_term_auto_checkpoint_threshold: f64,

    // Rate limiting
    pub rate_limit_default_per_minute: u32,
    pub rate_limit_search_per_minute: u32,

    // Deployment
    pub environment: Environment,
    pub bind: String,
    pub port: u16,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("db_host", &self.db_host)
            .field("db_port", &self.db_port)
            .field("db_name", &self.db_name)
            .field("db_user", &self.db_user)
            .field("db_password", &"[REDACTED]")
            .field("db_pool_size", &self.db_pool_size)
            .field("redis_url", &"[REDACTED]")
            .field("secret_key", &"[REDACTED]")
            .field("algorithm", &self.algorithm)
            .field(
                "access_token_expire_minutes",
                &self.access_token_expire_minutes,
            )
            .field("refresh_token_expire_days", &self.refresh_token_expire_days)
            .field("embedding_api_key", &"[REDACTED]")
            .field("embedding_base_url", &self.embedding_base_url)
            .field("embedding_model", &self.embedding_model)
            .field("embedding_batch_size", &self.embedding_batch_size)
            .field("embedding_workers", &self.embedding_workers)
            .field("embedding_queue_len", &self.embedding_queue_len)
            .field("short_term_max_tokens", &self.short_term_max_tokens)
            .field(
                "short_term_auto_checkpoint_threshold",
                &self.short_term_auto_checkpoint_threshold,
            )
            .field(
                "rate_limit_default_per_minute",
                &self.rate_limit_default_per_minute,
            )
            .field(
                "rate_limit_search_per_minute",
                &self.rate_limit_search_per_minute,
            )
            .field("environment", &self.environment)
            .field("bind", &self.bind)
            .field("port", &self.port)
            .finish()
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_host: "localhost".to_string(),
            db_port: 5432,
            db_name: "remembr".to_string(),
            db_user: "postgres".to_string(),
            db_password: SecretString::new("".to_string().into()),
            db_pool_size: 16,
            redis_url: SecretString::new("redis://127.0.0.1:6379".to_string().into()),
            secret_key: SecretString::new(INSECURE_DEFAULT_SECRET.to_string().into()),
            algorithm: "HS256".to_string(),
            access_token_expire_minutes: 30,
            refresh_token_expire_days: 7,
            embedding_api_key: SecretString::new("".to_string().into()),
            embedding_base_url: "https://api.jina.ai/v1/embeddings".to_string(),
            embedding_model: "jina-embeddings-v3".to_string(),
            embedding_batch_size: 100,
            embedding_workers: 4,
            embedding_queue_len: 256,
            short_term_max_tokens: 4000,
            short_term_auto_checkpoint_threshold: 0.8,
            rate_limit_default_per_minute: 120,
            rate_limit_search_per_minute: 30,
            environment: Environment::Local,
            bind: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

impl Settings {
    /// Load settings from `REMEMBR_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Settings::default();
        Self {
            db_host: env_or("REMEMBR_DB_HOST", &defaults.db_host),
            db_port: env_parse("REMEMBR_DB_PORT", defaults.db_port),
            db_name: env_or("REMEMBR_DB_NAME", &defaults.db_name),
            db_user: env_or("REMEMBR_DB_USER", &defaults.db_user),
            db_password: SecretString::new(env_or("REMEMBR_DB_PASSWORD", "").into()),
            db_pool_size: env_parse("REMEMBR_DB_POOL_SIZE", defaults.db_pool_size),
            redis_url: SecretString::new(
                env_or("REMEMBR_REDIS_URL", "redis://127.0.0.1:6379").into(),
            ),
            secret_key: SecretString::new(
                env_or("REMEMBR_SECRET_KEY", INSECURE_DEFAULT_SECRET).into(),
            ),
            algorithm: env_or("REMEMBR_JWT_ALGORITHM", &defaults.algorithm),
            access_token_expire_minutes: env_parse(
                "REMEMBR_ACCESS_TOKEN_EXPIRE_MINUTES",
                defaults.access_token_expire_minutes,
            ),
            refresh_token_expire_days: env_parse(
                "REMEMBR_REFRESH_TOKEN_EXPIRE_DAYS",
                defaults.refresh_token_expire_days,
            ),
            embedding_api_key: SecretString::new(env_or("REMEMBR_EMBEDDING_API_KEY", "").into()),
            embedding_base_url: env_or("REMEMBR_EMBEDDING_BASE_URL", &defaults.embedding_base_url),
            embedding_model: env_or("REMEMBR_EMBEDDING_MODEL", &defaults.embedding_model),
            embedding_batch_size: env_parse(
                "REMEMBR_EMBEDDING_BATCH_SIZE",
                defaults.embedding_batch_size,
            ),
            embedding_workers: env_parse("REMEMBR_EMBEDDING_WORKERS", defaults.embedding_workers),
            embedding_queue_len: env_parse(
                "REMEMBR_EMBEDDING_QUEUE_LEN",
                defaults.embedding_queue_len,
            ),
            short_term_max_tokens: env_parse(
                "REMEMBR_SHORT_TERM_MAX_TOKENS",
                defaults.short_term_max_tokens,
            ),
            short_term_auto_checkpoint_threshold: env_parse(
                "REMEMBR_SHORT_TERM_AUTO_CHECKPOINT_THRESHOLD",
                defaults.short_term_auto_checkpoint_threshold,
            ),
            rate_limit_default_per_minute: env_parse(
                "REMEMBR_RATE_LIMIT_DEFAULT_PER_MINUTE",
                defaults.rate_limit_default_per_minute,
            ),
            rate_limit_search_per_minute: env_parse(
                "REMEMBR_RATE_LIMIT_SEARCH_PER_MINUTE",
                defaults.rate_limit_search_per_minute,
            ),
            environment: std::env::var("REMEMBR_ENVIRONMENT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            bind: env_or("REMEMBR_BIND", &defaults.bind),
            port: env_parse("PORT", env_parse("REMEMBR_PORT", defaults.port)),
        }
    }

    /// Validate settings at startup.
    pub fn validate(&self) -> CoreResult<()> {
        let threshold = self.short_term_auto_checkpoint_threshold;
        if threshold <= 0.0 || threshold > 1.0 {
            return Err(CoreError::InvalidConfig {
                field: "short_term_auto_checkpoint_threshold",
                reason: format!("must be in (0, 1], got {}", threshold),
            });
        }

        if self.short_term_max_tokens < 0 {
            return Err(CoreError::InvalidConfig {
                field: "short_term_max_tokens",
                reason: "must be non-negative".to_string(),
            });
        }

        if self.algorithm != "HS256" {
            return Err(CoreError::InvalidConfig {
                field: "algorithm",
                reason: format!("only HS256 is supported, got {}", self.algorithm),
            });
        }

        if self.environment.is_production() {
            if self.secret_key.expose_secret() == INSECURE_DEFAULT_SECRET {
                return Err(CoreError::InvalidConfig {
                    field: "secret_key",
                    reason: "cannot run production with the insecure default secret".to_string(),
                });
            }
            if self.secret_key.expose_secret().len() < 32 {
                return Err(CoreError::InvalidConfig {
                    field: "secret_key",
                    reason: "must be at least 32 characters in production".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Whether the signing secret is still the development default.
    pub fn has_insecure_secret(&self) -> bool {
        self.secret_key.expose_secret() == INSECURE_DEFAULT_SECRET
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.short_term_max_tokens, 4000);
        assert_eq!(settings.access_token_expire_minutes, 30);
        assert_eq!(settings.rate_limit_default_per_minute, 120);
    }

    #[test]
    fn test_threshold_bounds() {
        let mut settings = Settings::default();

        settings.short_term_auto_checkpoint_threshold = 0.0;
        assert!(settings.validate().is_err());

        settings.short_term_auto_checkpoint_threshold = 1.5;
        assert!(settings.validate().is_err());

        settings.short_term_auto_checkpoint_threshold = 1.0;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_production_rejects_insecure_secret() {
        let mut settings = Settings::default();
        settings.environment = Environment::Production;
        assert!(settings.validate().is_err());

        settings.secret_key =
            SecretString::new("a-long-enough-production-secret-value-123".to_string().into());
        assert!(settings.validate().is_ok());

        settings.secret_key = SecretString::new("short".to_string().into());
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_only_hs256_supported() {
        let mut settings = Settings::default();
        settings.algorithm = "RS256".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let debug = format!("{:?}", Settings::default());
        assert!(!debug.contains("INSECURE_DEFAULT"));
        assert!(debug.contains("[REDACTED]"));
    }
}
