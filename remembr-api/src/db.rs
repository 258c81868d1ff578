//! Database connection pool and the row-level tenant guard.
//!
//! Every tenant-scoped transaction is opened through [`DbClient::scoped_tx`],
//! which binds the transaction-local `app.current_org_id` setting that the
//! schema's row-level security policies compare against. A session without
//! the binding sees no tenant-scoped rows, so a defect in scope logic above
//! this layer cannot cross tenants.

use deadpool_postgres::{Config, ManagerConfig, Object, Pool, RecyclingMethod, Runtime, Transaction};
use remembr_core::{EntityIdType, OrgId, Settings};
use secrecy::ExposeSecret;
use std::time::Duration;
use tokio_postgres::NoTls;

use crate::error::{ApiError, ApiResult};

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Connection timeout
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "remembr".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Build database configuration from loaded settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            host: settings.db_host.clone(),
            port: settings.db_port,
            dbname: settings.db_name.clone(),
            user: settings.db_user.clone(),
            password: settings.db_password.expose_secret().to_string(),
            max_size: settings.db_pool_size,
            timeout: Duration::from_secs(30),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> ApiResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| ApiError::internal(format!("Failed to create pool: {}", e)))?;

        Ok(pool)
    }
}

// ============================================================================
// DATABASE CLIENT
// ============================================================================

/// Database client wrapping the shared connection pool.
#[derive(Clone)]
pub struct DbClient {
    pool: Pool,
}

impl DbClient {
    /// Create a new database client with the given pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Create a new database client from configuration.
    pub fn from_config(config: &DbConfig) -> ApiResult<Self> {
        let pool = config.create_pool()?;
        Ok(Self::new(pool))
    }

    /// Get the current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    /// Get a connection from the pool.
    ///
    /// Connections obtained here carry no tenant binding; use them only for
    /// tables outside row-level security (users, organizations, api_keys,
    /// audit_log) or wrap them with [`scoped_tx`].
    pub async fn get_conn(&self) -> ApiResult<Object> {
        self.pool.get().await.map_err(ApiError::from)
    }
}

/// Begin a transaction with the row-level tenant guard installed.
///
/// `set_config(..., true)` makes the binding transaction-local, so it is
/// discarded on commit or rollback and can never leak into a pooled
/// connection's next checkout.
pub async fn scoped_tx<'a>(conn: &'a mut Object, org_id: OrgId) -> ApiResult<Transaction<'a>> {
    let tx = conn.transaction().await?;
    tx.execute(
        "SELECT set_config('app.current_org_id', $1, true)",
        &[&org_id.as_uuid().to_string()],
    )
    .await?;
    Ok(tx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DbConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 5432);
        assert_eq!(config.dbname, "remembr");
        assert_eq!(config.max_size, 16);
    }

    #[test]
    fn test_from_settings() {
        let mut settings = Settings::default();
        settings.db_host = "db.internal".to_string();
        settings.db_pool_size = 4;

        let config = DbConfig::from_settings(&settings);
        assert_eq!(config.host, "db.internal");
        assert_eq!(config.max_size, 4);
        assert_eq!(config.dbname, "remembr");
    }
}
