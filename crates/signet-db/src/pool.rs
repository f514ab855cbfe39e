//! Connection pool construction and configuration.
//!
//! The engine reads its database settings from the environment and owns a
//! single [`sqlx::PgPool`] wrapped in [`DbPool`].

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::error::DbError;

/// Default maximum number of pooled connections.
const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Default timeout for acquiring a connection from the pool, in seconds.
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Database configuration read from the environment.
///
/// Reads:
/// - `SIGNET_DATABASE_URL`: the PostgreSQL connection string (required)
/// - `SIGNET_DATABASE_MAX_CONNECTIONS`: pool size (default: 10)
/// - `SIGNET_DATABASE_ACQUIRE_TIMEOUT_SECS`: acquire timeout (default: 30)
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL connection string.
    pub database_url: String,
    /// Maximum number of pooled connections.
    pub max_connections: u32,
    /// Timeout for acquiring a connection, in seconds.
    pub acquire_timeout_secs: u64,
}

impl DbConfig {
    /// Parse configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Configuration`] if `SIGNET_DATABASE_URL` is not set.
    pub fn from_env() -> Result<Self, DbError> {
        let database_url = std::env::var("SIGNET_DATABASE_URL")
            .map_err(|_| DbError::Configuration("SIGNET_DATABASE_URL is not set".to_string()))?;

        let max_connections = std::env::var("SIGNET_DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_MAX_CONNECTIONS);

        let acquire_timeout_secs = std::env::var("SIGNET_DATABASE_ACQUIRE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS);

        Ok(Self {
            database_url,
            max_connections,
            acquire_timeout_secs,
        })
    }
}

/// A PostgreSQL connection pool.
///
/// # Example
///
/// ```rust,ignore
/// use signet_db::{DbPool, run_migrations};
///
/// let pool = DbPool::connect("postgres://localhost/signet").await?;
/// run_migrations(&pool).await?;
/// ```
#[derive(Debug, Clone)]
pub struct DbPool {
    inner: PgPool,
}

impl DbPool {
    /// Connect with default pool options.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::ConnectionFailed`] if the database is unreachable.
    pub async fn connect(database_url: &str) -> Result<Self, DbError> {
        let config = DbConfig {
            database_url: database_url.to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout_secs: DEFAULT_ACQUIRE_TIMEOUT_SECS,
        };
        Self::from_config(&config).await
    }

    /// Connect using an explicit [`DbConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError::ConnectionFailed`] if the database is unreachable.
    pub async fn from_config(config: &DbConfig) -> Result<Self, DbError> {
        tracing::debug!(
            max_connections = config.max_connections,
            "Creating database connection pool"
        );

        let inner = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.database_url)
            .await
            .map_err(DbError::ConnectionFailed)?;

        tracing::info!("Database connection pool ready");
        Ok(Self { inner })
    }

    /// Access the underlying [`PgPool`].
    #[must_use]
    pub fn inner(&self) -> &PgPool {
        &self.inner
    }

    /// Close all pooled connections.
    pub async fn close(&self) {
        self.inner.close().await;
    }
}
