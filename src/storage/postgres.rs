use std::time::Duration;

use sqlx::pool::PoolConnection;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres};

use crate::config::KeychainConfig;
use crate::contracts::{
    BoxError, Connection, ConnectionProvider, KeychainError, KeychainResult, Statement,
};

/// PostgreSQL connection provider backed by a `sqlx` pool.
#[derive(Clone)]
pub struct PgProvider {
    pool: PgPool,
}

impl PgProvider {
    /// Wraps an existing pool. Closing the keychain closes the pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a new pool to `url` sized and timed by `config`.
    ///
    /// The URL may carry credentials and is never logged.
    pub async fn connect(url: &str, config: &KeychainConfig) -> KeychainResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_millis(config.acquire_timeout_ms))
            .connect(url)
            .await
            .map_err(|e| KeychainError::Connect(e.into()))?;

        tracing::info!(
            max_connections = config.max_connections,
            "Connected PostgreSQL pool"
        );

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl ConnectionProvider for PgProvider {
    type Connection = PoolConnection<Postgres>;

    async fn acquire(&self) -> Result<PoolConnection<Postgres>, BoxError> {
        Ok(self.pool.acquire().await?)
    }

    async fn close(&self) -> Result<(), BoxError> {
        self.pool.close().await;
        Ok(())
    }
}

impl Connection for PoolConnection<Postgres> {
    async fn fetch_value(
        &mut self,
        statement: &Statement,
        key: &str,
        args: &[i64],
    ) -> Result<Option<i64>, BoxError> {
        let mut query = sqlx::query_scalar::<Postgres, i64>(statement.sql()).bind(key);
        for arg in args {
            query = query.bind(*arg);
        }
        Ok(query.fetch_optional(&mut **self).await?)
    }

    async fn execute(&mut self, statement: &Statement) -> Result<(), BoxError> {
        sqlx::query(statement.sql()).execute(&mut **self).await?;
        Ok(())
    }
}
