//! Keychain backend chosen at startup from configuration.

use crate::config::KeychainConfig;
use crate::contracts::{Keychain, KeychainResult};
use crate::storage::{DurableKeychain, PgProvider, VolatileKeychain};

/// Keychain backed by process memory or by PostgreSQL.
pub enum KeychainBackend {
    /// In-process sequences, lost on exit
    Volatile(VolatileKeychain),
    /// Sequences stored in a PostgreSQL table
    Postgres(DurableKeychain<PgProvider>),
}

impl KeychainBackend {
    /// Creates a volatile backend.
    pub fn volatile(keychain: VolatileKeychain) -> Self {
        Self::Volatile(keychain)
    }

    /// Creates a PostgreSQL backend.
    pub fn postgres(keychain: DurableKeychain<PgProvider>) -> Self {
        Self::Postgres(keychain)
    }

    /// Builds the backend described by `config`: PostgreSQL when a database
    /// URL is configured, process memory otherwise.
    pub async fn connect(config: &KeychainConfig) -> KeychainResult<Self> {
        match config.database_url.as_deref() {
            Some(url) => {
                let provider = PgProvider::connect(url, config).await?;
                tracing::info!(
                    table = %config.table,
                    start = config.start,
                    "Using PostgreSQL keychain"
                );
                Ok(Self::postgres(DurableKeychain::from_config(provider, config)))
            }
            None => {
                tracing::info!(
                    start = config.start,
                    "Database URL not configured, using volatile keychain"
                );
                Ok(Self::volatile(VolatileKeychain::starting_from(config.start)))
            }
        }
    }

    /// Returns whether sequences survive the process.
    pub fn is_durable(&self) -> bool {
        matches!(self, Self::Postgres(_))
    }

    /// Reserves `count` consecutive values for `key` and returns the greatest.
    pub async fn next_n(&self, key: &str, count: i64) -> KeychainResult<i64> {
        match self {
            Self::Volatile(k) => k.next_n(key, count).await,
            Self::Postgres(k) => k.next_n(key, count).await,
        }
    }
}

impl Keychain for KeychainBackend {
    async fn next(&self, key: &str) -> KeychainResult<i64> {
        match self {
            Self::Volatile(k) => k.next(key).await,
            Self::Postgres(k) => k.next(key).await,
        }
    }

    async fn last(&self, key: &str) -> KeychainResult<i64> {
        match self {
            Self::Volatile(k) => k.last(key).await,
            Self::Postgres(k) => k.last(key).await,
        }
    }

    async fn forward(&self, key: &str, target: i64) -> KeychainResult<i64> {
        match self {
            Self::Volatile(k) => k.forward(key, target).await,
            Self::Postgres(k) => k.forward(key, target).await,
        }
    }

    async fn close(&self) -> KeychainResult<()> {
        match self {
            Self::Volatile(k) => k.close().await,
            Self::Postgres(k) => k.close().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_url_selects_volatile() {
        let config = KeychainConfig {
            start: 5,
            ..KeychainConfig::default()
        };
        let backend = KeychainBackend::connect(&config).await.unwrap();
        assert!(!backend.is_durable());
        assert_eq!(backend.last("k").await.unwrap(), 4);
        assert_eq!(backend.next("k").await.unwrap(), 5);
        assert_eq!(backend.next_n("k", 3).await.unwrap(), 8);
        assert_eq!(backend.forward("k", 2).await.unwrap(), 8);
        backend.close().await.unwrap();
    }
}
