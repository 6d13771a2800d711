//! Keychain configuration read from the environment.

use std::time::Duration;

use crate::storage::DEFAULT_TABLE;

/// Configuration for building a keychain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeychainConfig {
    /// PostgreSQL URL; `None` selects the volatile keychain.
    pub database_url: Option<String>,
    /// Table holding the durable sequences.
    pub table: String,
    /// Value issued by the first `next` of every key.
    pub start: i64,
    /// Maximum pooled connections.
    pub max_connections: u32,
    /// Time to wait for a pooled connection, in milliseconds.
    pub acquire_timeout_ms: u64,
    /// Deadline for each remote call, in milliseconds.
    pub statement_timeout_ms: Option<u64>,
    /// Create the table before first use.
    pub auto_create_table: bool,
}

impl Default for KeychainConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            table: DEFAULT_TABLE.into(),
            start: 0,
            max_connections: 10,
            acquire_timeout_ms: 5_000,
            statement_timeout_ms: None,
            auto_create_table: true,
        }
    }
}

impl KeychainConfig {
    /// Creates a KeychainConfig from environment variables.
    ///
    /// Environment variables:
    /// - `SERIALKEY_DATABASE_URL`: PostgreSQL URL (default: unset, volatile keychain)
    /// - `SERIALKEY_TABLE`: table name (default: serialkeys)
    /// - `SERIALKEY_START`: start value (default: 0)
    /// - `SERIALKEY_MAX_CONNECTIONS`: pool size (default: 10)
    /// - `SERIALKEY_ACQUIRE_TIMEOUT_MS`: pool acquire timeout (default: 5000)
    /// - `SERIALKEY_STATEMENT_TIMEOUT_MS`: per-call deadline (default: unset)
    /// - `SERIALKEY_AUTO_CREATE_TABLE`: create the table lazily (default: true)
    ///
    /// Invalid values fall back to the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let default = Self::default();
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        Self {
            database_url: non_empty("SERIALKEY_DATABASE_URL"),
            table: non_empty("SERIALKEY_TABLE").unwrap_or(default.table),
            start: lookup("SERIALKEY_START")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default.start),
            max_connections: lookup("SERIALKEY_MAX_CONNECTIONS")
                .and_then(|v| v.trim().parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(default.max_connections),
            acquire_timeout_ms: lookup("SERIALKEY_ACQUIRE_TIMEOUT_MS")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default.acquire_timeout_ms),
            statement_timeout_ms: lookup("SERIALKEY_STATEMENT_TIMEOUT_MS")
                .and_then(|v| v.trim().parse().ok())
                .or(default.statement_timeout_ms),
            auto_create_table: lookup("SERIALKEY_AUTO_CREATE_TABLE")
                .and_then(|v| parse_bool(&v))
                .unwrap_or(default.auto_create_table),
        }
    }

    /// Returns the per-call deadline.
    pub fn statement_timeout(&self) -> Option<Duration> {
        self.statement_timeout_ms.map(Duration::from_millis)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
