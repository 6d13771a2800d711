//! In-process stand-in for the durable store.
//!
//! [`MemoryStore`] implements [`ConnectionProvider`] and executes compiled
//! statements by kind against a shared map, each statement atomically, the way
//! the PostgreSQL upserts behave. It counts acquires, releases, DDL runs and
//! closes, and can inject failures and latency.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::contracts::{BoxError, Connection, ConnectionProvider, QueryKind, Statement};

#[derive(Default)]
struct Shared {
    /// `None` until a create-table statement runs.
    rows: Mutex<Option<HashMap<String, i64>>>,
    acquired: AtomicUsize,
    released: AtomicUsize,
    ddl_runs: AtomicUsize,
    statements: AtomicUsize,
    closes: AtomicUsize,
    fail_acquire: AtomicBool,
    fail_execute: AtomicBool,
    latency: Mutex<Option<Duration>>,
}

/// Fake durable store shared by every clone.
#[derive(Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    /// Creates a store whose table does not exist yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store whose table already exists.
    pub fn with_table() -> Self {
        let store = Self::new();
        *store.rows() = Some(HashMap::new());
        store
    }

    fn rows(&self) -> std::sync::MutexGuard<'_, Option<HashMap<String, i64>>> {
        self.shared.rows.lock().expect("rows lock poisoned")
    }

    /// Returns the stored value for `key`.
    pub fn value(&self, key: &str) -> Option<i64> {
        self.rows().as_ref().and_then(|rows| rows.get(key).copied())
    }

    pub fn table_exists(&self) -> bool {
        self.rows().is_some()
    }

    pub fn acquired(&self) -> usize {
        self.shared.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.shared.released.load(Ordering::SeqCst)
    }

    /// Number of create-table statements executed.
    pub fn ddl_runs(&self) -> usize {
        self.shared.ddl_runs.load(Ordering::SeqCst)
    }

    /// Number of statements that reached the store, DDL included.
    pub fn statements(&self) -> usize {
        self.shared.statements.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }

    /// Makes every subsequent acquire fail.
    pub fn fail_acquire(&self, fail: bool) {
        self.shared.fail_acquire.store(fail, Ordering::SeqCst);
    }

    /// Makes every subsequent statement fail.
    pub fn fail_execute(&self, fail: bool) {
        self.shared.fail_execute.store(fail, Ordering::SeqCst);
    }

    /// Delays every statement by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.shared.latency.lock().expect("latency lock poisoned") = latency;
    }
}

impl ConnectionProvider for MemoryStore {
    type Connection = MemoryConnection;

    async fn acquire(&self) -> Result<MemoryConnection, BoxError> {
        if self.shared.fail_acquire.load(Ordering::SeqCst) {
            return Err("connection refused".into());
        }
        if self.shared.closes.load(Ordering::SeqCst) > 0 {
            return Err("pool closed".into());
        }
        self.shared.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryConnection {
            store: self.clone(),
        })
    }

    async fn close(&self) -> Result<(), BoxError> {
        self.shared.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Connection handed out by [`MemoryStore`]; dropping it counts a release.
pub struct MemoryConnection {
    store: MemoryStore,
}

impl MemoryConnection {
    async fn before_statement(&self) -> Result<(), BoxError> {
        let latency = *self
            .store
            .shared
            .latency
            .lock()
            .expect("latency lock poisoned");
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.store.shared.statements.fetch_add(1, Ordering::SeqCst);
        if self.store.shared.fail_execute.load(Ordering::SeqCst) {
            return Err("statement failed".into());
        }
        Ok(())
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.store.shared.released.fetch_add(1, Ordering::SeqCst);
    }
}

fn arg(args: &[i64], index: usize) -> Result<i64, BoxError> {
    args.get(index)
        .copied()
        .ok_or_else(|| format!("missing parameter ${}", index + 2).into())
}

impl Connection for MemoryConnection {
    async fn fetch_value(
        &mut self,
        statement: &Statement,
        key: &str,
        args: &[i64],
    ) -> Result<Option<i64>, BoxError> {
        self.before_statement().await?;

        let mut guard = self.store.rows();
        let rows = guard.as_mut().ok_or("relation does not exist")?;

        let value = match statement.kind() {
            QueryKind::Next => {
                let start = arg(args, 0)?;
                let value = match rows.get(key) {
                    Some(current) => current.checked_add(1).ok_or("bigint out of range")?,
                    None => start,
                };
                rows.insert(key.to_owned(), value);
                Some(value)
            }
            QueryKind::NextN => {
                let count = arg(args, 0)?;
                let start = arg(args, 1)?;
                // The insert value is computed before the conflict check.
                let inserted = start.checked_add(count - 1).ok_or("bigint out of range")?;
                let value = match rows.get(key) {
                    Some(current) => current.checked_add(count).ok_or("bigint out of range")?,
                    None => inserted,
                };
                rows.insert(key.to_owned(), value);
                Some(value)
            }
            QueryKind::Last => rows.get(key).copied(),
            QueryKind::Forward => {
                let target = arg(args, 0)?;
                let value = rows.get(key).map_or(target, |current| (*current).max(target));
                rows.insert(key.to_owned(), value);
                Some(value)
            }
            QueryKind::CreateTable => return Err("create table returns no rows".into()),
        };

        Ok(value)
    }

    async fn execute(&mut self, statement: &Statement) -> Result<(), BoxError> {
        self.before_statement().await?;

        match statement.kind() {
            QueryKind::CreateTable => {
                self.store.shared.ddl_runs.fetch_add(1, Ordering::SeqCst);
                let mut rows = self.store.rows();
                if rows.is_none() {
                    *rows = Some(HashMap::new());
                }
                Ok(())
            }
            other => Err(format!("{} query must be fetched", other).into()),
        }
    }
}
