use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::config::KeychainConfig;
use crate::contracts::{
    Connection, ConnectionProvider, Keychain, KeychainError, KeychainResult, Operation, QueryKind,
    Statement,
};
use crate::storage::query::PostgreSql;
use crate::storage::upgrade::{self, Held, Probe};

/// Metadata guarded by the keychain lock. Sequence values are never cached
/// here; the store owns them.
#[derive(Default)]
struct Catalog {
    queries: HashMap<QueryKind, Statement>,
    created: bool,
    closed: bool,
}

/// Keychain delegating every sequence to an external relational store.
///
/// Statements are generated lazily, at most once per kind, and each call runs
/// a single atomic statement on a connection taken from the provider. Several
/// instances, in one process or many, may share a table: ordering comes from
/// the store, not from the local lock.
pub struct DurableKeychain<P> {
    start: i64,
    generator: PostgreSql,
    provider: P,
    statement_timeout: Option<Duration>,
    auto_create_table: bool,
    catalog: RwLock<Catalog>,
}

impl<P: ConnectionProvider> DurableKeychain<P> {
    /// Creates a keychain over `provider` using the default table, start 0,
    /// no deadline and lazy table creation.
    pub fn new(provider: P) -> Self {
        Self {
            start: 0,
            generator: PostgreSql::default(),
            provider,
            statement_timeout: None,
            auto_create_table: true,
            catalog: RwLock::new(Catalog::default()),
        }
    }

    /// Creates a keychain configured from `config`.
    pub fn from_config(provider: P, config: &KeychainConfig) -> Self {
        Self::new(provider)
            .with_start(config.start)
            .with_table(config.table.clone())
            .with_statement_timeout(config.statement_timeout())
            .with_auto_create_table(config.auto_create_table)
    }

    /// Sets the start value.
    pub fn with_start(mut self, start: i64) -> Self {
        self.start = start;
        self
    }

    /// Sets the table name.
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.generator = PostgreSql::new(table);
        self
    }

    /// Bounds each remote call, connection acquisition included.
    pub fn with_statement_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.statement_timeout = timeout;
        self
    }

    /// Controls whether operations create the table before first use.
    pub fn with_auto_create_table(mut self, enabled: bool) -> Self {
        self.auto_create_table = enabled;
        self
    }

    pub fn table(&self) -> &str {
        self.generator.table()
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Reserves `count` consecutive values for `key` and returns the greatest.
    ///
    /// The reserved block is `result - count + 1 ..= result`. PostgreSQL
    /// evaluates the insert value `start + count - 1` even when the key
    /// exists, so a start within `count` of `i64::MAX` fails every call.
    pub async fn next_n(&self, key: &str, count: i64) -> KeychainResult<i64> {
        if count < 1 {
            return Err(KeychainError::InvalidArgument(format!(
                "count must be positive, got {}",
                count
            )));
        }
        self.ensure_table().await?;

        let (_held, statement) = self.compiled(QueryKind::NextN).await;
        let value = self
            .fetch(&statement?, Operation::NextN, key, &[count, self.start])
            .await?;
        value.ok_or_else(|| KeychainError::execution(Operation::NextN, key, "no row returned"))
    }

    /// Creates the table if it does not exist.
    ///
    /// The statement runs at most once per keychain; later calls return
    /// immediately.
    pub async fn create_table(&self) -> KeychainResult<()> {
        match upgrade::probe(&self.catalog, |catalog| catalog.created.then_some(())).await {
            Probe::Found(..) => Ok(()),
            Probe::Vacant(mut catalog) => {
                let statement = compile(&mut catalog, &self.generator, QueryKind::CreateTable)?;
                let table = self.generator.table();

                self.within_deadline(Operation::CreateTable, table, async {
                    let mut conn = self.acquire(Operation::CreateTable, table).await?;
                    conn.execute(&statement)
                        .await
                        .map_err(|source| KeychainError::execution(Operation::CreateTable, table, source))
                })
                .await?;

                catalog.created = true;
                tracing::info!(table = %table, "Created sequence table");
                Ok(())
            }
        }
    }

    async fn ensure_table(&self) -> KeychainResult<()> {
        if self.auto_create_table {
            self.create_table().await?;
        }
        Ok(())
    }

    /// Returns the compiled statement for `kind`, holding the catalog lock in
    /// whichever mode it took to find or compile it.
    async fn compiled(&self, kind: QueryKind) -> (Held<'_, Catalog>, KeychainResult<Statement>) {
        upgrade::probe_or_populate(
            &self.catalog,
            |catalog| catalog.queries.get(&kind).cloned().map(Ok),
            |catalog| compile(catalog, &self.generator, kind),
        )
        .await
    }

    async fn acquire(&self, operation: Operation, key: &str) -> KeychainResult<P::Connection> {
        self.provider
            .acquire()
            .await
            .map_err(|source| KeychainError::connection(operation, key, source))
    }

    /// Runs `statement` on a fresh connection. The connection is released
    /// when the call finishes, fails, or is cut off by the deadline.
    async fn fetch(
        &self,
        statement: &Statement,
        operation: Operation,
        key: &str,
        args: &[i64],
    ) -> KeychainResult<Option<i64>> {
        self.within_deadline(operation, key, async {
            let mut conn = self.acquire(operation, key).await?;
            conn.fetch_value(statement, key, args)
                .await
                .map_err(|source| KeychainError::execution(operation, key, source))
        })
        .await
    }

    async fn within_deadline<T>(
        &self,
        operation: Operation,
        key: &str,
        call: impl Future<Output = KeychainResult<T>>,
    ) -> KeychainResult<T> {
        let Some(timeout) = self.statement_timeout else {
            return call.await;
        };

        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    operation = %operation,
                    key = %key,
                    timeout = ?timeout,
                    "Keychain deadline exceeded"
                );
                Err(KeychainError::DeadlineExceeded {
                    operation,
                    key: key.to_owned(),
                    timeout,
                })
            }
        }
    }

    #[cfg(test)]
    async fn compiled_kinds(&self) -> usize {
        self.catalog.read().await.queries.len()
    }
}

/// Generates and caches the statement for `kind` unless it is cached already.
fn compile(
    catalog: &mut Catalog,
    generator: &PostgreSql,
    kind: QueryKind,
) -> KeychainResult<Statement> {
    if let Some(statement) = catalog.queries.get(&kind) {
        return Ok(statement.clone());
    }

    let statement = generator.generate(kind)?;
    tracing::debug!(table = %generator.table(), kind = %kind, "Compiled keychain statement");
    catalog.queries.insert(kind, statement.clone());
    Ok(statement)
}

impl<P: ConnectionProvider> Keychain for DurableKeychain<P> {
    async fn next(&self, key: &str) -> KeychainResult<i64> {
        self.ensure_table().await?;

        let (_held, statement) = self.compiled(QueryKind::Next).await;
        let value = self
            .fetch(&statement?, Operation::Next, key, &[self.start])
            .await?;
        value.ok_or_else(|| KeychainError::execution(Operation::Next, key, "no row returned"))
    }

    async fn last(&self, key: &str) -> KeychainResult<i64> {
        self.ensure_table().await?;

        let (_held, statement) = self.compiled(QueryKind::Last).await;
        let value = self.fetch(&statement?, Operation::Last, key, &[]).await?;
        match value {
            Some(value) => Ok(value),
            // An unused key has no row.
            None => self
                .start
                .checked_sub(1)
                .ok_or_else(|| KeychainError::overflow(Operation::Last, key)),
        }
    }

    async fn forward(&self, key: &str, target: i64) -> KeychainResult<i64> {
        self.ensure_table().await?;

        let (_held, statement) = self.compiled(QueryKind::Forward).await;
        let value = self
            .fetch(&statement?, Operation::Forward, key, &[target])
            .await?;
        value.ok_or_else(|| KeychainError::execution(Operation::Forward, key, "no row returned"))
    }

    async fn close(&self) -> KeychainResult<()> {
        match upgrade::probe(&self.catalog, |catalog| catalog.closed.then_some(())).await {
            Probe::Found(..) => Ok(()),
            Probe::Vacant(mut catalog) => {
                self.provider.close().await.map_err(KeychainError::Close)?;
                catalog.closed = true;
                tracing::info!(table = %self.generator.table(), "Closed durable keychain");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testutil::MemoryStore;

    fn keychain(store: &MemoryStore) -> DurableKeychain<MemoryStore> {
        DurableKeychain::new(store.clone()).with_start(1)
    }

    #[tokio::test]
    async fn next_upserts_from_start() {
        let store = MemoryStore::new();
        let chain = keychain(&store);

        assert_eq!(chain.next("foo").await.unwrap(), 1);
        assert_eq!(chain.next("foo").await.unwrap(), 2);
        assert_eq!(chain.next("bar").await.unwrap(), 1);
        assert_eq!(store.value("foo"), Some(2));
    }

    #[tokio::test]
    async fn last_for_unused_key_is_before_start() {
        let store = MemoryStore::new();
        let chain = keychain(&store);

        assert_eq!(chain.last("never").await.unwrap(), 0);
        assert_eq!(store.value("never"), None);
    }

    #[tokio::test]
    async fn last_reflects_history() {
        let store = MemoryStore::new();
        let chain = keychain(&store);

        for _ in 0..42 {
            chain.next("bar").await.unwrap();
        }
        assert_eq!(chain.last("bar").await.unwrap(), 42);
    }

    #[tokio::test]
    async fn forward_keeps_the_greater_value() {
        let store = MemoryStore::new();
        let chain = keychain(&store);

        assert_eq!(chain.forward("k", 100).await.unwrap(), 100);
        assert_eq!(chain.forward("k", 50).await.unwrap(), 100);
        assert_eq!(chain.next("k").await.unwrap(), 101);
    }

    #[tokio::test]
    async fn next_n_reserves_a_block() {
        let store = MemoryStore::new();
        let chain = keychain(&store);

        assert_eq!(chain.next_n("k", 10).await.unwrap(), 10);
        assert_eq!(chain.next_n("k", 10).await.unwrap(), 20);
        assert_eq!(chain.next("k").await.unwrap(), 21);
        assert!(matches!(
            chain.next_n("k", -1).await,
            Err(KeychainError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn next_n_near_max_start_fails_in_the_store() {
        let store = MemoryStore::new();
        let chain = keychain(&store).with_start(i64::MAX - 1);
        chain.forward("k", 0).await.unwrap();

        let err = chain.next_n("k", 5).await.unwrap_err();
        assert!(matches!(
            err,
            KeychainError::Execution {
                operation: Operation::NextN,
                ..
            }
        ));
        assert_eq!(store.value("k"), Some(0));
        assert_eq!(chain.next_n("k", 1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn statements_compile_once_per_kind() {
        let store = MemoryStore::new();
        let chain = keychain(&store);
        assert_eq!(chain.compiled_kinds().await, 0);

        for _ in 0..5 {
            chain.next("k").await.unwrap();
        }
        // create-table and next
        assert_eq!(chain.compiled_kinds().await, 2);

        chain.last("k").await.unwrap();
        chain.forward("k", 3).await.unwrap();
        chain.next_n("k", 3).await.unwrap();
        assert_eq!(chain.compiled_kinds().await, QueryKind::ALL.len());
    }

    #[tokio::test]
    async fn table_is_created_once() {
        let store = MemoryStore::new();
        let chain = keychain(&store);

        chain.create_table().await.unwrap();
        chain.create_table().await.unwrap();
        chain.next("k").await.unwrap();
        chain.last("k").await.unwrap();

        assert_eq!(store.ddl_runs(), 1);
        assert!(store.table_exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_calls_create_the_table_once() {
        let store = MemoryStore::new();
        let chain = Arc::new(keychain(&store));

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let chain = Arc::clone(&chain);
                tokio::spawn(async move { chain.next("k").await.unwrap() })
            })
            .collect();

        let mut values = Vec::new();
        for handle in handles {
            values.push(handle.await.unwrap());
        }
        values.sort_unstable();

        assert_eq!(values, (1..=32).collect::<Vec<i64>>());
        assert_eq!(store.ddl_runs(), 1);
    }

    #[tokio::test]
    async fn missing_table_without_auto_create_is_an_execution_error() {
        let store = MemoryStore::new();
        let chain = keychain(&store).with_auto_create_table(false);

        let err = chain.next("k").await.unwrap_err();
        assert!(matches!(
            err,
            KeychainError::Execution {
                operation: Operation::Next,
                ..
            }
        ));
        assert_eq!(store.ddl_runs(), 0);

        chain.create_table().await.unwrap();
        assert_eq!(chain.next("k").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_table_creation_is_retried_by_the_next_call() {
        let store = MemoryStore::new();
        let chain = keychain(&store);

        store.fail_execute(true);
        assert!(chain.create_table().await.is_err());
        store.fail_execute(false);

        chain.create_table().await.unwrap();
        assert_eq!(store.ddl_runs(), 1);
    }

    #[tokio::test]
    async fn close_releases_the_provider_once() {
        let store = MemoryStore::new();
        let chain = keychain(&store);

        chain.close().await.unwrap();
        chain.close().await.unwrap();
        assert_eq!(store.closes(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_close_releases_the_provider_once() {
        let store = MemoryStore::new();
        let chain = Arc::new(keychain(&store));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let chain = Arc::clone(&chain);
                tokio::spawn(async move { chain.close().await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.closes(), 1);
    }

    #[tokio::test]
    async fn connection_failure_is_reported_without_state_change() {
        let store = MemoryStore::with_table();
        let chain = keychain(&store).with_auto_create_table(false);

        store.fail_acquire(true);
        let err = chain.next("k").await.unwrap_err();
        assert!(matches!(
            err,
            KeychainError::Connection {
                operation: Operation::Next,
                ..
            }
        ));
        assert_eq!(store.value("k"), None);
    }

    #[tokio::test]
    async fn connections_are_released_on_every_path() {
        let store = MemoryStore::with_table();
        let chain = keychain(&store).with_auto_create_table(false);

        chain.next("k").await.unwrap();
        chain.last("k").await.unwrap();

        store.fail_execute(true);
        let err = chain.forward("k", 10).await.unwrap_err();
        assert!(err.to_string().contains("forward value k"));
        store.fail_execute(false);

        assert_eq!(store.acquired(), 3);
        assert_eq!(store.released(), 3);
    }

    #[tokio::test]
    async fn deadline_exceeded_is_distinct_and_releases_the_connection() {
        let store = MemoryStore::with_table();
        let chain = keychain(&store)
            .with_auto_create_table(false)
            .with_statement_timeout(Some(Duration::from_millis(20)));

        store.set_latency(Some(Duration::from_millis(500)));
        let err = chain.last("k").await.unwrap_err();
        assert!(err.is_deadline_exceeded(), "unexpected error: {}", err);

        assert_eq!(store.acquired(), 1);
        assert_eq!(store.released(), 1);

        store.set_latency(None);
        assert_eq!(chain.last("k").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn invalid_table_fails_generation() {
        let store = MemoryStore::new();
        let chain = keychain(&store).with_table("bad table");

        let err = chain.next("k").await.unwrap_err();
        assert!(matches!(
            err,
            KeychainError::QueryGeneration {
                kind: QueryKind::CreateTable,
                ..
            }
        ));
        assert_eq!(store.statements(), 0);
        assert_eq!(store.acquired(), 0);
    }

    #[tokio::test]
    async fn instances_sharing_a_store_never_duplicate() {
        let store = MemoryStore::new();
        let a = keychain(&store);
        let b = keychain(&store);

        let mut values = Vec::new();
        for _ in 0..10 {
            values.push(a.next("k").await.unwrap());
            values.push(b.next("k").await.unwrap());
        }
        assert_eq!(values, (1..=20).collect::<Vec<i64>>());
        assert_eq!(b.last("k").await.unwrap(), 20);
    }

    #[tokio::test]
    async fn held_lock_reflects_catalog() {
        let store = MemoryStore::new();
        let chain = keychain(&store);
        chain.create_table().await.unwrap();

        let (held, statement) = chain.compiled(QueryKind::Last).await;
        assert!(held.created);
        assert_eq!(statement.unwrap().kind(), QueryKind::Last);
    }
}
