use std::future::Future;

use crate::contracts::error::KeychainResult;

/// Named, strictly monotonic integer sequences shared by concurrent callers.
///
/// # Invariants
/// - No two `next(key)` calls return the same value
/// - `forward(key, target)` never returns less than `target` nor less than
///   any value previously returned for `key`
/// - `last(key)` is `start - 1` for an unused key, otherwise the greatest
///   value returned so far
///
/// Every method is safe to call concurrently, for any mix of keys.
pub trait Keychain: Send + Sync {
    /// Returns a value greater than every value previously returned for `key`
    /// by `next` or `forward`. The first call for an unused key returns the
    /// keychain's start value.
    fn next(&self, key: &str) -> impl Future<Output = KeychainResult<i64>> + Send;

    /// Returns the greatest value returned for `key` so far without advancing it.
    fn last(&self, key: &str) -> impl Future<Output = KeychainResult<i64>> + Send;

    /// Advances `key` to at least `target` and returns the resulting value.
    /// A key already at or past `target` is returned unchanged.
    fn forward(&self, key: &str, target: i64) -> impl Future<Output = KeychainResult<i64>> + Send;

    /// Releases resources owned by the keychain.
    /// Repeated calls succeed without releasing anything twice.
    fn close(&self) -> impl Future<Output = KeychainResult<()>> + Send;
}
