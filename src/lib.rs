//! Named, strictly monotonic integer sequences shared by concurrent callers.
//!
//! A [`Keychain`](contracts::Keychain) hands out per-key values that never
//! repeat and never go backwards. Two implementations satisfy it:
//!
//! | Keychain | Storage | Scope |
//! |----------|---------|-------|
//! | [`VolatileKeychain`](storage::VolatileKeychain) | process memory | one process |
//! | [`DurableKeychain`](storage::DurableKeychain) | PostgreSQL table | any number of processes |
//!
//! [`KeychainBackend`](storage::KeychainBackend) picks one from
//! [`KeychainConfig`](config::KeychainConfig).
//!
//! ```
//! use serialkey::contracts::Keychain;
//! use serialkey::storage::VolatileKeychain;
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let chain = VolatileKeychain::starting_from(1);
//! assert_eq!(chain.next("invoice").await.unwrap(), 1);
//! assert_eq!(chain.forward("invoice", 100).await.unwrap(), 100);
//! assert_eq!(chain.next("invoice").await.unwrap(), 101);
//! assert_eq!(chain.last("ticket").await.unwrap(), 0);
//! # });
//! ```

pub mod config;
pub mod contracts;
pub mod storage;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
