use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use tokio::sync::RwLock;

use crate::contracts::{Keychain, KeychainError, KeychainResult, Operation};
use crate::storage::upgrade::{self, Probe};

/// Keychain holding every sequence in process memory.
///
/// Each key owns an atomic cell, so the hot path only takes the directory
/// lock in shared mode and increments the cell without contending with other
/// keys. The directory lock is taken exclusively only to create or overwrite
/// a cell.
pub struct VolatileKeychain {
    start: i64,
    cells: RwLock<HashMap<String, AtomicI64>>,
}

impl VolatileKeychain {
    /// Creates a keychain whose sequences start at 0.
    pub fn new() -> Self {
        Self::starting_from(0)
    }

    /// Creates a keychain whose sequences start at `start`.
    pub fn starting_from(start: i64) -> Self {
        Self {
            start,
            cells: RwLock::new(HashMap::new()),
        }
    }

    /// Reserves `count` consecutive values for `key` and returns the greatest.
    ///
    /// The reserved block is `result - count + 1 ..= result`; for an unused
    /// key it begins at the start value.
    pub async fn next_n(&self, key: &str, count: i64) -> KeychainResult<i64> {
        if count < 1 {
            return Err(KeychainError::InvalidArgument(format!(
                "count must be positive, got {}",
                count
            )));
        }

        let start = self.start;
        let (_held, value) = upgrade::probe_or_populate(
            &self.cells,
            |cells| cells.get(key).map(|cell| advance(cell, count)),
            |cells| {
                let first_block_end = start.checked_add(count - 1)?;
                cells.insert(key.to_owned(), AtomicI64::new(first_block_end));
                Some(first_block_end)
            },
        )
        .await;

        value.ok_or_else(|| KeychainError::overflow(Operation::NextN, key))
    }

    /// Returns the number of keys used so far.
    pub async fn len(&self) -> usize {
        self.cells.read().await.len()
    }

    /// Returns true if no key has been used.
    pub async fn is_empty(&self) -> bool {
        self.cells.read().await.is_empty()
    }
}

impl Default for VolatileKeychain {
    fn default() -> Self {
        Self::new()
    }
}

/// Adds `by` to the cell, returning the new value or `None` on overflow.
fn advance(cell: &AtomicI64, by: i64) -> Option<i64> {
    cell.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
        current.checked_add(by)
    })
    .ok()
    .map(|previous| previous + by)
}

impl Keychain for VolatileKeychain {
    async fn next(&self, key: &str) -> KeychainResult<i64> {
        let start = self.start;
        let (_held, value) = upgrade::probe_or_populate(
            &self.cells,
            |cells| cells.get(key).map(|cell| advance(cell, 1)),
            |cells| {
                // The first value issued for a key is the start value itself.
                cells.insert(key.to_owned(), AtomicI64::new(start));
                Some(start)
            },
        )
        .await;

        value.ok_or_else(|| KeychainError::overflow(Operation::Next, key))
    }

    async fn last(&self, key: &str) -> KeychainResult<i64> {
        let cells = self.cells.read().await;
        match cells.get(key) {
            Some(cell) => Ok(cell.load(Ordering::Acquire)),
            None => self
                .start
                .checked_sub(1)
                .ok_or_else(|| KeychainError::overflow(Operation::Last, key)),
        }
    }

    async fn forward(&self, key: &str, target: i64) -> KeychainResult<i64> {
        let current = |cells: &HashMap<String, AtomicI64>| {
            cells
                .get(key)
                .map(|cell| cell.load(Ordering::Acquire))
                .filter(|value| *value >= target)
        };

        match upgrade::probe(&self.cells, current).await {
            Probe::Found(_, value) => Ok(value),
            Probe::Vacant(mut cells) => {
                // The re-probe missed, so any existing cell is below target.
                match cells.get(key) {
                    Some(cell) => cell.store(target, Ordering::Release),
                    None => {
                        cells.insert(key.to_owned(), AtomicI64::new(target));
                    }
                }
                Ok(target)
            }
        }
    }

    async fn close(&self) -> KeychainResult<()> {
        Ok(())
    }
}
