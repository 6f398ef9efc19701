//! Lock keys for per-domain mutual exclusion, and the in-process keyed lock.
//!
//! Two invocations racing on the same (job, domain) pair serialize on a
//! 63-bit key derived from `"{job_id}:{domain}"`. Postgres takes the key as
//! a transaction-scoped advisory lock; the in-memory store uses
//! [`KeyedLocks`]. Distinct pairs that collide on a key only serialize
//! more than necessary.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;

use crate::model::JobId;

const POSITIVE_I64_MASK: u64 = i64::MAX as u64;

/// Non-negative 63-bit lock key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockKey(i64);

impl LockKey {
    /// Key guarding the result row of `domain` within `job_id`.
    pub fn for_result(job_id: JobId, domain: &str) -> Self {
        Self::hash(&format!("{job_id}:{domain}"))
    }

    /// Multiply-accumulate string hash, masked to the positive `i64` range
    /// after every step. Runs over UTF-16 code units.
    pub fn hash(input: &str) -> Self {
        let hash = input.encode_utf16().fold(0u64, |acc, unit| {
            acc.wrapping_mul(31).wrapping_add(u64::from(unit)) & POSITIVE_I64_MASK
        });
        Self(hash as i64)
    }

    pub fn value(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for LockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

type LockTable = Arc<Mutex<HashMap<LockKey, Arc<tokio::sync::Mutex<()>>>>>;

/// Blocking keyed mutex for a single process. Waiters on the same key are
/// served in FIFO order.
#[derive(Debug, Clone, Default)]
pub struct KeyedLocks {
    table: LockTable,
}

/// Held lock on one key. Released on drop.
#[derive(Debug)]
pub struct KeyedGuard {
    key: LockKey,
    table: LockTable,
    _guard: OwnedMutexGuard<()>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until `key` is held exclusively by the caller.
    pub async fn acquire(&self, key: LockKey) -> KeyedGuard {
        let mutex = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(table.entry(key).or_default())
        };
        let guard = mutex.lock_owned().await;
        KeyedGuard {
            key,
            table: Arc::clone(&self.table),
            _guard: guard,
        }
    }

    /// Number of keys currently tracked (held or awaited).
    pub fn tracked(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl KeyedGuard {
    pub fn key(&self) -> LockKey {
        self.key
    }
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        // Table entry plus the one inside our guard: nobody else is waiting.
        if table
            .get(&self.key)
            .is_some_and(|mutex| Arc::strong_count(mutex) <= 2)
        {
            table.remove(&self.key);
        }
    }
}
