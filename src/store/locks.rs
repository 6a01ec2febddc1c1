//! Per-account mutual exclusion
//!
//! Reconciliation holds an account's lock across read, snapshot replace and
//! feature sync. Different accounts never contend.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::store::AccountId;

/// Idle entries are pruned once the table grows past this many accounts
const PRUNE_THRESHOLD: usize = 1024;

/// Lock table keyed by account id
#[derive(Debug, Default)]
pub struct AccountLocks {
    locks: Mutex<HashMap<AccountId, Arc<AsyncMutex<()>>>>,
}

impl AccountLocks {
    /// Create an empty lock table
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to an account
    ///
    /// The guard releases the account when dropped.
    pub async fn lock(&self, id: AccountId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            if locks.len() > PRUNE_THRESHOLD {
                // Only the table holds a reference to an idle lock
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks.entry(id).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Number of tracked accounts
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    /// Check if no account is tracked
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
