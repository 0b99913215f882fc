//! Per-account locks serializing token refreshes.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

#[derive(Debug, Default)]
pub struct AccountLocks {
    locks: RwLock<HashMap<i64, Arc<Mutex<()>>>>,
}

impl AccountLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to an account.
    pub async fn lock(&self, account_id: i64) -> OwnedMutexGuard<()> {
        let mutex = self.get_or_create(account_id).await;
        mutex.lock_owned().await
    }

    /// Drop locks nobody holds or waits on.
    pub async fn prune_idle(&self) {
        self.locks
            .write()
            .await
            .retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }

    async fn get_or_create(&self, account_id: i64) -> Arc<Mutex<()>> {
        {
            let read_guard = self.locks.read().await;
            if let Some(mutex) = read_guard.get(&account_id) {
                return Arc::clone(mutex);
            }
        }

        let mut write_guard = self.locks.write().await;
        Arc::clone(write_guard.entry(account_id).or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_account_is_exclusive() {
        let locks = AccountLocks::new();
        let held = locks.lock(1).await;

        let mutex = locks.get_or_create(1).await;
        assert!(mutex.try_lock().is_err());
        assert!(locks.get_or_create(2).await.try_lock().is_ok());

        drop(held);
        assert!(mutex.try_lock().is_ok());
    }

    #[tokio::test]
    async fn test_prune_keeps_held_locks() {
        let locks = AccountLocks::new();
        let held = locks.lock(1).await;
        drop(locks.lock(2).await);

        locks.prune_idle().await;
        assert_eq!(locks.locks.read().await.len(), 1);

        drop(held);
        locks.prune_idle().await;
        assert!(locks.locks.read().await.is_empty());
    }
}
