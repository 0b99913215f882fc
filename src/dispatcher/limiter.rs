//! Per-account concurrency limiting for dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};

/// Per-account limiter using semaphores.
///
/// At most `per_account_limit` publishes run concurrently for any one
/// connected account, so a post fanned out to many pages of one account
/// does not burst that account's API quota.
#[derive(Debug)]
pub struct AccountLimiter {
    per_account_limit: usize,
    semaphores: RwLock<HashMap<i64, Arc<Semaphore>>>,
}

impl AccountLimiter {
    #[must_use]
    pub fn new(per_account_limit: usize) -> Self {
        Self {
            per_account_limit: per_account_limit.max(1),
            semaphores: RwLock::new(HashMap::new()),
        }
    }

    /// Wait for a permit for the given account.
    ///
    /// Returns `None` only if the semaphore was closed, which never happens
    /// while the limiter is alive.
    pub async fn acquire(&self, account_id: i64) -> Option<OwnedSemaphorePermit> {
        let semaphore = self.get_or_create_semaphore(account_id).await;
        semaphore.acquire_owned().await.ok()
    }

    /// Take a permit without waiting.
    pub async fn try_acquire(&self, account_id: i64) -> Option<OwnedSemaphorePermit> {
        let semaphore = self.get_or_create_semaphore(account_id).await;
        semaphore.try_acquire_owned().ok()
    }

    /// Drop semaphores with no permit out and nobody waiting.
    pub async fn prune_idle(&self) {
        self.semaphores
            .write()
            .await
            .retain(|_, sem| Arc::strong_count(sem) > 1);
    }

    async fn get_or_create_semaphore(&self, account_id: i64) -> Arc<Semaphore> {
        {
            let read_guard = self.semaphores.read().await;
            if let Some(sem) = read_guard.get(&account_id) {
                return Arc::clone(sem);
            }
        }

        let mut write_guard = self.semaphores.write().await;
        // Another task may have created it between the two locks
        if let Some(sem) = write_guard.get(&account_id) {
            return Arc::clone(sem);
        }

        let semaphore = Arc::new(Semaphore::new(self.per_account_limit));
        write_guard.insert(account_id, Arc::clone(&semaphore));
        semaphore
    }
}
