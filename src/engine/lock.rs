// ============================================================================
// Per-Book Lock Coordinator
// In-process FIFO exclusion combined with a leased cross-instance lock
// ============================================================================

use crate::domain::{BookKey, MatchingEngineConfig};
use crate::error::OrderError;
use crate::interfaces::CoordinationService;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Distributed lock key for one book.
pub fn lock_key(key: &BookKey) -> String {
    format!("orderbook:lock:{}:{}", key.market_key, key.outcome_index)
}

#[derive(Debug, Clone, Copy)]
struct LockPolicy {
    lease: Duration,
    max_retries: u32,
    backoff: Duration,
    local_timeout: Duration,
}

/// Serializes every mutation of a given book.
///
/// Waiters queue on a fair (FIFO) async mutex per book key. Once the local
/// slot is held, the cross-instance lease is taken if the coordination
/// service is ready; a ready service that cannot grant the lease yields
/// `OrderbookBusy`.
pub struct BookLocks {
    local: Mutex<HashMap<BookKey, Arc<AsyncMutex<()>>>>,
    coordination: Arc<dyn CoordinationService>,
    policy: LockPolicy,
}

impl BookLocks {
    pub fn new(coordination: Arc<dyn CoordinationService>, config: &MatchingEngineConfig) -> Self {
        Self {
            local: Mutex::new(HashMap::new()),
            coordination,
            policy: LockPolicy {
                lease: config.lock_lease(),
                max_retries: config.lock_max_retries,
                backoff: config.lock_retry_backoff(),
                local_timeout: config.local_lock_timeout(),
            },
        }
    }

    fn slot(&self, key: &BookKey) -> Arc<AsyncMutex<()>> {
        let mut local = self.local.lock();
        Arc::clone(
            local
                .entry(key.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    pub async fn acquire(&self, key: &BookKey) -> Result<BookLockGuard, OrderError> {
        let slot = self.slot(key);
        let local = tokio::time::timeout(self.policy.local_timeout, slot.lock_owned())
            .await
            .map_err(|_| {
                tracing::warn!(book = %key, "Timed out waiting for local book lock");
                OrderError::OrderbookBusy
            })?;

        let mut guard = BookLockGuard {
            key: key.clone(),
            local: Some(local),
            distributed: None,
            coordination: Arc::clone(&self.coordination),
        };

        if !self.coordination.is_ready() {
            return Ok(guard);
        }

        let resource = lock_key(key);
        match self
            .coordination
            .acquire_lock(
                &resource,
                self.policy.lease,
                self.policy.max_retries,
                self.policy.backoff,
            )
            .await
        {
            Ok(Some(token)) => {
                guard.distributed = Some((resource, token));
                Ok(guard)
            },
            Ok(None) => {
                tracing::warn!(book = %key, "Distributed book lock contended");
                Err(OrderError::OrderbookBusy)
            },
            Err(err) => {
                tracing::warn!(book = %key, error = %err, "Distributed book lock failed");
                Err(OrderError::OrderbookBusy)
            },
        }
    }

    /// Drop the local slot of a book nobody is waiting on.
    pub fn forget(&self, key: &BookKey) {
        let mut local = self.local.lock();
        if local.get(key).is_some_and(|slot| Arc::strong_count(slot) == 1) {
            local.remove(key);
        }
    }

    #[cfg(test)]
    pub(crate) fn slot_count(&self) -> usize {
        self.local.lock().len()
    }
}

/// Holds a book's exclusive section. Call [`BookLockGuard::release`] on
/// every path; dropping the guard releases the local slot at once and the
/// lease in a background task.
pub struct BookLockGuard {
    key: BookKey,
    local: Option<OwnedMutexGuard<()>>,
    distributed: Option<(String, String)>,
    coordination: Arc<dyn CoordinationService>,
}

impl BookLockGuard {
    pub fn key(&self) -> &BookKey {
        &self.key
    }

    pub async fn release(mut self) {
        if let Some((resource, token)) = self.distributed.take() {
            release_lease(self.coordination.as_ref(), &resource, &token).await;
        }
        self.local.take();
    }
}

async fn release_lease(coordination: &dyn CoordinationService, resource: &str, token: &str) {
    match coordination.release_lock(resource, token).await {
        Ok(true) => {},
        Ok(false) => tracing::warn!(resource, "Book lease expired before release"),
        Err(err) => tracing::warn!(resource, error = %err, "Failed to release book lease"),
    }
}

impl Drop for BookLockGuard {
    fn drop(&mut self) {
        let Some((resource, token)) = self.distributed.take() else {
            return;
        };
        let coordination = Arc::clone(&self.coordination);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    release_lease(coordination.as_ref(), &resource, &token).await;
                });
            },
            Err(_) => tracing::warn!(resource, "No runtime to release book lease; it will lapse"),
        }
    }
}
