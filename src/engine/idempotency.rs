// ============================================================================
// Idempotency Cache
// Deduplicates retried submissions carrying a client token
// ============================================================================

use crate::domain::MatchingEngineConfig;
use crate::interfaces::CoordinationService;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

pub fn result_key(token: &str) -> String {
    format!("idempotency:{token}")
}

pub fn in_flight_key(token: &str) -> String {
    format!("idempotency:inflight:{token}")
}

/// Outcome of claiming a token before executing a request.
#[derive(Debug, Clone, PartialEq)]
pub enum Claim<T> {
    /// A previous execution finished; return its result.
    Cached(T),
    /// The caller owns the token and must call `complete` or `abandon`.
    Owner,
    /// Another execution kept the token past the wait bound.
    Busy,
}

struct LocalEntry<T> {
    value: T,
    expires_at: Instant,
}

struct LocalState<T> {
    entries: HashMap<String, LocalEntry<T>>,
    order: VecDeque<String>,
    in_flight: HashSet<String>,
}

/// Two-tier result cache: a bounded local map in front of the shared
/// coordination store. In-flight tokens are marked in both tiers so a
/// concurrent duplicate waits for the first result instead of re-executing.
pub struct IdempotencyCache<T> {
    local: Mutex<LocalState<T>>,
    coordination: Arc<dyn CoordinationService>,
    ttl: Duration,
    max_entries: usize,
    wait: Duration,
    in_flight_ttl: Duration,
}

impl<T> IdempotencyCache<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync,
{
    pub fn new(coordination: Arc<dyn CoordinationService>, config: &MatchingEngineConfig) -> Self {
        Self {
            local: Mutex::new(LocalState {
                entries: HashMap::new(),
                order: VecDeque::new(),
                in_flight: HashSet::new(),
            }),
            coordination,
            ttl: config.idempotency_ttl(),
            max_entries: config.idempotency_max_entries.max(1),
            wait: config.idempotency_wait(),
            in_flight_ttl: config.lock_lease(),
        }
    }

    /// Return a cached result, or make the caller the token's owner, waiting
    /// up to the configured bound while another execution holds it.
    pub async fn claim(&self, token: &str) -> Claim<T> {
        let deadline = Instant::now() + self.wait;
        loop {
            if let Some(value) = self.lookup(token).await {
                return Claim::Cached(value);
            }
            if self.try_mark_in_flight(token).await {
                // The previous owner may have finished between the two steps
                if let Some(value) = self.lookup(token).await {
                    self.unmark_in_flight(token).await;
                    return Claim::Cached(value);
                }
                return Claim::Owner;
            }
            if Instant::now() >= deadline {
                tracing::warn!(token, "Idempotent request still in flight elsewhere");
                return Claim::Busy;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Cache `value` under `token` and release the in-flight mark.
    pub async fn complete(&self, token: &str, value: &T) {
        self.store_local(token, value.clone());

        if self.coordination.is_ready() {
            match serde_json::to_string(value) {
                Ok(raw) => {
                    if let Err(err) = self
                        .coordination
                        .set(&result_key(token), &raw, Some(self.ttl))
                        .await
                    {
                        tracing::warn!(token, error = %err, "Failed to share idempotent result");
                    }
                },
                Err(err) => tracing::warn!(token, error = %err, "Failed to encode idempotent result"),
            }
        }

        self.unmark_in_flight(token).await;
    }

    /// Release the in-flight mark without caching, so a retry executes again.
    pub async fn abandon(&self, token: &str) {
        self.unmark_in_flight(token).await;
    }

    async fn lookup(&self, token: &str) -> Option<T> {
        if let Some(value) = self.lookup_local(token) {
            return Some(value);
        }
        if !self.coordination.is_ready() {
            return None;
        }
        let raw = match self.coordination.get(&result_key(token)).await {
            Ok(raw) => raw?,
            Err(err) => {
                tracing::warn!(token, error = %err, "Shared idempotency lookup failed");
                return None;
            },
        };
        match serde_json::from_str::<T>(&raw) {
            Ok(value) => {
                self.store_local(token, value.clone());
                Some(value)
            },
            Err(err) => {
                tracing::warn!(token, error = %err, "Discarding unreadable idempotent result");
                None
            },
        }
    }

    fn lookup_local(&self, token: &str) -> Option<T> {
        let now = Instant::now();
        let mut local = self.local.lock();
        match local.entries.get(token) {
            Some(entry) if entry.expires_at > now => Some(entry.value.clone()),
            Some(_) => {
                local.entries.remove(token);
                None
            },
            None => None,
        }
    }

    fn store_local(&self, token: &str, value: T) {
        let now = Instant::now();
        let mut local = self.local.lock();
        let replaced = local
            .entries
            .insert(
                token.to_string(),
                LocalEntry {
                    value,
                    expires_at: now + self.ttl,
                },
            )
            .is_some();
        if !replaced {
            local.order.push_back(token.to_string());
        }

        if local.entries.len() > self.max_entries {
            local.entries.retain(|_, entry| entry.expires_at > now);
        }
        while local.entries.len() > self.max_entries {
            let Some(oldest) = local.order.pop_front() else {
                break;
            };
            local.entries.remove(&oldest);
        }
        if local.order.len() > self.max_entries.saturating_mul(2) {
            let LocalState { entries, order, .. } = &mut *local;
            order.retain(|key| entries.contains_key(key));
        }
    }

    async fn try_mark_in_flight(&self, token: &str) -> bool {
        if !self.local.lock().in_flight.insert(token.to_string()) {
            return false;
        }
        if !self.coordination.is_ready() {
            return true;
        }
        match self
            .coordination
            .set_nx(&in_flight_key(token), "1", self.in_flight_ttl)
            .await
        {
            Ok(true) => true,
            Ok(false) => {
                self.local.lock().in_flight.remove(token);
                false
            },
            Err(err) => {
                tracing::warn!(token, error = %err, "Shared in-flight mark failed");
                true
            },
        }
    }

    async fn unmark_in_flight(&self, token: &str) {
        self.local.lock().in_flight.remove(token);
        if self.coordination.is_ready() {
            if let Err(err) = self.coordination.del(&in_flight_key(token)).await {
                tracing::warn!(token, error = %err, "Failed to clear in-flight mark");
            }
        }
    }

    #[cfg(test)]
    fn local_len(&self) -> usize {
        self.local.lock().entries.len()
    }
}
