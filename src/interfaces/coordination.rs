// ============================================================================
// Coordination Service Interface
// Distributed lock, TTL key/value cache and append-only lists shared by
// every engine instance
// ============================================================================

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::CoordinationError;

pub type CoordinationResult<T> = Result<T, CoordinationError>;

#[async_trait]
pub trait CoordinationService: Send + Sync {
    /// Whether the service is reachable. When it is not, callers degrade to
    /// process-local behavior.
    fn is_ready(&self) -> bool {
        true
    }

    /// Set `key` only if absent. Returns whether the value was written.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> CoordinationResult<bool>;

    async fn get(&self, key: &str) -> CoordinationResult<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CoordinationResult<()>;

    async fn del(&self, key: &str) -> CoordinationResult<bool>;

    /// Delete `key` only if it still holds `expected`.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> CoordinationResult<bool>;

    /// Prepend to a list; the newest element is at index 0.
    async fn list_push_front(&self, key: &str, value: &str) -> CoordinationResult<()>;

    /// Keep only the first `max_len` elements.
    async fn list_trim(&self, key: &str, max_len: usize) -> CoordinationResult<()>;

    /// Up to `limit` elements from the front (newest first).
    async fn list_range(&self, key: &str, limit: usize) -> CoordinationResult<Vec<String>>;

    async fn expire(&self, key: &str, ttl: Duration) -> CoordinationResult<()>;

    /// Acquire a leased lock, retrying with a fixed backoff. Returns the
    /// owner token, or `None` if the lock stayed contended.
    async fn acquire_lock(
        &self,
        key: &str,
        lease: Duration,
        max_retries: u32,
        backoff: Duration,
    ) -> CoordinationResult<Option<String>> {
        let token = Uuid::new_v4().to_string();
        for attempt in 0..=max_retries {
            if self.set_nx(key, &token, lease).await? {
                return Ok(Some(token));
            }
            if attempt < max_retries {
                tokio::time::sleep(backoff).await;
            }
        }
        Ok(None)
    }

    async fn release_lock(&self, key: &str, token: &str) -> CoordinationResult<bool> {
        self.compare_and_delete(key, token).await
    }
}

// ============================================================================
// In-Memory Implementation
// ============================================================================

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    List(VecDeque<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// Process-local coordination for single-instance hosts and tests.
/// Honors TTLs lazily on access.
#[derive(Default)]
pub struct InMemoryCoordination {
    entries: Mutex<HashMap<String, Entry>>,
    unavailable: AtomicBool,
}

impl InMemoryCoordination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: `is_ready` turns false and every call fails.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn check(&self) -> CoordinationResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CoordinationError::Unavailable("in-memory coordination disabled".to_string()));
        }
        Ok(())
    }

    fn with_live<R>(&self, key: &str, f: impl FnOnce(Option<&mut Entry>) -> R) -> R {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
            entries.remove(key);
        }
        f(entries.get_mut(key))
    }
}

#[async_trait]
impl CoordinationService for InMemoryCoordination {
    fn is_ready(&self) -> bool {
        !self.unavailable.load(Ordering::SeqCst)
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> CoordinationResult<bool> {
        self.check()?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(|entry| entry.is_live(now)) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> CoordinationResult<Option<String>> {
        self.check()?;
        Ok(self.with_live(key, |entry| match entry {
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Some(s.clone()),
            _ => None,
        }))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CoordinationResult<()> {
        self.check()?;
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> CoordinationResult<bool> {
        self.check()?;
        Ok(self.entries.lock().remove(key).is_some())
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> CoordinationResult<bool> {
        self.check()?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let owned = entries.get(key).is_some_and(|entry| {
            entry.is_live(now) && matches!(&entry.value, Value::Str(s) if s.as_str() == expected)
        });
        if owned {
            entries.remove(key);
        }
        Ok(owned)
    }

    async fn list_push_front(&self, key: &str, value: &str) -> CoordinationResult<()> {
        self.check()?;
        let pushed = self.with_live(key, |entry| match entry {
            Some(Entry {
                value: Value::List(list),
                ..
            }) => {
                list.push_front(value.to_string());
                true
            },
            _ => false,
        });
        if !pushed {
            self.entries.lock().insert(
                key.to_string(),
                Entry {
                    value: Value::List(VecDeque::from([value.to_string()])),
                    expires_at: None,
                },
            );
        }
        Ok(())
    }

    async fn list_trim(&self, key: &str, max_len: usize) -> CoordinationResult<()> {
        self.check()?;
        self.with_live(key, |entry| {
            if let Some(Entry {
                value: Value::List(list),
                ..
            }) = entry
            {
                list.truncate(max_len);
            }
        });
        Ok(())
    }

    async fn list_range(&self, key: &str, limit: usize) -> CoordinationResult<Vec<String>> {
        self.check()?;
        Ok(self.with_live(key, |entry| match entry {
            Some(Entry {
                value: Value::List(list),
                ..
            }) => list.iter().take(limit).cloned().collect(),
            _ => Vec::new(),
        }))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CoordinationResult<()> {
        self.check()?;
        self.with_live(key, |entry| {
            if let Some(entry) = entry {
                entry.expires_at = Some(Instant::now() + ttl);
            }
        });
        Ok(())
    }
}
