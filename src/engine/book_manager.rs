// ============================================================================
// Book Manager
// Registry of order books keyed by (market, outcome)
// ============================================================================

use crate::domain::{BookKey, OrderBook};
use crossbeam_skiplist::SkipMap;
use parking_lot::{Mutex, MutexGuard};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// One book plus its once-per-process warmup latch.
///
/// The mutex only guards the in-memory structure; cross-operation ordering
/// is provided by the per-book lock coordinator. Never hold the guard
/// across an `.await`.
pub struct BookEntry {
    book: Mutex<OrderBook>,
    warmed: OnceCell<()>,
}

impl BookEntry {
    fn new(key: BookKey) -> Self {
        Self {
            book: Mutex::new(OrderBook::new(key)),
            warmed: OnceCell::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, OrderBook> {
        self.book.lock()
    }

    /// Run `warmup` the first time this is called for the entry. Concurrent
    /// callers wait for the first one; later callers return immediately.
    pub async fn warm_once<F, Fut>(&self, warmup: F)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        self.warmed.get_or_init(warmup).await;
    }

    pub fn is_warmed(&self) -> bool {
        self.warmed.initialized()
    }
}

/// Lazily populated book registry. Books are only removed on market close.
#[derive(Default)]
pub struct BookManager {
    books: SkipMap<BookKey, Arc<BookEntry>>,
}

impl BookManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, key: &BookKey) -> Arc<BookEntry> {
        if let Some(entry) = self.books.get(key) {
            return Arc::clone(entry.value());
        }
        let entry = self
            .books
            .get_or_insert(key.clone(), Arc::new(BookEntry::new(key.clone())));
        Arc::clone(entry.value())
    }

    pub fn get(&self, key: &BookKey) -> Option<Arc<BookEntry>> {
        self.books.get(key).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, key: &BookKey) -> Option<Arc<BookEntry>> {
        self.books.remove(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Keys of every loaded book belonging to `market_key`, by outcome.
    pub fn keys_for_market(&self, market_key: &str) -> Vec<BookKey> {
        let start = BookKey::new(market_key, 0);
        let end = BookKey::new(market_key, u32::MAX);
        self.books
            .range(start..=end)
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn keys(&self) -> Vec<BookKey> {
        self.books.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }

    /// Resting orders across all books.
    pub fn total_orders(&self) -> usize {
        self.books
            .iter()
            .map(|entry| entry.value().lock().order_count())
            .sum()
    }

    pub fn clear(&self) {
        self.books.clear();
    }
}
