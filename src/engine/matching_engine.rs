// ============================================================================
// Matching Engine
// Admission, crossing, cancellation, expiry and recovery across all books
// ============================================================================

use crate::domain::{
    BookKey, DepthSnapshot, Match, MatchingEngineConfig, Order, OrderBook, OrderBookStats, OrderId,
    OrderKey, OrderStateTransition, Trade,
};
use crate::engine::book_manager::{BookEntry, BookManager};
use crate::engine::idempotency::{Claim, IdempotencyCache};
use crate::engine::lock::BookLocks;
use crate::engine::recovery::{
    append_events, load_snapshot, read_event_log, replay_event, snapshot_key, store_snapshot,
    BookSnapshot, ReplayStats,
};
use crate::engine::validation::{
    check_balance, check_duplicate, check_exposure, validate_order_input, verify_cancel_signature,
    verify_order_signature, CancelRequest, OrderInput,
};
use crate::error::{OrderError, OrderErrorCode};
use crate::interfaces::{
    BalanceProvider, Clock, CoordinationService, CrossingContext, CrossingOutcome, EventHandler,
    InMemoryBalances, InMemoryCoordination, InMemoryOrderStore, MarketEvent, MatchingAlgorithm,
    NoOpSettlementSink, OrderRecord, OrderStore, SettlementFill, SettlementReport, SettlementSink,
    SignatureVerifier, SystemClock,
};
use crate::numeric::{order_notional_usdc, Amount, UsdcMicro};
use crate::signing::Eip712Verifier;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

// ============================================================================
// Results
// ============================================================================

/// Response to an order submission.
///
/// A killed FOK order is reported as `success` with no matches and no
/// remaining order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub success: bool,
    pub matches: Vec<Match>,
    /// The order as it now rests on the book, if it rests
    pub remaining_order: Option<Order>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<OrderErrorCode>,
}

impl MatchResult {
    pub fn accepted(matches: Vec<Match>, remaining_order: Option<Order>) -> Self {
        Self {
            success: true,
            matches,
            remaining_order,
            error: None,
            error_code: None,
        }
    }

    pub fn rejected(err: &OrderError) -> Self {
        Self {
            success: false,
            matches: Vec::new(),
            remaining_order: None,
            error: Some(err.to_string()),
            error_code: Some(err.code()),
        }
    }

    /// Failed for a reason a retry of the same request may overcome.
    pub fn is_retryable(&self) -> bool {
        self.error_code.is_some_and(|code| code.is_retryable())
    }

    pub fn total_matched(&self) -> Amount {
        self.matches.iter().map(|m| m.matched_amount).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOutcome {
    pub order_id: OrderId,
    /// False when no live order matched the request
    pub canceled: bool,
    /// Whether the order was resting in memory, as opposed to only stored
    pub was_resting: bool,
    pub released_usdc_micro: UsdcMicro,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseMarketOutcome {
    pub market_key: String,
    pub canceled: Vec<OrderId>,
    pub books_closed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub total_books: usize,
    pub total_orders: usize,
    pub last_sequence: u64,
}

// ============================================================================
// Collaborators
// ============================================================================

/// External services the engine depends on. The default wiring is fully
/// in-memory, suitable for a single instance and for tests.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn OrderStore>,
    pub coordination: Arc<dyn CoordinationService>,
    pub balances: Arc<dyn BalanceProvider>,
    pub settlement: Arc<dyn SettlementSink>,
    pub verifier: Arc<dyn SignatureVerifier>,
    pub clock: Arc<dyn Clock>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            store: Arc::new(InMemoryOrderStore::new()),
            coordination: Arc::new(InMemoryCoordination::new()),
            balances: Arc::new(InMemoryBalances::new()),
            settlement: Arc::new(NoOpSettlementSink),
            verifier: Arc::new(Eip712Verifier),
            clock: Arc::new(SystemClock),
        }
    }
}

/// Buyer collateral held for a fill until settlement reports back.
#[derive(Debug, Clone)]
struct PendingRelease {
    buyer: String,
    amount: UsdcMicro,
}

/// What one crossing pass did, plus the book views captured right after it.
struct Crossing {
    outcome: CrossingOutcome,
    placed: bool,
    rejection: Option<OrderError>,
    depth: DepthSnapshot,
    stats: OrderBookStats,
    snapshot: BookSnapshot,
}

// ============================================================================
// Engine
// ============================================================================

/// Multi-book matching engine.
///
/// Every mutation of a book runs inside that book's exclusive section (see
/// [`BookLocks`]); the in-memory book mutex is only held for synchronous
/// crossing work, never across an `.await`.
pub struct MatchingEngine {
    config: MatchingEngineConfig,

    /// Lazily created books, one per (market, outcome)
    books: BookManager,

    /// Per-book exclusion, local and cross-instance
    locks: BookLocks,

    /// Results of submissions carrying a client retry token
    idempotency: IdempotencyCache<MatchResult>,

    /// Pluggable matching algorithm
    algorithm: Box<dyn MatchingAlgorithm>,

    /// Event handler for processing events
    event_handler: Arc<dyn EventHandler>,

    store: Arc<dyn OrderStore>,
    coordination: Arc<dyn CoordinationService>,
    balances: Arc<dyn BalanceProvider>,
    settlement: Arc<dyn SettlementSink>,
    verifier: Arc<dyn SignatureVerifier>,
    clock: Arc<dyn Clock>,

    /// Sequence counter for order sequencing
    sequence_counter: AtomicU64,

    /// Fills awaiting a settlement report, by match id
    pending_settlements: Mutex<HashMap<String, PendingRelease>>,
}

impl MatchingEngine {
    /// Create a new matching engine
    pub fn new(
        config: MatchingEngineConfig,
        algorithm: Box<dyn MatchingAlgorithm>,
        event_handler: Arc<dyn EventHandler>,
        collaborators: Collaborators,
    ) -> Self {
        let Collaborators {
            store,
            coordination,
            balances,
            settlement,
            verifier,
            clock,
        } = collaborators;

        Self {
            books: BookManager::new(),
            locks: BookLocks::new(Arc::clone(&coordination), &config),
            idempotency: IdempotencyCache::new(Arc::clone(&coordination), &config),
            algorithm,
            event_handler,
            store,
            coordination,
            balances,
            settlement,
            verifier,
            clock,
            sequence_counter: AtomicU64::new(0),
            pending_settlements: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &MatchingEngineConfig {
        &self.config
    }

    pub fn algorithm_name(&self) -> &str {
        self.algorithm.name()
    }

    // ========================================================================
    // Submission
    // ========================================================================

    /// Validate, risk-check and cross an order, resting any remainder its
    /// time in force allows.
    ///
    /// Structural problems are rejected before the idempotency token is
    /// consulted. Retryable failures are not cached under the token.
    pub async fn submit_order(&self, input: OrderInput) -> MatchResult {
        let order = match validate_order_input(&input, &self.config, self.clock.now()) {
            Ok(order) => order,
            Err(err) => {
                debug!(market = %input.market_key, error = %err, "Order failed validation");
                return MatchResult::rejected(&err);
            },
        };

        let token = input
            .idempotency_key
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty());
        let Some(token) = token else {
            return self.execute(order).await;
        };

        match self.idempotency.claim(token).await {
            Claim::Cached(result) => {
                debug!(token, order_id = %order.id, "Returning cached submission result");
                result
            },
            Claim::Busy => MatchResult::rejected(&OrderError::OrderbookBusy),
            Claim::Owner => {
                let result = self.execute(order).await;
                if result.is_retryable() {
                    self.idempotency.abandon(token).await;
                } else {
                    self.idempotency.complete(token, &result).await;
                }
                result
            },
        }
    }

    async fn execute(&self, order: Order) -> MatchResult {
        let order_id = order.id.clone();
        match self.admit(order).await {
            Ok(result) => result,
            Err(err) => {
                debug!(order_id = %order_id, code = %err.code(), "Order rejected");
                MatchResult::rejected(&err)
            },
        }
    }

    async fn admit(&self, order: Order) -> Result<MatchResult, OrderError> {
        verify_order_signature(self.verifier.as_ref(), &order).await?;

        let key = order.book_key();
        let guard = self.locks.acquire(&key).await?;
        // Resolved under the lock: a market close may have dropped the entry
        let entry = self.books.get_or_create(&key);
        let result = self.admit_locked(&entry, &key, order).await;
        guard.release().await;

        // Settlement hand-off happens outside the book's exclusive section
        if let Ok(result) = &result {
            for m in &result.matches {
                self.settlement.submit(SettlementFill::from(m));
            }
        }
        result
    }

    async fn admit_locked(
        &self,
        entry: &BookEntry,
        key: &BookKey,
        mut order: Order,
    ) -> Result<MatchResult, OrderError> {
        self.ensure_warm(entry, key).await;

        let already_resting = entry.lock().contains(&order.id);
        check_duplicate(already_resting, self.store.as_ref(), &order).await?;
        check_exposure(&entry.lock(), &order, &self.config)?;
        check_balance(self.balances.as_ref(), self.store.as_ref(), &order).await?;

        let reserved = if order.is_buy() {
            order_notional_usdc(order.amount, order.price)
        } else {
            UsdcMicro::ZERO
        };
        if !reserved.is_zero() {
            self.balances.reserve(&order.maker, reserved).await?;
        }

        let now = self.clock.now();
        let ctx = self.crossing_context(now);
        let crossing = {
            let mut book = entry.lock();
            order.sequence = self.next_sequence();
            self.cross(&mut order, &mut book, &ctx, now)
        };

        let Crossing {
            outcome,
            placed,
            rejection,
            depth,
            stats,
            snapshot,
        } = crossing;

        let mut events = self.settle_expired(&outcome.expired).await;

        for maker in &outcome.updated_makers {
            self.update_stored(maker).await;
            events.push(MarketEvent::OrderUpdated {
                order: maker.clone(),
            });
        }

        for m in &outcome.matches {
            let trade = Trade::from(m);
            if let Err(err) = self.store.insert_trade(&trade).await {
                warn!(match_id = %m.id, error = %err, "Failed to persist trade");
            }
            self.pending_settlements.lock().insert(
                m.id.clone(),
                PendingRelease {
                    buyer: m.buyer().to_string(),
                    amount: m.notional(),
                },
            );
            events.push(MarketEvent::Trade { trade });
        }

        if rejection.is_none() && !outcome.fok_killed {
            if let Err(err) = self.store.upsert_order(OrderRecord::from(&order)).await {
                warn!(order_id = %order.id, error = %err, "Failed to persist order");
            }
            if placed {
                events.push(MarketEvent::OrderPlaced {
                    order: order.clone(),
                });
            }
        }

        let remaining_order = placed.then(|| order.clone());
        self.finalize_reservation(&order, reserved, &outcome.matches, remaining_order.as_ref())
            .await;

        let changed = placed || !outcome.matches.is_empty() || !outcome.expired.is_empty();
        if changed {
            events.push(MarketEvent::DepthUpdate { depth });
            if !outcome.matches.is_empty() {
                events.push(MarketEvent::StatsUpdate { stats });
            }
            self.publish(events, Some(snapshot)).await;
        }

        if let Some(err) = rejection {
            return Err(err);
        }

        info!(
            order_id = %order.id,
            book = %key,
            status = order.status.as_str(),
            matches = outcome.matches.len(),
            rested = placed,
            "Order processed"
        );
        Ok(MatchResult::accepted(outcome.matches, remaining_order))
    }

    /// Synchronous part of admission, run under the book mutex.
    fn cross(
        &self,
        order: &mut Order,
        book: &mut OrderBook,
        ctx: &CrossingContext,
        now: DateTime<Utc>,
    ) -> Crossing {
        let mut placed = false;
        let mut rejection = None;

        let outcome = if order.post_only {
            let check = self.algorithm.check_post_only(order, book, ctx);
            if check.would_cross {
                order.transition(OrderStateTransition::Reject);
                rejection = Some(OrderError::PostOnlyWouldCross);
            } else {
                order.transition(OrderStateTransition::Accept);
                book.add_order(order.clone());
                placed = true;
            }
            CrossingOutcome {
                expired: check.expired,
                ..CrossingOutcome::default()
            }
        } else {
            order.transition(OrderStateTransition::Accept);
            let outcome = self.algorithm.match_order(order, book, ctx);
            if outcome.fok_killed {
                order.transition(OrderStateTransition::Cancel);
            } else if !order.remaining_amount.is_zero() {
                if order.time_in_force.rests() {
                    book.add_order(order.clone());
                    placed = true;
                } else {
                    // Discarded remainder: the stored row must not stay live
                    order.transition(OrderStateTransition::Cancel);
                }
            }
            outcome
        };

        Crossing {
            outcome,
            placed,
            rejection,
            depth: book.depth_snapshot(self.config.depth_levels),
            stats: book.stats(),
            snapshot: BookSnapshot::capture(book, now),
        }
    }

    /// Release whatever part of the admission reservation the order no
    /// longer needs: matched notional stays held until settlement, resting
    /// notional stays held until the order leaves the book.
    async fn finalize_reservation(
        &self,
        order: &Order,
        reserved: UsdcMicro,
        matches: &[Match],
        remaining_order: Option<&Order>,
    ) {
        if reserved.is_zero() {
            return;
        }
        let matched: UsdcMicro = matches.iter().map(Match::notional).sum();
        let resting = remaining_order.map_or(UsdcMicro::ZERO, Order::remaining_notional);
        let release = reserved.saturating_sub(matched.saturating_add(resting));
        self.release_reservation(&order.maker, release).await;
    }

    // ========================================================================
    // Cancellation
    // ========================================================================

    /// Cancel the order identified by the signed `(maker, salt)` request.
    ///
    /// An order that is neither resting nor live in storage is reported
    /// with `canceled: false`.
    pub async fn cancel_order(&self, request: CancelRequest) -> Result<CancelOutcome, OrderError> {
        verify_cancel_signature(self.verifier.as_ref(), &request).await?;

        let key = BookKey::new(request.market_key.trim(), request.outcome_index);
        let guard = self.locks.acquire(&key).await?;
        let result = self.cancel_locked(&key, &request).await;
        guard.release().await;
        if self.books.get(&key).is_none() {
            self.locks.forget(&key);
        }
        result
    }

    /// Book to cancel from, if this process has one or a shared snapshot
    /// could populate it. Unknown books are not created.
    async fn cancel_target(&self, key: &BookKey) -> Option<Arc<BookEntry>> {
        if let Some(entry) = self.books.get(key) {
            return Some(entry);
        }
        if !self.coordination.is_ready() {
            return None;
        }
        match self.coordination.get(&snapshot_key(key)).await {
            Ok(Some(_)) => Some(self.books.get_or_create(key)),
            Ok(None) => None,
            Err(err) => {
                warn!(book = %key, error = %err, "Snapshot lookup failed, canceling from storage");
                None
            },
        }
    }

    async fn cancel_locked(&self, key: &BookKey, request: &CancelRequest) -> Result<CancelOutcome, OrderError> {
        let entry = self.cancel_target(key).await;
        if let Some(entry) = &entry {
            self.ensure_warm(entry, key).await;
        }

        let order_id = request.order_id();
        let order_key = OrderKey::new(
            request.chain_id,
            &request.verifying_contract,
            &request.maker,
            request.salt.trim(),
        );
        let now = self.clock.now();

        let removed = entry.as_deref().and_then(|entry| {
            let mut book = entry.lock();
            let matches_request = book
                .get_order(&order_id)
                .is_some_and(|order| order.order_key() == order_key);
            if !matches_request {
                return None;
            }
            let order = book.remove_order(&order_id)?;
            let views = (
                book.depth_snapshot(self.config.depth_levels),
                BookSnapshot::capture(&book, now),
            );
            Some((order, views))
        });

        let (order, was_resting, views) = match removed {
            Some((order, views)) => (Some(order), true, Some(views)),
            None => {
                let stored = self
                    .store
                    .get_order(&order_key)
                    .await?
                    .and_then(|row| match Order::try_from(row) {
                        Ok(order) => Some(order),
                        Err(err) => {
                            warn!(order_id = %order_id, error = %err, "Ignoring malformed stored order");
                            None
                        },
                    })
                    .filter(|order| order.status.is_live());
                (stored, false, None)
            },
        };

        let Some(mut order) = order else {
            debug!(order_id = %order_id, "Nothing to cancel");
            return Ok(CancelOutcome {
                order_id,
                canceled: false,
                was_resting: false,
                released_usdc_micro: UsdcMicro::ZERO,
            });
        };

        order.transition(OrderStateTransition::Cancel);
        self.update_stored(&order).await;

        let released = if order.is_buy() {
            order.remaining_notional()
        } else {
            UsdcMicro::ZERO
        };
        self.release_reservation(&order.maker, released).await;

        let mut events = vec![MarketEvent::OrderCanceled {
            order_id: order.id.clone(),
            market_key: order.market_key.clone(),
            outcome_index: order.outcome_index,
            released_usdc_micro: released,
        }];
        let snapshot = views.map(|(depth, snapshot)| {
            events.push(MarketEvent::DepthUpdate { depth });
            snapshot
        });
        self.publish(events, snapshot).await;

        info!(order_id = %order.id, book = %key, was_resting, "Order canceled");
        Ok(CancelOutcome {
            order_id,
            canceled: true,
            was_resting,
            released_usdc_micro: released,
        })
    }

    // ========================================================================
    // Market Close
    // ========================================================================

    /// Cancel every resting or stored-open order of a market and discard
    /// its books. Each order is canceled once even if it is both in memory
    /// and in storage.
    pub async fn close_market(&self, market_key: &str) -> Result<CloseMarketOutcome, OrderError> {
        let market_key = market_key.trim();
        if market_key.is_empty() {
            return Err(OrderError::InvalidMarketKey);
        }

        let mut stored: BTreeMap<u32, Vec<Order>> = BTreeMap::new();
        match self.store.load_open_orders(Some(market_key)).await {
            Ok(rows) => {
                for row in rows {
                    match Order::try_from(row) {
                        Ok(order) => stored.entry(order.outcome_index).or_default().push(order),
                        Err(err) => warn!(market = market_key, error = %err, "Skipping malformed order row"),
                    }
                }
            },
            Err(err) => {
                warn!(market = market_key, error = %err, "Closing market from memory only");
            },
        }

        let outcomes: BTreeSet<u32> = self
            .books
            .keys_for_market(market_key)
            .into_iter()
            .map(|key| key.outcome_index)
            .chain(stored.keys().copied())
            .collect();

        let mut seen = HashSet::new();
        let mut canceled = Vec::new();
        for outcome in &outcomes {
            let key = BookKey::new(market_key, *outcome);
            let guard = self.locks.acquire(&key).await?;
            let stored_orders = stored.remove(outcome).unwrap_or_default();
            let ids = self.close_book_locked(&key, stored_orders, &mut seen).await;
            guard.release().await;
            self.locks.forget(&key);
            canceled.extend(ids);
        }

        info!(
            market = market_key,
            books = outcomes.len(),
            canceled = canceled.len(),
            "Market closed"
        );
        Ok(CloseMarketOutcome {
            market_key: market_key.to_string(),
            canceled,
            books_closed: outcomes.len(),
        })
    }

    async fn close_book_locked(
        &self,
        key: &BookKey,
        stored_orders: Vec<Order>,
        seen: &mut HashSet<OrderId>,
    ) -> Vec<OrderId> {
        let resting = match self.books.remove(key) {
            Some(entry) => {
                let mut book = entry.lock();
                let orders = book.all_orders();
                book.clear();
                orders
            },
            None => Vec::new(),
        };

        let mut ids = Vec::new();
        let mut releases: HashMap<String, UsdcMicro> = HashMap::new();
        let mut events = Vec::new();
        for mut order in resting.into_iter().chain(stored_orders) {
            if !seen.insert(order.id.clone()) {
                continue;
            }
            order.transition(OrderStateTransition::Cancel);
            self.update_stored(&order).await;

            let released = if order.is_buy() {
                order.remaining_notional()
            } else {
                UsdcMicro::ZERO
            };
            let held = releases.entry(order.maker.clone()).or_default();
            *held = held.saturating_add(released);

            events.push(MarketEvent::OrderCanceled {
                order_id: order.id.clone(),
                market_key: order.market_key.clone(),
                outcome_index: order.outcome_index,
                released_usdc_micro: released,
            });
            ids.push(order.id);
        }

        for (maker, amount) in releases {
            self.release_reservation(&maker, amount).await;
        }
        self.publish(events, None).await;

        if self.coordination.is_ready() {
            if let Err(err) = self.coordination.del(&snapshot_key(key)).await {
                warn!(book = %key, error = %err, "Failed to drop book snapshot");
            }
        }
        ids
    }

    // ========================================================================
    // Expiry
    // ========================================================================

    /// Remove every resting order whose expiry has passed. Books that are
    /// busy are skipped until the next sweep. Returns the number expired.
    pub async fn expire_orders(&self) -> usize {
        let now = self.clock.now();
        let mut total = 0;
        for key in self.books.keys() {
            let Some(entry) = self.books.get(&key) else {
                continue;
            };
            if entry.lock().expired_order_ids(now).is_empty() {
                continue;
            }
            let guard = match self.locks.acquire(&key).await {
                Ok(guard) => guard,
                Err(err) => {
                    debug!(book = %key, error = %err, "Skipping expiry sweep of busy book");
                    continue;
                },
            };
            total += self.expire_book_locked(&entry).await;
            guard.release().await;
        }

        if total > 0 {
            info!(expired = total, "Expired resting orders");
        }
        total
    }

    async fn expire_book_locked(&self, entry: &BookEntry) -> usize {
        let now = self.clock.now();
        let (expired, depth, snapshot) = {
            let mut book = entry.lock();
            let expired: Vec<Order> = book
                .expired_order_ids(now)
                .iter()
                .filter_map(|id| book.remove_order(id))
                .map(|mut order| {
                    order.transition(OrderStateTransition::Expire);
                    order
                })
                .collect();
            (
                expired,
                book.depth_snapshot(self.config.depth_levels),
                BookSnapshot::capture(&book, now),
            )
        };
        if expired.is_empty() {
            return 0;
        }

        let mut events = self.settle_expired(&expired).await;
        events.push(MarketEvent::DepthUpdate { depth });
        self.publish(events, Some(snapshot)).await;
        expired.len()
    }

    /// Persist expired orders and release their buy collateral, one
    /// release per maker.
    async fn settle_expired(&self, expired: &[Order]) -> Vec<MarketEvent> {
        let mut releases: HashMap<String, UsdcMicro> = HashMap::new();
        let mut events = Vec::with_capacity(expired.len());
        for order in expired {
            self.update_stored(order).await;
            if order.is_buy() {
                let held = releases.entry(order.maker.clone()).or_default();
                *held = held.saturating_add(order.remaining_notional());
            }
            events.push(MarketEvent::OrderUpdated {
                order: order.clone(),
            });
        }
        for (maker, amount) in releases {
            self.release_reservation(&maker, amount).await;
        }
        events
    }

    // ========================================================================
    // Settlement
    // ========================================================================

    /// Apply a settlement report. The buyer's collateral for the fill is
    /// released exactly once, whether the fill settled or failed. Returns
    /// false for unknown or already reported fills.
    pub async fn on_settlement_report(&self, report: SettlementReport) -> bool {
        let pending = self.pending_settlements.lock().remove(report.fill_id());
        let Some(pending) = pending else {
            debug!(fill_id = report.fill_id(), "Settlement report for unknown fill");
            return false;
        };
        if let SettlementReport::FillFailed { fill_id, reason } = &report {
            warn!(fill_id = %fill_id, reason = %reason, "Fill failed to settle");
        }
        self.release_reservation(&pending.buyer, pending.amount).await;
        true
    }

    pub fn pending_settlements(&self) -> usize {
        self.pending_settlements.lock().len()
    }

    // ========================================================================
    // Recovery
    // ========================================================================

    /// Load open orders from storage into their books, in sequence order.
    /// Malformed and already expired rows are skipped. Call before serving.
    pub async fn recover_from_store(&self, market_key: Option<&str>) -> usize {
        let rows = match self.store.load_open_orders(market_key).await {
            Ok(rows) => rows,
            Err(err) => {
                warn!(error = %err, "Order store unavailable, starting with empty books");
                return 0;
            },
        };

        let now = self.clock.now();
        let mut orders: Vec<Order> = rows
            .into_iter()
            .filter_map(|row| match Order::try_from(row) {
                Ok(order) => Some(order),
                Err(err) => {
                    warn!(error = %err, "Skipping malformed order row");
                    None
                },
            })
            .filter(|order| order.status.is_live() && !order.is_expired_at(now))
            .collect();
        orders.sort_by_key(|order| order.sequence);

        let mut max_sequence = 0;
        let count = orders.len();
        for order in orders {
            max_sequence = max_sequence.max(order.sequence);
            self.books.get_or_create(&order.book_key()).lock().add_order(order);
        }
        self.advance_sequence(max_sequence);

        info!(
            recovered = count,
            market = market_key.unwrap_or("all"),
            "Recovered open orders from store"
        );
        count
    }

    /// Rebuild books and trade statistics by replaying the shared event
    /// log, oldest first. Returns the number of events applied.
    pub async fn recover_from_event_log(&self) -> usize {
        if !self.coordination.is_ready() {
            return 0;
        }
        let events = match read_event_log(self.coordination.as_ref(), self.config.event_log_max_len).await {
            Ok(events) => events,
            Err(err) => {
                warn!(error = %err, "Event log unavailable, skipping replay");
                return 0;
            },
        };

        let now = self.clock.now();
        let applied = events.len();
        let mut stats: HashMap<BookKey, ReplayStats> = HashMap::new();
        let mut max_sequence = 0;
        for event in events {
            let key = event.book_key();
            let entry = self.books.get_or_create(&key);
            let book_stats = stats.entry(key).or_default();
            let mut book = entry.lock();
            if let Some(sequence) = replay_event(&mut book, event, book_stats, now) {
                max_sequence = max_sequence.max(sequence);
            }
        }
        for (key, replayed) in stats {
            if let Some(entry) = self.books.get(&key) {
                replayed.apply_to(&mut entry.lock(), now);
            }
        }
        self.advance_sequence(max_sequence);

        info!(events = applied, books = self.books.len(), "Replayed event log");
        applied
    }

    /// First touch of a book in this process: restore it from its shared
    /// snapshot if nothing was recovered into it yet.
    async fn ensure_warm(&self, entry: &BookEntry, key: &BookKey) {
        entry
            .warm_once(|| async move {
                if !entry.lock().is_empty() {
                    return;
                }
                let Some(snapshot) = load_snapshot(self.coordination.as_ref(), key).await else {
                    return;
                };
                let now = self.clock.now();
                let max_sequence = {
                    let mut book = entry.lock();
                    if !book.is_empty() {
                        return;
                    }
                    snapshot.restore_into(&mut book, now)
                };
                self.advance_sequence(max_sequence);
                debug!(book = %key, "Warmed book from snapshot");
            })
            .await;
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn depth(&self, key: &BookKey, max_levels: usize) -> Option<DepthSnapshot> {
        self.books
            .get(key)
            .map(|entry| entry.lock().depth_snapshot(max_levels))
    }

    pub fn book_stats(&self, key: &BookKey) -> Option<OrderBookStats> {
        self.books.get(key).map(|entry| entry.lock().stats())
    }

    pub fn get_order(&self, key: &BookKey, order_id: &OrderId) -> Option<Order> {
        self.books
            .get(key)
            .and_then(|entry| entry.lock().get_order(order_id).cloned())
    }

    pub fn global_stats(&self) -> EngineStats {
        EngineStats {
            total_books: self.books.len(),
            total_orders: self.books.total_orders(),
            last_sequence: self.sequence_counter.load(Ordering::Acquire),
        }
    }

    /// Drop all in-memory books. Durable state is left untouched.
    pub fn shutdown(&self) {
        let stats = self.global_stats();
        self.books.clear();
        info!(
            books = stats.total_books,
            orders = stats.total_orders,
            "Matching engine shut down"
        );
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn crossing_context(&self, now: DateTime<Utc>) -> CrossingContext {
        CrossingContext {
            now,
            maker_fee_bps: self.config.maker_fee_bps,
            taker_fee_bps: self.config.taker_fee_bps,
            self_trade_protection: self.config.enable_self_trade_protection,
        }
    }

    fn next_sequence(&self) -> u64 {
        self.sequence_counter.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn advance_sequence(&self, seen: u64) {
        self.sequence_counter.fetch_max(seen, Ordering::AcqRel);
    }

    async fn update_stored(&self, order: &Order) {
        if let Err(err) = self
            .store
            .update_order(&order.order_key(), order.remaining_amount, order.status)
            .await
        {
            warn!(order_id = %order.id, status = order.status.as_str(), error = %err, "Failed to update stored order");
        }
    }

    async fn release_reservation(&self, maker: &str, amount: UsdcMicro) {
        if amount.is_zero() {
            return;
        }
        if let Err(err) = self.balances.release(maker, amount).await {
            warn!(maker, amount = %amount, error = %err, "Failed to release reservation");
        }
    }

    /// Hand events to the handler and append the durable ones to the
    /// shared log, then write the book snapshot.
    async fn publish(&self, events: Vec<MarketEvent>, snapshot: Option<BookSnapshot>) {
        if self.coordination.is_ready() {
            let ttl = Duration::from_secs(self.config.event_log_ttl_secs);
            if let Err(err) =
                append_events(self.coordination.as_ref(), &events, self.config.event_log_max_len, ttl).await
            {
                warn!(error = %err, "Failed to append to event log");
            }
            if let Some(snapshot) = &snapshot {
                let ttl = Duration::from_secs(self.config.snapshot_ttl_secs);
                if let Err(err) = store_snapshot(self.coordination.as_ref(), snapshot, ttl).await {
                    warn!(book = %snapshot.book_key(), error = %err, "Failed to write book snapshot");
                }
            }
        }
        if !events.is_empty() {
            self.event_handler.on_events(events);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
