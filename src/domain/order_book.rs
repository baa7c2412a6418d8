// ============================================================================
// Order Book Domain Model
// ============================================================================

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::{BookKey, Order, OrderId, Side};
use crate::numeric::{Amount, Price};

const VOLUME_WINDOW_HOURS: i64 = 24;

// ============================================================================
// Price Level
// ============================================================================

/// All resting orders at one price, in time priority.
#[derive(Debug, Clone)]
pub struct PriceLevel {
    pub price: Price,
    /// (sequence, id) so that iteration order is arrival order
    queue: BTreeSet<(u64, OrderId)>,
    total_quantity: Amount,
}

impl PriceLevel {
    pub fn new(price: Price) -> Self {
        Self {
            price,
            queue: BTreeSet::new(),
            total_quantity: Amount::ZERO,
        }
    }

    fn push(&mut self, order: &Order) {
        self.queue.insert((order.sequence, order.id.clone()));
        self.total_quantity = self.total_quantity.saturating_add(order.remaining_amount);
    }

    fn remove(&mut self, order: &Order) {
        if self.queue.remove(&(order.sequence, order.id.clone())) {
            self.total_quantity = self.total_quantity.saturating_sub(order.remaining_amount);
        }
    }

    pub fn total_quantity(&self) -> Amount {
        self.total_quantity
    }

    pub fn order_count(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn order_ids(&self) -> impl Iterator<Item = &OrderId> + '_ {
        self.queue.iter().map(|(_, id)| id)
    }
}

// ============================================================================
// Snapshots
// ============================================================================

/// Aggregated view of one price level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthLevel {
    pub price: Price,
    pub total_quantity: Amount,
    pub order_count: usize,
    pub orders: Vec<Order>,
}

/// Top-of-book depth, bids descending and asks ascending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthSnapshot {
    pub market_key: String,
    pub outcome_index: u32,
    pub bids: Vec<DepthLevel>,
    pub asks: Vec<DepthLevel>,
    pub timestamp: DateTime<Utc>,
}

impl DepthSnapshot {
    pub fn best_bid(&self) -> Option<Price> {
        self.bids.first().map(|level| level.price)
    }

    pub fn best_ask(&self) -> Option<Price> {
        self.asks.first().map(|level| level.price)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookStats {
    pub market_key: String,
    pub outcome_index: u32,
    pub best_bid: Option<Price>,
    pub best_ask: Option<Price>,
    pub spread: Option<i64>,
    pub bid_depth: Amount,
    pub ask_depth: Amount,
    pub last_trade_price: Option<Price>,
    pub volume_24h: Amount,
}

// ============================================================================
// Order Book
// ============================================================================

/// Limit order book for one (market, outcome) pair.
///
/// Not internally synchronized: the owner serializes mutation (see
/// `engine::book_manager`). Emptied price levels are removed eagerly, so
/// every level present in `bids`/`asks` holds at least one order.
#[derive(Debug, Clone)]
pub struct OrderBook {
    key: BookKey,
    bids: BTreeMap<Price, PriceLevel>,
    asks: BTreeMap<Price, PriceLevel>,
    orders: HashMap<OrderId, Order>,
    last_trade_price: Option<Price>,
    volume_24h: Amount,
    volume_window_start: DateTime<Utc>,
}

impl OrderBook {
    pub fn new(key: BookKey) -> Self {
        Self {
            key,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            orders: HashMap::new(),
            last_trade_price: None,
            volume_24h: Amount::ZERO,
            volume_window_start: Utc::now(),
        }
    }

    pub fn key(&self) -> &BookKey {
        &self.key
    }

    fn side_mut(&mut self, side: Side) -> &mut BTreeMap<Price, PriceLevel> {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    /// Levels of one side, best price first.
    fn levels(&self, side: Side) -> Box<dyn Iterator<Item = &PriceLevel> + '_> {
        match side {
            Side::Buy => Box::new(self.bids.values().rev()),
            Side::Sell => Box::new(self.asks.values()),
        }
    }

    /// Insert a resting order. An order with the same id is replaced.
    /// Orders with nothing left to fill are not inserted.
    pub fn add_order(&mut self, order: Order) {
        self.remove_order(&order.id);
        if order.remaining_amount.is_zero() {
            return;
        }
        self.side_mut(order.side)
            .entry(order.price)
            .or_insert_with(|| PriceLevel::new(order.price))
            .push(&order);
        self.orders.insert(order.id.clone(), order);
    }

    pub fn remove_order(&mut self, id: &OrderId) -> Option<Order> {
        let order = self.orders.remove(id)?;
        let levels = self.side_mut(order.side);
        if let Some(level) = levels.get_mut(&order.price) {
            level.remove(&order);
            if level.is_empty() {
                levels.remove(&order.price);
            }
        }
        Some(order)
    }

    /// Replace a resting order's mutable state after a partial fill,
    /// keeping its queue position. Fully filled orders are removed.
    pub fn update_order(&mut self, order: &Order) -> bool {
        let Some((previous, side, price)) = self
            .orders
            .get(&order.id)
            .map(|existing| (existing.remaining_amount, existing.side, existing.price))
        else {
            return false;
        };
        if order.remaining_amount.is_zero() {
            self.remove_order(&order.id);
            return true;
        }
        if let Some(level) = self.side_mut(side).get_mut(&price) {
            level.total_quantity = level
                .total_quantity
                .saturating_sub(previous)
                .saturating_add(order.remaining_amount);
        }
        if let Some(slot) = self.orders.get_mut(&order.id) {
            slot.remaining_amount = order.remaining_amount;
            slot.status = order.status;
        }
        true
    }

    pub fn get_order(&self, id: &OrderId) -> Option<&Order> {
        self.orders.get(id)
    }

    pub fn contains(&self, id: &OrderId) -> bool {
        self.orders.contains_key(id)
    }

    pub fn best_bid(&self) -> Option<Price> {
        self.bids.keys().next_back().copied()
    }

    pub fn best_ask(&self) -> Option<Price> {
        self.asks.keys().next().copied()
    }

    /// Resting orders facing an incoming order on `taker_side`, best first:
    /// by price, then by sequence within a price.
    pub fn counter_orders(&self, taker_side: Side) -> impl Iterator<Item = &Order> + '_ {
        self.levels(taker_side.opposite())
            .flat_map(|level| level.order_ids())
            .filter_map(|id| self.orders.get(id))
    }

    /// Best resting order facing `taker_side`, optionally skipping one maker.
    pub fn best_counter_order(&self, taker_side: Side, exclude_maker: Option<&str>) -> Option<&Order> {
        let excluded = exclude_maker.map(str::to_lowercase);
        self.counter_orders(taker_side)
            .find(|order| excluded.as_deref() != Some(order.maker.as_str()))
    }

    /// Resting orders owned by `maker` (any side).
    pub fn orders_by_maker<'a>(&'a self, maker: &'a str) -> impl Iterator<Item = &'a Order> + 'a {
        self.orders
            .values()
            .filter(move |order| order.maker.eq_ignore_ascii_case(maker))
    }

    /// Ids of resting orders whose expiry has passed at `now`.
    pub fn expired_order_ids(&self, now: DateTime<Utc>) -> Vec<OrderId> {
        self.orders
            .values()
            .filter(|order| order.is_expired_at(now))
            .map(|order| order.id.clone())
            .collect()
    }

    pub fn depth_snapshot(&self, max_levels: usize) -> DepthSnapshot {
        let collect = |side: Side| -> Vec<DepthLevel> {
            self.levels(side)
                .take(max_levels)
                .map(|level| DepthLevel {
                    price: level.price,
                    total_quantity: level.total_quantity,
                    order_count: level.order_count(),
                    orders: level
                        .order_ids()
                        .filter_map(|id| self.orders.get(id).cloned())
                        .collect(),
                })
                .collect()
        };

        DepthSnapshot {
            market_key: self.key.market_key.clone(),
            outcome_index: self.key.outcome_index,
            bids: collect(Side::Buy),
            asks: collect(Side::Sell),
            timestamp: Utc::now(),
        }
    }

    /// Update last trade price and the rolling 24h volume accumulator.
    pub fn record_trade(&mut self, price: Price, amount: Amount, now: DateTime<Utc>) {
        self.last_trade_price = Some(price);
        if now - self.volume_window_start > Duration::hours(VOLUME_WINDOW_HOURS) {
            self.volume_24h = Amount::ZERO;
            self.volume_window_start = now;
        }
        self.volume_24h = self.volume_24h.saturating_add(amount);
    }

    pub fn restore_stats(&mut self, last_trade_price: Option<Price>, volume_24h: Amount, now: DateTime<Utc>) {
        self.last_trade_price = last_trade_price;
        self.volume_24h = volume_24h;
        self.volume_window_start = now;
    }

    pub fn last_trade_price(&self) -> Option<Price> {
        self.last_trade_price
    }

    pub fn volume_24h(&self) -> Amount {
        self.volume_24h
    }

    pub fn side_depth(&self, side: Side) -> Amount {
        self.levels(side).map(|level| level.total_quantity).sum()
    }

    pub fn stats(&self) -> OrderBookStats {
        let best_bid = self.best_bid();
        let best_ask = self.best_ask();
        let spread = match (best_bid, best_ask) {
            (Some(bid), Some(ask)) => Some(ask.raw() as i64 - bid.raw() as i64),
            _ => None,
        };

        OrderBookStats {
            market_key: self.key.market_key.clone(),
            outcome_index: self.key.outcome_index,
            best_bid,
            best_ask,
            spread,
            bid_depth: self.side_depth(Side::Buy),
            ask_depth: self.side_depth(Side::Sell),
            last_trade_price: self.last_trade_price,
            volume_24h: self.volume_24h,
        }
    }

    /// All resting orders, bids then asks, each best first.
    pub fn all_orders(&self) -> Vec<Order> {
        self.levels(Side::Buy)
            .chain(self.levels(Side::Sell))
            .flat_map(|level| level.order_ids())
            .filter_map(|id| self.orders.get(id).cloned())
            .collect()
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.orders.clear();
    }
}
