// ============================================================================
// Recovery
// Book snapshots, the durable event log, and replay rules
// ============================================================================

use crate::domain::{BookKey, Order, OrderBook};
use crate::error::CoordinationError;
use crate::interfaces::{CoordinationService, MarketEvent};
use crate::numeric::{Amount, Price};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Append-only list of committed events, newest first.
pub const EVENT_LOG_KEY: &str = "matching:event_log";

pub fn snapshot_key(key: &BookKey) -> String {
    format!("orderbook:snapshot:{}:{}", key.market_key, key.outcome_index)
}

// ============================================================================
// Snapshots
// ============================================================================

/// Serialized form of one book in the snapshot cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookSnapshot {
    pub market_key: String,
    pub outcome_index: u32,
    /// Bids then asks, best first
    pub orders: Vec<Order>,
    pub last_trade_price: Option<Price>,
    pub volume_24h: Amount,
    pub taken_at: DateTime<Utc>,
}

impl BookSnapshot {
    pub fn capture(book: &OrderBook, now: DateTime<Utc>) -> Self {
        Self {
            market_key: book.key().market_key.clone(),
            outcome_index: book.key().outcome_index,
            orders: book.all_orders(),
            last_trade_price: book.last_trade_price(),
            volume_24h: book.volume_24h(),
            taken_at: now,
        }
    }

    pub fn book_key(&self) -> BookKey {
        BookKey::new(self.market_key.clone(), self.outcome_index)
    }

    /// Load live, unexpired orders into `book` in sequence order and restore
    /// its trade stats. Returns the highest sequence loaded.
    pub fn restore_into(self, book: &mut OrderBook, now: DateTime<Utc>) -> u64 {
        let mut orders: Vec<Order> = self
            .orders
            .into_iter()
            .filter(|order| {
                order.status.is_live()
                    && !order.remaining_amount.is_zero()
                    && !order.is_expired_at(now)
                    && order.book_key() == *book.key()
            })
            .collect();
        orders.sort_by_key(|order| order.sequence);

        let max_sequence = orders.last().map_or(0, |order| order.sequence);
        for order in orders {
            book.add_order(order);
        }
        book.restore_stats(self.last_trade_price, self.volume_24h, self.taken_at);
        max_sequence
    }
}

/// Fetch and decode a book snapshot. Missing or unreadable snapshots are
/// reported as `None`; a cold book is always a valid starting point.
pub async fn load_snapshot(coordination: &dyn CoordinationService, key: &BookKey) -> Option<BookSnapshot> {
    if !coordination.is_ready() {
        return None;
    }
    let raw = match coordination.get(&snapshot_key(key)).await {
        Ok(raw) => raw?,
        Err(err) => {
            tracing::warn!(book = %key, error = %err, "Snapshot load failed");
            return None;
        },
    };
    match serde_json::from_str::<BookSnapshot>(&raw) {
        Ok(snapshot) if snapshot.book_key() == *key => Some(snapshot),
        Ok(_) => {
            tracing::warn!(book = %key, "Snapshot belongs to another book");
            None
        },
        Err(err) => {
            tracing::warn!(book = %key, error = %err, "Snapshot unreadable");
            None
        },
    }
}

pub async fn store_snapshot(
    coordination: &dyn CoordinationService,
    snapshot: &BookSnapshot,
    ttl: std::time::Duration,
) -> Result<(), CoordinationError> {
    let raw = serde_json::to_string(snapshot)?;
    coordination
        .set(&snapshot_key(&snapshot.book_key()), &raw, Some(ttl))
        .await
}

// ============================================================================
// Event Log
// ============================================================================

/// Append durable events to the log, keeping it bounded and expiring.
pub async fn append_events(
    coordination: &dyn CoordinationService,
    events: &[MarketEvent],
    max_len: usize,
    ttl: std::time::Duration,
) -> Result<(), CoordinationError> {
    let mut appended = false;
    for event in events.iter().filter(|event| event.is_durable()) {
        let raw = serde_json::to_string(event)?;
        coordination.list_push_front(EVENT_LOG_KEY, &raw).await?;
        appended = true;
    }
    if appended {
        coordination.list_trim(EVENT_LOG_KEY, max_len).await?;
        coordination.expire(EVENT_LOG_KEY, ttl).await?;
    }
    Ok(())
}

/// Read up to `limit` logged events, oldest first. Undecodable entries are
/// skipped.
pub async fn read_event_log(
    coordination: &dyn CoordinationService,
    limit: usize,
) -> Result<Vec<MarketEvent>, CoordinationError> {
    let raw = coordination.list_range(EVENT_LOG_KEY, limit).await?;
    let mut events = Vec::with_capacity(raw.len());
    for entry in raw.iter().rev() {
        match serde_json::from_str::<MarketEvent>(entry) {
            Ok(event) => events.push(event),
            Err(err) => tracing::debug!(error = %err, "Skipping undecodable event log entry"),
        }
    }
    Ok(events)
}

// ============================================================================
// Replay
// ============================================================================

/// Trade statistics rebuilt from replayed trades in the trailing 24 hours.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub last_trade: Option<(DateTime<Utc>, Price)>,
    pub volume: Amount,
}

impl ReplayStats {
    pub fn apply_to(&self, book: &mut OrderBook, now: DateTime<Utc>) {
        if self.last_trade.is_none() && self.volume.is_zero() {
            return;
        }
        book.restore_stats(self.last_trade.map(|(_, price)| price), self.volume, now);
    }
}

/// Apply one logged event to its book. Returns the order sequence it
/// carried, if any.
pub fn replay_event(
    book: &mut OrderBook,
    event: MarketEvent,
    stats: &mut ReplayStats,
    now: DateTime<Utc>,
) -> Option<u64> {
    match event {
        MarketEvent::OrderPlaced { order } | MarketEvent::OrderUpdated { order } => {
            let sequence = order.sequence;
            let rests = order.status.is_live()
                && !order.remaining_amount.is_zero()
                && !order.is_expired_at(now);
            if !rests {
                book.remove_order(&order.id);
            } else if !book.update_order(&order) {
                book.add_order(order);
            }
            Some(sequence)
        },
        MarketEvent::OrderCanceled { order_id, .. } => {
            book.remove_order(&order_id);
            None
        },
        MarketEvent::Trade { trade } => {
            if trade.timestamp >= now - Duration::hours(24) {
                stats.volume = stats.volume.saturating_add(trade.amount);
                let newer = stats
                    .last_trade
                    .map_or(true, |(at, _)| trade.timestamp >= at);
                if newer {
                    stats.last_trade = Some((trade.timestamp, trade.price));
                }
            }
            None
        },
        MarketEvent::DepthUpdate { .. } | MarketEvent::StatsUpdate { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::fixtures::*;
    use crate::domain::{Match, OrderStatus, Side, Trade};
    use crate::interfaces::InMemoryCoordination;
    use crate::numeric::UsdcMicro;

    fn key() -> BookKey {
        BookKey::new("80002:1", 0)
    }

    fn trade_at(price: u64, amount: u128, at: DateTime<Utc>) -> Trade {
        let maker = resting(MAKER_A, 1, Side::Sell, price, amount);
        let taker = resting(MAKER_B, 2, Side::Buy, price, amount);
        Trade::from(&Match::new(maker, taker, Amount(amount), 0, 0, at))
    }

    #[test]
    fn test_snapshot_restores_live_orders_in_sequence() {
        let now = Utc::now();
        let mut book = OrderBook::new(key());
        book.add_order(resting(MAKER_A, 2, Side::Buy, 500_000, ONE_SHARE));
        book.add_order(resting(MAKER_B, 1, Side::Buy, 500_000, ONE_SHARE));
        let mut stale = resting(MAKER_A, 3, Side::Sell, 600_000, ONE_SHARE);
        stale.expiry = (now - Duration::seconds(5)).timestamp() as u64;
        book.add_order(stale);
        book.record_trade(Price(550_000), Amount(ONE_SHARE), now);

        let snapshot = BookSnapshot::capture(&book, now);
        let mut restored = OrderBook::new(key());
        let max_sequence = snapshot.restore_into(&mut restored, now);

        assert_eq!(max_sequence, 2);
        assert_eq!(restored.order_count(), 2);
        assert_eq!(restored.best_ask(), None);
        assert_eq!(restored.last_trade_price(), Some(Price(550_000)));
        let front = restored.best_counter_order(Side::Sell, None).unwrap();
        assert_eq!(front.maker, MAKER_B);
    }

    #[tokio::test]
    async fn test_snapshot_round_trip_through_cache() {
        let coordination = InMemoryCoordination::new();
        let mut book = OrderBook::new(key());
        book.add_order(resting(MAKER_A, 1, Side::Sell, 600_000, ONE_SHARE));
        let snapshot = BookSnapshot::capture(&book, Utc::now());

        store_snapshot(&coordination, &snapshot, std::time::Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(load_snapshot(&coordination, &key()).await, Some(snapshot));
        assert_eq!(load_snapshot(&coordination, &BookKey::new("80002:1", 1)).await, None);

        coordination
            .set(&snapshot_key(&key()), "{not json", None)
            .await
            .unwrap();
        assert_eq!(load_snapshot(&coordination, &key()).await, None);
    }

    #[tokio::test]
    async fn test_event_log_skips_broadcast_events_and_reads_oldest_first() {
        let coordination = InMemoryCoordination::new();
        let placed = resting(MAKER_A, 1, Side::Buy, 500_000, ONE_SHARE);
        let events = vec![
            MarketEvent::OrderPlaced { order: placed.clone() },
            MarketEvent::DepthUpdate {
                depth: OrderBook::new(key()).depth_snapshot(20),
            },
            MarketEvent::OrderCanceled {
                order_id: placed.id.clone(),
                market_key: placed.market_key.clone(),
                outcome_index: 0,
                released_usdc_micro: UsdcMicro(500_000),
            },
        ];

        append_events(&coordination, &events, 10, std::time::Duration::from_secs(60))
            .await
            .unwrap();
        let read = read_event_log(&coordination, 10).await.unwrap();

        assert_eq!(read.len(), 2);
        assert_eq!(read[0].kind(), "order_placed");
        assert_eq!(read[1].kind(), "order_canceled");
    }

    #[tokio::test]
    async fn test_event_log_is_bounded() {
        let coordination = InMemoryCoordination::new();
        for salt in 0..5 {
            let order = resting(MAKER_A, salt, Side::Buy, 500_000, ONE_SHARE);
            append_events(
                &coordination,
                &[MarketEvent::OrderPlaced { order }],
                3,
                std::time::Duration::from_secs(60),
            )
            .await
            .unwrap();
        }
        let read = read_event_log(&coordination, 100).await.unwrap();
        let sequences: Vec<u64> = read
            .iter()
            .filter_map(|event| match event {
                MarketEvent::OrderPlaced { order } => Some(order.sequence),
                _ => None,
            })
            .collect();
        assert_eq!(sequences, vec![2, 3, 4]);
    }

    #[test]
    fn test_replay_rebuilds_book_and_stats() {
        let now = Utc::now();
        let mut book = OrderBook::new(key());
        let mut stats = ReplayStats::default();

        let bid = resting(MAKER_A, 1, Side::Buy, 500_000, 2 * ONE_SHARE);
        let ask = resting(MAKER_B, 2, Side::Sell, 600_000, ONE_SHARE);
        let mut partially = bid.clone();
        partially.remaining_amount = Amount(ONE_SHARE);
        partially.status = OrderStatus::PartiallyFilled;
        let mut filled_ask = ask.clone();
        filled_ask.remaining_amount = Amount::ZERO;
        filled_ask.status = OrderStatus::Filled;

        let events = vec![
            MarketEvent::OrderPlaced { order: bid.clone() },
            MarketEvent::OrderPlaced { order: ask.clone() },
            MarketEvent::Trade {
                trade: trade_at(500_000, ONE_SHARE, now - Duration::hours(30)),
            },
            MarketEvent::Trade {
                trade: trade_at(510_000, ONE_SHARE, now - Duration::minutes(5)),
            },
            MarketEvent::OrderUpdated { order: partially },
            MarketEvent::OrderUpdated { order: filled_ask },
        ];

        let mut max_sequence = 0;
        for event in events {
            if let Some(sequence) = replay_event(&mut book, event, &mut stats, now) {
                max_sequence = max_sequence.max(sequence);
            }
        }
        stats.apply_to(&mut book, now);

        assert_eq!(max_sequence, 2);
        assert_eq!(book.order_count(), 1);
        assert_eq!(book.get_order(&bid.id).unwrap().remaining_amount, Amount(ONE_SHARE));
        assert_eq!(book.last_trade_price(), Some(Price(510_000)));
        assert_eq!(book.volume_24h(), Amount(ONE_SHARE));
    }
}
