// ============================================================================
// Event Handler Interface
// Defines the contract for observing committed matching decisions
// ============================================================================

use crate::domain::{BookKey, DepthSnapshot, Order, OrderBookStats, OrderId, Trade};
use crate::numeric::UsdcMicro;
use crossbeam::channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};

/// Events emitted by the matching engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarketEvent {
    /// Order admitted to a book
    OrderPlaced { order: Order },

    /// Resting order changed (partial fill, fill, expiry)
    OrderUpdated { order: Order },

    /// Order removed by its maker or by market close
    OrderCanceled {
        order_id: OrderId,
        market_key: String,
        outcome_index: u32,
        released_usdc_micro: UsdcMicro,
    },

    /// Fill committed
    Trade { trade: Trade },

    /// Top-of-book depth after a mutation
    DepthUpdate { depth: DepthSnapshot },

    /// Book statistics after trades
    StatsUpdate { stats: OrderBookStats },
}

impl MarketEvent {
    /// Whether the event belongs in the durable event log. Depth and stats
    /// broadcasts are live market data only.
    pub fn is_durable(&self) -> bool {
        !matches!(
            self,
            MarketEvent::DepthUpdate { .. } | MarketEvent::StatsUpdate { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            MarketEvent::OrderPlaced { .. } => "order_placed",
            MarketEvent::OrderUpdated { .. } => "order_updated",
            MarketEvent::OrderCanceled { .. } => "order_canceled",
            MarketEvent::Trade { .. } => "trade",
            MarketEvent::DepthUpdate { .. } => "depth_update",
            MarketEvent::StatsUpdate { .. } => "stats_update",
        }
    }

    pub fn book_key(&self) -> BookKey {
        match self {
            MarketEvent::OrderPlaced { order } | MarketEvent::OrderUpdated { order } => {
                order.book_key()
            },
            MarketEvent::OrderCanceled {
                market_key,
                outcome_index,
                ..
            } => BookKey::new(market_key.clone(), *outcome_index),
            MarketEvent::Trade { trade } => {
                BookKey::new(trade.market_key.clone(), trade.outcome_index)
            },
            MarketEvent::DepthUpdate { depth } => {
                BookKey::new(depth.market_key.clone(), depth.outcome_index)
            },
            MarketEvent::StatsUpdate { stats } => {
                BookKey::new(stats.market_key.clone(), stats.outcome_index)
            },
        }
    }
}

/// Event handler trait for processing matching engine events
/// Implementations can handle logging, market-data fan-out, notifications, etc.
pub trait EventHandler: Send + Sync {
    /// Handle a market event
    fn on_event(&self, event: MarketEvent);

    /// Batch event handler (optional optimization)
    fn on_events(&self, events: Vec<MarketEvent>) {
        for event in events {
            self.on_event(event);
        }
    }
}

/// No-op event handler for testing
pub struct NoOpEventHandler;

impl EventHandler for NoOpEventHandler {
    fn on_event(&self, _event: MarketEvent) {
        // Do nothing
    }
}

/// Logging event handler
pub struct LoggingEventHandler;

impl EventHandler for LoggingEventHandler {
    fn on_event(&self, event: MarketEvent) {
        tracing::debug!(kind = event.kind(), book = %event.book_key(), "Matching engine event: {:?}", event);
    }
}

/// Forwards events into an unbounded crossbeam channel, for subscribers on
/// other threads (websocket fan-out, tests).
pub struct ChannelEventHandler {
    sender: Sender<MarketEvent>,
}

impl ChannelEventHandler {
    pub fn new() -> (Self, Receiver<MarketEvent>) {
        let (sender, receiver) = crossbeam::channel::unbounded();
        (Self { sender }, receiver)
    }
}

impl EventHandler for ChannelEventHandler {
    fn on_event(&self, event: MarketEvent) {
        // A dropped receiver just means nobody is listening.
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::fixtures::*;
    use crate::domain::Side;

    #[test]
    fn test_noop_handler() {
        let handler = NoOpEventHandler;
        handler.on_event(MarketEvent::OrderPlaced {
            order: resting(MAKER_A, 1, Side::Buy, 500_000, ONE_SHARE),
        });
        // Should not panic
    }

    #[test]
    fn test_channel_handler_and_tagging() {
        let (handler, rx) = ChannelEventHandler::new();
        handler.on_events(vec![
            MarketEvent::OrderCanceled {
                order_id: OrderId::new(MAKER_A, "1"),
                market_key: "80002:1".into(),
                outcome_index: 1,
                released_usdc_micro: UsdcMicro(500_000),
            },
            MarketEvent::OrderPlaced {
                order: resting(MAKER_A, 2, Side::Sell, 500_000, ONE_SHARE),
            },
        ]);

        let first = rx.try_recv().unwrap();
        assert!(first.is_durable());
        assert_eq!(first.book_key(), BookKey::new("80002:1", 1));

        let json = serde_json::to_value(&first).unwrap();
        assert_eq!(json["type"], "order_canceled");
        assert_eq!(json["released_usdc_micro"], "500000");

        assert_eq!(rx.try_recv().unwrap().kind(), "order_placed");
    }

    #[test]
    fn test_broadcast_only_events_not_durable() {
        let book = crate::domain::OrderBook::new(BookKey::new("m", 0));
        assert!(!MarketEvent::DepthUpdate { depth: book.depth_snapshot(20) }.is_durable());
        assert!(!MarketEvent::StatsUpdate { stats: book.stats() }.is_durable());
    }
}
