// ============================================================================
// Domain Models Module
// Contains all core domain entities and value objects
// ============================================================================

pub mod config;
pub mod order;
pub mod order_book;
pub mod trade;

pub use config::MatchingEngineConfig;
pub use order::{BookKey, Order, OrderId, OrderKey, Side, TimeInForce};
pub use order_book::{DepthLevel, DepthSnapshot, OrderBook, OrderBookStats, PriceLevel};
pub use trade::{new_match_id, Match, Trade};

// Re-export state machine
pub use order::state::{OrderStateTransition, OrderStatus};
