// ============================================================================
// Outcome Matching Engine Library
// Price-time matching core for signed outcome-share orders
// ============================================================================

//! # Outcome Matching Engine
//!
//! The matching core of a peer-to-peer outcome-share exchange. Makers sign
//! limit orders off-chain (EIP-712); the engine validates them, crosses them
//! against per-(market, outcome) books and hands fills to settlement.
//!
//! ## Features
//!
//! - **Price-time priority** with GTC, GTD, IOC, FOK and FAK, post-only and
//!   self-trade protection
//! - **Risk checks**: buy-side collateral reservation and per-market exposure caps
//! - **Per-book exclusion** across instances via leased locks, plus an
//!   idempotency cache for client retries
//! - **Recovery** from the order store, the shared event log or book snapshots
//!
//! ## Example
//!
//! ```rust
//! use outcome_matching_engine::prelude::*;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let engine = MatchingEngineBuilder::new(MatchingEngineConfig::default())
//!     .with_event_handler(Arc::new(LoggingEventHandler))
//!     .build()
//!     .unwrap();
//!
//! // Orders arrive as signed wire inputs
//! let unsigned = OrderInput {
//!     market_key: "80002:1".to_string(),
//!     chain_id: 80002,
//!     verifying_contract: "0x00000000000000000000000000000000000000cc".to_string(),
//!     maker: "0x00000000000000000000000000000000000000aa".to_string(),
//!     price: "500000".to_string(),
//!     amount: "1000000000000000000".to_string(),
//!     salt: "1".to_string(),
//!     signature: "0x".to_string(),
//!     ..OrderInput::default()
//! };
//!
//! let result = engine.submit_order(unsigned).await;
//! assert_eq!(result.error_code, Some(OrderErrorCode::InvalidSignature));
//! # }
//! ```

pub mod domain;
pub mod engine;
pub mod error;
pub mod interfaces;
pub mod numeric;
pub mod signing;

// Re-exports for convenience
pub mod prelude {
    pub use crate::domain::{
        BookKey, DepthSnapshot, Match, MatchingEngineConfig, Order, OrderBook, OrderBookStats,
        OrderId, OrderStateTransition, OrderStatus, Side, TimeInForce, Trade,
    };
    pub use crate::engine::{
        create_from_config, spawn_expiry_sweeper, CancelOutcome, CancelRequest, CloseMarketOutcome,
        Collaborators, EngineStats, MatchResult, MatchingEngine, MatchingEngineBuilder, OrderInput,
        PriceTimePriority,
    };
    pub use crate::error::{OrderError, OrderErrorCode};
    pub use crate::interfaces::{
        BalanceProvider, ChannelEventHandler, ChannelSettlementSink, Clock, CoordinationService,
        CrossingContext, EventHandler, InMemoryBalances, InMemoryCoordination, InMemoryOrderStore,
        LoggingEventHandler, MarketEvent, MatchingAlgorithm, NoOpEventHandler, OrderStore,
        SettlementFill, SettlementReport, SettlementSink, SignatureVerifier, SystemClock,
    };
    pub use crate::numeric::{Amount, Price, UsdcMicro};
}

/// Install a `tracing` subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter`. Does nothing if a subscriber is already set.
#[cfg(feature = "logging")]
pub fn init_logging(default_filter: &str) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
