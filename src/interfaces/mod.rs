// ============================================================================
// Interfaces Module
// Contains all trait definitions and contracts
// ============================================================================

mod balance;
mod clock;
mod coordination;
mod event_handler;
mod matching_algorithm;
mod settlement;
mod signature;
mod store;

pub use balance::{BalanceProvider, InMemoryBalances};
pub use clock::{Clock, ManualClock, SystemClock};
pub use coordination::{CoordinationResult, CoordinationService, InMemoryCoordination};
pub use event_handler::{
    ChannelEventHandler, EventHandler, LoggingEventHandler, MarketEvent, NoOpEventHandler,
};
pub use matching_algorithm::{CrossingContext, CrossingOutcome, MatchingAlgorithm, PostOnlyCheck};
pub use settlement::{
    ChannelSettlementSink, NoOpSettlementSink, SettlementFill, SettlementOrder, SettlementReport,
    SettlementSink,
};
pub use signature::SignatureVerifier;
pub use store::{InMemoryOrderStore, OrderRecord, OrderStore};
