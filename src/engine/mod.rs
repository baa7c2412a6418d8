// ============================================================================
// Engine Module
// Contains the core matching engine business logic
// ============================================================================

mod matching_engine;
mod price_time;

pub mod book_manager;
pub mod factory;
pub mod idempotency;
pub mod lock;
pub mod recovery;
pub mod sweeper;
pub mod validation;

pub use factory::{create_from_config, MatchingEngineBuilder};
pub use matching_engine::{
    CancelOutcome, CloseMarketOutcome, Collaborators, EngineStats, MatchResult, MatchingEngine,
};
pub use price_time::PriceTimePriority;
pub use sweeper::spawn_expiry_sweeper;
pub use validation::{CancelRequest, OrderInput};
