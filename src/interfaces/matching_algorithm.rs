// ============================================================================
// Matching Algorithm Interface
// Defines the contract for crossing an incoming order against a book
// ============================================================================

use crate::domain::{Match, Order, OrderBook};
use crate::numeric::Price;
use chrono::{DateTime, Utc};
use smallvec::SmallVec;

/// Parameters of one crossing pass, fixed for its duration.
#[derive(Debug, Clone, Copy)]
pub struct CrossingContext {
    pub now: DateTime<Utc>,
    pub maker_fee_bps: u32,
    pub taker_fee_bps: u32,
    pub self_trade_protection: bool,
}

/// Everything a crossing pass changed on the book.
#[derive(Debug, Clone, Default)]
pub struct CrossingOutcome {
    /// Fills in execution order
    pub matches: Vec<Match>,
    /// Maker orders after their fill, in execution order
    pub updated_makers: Vec<Order>,
    /// Expired counter orders purged during the walk
    pub expired: SmallVec<[Order; 4]>,
    /// FOK pre-flight found insufficient depth; the book was not touched
    pub fok_killed: bool,
}

/// Result of checking a post-only order against the book.
#[derive(Debug, Clone, Default)]
pub struct PostOnlyCheck {
    pub would_cross: bool,
    pub expired: SmallVec<[Order; 4]>,
}

/// Strategy pattern interface for matching algorithms
pub trait MatchingAlgorithm: Send + Sync {
    /// Cross `incoming` against the opposite side of `book`.
    ///
    /// Mutates `incoming.remaining_amount`/`status` and the book in place.
    /// Never blocks; the caller holds the book's exclusive section.
    fn match_order(&self, incoming: &mut Order, book: &mut OrderBook, ctx: &CrossingContext) -> CrossingOutcome;

    /// Walk the best counter orders for a post-only order, purging expired
    /// ones, and report whether it would execute immediately.
    fn check_post_only(&self, incoming: &Order, book: &mut OrderBook, ctx: &CrossingContext) -> PostOnlyCheck;

    /// Get the algorithm name for logging
    fn name(&self) -> &str;

    /// Check if an incoming order crosses a resting price
    fn prices_cross(&self, incoming: &Order, book_price: Price) -> bool {
        incoming.crosses(book_price)
    }
}
