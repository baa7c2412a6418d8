// ============================================================================
// Price/Time Priority Matching Algorithm (FIFO)
// ============================================================================

use crate::domain::{Match, Order, OrderBook, OrderStateTransition, TimeInForce};
use crate::interfaces::{CrossingContext, CrossingOutcome, MatchingAlgorithm, PostOnlyCheck};
use crate::numeric::Amount;

/// Price/Time Priority (FIFO) matching algorithm
///
/// Resting orders are matched best price first, and by admission sequence
/// within a price. Every fill executes at the resting (maker) order's price.
///
/// # Example
/// ```text
/// Book:  ask 0.50 x 1.0 (Order A, seq=100)
///        ask 0.50 x 2.0 (Order B, seq=101)
///
/// Incoming: Buy 1.5 @ 0.60
/// Result: 1.0 @ 0.50 with A, then 0.5 @ 0.50 with B
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct PriceTimePriority;

impl PriceTimePriority {
    pub fn new() -> Self {
        Self
    }

    /// FOK pre-flight: whether live, crossable depth (excluding the
    /// incoming maker under STP) covers the whole order.
    fn fok_fillable(&self, incoming: &Order, book: &OrderBook, ctx: &CrossingContext) -> bool {
        let mut required = incoming.remaining_amount;
        for counter in book.counter_orders(incoming.side) {
            if !self.prices_cross(incoming, counter.price) {
                break;
            }
            if ctx.self_trade_protection && counter.maker == incoming.maker {
                continue;
            }
            if counter.is_expired_at(ctx.now) {
                continue;
            }
            required = required.saturating_sub(counter.remaining_amount);
            if required.is_zero() {
                return true;
            }
        }
        required.is_zero()
    }

    fn purge_expired(book: &mut OrderBook, counter: &Order) -> Option<Order> {
        let mut expired = book.remove_order(&counter.id)?;
        expired.transition(OrderStateTransition::Expire);
        Some(expired)
    }
}

impl MatchingAlgorithm for PriceTimePriority {
    fn match_order(&self, incoming: &mut Order, book: &mut OrderBook, ctx: &CrossingContext) -> CrossingOutcome {
        let mut outcome = CrossingOutcome::default();

        if incoming.time_in_force == TimeInForce::FillOrKill && !self.fok_fillable(incoming, book, ctx) {
            outcome.fok_killed = true;
            return outcome;
        }

        let exclude = ctx.self_trade_protection.then(|| incoming.maker.clone());

        while !incoming.remaining_amount.is_zero() {
            let Some(counter) = book
                .best_counter_order(incoming.side, exclude.as_deref())
                .cloned()
            else {
                break;
            };

            if !self.prices_cross(incoming, counter.price) {
                break;
            }

            if counter.is_expired_at(ctx.now) {
                if let Some(expired) = Self::purge_expired(book, &counter) {
                    outcome.expired.push(expired);
                }
                continue;
            }

            let quantity: Amount = incoming.remaining_amount.min(counter.remaining_amount);
            let mut maker = counter;
            if maker.apply_fill(quantity).is_err() || incoming.apply_fill(quantity).is_err() {
                tracing::error!(maker = %maker.id, taker = %incoming.id, "Fill exceeded remaining amount");
                break;
            }

            book.update_order(&maker);
            book.record_trade(maker.price, quantity, ctx.now);

            outcome.matches.push(Match::new(
                maker.clone(),
                incoming.clone(),
                quantity,
                ctx.maker_fee_bps,
                ctx.taker_fee_bps,
                ctx.now,
            ));
            outcome.updated_makers.push(maker);
        }

        outcome
    }

    fn check_post_only(&self, incoming: &Order, book: &mut OrderBook, ctx: &CrossingContext) -> PostOnlyCheck {
        let mut check = PostOnlyCheck::default();

        while let Some(counter) = book.best_counter_order(incoming.side, None).cloned() {
            if counter.is_expired_at(ctx.now) {
                if let Some(expired) = Self::purge_expired(book, &counter) {
                    check.expired.push(expired);
                }
                continue;
            }
            check.would_cross = self.prices_cross(incoming, counter.price);
            break;
        }

        check
    }

    fn name(&self) -> &str {
        "PriceTime"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::fixtures::*;
    use crate::domain::{BookKey, OrderStatus, Side};
    use crate::numeric::{Price, UsdcMicro};
    use chrono::{DateTime, Duration, Utc};

    fn ctx(now: DateTime<Utc>) -> CrossingContext {
        CrossingContext {
            now,
            maker_fee_bps: 0,
            taker_fee_bps: 0,
            self_trade_protection: false,
        }
    }

    fn book_with(orders: Vec<Order>) -> OrderBook {
        let mut book = OrderBook::new(BookKey::new("80002:1", 0));
        for order in orders {
            book.add_order(order);
        }
        book
    }

    fn taker(side: Side, price: u64, amount: u128, tif: TimeInForce) -> Order {
        let mut order = resting(MAKER_B, 1_000, side, price, amount);
        order.time_in_force = tif;
        order
    }

    #[test]
    fn test_price_time_fifo_order() {
        let algo = PriceTimePriority::new();
        let first = resting(MAKER_A, 1, Side::Sell, 500_000, ONE_SHARE);
        let second = resting(MAKER_A, 2, Side::Sell, 500_000, ONE_SHARE);
        let mut book = book_with(vec![second.clone(), first.clone()]);

        let mut buy = taker(Side::Buy, 500_000, ONE_SHARE, TimeInForce::GoodTillCancel);
        let outcome = algo.match_order(&mut buy, &mut book, &ctx(Utc::now()));

        assert_eq!(outcome.matches.len(), 1);
        assert_eq!(outcome.matches[0].maker_order.id, first.id);
        assert!(book.contains(&second.id));
        assert_eq!(buy.status, OrderStatus::Filled);
    }

    #[test]
    fn test_better_price_first_and_maker_price_used() {
        let algo = PriceTimePriority::new();
        let mut book = book_with(vec![
            resting(MAKER_A, 1, Side::Sell, 520_000, ONE_SHARE),
            resting(MAKER_A, 2, Side::Sell, 510_000, ONE_SHARE),
        ]);

        let mut buy = taker(Side::Buy, 600_000, 2 * ONE_SHARE, TimeInForce::GoodTillCancel);
        let outcome = algo.match_order(&mut buy, &mut book, &ctx(Utc::now()));

        let prices: Vec<Price> = outcome.matches.iter().map(|m| m.matched_price).collect();
        assert_eq!(prices, vec![Price(510_000), Price(520_000)]);
        assert!(book.is_empty());
        assert_eq!(book.last_trade_price(), Some(Price(520_000)));
        assert_eq!(book.volume_24h(), Amount(2 * ONE_SHARE));
    }

    #[test]
    fn test_partial_fill_of_maker_keeps_it_resting() {
        let algo = PriceTimePriority::new();
        let maker = resting(MAKER_A, 1, Side::Buy, 500_000, 3 * ONE_SHARE);
        let mut book = book_with(vec![maker.clone()]);

        let mut sell = taker(Side::Sell, 450_000, ONE_SHARE, TimeInForce::ImmediateOrCancel);
        let outcome = algo.match_order(&mut sell, &mut book, &ctx(Utc::now()));

        assert_eq!(outcome.matches.len(), 1);
        assert_eq!(outcome.matches[0].matched_price, Price(500_000));
        let resting_maker = book.get_order(&maker.id).unwrap();
        assert_eq!(resting_maker.remaining_amount, Amount(2 * ONE_SHARE));
        assert_eq!(resting_maker.status, OrderStatus::PartiallyFilled);
        assert_eq!(outcome.updated_makers[0].status, OrderStatus::PartiallyFilled);
    }

    #[test]
    fn test_no_cross_leaves_book_untouched() {
        let algo = PriceTimePriority::new();
        let mut book = book_with(vec![resting(MAKER_A, 1, Side::Sell, 600_000, ONE_SHARE)]);

        let mut buy = taker(Side::Buy, 599_999, ONE_SHARE, TimeInForce::GoodTillCancel);
        let outcome = algo.match_order(&mut buy, &mut book, &ctx(Utc::now()));

        assert!(outcome.matches.is_empty());
        assert_eq!(buy.remaining_amount, Amount(ONE_SHARE));
        assert_eq!(book.order_count(), 1);
    }

    #[test]
    fn test_fok_insufficient_depth_is_killed_without_side_effects() {
        let algo = PriceTimePriority::new();
        let ask = resting(MAKER_A, 1, Side::Sell, 500_000, ONE_SHARE);
        let mut book = book_with(vec![ask.clone()]);

        let mut buy = taker(Side::Buy, 600_000, 2 * ONE_SHARE, TimeInForce::FillOrKill);
        let outcome = algo.match_order(&mut buy, &mut book, &ctx(Utc::now()));

        assert!(outcome.fok_killed);
        assert!(outcome.matches.is_empty());
        assert_eq!(book.get_order(&ask.id), Some(&ask));
        assert_eq!(book.last_trade_price(), None);
    }

    #[test]
    fn test_fok_sufficient_depth_fills_completely() {
        let algo = PriceTimePriority::new();
        let mut book = book_with(vec![
            resting(MAKER_A, 1, Side::Sell, 500_000, ONE_SHARE),
            resting(MAKER_A, 2, Side::Sell, 500_000, ONE_SHARE),
        ]);

        let mut buy = taker(Side::Buy, 600_000, 2 * ONE_SHARE, TimeInForce::FillOrKill);
        let outcome = algo.match_order(&mut buy, &mut book, &ctx(Utc::now()));

        assert!(!outcome.fok_killed);
        let total: Amount = outcome.matches.iter().map(|m| m.matched_amount).sum();
        assert_eq!(total, Amount(2 * ONE_SHARE));
        assert!(book.is_empty());
    }

    #[test]
    fn test_fok_ignores_expired_and_non_crossing_depth() {
        let algo = PriceTimePriority::new();
        let now = Utc::now();
        let mut expired = resting(MAKER_A, 1, Side::Sell, 500_000, ONE_SHARE);
        expired.expiry = (now - Duration::seconds(10)).timestamp() as u64;
        let mut book = book_with(vec![
            expired,
            resting(MAKER_A, 2, Side::Sell, 500_000, ONE_SHARE),
            resting(MAKER_A, 3, Side::Sell, 700_000, ONE_SHARE),
        ]);

        let mut buy = taker(Side::Buy, 600_000, 2 * ONE_SHARE, TimeInForce::FillOrKill);
        let outcome = algo.match_order(&mut buy, &mut book, &ctx(now));

        assert!(outcome.fok_killed);
        assert_eq!(book.order_count(), 3);
    }

    #[test]
    fn test_self_trade_protection_skips_own_orders() {
        let algo = PriceTimePriority::new();
        let own = resting(MAKER_B, 1, Side::Sell, 500_000, ONE_SHARE);
        let other = resting(MAKER_A, 2, Side::Sell, 510_000, ONE_SHARE);
        let mut book = book_with(vec![own.clone(), other.clone()]);

        let mut context = ctx(Utc::now());
        context.self_trade_protection = true;
        let mut buy = taker(Side::Buy, 600_000, 2 * ONE_SHARE, TimeInForce::ImmediateOrCancel);
        let outcome = algo.match_order(&mut buy, &mut book, &context);

        assert_eq!(outcome.matches.len(), 1);
        assert_eq!(outcome.matches[0].maker_order.id, other.id);
        assert!(book.contains(&own.id));
        assert_eq!(buy.remaining_amount, Amount(ONE_SHARE));
    }

    #[test]
    fn test_self_trade_allowed_when_protection_off() {
        let algo = PriceTimePriority::new();
        let mut book = book_with(vec![resting(MAKER_B, 1, Side::Sell, 500_000, ONE_SHARE)]);

        let mut buy = taker(Side::Buy, 600_000, ONE_SHARE, TimeInForce::ImmediateOrCancel);
        let outcome = algo.match_order(&mut buy, &mut book, &ctx(Utc::now()));
        assert_eq!(outcome.matches.len(), 1);
    }

    #[test]
    fn test_expired_counter_purged_before_matching_others() {
        let algo = PriceTimePriority::new();
        let now = Utc::now();
        let live_first = resting(MAKER_A, 1, Side::Sell, 500_000, ONE_SHARE);
        let mut stale = resting(MAKER_A, 2, Side::Sell, 500_000, ONE_SHARE);
        stale.expiry = (now - Duration::seconds(10)).timestamp() as u64;
        let live_last = resting(MAKER_A, 3, Side::Sell, 510_000, ONE_SHARE);
        let mut book = book_with(vec![live_first.clone(), stale.clone(), live_last.clone()]);

        let mut buy = taker(Side::Buy, 600_000, 2 * ONE_SHARE, TimeInForce::GoodTillCancel);
        let outcome = algo.match_order(&mut buy, &mut book, &ctx(now));

        assert_eq!(outcome.expired.len(), 1);
        assert_eq!(outcome.expired[0].id, stale.id);
        assert_eq!(outcome.expired[0].status, OrderStatus::Expired);
        let makers: Vec<_> = outcome.matches.iter().map(|m| m.maker_order.id.clone()).collect();
        assert_eq!(makers, vec![live_first.id, live_last.id]);
        assert!(book.is_empty());
    }

    #[test]
    fn test_fees_floor_on_matched_notional() {
        let algo = PriceTimePriority::new();
        let mut book = book_with(vec![resting(MAKER_A, 1, Side::Sell, 333_333, 3 * ONE_SHARE)]);

        let mut context = ctx(Utc::now());
        context.maker_fee_bps = 10;
        context.taker_fee_bps = 25;
        let mut buy = taker(Side::Buy, 400_000, 3 * ONE_SHARE, TimeInForce::ImmediateOrCancel);
        let outcome = algo.match_order(&mut buy, &mut book, &context);

        assert_eq!(outcome.matches[0].maker_fee, UsdcMicro(999));
        assert_eq!(outcome.matches[0].taker_fee, UsdcMicro(2_499));
    }

    #[test]
    fn test_post_only_check() {
        let algo = PriceTimePriority::new();
        let now = Utc::now();
        let mut stale = resting(MAKER_A, 1, Side::Sell, 450_000, ONE_SHARE);
        stale.expiry = (now - Duration::seconds(1)).timestamp() as u64;
        let mut book = book_with(vec![stale, resting(MAKER_A, 2, Side::Sell, 600_000, ONE_SHARE)]);

        let passive = taker(Side::Buy, 500_000, ONE_SHARE, TimeInForce::GoodTillCancel);
        let check = algo.check_post_only(&passive, &mut book, &ctx(now));
        assert!(!check.would_cross);
        assert_eq!(check.expired.len(), 1);
        assert_eq!(book.order_count(), 1);

        let aggressive = taker(Side::Buy, 600_000, ONE_SHARE, TimeInForce::GoodTillCancel);
        let check = algo.check_post_only(&aggressive, &mut book, &ctx(now));
        assert!(check.would_cross);
        assert_eq!(book.order_count(), 1);
    }
}
