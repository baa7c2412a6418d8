// ============================================================================
// Match and Trade Domain Models
// ============================================================================

use crate::numeric::{fee_for, order_notional_usdc, Amount, Price, UsdcMicro};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Order, OrderId};

/// Match identifier: `match-<uuid v4>`.
pub fn new_match_id() -> String {
    format!("match-{}", Uuid::new_v4())
}

/// One crossing of an incoming (taker) order against a resting (maker) one.
///
/// Both orders are copies taken right after the fill was applied, so
/// `remaining_amount` reflects the post-match state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub id: String,
    pub maker_order: Order,
    pub taker_order: Order,
    pub matched_amount: Amount,
    /// Always the maker's limit price
    pub matched_price: Price,
    pub maker_fee: UsdcMicro,
    pub taker_fee: UsdcMicro,
    pub timestamp: DateTime<Utc>,
}

impl Match {
    pub fn new(
        maker_order: Order,
        taker_order: Order,
        matched_amount: Amount,
        maker_fee_bps: u32,
        taker_fee_bps: u32,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let matched_price = maker_order.price;
        let notional = order_notional_usdc(matched_amount, matched_price);
        Self {
            id: new_match_id(),
            maker_order,
            taker_order,
            matched_amount,
            matched_price,
            maker_fee: fee_for(notional, maker_fee_bps),
            taker_fee: fee_for(notional, taker_fee_bps),
            timestamp,
        }
    }

    /// USDC value of the fill at the matched price.
    pub fn notional(&self) -> UsdcMicro {
        order_notional_usdc(self.matched_amount, self.matched_price)
    }

    /// Address of the buying side of this fill.
    pub fn buyer(&self) -> &str {
        if self.maker_order.is_buy() {
            &self.maker_order.maker
        } else {
            &self.taker_order.maker
        }
    }
}

/// Durable, append-only record derived from a [`Match`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub match_id: String,
    pub market_key: String,
    pub outcome_index: u32,
    pub maker: String,
    pub taker: String,
    pub maker_order_id: OrderId,
    pub taker_order_id: OrderId,
    pub maker_salt: String,
    pub taker_salt: String,
    pub is_buyer_maker: bool,
    pub price: Price,
    pub amount: Amount,
    pub maker_fee: UsdcMicro,
    pub taker_fee: UsdcMicro,
    pub timestamp: DateTime<Utc>,
}

impl From<&Match> for Trade {
    fn from(m: &Match) -> Self {
        Self {
            id: m.id.clone(),
            match_id: m.id.clone(),
            market_key: m.maker_order.market_key.clone(),
            outcome_index: m.maker_order.outcome_index,
            maker: m.maker_order.maker.clone(),
            taker: m.taker_order.maker.clone(),
            maker_order_id: m.maker_order.id.clone(),
            taker_order_id: m.taker_order.id.clone(),
            maker_salt: m.maker_order.salt.clone(),
            taker_salt: m.taker_order.salt.clone(),
            is_buyer_maker: m.maker_order.is_buy(),
            price: m.matched_price,
            amount: m.matched_amount,
            maker_fee: m.maker_fee,
            taker_fee: m.taker_fee,
            timestamp: m.timestamp,
        }
    }
}
