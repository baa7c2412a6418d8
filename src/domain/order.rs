// ============================================================================
// Order Domain Model
// ============================================================================

use crate::numeric::{order_notional_usdc, Amount, NumericError, Price, UsdcMicro};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use self::state::{OrderStatus, OrderStateTransition};

// ============================================================================
// Value Objects
// ============================================================================

/// In-memory order identity: `<maker lowercase>-<salt>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    pub fn new(maker: &str, salt: &str) -> Self {
        Self(format!("{}-{}", maker.to_lowercase(), salt))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies one order book: a (market, outcome) pair.
///
/// Ordering is by market key first so every outcome of a market is a
/// contiguous range in an ordered registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BookKey {
    pub market_key: String,
    pub outcome_index: u32,
}

impl BookKey {
    pub fn new(market_key: impl Into<String>, outcome_index: u32) -> Self {
        Self {
            market_key: market_key.into(),
            outcome_index,
        }
    }
}

impl fmt::Display for BookKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.market_key, self.outcome_index)
    }
}

/// Durable identity of a signed order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderKey {
    pub chain_id: u64,
    pub verifying_contract: String,
    pub maker: String,
    pub salt: String,
}

impl OrderKey {
    pub fn new(chain_id: u64, verifying_contract: &str, maker: &str, salt: &str) -> Self {
        Self {
            chain_id,
            verifying_contract: verifying_contract.to_lowercase(),
            maker: maker.to_lowercase(),
            salt: salt.to_string(),
        }
    }

    pub fn order_id(&self) -> OrderId {
        OrderId::new(&self.maker, &self.salt)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn from_is_buy(is_buy: bool) -> Self {
        if is_buy {
            Side::Buy
        } else {
            Side::Sell
        }
    }

    pub fn is_buy(self) -> bool {
        matches!(self, Side::Buy)
    }

    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Good Till Cancel - rests until filled, canceled or expired
    #[default]
    #[serde(rename = "GTC")]
    GoodTillCancel,
    /// Good Till Date - rests until an explicit, bounded expiry
    #[serde(rename = "GTD")]
    GoodTillDate,
    /// Immediate Or Cancel - fill now, discard remainder
    #[serde(rename = "IOC")]
    ImmediateOrCancel,
    /// Fill Or Kill - fill entire order now or nothing
    #[serde(rename = "FOK")]
    FillOrKill,
    /// Fill And Kill - fill what is available now, discard remainder
    #[serde(rename = "FAK")]
    FillAndKill,
}

impl TimeInForce {
    /// Whether an unfilled remainder is placed on the book.
    pub fn rests(self) -> bool {
        matches!(self, TimeInForce::GoodTillCancel | TimeInForce::GoodTillDate)
    }

    pub fn is_immediate(self) -> bool {
        !self.rests()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TimeInForce::GoodTillCancel => "GTC",
            TimeInForce::GoodTillDate => "GTD",
            TimeInForce::ImmediateOrCancel => "IOC",
            TimeInForce::FillOrKill => "FOK",
            TimeInForce::FillAndKill => "FAK",
        }
    }
}

impl FromStr for TimeInForce {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GTC" => Ok(TimeInForce::GoodTillCancel),
            "GTD" => Ok(TimeInForce::GoodTillDate),
            "IOC" => Ok(TimeInForce::ImmediateOrCancel),
            "FOK" => Ok(TimeInForce::FillOrKill),
            "FAK" => Ok(TimeInForce::FillAndKill),
            other => Err(format!("unknown time in force: {other}")),
        }
    }
}

// ============================================================================
// Order State Machine
// ============================================================================

pub mod state {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum OrderStatus {
        Pending,
        Open,
        PartiallyFilled,
        Filled,
        Canceled,
        Expired,
        Rejected,
    }

    impl OrderStatus {
        pub fn is_terminal(&self) -> bool {
            matches!(
                self,
                OrderStatus::Filled
                    | OrderStatus::Canceled
                    | OrderStatus::Expired
                    | OrderStatus::Rejected
            )
        }

        /// Statuses that may be resting on a book.
        pub fn is_live(&self) -> bool {
            matches!(self, OrderStatus::Open | OrderStatus::PartiallyFilled)
        }

        pub fn as_str(&self) -> &'static str {
            match self {
                OrderStatus::Pending => "pending",
                OrderStatus::Open => "open",
                OrderStatus::PartiallyFilled => "partially_filled",
                OrderStatus::Filled => "filled",
                OrderStatus::Canceled => "canceled",
                OrderStatus::Expired => "expired",
                OrderStatus::Rejected => "rejected",
            }
        }
    }

    /// Valid state transitions for the order state machine
    #[derive(Debug, Clone, Copy)]
    pub enum OrderStateTransition {
        Accept,
        Reject,
        PartialFill,
        Fill,
        Cancel,
        Expire,
    }

    impl OrderStatus {
        pub fn transition(&self, transition: OrderStateTransition) -> Result<OrderStatus, String> {
            match (self, transition) {
                (OrderStatus::Pending, OrderStateTransition::Accept) => Ok(OrderStatus::Open),
                (OrderStatus::Pending, OrderStateTransition::Reject) => Ok(OrderStatus::Rejected),

                (OrderStatus::Open, OrderStateTransition::PartialFill) => {
                    Ok(OrderStatus::PartiallyFilled)
                },
                (OrderStatus::Open, OrderStateTransition::Fill) => Ok(OrderStatus::Filled),
                (OrderStatus::Open, OrderStateTransition::Cancel) => Ok(OrderStatus::Canceled),
                (OrderStatus::Open, OrderStateTransition::Expire) => Ok(OrderStatus::Expired),

                (OrderStatus::PartiallyFilled, OrderStateTransition::PartialFill) => {
                    Ok(OrderStatus::PartiallyFilled)
                },
                (OrderStatus::PartiallyFilled, OrderStateTransition::Fill) => {
                    Ok(OrderStatus::Filled)
                },
                (OrderStatus::PartiallyFilled, OrderStateTransition::Cancel) => {
                    Ok(OrderStatus::Canceled)
                },
                (OrderStatus::PartiallyFilled, OrderStateTransition::Expire) => {
                    Ok(OrderStatus::Expired)
                },

                _ => Err(format!(
                    "Invalid transition from {:?} via {:?}",
                    self, transition
                )),
            }
        }
    }
}

// ============================================================================
// Order Entity
// ============================================================================

/// A signed limit order. Identity fields never change after admission;
/// `remaining_amount`, `status` and `sequence` are owned by the book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub market_key: String,
    pub outcome_index: u32,
    pub maker: String,
    pub side: Side,
    pub price: Price,
    pub amount: Amount,
    pub remaining_amount: Amount,
    pub salt: String,
    /// Unix seconds, 0 = never expires
    pub expiry: u64,
    pub signature: String,
    pub chain_id: u64,
    pub verifying_contract: String,
    pub sequence: u64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub time_in_force: TimeInForce,
    #[serde(default)]
    pub post_only: bool,
}

impl Order {
    pub fn book_key(&self) -> BookKey {
        BookKey::new(self.market_key.clone(), self.outcome_index)
    }

    pub fn order_key(&self) -> OrderKey {
        OrderKey::new(
            self.chain_id,
            &self.verifying_contract,
            &self.maker,
            &self.salt,
        )
    }

    pub fn is_buy(&self) -> bool {
        self.side.is_buy()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry != 0 && now.timestamp() >= self.expiry as i64
    }

    /// Collateral locked by the unfilled part of a buy order.
    pub fn remaining_notional(&self) -> UsdcMicro {
        order_notional_usdc(self.remaining_amount, self.price)
    }

    /// Whether this order, as taker, crosses a resting order at `maker_price`.
    pub fn crosses(&self, maker_price: Price) -> bool {
        match self.side {
            Side::Buy => self.price >= maker_price,
            Side::Sell => self.price <= maker_price,
        }
    }

    /// Reduce the remaining amount by `quantity` and advance the status.
    pub fn apply_fill(&mut self, quantity: Amount) -> Result<OrderStatus, NumericError> {
        self.remaining_amount = self.remaining_amount.checked_sub(quantity)?;
        let transition = if self.remaining_amount.is_zero() {
            OrderStateTransition::Fill
        } else {
            OrderStateTransition::PartialFill
        };
        if let Ok(next) = self.status.transition(transition) {
            self.status = next;
        }
        Ok(self.status)
    }

    /// Apply a lifecycle transition, ignoring ones the state machine rejects.
    pub fn transition(&mut self, transition: OrderStateTransition) -> bool {
        match self.status.transition(transition) {
            Ok(next) => {
                self.status = next;
                true
            },
            Err(_) => false,
        }
    }
}
