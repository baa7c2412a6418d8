// ============================================================================
// Durable Order Store Interface
// Typed persistence boundary for orders and trades
// ============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::domain::{Order, OrderId, OrderKey, OrderStatus, Side, TimeInForce, Trade};
use crate::error::StoreError;
use crate::numeric::Amount;

/// Order row as stored. Numerics are decimal strings; conversion into
/// [`Order`] validates and normalizes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: String,
    pub chain_id: u64,
    pub verifying_contract: String,
    pub market_key: String,
    pub outcome_index: u32,
    pub maker_address: String,
    pub maker_salt: String,
    pub is_buy: bool,
    pub price: String,
    pub amount: String,
    pub remaining: String,
    pub status: String,
    pub expiry: u64,
    pub signature: String,
    pub sequence: String,
    pub tif: String,
    pub post_only: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderRecord {
    pub fn key(&self) -> OrderKey {
        OrderKey::new(
            self.chain_id,
            &self.verifying_contract,
            &self.maker_address,
            &self.maker_salt,
        )
    }

    pub fn status(&self) -> Option<OrderStatus> {
        parse_status(&self.status)
    }
}

impl From<&Order> for OrderRecord {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id.to_string(),
            chain_id: order.chain_id,
            verifying_contract: order.verifying_contract.to_lowercase(),
            market_key: order.market_key.clone(),
            outcome_index: order.outcome_index,
            maker_address: order.maker.to_lowercase(),
            maker_salt: order.salt.clone(),
            is_buy: order.is_buy(),
            price: order.price.to_string(),
            amount: order.amount.to_string(),
            remaining: order.remaining_amount.to_string(),
            status: order.status.as_str().to_string(),
            expiry: order.expiry,
            signature: order.signature.clone(),
            sequence: order.sequence.to_string(),
            tif: order.time_in_force.as_str().to_string(),
            post_only: order.post_only,
            created_at: order.created_at,
            updated_at: Utc::now(),
        }
    }
}

impl TryFrom<OrderRecord> for Order {
    type Error = StoreError;

    fn try_from(row: OrderRecord) -> Result<Self, Self::Error> {
        let malformed = |reason: String| StoreError::MalformedRow {
            id: row.id.clone(),
            reason,
        };

        let price = row.price.parse().map_err(|e| malformed(format!("price: {e}")))?;
        let amount: Amount = row.amount.parse().map_err(|e| malformed(format!("amount: {e}")))?;
        let remaining: Amount = row
            .remaining
            .parse()
            .map_err(|e| malformed(format!("remaining: {e}")))?;
        if remaining > amount {
            return Err(malformed("remaining exceeds amount".to_string()));
        }
        let sequence = row
            .sequence
            .parse()
            .map_err(|e| malformed(format!("sequence: {e}")))?;
        let status = parse_status(&row.status)
            .ok_or_else(|| malformed(format!("status: {}", row.status)))?;
        let time_in_force = if row.tif.is_empty() {
            TimeInForce::default()
        } else {
            row.tif.parse().map_err(malformed)?
        };
        let maker = row.maker_address.to_lowercase();

        Ok(Order {
            id: OrderId::new(&maker, &row.maker_salt),
            market_key: row.market_key,
            outcome_index: row.outcome_index,
            side: Side::from_is_buy(row.is_buy),
            price,
            amount,
            remaining_amount: remaining,
            salt: row.maker_salt,
            expiry: row.expiry,
            signature: row.signature,
            chain_id: row.chain_id,
            verifying_contract: row.verifying_contract.to_lowercase(),
            sequence,
            status,
            created_at: row.created_at,
            time_in_force,
            post_only: row.post_only,
            maker,
        })
    }
}

fn parse_status(status: &str) -> Option<OrderStatus> {
    Some(match status {
        "pending" => OrderStatus::Pending,
        "open" => OrderStatus::Open,
        "partially_filled" => OrderStatus::PartiallyFilled,
        "filled" => OrderStatus::Filled,
        "canceled" | "cancelled" => OrderStatus::Canceled,
        "expired" => OrderStatus::Expired,
        "rejected" => OrderStatus::Rejected,
        _ => return None,
    })
}

/// Durable order and trade storage shared by all engine instances.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert or replace an order row.
    async fn upsert_order(&self, record: OrderRecord) -> Result<(), StoreError>;

    async fn get_order(&self, key: &OrderKey) -> Result<Option<OrderRecord>, StoreError>;

    /// Update remaining amount and status of a non-terminal row. Returns
    /// false when the row is missing or already terminal.
    async fn update_order(
        &self,
        key: &OrderKey,
        remaining: Amount,
        status: OrderStatus,
    ) -> Result<bool, StoreError>;

    /// Rows with status open or partially filled, optionally for one market.
    async fn load_open_orders(&self, market_key: Option<&str>) -> Result<Vec<OrderRecord>, StoreError>;

    /// Open buy rows of one maker across all markets.
    async fn open_buy_orders(&self, maker: &str) -> Result<Vec<OrderRecord>, StoreError>;

    async fn insert_trade(&self, trade: &Trade) -> Result<(), StoreError>;
}

/// In-process store for single-instance hosts and tests.
#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: RwLock<HashMap<OrderKey, OrderRecord>>,
    trades: Mutex<Vec<Trade>>,
    unavailable: AtomicBool,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails until re-enabled.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn trades(&self) -> Vec<Trade> {
        self.trades.lock().clone()
    }

    pub fn order_count(&self) -> usize {
        self.orders.read().len()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store disabled".to_string()));
        }
        Ok(())
    }
}

fn is_open(record: &OrderRecord) -> bool {
    record.status().is_some_and(|status| status.is_live())
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn upsert_order(&self, record: OrderRecord) -> Result<(), StoreError> {
        self.check()?;
        self.orders.write().insert(record.key(), record);
        Ok(())
    }

    async fn get_order(&self, key: &OrderKey) -> Result<Option<OrderRecord>, StoreError> {
        self.check()?;
        Ok(self.orders.read().get(key).cloned())
    }

    async fn update_order(
        &self,
        key: &OrderKey,
        remaining: Amount,
        status: OrderStatus,
    ) -> Result<bool, StoreError> {
        self.check()?;
        let mut orders = self.orders.write();
        match orders.get_mut(key) {
            Some(record) if !record.status().is_some_and(|s| s.is_terminal()) => {
                record.remaining = remaining.to_string();
                record.status = status.as_str().to_string();
                record.updated_at = Utc::now();
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    async fn load_open_orders(&self, market_key: Option<&str>) -> Result<Vec<OrderRecord>, StoreError> {
        self.check()?;
        Ok(self
            .orders
            .read()
            .values()
            .filter(|record| is_open(record))
            .filter(|record| market_key.map_or(true, |m| record.market_key == m))
            .cloned()
            .collect())
    }

    async fn open_buy_orders(&self, maker: &str) -> Result<Vec<OrderRecord>, StoreError> {
        self.check()?;
        let maker = maker.to_lowercase();
        Ok(self
            .orders
            .read()
            .values()
            .filter(|record| record.is_buy && record.maker_address == maker && is_open(record))
            .cloned()
            .collect())
    }

    async fn insert_trade(&self, trade: &Trade) -> Result<(), StoreError> {
        self.check()?;
        self.trades.lock().push(trade.clone());
        Ok(())
    }
}
