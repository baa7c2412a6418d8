// ============================================================================
// Settlement Interface
// Hand-off of committed fills to the batch settlement collaborator
// ============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::domain::Match;
use crate::numeric::{Amount, Price, UsdcMicro};

/// Signed maker order terms, as the settlement contract needs them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementOrder {
    pub maker: String,
    pub outcome_index: u32,
    pub is_buy: bool,
    pub price: Price,
    pub amount: Amount,
    pub salt: String,
    pub expiry: u64,
}

/// One committed fill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementFill {
    /// Match id
    pub id: String,
    pub market_key: String,
    pub chain_id: u64,
    pub verifying_contract: String,
    pub order: SettlementOrder,
    pub signature: String,
    pub fill_amount: Amount,
    pub taker: String,
    pub matched_price: Price,
    pub maker_fee: UsdcMicro,
    pub taker_fee: UsdcMicro,
    pub timestamp: DateTime<Utc>,
}

impl From<&Match> for SettlementFill {
    fn from(m: &Match) -> Self {
        let maker = &m.maker_order;
        Self {
            id: m.id.clone(),
            market_key: maker.market_key.clone(),
            chain_id: maker.chain_id,
            verifying_contract: maker.verifying_contract.clone(),
            order: SettlementOrder {
                maker: maker.maker.clone(),
                outcome_index: maker.outcome_index,
                is_buy: maker.is_buy(),
                price: maker.price,
                amount: maker.amount,
                salt: maker.salt.clone(),
                expiry: maker.expiry,
            },
            signature: maker.signature.clone(),
            fill_amount: m.matched_amount,
            taker: m.taker_order.maker.clone(),
            matched_price: m.matched_price,
            maker_fee: m.maker_fee,
            taker_fee: m.taker_fee,
            timestamp: m.timestamp,
        }
    }
}

/// Asynchronous outcome of a fill, reported back by the settlement side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SettlementReport {
    FillSettled { fill_id: String },
    FillFailed { fill_id: String, reason: String },
}

impl SettlementReport {
    pub fn fill_id(&self) -> &str {
        match self {
            SettlementReport::FillSettled { fill_id } | SettlementReport::FillFailed { fill_id, .. } => {
                fill_id
            },
        }
    }
}

/// Receiver of committed fills. Must not block: the engine calls it after
/// releasing the book lock, once per fill.
pub trait SettlementSink: Send + Sync {
    fn submit(&self, fill: SettlementFill);
}

/// Discards fills; for hosts without on-chain settlement.
pub struct NoOpSettlementSink;

impl SettlementSink for NoOpSettlementSink {
    fn submit(&self, _fill: SettlementFill) {}
}

/// Forwards fills into a tokio channel consumed by a settlement task.
pub struct ChannelSettlementSink {
    sender: mpsc::UnboundedSender<SettlementFill>,
}

impl ChannelSettlementSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SettlementFill>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl SettlementSink for ChannelSettlementSink {
    fn submit(&self, fill: SettlementFill) {
        if self.sender.send(fill).is_err() {
            tracing::warn!("Settlement receiver dropped, fill discarded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::fixtures::*;
    use crate::domain::Side;

    #[tokio::test]
    async fn test_channel_sink_forwards_maker_terms() {
        let (sink, mut rx) = ChannelSettlementSink::new();
        let maker = resting(MAKER_A, 9, Side::Sell, 500_000, 2 * ONE_SHARE);
        let taker = resting(MAKER_B, 10, Side::Buy, 600_000, ONE_SHARE);
        let m = Match::new(maker, taker, Amount(ONE_SHARE), 0, 0, Utc::now());

        sink.submit(SettlementFill::from(&m));

        let fill = rx.recv().await.unwrap();
        assert_eq!(fill.id, m.id);
        assert_eq!(fill.order.amount, Amount(2 * ONE_SHARE));
        assert_eq!(fill.fill_amount, Amount(ONE_SHARE));
        assert_eq!(fill.matched_price, Price(500_000));
        assert_eq!(fill.taker, MAKER_B);
        assert!(!fill.order.is_buy);
    }

    #[test]
    fn test_report_fill_id() {
        let report = SettlementReport::FillFailed {
            fill_id: "match-1".into(),
            reason: "reverted".into(),
        };
        assert_eq!(report.fill_id(), "match-1");
    }
}
