//! Error types for the matching core
//!
//! Admission errors carry a stable wire code; collaborator errors convert
//! into them at the engine boundary.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Stable, client-facing rejection codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderErrorCode {
    InvalidMarketKey,
    InvalidOutcomeIndex,
    InvalidChainId,
    InvalidVerifyingContract,
    InvalidMaker,
    InvalidSalt,
    InvalidExpiry,
    InvalidSignature,
    InvalidPrice,
    InvalidTickSize,
    InvalidAmount,
    InvalidTimeInForce,
    InvalidPostOnly,
    OrderExpired,
    DuplicateOrder,
    InsufficientBalance,
    MarketLongExposureLimit,
    MarketShortExposureLimit,
    BalanceCheckFailed,
    PostOnlyWouldCross,
    OrderbookBusy,
    StorageUnavailable,
}

impl OrderErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderErrorCode::InvalidMarketKey => "INVALID_MARKET_KEY",
            OrderErrorCode::InvalidOutcomeIndex => "INVALID_OUTCOME_INDEX",
            OrderErrorCode::InvalidChainId => "INVALID_CHAIN_ID",
            OrderErrorCode::InvalidVerifyingContract => "INVALID_VERIFYING_CONTRACT",
            OrderErrorCode::InvalidMaker => "INVALID_MAKER",
            OrderErrorCode::InvalidSalt => "INVALID_SALT",
            OrderErrorCode::InvalidExpiry => "INVALID_EXPIRY",
            OrderErrorCode::InvalidSignature => "INVALID_SIGNATURE",
            OrderErrorCode::InvalidPrice => "INVALID_PRICE",
            OrderErrorCode::InvalidTickSize => "INVALID_TICK_SIZE",
            OrderErrorCode::InvalidAmount => "INVALID_AMOUNT",
            OrderErrorCode::InvalidTimeInForce => "INVALID_TIME_IN_FORCE",
            OrderErrorCode::InvalidPostOnly => "INVALID_POST_ONLY",
            OrderErrorCode::OrderExpired => "ORDER_EXPIRED",
            OrderErrorCode::DuplicateOrder => "DUPLICATE_ORDER",
            OrderErrorCode::InsufficientBalance => "INSUFFICIENT_BALANCE",
            OrderErrorCode::MarketLongExposureLimit => "MARKET_LONG_EXPOSURE_LIMIT",
            OrderErrorCode::MarketShortExposureLimit => "MARKET_SHORT_EXPOSURE_LIMIT",
            OrderErrorCode::BalanceCheckFailed => "BALANCE_CHECK_FAILED",
            OrderErrorCode::PostOnlyWouldCross => "POST_ONLY_WOULD_CROSS",
            OrderErrorCode::OrderbookBusy => "ORDERBOOK_BUSY",
            OrderErrorCode::StorageUnavailable => "STORAGE_UNAVAILABLE",
        }
    }

    /// Contention and collaborator outages; everything else needs the
    /// caller to change the request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrderErrorCode::OrderbookBusy
                | OrderErrorCode::StorageUnavailable
                | OrderErrorCode::BalanceCheckFailed
        )
    }
}

impl fmt::Display for OrderErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order admission and lifecycle errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderError {
    #[error("Invalid market key")]
    InvalidMarketKey,

    #[error("Invalid outcome index")]
    InvalidOutcomeIndex,

    #[error("Invalid chain id")]
    InvalidChainId,

    #[error("Invalid verifying contract address")]
    InvalidVerifyingContract,

    #[error("Invalid maker address")]
    InvalidMaker,

    #[error("Invalid salt")]
    InvalidSalt,

    #[error("Invalid expiry: {0}")]
    InvalidExpiry(String),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Price not aligned to tick size")]
    InvalidTickSize,

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid time in force: {0}")]
    InvalidTimeInForce(String),

    #[error("Post-only cannot be combined with IOC/FOK/FAK")]
    InvalidPostOnly,

    #[error("Order expired")]
    OrderExpired,

    #[error("Order with this salt already exists")]
    DuplicateOrder,

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: String, available: String },

    #[error("Market long exposure limit exceeded")]
    LongExposureLimit,

    #[error("Market short exposure limit exceeded")]
    ShortExposureLimit,

    #[error("Balance check failed: {0}")]
    BalanceCheckFailed(String),

    #[error("Post-only order would be immediately executed")]
    PostOnlyWouldCross,

    #[error("Orderbook busy")]
    OrderbookBusy,

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl OrderError {
    pub fn code(&self) -> OrderErrorCode {
        match self {
            OrderError::InvalidMarketKey => OrderErrorCode::InvalidMarketKey,
            OrderError::InvalidOutcomeIndex => OrderErrorCode::InvalidOutcomeIndex,
            OrderError::InvalidChainId => OrderErrorCode::InvalidChainId,
            OrderError::InvalidVerifyingContract => OrderErrorCode::InvalidVerifyingContract,
            OrderError::InvalidMaker => OrderErrorCode::InvalidMaker,
            OrderError::InvalidSalt => OrderErrorCode::InvalidSalt,
            OrderError::InvalidExpiry(_) => OrderErrorCode::InvalidExpiry,
            OrderError::InvalidSignature => OrderErrorCode::InvalidSignature,
            OrderError::InvalidPrice(_) => OrderErrorCode::InvalidPrice,
            OrderError::InvalidTickSize => OrderErrorCode::InvalidTickSize,
            OrderError::InvalidAmount(_) => OrderErrorCode::InvalidAmount,
            OrderError::InvalidTimeInForce(_) => OrderErrorCode::InvalidTimeInForce,
            OrderError::InvalidPostOnly => OrderErrorCode::InvalidPostOnly,
            OrderError::OrderExpired => OrderErrorCode::OrderExpired,
            OrderError::DuplicateOrder => OrderErrorCode::DuplicateOrder,
            OrderError::InsufficientBalance { .. } => OrderErrorCode::InsufficientBalance,
            OrderError::LongExposureLimit => OrderErrorCode::MarketLongExposureLimit,
            OrderError::ShortExposureLimit => OrderErrorCode::MarketShortExposureLimit,
            OrderError::BalanceCheckFailed(_) => OrderErrorCode::BalanceCheckFailed,
            OrderError::PostOnlyWouldCross => OrderErrorCode::PostOnlyWouldCross,
            OrderError::OrderbookBusy => OrderErrorCode::OrderbookBusy,
            OrderError::StorageUnavailable(_) => OrderErrorCode::StorageUnavailable,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }
}

/// Durable order store failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed order row {id}: {reason}")]
    MalformedRow { id: String, reason: String },
}

/// Distributed lock / cache failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinationError {
    #[error("Coordination service unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CoordinationError {
    fn from(err: serde_json::Error) -> Self {
        CoordinationError::Serialization(err.to_string())
    }
}

/// Balance / reservation ledger failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BalanceError {
    #[error("Balance service unavailable: {0}")]
    Unavailable(String),
}

/// Typed-data signature failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Malformed signature: {0}")]
    Malformed(String),

    #[error("Invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Signer recovery failed: {0}")]
    Recovery(String),
}

impl From<StoreError> for OrderError {
    fn from(err: StoreError) -> Self {
        OrderError::StorageUnavailable(err.to_string())
    }
}

impl From<BalanceError> for OrderError {
    fn from(err: BalanceError) -> Self {
        OrderError::BalanceCheckFailed(err.to_string())
    }
}

impl From<SignatureError> for OrderError {
    fn from(_: SignatureError) -> Self {
        OrderError::InvalidSignature
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_error_codes() {
        assert_eq!(OrderError::DuplicateOrder.code().as_str(), "DUPLICATE_ORDER");
        assert_eq!(
            OrderError::LongExposureLimit.code(),
            OrderErrorCode::MarketLongExposureLimit
        );
        assert_eq!(
            serde_json::to_string(&OrderErrorCode::PostOnlyWouldCross).unwrap(),
            "\"POST_ONLY_WOULD_CROSS\""
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(OrderError::OrderbookBusy.is_retryable());
        assert!(OrderError::StorageUnavailable("down".into()).is_retryable());
        assert!(OrderError::BalanceCheckFailed("timeout".into()).is_retryable());
        assert!(!OrderError::InvalidSignature.is_retryable());
        assert!(!OrderError::PostOnlyWouldCross.is_retryable());
    }

    #[test]
    fn test_collaborator_conversion() {
        let err: OrderError = StoreError::Unavailable("connection reset".into()).into();
        assert_eq!(err.code(), OrderErrorCode::StorageUnavailable);

        let err: OrderError = SignatureError::Recovery("bad v".into()).into();
        assert_eq!(err, OrderError::InvalidSignature);
    }

    #[test]
    fn test_error_display() {
        let err = OrderError::InsufficientBalance {
            required: "5000000".into(),
            available: "1000000".into(),
        };
        assert_eq!(
            err.to_string(),
            "Insufficient balance: required 5000000, available 1000000"
        );
    }
}
