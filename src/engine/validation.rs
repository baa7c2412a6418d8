// ============================================================================
// Order Validation & Risk Checks
// Structural checks, signature verification, duplicate detection,
// balance and exposure limits
// ============================================================================

use crate::domain::{
    MatchingEngineConfig, Order, OrderBook, OrderId, OrderStatus, Side, TimeInForce,
};
use crate::error::{OrderError, StoreError};
use crate::interfaces::{BalanceProvider, OrderStore, SignatureVerifier};
use crate::numeric::{order_notional_usdc, Amount, Price, UsdcMicro};
use crate::signing::{parse_address, parse_uint256, CancelSaltTypedData, OrderTypedData, TypedDataDomain};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

const SECONDS_PER_DAY: i64 = 86_400;

// ============================================================================
// Wire Inputs
// ============================================================================

/// Order submission as received from a client. Numeric fields arrive as
/// decimal strings and are checked before anything else touches them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderInput {
    pub market_key: String,
    pub outcome_index: i64,
    pub chain_id: i64,
    pub verifying_contract: String,
    pub maker: String,
    pub is_buy: bool,
    pub price: String,
    pub amount: String,
    pub salt: String,
    /// Unix seconds, 0 = never
    pub expiry: i64,
    pub signature: String,
    #[serde(default)]
    pub tif: Option<String>,
    #[serde(default)]
    pub post_only: bool,
    /// Client retry token
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Signed request to cancel the order identified by `(maker, salt)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    pub market_key: String,
    pub outcome_index: u32,
    pub chain_id: u64,
    pub verifying_contract: String,
    pub maker: String,
    pub salt: String,
    pub signature: String,
}

impl CancelRequest {
    pub fn order_id(&self) -> OrderId {
        OrderId::new(&self.maker, &self.salt)
    }
}

// ============================================================================
// Structural Validation
// ============================================================================

fn parse_time_in_force(tif: Option<&str>) -> Result<TimeInForce, OrderError> {
    match tif.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(TimeInForce::GoodTillCancel),
        Some(raw) => TimeInForce::from_str(raw).map_err(OrderError::InvalidTimeInForce),
    }
}

/// Check every field of `input` and build the order it describes, with
/// status `Pending` and no sequence yet.
pub fn validate_order_input(
    input: &OrderInput,
    config: &MatchingEngineConfig,
    now: DateTime<Utc>,
) -> Result<Order, OrderError> {
    let market_key = input.market_key.trim();
    if market_key.is_empty() {
        return Err(OrderError::InvalidMarketKey);
    }
    let outcome_index =
        u32::try_from(input.outcome_index).map_err(|_| OrderError::InvalidOutcomeIndex)?;
    let chain_id = match u64::try_from(input.chain_id) {
        Ok(id) if id > 0 => id,
        _ => return Err(OrderError::InvalidChainId),
    };
    parse_address(&input.verifying_contract).map_err(|_| OrderError::InvalidVerifyingContract)?;
    if input.expiry < 0 {
        return Err(OrderError::InvalidExpiry("negative expiry".to_string()));
    }
    parse_uint256("salt", &input.salt).map_err(|_| OrderError::InvalidSalt)?;
    parse_address(&input.maker).map_err(|_| OrderError::InvalidMaker)?;

    let price = Price::from_str(&input.price)
        .map_err(|e| OrderError::InvalidPrice(format!("{}: {e}", input.price)))?;
    if price < config.min_price || price > config.max_price {
        return Err(OrderError::InvalidPrice(format!(
            "{price} outside [{}, {}]",
            config.min_price, config.max_price
        )));
    }
    if (price.raw() - config.min_price.raw()) % config.price_tick_size.raw().max(1) != 0 {
        return Err(OrderError::InvalidTickSize);
    }

    let amount = Amount::from_str(&input.amount)
        .map_err(|e| OrderError::InvalidAmount(format!("{}: {e}", input.amount)))?;
    if amount < config.min_order_amount {
        return Err(OrderError::InvalidAmount("below minimum".to_string()));
    }
    if amount > config.max_order_amount {
        return Err(OrderError::InvalidAmount("exceeds maximum".to_string()));
    }

    let time_in_force = parse_time_in_force(input.tif.as_deref())?;
    if input.post_only && time_in_force.is_immediate() {
        return Err(OrderError::InvalidPostOnly);
    }

    let now_secs = now.timestamp();
    if time_in_force == TimeInForce::GoodTillDate {
        if input.expiry == 0 {
            return Err(OrderError::InvalidExpiry("GTD requires expiry".to_string()));
        }
        if now_secs >= input.expiry {
            return Err(OrderError::OrderExpired);
        }
        if config.gtd_max_expiry_days > 0 {
            let horizon = now_secs + i64::from(config.gtd_max_expiry_days) * SECONDS_PER_DAY;
            if input.expiry > horizon {
                return Err(OrderError::InvalidExpiry("expiry too far in future".to_string()));
            }
        }
    } else if input.expiry != 0 && now_secs >= input.expiry {
        return Err(OrderError::OrderExpired);
    }

    let maker = input.maker.trim().to_lowercase();
    let salt = input.salt.trim().to_string();
    Ok(Order {
        id: OrderId::new(&maker, &salt),
        market_key: market_key.to_string(),
        outcome_index,
        maker,
        side: Side::from_is_buy(input.is_buy),
        price,
        amount,
        remaining_amount: amount,
        salt,
        expiry: input.expiry as u64,
        signature: input.signature.trim().to_string(),
        chain_id,
        verifying_contract: input.verifying_contract.trim().to_lowercase(),
        sequence: 0,
        status: OrderStatus::Pending,
        created_at: now,
        time_in_force,
        post_only: input.post_only,
    })
}

// ============================================================================
// Signatures
// ============================================================================

pub fn order_typed_data(order: &Order) -> OrderTypedData {
    OrderTypedData {
        maker: order.maker.clone(),
        outcome_index: order.outcome_index,
        is_buy: order.is_buy(),
        price: order.price,
        amount: order.amount,
        salt: order.salt.clone(),
        expiry: order.expiry,
    }
}

pub async fn verify_order_signature(
    verifier: &dyn SignatureVerifier,
    order: &Order,
) -> Result<(), OrderError> {
    let domain = TypedDataDomain::new(order.chain_id, &order.verifying_contract);
    match verifier
        .verify_order(&domain, &order_typed_data(order), &order.signature)
        .await
    {
        Ok(true) => Ok(()),
        Ok(false) => Err(OrderError::InvalidSignature),
        Err(err) => {
            tracing::debug!(order_id = %order.id, error = %err, "Order signature unreadable");
            Err(OrderError::InvalidSignature)
        },
    }
}

pub async fn verify_cancel_signature(
    verifier: &dyn SignatureVerifier,
    request: &CancelRequest,
) -> Result<(), OrderError> {
    parse_address(&request.verifying_contract).map_err(|_| OrderError::InvalidVerifyingContract)?;
    parse_address(&request.maker).map_err(|_| OrderError::InvalidMaker)?;
    parse_uint256("salt", &request.salt).map_err(|_| OrderError::InvalidSalt)?;
    let domain = TypedDataDomain::new(request.chain_id, &request.verifying_contract);
    let cancel = CancelSaltTypedData {
        maker: request.maker.to_lowercase(),
        salt: request.salt.trim().to_string(),
    };
    match verifier
        .verify_cancel(&domain, &cancel, &request.signature)
        .await
    {
        Ok(true) => Ok(()),
        _ => Err(OrderError::InvalidSignature),
    }
}

// ============================================================================
// Duplicates & Risk
// ============================================================================

/// A `(maker, salt)` pair already resting, or recorded in storage in any
/// state, cannot be admitted again. A signed order is single-use.
pub async fn check_duplicate(
    already_resting: bool,
    store: &dyn OrderStore,
    order: &Order,
) -> Result<(), OrderError> {
    if already_resting || store.get_order(&order.order_key()).await?.is_some() {
        return Err(OrderError::DuplicateOrder);
    }
    Ok(())
}

/// Collateral already committed to the maker's open buy orders in storage.
async fn stored_open_buy_notional(store: &dyn OrderStore, maker: &str) -> Result<UsdcMicro, StoreError> {
    let rows = store.open_buy_orders(maker).await?;
    let mut total = UsdcMicro::ZERO;
    for row in rows {
        match Order::try_from(row) {
            Ok(order) => total = total.saturating_add(order.remaining_notional()),
            Err(err) => tracing::warn!(maker, error = %err, "Skipping malformed open order row"),
        }
    }
    Ok(total)
}

/// Buy orders need `reserved + cost <= balance`, where `reserved` is the
/// larger of the ledger's figure and the open-order notional in storage.
/// Sell orders are not checked here.
pub async fn check_balance(
    balances: &dyn BalanceProvider,
    store: &dyn OrderStore,
    order: &Order,
) -> Result<(), OrderError> {
    if !order.is_buy() {
        return Ok(());
    }
    let cost = order_notional_usdc(order.amount, order.price);
    let balance = balances.balance(&order.maker).await?;
    let ledger_reserved = balances.reserved(&order.maker).await?;
    let stored = stored_open_buy_notional(store, &order.maker)
        .await
        .map_err(|e| OrderError::BalanceCheckFailed(e.to_string()))?;
    let reserved = ledger_reserved.max(stored);

    let required = reserved.saturating_add(cost);
    if required > balance {
        return Err(OrderError::InsufficientBalance {
            required: required.to_string(),
            available: balance.to_string(),
        });
    }
    Ok(())
}

/// Long (buy) and short (sell) notional of the maker's resting orders.
pub fn maker_exposure(book: &OrderBook, maker: &str) -> (UsdcMicro, UsdcMicro) {
    book.orders_by_maker(maker)
        .fold((UsdcMicro::ZERO, UsdcMicro::ZERO), |(long, short), order| {
            let notional = order.remaining_notional();
            match order.side {
                Side::Buy => (long.saturating_add(notional), short),
                Side::Sell => (long, short.saturating_add(notional)),
            }
        })
}

pub fn check_exposure(
    book: &OrderBook,
    order: &Order,
    config: &MatchingEngineConfig,
) -> Result<(), OrderError> {
    let cost = order_notional_usdc(order.amount, order.price);
    let (long, short) = maker_exposure(book, &order.maker);
    match order.side {
        Side::Buy => {
            if let Some(cap) = config.long_exposure_cap() {
                if long.saturating_add(cost) > cap {
                    return Err(OrderError::LongExposureLimit);
                }
            }
        },
        Side::Sell => {
            if let Some(cap) = config.short_exposure_cap() {
                if short.saturating_add(cost) > cap {
                    return Err(OrderError::ShortExposureLimit);
                }
            }
        },
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod input_fixtures {
    use super::*;
    use crate::domain::order::fixtures::CONTRACT;
    use crate::signing::test_signer;
    use ethers::signers::LocalWallet;

    /// Unsigned GTC input for `maker`.
    pub fn input(maker: &str, salt: u64, is_buy: bool, price: u64, amount: u128) -> OrderInput {
        OrderInput {
            market_key: "80002:1".to_string(),
            outcome_index: 0,
            chain_id: 80002,
            verifying_contract: CONTRACT.to_string(),
            maker: maker.to_string(),
            is_buy,
            price: price.to_string(),
            amount: amount.to_string(),
            salt: salt.to_string(),
            expiry: 0,
            signature: "0x".to_string(),
            tif: None,
            post_only: false,
            idempotency_key: None,
        }
    }

    /// Sign `input` in place with `wallet`, whose address becomes the maker.
    pub fn sign_input(wallet: &LocalWallet, mut input: OrderInput) -> OrderInput {
        input.maker = test_signer::address(wallet).to_lowercase();
        let typed = OrderTypedData {
            maker: input.maker.clone(),
            outcome_index: input.outcome_index as u32,
            is_buy: input.is_buy,
            price: input.price.parse().unwrap(),
            amount: input.amount.parse().unwrap(),
            salt: input.salt.clone(),
            expiry: input.expiry as u64,
        };
        let domain = TypedDataDomain::new(input.chain_id as u64, &input.verifying_contract);
        input.signature = test_signer::sign(wallet, &domain, typed.struct_hash().unwrap());
        input
    }

    pub fn sign_cancel(wallet: &LocalWallet, salt: &str) -> CancelRequest {
        let maker = test_signer::address(wallet).to_lowercase();
        let cancel = CancelSaltTypedData {
            maker: maker.clone(),
            salt: salt.to_string(),
        };
        let domain = TypedDataDomain::new(80002, CONTRACT);
        CancelRequest {
            market_key: "80002:1".to_string(),
            outcome_index: 0,
            chain_id: 80002,
            verifying_contract: CONTRACT.to_string(),
            maker,
            salt: salt.to_string(),
            signature: test_signer::sign(wallet, &domain, cancel.struct_hash().unwrap()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::input_fixtures::*;
    use super::*;
    use crate::domain::order::fixtures::*;
    use crate::domain::BookKey;
    use crate::error::OrderErrorCode;
    use crate::interfaces::{InMemoryBalances, InMemoryOrderStore, OrderRecord};
    use crate::signing::{test_signer, Eip712Verifier};
    use chrono::Duration;
    use rust_decimal::Decimal;

    fn code_of(input: &OrderInput, config: &MatchingEngineConfig) -> Option<OrderErrorCode> {
        validate_order_input(input, config, Utc::now()).err().map(|e| e.code())
    }

    #[test]
    fn test_valid_input_builds_pending_order() {
        let order = validate_order_input(
            &input("0x00000000000000000000000000000000000000AA", 7, true, 500_000, ONE_SHARE),
            &MatchingEngineConfig::default(),
            Utc::now(),
        )
        .unwrap();

        assert_eq!(order.maker, MAKER_A);
        assert_eq!(order.id.as_str(), format!("{MAKER_A}-7"));
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.remaining_amount, Amount(ONE_SHARE));
        assert_eq!(order.time_in_force, TimeInForce::GoodTillCancel);
        assert_eq!(order.side, Side::Buy);
    }

    #[test]
    fn test_structural_rejections() {
        let config = MatchingEngineConfig::default();
        let base = input(MAKER_A, 1, true, 500_000, ONE_SHARE);

        let mut bad = base.clone();
        bad.market_key = "  ".to_string();
        assert_eq!(code_of(&bad, &config), Some(OrderErrorCode::InvalidMarketKey));

        let mut bad = base.clone();
        bad.outcome_index = -1;
        assert_eq!(code_of(&bad, &config), Some(OrderErrorCode::InvalidOutcomeIndex));

        let mut bad = base.clone();
        bad.chain_id = 0;
        assert_eq!(code_of(&bad, &config), Some(OrderErrorCode::InvalidChainId));

        let mut bad = base.clone();
        bad.verifying_contract = "0x1234".to_string();
        assert_eq!(code_of(&bad, &config), Some(OrderErrorCode::InvalidVerifyingContract));

        let mut bad = base.clone();
        bad.salt = "abc".to_string();
        assert_eq!(code_of(&bad, &config), Some(OrderErrorCode::InvalidSalt));

        let mut bad = base.clone();
        bad.maker = "not-an-address".to_string();
        assert_eq!(code_of(&bad, &config), Some(OrderErrorCode::InvalidMaker));

        let mut bad = base.clone();
        bad.expiry = -5;
        assert_eq!(code_of(&bad, &config), Some(OrderErrorCode::InvalidExpiry));
    }

    #[test]
    fn test_price_amount_and_tick() {
        let config = MatchingEngineConfig::default()
            .with_price_range(Price(100), Price(900_000), Price(100))
            .with_amount_range(Amount(10), Amount(1_000));

        assert_eq!(code_of(&input(MAKER_A, 1, true, 50, 100), &config), Some(OrderErrorCode::InvalidPrice));
        assert_eq!(code_of(&input(MAKER_A, 1, true, 900_100, 100), &config), Some(OrderErrorCode::InvalidPrice));
        assert_eq!(code_of(&input(MAKER_A, 1, true, 150, 100), &config), Some(OrderErrorCode::InvalidTickSize));
        assert_eq!(code_of(&input(MAKER_A, 1, true, 200, 100), &config), None);
        assert_eq!(code_of(&input(MAKER_A, 1, true, 200, 9), &config), Some(OrderErrorCode::InvalidAmount));
        assert_eq!(code_of(&input(MAKER_A, 1, true, 200, 1_001), &config), Some(OrderErrorCode::InvalidAmount));

        let mut fractional = input(MAKER_A, 1, true, 200, 100);
        fractional.price = "0.5".to_string();
        assert_eq!(code_of(&fractional, &config), Some(OrderErrorCode::InvalidPrice));
    }

    #[test]
    fn test_time_in_force_and_post_only() {
        let config = MatchingEngineConfig::default();
        let mut order = input(MAKER_A, 1, true, 500_000, ONE_SHARE);

        order.tif = Some("DAY".to_string());
        assert_eq!(code_of(&order, &config), Some(OrderErrorCode::InvalidTimeInForce));

        for tif in ["IOC", "FOK", "FAK"] {
            order.tif = Some(tif.to_string());
            order.post_only = true;
            assert_eq!(code_of(&order, &config), Some(OrderErrorCode::InvalidPostOnly));
        }

        order.tif = Some("GTC".to_string());
        assert_eq!(code_of(&order, &config), None);
    }

    #[test]
    fn test_expiry_rules() {
        let now = Utc::now();
        let config = MatchingEngineConfig::default().with_gtd_max_expiry_days(1);
        let mut gtd = input(MAKER_A, 1, true, 500_000, ONE_SHARE);
        gtd.tif = Some("GTD".to_string());

        let check = |o: &OrderInput| validate_order_input(o, &config, now).err().map(|e| e.code());

        assert_eq!(check(&gtd), Some(OrderErrorCode::InvalidExpiry));
        gtd.expiry = (now - Duration::seconds(1)).timestamp();
        assert_eq!(check(&gtd), Some(OrderErrorCode::OrderExpired));
        gtd.expiry = (now + Duration::days(2)).timestamp();
        assert_eq!(check(&gtd), Some(OrderErrorCode::InvalidExpiry));
        gtd.expiry = (now + Duration::hours(2)).timestamp();
        assert_eq!(check(&gtd), None);

        let mut gtc = input(MAKER_A, 1, true, 500_000, ONE_SHARE);
        gtc.expiry = (now - Duration::seconds(1)).timestamp();
        assert_eq!(check(&gtc), Some(OrderErrorCode::OrderExpired));
        gtc.expiry = (now + Duration::days(30)).timestamp();
        assert_eq!(check(&gtc), None);
    }

    #[tokio::test]
    async fn test_signature_must_match_maker() {
        let wallet = test_signer::wallet(test_signer::KEY_A);
        let signed = sign_input(&wallet, input(MAKER_A, 9, true, 500_000, ONE_SHARE));
        let config = MatchingEngineConfig::default();
        let order = validate_order_input(&signed, &config, Utc::now()).unwrap();
        assert!(verify_order_signature(&Eip712Verifier, &order).await.is_ok());

        let mut forged = order.clone();
        forged.maker = MAKER_B.to_string();
        assert_eq!(
            verify_order_signature(&Eip712Verifier, &forged).await,
            Err(OrderError::InvalidSignature)
        );

        let cancel = sign_cancel(&wallet, "9");
        assert!(verify_cancel_signature(&Eip712Verifier, &cancel).await.is_ok());
        let mut wrong_salt = cancel.clone();
        wrong_salt.salt = "10".to_string();
        assert_eq!(
            verify_cancel_signature(&Eip712Verifier, &wrong_salt).await,
            Err(OrderError::InvalidSignature)
        );
    }

    #[tokio::test]
    async fn test_duplicate_detection() {
        let store = InMemoryOrderStore::new();
        let order = resting(MAKER_A, 1, Side::Buy, 500_000, ONE_SHARE);

        assert!(check_duplicate(false, &store, &order).await.is_ok());
        assert_eq!(check_duplicate(true, &store, &order).await, Err(OrderError::DuplicateOrder));

        let mut filled = order.clone();
        filled.status = OrderStatus::Filled;
        store.upsert_order(OrderRecord::from(&filled)).await.unwrap();
        assert_eq!(check_duplicate(false, &store, &order).await, Err(OrderError::DuplicateOrder));

        // Terminal rows still block a replay of the same signed order
        for status in [OrderStatus::Canceled, OrderStatus::Expired, OrderStatus::Rejected] {
            let mut closed = order.clone();
            closed.status = status;
            store.upsert_order(OrderRecord::from(&closed)).await.unwrap();
            assert_eq!(check_duplicate(false, &store, &order).await, Err(OrderError::DuplicateOrder));
        }

        let other_salt = resting(MAKER_A, 2, Side::Buy, 500_000, ONE_SHARE);
        assert!(check_duplicate(false, &store, &other_salt).await.is_ok());

        store.set_available(false);
        assert_eq!(
            check_duplicate(false, &store, &order).await.unwrap_err().code(),
            OrderErrorCode::StorageUnavailable
        );
    }

    #[tokio::test]
    async fn test_balance_uses_larger_reservation() {
        let balances = InMemoryBalances::new();
        let store = InMemoryOrderStore::new();
        balances.set_balance(MAKER_A, UsdcMicro(1_000_000));

        // 1 share at 0.60 costs 600_000 micro
        let order = resting(MAKER_A, 1, Side::Buy, 600_000, ONE_SHARE);
        assert!(check_balance(&balances, &store, &order).await.is_ok());

        // An open buy of 0.5 share at 0.90 already commits 450_000
        let open = resting(MAKER_A, 2, Side::Buy, 900_000, ONE_SHARE / 2);
        store.upsert_order(OrderRecord::from(&open)).await.unwrap();
        let err = check_balance(&balances, &store, &order).await.unwrap_err();
        assert_eq!(
            err,
            OrderError::InsufficientBalance {
                required: "1050000".to_string(),
                available: "1000000".to_string(),
            }
        );

        // Sells are not balance checked
        let sell = resting(MAKER_A, 3, Side::Sell, 600_000, 100 * ONE_SHARE);
        assert!(check_balance(&balances, &store, &sell).await.is_ok());

        balances.set_available(false);
        assert_eq!(
            check_balance(&balances, &store, &order).await.unwrap_err().code(),
            OrderErrorCode::BalanceCheckFailed
        );
    }

    #[test]
    fn test_exposure_caps() {
        let config = MatchingEngineConfig::default().with_exposure_caps(Decimal::ONE, Decimal::ONE);
        let mut book = OrderBook::new(BookKey::new("80002:1", 0));
        book.add_order(resting(MAKER_A, 1, Side::Buy, 500_000, ONE_SHARE));
        book.add_order(resting(MAKER_B, 2, Side::Buy, 900_000, ONE_SHARE));

        assert_eq!(maker_exposure(&book, MAKER_A), (UsdcMicro(500_000), UsdcMicro::ZERO));

        let within = resting(MAKER_A, 3, Side::Buy, 500_000, ONE_SHARE);
        assert!(check_exposure(&book, &within, &config).is_ok());

        let over = resting(MAKER_A, 4, Side::Buy, 500_001, ONE_SHARE);
        assert_eq!(check_exposure(&book, &over, &config), Err(OrderError::LongExposureLimit));

        let sell = resting(MAKER_A, 5, Side::Sell, 999_999, 2 * ONE_SHARE);
        assert_eq!(check_exposure(&book, &sell, &config), Err(OrderError::ShortExposureLimit));

        let uncapped = MatchingEngineConfig::default();
        assert!(check_exposure(&book, &over, &uncapped).is_ok());
    }
}
