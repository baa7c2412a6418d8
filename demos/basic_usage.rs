// ============================================================================
// Basic Usage Example
// ============================================================================

use ethers::signers::{LocalWallet, Signer};
use outcome_matching_engine::prelude::*;
use outcome_matching_engine::signing::{typed_data_hash, OrderTypedData, TypedDataDomain};
use std::sync::Arc;

const CONTRACT: &str = "0x00000000000000000000000000000000000000cc";
const SELLER_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
const BUYER_KEY: &str = "0x8da4ef21b864d2cc526dbdb2a120bd2874c36c9d0a1fb7f8c63d7f7a8b41de8f";
const ONE_SHARE: u128 = 1_000_000_000_000_000_000;

fn signed_order(
    wallet: &LocalWallet,
    salt: u64,
    is_buy: bool,
    price: u64,
    amount: u128,
    tif: &str,
) -> Result<OrderInput, Box<dyn std::error::Error>> {
    let maker = format!("{:?}", wallet.address());
    let typed = OrderTypedData {
        maker: maker.clone(),
        outcome_index: 0,
        is_buy,
        price: Price(price),
        amount: Amount(amount),
        salt: salt.to_string(),
        expiry: 0,
    };
    let domain = TypedDataDomain::new(80002, CONTRACT);
    let signature = wallet.sign_hash(typed_data_hash(&domain, typed.struct_hash()?)?)?;

    Ok(OrderInput {
        market_key: "80002:1".to_string(),
        outcome_index: 0,
        chain_id: 80002,
        verifying_contract: CONTRACT.to_string(),
        maker,
        is_buy,
        price: price.to_string(),
        amount: amount.to_string(),
        salt: salt.to_string(),
        expiry: 0,
        signature: format!("0x{signature}"),
        tif: Some(tif.to_string()),
        post_only: false,
        idempotency_key: None,
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Matching Engine Example ===\n");

    let seller: LocalWallet = SELLER_KEY.parse()?;
    let buyer: LocalWallet = BUYER_KEY.parse()?;

    let balances = Arc::new(InMemoryBalances::new());
    balances.set_balance(&format!("{:?}", buyer.address()), UsdcMicro(100_000_000));

    let engine = MatchingEngineBuilder::new(MatchingEngineConfig::default().with_fees(0, 25))
        .with_event_handler(Arc::new(LoggingEventHandler))
        .with_balances(balances.clone())
        .build()?;

    println!("Created matching engine ({})\n", engine.algorithm_name());

    // Add sell orders at different prices
    println!("Adding sell orders...");
    for i in 0..5u64 {
        let sell = signed_order(&seller, i + 1, false, 500_000 + i * 10_000, ONE_SHARE, "GTC")?;
        let result = engine.submit_order(sell).await;
        println!("  ask {} -> success={}", i + 1, result.success);
    }

    // Sweep the two best levels
    println!("\nSubmitting IOC buy for 2 shares @ 0.52...");
    let buy = signed_order(&buyer, 100, true, 520_000, 2 * ONE_SHARE, "IOC")?;
    let result = engine.submit_order(buy).await;
    for m in &result.matches {
        println!(
            "  fill {} : {} shares @ {} (taker fee {})",
            m.id, m.matched_amount, m.matched_price, m.taker_fee
        );
    }

    let key = BookKey::new("80002:1", 0);
    if let Some(stats) = engine.book_stats(&key) {
        println!("\nBest bid: {:?}", stats.best_bid);
        println!("Best ask: {:?}", stats.best_ask);
        println!("Last trade: {:?}", stats.last_trade_price);
    }
    println!(
        "Buyer collateral held until settlement: {}",
        balances.reserved_now(&format!("{:?}", buyer.address()))
    );

    let stats = engine.global_stats();
    println!(
        "\n{} book(s), {} resting order(s)",
        stats.total_books, stats.total_orders
    );
    Ok(())
}
