// ============================================================================
// Matching Engine Benchmarks
// ============================================================================
//
// Benchmark Categories:
// 1. Crossing - Price-time sweeps through resting depth
// 2. FOK Pre-flight - Kill decisions against thin books
// 3. Order Book Operations - Insertion and depth snapshots
// ============================================================================

use chrono::Utc;
use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use outcome_matching_engine::prelude::*;
use std::hint::black_box;

const ONE_SHARE: u128 = 1_000_000_000_000_000_000;

fn order(maker: usize, salt: u64, side: Side, price: u64, amount: u128, tif: TimeInForce) -> Order {
    let maker = format!("0x{maker:040x}");
    Order {
        id: OrderId::new(&maker, &salt.to_string()),
        market_key: "80002:1".to_string(),
        outcome_index: 0,
        maker,
        side,
        price: Price(price),
        amount: Amount(amount),
        remaining_amount: Amount(amount),
        salt: salt.to_string(),
        expiry: 0,
        signature: "0x".to_string(),
        chain_id: 80002,
        verifying_contract: "0x00000000000000000000000000000000000000cc".to_string(),
        sequence: salt,
        status: OrderStatus::Open,
        created_at: Utc::now(),
        time_in_force: tif,
        post_only: false,
    }
}

/// `levels` ask levels one tick apart, `per_level` orders each.
fn ask_book(levels: u64, per_level: u64) -> OrderBook {
    let mut book = OrderBook::new(BookKey::new("80002:1", 0));
    let mut salt = 0;
    for level in 0..levels {
        for _ in 0..per_level {
            salt += 1;
            book.add_order(order(
                salt as usize,
                salt,
                Side::Sell,
                400_000 + level * 1_000,
                ONE_SHARE,
                TimeInForce::GoodTillCancel,
            ));
        }
    }
    book
}

fn ctx() -> CrossingContext {
    CrossingContext {
        now: Utc::now(),
        maker_fee_bps: 0,
        taker_fee_bps: 25,
        self_trade_protection: true,
    }
}

// ============================================================================
// Crossing Benchmarks
// ============================================================================

fn benchmark_price_time_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("price_time_matching");
    let algorithm = PriceTimePriority::new();

    for num_orders in [100u64, 1000, 10000].iter() {
        let book = ask_book(num_orders / 10, 10);
        group.bench_with_input(
            BenchmarkId::from_parameter(num_orders),
            &book,
            |b, book| {
                b.iter_batched(
                    || book.clone(),
                    |mut book| {
                        // Sweeps the first five price levels
                        let mut buy = order(
                            0,
                            u64::MAX,
                            Side::Buy,
                            404_000,
                            50 * ONE_SHARE,
                            TimeInForce::ImmediateOrCancel,
                        );
                        black_box(algorithm.match_order(&mut buy, &mut book, &ctx()))
                    },
                    BatchSize::LargeInput,
                );
            },
        );
    }

    group.finish();
}

fn benchmark_fok_kill(c: &mut Criterion) {
    let algorithm = PriceTimePriority::new();
    let book = ask_book(100, 1);

    c.bench_function("fok_kill_thin_book", |b| {
        b.iter_batched(
            || book.clone(),
            |mut book| {
                let mut buy = order(
                    0,
                    u64::MAX,
                    Side::Buy,
                    999_000,
                    1_000 * ONE_SHARE,
                    TimeInForce::FillOrKill,
                );
                black_box(algorithm.match_order(&mut buy, &mut book, &ctx()))
            },
            BatchSize::LargeInput,
        );
    });
}

// ============================================================================
// Order Book Operations
// ============================================================================

fn benchmark_order_book_snapshot(c: &mut Criterion) {
    c.bench_function("order_book_snapshot", |b| {
        let mut book = ask_book(100, 1);

        // Pre-populate 100 bid levels under the asks
        for i in 0..100u64 {
            book.add_order(order(
                1_000 + i as usize,
                1_000 + i,
                Side::Buy,
                390_000 - i * 1_000,
                ONE_SHARE,
                TimeInForce::GoodTillCancel,
            ));
        }

        b.iter(|| {
            black_box(book.depth_snapshot(10));
        });
    });
}

fn benchmark_order_insertion_no_match(c: &mut Criterion) {
    c.bench_function("order_insertion_no_match", |b| {
        let book = ask_book(50, 4);
        let mut salt = 10_000u64;

        b.iter_batched(
            || {
                salt += 1;
                (book.clone(), salt)
            },
            |(mut book, salt)| {
                book.add_order(order(
                    salt as usize,
                    salt,
                    Side::Buy,
                    300_000,
                    ONE_SHARE,
                    TimeInForce::GoodTillCancel,
                ));
                black_box(book)
            },
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(
    benches,
    benchmark_price_time_matching,
    benchmark_fok_kill,
    benchmark_order_book_snapshot,
    benchmark_order_insertion_no_match,
);
criterion_main!(benches);
