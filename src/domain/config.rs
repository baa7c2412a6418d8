// ============================================================================
// Matching Engine Configuration
// Admission limits, fee schedule, risk caps and operational knobs
// ============================================================================

use crate::numeric::{usdc_to_micro, Amount, Price, UsdcMicro};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

const ENV_PREFIX: &str = "MATCHING_";

/// Immutable per-engine parameters. Loaded once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingEngineConfig {
    // ------------------------------------------------------------------
    // Fees
    // ------------------------------------------------------------------
    pub maker_fee_bps: u32,
    pub taker_fee_bps: u32,

    // ------------------------------------------------------------------
    // Admission limits
    // ------------------------------------------------------------------
    pub min_order_amount: Amount,
    pub max_order_amount: Amount,
    pub min_price: Price,
    pub max_price: Price,
    /// Prices must satisfy `(price - min_price) % price_tick_size == 0`
    pub price_tick_size: Price,
    /// GTD horizon in days; 0 disables the bound
    pub gtd_max_expiry_days: u32,

    // ------------------------------------------------------------------
    // Risk
    // ------------------------------------------------------------------
    pub enable_self_trade_protection: bool,
    /// Whole USDC; zero disables the cap
    pub max_market_long_exposure_usdc: Decimal,
    /// Whole USDC; zero disables the cap
    pub max_market_short_exposure_usdc: Decimal,

    // ------------------------------------------------------------------
    // Per-book lock
    // ------------------------------------------------------------------
    pub lock_lease_ms: u64,
    pub lock_max_retries: u32,
    pub lock_retry_backoff_ms: u64,
    pub local_lock_timeout_ms: u64,

    // ------------------------------------------------------------------
    // Idempotency
    // ------------------------------------------------------------------
    pub idempotency_ttl_ms: u64,
    pub idempotency_max_entries: usize,
    pub idempotency_wait_ms: u64,

    // ------------------------------------------------------------------
    // Event log, snapshots, broadcast
    // ------------------------------------------------------------------
    pub event_log_max_len: usize,
    pub event_log_ttl_secs: u64,
    pub snapshot_ttl_secs: u64,
    pub depth_levels: usize,
    pub expiry_sweep_interval_ms: u64,
}

impl Default for MatchingEngineConfig {
    fn default() -> Self {
        Self {
            maker_fee_bps: 0,
            taker_fee_bps: 0,
            min_order_amount: Amount(1_000_000_000_000),
            max_order_amount: Amount(1_000_000_000_000_000_000_000),
            min_price: Price(1),
            max_price: Price(1_000_000),
            price_tick_size: Price(1),
            gtd_max_expiry_days: 0,
            enable_self_trade_protection: false,
            max_market_long_exposure_usdc: Decimal::ZERO,
            max_market_short_exposure_usdc: Decimal::ZERO,
            lock_lease_ms: 30_000,
            lock_max_retries: 200,
            lock_retry_backoff_ms: 50,
            local_lock_timeout_ms: 10_000,
            idempotency_ttl_ms: 60_000,
            idempotency_max_entries: 10_000,
            idempotency_wait_ms: 5_000,
            event_log_max_len: 10_000,
            event_log_ttl_secs: 7 * 24 * 60 * 60,
            snapshot_ttl_secs: 24 * 60 * 60,
            depth_levels: 20,
            expiry_sweep_interval_ms: 10_000,
        }
    }
}

impl MatchingEngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: Set maker and taker fees
    pub fn with_fees(mut self, maker_fee_bps: u32, taker_fee_bps: u32) -> Self {
        self.maker_fee_bps = maker_fee_bps;
        self.taker_fee_bps = taker_fee_bps;
        self
    }

    /// Builder method: Set the accepted order amount range
    pub fn with_amount_range(mut self, min: Amount, max: Amount) -> Self {
        self.min_order_amount = min;
        self.max_order_amount = max;
        self
    }

    /// Builder method: Set the accepted price range and tick
    pub fn with_price_range(mut self, min: Price, max: Price, tick: Price) -> Self {
        self.min_price = min;
        self.max_price = max;
        self.price_tick_size = tick;
        self
    }

    /// Builder method: Toggle self-trade protection
    pub fn with_self_trade_protection(mut self, enabled: bool) -> Self {
        self.enable_self_trade_protection = enabled;
        self
    }

    /// Builder method: Set per-market exposure caps in whole USDC
    pub fn with_exposure_caps(mut self, long_usdc: Decimal, short_usdc: Decimal) -> Self {
        self.max_market_long_exposure_usdc = long_usdc;
        self.max_market_short_exposure_usdc = short_usdc;
        self
    }

    /// Builder method: Bound GTD expiries to this many days ahead
    pub fn with_gtd_max_expiry_days(mut self, days: u32) -> Self {
        self.gtd_max_expiry_days = days;
        self
    }

    /// Builder method: Distributed lock lease and retry schedule
    pub fn with_lock_policy(mut self, lease_ms: u64, max_retries: u32, backoff_ms: u64) -> Self {
        self.lock_lease_ms = lease_ms;
        self.lock_max_retries = max_retries;
        self.lock_retry_backoff_ms = backoff_ms;
        self
    }

    /// Builder method: Bound on waiting for the in-process book lock
    pub fn with_local_lock_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.local_lock_timeout_ms = timeout_ms;
        self
    }

    /// Builder method: Idempotency window and in-flight wait
    pub fn with_idempotency(mut self, ttl_ms: u64, max_entries: usize, wait_ms: u64) -> Self {
        self.idempotency_ttl_ms = ttl_ms;
        self.idempotency_max_entries = max_entries;
        self.idempotency_wait_ms = wait_ms;
        self
    }

    /// Builder method: Depth levels included in broadcasts
    pub fn with_depth_levels(mut self, levels: usize) -> Self {
        self.depth_levels = levels;
        self
    }

    pub fn long_exposure_cap(&self) -> Option<UsdcMicro> {
        Some(usdc_to_micro(self.max_market_long_exposure_usdc)).filter(|cap| !cap.is_zero())
    }

    pub fn short_exposure_cap(&self) -> Option<UsdcMicro> {
        Some(usdc_to_micro(self.max_market_short_exposure_usdc)).filter(|cap| !cap.is_zero())
    }

    pub fn lock_lease(&self) -> Duration {
        Duration::from_millis(self.lock_lease_ms)
    }

    pub fn lock_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.lock_retry_backoff_ms)
    }

    pub fn local_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.local_lock_timeout_ms)
    }

    pub fn idempotency_ttl(&self) -> Duration {
        Duration::from_millis(self.idempotency_ttl_ms)
    }

    pub fn idempotency_wait(&self) -> Duration {
        Duration::from_millis(self.idempotency_wait_ms)
    }

    pub fn expiry_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.expiry_sweep_interval_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.maker_fee_bps > 10_000 || self.taker_fee_bps > 10_000 {
            return Err("Fee basis points cannot exceed 10000".to_string());
        }

        if self.min_order_amount.is_zero() {
            return Err("Minimum order amount must be positive".to_string());
        }
        if self.min_order_amount > self.max_order_amount {
            return Err("Minimum order amount exceeds maximum".to_string());
        }

        if self.min_price.is_zero() {
            return Err("Minimum price must be positive".to_string());
        }
        if self.min_price > self.max_price {
            return Err("Minimum price exceeds maximum".to_string());
        }
        if self.price_tick_size.is_zero() {
            return Err("Tick size must be positive".to_string());
        }

        if self.max_market_long_exposure_usdc < Decimal::ZERO
            || self.max_market_short_exposure_usdc < Decimal::ZERO
        {
            return Err("Exposure caps cannot be negative".to_string());
        }

        if self.lock_lease_ms == 0 {
            return Err("Lock lease must be positive".to_string());
        }
        if self.idempotency_max_entries == 0 {
            return Err("Idempotency cache capacity must be positive".to_string());
        }
        if self.depth_levels == 0 {
            return Err("Depth levels must be positive".to_string());
        }

        Ok(())
    }

    /// Load from `MATCHING_*` environment variables, falling back to the
    /// default for anything missing or unparseable.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            maker_fee_bps: env_or("MAKER_FEE_BPS", d.maker_fee_bps),
            taker_fee_bps: env_or("TAKER_FEE_BPS", d.taker_fee_bps),
            min_order_amount: env_or("MIN_ORDER_AMOUNT", d.min_order_amount),
            max_order_amount: env_or("MAX_ORDER_AMOUNT", d.max_order_amount),
            min_price: env_or("MIN_PRICE", d.min_price),
            max_price: env_or("MAX_PRICE", d.max_price),
            price_tick_size: env_or("PRICE_TICK_SIZE", d.price_tick_size),
            gtd_max_expiry_days: env_or("GTD_MAX_EXPIRY_DAYS", d.gtd_max_expiry_days),
            enable_self_trade_protection: std::env::var(format!(
                "{ENV_PREFIX}ENABLE_SELF_TRADE_PROTECTION"
            ))
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(d.enable_self_trade_protection),
            max_market_long_exposure_usdc: env_or(
                "MAX_MARKET_LONG_EXPOSURE_USDC",
                d.max_market_long_exposure_usdc,
            ),
            max_market_short_exposure_usdc: env_or(
                "MAX_MARKET_SHORT_EXPOSURE_USDC",
                d.max_market_short_exposure_usdc,
            ),
            lock_lease_ms: env_or("LOCK_LEASE_MS", d.lock_lease_ms),
            lock_max_retries: env_or("LOCK_MAX_RETRIES", d.lock_max_retries),
            lock_retry_backoff_ms: env_or("LOCK_RETRY_BACKOFF_MS", d.lock_retry_backoff_ms),
            local_lock_timeout_ms: env_or("LOCAL_LOCK_TIMEOUT_MS", d.local_lock_timeout_ms),
            idempotency_ttl_ms: env_or("IDEMPOTENCY_TTL_MS", d.idempotency_ttl_ms),
            idempotency_max_entries: env_or("IDEMPOTENCY_MAX_ENTRIES", d.idempotency_max_entries),
            idempotency_wait_ms: env_or("IDEMPOTENCY_WAIT_MS", d.idempotency_wait_ms),
            event_log_max_len: env_or("EVENT_LOG_MAX_LEN", d.event_log_max_len),
            event_log_ttl_secs: env_or("EVENT_LOG_TTL_SECS", d.event_log_ttl_secs),
            snapshot_ttl_secs: env_or("SNAPSHOT_TTL_SECS", d.snapshot_ttl_secs),
            depth_levels: env_or("DEPTH_LEVELS", d.depth_levels),
            expiry_sweep_interval_ms: env_or("EXPIRY_SWEEP_INTERVAL_MS", d.expiry_sweep_interval_ms),
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(format!("{ENV_PREFIX}{name}"))
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
