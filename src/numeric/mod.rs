// ============================================================================
// Numeric Module
// Fixed-width integer units for prices, share amounts and USDC notionals
// ============================================================================
//
// This module provides:
// - Price: outcome price in micro-USDC per share (6 decimals, max 1_000_000)
// - Amount: share quantity with 18 decimals
// - UsdcMicro: collateral value in micro-USDC
// - NumericError: Error types for arithmetic operations
//
// Design principles:
// - No floating-point operations
// - Checked arithmetic returns Result (no panics)
// - Decimal strings only at the serialization edge

mod errors;
mod units;

pub use errors::{NumericError, NumericResult};
pub use units::{fee_for, order_notional_usdc, usdc_to_micro, Amount, Price, UsdcMicro, AMOUNT_SCALE};
