// ============================================================================
// Fixed-Width Units
// Integer newtypes for price, share amount and collateral notional
// ============================================================================

use super::errors::{NumericError, NumericResult};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// 10^18, the share amount scale. Notional = amount × price / AMOUNT_SCALE.
pub const AMOUNT_SCALE: u128 = 1_000_000_000_000_000_000;

const USDC_MICRO_SCALE: i64 = 1_000_000;
const BPS_DENOMINATOR: u128 = 10_000;

macro_rules! unit_type {
    ($(#[$meta:meta])* $name:ident, $inner:ty) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(pub $inner);

        impl $name {
            pub const ZERO: Self = Self(0);

            #[inline]
            pub const fn new(raw: $inner) -> Self {
                Self(raw)
            }

            #[inline]
            pub const fn raw(self) -> $inner {
                self.0
            }

            #[inline]
            pub const fn is_zero(self) -> bool {
                self.0 == 0
            }

            #[inline]
            pub fn checked_add(self, rhs: Self) -> NumericResult<Self> {
                self.0.checked_add(rhs.0).map(Self).ok_or(NumericError::Overflow)
            }

            #[inline]
            pub fn checked_sub(self, rhs: Self) -> NumericResult<Self> {
                self.0.checked_sub(rhs.0).map(Self).ok_or(NumericError::Underflow)
            }

            #[inline]
            pub fn saturating_add(self, rhs: Self) -> Self {
                Self(self.0.saturating_add(rhs.0))
            }

            #[inline]
            pub fn saturating_sub(self, rhs: Self) -> Self {
                Self(self.0.saturating_sub(rhs.0))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = NumericError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let s = s.trim();
                if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(NumericError::InvalidInput);
                }
                s.parse::<$inner>().map(Self).map_err(|_| NumericError::Overflow)
            }
        }

        impl From<$inner> for $name {
            fn from(raw: $inner) -> Self {
                Self(raw)
            }
        }

        impl std::iter::Sum for $name {
            fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
                iter.fold(Self::ZERO, |acc, x| acc.saturating_add(x))
            }
        }

        // Serialized as decimal strings: values routinely exceed 2^53.
        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                struct UnitVisitor;

                impl<'de> Visitor<'de> for UnitVisitor {
                    type Value = $name;

                    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                        write!(f, "a non-negative integer or decimal integer string")
                    }

                    fn visit_str<E: de::Error>(self, v: &str) -> Result<$name, E> {
                        v.parse::<$name>().map_err(E::custom)
                    }

                    fn visit_u64<E: de::Error>(self, v: u64) -> Result<$name, E> {
                        <$inner>::try_from(v).map($name).map_err(E::custom)
                    }

                    fn visit_i64<E: de::Error>(self, v: i64) -> Result<$name, E> {
                        <$inner>::try_from(v).map($name).map_err(E::custom)
                    }
                }

                deserializer.deserialize_any(UnitVisitor)
            }
        }
    };
}

unit_type!(
    /// Outcome price in micro-USDC per whole share (6 decimals).
    Price,
    u64
);

unit_type!(
    /// Share quantity with 18 decimals.
    Amount,
    u128
);

unit_type!(
    /// Collateral value in micro-USDC.
    UsdcMicro,
    u128
);

/// USDC notional of `amount` shares at `price`, truncated toward zero.
///
/// Amounts are bounded by configuration well below the point where
/// `amount × price` could exceed u128, so the product saturates rather than
/// failing.
pub fn order_notional_usdc(amount: Amount, price: Price) -> UsdcMicro {
    if amount.is_zero() || price.is_zero() {
        return UsdcMicro::ZERO;
    }
    UsdcMicro(amount.0.saturating_mul(price.0 as u128) / AMOUNT_SCALE)
}

/// `floor(notional × bps / 10_000)`.
pub fn fee_for(notional: UsdcMicro, fee_bps: u32) -> UsdcMicro {
    UsdcMicro(notional.0.saturating_mul(fee_bps as u128) / BPS_DENOMINATOR)
}

/// Converts a whole-USDC decimal into micro-USDC, flooring sub-micro digits.
/// Negative values clamp to zero.
pub fn usdc_to_micro(value: Decimal) -> UsdcMicro {
    if value <= Decimal::ZERO {
        return UsdcMicro::ZERO;
    }
    let micro = (value * Decimal::from(USDC_MICRO_SCALE)).floor();
    UsdcMicro(micro.to_u128().unwrap_or(u128::MAX))
}
