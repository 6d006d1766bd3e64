//! Milli Fixed-Point Arithmetic
//!
//! Payout multipliers are integers scaled by 1000 (`1000` = 1.000×), matching
//! the ledger's storage. All operations are integer-only and round toward
//! zero (floor for the non-negative values used here).
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  raw  │  meaning                              │
//! ├──────────────────────────────────────────────┤
//! │  1000 │  1.000×                               │
//! │  1050 │  1.050×                               │
//! │  1102 │  1.102×  (floor of 1102.5)            │
//! └──────────────────────────────────────────────┘
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Milli-units per 1.0.
pub const MILLI_SCALE: u64 = 1000;

/// 1.000× in milli-units.
pub const MILLI_ONE: u64 = MILLI_SCALE;

/// Multiply `value` by the ratio `num / den`, flooring the result.
///
/// Uses a u128 intermediate so `value * num` cannot overflow.
/// Returns `None` if `den` is zero or the result does not fit in u64.
#[inline]
pub fn mul_ratio_floor(value: u64, num: u64, den: u64) -> Option<u64> {
    if den == 0 {
        return None;
    }
    let wide = (value as u128) * (num as u128) / (den as u128);
    u64::try_from(wide).ok()
}

/// A fixed-point multiplier in milli-units.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Milli(pub u64);

impl Milli {
    /// 1.000×
    pub const ONE: Milli = Milli(MILLI_ONE);

    /// Raw milli-units.
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Integer part.
    #[inline]
    pub const fn whole(self) -> u64 {
        self.0 / MILLI_SCALE
    }

    /// Fractional part in milli-units.
    #[inline]
    pub const fn frac(self) -> u64 {
        self.0 % MILLI_SCALE
    }

    /// Apply this multiplier to an integer stake, flooring.
    pub fn apply(self, stake: u64) -> Option<u64> {
        mul_ratio_floor(stake, self.0, MILLI_SCALE)
    }
}

impl fmt::Debug for Milli {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Milli({}.{:03}x)", self.whole(), self.frac())
    }
}

impl fmt::Display for Milli {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}x", self.whole(), self.frac())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mul_ratio_floor() {
        assert_eq!(mul_ratio_floor(1000, 105, 100), Some(1050));
        assert_eq!(mul_ratio_floor(1050, 105, 100), Some(1102));
        assert_eq!(mul_ratio_floor(1, 1, 0), None);
        assert_eq!(mul_ratio_floor(u64::MAX, 2, 1), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Milli(1102).to_string(), "1.102x");
        assert_eq!(Milli::ONE.to_string(), "1.000x");
        assert_eq!(Milli(12005).to_string(), "12.005x");
    }

    #[test]
    fn test_apply_stake() {
        assert_eq!(Milli(1050).apply(200), Some(210));
        assert_eq!(Milli(1102).apply(3), Some(3));
    }
}
