//! Multiplier / Payout Engine
//!
//! `multiplier(n)` starts at 1.000× and grows by a fixed 5% per confirmed-safe
//! pick, flooring to a whole milli-unit after every step:
//!
//! ```text
//! n:  0     1     2     3     4     5
//! m:  1000  1050  1102  1157  1214  1274
//! ```
//!
//! The play path and the verifier's audit path both call [`multiplier`], so
//! the rounding rule cannot drift between them.

use crate::core::fixed::{mul_ratio_floor, Milli, MILLI_ONE};

/// Growth numerator per safe pick (×1.05).
pub const GROWTH_NUM: u64 = 105;

/// Growth denominator per safe pick.
pub const GROWTH_DEN: u64 = 100;

/// Base multiplier with no safe picks.
pub const BASE_MULTIPLIER: Milli = Milli(MILLI_ONE);

/// Advance a multiplier by one safe pick.
///
/// Saturates at `u64::MAX`; unreachable with boards of at most 255 tiles.
#[inline]
pub fn next_multiplier(current: Milli) -> Milli {
    Milli(mul_ratio_floor(current.raw(), GROWTH_NUM, GROWTH_DEN).unwrap_or(u64::MAX))
}

/// Multiplier after `safe_count` confirmed-safe picks.
pub fn multiplier(safe_count: u32) -> Milli {
    (0..safe_count).fold(BASE_MULTIPLIER, |m, _| next_multiplier(m))
}

/// Payout for `stake` at `safe_count` safe picks, floored.
pub fn payout(stake: u64, safe_count: u32) -> Option<u64> {
    multiplier(safe_count).apply(stake)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_base_multiplier() {
        assert_eq!(multiplier(0), Milli(1000));
    }

    #[test]
    fn test_reference_sequence() {
        let expected = [1000, 1050, 1102, 1157, 1214, 1274];
        for (n, want) in expected.iter().enumerate() {
            assert_eq!(multiplier(n as u32).raw(), *want, "n = {}", n);
        }
    }

    #[test]
    fn test_floor_not_round_half_even() {
        // 1050 * 1.05 = 1102.5 -> 1102
        assert_eq!(next_multiplier(Milli(1050)), Milli(1102));
        // 1157 * 1.05 = 1214.85 -> 1214
        assert_eq!(next_multiplier(Milli(1157)), Milli(1214));
    }

    #[test]
    fn test_payout() {
        assert_eq!(payout(1000, 2), Some(1102));
        assert_eq!(payout(0, 10), Some(0));
    }

    #[test]
    fn test_full_board_does_not_saturate() {
        assert!(multiplier(255).raw() < u64::MAX);
    }

    proptest! {
        #[test]
        fn prop_strictly_increasing(n in 0u32..255) {
            prop_assert!(multiplier(n + 1) > multiplier(n));
        }

        #[test]
        fn prop_reevaluation_is_stable(n in 0u32..255) {
            prop_assert_eq!(multiplier(n), multiplier(n));
        }
    }
}
