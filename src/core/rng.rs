//! Board Randomness
//!
//! Xorshift128+ seeded through SplitMix64. Output depends only on the seed,
//! so a board generated from a committed seed can be regenerated by anyone
//! holding the disclosure.

use alloy_primitives::{Address, Keccak256, U256};

const BOARD_SEED_DOMAIN: &[u8] = b"MINES_BOARD_SEED_V1";

/// Deterministic PRNG for board layouts.
///
/// ```
/// use mines_fair::core::rng::DeterministicRng;
///
/// let mut a = DeterministicRng::new(12345);
/// let mut b = DeterministicRng::new(12345);
/// assert_eq!(a.next_u64(), b.next_u64());
/// ```
#[derive(Clone, Debug)]
pub struct DeterministicRng {
    state: [u64; 2],
}

impl DeterministicRng {
    /// Seed from a 64-bit value.
    pub fn new(seed: u64) -> Self {
        let mut s = seed;
        let hi = splitmix64(&mut s);
        let lo = splitmix64(&mut s);

        // All-zero state is a fixed point of the generator
        let state = if hi == 0 && lo == 0 { [1, 1] } else { [hi, lo] };
        Self { state }
    }

    /// Seed from a game's committed parameters.
    pub fn from_game_params(seed: &U256, player: &Address, board_size: u8) -> Self {
        Self::new(derive_board_seed(seed, player, board_size))
    }

    /// Next 64-bit value.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let [s0, mut s1] = self.state;
        let result = s0.wrapping_add(s1);

        s1 ^= s0;
        self.state = [s0.rotate_left(24) ^ s1 ^ (s1 << 16), s1.rotate_left(37)];
        result
    }

    /// Value in `[0, max)`. Plain modulo; the bias is negligible for
    /// board-sized ranges.
    #[inline]
    pub fn next_int(&mut self, max: u32) -> u32 {
        if max == 0 {
            return 0;
        }
        (self.next_u64() % u64::from(max)) as u32
    }

    /// Value in `[min, max]`.
    #[inline]
    pub fn next_int_range(&mut self, min: u32, max: u32) -> u32 {
        if min >= max {
            return min;
        }
        min + self.next_int(max - min + 1)
    }
}

#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// 64-bit RNG seed for a game: the first 8 bytes (little-endian) of
/// `keccak256(domain || seed || player || boardSize)`.
///
/// Domain-separated from the commitment so the RNG seed never equals a
/// prefix of the published commit hash.
pub fn derive_board_seed(seed: &U256, player: &Address, board_size: u8) -> u64 {
    let mut hasher = Keccak256::new();
    hasher.update(BOARD_SEED_DOMAIN);
    hasher.update(seed.to_be_bytes::<32>());
    hasher.update(player);
    hasher.update([board_size]);
    let digest = hasher.finalize();

    let mut first = [0u8; 8];
    first.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(first)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_stream() {
        let mut a = DeterministicRng::new(12345);
        let mut b = DeterministicRng::new(12345);
        assert!((0..1000).all(|_| a.next_u64() == b.next_u64()));
    }

    #[test]
    fn test_rng_known_values() {
        // Boards regenerated from old seeds depend on these
        let mut rng = DeterministicRng::new(42);
        assert_eq!(rng.next_u64(), 16629283624882167704);
        assert_eq!(rng.next_u64(), 1420492921613871959);
        assert_eq!(rng.next_u64(), 9768315062676884790);
    }

    #[test]
    fn test_next_int_range() {
        let mut rng = DeterministicRng::new(5678);
        assert!((0..1000).map(|_| rng.next_int_range(2, 4)).all(|v| (2..=4).contains(&v)));

        assert_eq!(rng.next_int_range(5, 5), 5);
        assert_eq!(rng.next_int(0), 0);
        assert_eq!(rng.next_int(1), 0);
    }

    #[test]
    fn test_derive_board_seed() {
        let player = Address::repeat_byte(7);
        let seed = U256::from(123456u64);

        let a = derive_board_seed(&seed, &player, 5);
        assert_eq!(a, derive_board_seed(&seed, &player, 5));
        assert_ne!(a, derive_board_seed(&seed, &player, 4));
        assert_ne!(a, derive_board_seed(&seed, &Address::repeat_byte(8), 5));
        assert_ne!(a, derive_board_seed(&U256::from(123457u64), &player, 5));
    }
}
