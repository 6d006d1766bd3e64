//! Core deterministic primitives.
//!
//! Everything here is a pure function of its inputs. The commitment codec and
//! the verifier depend on these encodings being byte-exact across parties, so
//! EVM types come straight from `alloy-primitives`.

pub mod fixed;
pub mod rng;
pub mod uint;

// Re-export core types
pub use alloy_primitives::{address, keccak256, Address, Keccak256, B256};
pub use fixed::{Milli, MILLI_ONE, MILLI_SCALE};
pub use rng::DeterministicRng;
pub use uint::U256;
