//! # Mines Fair
//!
//! Provably-fair commit-reveal-verify protocol for encrypted Mines boards.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      MINES FAIR                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── uint.rs     - 256-bit seed words, decimal serde         │
//! │  ├── fixed.rs    - Milli fixed-point multipliers             │
//! │  └── rng.rs      - Deterministic Xorshift128+ PRNG           │
//! │                                                              │
//! │  game/           - Game logic                                │
//! │  ├── board.rs    - Tiles, packing, row generation            │
//! │  ├── payout.rs   - Multiplier schedule                       │
//! │  ├── state.rs    - Game record and state machine             │
//! │  ├── outcome.rs  - Bomb detection strategies                 │
//! │  ├── events.rs   - Per-game event log                        │
//! │  └── ledger.rs   - Authoritative game registry               │
//! │                                                              │
//! │  store/          - Encrypted board store                     │
//! │  ├── backend.rs  - Encryption capability boundary            │
//! │  ├── authorization.rs - Signed decrypt requests              │
//! │  └── board_store.rs   - Worker pool and layouts              │
//! │                                                              │
//! │  proof/          - Fairness proofs                           │
//! │  ├── commitment.rs - Seed and ciphertext commitments         │
//! │  └── verify.rs   - Independent verifier                      │
//! │                                                              │
//! │  network/        - HTTP boundary                             │
//! │  ├── server.rs   - POST /verify                              │
//! │  ├── client.rs   - Remote record source                      │
//! │  └── protocol.rs - Wire types and error codes                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Fairness Guarantee
//!
//! The player commits to `keccak256(abi.encode(seed, player, boardSize))`
//! and submits the board only as ciphertext. After the game anyone holding
//! a decrypt grant can recompute the commitment from the disclosed seed,
//! decrypt the board and check it against the declared outcome. Encodings
//! and digests come from `alloy`, so every party computes the same bytes as
//! the on-chain contract.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;
pub mod proof;
pub mod store;

// Re-export commonly used types
pub use crate::core::{keccak256, Address, Milli, B256, U256};
pub use game::{Board, GameError, GameId, GameLedger, GameRecord, GameState, LedgerConfig, OutcomeMode};
pub use proof::{GameProof, Verdict, VerificationReport, Verifier, VerifierConfig};
pub use store::{BoardLayout, EncryptedBoardStore, LocalBackend, StoreConfig, StoreError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
