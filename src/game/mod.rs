//! Game Logic Module
//!
//! Boards, payouts and the game ledger.
//!
//! ## Module Structure
//!
//! - `board`: tiles, plaintext boards, packing, seeded generation
//! - `payout`: multiplier schedule
//! - `state`: per-game record and its state machine
//! - `events`: ordered per-game event log
//! - `outcome`: how pick outcomes are decided
//! - `ledger`: concurrent game registry (the on-ledger contract)

pub mod board;
pub mod events;
pub mod ledger;
pub mod outcome;
pub mod payout;
pub mod state;

// Re-export key types
pub use board::{Board, BoardError, Difficulty, RowBoard, Tile};
pub use events::{EventLog, GameEvent, GameEventData};
pub use ledger::{CreateGame, GameLedger, LedgerConfig, SnapshotError};
pub use outcome::{pick_tile_local, LocalPick, LocalProgress, OutcomeMode, OutcomeStrategy, PickPlan};
pub use payout::{multiplier, next_multiplier, payout, BASE_MULTIPLIER};
pub use state::{GameError, GameId, GameRecord, GameState, OpenedBitmap, PickRecord, TransitionRejection};
