//! Game State
//!
//! The per-game record held by the ledger and the transition rules over it.
//!
//! ## State Machine
//!
//! ```text
//!            pick_tile (opens a tile, stays Created)
//!              ┌────┐
//!              ▼    │
//!          ┌─────────┐  cash_out    ┌───────────┐
//!          │ Created │─────────────▶│ CashedOut │
//!          └─────────┘              └───────────┘
//!            │     │    end_as_boom ┌───────────┐
//!            │     └───────────────▶│   Boom    │
//!            │ end_game             └───────────┘
//!            ▼
//!          ┌─────────┐
//!          │  Ended  │
//!          └─────────┘
//! ```
//!
//! Terminal states never change. Seed and board reveal are allowed in any
//! state, each at most once.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use alloy_primitives::{Address, B256};

use crate::core::fixed::Milli;
use crate::core::uint::{self, U256};
use crate::game::board::Board;
use crate::game::payout::{next_multiplier, BASE_MULTIPLIER};
use crate::proof::commitment::commit;
use crate::store::{CiphertextHandle, EncryptedBoard, StoreError};

/// Ledger-assigned game identifier. The first game is 1.
pub type GameId = u64;

/// Lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum GameState {
    /// Accepting picks.
    #[default]
    Created = 0,
    /// Ended by the player without a declared outcome.
    Ended = 1,
    /// Player hit a bomb.
    Boom = 2,
    /// Player took the payout.
    CashedOut = 3,
}

impl GameState {
    /// Whether no further transitions are allowed.
    pub fn is_terminal(self) -> bool {
        !matches!(self, GameState::Created)
    }

    /// Numeric code.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for GameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GameState::Created => "created",
            GameState::Ended => "ended",
            GameState::Boom => "boom",
            GameState::CashedOut => "cashed_out",
        };
        f.write_str(s)
    }
}

// =============================================================================
// OPENED BITMAP
// =============================================================================

/// 256-bit set of opened tile indices. Bit `i` set means tile `i` is open.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OpenedBitmap([u64; 4]);

impl OpenedBitmap {
    /// Empty bitmap.
    pub const EMPTY: OpenedBitmap = OpenedBitmap([0; 4]);

    /// Mark `index` open. Returns false if it was already open.
    pub fn insert(&mut self, index: u8) -> bool {
        let (word, bit) = (index as usize / 64, index % 64);
        let mask = 1u64 << bit;
        let fresh = self.0[word] & mask == 0;
        self.0[word] |= mask;
        fresh
    }

    /// Whether `index` is open.
    pub fn contains(&self, index: u8) -> bool {
        let (word, bit) = (index as usize / 64, index % 64);
        self.0[word] >> bit & 1 == 1
    }

    /// Number of open tiles.
    pub fn count(&self) -> u32 {
        self.0.iter().map(|w| w.count_ones()).sum()
    }

    /// Open indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        (0..=u8::MAX).filter(move |i| self.contains(*i))
    }

    /// As a 256-bit integer, tile `i` at bit `i`.
    pub fn to_u256(&self) -> U256 {
        U256::from_limbs(self.0)
    }

    /// From a 256-bit integer.
    pub fn from_u256(value: &U256) -> Self {
        Self(*value.as_limbs())
    }
}

impl fmt::Debug for OpenedBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl Serialize for OpenedBitmap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&format!("0x{}", hex::encode(self.to_u256().to_be_bytes::<32>())))
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for OpenedBitmap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            uint::decimal::deserialize(deserializer).map(|value| Self::from_u256(&value))
        } else {
            <[u64; 4]>::deserialize(deserializer).map(OpenedBitmap)
        }
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Why a transition was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionRejection {
    /// Game is already in a terminal state.
    #[error("game already {0}")]
    AlreadyTerminal(GameState),
    /// Tile index past the end of the board.
    #[error("tile {index} out of range for board of {board_size}")]
    IndexOutOfRange {
        /// Requested tile.
        index: u8,
        /// Board size.
        board_size: u8,
    },
    /// Tile was opened by an earlier pick.
    #[error("tile {0} already opened")]
    TileAlreadyOpened(u8),
    /// Seed was revealed before.
    #[error("seed already revealed")]
    SeedAlreadyRevealed,
    /// Board was revealed before.
    #[error("board already revealed")]
    BoardAlreadyRevealed,
}

/// Game ledger errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    /// Malformed arguments.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Caller is not permitted to act on this game.
    #[error("{caller} is not the player of game {game_id}")]
    Unauthorized {
        /// Game acted on.
        game_id: GameId,
        /// Rejected caller.
        caller: Address,
    },
    /// No such game.
    #[error("game {0} not found")]
    GameNotFound(GameId),
    /// Transition not allowed from the current state.
    #[error("invalid state transition: {0}")]
    InvalidStateTransition(#[from] TransitionRejection),
    /// Revealed seed does not reproduce the commitment.
    #[error("Commit mismatch")]
    CommitMismatch,
    /// Encrypted store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// =============================================================================
// RECORD
// =============================================================================

/// One pick, in the order it was made.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PickRecord {
    /// Opened tile.
    pub index: u8,
    /// Encrypted guess (on-chain compared outcomes only).
    pub guess: Option<CiphertextHandle>,
    /// Encrypted `tile == guess` (on-chain compared outcomes only).
    pub result: Option<CiphertextHandle>,
}

impl PickRecord {
    /// A pick with no encrypted comparison.
    pub fn plain(index: u8) -> Self {
        Self { index, guess: None, result: None }
    }
}

/// Full per-game record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameRecord {
    /// Identifier.
    pub id: GameId,
    /// Player address.
    pub player: Address,
    /// Number of tiles.
    pub board_size: u8,
    /// Sealed board.
    pub encrypted_board: EncryptedBoard,
    /// `keccak256(abi.encode(seed, player, boardSize))`.
    pub commit_hash: B256,
    /// `keccak256` over the concatenated ciphertext handles.
    pub ciphertext_commit: Option<B256>,
    /// Opened tiles.
    pub opened: OpenedBitmap,
    /// Picks in order.
    pub picks: Vec<PickRecord>,
    /// Current multiplier.
    pub multiplier: Milli,
    /// Lifecycle state.
    pub state: GameState,
    /// Seed, once revealed.
    #[serde(with = "uint::option_decimal", default)]
    pub revealed_seed: Option<U256>,
    /// Plaintext board, once revealed by the player.
    pub revealed_board: Option<Board>,
    /// Addresses granted decrypt rights by the player.
    pub verifiers: BTreeSet<Address>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last transition time.
    pub updated_at: DateTime<Utc>,
}

impl GameRecord {
    /// Fresh record in `Created`.
    pub fn new(
        id: GameId,
        player: Address,
        board_size: u8,
        encrypted_board: EncryptedBoard,
        commit_hash: B256,
        ciphertext_commit: Option<B256>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            player,
            board_size,
            encrypted_board,
            commit_hash,
            ciphertext_commit,
            opened: OpenedBitmap::EMPTY,
            picks: Vec::new(),
            multiplier: BASE_MULTIPLIER,
            state: GameState::Created,
            revealed_seed: None,
            revealed_board: None,
            verifiers: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Tiles opened so far.
    pub fn opened_count(&self) -> u8 {
        self.opened.count() as u8
    }

    /// Whether the seed has been revealed.
    pub fn is_seed_revealed(&self) -> bool {
        self.revealed_seed.is_some()
    }

    /// Every handle a grantee needs to audit this game.
    pub fn audit_handles(&self) -> Vec<CiphertextHandle> {
        let mut handles = self.encrypted_board.handles.clone();
        for pick in &self.picks {
            handles.extend(pick.guess);
            handles.extend(pick.result);
        }
        handles
    }

    fn ensure_player(&self, caller: &Address) -> Result<(), GameError> {
        if *caller != self.player {
            return Err(GameError::Unauthorized { game_id: self.id, caller: *caller });
        }
        Ok(())
    }

    fn ensure_active(&self) -> Result<(), GameError> {
        if self.state.is_terminal() {
            return Err(TransitionRejection::AlreadyTerminal(self.state).into());
        }
        Ok(())
    }

    /// Check a pick without applying it.
    pub fn check_pick(&self, caller: &Address, index: u8) -> Result<(), GameError> {
        self.ensure_player(caller)?;
        self.ensure_active()?;
        if index >= self.board_size {
            return Err(TransitionRejection::IndexOutOfRange { index, board_size: self.board_size }.into());
        }
        if self.opened.contains(index) {
            return Err(TransitionRejection::TileAlreadyOpened(index).into());
        }
        Ok(())
    }

    /// Open a tile and advance the multiplier.
    pub fn apply_pick(&mut self, caller: &Address, pick: PickRecord) -> Result<Milli, GameError> {
        self.check_pick(caller, pick.index)?;
        self.opened.insert(pick.index);
        self.picks.push(pick);
        self.multiplier = next_multiplier(self.multiplier);
        self.updated_at = Utc::now();
        Ok(self.multiplier)
    }

    /// Move to a terminal state.
    pub fn finish(&mut self, caller: &Address, target: GameState) -> Result<(), GameError> {
        self.ensure_player(caller)?;
        self.ensure_active()?;
        if !target.is_terminal() {
            return Err(GameError::InvalidInput(format!("{} is not a terminal state", target)));
        }
        self.state = target;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Check a seed against the commitment without storing it.
    pub fn check_seed(&self, caller: &Address, seed: &U256) -> Result<(), GameError> {
        self.ensure_player(caller)?;
        if self.revealed_seed.is_some() {
            return Err(TransitionRejection::SeedAlreadyRevealed.into());
        }
        if commit(seed, &self.player, self.board_size) != self.commit_hash {
            return Err(GameError::CommitMismatch);
        }
        Ok(())
    }

    /// Store a seed after checking it against the commitment.
    pub fn reveal_seed(&mut self, caller: &Address, seed: U256) -> Result<(), GameError> {
        self.check_seed(caller, &seed)?;
        self.revealed_seed = Some(seed);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Check a claimed plaintext board without storing it.
    pub fn check_board(&self, caller: &Address, board: &Board) -> Result<(), GameError> {
        self.ensure_player(caller)?;
        if self.revealed_board.is_some() {
            return Err(TransitionRejection::BoardAlreadyRevealed.into());
        }
        if board.len() != self.board_size as usize {
            return Err(GameError::InvalidInput(format!(
                "board has {} tiles, game has {}",
                board.len(),
                self.board_size
            )));
        }
        Ok(())
    }

    /// Record the player's claimed plaintext board.
    pub fn reveal_board(&mut self, caller: &Address, board: Board) -> Result<(), GameError> {
        self.check_board(caller, &board)?;
        self.revealed_board = Some(board);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record a verifier grant.
    pub fn allow_verifier(&mut self, caller: &Address, verifier: Address) -> Result<bool, GameError> {
        self.ensure_player(caller)?;
        Ok(self.verifiers.insert(verifier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::payout::multiplier;
    use crate::store::{BoardLayout, InputProof};
    use proptest::prelude::*;

    fn alice() -> Address {
        Address::new([0xaa; 20])
    }

    fn mallory() -> Address {
        Address::new([0x66; 20])
    }

    fn record(board_size: u8, seed: u64) -> GameRecord {
        GameRecord::new(
            1,
            alice(),
            board_size,
            EncryptedBoard {
                layout: BoardLayout::Packed,
                handles: vec![CiphertextHandle([1; 32])],
                proof: InputProof::default(),
            },
            commit(&U256::from(seed), &alice(), board_size),
            None,
        )
    }

    #[test]
    fn test_bitmap() {
        let mut bitmap = OpenedBitmap::EMPTY;
        assert!(bitmap.insert(0));
        assert!(bitmap.insert(200));
        assert!(!bitmap.insert(0));
        assert!(bitmap.contains(200));
        assert!(!bitmap.contains(1));
        assert_eq!(bitmap.count(), 2);
        assert_eq!(bitmap.iter().collect::<Vec<_>>(), vec![0, 200]);
        assert_eq!(OpenedBitmap::from_u256(&bitmap.to_u256()), bitmap);
    }

    #[test]
    fn test_bitmap_json() {
        let mut bitmap = OpenedBitmap::EMPTY;
        bitmap.insert(0);
        bitmap.insert(2);
        let json = serde_json::to_string(&bitmap).unwrap();
        assert_eq!(json, format!("\"0x{}05\"", "0".repeat(62)));
        assert_eq!(serde_json::from_str::<OpenedBitmap>(&json).unwrap(), bitmap);
    }

    #[test]
    fn test_pick_advances_multiplier() {
        let mut game = record(5, 1);
        assert_eq!(game.apply_pick(&alice(), PickRecord::plain(0)).unwrap(), Milli(1050));
        assert_eq!(game.apply_pick(&alice(), PickRecord::plain(4)).unwrap(), Milli(1102));
        assert_eq!(game.opened_count(), 2);
        assert_eq!(game.state, GameState::Created);
    }

    #[test]
    fn test_pick_rejections() {
        let mut game = record(5, 1);
        assert!(matches!(
            game.apply_pick(&mallory(), PickRecord::plain(0)),
            Err(GameError::Unauthorized { .. })
        ));
        assert_eq!(
            game.apply_pick(&alice(), PickRecord::plain(5)),
            Err(TransitionRejection::IndexOutOfRange { index: 5, board_size: 5 }.into())
        );
        game.apply_pick(&alice(), PickRecord::plain(1)).unwrap();
        assert_eq!(
            game.apply_pick(&alice(), PickRecord::plain(1)),
            Err(TransitionRejection::TileAlreadyOpened(1).into())
        );
        assert_eq!(game.opened_count(), 1);
        assert_eq!(game.multiplier, Milli(1050));
    }

    #[test]
    fn test_terminal_states_are_final() {
        for target in [GameState::Ended, GameState::Boom, GameState::CashedOut] {
            let mut game = record(5, 1);
            game.finish(&alice(), target).unwrap();
            assert_eq!(game.state, target);

            let rejected = TransitionRejection::AlreadyTerminal(target).into();
            assert_eq!(game.apply_pick(&alice(), PickRecord::plain(0)), Err(rejected));
            for again in [GameState::Ended, GameState::Boom, GameState::CashedOut] {
                assert!(game.finish(&alice(), again).is_err());
            }
            assert_eq!(game.state, target);
        }
    }

    #[test]
    fn test_finish_requires_player_and_terminal_target() {
        let mut game = record(5, 1);
        assert!(matches!(game.finish(&mallory(), GameState::Ended), Err(GameError::Unauthorized { .. })));
        assert!(matches!(game.finish(&alice(), GameState::Created), Err(GameError::InvalidInput(_))));
    }

    #[test]
    fn test_seed_reveal() {
        let mut game = record(5, 123456);
        assert_eq!(game.reveal_seed(&alice(), U256::from(999u64)), Err(GameError::CommitMismatch));
        assert!(!game.is_seed_revealed());

        game.reveal_seed(&alice(), U256::from(123456u64)).unwrap();
        assert!(game.is_seed_revealed());
        assert_eq!(
            game.reveal_seed(&alice(), U256::from(123456u64)),
            Err(TransitionRejection::SeedAlreadyRevealed.into())
        );
    }

    #[test]
    fn test_wrong_seed_rejected() {
        let mut game = record(3, 111);
        assert_eq!(game.reveal_seed(&alice(), U256::from(222u64)), Err(GameError::CommitMismatch));
        assert!(game.reveal_seed(&alice(), U256::from(111u64)).is_ok());
    }

    #[test]
    fn test_seed_reveal_allowed_after_terminal() {
        let mut game = record(4, 7);
        game.finish(&alice(), GameState::Boom).unwrap();
        assert!(game.reveal_seed(&alice(), U256::from(7u64)).is_ok());
    }

    #[test]
    fn test_board_reveal() {
        let mut game = record(5, 1);
        let wrong = Board::from_bits(&[0, 1]).unwrap();
        assert!(matches!(game.reveal_board(&alice(), wrong), Err(GameError::InvalidInput(_))));

        let board = Board::from_bits(&[0, 0, 1, 0, 0]).unwrap();
        game.reveal_board(&alice(), board.clone()).unwrap();
        assert_eq!(game.revealed_board, Some(board.clone()));
        assert_eq!(
            game.reveal_board(&alice(), board),
            Err(TransitionRejection::BoardAlreadyRevealed.into())
        );
    }

    #[test]
    fn test_state_codes() {
        assert_eq!(GameState::Created.as_u8(), 0);
        assert_eq!(GameState::Ended.as_u8(), 1);
        assert_eq!(serde_json::to_string(&GameState::CashedOut).unwrap(), "\"cashed_out\"");
    }

    proptest! {
        #[test]
        fn prop_opened_count_monotonic_and_bounded(
            board_size in 1u8..=64,
            picks in prop::collection::vec(any::<u8>(), 0..200),
        ) {
            let mut game = record(board_size, 1);
            let mut previous = 0u8;

            for index in picks {
                let before = game.clone();
                match game.apply_pick(&alice(), PickRecord::plain(index)) {
                    Ok(_) => prop_assert_eq!(game.opened_count(), previous + 1),
                    Err(_) => {
                        prop_assert!(index >= board_size || before.opened.contains(index));
                        prop_assert_eq!(&game, &before);
                    }
                }

                prop_assert!(game.opened_count() >= previous);
                prop_assert!(game.opened_count() <= board_size);
                prop_assert_eq!(game.multiplier, multiplier(u32::from(game.opened_count())));
                previous = game.opened_count();
            }
        }
    }
}
