//! Game Events
//!
//! Append-only per-game log of ledger transitions, the off-chain analogue of
//! contract events. Ordered by sequence number within a game.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use alloy_primitives::{Address, B256};

use crate::core::fixed::Milli;
use crate::core::uint::{self, U256};
use crate::game::state::{GameId, GameState};

/// Game event data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameEventData {
    /// Game accepted by the ledger
    GameCreated {
        board_size: u8,
        commit_hash: B256,
    },

    /// Tile opened
    TilePicked {
        index: u8,
        opened_count: u8,
        multiplier: Milli,
    },

    /// Game reached a terminal state
    Finished {
        state: GameState,
        multiplier: Milli,
    },

    /// Seed revealed and matched the commitment
    SeedRevealed {
        #[serde(with = "uint::decimal")]
        seed: U256,
    },

    /// Player published the plaintext board
    BoardRevealed {
        bomb_count: u32,
    },

    /// Player granted decrypt rights
    VerifierAllowed {
        verifier: Address,
    },
}

/// A ledger event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameEvent {
    /// Game the event belongs to
    pub game_id: GameId,

    /// Position in the game's log, from 0
    pub seq: u32,

    /// Caller that caused it
    pub actor: Address,

    /// Wall-clock time
    pub at: DateTime<Utc>,

    /// Event data
    pub data: GameEventData,
}

impl GameEvent {
    /// Whether this event moved the game to a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self.data, GameEventData::Finished { .. })
    }
}

impl PartialEq for GameEvent {
    fn eq(&self, other: &Self) -> bool {
        self.game_id == other.game_id && self.seq == other.seq
    }
}

impl Eq for GameEvent {}

impl PartialOrd for GameEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GameEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.game_id.cmp(&other.game_id).then(self.seq.cmp(&other.seq))
    }
}

/// One game's event log.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EventLog {
    game_id: GameId,
    events: Vec<GameEvent>,
}

impl EventLog {
    /// Empty log for `game_id`.
    pub fn new(game_id: GameId) -> Self {
        Self { game_id, events: Vec::new() }
    }

    /// Append an event, stamping sequence and time.
    pub fn push(&mut self, actor: Address, data: GameEventData) -> &GameEvent {
        let seq = self.events.len() as u32;
        self.events.push(GameEvent { game_id: self.game_id, seq, actor, at: Utc::now(), data });
        &self.events[seq as usize]
    }

    /// All events, oldest first.
    pub fn events(&self) -> &[GameEvent] {
        &self.events
    }

    /// Number of events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_sequence() {
        let alice = Address::repeat_byte(0xaa);
        let mut log = EventLog::new(7);
        log.push(alice, GameEventData::GameCreated { board_size: 5, commit_hash: B256::ZERO });
        log.push(alice, GameEventData::TilePicked { index: 0, opened_count: 1, multiplier: Milli(1050) });
        let last = log.push(alice, GameEventData::Finished { state: GameState::Ended, multiplier: Milli(1050) });
        assert!(last.is_terminal());

        assert_eq!(log.len(), 3);
        let seqs: Vec<u32> = log.events().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert!(log.events().iter().all(|e| e.game_id == 7));
        assert!(log.events()[0] < log.events()[1]);
    }

    #[test]
    fn test_event_json_is_tagged() {
        let data = GameEventData::VerifierAllowed { verifier: Address::repeat_byte(1) };
        let json = serde_json::to_value(&data).unwrap();
        assert!(json.get("verifier_allowed").is_some());
    }
}
