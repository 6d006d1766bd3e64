//! Pick Outcome Strategies
//!
//! The ledger cannot read the board, so something else must decide whether a
//! pick hit a bomb:
//!
//! - [`ClientDeclaredOutcome`]: the client checks its plaintext board
//!   locally ([`pick_tile_local`]) and later declares `end_as_boom` or
//!   `cash_out`. The verifier audits the declaration afterwards.
//! - [`OnChainComparedOutcome`]: every pick carries an encrypted guess. The
//!   store computes an encrypted `tile == guess` and the ledger keeps the
//!   result handle, so the verifier can audit each pick individually.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::fixed::Milli;
use crate::game::board::Board;
use crate::game::payout::{next_multiplier, BASE_MULTIPLIER};
use crate::game::state::GameError;
use crate::store::EncryptedInput;

/// Which strategy a ledger runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeMode {
    /// Client declares the outcome.
    #[default]
    ClientDeclared,
    /// Store compares each pick against an encrypted guess.
    OnChainCompared,
}

impl OutcomeMode {
    /// Strategy for this mode.
    pub fn strategy(self) -> Box<dyn OutcomeStrategy> {
        match self {
            Self::ClientDeclared => Box::new(ClientDeclaredOutcome),
            Self::OnChainCompared => Box::new(OnChainComparedOutcome),
        }
    }
}

impl fmt::Display for OutcomeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientDeclared => f.write_str("client-declared"),
            Self::OnChainCompared => f.write_str("on-chain-compared"),
        }
    }
}

impl FromStr for OutcomeMode {
    type Err = GameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "client-declared" | "client" => Ok(Self::ClientDeclared),
            "on-chain-compared" | "compared" => Ok(Self::OnChainCompared),
            other => Err(GameError::InvalidInput(format!("unknown outcome mode: {}", other))),
        }
    }
}

/// What the ledger must do to record a pick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PickPlan {
    /// Open the tile, nothing else.
    Plain,
    /// Validate the guess, compare it against the tile, keep the result.
    Compare(EncryptedInput),
}

/// Decides how picks are recorded.
pub trait OutcomeStrategy: Send + Sync {
    /// Mode implemented.
    fn mode(&self) -> OutcomeMode;

    /// Turn the caller's optional encrypted guess into a plan.
    fn plan_pick(&self, guess: Option<EncryptedInput>) -> Result<PickPlan, GameError>;
}

/// Client-declared outcomes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClientDeclaredOutcome;

impl OutcomeStrategy for ClientDeclaredOutcome {
    fn mode(&self) -> OutcomeMode {
        OutcomeMode::ClientDeclared
    }

    fn plan_pick(&self, guess: Option<EncryptedInput>) -> Result<PickPlan, GameError> {
        match guess {
            None => Ok(PickPlan::Plain),
            Some(_) => Err(GameError::InvalidInput(
                "encrypted guess not accepted in client-declared mode".into(),
            )),
        }
    }
}

/// Encrypted on-ledger comparison.
#[derive(Debug, Default, Clone, Copy)]
pub struct OnChainComparedOutcome;

impl OutcomeStrategy for OnChainComparedOutcome {
    fn mode(&self) -> OutcomeMode {
        OutcomeMode::OnChainCompared
    }

    fn plan_pick(&self, guess: Option<EncryptedInput>) -> Result<PickPlan, GameError> {
        let guess = guess.ok_or_else(|| GameError::InvalidInput("pick requires an encrypted guess".into()))?;
        if guess.handles.len() != 1 {
            return Err(GameError::InvalidInput(format!(
                "guess must be a single handle, got {}",
                guess.handles.len()
            )));
        }
        Ok(PickPlan::Compare(guess))
    }
}

// =============================================================================
// LOCAL PICK
// =============================================================================

/// Client-side progress through a game.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalProgress {
    /// Safe tiles opened so far.
    pub safe_count: u32,
    /// Current multiplier.
    pub multiplier: Milli,
    /// Whether a bomb was hit.
    pub boom: bool,
}

impl Default for LocalProgress {
    fn default() -> Self {
        Self { safe_count: 0, multiplier: BASE_MULTIPLIER, boom: false }
    }
}

/// Result of checking a pick against the client's plaintext board.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LocalPick {
    /// Tile was safe.
    Safe {
        /// Progress after the pick.
        progress: LocalProgress,
    },
    /// Tile was a bomb. The client should call `end_as_boom`.
    Boom {
        /// Progress at the moment of the hit.
        progress: LocalProgress,
    },
}

impl LocalPick {
    /// Progress after this pick.
    pub fn progress(&self) -> &LocalProgress {
        match self {
            LocalPick::Safe { progress } | LocalPick::Boom { progress } => progress,
        }
    }
}

/// Check tile `index` of `board` locally.
///
/// The multiplier advances on safe tiles only; the ledger advances on every
/// pick and the verifier's audit uses the safe count.
pub fn pick_tile_local(board: &Board, index: u8, progress: &LocalProgress) -> Result<LocalPick, GameError> {
    if progress.boom {
        return Err(GameError::InvalidInput("game already hit a bomb".into()));
    }
    let tile = board.tile(index as usize).ok_or_else(|| {
        GameError::InvalidInput(format!("tile {} out of range for board of {}", index, board.len()))
    })?;

    if tile.is_bomb() {
        return Ok(LocalPick::Boom { progress: LocalProgress { boom: true, ..progress.clone() } });
    }

    Ok(LocalPick::Safe {
        progress: LocalProgress {
            safe_count: progress.safe_count + 1,
            multiplier: next_multiplier(progress.multiplier),
            boom: false,
        },
    })
}
