//! Game Ledger
//!
//! Authoritative store of game records. Every mutating call takes the
//! game's lock for its whole duration, including any store round-trips, so
//! operations on one game are serialized and either apply completely or
//! leave the record untouched. Different games proceed in parallel.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use alloy_primitives::{Address, B256, U256};

use crate::core::fixed::Milli;
use crate::game::board::{Board, MAX_BOARD_SIZE};
use crate::game::events::{EventLog, GameEvent, GameEventData};
use crate::game::outcome::{OutcomeMode, OutcomeStrategy, PickPlan};
use crate::game::state::{GameError, GameId, GameRecord, GameState, PickRecord};
use crate::proof::commitment::ciphertext_commit;
use crate::store::{EncryptedBoard, EncryptedBoardStore, EncryptedInput};

const SNAPSHOT_VERSION: u32 = 1;

/// Ledger configuration.
#[derive(Clone, Debug)]
pub struct LedgerConfig {
    /// How pick outcomes are decided.
    pub outcome: OutcomeMode,
    /// Largest board accepted (further capped by the store layout).
    pub max_board_size: u8,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self { outcome: OutcomeMode::ClientDeclared, max_board_size: MAX_BOARD_SIZE as u8 }
    }
}

impl LedgerConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, GameError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Create config from a variable lookup. Malformed or zero values are
    /// errors.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, GameError> {
        let mut config = Self::default();
        if let Some(mode) = var("MINES_OUTCOME") {
            config.outcome = mode.parse()?;
        }
        if let Some(max) = var("MINES_MAX_BOARD_SIZE") {
            config.max_board_size = max
                .parse::<u8>()
                .ok()
                .filter(|m| *m > 0)
                .ok_or_else(|| GameError::InvalidInput(format!("MINES_MAX_BOARD_SIZE: {}", max)))?;
        }
        Ok(config)
    }
}

/// Arguments to [`GameLedger::create_game`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGame {
    /// Board sealed by the store.
    pub encrypted_board: EncryptedBoard,
    /// `keccak256(abi.encode(seed, player, boardSize))`.
    pub commit_hash: B256,
    /// Optional digest over the ciphertext handles.
    pub ciphertext_commit: Option<B256>,
    /// Number of tiles.
    pub board_size: u8,
}

/// Snapshot errors.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Encoding or decoding failed.
    #[error("snapshot codec: {0}")]
    Codec(#[from] bincode::Error),
    /// Snapshot written by an unknown version.
    #[error("unsupported snapshot version {0}")]
    Version(u32),
}

#[derive(Debug)]
struct GameEntry {
    record: GameRecord,
    log: EventLog,
}

#[derive(Serialize, Deserialize)]
struct LedgerSnapshot {
    version: u32,
    next_id: GameId,
    games: Vec<(GameRecord, EventLog)>,
}

/// The game ledger.
pub struct GameLedger {
    config: LedgerConfig,
    store: Arc<EncryptedBoardStore>,
    outcome: Box<dyn OutcomeStrategy>,
    games: RwLock<BTreeMap<GameId, Arc<Mutex<GameEntry>>>>,
    next_id: AtomicU64,
}

impl GameLedger {
    /// Create an empty ledger.
    pub fn new(store: Arc<EncryptedBoardStore>, config: LedgerConfig) -> Self {
        let outcome = config.outcome.strategy();
        Self {
            config,
            store,
            outcome,
            games: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Ledger configuration.
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Encrypted store this ledger uses.
    pub fn store(&self) -> &Arc<EncryptedBoardStore> {
        &self.store
    }

    /// Contract address inputs are bound to.
    pub fn contract(&self) -> Address {
        self.store.contract()
    }

    /// Active outcome mode.
    pub fn outcome_mode(&self) -> OutcomeMode {
        self.outcome.mode()
    }

    async fn entry(&self, game_id: GameId) -> Result<Arc<Mutex<GameEntry>>, GameError> {
        let games = self.games.read().await;
        games.get(&game_id).cloned().ok_or(GameError::GameNotFound(game_id))
    }

    // =========================================================================
    // MUTATIONS
    // =========================================================================

    /// Register a new game for `caller`.
    #[instrument(skip(self, request))]
    pub async fn create_game(&self, caller: Address, request: CreateGame) -> Result<GameId, GameError> {
        let CreateGame { encrypted_board, commit_hash, ciphertext_commit: declared, board_size } = request;

        if board_size == 0 || board_size > self.config.max_board_size {
            return Err(GameError::InvalidInput(format!(
                "board size must be 1..={}, got {}",
                self.config.max_board_size, board_size
            )));
        }
        if encrypted_board.layout != self.store.layout() {
            return Err(GameError::InvalidInput(format!(
                "ledger expects {} layout, got {}",
                self.store.layout().as_str(),
                encrypted_board.layout.as_str()
            )));
        }
        encrypted_board.check_shape(board_size)?;
        if commit_hash.is_zero() {
            return Err(GameError::InvalidInput("commit hash is zero".into()));
        }
        if let Some(declared) = declared {
            if declared != ciphertext_commit(&encrypted_board.handles) {
                return Err(GameError::InvalidInput("ciphertext commit does not match handles".into()));
            }
        }

        self.store
            .verify_input(encrypted_board.handles.clone(), encrypted_board.proof.clone(), caller)
            .await?;
        self.store.allow(encrypted_board.handles.clone(), caller).await?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let record = GameRecord::new(id, caller, board_size, encrypted_board, commit_hash, declared);
        let mut log = EventLog::new(id);
        log.push(caller, GameEventData::GameCreated { board_size, commit_hash });

        let mut games = self.games.write().await;
        games.insert(id, Arc::new(Mutex::new(GameEntry { record, log })));

        info!("Game {} created by {:#} ({} tiles)", id, caller, board_size);
        Ok(id)
    }

    /// Open tile `index`. Returns the new multiplier.
    pub async fn pick_tile(
        &self,
        caller: Address,
        game_id: GameId,
        index: u8,
        guess: Option<EncryptedInput>,
    ) -> Result<Milli, GameError> {
        let entry = self.entry(game_id).await?;
        let mut entry = entry.lock().await;

        entry.record.check_pick(&caller, index)?;

        let pick = match self.outcome.plan_pick(guess)? {
            PickPlan::Plain => PickRecord::plain(index),
            PickPlan::Compare(guess) => {
                let guess_handle = guess.handles[0];
                self.store.verify_input(guess.handles, guess.proof, caller).await?;
                let result = self
                    .store
                    .compare_tile(entry.record.encrypted_board.handles.clone(), index, guess_handle, caller)
                    .await?;
                // Verifiers granted earlier must be able to audit this pick too
                let mut grantees = vec![caller];
                grantees.extend(entry.record.verifiers.iter().copied());
                for grantee in grantees {
                    self.store.allow(vec![guess_handle, result], grantee).await?;
                }
                PickRecord { index, guess: Some(guess_handle), result: Some(result) }
            }
        };

        let multiplier = entry.record.apply_pick(&caller, pick)?;
        let opened_count = entry.record.opened_count();
        entry.log.push(caller, GameEventData::TilePicked { index, opened_count, multiplier });

        debug!("Game {}: tile {} opened ({} open, {})", game_id, index, opened_count, multiplier);
        Ok(multiplier)
    }

    async fn finish(&self, caller: Address, game_id: GameId, target: GameState) -> Result<(), GameError> {
        let entry = self.entry(game_id).await?;
        let mut entry = entry.lock().await;

        entry.record.finish(&caller, target)?;
        let multiplier = entry.record.multiplier;
        entry.log.push(caller, GameEventData::Finished { state: target, multiplier });

        info!("Game {} {} at {}", game_id, target, multiplier);
        Ok(())
    }

    /// Take the payout.
    pub async fn cash_out(&self, caller: Address, game_id: GameId) -> Result<(), GameError> {
        self.finish(caller, game_id, GameState::CashedOut).await
    }

    /// End without a declared outcome.
    pub async fn end_game(&self, caller: Address, game_id: GameId) -> Result<(), GameError> {
        self.finish(caller, game_id, GameState::Ended).await
    }

    /// Declare a bomb hit.
    pub async fn end_as_boom(&self, caller: Address, game_id: GameId) -> Result<(), GameError> {
        self.finish(caller, game_id, GameState::Boom).await
    }

    /// Reveal the seed. Fails with [`GameError::CommitMismatch`] if it does
    /// not reproduce the commitment.
    pub async fn reveal_seed(&self, caller: Address, game_id: GameId, seed: U256) -> Result<(), GameError> {
        let entry = self.entry(game_id).await?;
        let mut entry = entry.lock().await;

        if let Err(e) = entry.record.reveal_seed(&caller, seed) {
            if e == GameError::CommitMismatch {
                warn!("Game {}: seed reveal by {:#} did not match commitment", game_id, caller);
            }
            return Err(e);
        }
        entry.log.push(caller, GameEventData::SeedRevealed { seed });

        info!("Game {}: seed revealed", game_id);
        Ok(())
    }

    /// Publish the plaintext board, optionally revealing the seed in the
    /// same call. Nothing is stored unless both parts succeed.
    pub async fn reveal_game(
        &self,
        caller: Address,
        game_id: GameId,
        board: Board,
        seed: Option<U256>,
    ) -> Result<(), GameError> {
        let entry = self.entry(game_id).await?;
        let mut entry = entry.lock().await;

        entry.record.check_board(&caller, &board)?;
        if let Some(seed) = &seed {
            entry.record.check_seed(&caller, seed)?;
        }

        let bomb_count = board.bomb_count() as u32;
        entry.record.reveal_board(&caller, board)?;
        entry.log.push(caller, GameEventData::BoardRevealed { bomb_count });
        if let Some(seed) = seed {
            entry.record.reveal_seed(&caller, seed)?;
            entry.log.push(caller, GameEventData::SeedRevealed { seed });
        }

        info!("Game {}: board revealed", game_id);
        Ok(())
    }

    /// Grant `verifier` decrypt rights over the game's ciphertexts.
    pub async fn allow_verifier(&self, caller: Address, game_id: GameId, verifier: Address) -> Result<(), GameError> {
        let entry = self.entry(game_id).await?;
        let mut entry = entry.lock().await;

        if caller != entry.record.player {
            return Err(GameError::Unauthorized { game_id, caller });
        }
        self.store.allow(entry.record.audit_handles(), verifier).await?;
        if entry.record.allow_verifier(&caller, verifier)? {
            entry.log.push(caller, GameEventData::VerifierAllowed { verifier });
            info!("Game {}: verifier {:#} allowed", game_id, verifier);
        }
        Ok(())
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Full record.
    pub async fn game(&self, game_id: GameId) -> Result<GameRecord, GameError> {
        let entry = self.entry(game_id).await?;
        let entry = entry.lock().await;
        Ok(entry.record.clone())
    }

    /// Tiles opened.
    pub async fn get_opened_count(&self, game_id: GameId) -> Result<u8, GameError> {
        Ok(self.game(game_id).await?.opened_count())
    }

    /// Lifecycle state.
    pub async fn get_state(&self, game_id: GameId) -> Result<GameState, GameError> {
        Ok(self.game(game_id).await?.state)
    }

    /// Current multiplier.
    pub async fn get_multiplier(&self, game_id: GameId) -> Result<Milli, GameError> {
        Ok(self.game(game_id).await?.multiplier)
    }

    /// Whether the seed has been revealed.
    pub async fn is_seed_revealed(&self, game_id: GameId) -> Result<bool, GameError> {
        Ok(self.game(game_id).await?.is_seed_revealed())
    }

    /// Event log, oldest first.
    pub async fn events(&self, game_id: GameId) -> Result<Vec<GameEvent>, GameError> {
        let entry = self.entry(game_id).await?;
        let entry = entry.lock().await;
        Ok(entry.log.events().to_vec())
    }

    /// Number of games.
    pub async fn game_count(&self) -> usize {
        self.games.read().await.len()
    }

    // =========================================================================
    // PERSISTENCE
    // =========================================================================

    /// Serialize every game and its event log.
    pub async fn snapshot(&self) -> Result<Vec<u8>, SnapshotError> {
        let entries: Vec<Arc<Mutex<GameEntry>>> = self.games.read().await.values().cloned().collect();

        let mut games = Vec::with_capacity(entries.len());
        for entry in entries {
            let entry = entry.lock().await;
            games.push((entry.record.clone(), entry.log.clone()));
        }

        let snapshot = LedgerSnapshot {
            version: SNAPSHOT_VERSION,
            next_id: self.next_id.load(Ordering::SeqCst),
            games,
        };
        Ok(bincode::serialize(&snapshot)?)
    }

    /// Rebuild a ledger from [`GameLedger::snapshot`] output.
    pub fn restore(
        store: Arc<EncryptedBoardStore>,
        config: LedgerConfig,
        bytes: &[u8],
    ) -> Result<Self, SnapshotError> {
        let snapshot: LedgerSnapshot = bincode::deserialize(bytes)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::Version(snapshot.version));
        }

        let mut ledger = Self::new(store, config);
        ledger.next_id.store(snapshot.next_id, Ordering::SeqCst);

        let games = snapshot
            .games
            .into_iter()
            .map(|(record, log)| (record.id, Arc::new(Mutex::new(GameEntry { record, log }))))
            .collect();
        ledger.games = RwLock::new(games);

        info!("Restored ledger with next id {}", snapshot.next_id);
        Ok(ledger)
    }
}
