//! Encrypted Board Store
//!
//! Async front over an [`EncryptionBackend`]. Backend calls are blocking and
//! slow, so each one runs on the blocking pool, gated by a semaphore sized by
//! [`StoreConfig::workers`] and bounded by [`StoreConfig::call_timeout`].

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use alloy_primitives::{address, Address};

use crate::game::board::{Board, MAX_BOARD_SIZE, MAX_PACKED_SIZE};
use crate::store::authorization::DecryptAuthorization;
use crate::store::backend::{
    CiphertextHandle, EncryptedInput, EncryptionBackend, EncryptionContext, InputProof,
};
use crate::store::StoreError;

/// Default number of concurrent backend calls.
pub const DEFAULT_WORKERS: usize = 4;

/// Default per-call timeout.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default ledger contract address.
pub const DEFAULT_CONTRACT: Address = address!("5fbdb2315678afecb367f032d93f642f64180aa3");

/// How a board is laid out in ciphertext.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BoardLayout {
    /// One 64-bit value, tile `i` at bit `i`.
    #[default]
    Packed,
    /// One value (0 or 1) per tile.
    PerTile,
}

impl BoardLayout {
    /// Largest board this layout can carry.
    pub fn max_board_size(self) -> usize {
        match self {
            Self::Packed => MAX_PACKED_SIZE,
            Self::PerTile => MAX_BOARD_SIZE,
        }
    }

    /// Number of handles a board of `board_size` tiles needs.
    pub fn handle_count(self, board_size: u8) -> usize {
        match self {
            Self::Packed => 1,
            Self::PerTile => board_size as usize,
        }
    }

    /// Config name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Packed => "packed",
            Self::PerTile => "per-tile",
        }
    }
}

impl FromStr for BoardLayout {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "packed" => Ok(Self::Packed),
            "per-tile" | "per_tile" | "pertile" => Ok(Self::PerTile),
            other => Err(StoreError::InvalidInput(format!("unknown board layout: {}", other))),
        }
    }
}

/// A board sealed by the store, ready to hand to the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBoard {
    /// Layout the handles follow.
    pub layout: BoardLayout,
    /// Ciphertext handles (one when packed).
    pub handles: Vec<CiphertextHandle>,
    /// Proof covering all handles.
    pub proof: InputProof,
}

impl EncryptedBoard {
    /// Check the handle count against the layout and board size.
    pub fn check_shape(&self, board_size: u8) -> Result<(), StoreError> {
        if board_size == 0 || board_size as usize > self.layout.max_board_size() {
            return Err(StoreError::LayoutOverflow {
                layout: self.layout,
                board_size: board_size as usize,
            });
        }
        let expected = self.layout.handle_count(board_size);
        if self.handles.len() != expected {
            return Err(StoreError::InvalidInput(format!(
                "{} layout needs {} handle(s) for {} tiles, got {}",
                self.layout.as_str(),
                expected,
                board_size,
                self.handles.len()
            )));
        }
        Ok(())
    }
}

/// Store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Board layout for new games.
    pub layout: BoardLayout,
    /// Ledger contract inputs are bound to.
    pub contract: Address,
    /// Concurrent backend calls.
    pub workers: usize,
    /// Per-call timeout.
    pub call_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            layout: BoardLayout::Packed,
            contract: DEFAULT_CONTRACT,
            workers: DEFAULT_WORKERS,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl StoreConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, StoreError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Create config from a variable lookup. Malformed or zero values are
    /// errors, not silently replaced by defaults.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, StoreError> {
        let mut config = Self::default();
        if let Some(layout) = var("MINES_LAYOUT") {
            config.layout = layout.parse()?;
        }
        if let Some(contract) = var("MINES_CONTRACT") {
            config.contract = contract
                .parse()
                .map_err(|e| StoreError::InvalidInput(format!("MINES_CONTRACT: {}", e)))?;
        }
        if let Some(workers) = var("MINES_STORE_WORKERS") {
            config.workers = workers
                .parse::<usize>()
                .ok()
                .filter(|w| *w > 0)
                .ok_or_else(|| StoreError::InvalidInput(format!("MINES_STORE_WORKERS: {}", workers)))?;
        }
        if let Some(ms) = var("MINES_STORE_TIMEOUT_MS") {
            let ms = ms
                .parse::<u64>()
                .ok()
                .filter(|ms| *ms > 0)
                .ok_or_else(|| StoreError::InvalidInput(format!("MINES_STORE_TIMEOUT_MS: {}", ms)))?;
            config.call_timeout = Duration::from_millis(ms);
        }
        Ok(config)
    }
}

#[derive(Clone, Copy, Debug)]
enum CallKind {
    Encrypt,
    Verify,
    Decrypt,
}

/// Async encrypted board store.
pub struct EncryptedBoardStore {
    backend: Arc<dyn EncryptionBackend>,
    config: StoreConfig,
    permits: Arc<Semaphore>,
}

impl EncryptedBoardStore {
    /// Wrap `backend`.
    pub fn new(backend: Arc<dyn EncryptionBackend>, config: StoreConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.workers.max(1)));
        Self { backend, config, permits }
    }

    /// Layout for new games.
    pub fn layout(&self) -> BoardLayout {
        self.config.layout
    }

    /// Contract inputs are bound to.
    pub fn contract(&self) -> Address {
        self.config.contract
    }

    /// Store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Workers not currently running a backend call.
    pub fn idle_workers(&self) -> usize {
        self.permits.available_permits()
    }

    fn context(&self, user: Address) -> EncryptionContext {
        EncryptionContext { contract: self.config.contract, user }
    }

    async fn run<T, F>(&self, kind: CallKind, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn EncryptionBackend) -> Result<T, StoreError> + Send + 'static,
    {
        let unavailable = |reason: String| match kind {
            CallKind::Decrypt => StoreError::DecryptUnavailable(reason),
            CallKind::Encrypt | CallKind::Verify => StoreError::BackendUnavailable(reason),
        };

        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| unavailable("worker pool closed".to_string()))?;

        // Held by the worker until the backend returns, even past a timeout
        let backend = Arc::clone(&self.backend);
        let task = tokio::task::spawn_blocking(move || {
            let result = f(backend.as_ref());
            drop(permit);
            result
        });

        match tokio::time::timeout(self.config.call_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => {
                warn!("{:?} call panicked: {}", kind, join);
                Err(unavailable(format!("worker failed: {}", join)))
            }
            Err(_) => {
                warn!("{:?} call timed out after {:?}", kind, self.config.call_timeout);
                Err(unavailable(format!("timed out after {:?}", self.config.call_timeout)))
            }
        }
    }

    /// Encrypt `values` for `user`.
    pub async fn encrypt_input(&self, values: Vec<u64>, user: Address) -> Result<EncryptedInput, StoreError> {
        let ctx = self.context(user);
        self.run(CallKind::Encrypt, move |b| b.encrypt(&values, &ctx)).await
    }

    /// Seal `board` for `player` in the configured layout.
    pub async fn encrypt_board(&self, board: &Board, player: Address) -> Result<EncryptedBoard, StoreError> {
        let layout = self.config.layout;
        if board.len() > layout.max_board_size() {
            return Err(StoreError::LayoutOverflow { layout, board_size: board.len() });
        }

        let values: Vec<u64> = match layout {
            BoardLayout::Packed => vec![board.pack()?],
            BoardLayout::PerTile => board.to_bits().into_iter().map(u64::from).collect(),
        };

        let input = self.encrypt_input(values, player).await?;
        debug!(
            "Encrypted {}-tile board for {:#} as {} handle(s)",
            board.len(),
            player,
            input.handles.len()
        );

        Ok(EncryptedBoard { layout, handles: input.handles, proof: input.proof })
    }

    /// Validate the proof on an encrypted input submitted by `user`.
    pub async fn verify_input(
        &self,
        handles: Vec<CiphertextHandle>,
        proof: InputProof,
        user: Address,
    ) -> Result<(), StoreError> {
        let ctx = self.context(user);
        self.run(CallKind::Verify, move |b| b.verify_input(&handles, &proof, &ctx)).await
    }

    /// Grant `grantee` decrypt rights over every handle in `handles`.
    pub async fn allow(&self, handles: Vec<CiphertextHandle>, grantee: Address) -> Result<(), StoreError> {
        self.run(CallKind::Verify, move |b| {
            handles.iter().try_for_each(|h| b.allow(h, &grantee))
        })
        .await
    }

    /// Encrypted equality of tile `index` against `guess`.
    pub async fn compare_tile(
        &self,
        board: Vec<CiphertextHandle>,
        index: u8,
        guess: CiphertextHandle,
        user: Address,
    ) -> Result<CiphertextHandle, StoreError> {
        let ctx = self.context(user);
        self.run(CallKind::Encrypt, move |b| b.compare_tile(&board, index, &guess, &ctx))
            .await
    }

    /// Decrypt `handles` for the signer of `authorization`.
    pub async fn authorize_decrypt(
        &self,
        handles: Vec<CiphertextHandle>,
        authorization: DecryptAuthorization,
    ) -> Result<Vec<u64>, StoreError> {
        if handles.is_empty() {
            return Ok(Vec::new());
        }
        self.run(CallKind::Decrypt, move |b| b.user_decrypt(&handles, &authorization))
            .await
    }
}
