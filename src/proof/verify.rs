//! Verification API
//!
//! Independent fairness audit of a finished game:
//!
//! 1. Fetch the record (ciphertexts, contract, player, size, commitments, state).
//! 2. Sign a fresh decrypt authorization for the record's contract.
//! 3. Decrypt the board (and pick results, if any), retrying transient failures.
//! 4. Recompute the seed commitment from the disclosed seed.
//! 5. Recompute the ciphertext commitment, if one was recorded.
//! 6. Compare the decrypted board with the player's claimed board.
//! 7. Audit the declared outcome and the multiplier against the real board.
//!
//! Failures are reported, never swallowed: a report is [`Verdict::Verified`]
//! only when every check ran and passed.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use alloy_primitives::{Address, U256};

use crate::core::fixed::Milli;
use crate::game::board::Board;
use crate::game::ledger::GameLedger;
use crate::game::payout::multiplier;
use crate::game::state::{GameError, GameId, GameState};
use crate::network::protocol::VerifyPayload;
use crate::proof::commitment::{verify_ciphertext_commit, verify_commitment, GameProof};
use crate::store::authorization::MAX_DURATION_DAYS;
use crate::store::{
    BoardLayout, CiphertextHandle, DecryptRequest, EncryptedBoardStore, SigningIdentity, StoreError,
};

/// Default decrypt attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default authorization validity.
pub const DEFAULT_DURATION_DAYS: u32 = 10;

// =============================================================================
// RECORD SOURCE
// =============================================================================

/// Where the verifier reads game records from.
pub trait RecordSource: Send + Sync {
    /// Fetch the record for `game_id`. `Ok(None)` when no such game exists.
    fn fetch(&self, game_id: GameId) -> impl Future<Output = Result<Option<VerifyPayload>, VerifyError>> + Send;
}

impl RecordSource for GameLedger {
    async fn fetch(&self, game_id: GameId) -> Result<Option<VerifyPayload>, VerifyError> {
        match self.game(game_id).await {
            Ok(record) => Ok(Some(VerifyPayload::from_record(&record, self.contract()))),
            Err(GameError::GameNotFound(_)) => Ok(None),
            Err(e) => Err(VerifyError::UpstreamRead(e.to_string())),
        }
    }
}

impl<S: RecordSource> RecordSource for Arc<S> {
    fn fetch(&self, game_id: GameId) -> impl Future<Output = Result<Option<VerifyPayload>, VerifyError>> + Send {
        self.as_ref().fetch(game_id)
    }
}

// =============================================================================
// ERRORS AND REPORT
// =============================================================================

/// Reasons a verification could not reach a verdict.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum VerifyError {
    /// Game does not exist or has no ciphertext.
    #[error("no ciphertext for game {0}")]
    NoCiphertext(GameId),
    /// Record source failed.
    #[error("failed to read game record: {0}")]
    UpstreamRead(String),
    /// No seed disclosed and none revealed on the ledger.
    #[error("seed not disclosed")]
    SeedNotDisclosed,
    /// Authorization rejected (signature or ACL).
    #[error("decrypt authorization rejected: {0}")]
    AuthorizationRejected(String),
    /// Authorization window closed before decryption.
    #[error("decrypt authorization expired: {0}")]
    AuthorizationExpired(String),
    /// Decryption kept failing.
    #[error("decryption unavailable after {attempts} attempt(s): {reason}")]
    DecryptUnavailable {
        /// Attempts made.
        attempts: u32,
        /// Last failure.
        reason: String,
    },
    /// Any other store failure.
    #[error("decryption failed: {0}")]
    Decrypt(String),
    /// Bad verifier configuration.
    #[error("invalid verifier configuration: {0}")]
    Config(String),
}

impl VerifyError {
    /// Whether the user can retry later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::UpstreamRead(_) | Self::AuthorizationExpired(_) | Self::DecryptUnavailable { .. }
        )
    }
}

/// Outcome of a verification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Every check passed.
    Verified,
    /// At least one check failed.
    Mismatch,
    /// Verification could not complete; see the error.
    Inconclusive,
}

/// Individual checks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Check {
    /// Disclosure names the recorded player and size.
    Metadata,
    /// Seed reproduces the commit hash.
    Commitment,
    /// Handles reproduce the ciphertext commit.
    CiphertextCommit,
    /// Plaintext decodes to a valid board.
    BoardDecode,
    /// Claimed board equals the decrypted board.
    ClaimedBoard,
    /// Declared state is consistent with the opened tiles.
    OutcomeConsistency,
    /// Ledger multiplier follows the payout rule.
    Multiplier,
    /// Encrypted pick comparisons agree with the board.
    PickResults,
}

/// Result of one check.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Which check.
    pub check: Check,
    /// Did it pass?
    pub passed: bool,
    /// Explanation.
    pub detail: String,
}

impl CheckResult {
    fn pass(check: Check, detail: impl Into<String>) -> Self {
        Self { check, passed: true, detail: detail.into() }
    }

    fn fail(check: Check, detail: impl Into<String>) -> Self {
        Self { check, passed: false, detail: detail.into() }
    }
}

/// Verification result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Game checked.
    pub game_id: GameId,
    /// Overall verdict.
    pub verdict: Verdict,
    /// Checks in the order they ran.
    pub checks: Vec<CheckResult>,
    /// Decrypted board, if decryption succeeded.
    pub board: Option<Board>,
    /// Multiplier recomputed from the safe tiles actually opened.
    pub audited_multiplier: Option<Milli>,
    /// Decrypt attempts made.
    pub attempts: u32,
    /// Why the verdict is inconclusive.
    pub error: Option<VerifyError>,
}

impl VerificationReport {
    fn new(game_id: GameId) -> Self {
        Self {
            game_id,
            verdict: Verdict::Inconclusive,
            checks: Vec::new(),
            board: None,
            audited_multiplier: None,
            attempts: 0,
            error: None,
        }
    }

    fn inconclusive(mut self, error: VerifyError) -> Self {
        self.verdict = Verdict::Inconclusive;
        self.error = Some(error);
        self
    }

    fn conclude(mut self) -> Self {
        self.verdict = if self.checks.iter().all(|c| c.passed) { Verdict::Verified } else { Verdict::Mismatch };
        self
    }

    /// Did verification pass?
    pub fn valid(&self) -> bool {
        self.verdict == Verdict::Verified
    }

    /// Failed checks.
    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|c| !c.passed)
    }

    /// Result of `check`, if it ran.
    pub fn check(&self, check: Check) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.check == check)
    }
}

// =============================================================================
// CONFIG
// =============================================================================

/// Verifier configuration.
#[derive(Clone, Debug)]
pub struct VerifierConfig {
    /// Decrypt attempts before giving up.
    pub max_attempts: u32,
    /// First retry delay; doubles each attempt.
    pub initial_backoff: Duration,
    /// Retry delay ceiling.
    pub max_backoff: Duration,
    /// Authorization validity window.
    pub duration_days: u32,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
            duration_days: DEFAULT_DURATION_DAYS,
        }
    }
}

impl VerifierConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, VerifyError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Create config from a variable lookup. Malformed values, zero attempts
    /// and windows longer than [`MAX_DURATION_DAYS`] are errors. A zero
    /// backoff is allowed.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, VerifyError> {
        let mut config = Self::default();
        if let Some(n) = var("MINES_VERIFY_ATTEMPTS") {
            config.max_attempts = n
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| VerifyError::Config(format!("MINES_VERIFY_ATTEMPTS: {}", n)))?;
        }
        if let Some(ms) = var("MINES_VERIFY_BACKOFF_MS") {
            let ms = ms
                .parse::<u64>()
                .map_err(|_| VerifyError::Config(format!("MINES_VERIFY_BACKOFF_MS: {}", ms)))?;
            config.initial_backoff = Duration::from_millis(ms);
            config.max_backoff = config.max_backoff.max(config.initial_backoff);
        }
        if let Some(days) = var("MINES_AUTH_DURATION_DAYS") {
            config.duration_days = days
                .parse::<u32>()
                .ok()
                .filter(|d| (1..=MAX_DURATION_DAYS).contains(d))
                .ok_or_else(|| VerifyError::Config(format!("MINES_AUTH_DURATION_DAYS: {}", days)))?;
        }
        Ok(config)
    }
}

// =============================================================================
// VERIFIER
// =============================================================================

/// Fairness verifier.
pub struct Verifier<S> {
    source: S,
    store: Arc<EncryptedBoardStore>,
    identity: SigningIdentity,
    config: VerifierConfig,
}

impl<S: RecordSource> Verifier<S> {
    /// Create a verifier reading from `source` and decrypting as `identity`.
    pub fn new(source: S, store: Arc<EncryptedBoardStore>, identity: SigningIdentity, config: VerifierConfig) -> Self {
        Self { source, store, identity, config }
    }

    /// Address the verifier decrypts as.
    pub fn address(&self) -> Address {
        self.identity.address()
    }

    /// Verify `game_id`.
    ///
    /// `disclosure` is the player's proof object. Without one, the seed and
    /// claimed board revealed on the ledger are used.
    #[instrument(skip(self, disclosure))]
    pub async fn verify(&self, game_id: GameId, disclosure: Option<&GameProof>) -> VerificationReport {
        let mut report = VerificationReport::new(game_id);

        let record = match self.source.fetch(game_id).await {
            Ok(Some(record)) if !record.ciphertexts.is_empty() => record,
            Ok(_) => return report.inconclusive(VerifyError::NoCiphertext(game_id)),
            Err(e) => return report.inconclusive(e),
        };

        let seed: U256 = match disclosure.map(|d| d.seed).or(record.revealed_seed) {
            Some(seed) => seed,
            None => return report.inconclusive(VerifyError::SeedNotDisclosed),
        };

        if let Some(d) = disclosure {
            report.checks.push(if d.player == record.player && d.board_size == record.board_size {
                CheckResult::pass(Check::Metadata, "player and board size match")
            } else {
                CheckResult::fail(
                    Check::Metadata,
                    format!(
                        "disclosure names {} / {} tiles, record has {} / {} tiles",
                        d.player, d.board_size, record.player, record.board_size
                    ),
                )
            });
        }

        report.checks.push(match verify_commitment(&seed, &record.player, record.board_size, &record.commit_hash) {
            Ok(()) => CheckResult::pass(Check::Commitment, "seed reproduces commit hash"),
            Err(e) => CheckResult::fail(Check::Commitment, e.to_string()),
        });

        report.checks.push(match &record.ciphertext_commit {
            Some(expected) => match verify_ciphertext_commit(&record.ciphertexts, expected) {
                Ok(()) => CheckResult::pass(Check::CiphertextCommit, "handles reproduce ciphertext commit"),
                Err(e) => CheckResult::fail(Check::CiphertextCommit, e.to_string()),
            },
            None => CheckResult::pass(Check::CiphertextCommit, "not recorded"),
        });

        let handles = decrypt_handles(&record);
        let plaintexts = match self.decrypt_with_retry(&record, handles, &mut report.attempts).await {
            Ok(p) => p,
            Err(e) => {
                warn!("Game {}: verification inconclusive: {}", game_id, e);
                return report.inconclusive(e);
            }
        };
        let (board_plain, pick_plain) = plaintexts.split_at(record.ciphertexts.len());

        let board = match decode_board(record.layout, record.board_size, board_plain) {
            Ok(board) => {
                report.checks.push(CheckResult::pass(Check::BoardDecode, format!("{} bombs", board.bomb_count())));
                board
            }
            Err(detail) => {
                report.checks.push(CheckResult::fail(Check::BoardDecode, detail));
                return report.conclude();
            }
        };

        match disclosure.map(|d| &d.board).or(record.revealed_board.as_ref()) {
            Some(claimed) if *claimed == board => {
                report.checks.push(CheckResult::pass(Check::ClaimedBoard, "claimed board matches ciphertext"))
            }
            Some(claimed) => report.checks.push(CheckResult::fail(
                Check::ClaimedBoard,
                format!("claimed {:?}, decrypted {:?}", claimed.to_bits(), board.to_bits()),
            )),
            None => report.checks.push(CheckResult::pass(Check::ClaimedBoard, "no board claimed")),
        }

        let audit = audit_outcome(&record, &board);
        report.checks.extend(audit.checks);
        report.audited_multiplier = Some(audit.audited_multiplier);

        if !record.picks.is_empty() && !pick_plain.is_empty() {
            report.checks.push(audit_pick_results(&record, &board, pick_plain));
        }

        report.board = Some(board);
        let report = report.conclude();
        info!("Game {} verification: {:?}", game_id, report.verdict);
        report
    }

    async fn decrypt_with_retry(
        &self,
        record: &VerifyPayload,
        handles: Vec<CiphertextHandle>,
        attempts: &mut u32,
    ) -> Result<Vec<u64>, VerifyError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut backoff = self.config.initial_backoff;

        loop {
            *attempts += 1;
            let request = DecryptRequest::new(
                vec![record.contract_address],
                chrono::Utc::now().timestamp(),
                self.config.duration_days,
            );
            let authorization = self
                .identity
                .sign(request)
                .map_err(|e| VerifyError::AuthorizationRejected(e.to_string()))?;

            let err = match self.store.authorize_decrypt(handles.clone(), authorization).await {
                Ok(plain) if plain.len() == handles.len() => return Ok(plain),
                Ok(plain) => {
                    return Err(VerifyError::Decrypt(format!(
                        "expected {} plaintexts, got {}",
                        handles.len(),
                        plain.len()
                    )))
                }
                Err(e) => e,
            };

            match err {
                StoreError::DecryptUnavailable(reason) | StoreError::BackendUnavailable(reason) => {
                    if *attempts >= max_attempts {
                        return Err(VerifyError::DecryptUnavailable { attempts: *attempts, reason });
                    }
                    debug!("Decrypt attempt {} failed ({}), retrying in {:?}", attempts, reason, backoff);
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.config.max_backoff);
                }
                StoreError::AuthorizationExpired(m) => return Err(VerifyError::AuthorizationExpired(m)),
                StoreError::AuthorizationInvalid(m) => return Err(VerifyError::AuthorizationRejected(m)),
                other => return Err(VerifyError::Decrypt(other.to_string())),
            }
        }
    }
}

/// Board handles followed by each pick's guess and result handle.
fn decrypt_handles(record: &VerifyPayload) -> Vec<CiphertextHandle> {
    let mut handles = record.ciphertexts.clone();
    for pick in &record.picks {
        if let (Some(guess), Some(result)) = (pick.guess, pick.result) {
            handles.push(guess);
            handles.push(result);
        }
    }
    handles
}

/// Rebuild the board from decrypted values.
fn decode_board(layout: BoardLayout, board_size: u8, plain: &[u64]) -> Result<Board, String> {
    match layout {
        BoardLayout::Packed => {
            let packed = plain.first().ok_or("no packed value")?;
            Board::unpack(*packed, board_size as usize).map_err(|e| e.to_string())
        }
        BoardLayout::PerTile => {
            if plain.len() != board_size as usize {
                return Err(format!("{} tile values for {} tiles", plain.len(), board_size));
            }
            let bits = plain
                .iter()
                .enumerate()
                .map(|(i, v)| u8::try_from(*v).ok().filter(|b| *b <= 1).ok_or_else(|| format!("tile {} decrypted to {}", i, v)))
                .collect::<Result<Vec<u8>, String>>()?;
            Board::from_bits(&bits).map_err(|e| e.to_string())
        }
    }
}

struct OutcomeAudit {
    checks: Vec<CheckResult>,
    audited_multiplier: Milli,
}

/// Check the declared state and multiplier against the real board.
fn audit_outcome(record: &VerifyPayload, board: &Board) -> OutcomeAudit {
    let opened: Vec<u8> = record.opened_bitmap.iter().collect();
    let out_of_range: Vec<u8> = opened.iter().copied().filter(|i| *i >= record.board_size).collect();
    let bombs_opened = opened.iter().filter(|i| board.is_bomb(**i as usize)).count();
    let safe_opened = opened.len() - out_of_range.len() - bombs_opened;
    let audited_multiplier = multiplier(safe_opened as u32);

    let consistency = if !out_of_range.is_empty() {
        CheckResult::fail(Check::OutcomeConsistency, format!("opened tiles {:?} are off the board", out_of_range))
    } else if opened.len() != record.opened_count as usize {
        CheckResult::fail(
            Check::OutcomeConsistency,
            format!("bitmap has {} tiles, opened count is {}", opened.len(), record.opened_count),
        )
    } else {
        match record.state {
            GameState::Boom if bombs_opened == 0 => {
                CheckResult::fail(Check::OutcomeConsistency, "boom declared but no opened tile is a bomb")
            }
            GameState::CashedOut if bombs_opened > 0 => CheckResult::fail(
                Check::OutcomeConsistency,
                format!("cashed out after opening {} bomb(s)", bombs_opened),
            ),
            state => CheckResult::pass(
                Check::OutcomeConsistency,
                format!("{} with {} safe and {} bomb tile(s) opened", state, safe_opened, bombs_opened),
            ),
        }
    };

    // The ledger advances once per pick, bombs included
    let expected = multiplier(record.opened_count as u32);
    let multiplier_check = if record.multiplier == expected {
        CheckResult::pass(Check::Multiplier, format!("{} after {} pick(s)", expected, record.opened_count))
    } else {
        CheckResult::fail(
            Check::Multiplier,
            format!("ledger has {}, payout rule gives {}", record.multiplier, expected),
        )
    };

    OutcomeAudit { checks: vec![consistency, multiplier_check], audited_multiplier }
}

/// Check each encrypted comparison against the decrypted board.
fn audit_pick_results(record: &VerifyPayload, board: &Board, plain: &[u64]) -> CheckResult {
    let compared = record.picks.iter().filter(|p| p.guess.is_some() && p.result.is_some());
    for (pick, pair) in compared.zip(plain.chunks(2)) {
        let [guess, result] = pair else {
            return CheckResult::fail(Check::PickResults, "missing pick plaintexts");
        };
        let tile = u64::from(board.is_bomb(pick.index as usize));
        let expected = u64::from(tile == *guess);
        if *result != expected {
            return CheckResult::fail(
                Check::PickResults,
                format!("pick on tile {} recorded {}, board gives {}", pick.index, result, expected),
            );
        }
    }
    CheckResult::pass(Check::PickResults, format!("{} comparison(s) consistent", record.picks.len()))
}
