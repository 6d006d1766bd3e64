//! Seed Commitment Protocol
//!
//! The player commits to `(seed, player, boardSize)` before play and reveals
//! the seed afterwards. The commitment is the Keccak-256 of the standard ABI
//! encoding, 96 bytes:
//!
//! ```text
//! [ seed: uint256 ][ 12 zero bytes | player: address ][ boardSize: uint8 padded ]
//! ```
//!
//! Optionally the ledger also records a digest over the ciphertext handles
//! (`keccak256(h0 || h1 || ...)`), binding the commitment to the exact
//! ciphertexts submitted at creation.

use alloy_primitives::{keccak256, Address, Keccak256, B256};
use alloy_sol_types::{sol_data, SolType};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::rng::DeterministicRng;
use crate::core::uint::{self, U256};
use crate::game::board::{Board, BoardError, Difficulty, RowBoard};
use crate::store::CiphertextHandle;

/// Errors that can occur during commitment verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommitmentError {
    /// Recomputed commitment differs from the recorded one.
    #[error("commit mismatch: recorded {expected}, computed {computed}")]
    CommitMismatch {
        /// Recorded on the ledger.
        expected: B256,
        /// Recomputed from the disclosure.
        computed: B256,
    },

    /// Handles differ from those committed at creation.
    #[error("ciphertext commit mismatch: recorded {expected}, computed {computed}")]
    CiphertextMismatch {
        /// Recorded on the ledger.
        expected: B256,
        /// Recomputed from the current handles.
        computed: B256,
    },

    /// Board size in the proof does not match the board.
    #[error("proof says {declared} tiles, board has {actual}")]
    SizeMismatch {
        /// Declared size.
        declared: u8,
        /// Actual board length.
        actual: usize,
    },
}

/// ABI encoding of the commitment preimage.
pub fn encode_preimage(seed: &U256, player: &Address, board_size: u8) -> Vec<u8> {
    <(sol_data::Uint<256>, sol_data::Address, sol_data::Uint<8>)>::abi_encode(&(
        *seed, *player, board_size,
    ))
}

/// `keccak256(abi.encode(seed, player, boardSize))`.
pub fn commit(seed: &U256, player: &Address, board_size: u8) -> B256 {
    keccak256(encode_preimage(seed, player, board_size))
}

/// `keccak256` over the concatenated handle bytes.
pub fn ciphertext_commit(handles: &[CiphertextHandle]) -> B256 {
    let mut hasher = Keccak256::new();
    for handle in handles {
        hasher.update(handle.as_bytes());
    }
    hasher.finalize()
}

/// Check a seed disclosure against a recorded commitment.
pub fn verify_commitment(
    seed: &U256,
    player: &Address,
    board_size: u8,
    expected: &B256,
) -> Result<(), CommitmentError> {
    let computed = commit(seed, player, board_size);
    if computed != *expected {
        return Err(CommitmentError::CommitMismatch { expected: *expected, computed });
    }
    Ok(())
}

/// Check handles against a recorded ciphertext commitment.
pub fn verify_ciphertext_commit(handles: &[CiphertextHandle], expected: &B256) -> Result<(), CommitmentError> {
    let computed = ciphertext_commit(handles);
    if computed != *expected {
        return Err(CommitmentError::CiphertextMismatch { expected: *expected, computed });
    }
    Ok(())
}

/// Client-held disclosure for one game.
///
/// Kept secret during play. Handing it to a verifier after the game lets
/// them check the commitment and compare the claimed board with the
/// decrypted one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameProof {
    /// Committed seed.
    #[serde(with = "uint::decimal")]
    pub seed: U256,
    /// Player address.
    pub player: Address,
    /// Number of tiles.
    pub board_size: u8,
    /// Plaintext board the player encrypted.
    pub board: Board,
}

impl GameProof {
    /// Wrap an existing board.
    pub fn new(seed: U256, player: Address, board: Board) -> Self {
        Self { seed, player, board_size: board.size(), board }
    }

    /// Generate a row board from the seed, so the board itself is
    /// reproducible from the disclosure.
    pub fn generate(seed: U256, player: Address, rows: usize, difficulty: Difficulty) -> Result<Self, BoardError> {
        let mut rng = DeterministicRng::from_game_params(&seed, &player, rows.min(u8::MAX as usize) as u8);
        let board = RowBoard::generate(&mut rng, rows, difficulty).flatten()?;
        Ok(Self::new(seed, player, board))
    }

    /// Commitment to publish at creation.
    pub fn commitment(&self) -> B256 {
        commit(&self.seed, &self.player, self.board_size)
    }

    /// Check internal consistency and the recorded commitment.
    pub fn verify(&self, expected: &B256) -> Result<(), CommitmentError> {
        if self.board.len() != self.board_size as usize {
            return Err(CommitmentError::SizeMismatch { declared: self.board_size, actual: self.board.len() });
        }
        verify_commitment(&self.seed, &self.player, self.board_size, expected)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn player() -> Address {
        "0x70997970C51812dc3A010C7d01b50e0d17dc79C8".parse().unwrap()
    }

    #[test]
    fn test_preimage_layout() {
        let enc = encode_preimage(&U256::from(123456u64), &player(), 5);
        assert_eq!(enc.len(), 96);
        assert_eq!(&enc[29..32], &[0x01, 0xe2, 0x40]);
        assert!(enc[32..44].iter().all(|b| *b == 0));
        assert_eq!(&enc[44..64], player().as_slice());
        assert_eq!(enc[95], 5);
    }

    #[test]
    fn test_commit_vector() {
        let digest = commit(&U256::from(123456u64), &player(), 5);
        assert_eq!(
            digest.to_string(),
            "0x34c2dba75e711b4f0772a8de6ed9576cb24054deb02f0bbfa3b541fa49e1f5a3"
        );
    }

    #[test]
    fn test_wrong_seed_mismatch() {
        let recorded = commit(&U256::from(123456u64), &player(), 5);
        let err = verify_commitment(&U256::from(999u64), &player(), 5, &recorded).unwrap_err();
        match err {
            CommitmentError::CommitMismatch { expected, computed } => {
                assert_eq!(expected, recorded);
                assert_eq!(
                    computed.to_string(),
                    "0x25c3f4da264e520ecd419bf78e2218d56a6d29ea8377085234c291f0ff12eee7"
                );
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(verify_commitment(&U256::from(123456u64), &player(), 5, &recorded).is_ok());
    }

    #[test]
    fn test_commit_binds_player_and_size() {
        let seed = U256::from(1u64);
        let base = commit(&seed, &player(), 5);
        assert_ne!(base, commit(&seed, &Address::repeat_byte(1), 5));
        assert_ne!(base, commit(&seed, &player(), 6));
    }

    #[test]
    fn test_ciphertext_commit_vectors() {
        let one = [CiphertextHandle([0x11; 32])];
        assert_eq!(
            ciphertext_commit(&one).to_string(),
            "0xb569321de72d0af89c2fb48a484de3fc9343f31600ae1f3e13d633cb48cbf816"
        );

        let two = [CiphertextHandle([0x11; 32]), CiphertextHandle([0x22; 32])];
        let digest = ciphertext_commit(&two);
        assert_eq!(
            digest.to_string(),
            "0x3e92e0db88d6afea9edc4eedf62fffa4d92bcdfc310dccbe943747fe8302e871"
        );
        assert!(verify_ciphertext_commit(&two, &digest).is_ok());

        let swapped = [two[1], two[0]];
        assert!(matches!(
            verify_ciphertext_commit(&swapped, &digest),
            Err(CommitmentError::CiphertextMismatch { .. })
        ));
    }

    #[test]
    fn test_game_proof() {
        let board = Board::from_bits(&[0, 0, 1, 0, 0]).unwrap();
        let proof = GameProof::new(U256::from(123456u64), player(), board);
        assert_eq!(proof.board_size, 5);
        assert!(proof.verify(&proof.commitment()).is_ok());

        let mut bad = proof.clone();
        bad.board_size = 4;
        assert!(matches!(bad.verify(&proof.commitment()), Err(CommitmentError::SizeMismatch { .. })));
    }

    #[test]
    fn test_generated_proof_is_reproducible() {
        let a = GameProof::generate(U256::from(77u64), player(), 5, Difficulty::Medium).unwrap();
        let b = GameProof::generate(U256::from(77u64), player(), 5, Difficulty::Medium).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.board.bomb_count(), 5);
    }

    #[test]
    fn test_proof_json() {
        let board = Board::from_bits(&[0, 1]).unwrap();
        let proof = GameProof::new(U256::from(5u64), player(), board);
        let json = serde_json::to_value(&proof).unwrap();
        assert_eq!(json["seed"], "5");
        assert_eq!(json["boardSize"], 2);
        assert_eq!(json["board"], serde_json::json!([0, 1]));
        let back: GameProof = serde_json::from_value(json).unwrap();
        assert_eq!(back, proof);
    }
}
