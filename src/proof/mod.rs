//! Fairness Proofs
//!
//! Provides verifiable game outcomes through:
//! - Seed commitments bound to player and board size
//! - Ciphertext commitments bound to the submitted handles
//! - Independent verification by authorized decryption
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    PROOF SYSTEM                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  commitment.rs   - Commit codec and player disclosure       │
//! │  verify.rs       - Fetch, decrypt, recompute, audit         │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod commitment;
pub mod verify;

// Re-export key types
pub use commitment::{
    ciphertext_commit, commit, encode_preimage, verify_ciphertext_commit, verify_commitment,
    CommitmentError, GameProof,
};
pub use verify::{
    Check, CheckResult, RecordSource, Verdict, VerificationReport, Verifier, VerifierConfig,
    VerifyError,
};
