//! Encrypted Board Store
//!
//! Boundary to the external encryption capability. Nothing above this layer
//! ever holds a plaintext board except the player who generated it and a
//! verifier holding a valid decrypt authorization.
//!
//! ## Module Structure
//!
//! - `backend`: capability trait, handles, proofs, in-process backend
//! - `authorization`: signed, time-bounded decrypt requests
//! - `board_store`: async worker-pool front, layouts, configuration

pub mod authorization;
pub mod backend;
pub mod board_store;

use thiserror::Error;

use crate::game::board::BoardError;

pub use authorization::{
    decrypt_domain, validate_authorization, AuthorizationError, DecryptAuthorization, DecryptRequest,
    SigningIdentity,
};
pub use backend::{
    CiphertextHandle, EncryptedInput, EncryptionBackend, EncryptionContext, InputProof,
    LocalBackend,
};
pub use board_store::{BoardLayout, EncryptedBoard, EncryptedBoardStore, StoreConfig};

/// Store errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Malformed request to the store.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Input proof does not cover the submitted handles.
    #[error("input proof rejected")]
    InvalidProof,
    /// Handle was never issued by this backend.
    #[error("unknown ciphertext handle {0}")]
    UnknownHandle(CiphertextHandle),
    /// Signature or ACL check failed.
    #[error("authorization invalid: {0}")]
    AuthorizationInvalid(String),
    /// Authorization window has closed (or not opened).
    #[error("authorization outside validity window: {0}")]
    AuthorizationExpired(String),
    /// Decryption backend unreachable or timed out.
    #[error("decryption unavailable: {0}")]
    DecryptUnavailable(String),
    /// Encryption or ACL backend unreachable or timed out.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    /// Board too large for the layout.
    #[error("{board_size} tiles do not fit the {layout:?} layout")]
    LayoutOverflow {
        /// Layout requested.
        layout: BoardLayout,
        /// Offending size.
        board_size: usize,
    },
    /// Board encoding failure.
    #[error("board error: {0}")]
    Board(#[from] BoardError),
}

impl StoreError {
    /// Whether retrying the same call may succeed.
    ///
    /// An expired authorization is retryable with a freshly signed request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DecryptUnavailable(_) | Self::BackendUnavailable(_) | Self::AuthorizationExpired(_)
        )
    }
}

impl From<AuthorizationError> for StoreError {
    fn from(err: AuthorizationError) -> Self {
        if err.is_window_error() {
            StoreError::AuthorizationExpired(err.to_string())
        } else {
            StoreError::AuthorizationInvalid(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorization_error_mapping() {
        let expired: StoreError = AuthorizationError::Expired { end: 10 }.into();
        assert!(matches!(expired, StoreError::AuthorizationExpired(_)));
        assert!(expired.is_retryable());

        let invalid: StoreError = AuthorizationError::InvalidSignature.into();
        assert!(matches!(invalid, StoreError::AuthorizationInvalid(_)));
        let invalid: StoreError = AuthorizationError::InvalidFormat.into();
        assert!(matches!(invalid, StoreError::AuthorizationInvalid(_)));
        assert!(!invalid.is_retryable());
    }

    #[test]
    fn test_retryable_taxonomy() {
        assert!(StoreError::DecryptUnavailable("down".into()).is_retryable());
        assert!(!StoreError::InvalidProof.is_retryable());
        assert!(!StoreError::UnknownHandle(CiphertextHandle::default()).is_retryable());
    }
}
