//! Decrypt Authorization
//!
//! A requester proves it may read a ciphertext by signing a typed
//! [`DecryptRequest`] with its account key. The request binds the contract(s)
//! whose handles may be read and a validity window
//! `[start, start + duration_days)`. The signature is ECDSA over the EIP-712
//! signing hash, so the backend recovers the signer from the signature itself
//! and a signature made for one request cannot be replayed against another.

use alloy_primitives::{Address, Bytes, Signature, B256, U256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{eip712_domain, sol, Eip712Domain, SolStruct};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Seconds per day of authorization validity.
pub const SECONDS_PER_DAY: i64 = 86_400;

/// Longest validity window a request may ask for.
pub const MAX_DURATION_DAYS: u32 = 365;

sol! {
    /// EIP-712 struct the requester signs.
    struct UserDecryptRequest {
        bytes publicKey;
        address[] contractAddresses;
        uint256 startTimestamp;
        uint256 durationDays;
    }
}

/// Signing domain for decrypt requests.
pub fn decrypt_domain() -> Eip712Domain {
    eip712_domain! {
        name: "MinesDecrypt",
        version: "1",
    }
}

/// Authorization errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthorizationError {
    /// Signature bytes are not a 65-byte ECDSA signature.
    #[error("invalid signature format")]
    InvalidFormat,
    /// No address can be recovered from the signature.
    #[error("invalid signature")]
    InvalidSignature,
    /// Signature was made by someone other than the claimed signer, or over
    /// a different request.
    #[error("signature recovers {recovered}, not claimed signer {claimed}")]
    SignerMismatch {
        /// Address the authorization claims.
        claimed: Address,
        /// Address recovered from the signature.
        recovered: Address,
    },
    /// Request fields are out of range.
    #[error("malformed request: {0}")]
    MalformedRequest(String),
    /// Current time precedes the window.
    #[error("authorization not valid until {start}")]
    NotYetValid {
        /// Window start (Unix seconds).
        start: i64,
    },
    /// Current time is past the window.
    #[error("authorization expired at {end}")]
    Expired {
        /// Window end (Unix seconds).
        end: i64,
    },
    /// Key material unusable.
    #[error("key error: {0}")]
    Key(String),
}

impl AuthorizationError {
    /// Whether the requester can recover by signing a fresh request.
    pub fn is_window_error(&self) -> bool {
        matches!(self, Self::NotYetValid { .. } | Self::Expired { .. })
    }
}

// =============================================================================
// REQUEST
// =============================================================================

/// The typed message a requester signs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptRequest {
    /// Requester's ephemeral public key.
    pub public_key: Bytes,
    /// Contracts whose handles may be decrypted.
    pub contract_addresses: Vec<Address>,
    /// Window start (Unix seconds).
    pub start_timestamp: i64,
    /// Window length in days.
    pub duration_days: u32,
}

impl DecryptRequest {
    /// Build a request with a fresh ephemeral public key.
    pub fn new(contract_addresses: Vec<Address>, start_timestamp: i64, duration_days: u32) -> Self {
        Self {
            public_key: Bytes::copy_from_slice(uuid::Uuid::new_v4().as_bytes()),
            contract_addresses,
            start_timestamp,
            duration_days,
        }
    }

    /// Window end (exclusive, Unix seconds).
    pub fn window_end(&self) -> i64 {
        self.start_timestamp
            .saturating_add(i64::from(self.duration_days).saturating_mul(SECONDS_PER_DAY))
    }

    /// Check `now` against the validity window.
    pub fn check_window(&self, now: i64) -> Result<(), AuthorizationError> {
        if now < self.start_timestamp {
            return Err(AuthorizationError::NotYetValid { start: self.start_timestamp });
        }
        let end = self.window_end();
        if now >= end {
            return Err(AuthorizationError::Expired { end });
        }
        Ok(())
    }

    fn check_fields(&self) -> Result<(), AuthorizationError> {
        if self.contract_addresses.is_empty() {
            return Err(AuthorizationError::MalformedRequest("no contract addresses".into()));
        }
        if self.start_timestamp < 0 {
            return Err(AuthorizationError::MalformedRequest("negative start timestamp".into()));
        }
        if self.duration_days == 0 || self.duration_days > MAX_DURATION_DAYS {
            return Err(AuthorizationError::MalformedRequest(format!(
                "duration must be 1..={} days, got {}",
                MAX_DURATION_DAYS, self.duration_days
            )));
        }
        Ok(())
    }

    /// The request as its EIP-712 struct.
    pub fn to_typed(&self) -> UserDecryptRequest {
        UserDecryptRequest {
            publicKey: self.public_key.clone(),
            contractAddresses: self.contract_addresses.clone(),
            startTimestamp: U256::from(self.start_timestamp.max(0) as u64),
            durationDays: U256::from(self.duration_days),
        }
    }

    /// EIP-712 signing hash: `keccak(0x1901 || domainSeparator || structHash)`.
    pub fn digest(&self) -> B256 {
        self.to_typed().eip712_signing_hash(&decrypt_domain())
    }
}

// =============================================================================
// SIGNING
// =============================================================================

/// A request plus the signer's signature over it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptAuthorization {
    /// The signed request.
    pub request: DecryptRequest,
    /// Claimed signer.
    pub signer: Address,
    /// 65-byte `r || s || v` signature over [`DecryptRequest::digest`].
    pub signature: Bytes,
}

/// An account key that signs decrypt requests.
#[derive(Debug, Clone)]
pub struct SigningIdentity {
    signer: PrivateKeySigner,
}

impl SigningIdentity {
    /// Identity with a fresh random key.
    pub fn random() -> Self {
        Self { signer: PrivateKeySigner::random() }
    }

    /// Identity from a 32-byte secret key.
    pub fn from_key(secret: &B256) -> Result<Self, AuthorizationError> {
        PrivateKeySigner::from_bytes(secret)
            .map(|signer| Self { signer })
            .map_err(|e| AuthorizationError::Key(e.to_string()))
    }

    /// Account address derived from the key.
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Sign `request`.
    pub fn sign(&self, request: DecryptRequest) -> Result<DecryptAuthorization, AuthorizationError> {
        request.check_fields()?;

        let signature = self
            .signer
            .sign_hash_sync(&request.digest())
            .map_err(|e| AuthorizationError::Key(e.to_string()))?;

        Ok(DecryptAuthorization {
            request,
            signer: self.address(),
            signature: Bytes::copy_from_slice(&signature.as_bytes()),
        })
    }
}

/// Recover the signer of `authorization` and check the window at `now`.
///
/// Returns the authenticated signer.
pub fn validate_authorization(authorization: &DecryptAuthorization, now: i64) -> Result<Address, AuthorizationError> {
    let request = &authorization.request;
    request.check_fields()?;

    let signature =
        Signature::from_raw(&authorization.signature).map_err(|_| AuthorizationError::InvalidFormat)?;
    let recovered = signature
        .recover_address_from_prehash(&request.digest())
        .map_err(|_| AuthorizationError::InvalidSignature)?;

    if recovered != authorization.signer {
        return Err(AuthorizationError::SignerMismatch { claimed: authorization.signer, recovered });
    }

    // Window last, so only a genuine signature can report expiry
    request.check_window(now)?;
    Ok(recovered)
}
