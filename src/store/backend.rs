//! Encryption Capability Boundary
//!
//! The ledger never sees plaintext tiles. It holds opaque ciphertext handles
//! issued by an encryption capability that can (a) seal values, (b) prove the
//! sealed input is well-formed, (c) keep an access-control list per handle and
//! (d) decrypt for a requester holding a valid signed authorization. The
//! requester is whoever the authorization's signature recovers to.
//!
//! [`EncryptionBackend`] is that boundary. Calls are blocking and may be slow;
//! [`crate::store::EncryptedBoardStore`] runs them on a bounded worker pool.
//! [`LocalBackend`] is an in-process implementation used by the server binary
//! in development and by tests. It keeps plaintexts in memory.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use alloy_primitives::{Address, Keccak256, B256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::debug;

use crate::store::authorization::{validate_authorization, DecryptAuthorization};
use crate::store::StoreError;

const HANDLE_DOMAIN: &[u8] = b"MINES_CIPHERTEXT_HANDLE_V1";
const PROOF_DOMAIN: &[u8] = b"MINES_INPUT_PROOF_V1";

// =============================================================================
// HANDLES AND PROOFS
// =============================================================================

/// Opaque 32-byte reference to an encrypted value.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct CiphertextHandle(pub [u8; 32]);

impl CiphertextHandle {
    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// `0x`-prefixed lowercase hex.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for CiphertextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}…)", &self.to_hex()[..10])
    }
}

impl fmt::Display for CiphertextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<B256> for CiphertextHandle {
    fn from(digest: B256) -> Self {
        Self(digest.0)
    }
}

impl FromStr for CiphertextHandle {
    type Err = alloy_primitives::hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        B256::from_str(s).map(Self::from)
    }
}

impl Serialize for CiphertextHandle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for CiphertextHandle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(serde::de::Error::custom)
        } else {
            <[u8; 32]>::deserialize(deserializer).map(CiphertextHandle)
        }
    }
}

/// Well-formedness proof accompanying an encrypted input.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct InputProof(pub Vec<u8>);

impl InputProof {
    /// `0x`-prefixed lowercase hex.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.0))
    }
}

impl fmt::Debug for InputProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InputProof({} bytes)", self.0.len())
    }
}

impl Serialize for InputProof {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for InputProof {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            let body = s.strip_prefix("0x").unwrap_or(&s);
            hex::decode(body).map(InputProof).map_err(serde::de::Error::custom)
        } else {
            Vec::<u8>::deserialize(deserializer).map(InputProof)
        }
    }
}

/// Contract and user an encrypted input is bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionContext {
    /// Ledger contract the input is addressed to.
    pub contract: Address,
    /// User submitting the input.
    pub user: Address,
}

/// Result of encrypting a batch of values: one handle per value, one proof
/// for the batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedInput {
    /// One handle per input value, in order.
    pub handles: Vec<CiphertextHandle>,
    /// Proof covering every handle in the batch.
    pub proof: InputProof,
}

// =============================================================================
// BACKEND TRAIT
// =============================================================================

/// An external encryption capability.
///
/// All methods are blocking.
pub trait EncryptionBackend: Send + Sync + 'static {
    /// Encrypt `values` for `ctx`, returning handles plus a validity proof.
    fn encrypt(&self, values: &[u64], ctx: &EncryptionContext) -> Result<EncryptedInput, StoreError>;

    /// Check that `proof` covers exactly `handles` for `ctx`.
    ///
    /// On success the handles become usable by `ctx.contract`.
    fn verify_input(
        &self,
        handles: &[CiphertextHandle],
        proof: &InputProof,
        ctx: &EncryptionContext,
    ) -> Result<(), StoreError>;

    /// Grant `grantee` decrypt rights over `handle`.
    fn allow(&self, handle: &CiphertextHandle, grantee: &Address) -> Result<(), StoreError>;

    /// Whether `who` may decrypt `handle`.
    fn is_allowed(&self, handle: &CiphertextHandle, who: &Address) -> bool;

    /// Encrypted equality of one board tile against an encrypted guess.
    ///
    /// `board` is either one packed handle or one handle per tile. The
    /// result handle encrypts 1 when the tile equals the guess, else 0, and
    /// is readable by `ctx.contract` and `ctx.user`.
    fn compare_tile(
        &self,
        board: &[CiphertextHandle],
        index: u8,
        guess: &CiphertextHandle,
        ctx: &EncryptionContext,
    ) -> Result<CiphertextHandle, StoreError>;

    /// Decrypt `handles` for the signer of `authorization`.
    fn user_decrypt(
        &self,
        handles: &[CiphertextHandle],
        authorization: &DecryptAuthorization,
    ) -> Result<Vec<u64>, StoreError>;
}

// =============================================================================
// LOCAL BACKEND
// =============================================================================

/// A sealed value held by [`LocalBackend`].
#[derive(Debug, Clone)]
struct Sealed {
    value: u64,
    contract: Address,
    verified: bool,
    acl: BTreeSet<Address>,
}

/// In-process encryption capability.
///
/// Handles and proofs are Keccak digests keyed by a per-instance secret, so
/// proofs cannot be forged by callers and handles reveal nothing about the
/// sealed value.
pub struct LocalBackend {
    secret: [u8; 16],
    counter: AtomicU64,
    sealed: RwLock<BTreeMap<CiphertextHandle, Sealed>>,
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBackend {
    /// Create a backend with a fresh random secret.
    pub fn new() -> Self {
        Self::with_secret(*uuid::Uuid::new_v4().as_bytes())
    }

    /// Create a backend with a fixed secret (reproducible handles in tests).
    pub fn with_secret(secret: [u8; 16]) -> Self {
        Self {
            secret,
            counter: AtomicU64::new(0),
            sealed: RwLock::new(BTreeMap::new()),
        }
    }

    fn next_handle(&self, ctx: &EncryptionContext) -> CiphertextHandle {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let mut hasher = Keccak256::new();
        hasher.update(HANDLE_DOMAIN);
        hasher.update(self.secret);
        hasher.update(n.to_be_bytes());
        hasher.update(ctx.contract);
        hasher.update(ctx.user);
        hasher.finalize().into()
    }

    fn proof_for(&self, handles: &[CiphertextHandle], ctx: &EncryptionContext) -> InputProof {
        let mut hasher = Keccak256::new();
        hasher.update(PROOF_DOMAIN);
        hasher.update(self.secret);
        hasher.update(ctx.contract);
        hasher.update(ctx.user);
        for handle in handles {
            hasher.update(handle.as_bytes());
        }
        InputProof(hasher.finalize().0.to_vec())
    }

    fn poisoned() -> StoreError {
        StoreError::BackendUnavailable("local backend lock poisoned".to_string())
    }

    fn plaintext(&self, handle: &CiphertextHandle) -> Result<u64, StoreError> {
        let sealed = self.sealed.read().map_err(|_| Self::poisoned())?;
        sealed
            .get(handle)
            .map(|s| s.value)
            .ok_or(StoreError::UnknownHandle(*handle))
    }
}

impl EncryptionBackend for LocalBackend {
    fn encrypt(&self, values: &[u64], ctx: &EncryptionContext) -> Result<EncryptedInput, StoreError> {
        if values.is_empty() {
            return Err(StoreError::InvalidInput("nothing to encrypt".to_string()));
        }

        let handles: Vec<CiphertextHandle> = values.iter().map(|_| self.next_handle(ctx)).collect();
        let proof = self.proof_for(&handles, ctx);

        let mut sealed = self.sealed.write().map_err(|_| Self::poisoned())?;
        for (handle, value) in handles.iter().zip(values) {
            sealed.insert(*handle, Sealed {
                value: *value,
                contract: ctx.contract,
                verified: false,
                acl: BTreeSet::new(),
            });
        }

        debug!("Sealed {} value(s) for {:#}", handles.len(), ctx.user);
        Ok(EncryptedInput { handles, proof })
    }

    fn verify_input(
        &self,
        handles: &[CiphertextHandle],
        proof: &InputProof,
        ctx: &EncryptionContext,
    ) -> Result<(), StoreError> {
        if handles.is_empty() || self.proof_for(handles, ctx) != *proof {
            return Err(StoreError::InvalidProof);
        }

        let mut sealed = self.sealed.write().map_err(|_| Self::poisoned())?;
        for handle in handles {
            let entry = sealed.get_mut(handle).ok_or(StoreError::UnknownHandle(*handle))?;
            if entry.contract != ctx.contract {
                return Err(StoreError::InvalidProof);
            }
            entry.verified = true;
            entry.acl.insert(ctx.contract);
        }
        Ok(())
    }

    fn allow(&self, handle: &CiphertextHandle, grantee: &Address) -> Result<(), StoreError> {
        let mut sealed = self.sealed.write().map_err(|_| Self::poisoned())?;
        let entry = sealed.get_mut(handle).ok_or(StoreError::UnknownHandle(*handle))?;
        if !entry.verified {
            return Err(StoreError::InvalidProof);
        }
        entry.acl.insert(*grantee);
        Ok(())
    }

    fn is_allowed(&self, handle: &CiphertextHandle, who: &Address) -> bool {
        self.sealed
            .read()
            .map(|s| s.get(handle).map(|e| e.acl.contains(who)).unwrap_or(false))
            .unwrap_or(false)
    }

    fn compare_tile(
        &self,
        board: &[CiphertextHandle],
        index: u8,
        guess: &CiphertextHandle,
        ctx: &EncryptionContext,
    ) -> Result<CiphertextHandle, StoreError> {
        let tile = match board {
            [] => return Err(StoreError::InvalidInput("empty board".to_string())),
            [packed] => {
                if index >= 64 {
                    return Err(StoreError::InvalidInput(format!("tile {} outside packed board", index)));
                }
                (self.plaintext(packed)? >> index) & 1
            }
            tiles => {
                let handle = tiles.get(index as usize).ok_or_else(|| {
                    StoreError::InvalidInput(format!("tile {} outside board of {}", index, tiles.len()))
                })?;
                self.plaintext(handle)?
            }
        };
        let guess_value = self.plaintext(guess)?;

        let result = self.next_handle(ctx);
        let mut sealed = self.sealed.write().map_err(|_| Self::poisoned())?;
        sealed.insert(result, Sealed {
            value: u64::from(tile == guess_value),
            contract: ctx.contract,
            verified: true,
            acl: [ctx.contract, ctx.user].into_iter().collect(),
        });
        Ok(result)
    }

    fn user_decrypt(
        &self,
        handles: &[CiphertextHandle],
        authorization: &DecryptAuthorization,
    ) -> Result<Vec<u64>, StoreError> {
        let now = chrono::Utc::now().timestamp();
        let signer = validate_authorization(authorization, now)?;

        let sealed = self.sealed.read().map_err(|_| Self::poisoned())?;
        handles
            .iter()
            .map(|handle| {
                let entry = sealed.get(handle).ok_or(StoreError::UnknownHandle(*handle))?;
                if !authorization.request.contract_addresses.contains(&entry.contract) {
                    return Err(StoreError::AuthorizationInvalid(format!(
                        "authorization does not cover contract {}",
                        entry.contract
                    )));
                }
                if !entry.acl.contains(&signer) {
                    return Err(StoreError::AuthorizationInvalid(format!(
                        "{} has no decrypt rights over {}",
                        signer, handle
                    )));
                }
                Ok(entry.value)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::authorization::{DecryptRequest, SigningIdentity};

    fn ctx() -> EncryptionContext {
        EncryptionContext {
            contract: Address::new([0xcc; 20]),
            user: identity().address(),
        }
    }

    fn identity() -> SigningIdentity {
        SigningIdentity::from_key(&B256::repeat_byte(0xaa)).unwrap()
    }

    fn request(now: i64) -> DecryptRequest {
        DecryptRequest::new(vec![ctx().contract], now, 10)
    }

    #[test]
    fn test_encrypt_and_verify_input() {
        let backend = LocalBackend::with_secret([1; 16]);
        let input = backend.encrypt(&[4], &ctx()).unwrap();
        assert_eq!(input.handles.len(), 1);
        assert!(backend.verify_input(&input.handles, &input.proof, &ctx()).is_ok());
        assert!(backend.is_allowed(&input.handles[0], &ctx().contract));
    }

    #[test]
    fn test_forged_proof_rejected() {
        let backend = LocalBackend::with_secret([1; 16]);
        let input = backend.encrypt(&[4], &ctx()).unwrap();
        let forged = InputProof(vec![0; 32]);
        assert!(matches!(
            backend.verify_input(&input.handles, &forged, &ctx()),
            Err(StoreError::InvalidProof)
        ));

        // Proof is bound to the user
        let other = EncryptionContext { user: Address::new([0xbb; 20]), ..ctx() };
        assert!(matches!(
            backend.verify_input(&input.handles, &input.proof, &other),
            Err(StoreError::InvalidProof)
        ));
    }

    #[test]
    fn test_handles_are_unique() {
        let backend = LocalBackend::with_secret([1; 16]);
        let input = backend.encrypt(&[1, 1, 1], &ctx()).unwrap();
        let unique: BTreeSet<_> = input.handles.iter().collect();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn test_allow_requires_verified_input() {
        let backend = LocalBackend::with_secret([1; 16]);
        let input = backend.encrypt(&[4], &ctx()).unwrap();
        assert!(matches!(
            backend.allow(&input.handles[0], &ctx().user),
            Err(StoreError::InvalidProof)
        ));
    }

    #[test]
    fn test_user_decrypt_respects_acl() {
        let backend = LocalBackend::with_secret([1; 16]);
        let identity = identity();

        let input = backend.encrypt(&[0b100], &ctx()).unwrap();
        backend.verify_input(&input.handles, &input.proof, &ctx()).unwrap();

        let now = chrono::Utc::now().timestamp();
        let auth = identity.sign(request(now)).unwrap();

        // Not yet granted
        assert!(matches!(
            backend.user_decrypt(&input.handles, &auth),
            Err(StoreError::AuthorizationInvalid(_))
        ));

        backend.allow(&input.handles[0], &identity.address()).unwrap();
        assert_eq!(backend.user_decrypt(&input.handles, &auth).unwrap(), vec![0b100]);
    }

    #[test]
    fn test_user_decrypt_rejects_claimed_signer() {
        let backend = LocalBackend::with_secret([1; 16]);
        let input = backend.encrypt(&[1], &ctx()).unwrap();
        backend.verify_input(&input.handles, &input.proof, &ctx()).unwrap();
        let grantee = Address::new([0xbb; 20]);
        backend.allow(&input.handles[0], &grantee).unwrap();

        // Signed by one key, claiming to be the grantee
        let mut auth = identity().sign(request(chrono::Utc::now().timestamp())).unwrap();
        auth.signer = grantee;
        assert!(matches!(
            backend.user_decrypt(&input.handles, &auth),
            Err(StoreError::AuthorizationInvalid(_))
        ));
    }

    #[test]
    fn test_compare_tile_packed_and_per_tile() {
        let backend = LocalBackend::with_secret([1; 16]);
        let identity = identity();
        let auth = identity.sign(request(chrono::Utc::now().timestamp())).unwrap();

        let packed = backend.encrypt(&[0b00100], &ctx()).unwrap();
        let guess = backend.encrypt(&[0], &ctx()).unwrap();

        let safe = backend.compare_tile(&packed.handles, 0, &guess.handles[0], &ctx()).unwrap();
        let bomb = backend.compare_tile(&packed.handles, 2, &guess.handles[0], &ctx()).unwrap();
        assert_eq!(backend.user_decrypt(&[safe, bomb], &auth).unwrap(), vec![1, 0]);

        let tiles = backend.encrypt(&[0, 1, 0], &ctx()).unwrap();
        let r = backend.compare_tile(&tiles.handles, 1, &guess.handles[0], &ctx()).unwrap();
        assert_eq!(backend.user_decrypt(&[r], &auth).unwrap(), vec![0]);

        assert!(backend.compare_tile(&tiles.handles, 3, &guess.handles[0], &ctx()).is_err());
    }

    #[test]
    fn test_handle_json_is_hex() {
        let handle = CiphertextHandle([0x11; 32]);
        let json = serde_json::to_string(&handle).unwrap();
        assert_eq!(json, format!("\"0x{}\"", "11".repeat(32)));
        let back: CiphertextHandle = serde_json::from_str(&json).unwrap();
        assert_eq!(back, handle);
    }
}
