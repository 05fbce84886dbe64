//! Credential vault.
//!
//! A user's identity credential is serialized, sealed with
//! ChaCha20-Poly1305 under the vault key, and put into the content store.
//! The user registry keeps one pointer (content id) per user.
//!
//! Sealed layout: `nonce (12 bytes) || ciphertext+tag`. The user id is bound
//! as associated data, so a bundle cannot be re-pointed at another user.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};
use zkgps_core::{Clock, GeoCoordinate};

use crate::error::{VerificationError, VerificationResult};
use crate::store::{Store, UserRecord};

const NONCE_LEN: usize = 12;

/// 256-bit vault key, wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct VaultKey([u8; 32]);

impl VaultKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse a 64-character hex key.
    pub fn from_hex(hex_key: &str) -> VerificationResult<Self> {
        let decoded = Zeroizing::new(hex::decode(hex_key.trim()).map_err(|e| {
            VerificationError::Credential(format!("vault key is not hex: {}", e))
        })?);
        let bytes: [u8; 32] = decoded.as_slice().try_into().map_err(|_| {
            VerificationError::Credential(format!(
                "vault key must be 32 bytes, got {}",
                decoded.len()
            ))
        })?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("VaultKey(<redacted>)")
    }
}

/// Identity attributes held in a credential.
///
/// Only `dob` and `location` ever reach a circuit.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialSubject {
    pub wallet_address: String,
    pub national_id: String,
    pub name: String,
    /// `YYYY-MM-DD`
    pub dob: String,
    #[serde(default)]
    pub blood_group: Option<String>,
    #[serde(default)]
    pub location: Option<GeoCoordinate>,
}

impl fmt::Debug for CredentialSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSubject")
            .field("wallet_address", &self.wallet_address)
            .finish_non_exhaustive()
    }
}

impl Drop for CredentialSubject {
    fn drop(&mut self) {
        self.national_id.zeroize();
        self.name.zeroize();
        self.dob.zeroize();
        if let Some(group) = self.blood_group.as_mut() {
            group.zeroize();
        }
        if let Some(location) = self.location.as_mut() {
            location.latitude.zeroize();
            location.longitude.zeroize();
        }
    }
}

/// Seals credentials into the content store and opens them again.
pub struct CredentialVault {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    key: VaultKey,
}

impl CredentialVault {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, key: VaultKey) -> Self {
        Self { store, clock, key }
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.key.0))
    }

    /// Seal `subject` and point `user_id` at it, replacing any previous credential.
    pub fn enroll(
        &self,
        user_id: &str,
        subject: &CredentialSubject,
    ) -> VerificationResult<UserRecord> {
        if user_id.trim().is_empty() {
            return Err(VerificationError::InvalidArgument(
                "user id is required".to_string(),
            ));
        }

        let plaintext = Zeroizing::new(serde_json::to_vec(subject).map_err(|e| {
            VerificationError::Credential(format!("cannot serialize credential: {}", e))
        })?);

        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher()
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext.as_slice(),
                    aad: user_id.as_bytes(),
                },
            )
            .map_err(|_| VerificationError::Credential("encryption failed".to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        let content_id = self.store.put_content(&sealed)?;

        let now = self.clock.now_ms();
        let record = UserRecord {
            user_id: user_id.to_string(),
            content_id,
            name: subject.name.clone(),
            created_at: now,
            updated_at: now,
        };
        self.store.upsert_user(&record)?;

        info!(user_id, content_id = %record.content_id, "Credential enrolled");
        self.store
            .get_user(user_id)?
            .ok_or_else(|| VerificationError::NotFound(format!("user {}", user_id)))
    }

    /// Open the credential `user_id` points at.
    pub fn open(&self, user_id: &str) -> VerificationResult<CredentialSubject> {
        let record = self
            .store
            .get_user(user_id)?
            .ok_or_else(|| VerificationError::NotFound(format!("user {}", user_id)))?;
        let sealed = self.store.get_content(&record.content_id)?;
        if sealed.len() <= NONCE_LEN {
            return Err(VerificationError::Credential(format!(
                "sealed credential {} is truncated",
                record.content_id
            )));
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let plaintext = Zeroizing::new(
            self.cipher()
                .decrypt(
                    Nonce::from_slice(nonce),
                    Payload {
                        msg: ciphertext,
                        aad: user_id.as_bytes(),
                    },
                )
                .map_err(|_| {
                    VerificationError::Credential(format!(
                        "credential {} failed authentication",
                        record.content_id
                    ))
                })?,
        );

        debug!(user_id, "Credential opened");
        serde_json::from_slice(&plaintext)
            .map_err(|e| VerificationError::Credential(format!("malformed credential: {}", e)))
    }
}
