//! Authenticated encryption of credential records
//!
//! Envelope layout: 12-byte nonce, ciphertext, and a 16-byte auth tag,
//! carried as separate base64 fields in the persisted form. The nonce is
//! drawn fresh from a CSPRNG on every seal; reuse under one key would
//! void the AEAD guarantees.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use chacha20poly1305::ChaCha20Poly1305;
use chrono::{DateTime, Utc};
use rand::RngCore;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;
use zeroize::Zeroize;

use super::MasterKey;
use crate::clock::{Clock, SystemClock};
use crate::config::VaultConfig;
use crate::credential::{CredentialRecord, EncryptedEnvelope};
use crate::error::{Result, VaultError};
use crate::keystore::KeyStore;

/// Nonce length in bytes (96 bits, shared by both supported AEADs)
pub const NONCE_LEN: usize = 12;

/// Authentication tag length in bytes (128 bits)
pub const TAG_LEN: usize = 16;

/// Supported AEAD algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherAlgorithm {
    /// AES-256-GCM
    Aes256Gcm,
    /// ChaCha20-Poly1305 (IETF variant)
    ChaCha20Poly1305,
}

impl Default for CipherAlgorithm {
    fn default() -> Self {
        Self::Aes256Gcm
    }
}

impl CipherAlgorithm {
    /// Canonical name, as accepted in configuration
    pub fn name(&self) -> &'static str {
        match self {
            CipherAlgorithm::Aes256Gcm => "aes-256-gcm",
            CipherAlgorithm::ChaCha20Poly1305 => "chacha20-poly1305",
        }
    }

    /// Encrypt `plaintext` under `key`, stamping the given key version and
    /// creation time into the envelope
    pub fn seal(
        &self,
        key: &MasterKey,
        key_version: u32,
        created_at: DateTime<Utc>,
        plaintext: &[u8],
    ) -> Result<EncryptedEnvelope> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        // Both ciphers append the auth tag to the ciphertext
        let ciphertext_with_tag = match self {
            CipherAlgorithm::Aes256Gcm => {
                let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
                    .map_err(|e| VaultError::Encryption(e.to_string()))?;
                let nonce = Nonce::from_slice(&nonce_bytes);
                cipher
                    .encrypt(nonce, plaintext)
                    .map_err(|e| VaultError::Encryption(e.to_string()))?
            }
            CipherAlgorithm::ChaCha20Poly1305 => {
                let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes())
                    .map_err(|e| VaultError::Encryption(e.to_string()))?;
                let nonce = chacha20poly1305::Nonce::from_slice(&nonce_bytes);
                cipher
                    .encrypt(nonce, plaintext)
                    .map_err(|e| VaultError::Encryption(e.to_string()))?
            }
        };

        // Split ciphertext and auth tag (last 16 bytes)
        if ciphertext_with_tag.len() < TAG_LEN {
            return Err(VaultError::Encryption("Ciphertext too short".to_string()));
        }

        let tag_start = ciphertext_with_tag.len() - TAG_LEN;
        let ciphertext = ciphertext_with_tag[..tag_start].to_vec();
        let mut auth_tag = [0u8; TAG_LEN];
        auth_tag.copy_from_slice(&ciphertext_with_tag[tag_start..]);

        Ok(EncryptedEnvelope {
            nonce: nonce_bytes,
            ciphertext,
            auth_tag,
            key_version,
            created_at,
        })
    }

    /// Decrypt an envelope under `key`, verifying the auth tag
    pub fn open(&self, key: &MasterKey, envelope: &EncryptedEnvelope) -> Result<Vec<u8>> {
        // Reconstruct ciphertext with the tag appended, as the ciphers expect
        let mut ciphertext_with_tag = envelope.ciphertext.clone();
        ciphertext_with_tag.extend_from_slice(&envelope.auth_tag);

        let plaintext = match self {
            CipherAlgorithm::Aes256Gcm => {
                let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
                    .map_err(|e| VaultError::Encryption(e.to_string()))?;
                let nonce = Nonce::from_slice(&envelope.nonce);
                cipher.decrypt(nonce, ciphertext_with_tag.as_slice())
            }
            CipherAlgorithm::ChaCha20Poly1305 => {
                let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes())
                    .map_err(|e| VaultError::Encryption(e.to_string()))?;
                let nonce = chacha20poly1305::Nonce::from_slice(&envelope.nonce);
                cipher.decrypt(nonce, ciphertext_with_tag.as_slice())
            }
        };

        plaintext.map_err(|e| {
            debug!("Envelope failed authentication: {}", e);
            VaultError::Decryption
        })
    }
}

impl FromStr for CipherAlgorithm {
    type Err = VaultError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "aes-256-gcm" => Ok(CipherAlgorithm::Aes256Gcm),
            "chacha20-poly1305" => Ok(CipherAlgorithm::ChaCha20Poly1305),
            _ => Err(VaultError::UnsupportedAlgorithm(raw.to_string())),
        }
    }
}

/// Encrypts and decrypts credential records with keys from the key store
///
/// Both directions obtain the active key first, so a stale master key is
/// rotated at the point of use - decryption included.
pub struct CipherEngine {
    algorithm: CipherAlgorithm,
    keys: KeyStore,
    clock: Arc<dyn Clock>,
}

impl CipherEngine {
    /// Create an engine over the configured key file with the system clock
    pub fn new(config: &VaultConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create an engine with an injected clock
    pub fn with_clock(config: &VaultConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            algorithm: config.algorithm,
            keys: KeyStore::with_clock(config, Arc::clone(&clock)),
            clock,
        }
    }

    /// Encrypt a credential record into a persisted envelope
    pub fn encrypt(&self, record: &CredentialRecord) -> Result<EncryptedEnvelope> {
        let keys = self.keys.obtain_active()?;
        let mut plaintext = serde_json::to_vec(record)?;

        let envelope = self.algorithm.seal(
            keys.active(),
            keys.active_version(),
            self.clock.now(),
            &plaintext,
        );
        plaintext.zeroize();
        envelope
    }

    /// Decrypt a persisted envelope back into a credential record
    ///
    /// Fails with [`VaultError::UnknownKeyVersion`] when the envelope was
    /// sealed under a key no longer retained, and [`VaultError::Decryption`]
    /// when the tag does not verify or the cleartext does not parse.
    pub fn decrypt(&self, envelope: &EncryptedEnvelope) -> Result<CredentialRecord> {
        let keys = self.keys.obtain_active()?;
        let key = keys
            .for_version(envelope.key_version)
            .ok_or(VaultError::UnknownKeyVersion(envelope.key_version))?;

        let mut plaintext = self.algorithm.open(key, envelope)?;
        let record = serde_json::from_slice(&plaintext).map_err(|e| {
            debug!("Envelope cleartext did not parse: {}", e);
            VaultError::Decryption
        });
        plaintext.zeroize();
        record
    }

    /// Force a master key rotation, returning the new key version
    pub fn rotate_key(&self) -> Result<u32> {
        Ok(self.keys.rotate()?.active_version())
    }
}
