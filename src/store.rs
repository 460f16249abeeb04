//! Encrypted credential store
//!
//! A single JSON document maps service names to encrypted envelopes.
//! Every operation reads the whole document, mutates it in memory, and
//! writes it back whole. Two processes doing that concurrently can lose
//! one writer's update; for a single-user tool that tradeoff is accepted
//! and no file locking is attempted.

use chrono::serde::ts_milliseconds;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{ReadPolicy, VaultConfig};
use crate::credential::{CredentialRecord, EncryptedEnvelope, LoadOutcome};
use crate::crypto::CipherEngine;
use crate::error::{Result, VaultError};
use crate::fsutil;
use crate::policy;
use crate::source::CredentialSource;

/// Store file schema version
const STORE_SCHEMA: u32 = 1;

/// One service's stored credential
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredEntry {
    envelope: EncryptedEnvelope,
    #[serde(with = "ts_milliseconds")]
    last_used: DateTime<Utc>,
}

/// On-disk credential store document
#[derive(Debug, Serialize, Deserialize)]
struct StoreDocument {
    schema: u32,
    tokens: BTreeMap<String, StoredEntry>,
}

impl StoreDocument {
    fn empty() -> Self {
        Self {
            schema: STORE_SCHEMA,
            tokens: BTreeMap::new(),
        }
    }
}

/// Persists credentials encrypted under the vault's master key
pub struct CredentialStore {
    store_path: PathBuf,
    read_policy: ReadPolicy,
    engine: CipherEngine,
    clock: Arc<dyn Clock>,
}

impl CredentialStore {
    /// Create a store over the configured paths with the system clock
    pub fn new(config: &VaultConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a store with an injected clock
    pub fn with_clock(config: &VaultConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store_path: config.store_path(),
            read_policy: config.read_policy,
            engine: CipherEngine::with_clock(config, Arc::clone(&clock)),
            clock,
        }
    }

    /// Encrypt and store a credential for `service`, overwriting any
    /// existing entry
    pub fn save_credential(&self, service: &str, record: &CredentialRecord) -> Result<()> {
        let mut document = self.read_document()?;
        let envelope = self.engine.encrypt(record)?;

        document.tokens.insert(
            service.to_string(),
            StoredEntry {
                envelope,
                last_used: self.clock.now(),
            },
        );
        self.persist(&document);

        info!("Stored credential for service '{}'", service);
        Ok(())
    }

    /// Load and decrypt the credential stored for `service`
    ///
    /// A missing file or entry is [`LoadOutcome::Absent`]. An entry that
    /// no longer decrypts, because it was tampered with or outlived its
    /// key, is [`LoadOutcome::Invalid`] and the caller should
    /// re-authenticate. Expiry is not checked here; that is the token
    /// lifecycle policy's job.
    pub fn load_credential(&self, service: &str) -> Result<LoadOutcome> {
        let mut document = self.read_document()?;
        let entry = match document.tokens.get(service) {
            Some(entry) => entry,
            None => {
                debug!("No stored credential for service '{}'", service);
                return Ok(LoadOutcome::Absent);
            }
        };

        let record = match self.engine.decrypt(&entry.envelope) {
            Ok(record) => record,
            Err(VaultError::Decryption) | Err(VaultError::UnknownKeyVersion(_)) => {
                warn!(
                    "Stored credential for service '{}' is no longer decryptable",
                    service
                );
                return Ok(LoadOutcome::Invalid);
            }
            Err(e) => return Err(e),
        };

        // A successful load counts as a use
        if let Some(entry) = document.tokens.get_mut(service) {
            entry.last_used = self.clock.now();
        }
        self.persist(&document);

        Ok(LoadOutcome::Found(record))
    }

    /// Remove every stored credential (full logout, all services)
    pub fn clear_credentials(&self) -> Result<()> {
        if !self.store_path.exists() {
            return Ok(());
        }
        self.persist(&StoreDocument::empty());
        info!("Cleared all stored credentials");
        Ok(())
    }

    /// Return the stored credential for `service`, or obtain a fresh one
    /// from `source`, store it, and return that
    ///
    /// A stored credential is reused as long as it decrypts and has not
    /// expired; one inside its refresh window is still reused, with a
    /// hint logged. Anything else falls through to the source.
    pub fn ensure_credential(
        &self,
        service: &str,
        source: &dyn CredentialSource,
    ) -> Result<CredentialRecord> {
        if let LoadOutcome::Found(record) = self.load_credential(service)? {
            let now = self.clock.now();
            if !policy::is_expired(&record, now) {
                if policy::needs_refresh(&record, now) {
                    info!("Credential for service '{}' is due for a refresh", service);
                }
                return Ok(record);
            }
            info!("Stored credential for service '{}' has expired", service);
        }

        let fresh = source.obtain()?;
        self.save_credential(service, &fresh)?;
        Ok(fresh)
    }

    /// Access token for `service`, if one is stored, decryptable, and
    /// not expired
    pub fn usable_access_token(&self, service: &str) -> Result<Option<String>> {
        match self.load_credential(service)? {
            LoadOutcome::Found(record) if !policy::is_expired(&record, self.clock.now()) => {
                Ok(Some(record.access_token))
            }
            _ => Ok(None),
        }
    }

    /// Force a master key rotation, returning the new key version
    ///
    /// Entries encrypted before the previous rotation become unreadable.
    pub fn rotate_master_key(&self) -> Result<u32> {
        self.engine.rotate_key()
    }

    /// Read the store document from disk
    ///
    /// A missing file is an empty store. An unreadable or unparseable
    /// file follows the read policy: fail-open recovers to an empty
    /// store (the corrupt document is overwritten on the next save),
    /// fail-closed surfaces the error.
    fn read_document(&self) -> Result<StoreDocument> {
        let raw = match std::fs::read(&self.store_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(StoreDocument::empty()),
            Err(e) => {
                return match self.read_policy {
                    ReadPolicy::FailOpen => {
                        warn!("Unreadable credential store {:?}: {}", self.store_path, e);
                        Ok(StoreDocument::empty())
                    }
                    ReadPolicy::FailClosed => Err(e.into()),
                }
            }
        };

        match serde_json::from_slice::<StoreDocument>(&raw) {
            Ok(document) if document.schema == STORE_SCHEMA => Ok(document),
            Ok(document) => match self.read_policy {
                ReadPolicy::FailOpen => {
                    warn!(
                        "Credential store {:?} has unsupported schema {}",
                        self.store_path, document.schema
                    );
                    Ok(StoreDocument::empty())
                }
                ReadPolicy::FailClosed => Err(VaultError::Format(format!(
                    "credential store: unsupported schema {}",
                    document.schema
                ))),
            },
            Err(e) => match self.read_policy {
                ReadPolicy::FailOpen => {
                    warn!("Corrupt credential store {:?}: {}", self.store_path, e);
                    Ok(StoreDocument::empty())
                }
                ReadPolicy::FailClosed => {
                    Err(VaultError::Format(format!("credential store: {}", e)))
                }
            },
        }
    }

    /// Write the store document with owner-only permissions
    ///
    /// Write failures are warnings; the in-memory result of the current
    /// operation stands either way.
    fn persist(&self, document: &StoreDocument) {
        let json = match serde_json::to_vec_pretty(document) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize credential store: {}", e);
                return;
            }
        };

        if let Some(parent) = self.store_path.parent() {
            if let Err(e) = fsutil::ensure_private_dir(parent) {
                warn!("Failed to create store directory {:?}: {}", parent, e);
                return;
            }
        }

        match fsutil::write_private_atomic(&self.store_path, &json) {
            Ok(()) => debug!("Wrote credential store {:?}", self.store_path),
            Err(e) => warn!(
                "Failed to write credential store {:?}: {}",
                self.store_path, e
            ),
        }
    }
}
