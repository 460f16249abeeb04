//! # tokenvault
//!
//! Encrypted on-disk credential vault for CLI tools including:
//! - AEAD token envelopes (AES-256-GCM or ChaCha20-Poly1305)
//! - Master key rotation with one retained previous generation
//! - Token expiry and refresh-window checks
//! - Fail-open or fail-closed recovery from unreadable vault files

pub mod clock;
pub mod config;
pub mod credential;
pub mod crypto;
pub mod error;
pub mod keystore;
pub mod policy;
pub mod source;
pub mod store;
mod fsutil;

pub use clock::{Clock, SystemClock};
pub use config::{ReadPolicy, VaultConfig};
pub use credential::{CredentialKind, CredentialRecord, EncryptedEnvelope, LoadOutcome};
pub use crypto::{CipherAlgorithm, CipherEngine, MasterKey};
pub use error::{Result, VaultError};
pub use keystore::{KeySet, KeyStore};
pub use policy::{is_expired, needs_refresh};
pub use source::{CredentialSource, EnvTokenSource};
pub use store::CredentialStore;
