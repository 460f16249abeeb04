//! Cryptographic primitives for the credential vault
//!
//! This module provides:
//! - AES-256-GCM and ChaCha20-Poly1305 authenticated encryption
//! - master key handling with zeroize-on-drop
//! - the base64 codec used by persisted byte fields

pub(crate) mod b64;
mod cipher;
mod master_key;

pub use cipher::{CipherAlgorithm, CipherEngine, NONCE_LEN, TAG_LEN};
pub use master_key::{MasterKey, KEY_LEN};
