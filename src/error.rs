//! Error types for the vault

use thiserror::Error;

/// Result type alias for vault operations
pub type Result<T> = std::result::Result<T, VaultError>;

/// Vault error types
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Failed to decrypt token. Please authenticate again.")]
    Decryption,

    #[error("No key available for version {0}")]
    UnknownKeyVersion(u32),

    #[error("Unsupported encryption algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid vault file: {0}")]
    Format(String),

    #[error("Credential source error: {0}")]
    Source(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
