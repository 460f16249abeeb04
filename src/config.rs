//! Vault configuration
//!
//! Paths, rotation interval, algorithm choice, and the read-failure
//! policy. Environment overrides cover the knobs the surrounding tool
//! historically exposed.

use chrono::Duration;
use directories::ProjectDirs;
use std::path::PathBuf;
use tracing::warn;

use crate::crypto::CipherAlgorithm;
use crate::error::{Result, VaultError};

/// Environment variable overriding the key rotation interval, in whole days
pub const ROTATION_INTERVAL_ENV: &str = "KEY_ROTATION_INTERVAL";

/// Environment variable selecting the AEAD algorithm
pub const ALGORITHM_ENV: &str = "ENCRYPTION_ALGORITHM";

/// Default master key rotation interval in days
pub const DEFAULT_ROTATION_DAYS: i64 = 30;

/// How storage read failures are handled
///
/// The default favors availability: an unreadable or corrupt file is
/// treated as absent, and the vault regenerates or reinitializes as
/// needed. `FailClosed` surfaces those failures instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPolicy {
    /// Treat unreadable or corrupt files as absent and carry on
    FailOpen,
    /// Surface read and parse failures to the caller
    FailClosed,
}

impl Default for ReadPolicy {
    fn default() -> Self {
        Self::FailOpen
    }
}

/// Vault configuration
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Root directory holding the key and credential files
    pub root: PathBuf,
    /// Master key age beyond which the next operation rotates it
    pub rotation_interval: Duration,
    /// AEAD algorithm used for new envelopes
    pub algorithm: CipherAlgorithm,
    /// Read failure handling
    pub read_policy: ReadPolicy,
}

impl VaultConfig {
    /// Create a configuration rooted at the per-user data directory
    pub fn new() -> Result<Self> {
        let root = ProjectDirs::from("com", "tokenvault", "tokenvault")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .ok_or_else(|| {
                VaultError::Storage("Could not determine data directory".to_string())
            })?;
        Ok(Self::with_root(root))
    }

    /// Create a configuration with a custom root directory (for testing)
    pub fn with_root(root: PathBuf) -> Self {
        Self {
            root,
            rotation_interval: Duration::days(DEFAULT_ROTATION_DAYS),
            algorithm: CipherAlgorithm::default(),
            read_policy: ReadPolicy::default(),
        }
    }

    /// Create a configuration with environment overrides applied
    ///
    /// Unrecognized values are logged and ignored in favor of defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::new()?;
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(raw) = std::env::var(ROTATION_INTERVAL_ENV) {
            match parse_rotation_days(&raw) {
                Some(interval) => self.rotation_interval = interval,
                None => warn!("Ignoring invalid {} value: {:?}", ROTATION_INTERVAL_ENV, raw),
            }
        }
        if let Ok(raw) = std::env::var(ALGORITHM_ENV) {
            match raw.parse::<CipherAlgorithm>() {
                Ok(algorithm) => self.algorithm = algorithm,
                Err(_) => warn!("Ignoring unsupported {} value: {:?}", ALGORITHM_ENV, raw),
            }
        }
    }

    /// Path of the master key file
    pub fn key_path(&self) -> PathBuf {
        self.root.join("keys").join("master.key")
    }

    /// Path of the credential store file
    pub fn store_path(&self) -> PathBuf {
        self.root.join("credentials.json")
    }
}

/// Parse a rotation interval given in whole days
fn parse_rotation_days(raw: &str) -> Option<Duration> {
    let days: i64 = raw.trim().parse().ok()?;
    if days <= 0 {
        return None;
    }
    Some(Duration::days(days))
}
