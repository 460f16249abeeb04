//! Master key lifecycle
//!
//! Lazy generation, owner-only persistence, staleness-driven rotation,
//! and single-level retention of the superseded key. One rotation after
//! an envelope is sealed it remains decryptable; two rotations later the
//! sealing key is gone for good.

use chrono::serde::ts_milliseconds;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::clock::{Clock, SystemClock};
use crate::config::{ReadPolicy, VaultConfig};
use crate::crypto::b64;
use crate::crypto::{MasterKey, KEY_LEN};
use crate::error::{Result, VaultError};
use crate::fsutil;

/// Key file schema version
const KEY_SCHEMA: u32 = 1;

/// On-disk master key record
///
/// `schema` tags the file format; `version` counts key generations and
/// is what envelopes reference.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
struct KeyRecord {
    schema: u32,
    version: u32,
    #[serde(with = "b64")]
    key: [u8; KEY_LEN],
    #[zeroize(skip)]
    #[serde(with = "ts_milliseconds")]
    created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "b64::opt")]
    previous_key: Option<[u8; KEY_LEN]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    previous_version: Option<u32>,
}

/// Usable view of the key record: the active key plus the one retained
/// predecessor, resolvable by version
pub struct KeySet {
    active: MasterKey,
    active_version: u32,
    previous: Option<(u32, MasterKey)>,
}

impl KeySet {
    fn from_record(record: &KeyRecord) -> Self {
        Self {
            active: MasterKey::new(record.key),
            active_version: record.version,
            previous: match (record.previous_key, record.previous_version) {
                (Some(key), Some(version)) => Some((version, MasterKey::new(key))),
                _ => None,
            },
        }
    }

    /// Key used to seal new envelopes
    pub fn active(&self) -> &MasterKey {
        &self.active
    }

    /// Version stamped into new envelopes
    pub fn active_version(&self) -> u32 {
        self.active_version
    }

    /// Resolve the key an envelope was sealed under, if still retained
    pub fn for_version(&self, version: u32) -> Option<&MasterKey> {
        if version == self.active_version {
            return Some(&self.active);
        }
        match &self.previous {
            Some((v, key)) if *v == version => Some(key),
            _ => None,
        }
    }
}

/// Manages the master key file
pub struct KeyStore {
    key_path: PathBuf,
    rotation_interval: Duration,
    read_policy: ReadPolicy,
    clock: Arc<dyn Clock>,
}

impl KeyStore {
    /// Create a key store over the configured key file with the system clock
    pub fn new(config: &VaultConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a key store with an injected clock
    pub fn with_clock(config: &VaultConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            key_path: config.key_path(),
            rotation_interval: config.rotation_interval,
            read_policy: config.read_policy,
            clock,
        }
    }

    /// Load or create the key record, rotating first when it has gone
    /// stale, and return the usable key set
    pub fn obtain_active(&self) -> Result<KeySet> {
        let record = match self.read_record()? {
            Some(record) if self.is_stale(&record) => self.rotate_record(record),
            Some(record) => record,
            None => self.generate_record(),
        };
        Ok(KeySet::from_record(&record))
    }

    /// Replace the active key now, retaining the superseded key for one
    /// more generation
    pub fn rotate(&self) -> Result<KeySet> {
        let record = match self.read_record()? {
            Some(record) => self.rotate_record(record),
            None => self.generate_record(),
        };
        Ok(KeySet::from_record(&record))
    }

    fn is_stale(&self, record: &KeyRecord) -> bool {
        self.clock.now() - record.created_at > self.rotation_interval
    }

    fn generate_record(&self) -> KeyRecord {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);

        let record = KeyRecord {
            schema: KEY_SCHEMA,
            version: 1,
            key,
            created_at: self.clock.now(),
            previous_key: None,
            previous_version: None,
        };
        self.persist(&record);
        info!("Generated new master key (version 1)");
        record
    }

    fn rotate_record(&self, old: KeyRecord) -> KeyRecord {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);

        let record = KeyRecord {
            schema: KEY_SCHEMA,
            version: old.version + 1,
            key,
            created_at: self.clock.now(),
            previous_key: Some(old.key),
            previous_version: Some(old.version),
        };
        self.persist(&record);
        info!("Rotated master key to version {}", record.version);
        record
    }

    /// Read the key record from disk
    ///
    /// A missing file reports `None`. An unreadable or unparseable file
    /// follows the read policy, except for the legacy shape: a file
    /// holding exactly 32 raw bytes is the pre-rotation format and is
    /// adopted as version 1, then rewritten in the current schema.
    fn read_record(&self) -> Result<Option<KeyRecord>> {
        let raw = match std::fs::read(&self.key_path) {
            Ok(raw) => Zeroizing::new(raw),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return match self.read_policy {
                    ReadPolicy::FailOpen => {
                        warn!("Unreadable key file {:?}: {}", self.key_path, e);
                        Ok(None)
                    }
                    ReadPolicy::FailClosed => Err(e.into()),
                }
            }
        };

        match serde_json::from_slice::<KeyRecord>(&raw) {
            Ok(record) if record.schema == KEY_SCHEMA => Ok(Some(record)),
            Ok(record) => match self.read_policy {
                ReadPolicy::FailOpen => {
                    warn!(
                        "Key file {:?} has unsupported schema {}",
                        self.key_path, record.schema
                    );
                    Ok(None)
                }
                ReadPolicy::FailClosed => Err(VaultError::Format(format!(
                    "key file: unsupported schema {}",
                    record.schema
                ))),
            },
            Err(_) if raw.len() == KEY_LEN => {
                info!("Migrating legacy raw key file {:?}", self.key_path);
                let mut key = [0u8; KEY_LEN];
                key.copy_from_slice(&raw);

                let record = KeyRecord {
                    schema: KEY_SCHEMA,
                    version: 1,
                    key,
                    created_at: self.clock.now(),
                    previous_key: None,
                    previous_version: None,
                };
                self.persist(&record);
                Ok(Some(record))
            }
            Err(e) => match self.read_policy {
                ReadPolicy::FailOpen => {
                    warn!("Corrupt key file {:?}: {}", self.key_path, e);
                    Ok(None)
                }
                ReadPolicy::FailClosed => {
                    Err(VaultError::Format(format!("key file: {}", e)))
                }
            },
        }
    }

    /// Write the key record with owner-only permissions
    ///
    /// Write failures are warnings: the in-memory key remains usable for
    /// the current operation either way.
    fn persist(&self, record: &KeyRecord) {
        let json = match serde_json::to_vec_pretty(record) {
            Ok(json) => Zeroizing::new(json),
            Err(e) => {
                warn!("Failed to serialize key record: {}", e);
                return;
            }
        };

        if let Some(parent) = self.key_path.parent() {
            if let Err(e) = fsutil::ensure_private_dir(parent) {
                warn!("Failed to create key directory {:?}: {}", parent, e);
                return;
            }
        }

        match fsutil::write_private_atomic(&self.key_path, &json) {
            Ok(()) => debug!("Wrote key file {:?}", self.key_path),
            Err(e) => warn!("Failed to write key file {:?}: {}", self.key_path, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[cfg(unix)]
    use std::os::unix::fs::PermissionsExt;

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    fn test_config(temp_dir: &TempDir) -> VaultConfig {
        VaultConfig::with_root(temp_dir.path().to_path_buf())
    }

    fn epoch() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()
    }

    #[test]
    fn test_obtain_creates_and_persists_key() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(&temp_dir);
        let store = KeyStore::new(&config);

        let first = store.obtain_active().unwrap();
        assert_eq!(first.active_version(), 1);
        assert!(config.key_path().exists());

        let second = store.obtain_active().unwrap();
        assert_eq!(second.active_version(), 1);
        assert_eq!(second.active().as_bytes(), first.active().as_bytes());
    }

    #[test]
    fn test_rotation_retains_one_generation() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(&temp_dir);
        let store = KeyStore::new(&config);

        let v1 = store.obtain_active().unwrap();
        let v2 = store.rotate().unwrap();

        assert_eq!(v2.active_version(), 2);
        assert_ne!(v2.active().as_bytes(), v1.active().as_bytes());
        assert_eq!(
            v2.for_version(1).unwrap().as_bytes(),
            v1.active().as_bytes()
        );

        let v3 = store.rotate().unwrap();
        assert_eq!(v3.active_version(), 3);
        assert!(v3.for_version(2).is_some());
        assert!(v3.for_version(1).is_none());
    }

    #[test]
    fn test_rotate_without_existing_key() {
        let temp_dir = TempDir::new().unwrap();
        let store = KeyStore::new(&test_config(&temp_dir));

        let keys = store.rotate().unwrap();
        assert_eq!(keys.active_version(), 1);
        assert!(keys.for_version(2).is_none());
    }

    #[test]
    fn test_stale_key_rotates_on_obtain() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(&temp_dir);

        let store = KeyStore::with_clock(&config, Arc::new(FixedClock(epoch())));
        let v1 = store.obtain_active().unwrap();
        assert_eq!(v1.active_version(), 1);

        // 29 days later: still fresh
        let later = KeyStore::with_clock(
            &config,
            Arc::new(FixedClock(epoch() + Duration::days(29))),
        );
        assert_eq!(later.obtain_active().unwrap().active_version(), 1);

        // 31 days later: stale, rotates and retains the old key
        let stale = KeyStore::with_clock(
            &config,
            Arc::new(FixedClock(epoch() + Duration::days(31))),
        );
        let v2 = stale.obtain_active().unwrap();
        assert_eq!(v2.active_version(), 2);
        assert_eq!(
            v2.for_version(1).unwrap().as_bytes(),
            v1.active().as_bytes()
        );
    }

    #[test]
    fn test_zero_interval_rotates_every_obtain() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = test_config(&temp_dir);
        config.rotation_interval = Duration::zero();
        let store = KeyStore::new(&config);

        assert_eq!(store.obtain_active().unwrap().active_version(), 1);
        assert_eq!(store.obtain_active().unwrap().active_version(), 2);
        assert_eq!(store.obtain_active().unwrap().active_version(), 3);
    }

    #[test]
    fn test_key_file_wire_format() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(&temp_dir);
        let store = KeyStore::new(&config);

        store.obtain_active().unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(config.key_path()).unwrap()).unwrap();
        assert_eq!(value["schema"], 1);
        assert_eq!(value["version"], 1);
        assert!(value["key"].is_string());
        assert!(value["createdAt"].is_i64());
        assert!(value.get("previousKey").is_none());

        store.rotate().unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(config.key_path()).unwrap()).unwrap();
        assert_eq!(value["version"], 2);
        assert!(value["previousKey"].is_string());
        assert_eq!(value["previousVersion"], 1);
    }

    #[test]
    fn test_legacy_raw_key_is_adopted() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(&temp_dir);

        std::fs::create_dir_all(config.key_path().parent().unwrap()).unwrap();
        std::fs::write(config.key_path(), [7u8; KEY_LEN]).unwrap();

        let store = KeyStore::new(&config);
        let keys = store.obtain_active().unwrap();
        assert_eq!(keys.active_version(), 1);
        assert_eq!(keys.active().as_bytes(), &[7u8; KEY_LEN]);

        // The file is rewritten in the structured schema
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(config.key_path()).unwrap()).unwrap();
        assert_eq!(value["schema"], 1);
        assert_eq!(value["version"], 1);
    }

    #[test]
    fn test_corrupt_key_file_regenerates_when_fail_open() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(&temp_dir);

        std::fs::create_dir_all(config.key_path().parent().unwrap()).unwrap();
        std::fs::write(config.key_path(), b"not a key record").unwrap();

        let store = KeyStore::new(&config);
        let keys = store.obtain_active().unwrap();
        assert_eq!(keys.active_version(), 1);

        // Regeneration replaced the corrupt file with a parseable one
        let reread = store.obtain_active().unwrap();
        assert_eq!(reread.active().as_bytes(), keys.active().as_bytes());
    }

    #[test]
    fn test_corrupt_key_file_errors_when_fail_closed() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = test_config(&temp_dir);
        config.read_policy = ReadPolicy::FailClosed;

        std::fs::create_dir_all(config.key_path().parent().unwrap()).unwrap();
        std::fs::write(config.key_path(), b"not a key record").unwrap();

        let store = KeyStore::new(&config);
        let result = store.obtain_active();
        assert!(matches!(result, Err(VaultError::Format(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_key_file_is_owner_only() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(&temp_dir);
        let store = KeyStore::new(&config);

        store.obtain_active().unwrap();

        let file_mode = std::fs::metadata(config.key_path())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(file_mode & 0o777, 0o600);

        let dir_mode = std::fs::metadata(config.key_path().parent().unwrap())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(dir_mode & 0o777, 0o700);
    }
}
