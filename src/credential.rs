//! Credential data model

use chrono::serde::{ts_milliseconds, ts_milliseconds_option};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::b64;
use crate::crypto::{NONCE_LEN, TAG_LEN};

/// Kind of stored credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialKind {
    /// Token obtained through an OAuth authorization exchange
    Oauth,
    /// Long-lived personal access token
    PersonalAccessToken,
}

/// Cleartext credential material
///
/// Exists in memory only and is never persisted unencrypted. Callers
/// should not retain a decrypted record beyond the operation that needs
/// it; no in-memory scrubbing of this type is guaranteed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
    /// Bearer token presented to the remote API
    pub access_token: String,

    /// Refresh token, present for OAuth credentials
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Expiry instant; absent for tokens that never expire
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "ts_milliseconds_option"
    )]
    pub expires_at: Option<DateTime<Utc>>,

    /// What sort of credential this is
    pub kind: CredentialKind,
}

impl CredentialRecord {
    /// Create a personal access token credential
    pub fn personal_access_token(access_token: &str) -> Self {
        Self {
            access_token: access_token.to_string(),
            refresh_token: None,
            expires_at: None,
            kind: CredentialKind::PersonalAccessToken,
        }
    }

    /// Create an OAuth credential
    pub fn oauth(
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.map(|t| t.to_string()),
            expires_at,
            kind: CredentialKind::Oauth,
        }
    }
}

impl std::fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Persisted encryption envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedEnvelope {
    /// Nonce drawn fresh for this envelope
    #[serde(with = "b64")]
    pub nonce: [u8; NONCE_LEN],

    /// AEAD ciphertext, without the tag
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,

    /// Authentication tag
    #[serde(with = "b64")]
    pub auth_tag: [u8; TAG_LEN],

    /// Version of the master key that sealed this envelope
    pub key_version: u32,

    /// When this envelope was created
    #[serde(with = "ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

/// Result of looking up a stored credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Entry present and decrypted
    Found(CredentialRecord),
    /// No entry stored for the service
    Absent,
    /// Entry present but unusable; the caller must re-authenticate
    Invalid,
}

impl LoadOutcome {
    /// The decrypted record, if one was found
    pub fn into_record(self) -> Option<CredentialRecord> {
        match self {
            LoadOutcome::Found(record) => Some(record),
            _ => None,
        }
    }
}
