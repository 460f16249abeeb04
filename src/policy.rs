//! Token lifecycle checks
//!
//! Pure predicates over a credential's expiry timestamp. Credentials
//! without one (personal access tokens) never expire and never ask for
//! a refresh.

use chrono::{DateTime, Duration, Utc};

use crate::credential::CredentialRecord;

/// How far ahead of expiry a credential starts asking for a refresh
const REFRESH_LEAD_MINUTES: i64 = 60;

/// Whether the credential's expiry has passed as of `now`
///
/// A credential with no expiry timestamp is never expired.
pub fn is_expired(record: &CredentialRecord, now: DateTime<Utc>) -> bool {
    match record.expires_at {
        Some(expires_at) => expires_at <= now,
        None => false,
    }
}

/// Whether the credential should be proactively renewed
///
/// True when the record carries a refresh token and is within an hour of
/// its expiry, or already past it. Without a refresh token there is
/// nothing to renew with, so this is always false.
pub fn needs_refresh(record: &CredentialRecord, now: DateTime<Utc>) -> bool {
    if record.refresh_token.is_none() {
        return false;
    }
    match record.expires_at {
        Some(expires_at) => expires_at - now <= Duration::minutes(REFRESH_LEAD_MINUTES),
        None => false,
    }
}
