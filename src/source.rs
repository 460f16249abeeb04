//! Fresh-credential sources
//!
//! The vault never performs authentication itself. When a stored
//! credential is missing or unusable, [`CredentialSource`] supplies a
//! fresh one: an interactive prompt, an authorization-code exchange, or
//! simply an environment variable.

use tracing::debug;

use crate::credential::CredentialRecord;
use crate::error::{Result, VaultError};

/// Supplies a freshly obtained cleartext credential
pub trait CredentialSource {
    fn obtain(&self) -> Result<CredentialRecord>;
}

/// Any closure producing a credential is a source
impl<F> CredentialSource for F
where
    F: Fn() -> Result<CredentialRecord>,
{
    fn obtain(&self) -> Result<CredentialRecord> {
        self()
    }
}

/// Reads a personal access token from an environment variable, e.g.
/// `EnvTokenSource::new("GITHUB_TOKEN")`
pub struct EnvTokenSource {
    variable: String,
}

impl EnvTokenSource {
    pub fn new(variable: &str) -> Self {
        Self {
            variable: variable.to_string(),
        }
    }
}

impl CredentialSource for EnvTokenSource {
    fn obtain(&self) -> Result<CredentialRecord> {
        match std::env::var(&self.variable) {
            Ok(token) if !token.trim().is_empty() => {
                debug!("Using token from environment variable {}", self.variable);
                Ok(CredentialRecord::personal_access_token(token.trim()))
            }
            _ => Err(VaultError::Source(format!(
                "environment variable {} is not set",
                self.variable
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::CredentialKind;

    #[test]
    fn test_env_source_reads_token() {
        std::env::set_var("TOKENVAULT_TEST_SOURCE_SET", "  ghp_fromenv  ");

        let source = EnvTokenSource::new("TOKENVAULT_TEST_SOURCE_SET");
        let record = source.obtain().unwrap();
        assert_eq!(record.access_token, "ghp_fromenv");
        assert_eq!(record.kind, CredentialKind::PersonalAccessToken);

        std::env::remove_var("TOKENVAULT_TEST_SOURCE_SET");
    }

    #[test]
    fn test_env_source_missing_variable() {
        let source = EnvTokenSource::new("TOKENVAULT_TEST_SOURCE_MISSING");
        let result = source.obtain();
        assert!(matches!(result, Err(VaultError::Source(_))));
    }

    #[test]
    fn test_env_source_blank_variable() {
        std::env::set_var("TOKENVAULT_TEST_SOURCE_BLANK", "   ");

        let source = EnvTokenSource::new("TOKENVAULT_TEST_SOURCE_BLANK");
        let result = source.obtain();
        assert!(matches!(result, Err(VaultError::Source(_))));

        std::env::remove_var("TOKENVAULT_TEST_SOURCE_BLANK");
    }

    #[test]
    fn test_closure_source() {
        let source = || -> Result<CredentialRecord> {
            Ok(CredentialRecord::personal_access_token("ghp_closure"))
        };

        let dynamic: &dyn CredentialSource = &source;
        let record = dynamic.obtain().unwrap();
        assert_eq!(record.access_token, "ghp_closure");
    }
}
