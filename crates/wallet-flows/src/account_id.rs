//! NEAR-style account id validation (registration step 1).
//!
//! The username part allows lowercase letters, digits, underscore, and
//! hyphen; the id must contain at least one dot separating the username
//! from a suffix drawn from a configured allow-list (or the default set
//! when none is configured).

use thiserror::Error;

const DEFAULT_SUFFIXES: &[&str] = &["near", "testnet"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccountIdError {
    #[error("account id must contain at least one dot separating username and suffix")]
    MissingSuffix,
    #[error("account id username may only contain lowercase letters, digits, '_' and '-'")]
    InvalidUsername,
    #[error("account id suffix '{0}' is not in the allowed list")]
    DisallowedSuffix(String),
    #[error("account id must not be empty")]
    Empty,
}

/// Controls how [`validate_account_id`] resolves the allowed suffix set.
#[derive(Debug, Clone, Default)]
pub struct AccountIdPolicy {
    /// When non-empty, overrides [`DEFAULT_SUFFIXES`].
    pub allowed_suffixes: Vec<String>,
    /// When true, only a single-label suffix ("alice.near") is accepted;
    /// when false, any dotted tail after the first label is allowed
    /// ("alice.sub.near") as long as its final label is in the allow-list.
    pub require_top_level_suffix: bool,
}

impl AccountIdPolicy {
    fn suffixes(&self) -> &[String] {
        &self.allowed_suffixes
    }
}

fn username_is_valid(username: &str) -> bool {
    !username.is_empty()
        && username
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

/// Validates an account id's shape. Does not check chain existence —
/// that is a separate collaborator call made by the registration flow.
pub fn validate_account_id(account_id: &str, policy: &AccountIdPolicy) -> Result<(), AccountIdError> {
    if account_id.is_empty() {
        return Err(AccountIdError::Empty);
    }
    let Some(dot_at) = account_id.find('.') else {
        return Err(AccountIdError::MissingSuffix);
    };
    let (username, rest) = account_id.split_at(dot_at);
    let suffix = &rest[1..];
    if suffix.is_empty() {
        return Err(AccountIdError::MissingSuffix);
    }
    if !username_is_valid(username) {
        return Err(AccountIdError::InvalidUsername);
    }

    let allowed: Vec<String> = if policy.suffixes().is_empty() {
        DEFAULT_SUFFIXES.iter().map(|s| s.to_string()).collect()
    } else {
        policy.suffixes().to_vec()
    };

    let candidate = if policy.require_top_level_suffix {
        suffix.to_string()
    } else {
        suffix.rsplit('.').next().unwrap_or(suffix).to_string()
    };

    if allowed.iter().any(|s| s == &candidate) {
        Ok(())
    } else {
        Err(AccountIdError::DisallowedSuffix(candidate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_a_well_formed_testnet_account() {
        let policy = AccountIdPolicy::default();
        assert!(validate_account_id("alice-1_2.testnet", &policy).is_ok());
    }

    #[test]
    fn rejects_missing_dot() {
        let policy = AccountIdPolicy::default();
        assert_eq!(
            validate_account_id("alice", &policy),
            Err(AccountIdError::MissingSuffix)
        );
    }

    #[test]
    fn rejects_uppercase_username() {
        let policy = AccountIdPolicy::default();
        assert_eq!(
            validate_account_id("Alice.testnet", &policy),
            Err(AccountIdError::InvalidUsername)
        );
    }

    #[test]
    fn rejects_suffix_outside_allow_list() {
        let policy = AccountIdPolicy::default();
        assert!(matches!(
            validate_account_id("alice.evil", &policy),
            Err(AccountIdError::DisallowedSuffix(_))
        ));
    }

    #[test]
    fn honors_configured_suffix_allow_list() {
        let policy = AccountIdPolicy {
            allowed_suffixes: vec!["mycompany.near".into()],
            require_top_level_suffix: true,
        };
        assert!(validate_account_id("alice.mycompany.near", &policy).is_ok());
        assert!(validate_account_id("alice.testnet", &policy).is_err());
    }

    #[test]
    fn non_top_level_mode_matches_on_final_label() {
        let policy = AccountIdPolicy {
            allowed_suffixes: vec!["near".into()],
            require_top_level_suffix: false,
        };
        assert!(validate_account_id("alice.sub.near", &policy).is_ok());
    }
}
