use serde::{Deserialize, Serialize};
use std::fmt;

use super::token::TokenData;

/// Case-normalized account identifier (the account's email).
///
/// Used as the join key between the token service and the session account list,
/// so every constructor trims and lowercases its input.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct AccountId(String);

impl AccountId {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for AccountId {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl From<&str> for AccountId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<AccountId> for String {
    fn from(id: AccountId) -> Self {
        id.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A locally held credential: one refresh token per account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountRecord {
    pub account_id: AccountId,
    pub refresh_token: String,
    /// Last minted access token, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<TokenData>,
    pub created_at: i64,
    pub last_used: i64,
}

impl AccountRecord {
    pub fn new(account_id: AccountId, refresh_token: String) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            account_id,
            refresh_token,
            token: None,
            created_at: now,
            last_used: now,
        }
    }

    pub fn update_last_used(&mut self) {
        self.last_used = chrono::Utc::now().timestamp();
    }
}

/// A session-only account the reconcilor asked the store to start tracking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingAdoption {
    pub account_id: AccountId,
    /// Position in the session account list, used for UI ordering only
    pub session_index: usize,
    pub requested_at: i64,
}

/// Credential index persisted as accounts.json
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountIndex {
    pub version: String,
    #[serde(default)]
    pub accounts: Vec<AccountRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_adoptions: Vec<PendingAdoption>,
}

impl AccountIndex {
    pub fn new() -> Self {
        Self {
            version: "1.0".to_string(),
            accounts: Vec::new(),
            pending_adoptions: Vec::new(),
        }
    }
}

impl Default for AccountIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_account_id_normalizes_case_and_whitespace() {
        let id = AccountId::new("  User@GMail.com ");
        assert_eq!(id.as_str(), "user@gmail.com");
        assert_eq!(id, AccountId::from("user@gmail.com"));
    }

    #[test]
    fn test_account_id_deserialize_normalizes() {
        let id: AccountId = serde_json::from_str("\"Other@Gmail.com\"").unwrap();
        assert_eq!(id.as_str(), "other@gmail.com");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"other@gmail.com\"");
    }

    #[test]
    fn test_account_index_missing_fields_use_defaults() {
        let index: AccountIndex = serde_json::from_str(r#"{"version": "1.0"}"#).unwrap();
        assert!(index.accounts.is_empty());
        assert!(index.pending_adoptions.is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_account_id_normalization_is_idempotent(raw in "[ A-Za-z0-9@.]{0,40}") {
            let once = AccountId::new(&raw);
            let twice = AccountId::new(once.as_str());
            prop_assert_eq!(once, twice);
        }
    }
}
