// Session account fetcher
//
// Lists the accounts logged into the cookie session, in session order.
// The first entry is the session's active account.

use serde_json::Value;
use thiserror::Error;

use super::services::{SessionTransport, TransportError};
use crate::models::AccountId;

/// Index of the email field inside one account entry
const ACCOUNT_EMAIL_INDEX: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("malformed account list: {0}")]
    Parse(String),
}

/// Parse the account-listing body.
///
/// The body is `[<tag>, [[.., .., .., "email", ..], ...]]`. Entries that are not
/// lists, are too short, or carry an empty email are skipped. Duplicates keep their
/// first position.
pub fn parse_list_accounts(body: &str) -> Result<Vec<AccountId>, FetchError> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| FetchError::Parse(e.to_string()))?;

    let entries = value
        .as_array()
        .and_then(|top| top.get(1))
        .and_then(Value::as_array)
        .ok_or_else(|| FetchError::Parse("expected a list of accounts at index 1".to_string()))?;

    let mut accounts: Vec<AccountId> = Vec::with_capacity(entries.len());
    for entry in entries {
        let Some(email) = entry
            .as_array()
            .and_then(|fields| fields.get(ACCOUNT_EMAIL_INDEX))
            .and_then(Value::as_str)
        else {
            tracing::debug!("[Fetcher] Skipping malformed account entry: {}", entry);
            continue;
        };

        let account = AccountId::new(email);
        if account.is_empty() || accounts.contains(&account) {
            continue;
        }
        accounts.push(account);
    }

    Ok(accounts)
}

/// Fetch and parse the session's account list.
pub async fn fetch_session_accounts(
    transport: &dyn SessionTransport,
) -> Result<Vec<AccountId>, FetchError> {
    let body = transport.list_accounts().await?;
    parse_list_accounts(&body)
}
