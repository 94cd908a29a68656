// Token validator
//
// Confirms every account held by the token service still has a usable refresh
// token: mint an access token, then call the user-info endpoint with it.

use futures::stream::{FuturesUnordered, StreamExt};

use super::services::{SessionTransport, TokenService};
use crate::models::AccountId;
use crate::modules::mask_email;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountValidity {
    Valid,
    Invalid,
}

/// Classify a single account.
pub async fn validate_account(
    token_service: &dyn TokenService,
    transport: &dyn SessionTransport,
    account: &AccountId,
) -> AccountValidity {
    let access_token = match token_service.request_access_token(account).await {
        Ok(token) => token,
        Err(e) => {
            tracing::warn!(
                "[Validator] Access token request failed for {}: {}",
                mask_email(account.as_str()),
                e
            );
            return AccountValidity::Invalid;
        }
    };

    match transport.user_info(&access_token).await {
        Ok(_) => AccountValidity::Valid,
        Err(e) => {
            tracing::warn!(
                "[Validator] User info failed for {}: {}",
                mask_email(account.as_str()),
                e
            );
            AccountValidity::Invalid
        }
    }
}

/// Validate every account known to the token service when called.
///
/// All accounts are checked concurrently and `on_result` runs as each one
/// resolves. Accounts whose refresh token disappeared while the check was in
/// flight are dropped without calling `on_result`. Returns once every account of
/// the initial snapshot has resolved.
pub async fn validate_accounts<F>(
    token_service: &dyn TokenService,
    transport: &dyn SessionTransport,
    mut on_result: F,
) where
    F: FnMut(AccountId, AccountValidity) + Send,
{
    let accounts = token_service.accounts();
    tracing::debug!("[Validator] Checking {} refresh token(s)", accounts.len());

    let mut pending: FuturesUnordered<_> = accounts
        .into_iter()
        .map(|account| async move {
            let validity = validate_account(token_service, transport, &account).await;
            (account, validity)
        })
        .collect();

    while let Some((account, validity)) = pending.next().await {
        if !token_service.refresh_token_is_available(&account) {
            tracing::debug!(
                "[Validator] Discarding result for removed account {}",
                mask_email(account.as_str())
            );
            continue;
        }
        on_result(account, validity);
    }
}
