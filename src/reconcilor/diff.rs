// Account diff
//
// Pure decision logic between the session accounts and the validated chrome
// accounts: given the primary account, the ordered session list and the
// validation outcome, compute the corrective actions. Nothing here performs I/O.

use std::collections::BTreeSet;

use thiserror::Error;

use super::executor::ReconcileAction;
use crate::models::AccountId;

/// Reasons the diff refuses to produce actions for a pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiffError {
    /// The session needs rebuilding but the primary account cannot be merged.
    #[error("session must be rebuilt but primary account {0} is not a valid chrome account")]
    PrimaryNotValid(AccountId),
}

/// Compute the actions that bring the session in line with the chrome accounts.
///
/// - Session led by another account: logout all, merge the primary, then merge
///   every other valid account.
/// - Otherwise merge every valid account missing from the session (primary
///   first) and ask chrome to adopt every session account it has no valid token
///   for, tagged with its session index.
/// - Invalid accounts never appear in any action.
pub fn compute_actions(
    primary: &AccountId,
    gaia_accounts: &[AccountId],
    valid_accounts: &BTreeSet<AccountId>,
    invalid_accounts: &BTreeSet<AccountId>,
) -> Result<Vec<ReconcileAction>, DiffError> {
    let mut actions = Vec::new();

    if let Some(first) = gaia_accounts.first() {
        if first != primary {
            if !valid_accounts.contains(primary) {
                return Err(DiffError::PrimaryNotValid(primary.clone()));
            }

            actions.push(ReconcileAction::LogoutAll);
            actions.push(ReconcileAction::Merge(primary.clone()));
            actions.extend(
                valid_accounts
                    .iter()
                    .filter(|account| *account != primary)
                    .cloned()
                    .map(ReconcileAction::Merge),
            );
            return Ok(actions);
        }
    }

    let missing_from_session = |account: &AccountId| !gaia_accounts.contains(account);

    if valid_accounts.contains(primary) && missing_from_session(primary) {
        actions.push(ReconcileAction::Merge(primary.clone()));
    }
    actions.extend(
        valid_accounts
            .iter()
            .filter(|account| *account != primary && missing_from_session(account))
            .cloned()
            .map(ReconcileAction::Merge),
    );

    for (session_index, account) in gaia_accounts.iter().enumerate() {
        if valid_accounts.contains(account) || invalid_accounts.contains(account) {
            continue;
        }
        actions.push(ReconcileAction::AddToChrome {
            account: account.clone(),
            session_index,
        });
    }

    Ok(actions)
}
