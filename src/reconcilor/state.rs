use std::collections::BTreeSet;

use super::validator::AccountValidity;
use crate::models::AccountId;

/// Per-pass reconciliation state.
///
/// Reset when a pass starts and written only by completions carrying the same
/// `pass_id`. Contents stay readable after the pass ends until the next reset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileState {
    pub pass_id: u64,
    pub started: bool,
    pub gaia_accounts_set: bool,
    pub gaia_accounts: Vec<AccountId>,
    pub tokens_checked: bool,
    pub valid_accounts: BTreeSet<AccountId>,
    pub invalid_accounts: BTreeSet<AccountId>,
}

impl ReconcileState {
    /// Fresh, idle state for `pass_id`.
    pub fn new(pass_id: u64) -> Self {
        Self {
            pass_id,
            ..Self::default()
        }
    }

    /// Fresh state for a pass that is now in flight.
    pub fn begin(pass_id: u64) -> Self {
        Self {
            pass_id,
            started: true,
            ..Self::default()
        }
    }

    pub fn set_gaia_accounts(&mut self, accounts: Vec<AccountId>) {
        self.gaia_accounts = accounts;
        self.gaia_accounts_set = true;
    }

    /// Record a validation result, keeping the valid and invalid sets disjoint.
    pub fn record_validity(&mut self, account: AccountId, validity: AccountValidity) {
        match validity {
            AccountValidity::Valid => {
                self.invalid_accounts.remove(&account);
                self.valid_accounts.insert(account);
            }
            AccountValidity::Invalid => {
                self.valid_accounts.remove(&account);
                self.invalid_accounts.insert(account);
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.gaia_accounts_set && self.tokens_checked
    }
}
