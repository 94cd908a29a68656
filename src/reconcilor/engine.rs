// Reconciliation engine
//
// Joins the session account list and the token validation results, computes
// the corrective actions and dispatches them. At most one pass is in flight:
// `start_reconcile` is a no-op while `ReconcileState::started` is set.
//
// Every completion carries the id of the pass it belongs to. Aborting bumps the
// id, so late completions of an abandoned pass are dropped.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;

use super::diff::compute_actions;
use super::executor::{dispatch, ActionExecutor};
use super::fetcher::fetch_session_accounts;
use super::services::{SessionTransport, TokenService};
use super::state::ReconcileState;
use super::validator::validate_accounts;
use crate::models::AccountId;
use crate::modules::mask_email;
use crate::modules::signin::SigninManager;

/// Account reconcilor handle. Cloning shares the same engine.
#[derive(Clone)]
pub struct AccountReconcilor {
    token_service: Arc<dyn TokenService>,
    transport: Arc<dyn SessionTransport>,
    executor: Arc<dyn ActionExecutor>,
    signin: Arc<SigninManager>,
    state: Arc<Mutex<ReconcileState>>,
}

impl AccountReconcilor {
    pub fn new(
        token_service: Arc<dyn TokenService>,
        transport: Arc<dyn SessionTransport>,
        executor: Arc<dyn ActionExecutor>,
        signin: Arc<SigninManager>,
    ) -> Self {
        Self {
            token_service,
            transport,
            executor,
            signin,
            state: Arc::new(Mutex::new(ReconcileState::default())),
        }
    }

    /// Start a reconciliation pass unless one is already in flight.
    ///
    /// Returns `true` when a new pass was started. Must be called inside a tokio
    /// runtime; the pass runs on a spawned task.
    pub fn start_reconcile(&self) -> bool {
        let pass_id = {
            let mut state = self.state.lock();
            if state.started {
                tracing::debug!(
                    "[Reconcilor] Pass {} still in flight, ignoring trigger",
                    state.pass_id
                );
                return false;
            }
            let pass_id = state.pass_id + 1;
            *state = ReconcileState::begin(pass_id);
            pass_id
        };

        tracing::info!("[Reconcilor] Starting reconciliation pass {}", pass_id);
        let reconcilor = self.clone();
        tokio::spawn(async move {
            reconcilor.run_pass(pass_id).await;
        });
        true
    }

    /// Abandon the in-flight pass, if any. Its pending completions become no-ops.
    ///
    /// With no pass in flight the results of the last pass stay observable.
    pub fn abort_reconcile(&self) {
        let mut state = self.state.lock();
        if !state.started {
            return;
        }
        tracing::info!("[Reconcilor] Aborting reconciliation pass {}", state.pass_id);
        *state = ReconcileState::new(state.pass_id + 1);
    }

    /// Fetch the session account list into the current state.
    pub async fn get_accounts_from_cookie(&self) {
        let pass_id = self.state.lock().pass_id;
        self.fetch_gaia_accounts(pass_id).await;
    }

    /// Validate every chrome account into the current state.
    pub async fn validate_accounts_from_token_service(&self) {
        let pass_id = self.state.lock().pass_id;
        self.validate_chrome_accounts(pass_id).await;
    }

    /// Two-phase removal of `account` from the cookie session.
    ///
    /// Issues the removal, re-reads the session account list and hands the
    /// outcome to the executor. A successful read aborts the in-flight pass,
    /// whose inputs are now stale. On failure the next pass converges instead.
    pub async fn remove_account(&self, account: AccountId) {
        tracing::info!(
            "[Reconcilor] Removing {} from the session",
            mask_email(account.as_str())
        );
        self.executor.start_remove_action(&account);

        let result = fetch_session_accounts(self.transport.as_ref()).await;
        if result.is_ok() {
            self.abort_reconcile();
        }
        self.executor.finish_remove_action(&account, result.as_deref());
    }

    async fn run_pass(&self, pass_id: u64) {
        tokio::join!(
            self.fetch_gaia_accounts(pass_id),
            self.validate_chrome_accounts(pass_id)
        );
        self.finish_reconcile(pass_id);
    }

    async fn fetch_gaia_accounts(&self, pass_id: u64) {
        match fetch_session_accounts(self.transport.as_ref()).await {
            Ok(accounts) => {
                tracing::debug!("[Reconcilor] Session has {} account(s)", accounts.len());
                let mut state = self.state.lock();
                if state.pass_id != pass_id {
                    tracing::debug!("[Reconcilor] Dropping session accounts of stale pass {}", pass_id);
                    return;
                }
                state.set_gaia_accounts(accounts);
            }
            Err(e) => {
                tracing::warn!("[Reconcilor] Failed to list session accounts: {}", e);
            }
        }
    }

    async fn validate_chrome_accounts(&self, pass_id: u64) {
        validate_accounts(
            self.token_service.as_ref(),
            self.transport.as_ref(),
            |account, validity| {
                let mut state = self.state.lock();
                if state.pass_id == pass_id {
                    state.record_validity(account, validity);
                }
            },
        )
        .await;

        let mut state = self.state.lock();
        if state.pass_id == pass_id {
            state.tokens_checked = true;
        }
    }

    /// Runs once per pass, after both fetches have completed.
    fn finish_reconcile(&self, pass_id: u64) {
        let inputs = {
            let state = self.state.lock();
            if state.pass_id != pass_id || !state.started {
                tracing::debug!("[Reconcilor] Pass {} was aborted, skipping diff", pass_id);
                return;
            }
            if !state.is_ready() {
                tracing::warn!(
                    "[Reconcilor] Pass {} abandoned (gaia_accounts_set={}, tokens_checked={})",
                    pass_id,
                    state.gaia_accounts_set,
                    state.tokens_checked
                );
                None
            } else {
                Some((
                    state.gaia_accounts.clone(),
                    state.valid_accounts.clone(),
                    state.invalid_accounts.clone(),
                ))
            }
        };

        if let Some((gaia_accounts, valid_accounts, invalid_accounts)) = inputs {
            self.apply_diff(pass_id, &gaia_accounts, &valid_accounts, &invalid_accounts);
        }

        let mut state = self.state.lock();
        if state.pass_id == pass_id {
            state.started = false;
        }
    }

    fn apply_diff(
        &self,
        pass_id: u64,
        gaia_accounts: &[AccountId],
        valid_accounts: &BTreeSet<AccountId>,
        invalid_accounts: &BTreeSet<AccountId>,
    ) {
        let Some(primary) = self.signin.authenticated_account() else {
            tracing::info!("[Reconcilor] Pass {} deferred: no primary account", pass_id);
            return;
        };

        let actions =
            match compute_actions(&primary, gaia_accounts, valid_accounts, invalid_accounts) {
                Ok(actions) => actions,
                Err(e) => {
                    tracing::warn!("[Reconcilor] Pass {} deferred: {}", pass_id, e);
                    return;
                }
            };

        if actions.is_empty() {
            tracing::info!("[Reconcilor] Pass {} complete, session already converged", pass_id);
            return;
        }

        tracing::info!(
            "[Reconcilor] Pass {} issuing {} action(s)",
            pass_id,
            actions.len()
        );
        for action in &actions {
            dispatch(self.executor.as_ref(), action);
        }
    }

    // ── Introspection ──────────────────────────────────────────────────

    pub fn is_reconcile_started(&self) -> bool {
        self.state.lock().started
    }

    pub fn are_gaia_accounts_set(&self) -> bool {
        self.state.lock().gaia_accounts_set
    }

    pub fn are_all_refresh_tokens_checked(&self) -> bool {
        self.state.lock().tokens_checked
    }

    pub fn gaia_accounts(&self) -> Vec<AccountId> {
        self.state.lock().gaia_accounts.clone()
    }

    pub fn valid_accounts(&self) -> BTreeSet<AccountId> {
        self.state.lock().valid_accounts.clone()
    }

    pub fn invalid_accounts(&self) -> BTreeSet<AccountId> {
        self.state.lock().invalid_accounts.clone()
    }
}
