// Action executor
//
// Corrective actions are computed as data (`ReconcileAction`) and dispatched
// through the `ActionExecutor` trait. Every primitive is a synchronous,
// fire-and-forget call so the engine's decisions can be recorded in tests
// without any network or cookie side effects.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::fetcher::FetchError;
use super::services::{SessionTransport, TokenService};
use crate::models::AccountId;
use crate::modules::mask_email;

/// A corrective action computed by the diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Add the account's session to the cookie jar
    Merge(AccountId),
    /// Ask the token service to track a session-only account
    AddToChrome {
        account: AccountId,
        session_index: usize,
    },
    /// Clear every account from the cookie jar
    LogoutAll,
}

pub trait ActionExecutor: Send + Sync {
    fn perform_merge_action(&self, account: &AccountId);

    /// First phase of a removal: the request has been issued.
    fn start_remove_action(&self, account: &AccountId);

    /// Second phase of a removal, with the session account list as it stands
    /// after the request or the error that prevented reading it.
    fn finish_remove_action(&self, account: &AccountId, result: Result<&[AccountId], &FetchError>);

    fn perform_add_to_chrome_action(&self, account: &AccountId, session_index: usize);

    fn perform_logout_all_accounts_action(&self);
}

/// Route one computed action to its executor primitive.
pub fn dispatch(executor: &dyn ActionExecutor, action: &ReconcileAction) {
    match action {
        ReconcileAction::Merge(account) => executor.perform_merge_action(account),
        ReconcileAction::AddToChrome {
            account,
            session_index,
        } => executor.perform_add_to_chrome_action(account, *session_index),
        ReconcileAction::LogoutAll => executor.perform_logout_all_accounts_action(),
    }
}

// ============================================================================
// Production executor
// ============================================================================

/// Session operation queued for the executor's worker
#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionOp {
    Merge(AccountId),
    LogoutAll,
    /// Log every account out, then merge back `remaining` minus `account`
    LogoutAccount {
        account: AccountId,
        remaining: Vec<AccountId>,
    },
}

/// Executor that applies actions to the real cookie session.
///
/// Session operations are queued and applied one at a time by a background
/// worker, so a logout issued before a merge is also applied before it.
pub struct GaiaActionExecutor {
    token_service: Arc<dyn TokenService>,
    ops_tx: mpsc::UnboundedSender<SessionOp>,
}

impl GaiaActionExecutor {
    /// Create the executor and spawn its worker. Must be called inside a tokio runtime.
    pub fn new(token_service: Arc<dyn TokenService>, transport: Arc<dyn SessionTransport>) -> Self {
        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_session_worker(token_service.clone(), transport, ops_rx));
        Self {
            token_service,
            ops_tx,
        }
    }

    fn enqueue(&self, op: SessionOp) {
        if self.ops_tx.send(op).is_err() {
            tracing::error!("[Executor] Session worker has stopped, dropping operation");
        }
    }
}

impl ActionExecutor for GaiaActionExecutor {
    fn perform_merge_action(&self, account: &AccountId) {
        tracing::info!("[Executor] Merge {}", mask_email(account.as_str()));
        self.enqueue(SessionOp::Merge(account.clone()));
    }

    fn start_remove_action(&self, account: &AccountId) {
        tracing::info!("[Executor] Removal requested for {}", mask_email(account.as_str()));
    }

    fn finish_remove_action(&self, account: &AccountId, result: Result<&[AccountId], &FetchError>) {
        match result {
            Ok(remaining) if remaining.contains(account) => {
                self.enqueue(SessionOp::LogoutAccount {
                    account: account.clone(),
                    remaining: remaining.to_vec(),
                });
            }
            Ok(_) => {
                tracing::debug!(
                    "[Executor] {} is not in the session, nothing to remove",
                    mask_email(account.as_str())
                );
            }
            Err(e) => {
                tracing::warn!(
                    "[Executor] Cannot remove {} yet, session list unavailable: {}",
                    mask_email(account.as_str()),
                    e
                );
            }
        }
    }

    fn perform_add_to_chrome_action(&self, account: &AccountId, session_index: usize) {
        tracing::info!(
            "[Executor] Add {} to chrome (session index {})",
            mask_email(account.as_str()),
            session_index
        );
        self.token_service
            .adopt_session_account(account, session_index);
    }

    fn perform_logout_all_accounts_action(&self) {
        tracing::info!("[Executor] Logout all session accounts");
        self.enqueue(SessionOp::LogoutAll);
    }
}

async fn run_session_worker(
    token_service: Arc<dyn TokenService>,
    transport: Arc<dyn SessionTransport>,
    mut ops_rx: mpsc::UnboundedReceiver<SessionOp>,
) {
    while let Some(op) = ops_rx.recv().await {
        match op {
            SessionOp::Merge(account) => {
                merge_account(token_service.as_ref(), transport.as_ref(), &account).await;
            }
            SessionOp::LogoutAll => logout_all(transport.as_ref()).await,
            SessionOp::LogoutAccount { account, remaining } => {
                logout_all(transport.as_ref()).await;
                for other in remaining.iter().filter(|a| **a != account) {
                    merge_account(token_service.as_ref(), transport.as_ref(), other).await;
                }
            }
        }
    }
    tracing::debug!("[Executor] Session worker stopped");
}

async fn merge_account(
    token_service: &dyn TokenService,
    transport: &dyn SessionTransport,
    account: &AccountId,
) {
    let access_token = match token_service.request_access_token(account).await {
        Ok(token) => token,
        Err(e) => {
            tracing::warn!(
                "[Executor] Merge of {} skipped, no access token: {}",
                mask_email(account.as_str()),
                e
            );
            return;
        }
    };

    if let Err(e) = transport.merge_session(&access_token).await {
        tracing::warn!(
            "[Executor] Merge of {} failed: {}",
            mask_email(account.as_str()),
            e
        );
    }
}

async fn logout_all(transport: &dyn SessionTransport) {
    if let Err(e) = transport.logout().await {
        tracing::warn!("[Executor] Logout failed: {}", e);
    }
}
