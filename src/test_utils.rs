// Test fakes
//
// Token service, session transport and recording executor shared by the
// engine and lifecycle tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};

use crate::models::AccountId;
use crate::modules::signin::SigninManager;
use crate::reconcilor::executor::ActionExecutor;
use crate::reconcilor::fetcher::FetchError;
use crate::reconcilor::services::{
    AuthError, SessionTransport, TokenService, TokenServiceEvent, TransportError, UserInfo,
};
use crate::reconcilor::AccountReconcilor;

/// Poll `condition` until it holds, failing the test after 5 seconds.
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 5s"
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// Account-listing body in the session endpoint's format.
pub fn list_accounts_body(emails: &[&str]) -> String {
    let entries: Vec<serde_json::Value> = emails
        .iter()
        .map(|email| serde_json::json!(["b", 0, "n", email, "p", 0, 0, 0]))
        .collect();
    serde_json::json!(["foo", entries]).to_string()
}

fn not_found() -> TransportError {
    TransportError::Status {
        status: 404,
        body: String::new(),
    }
}

// ============================================================================
// FakeTokenService
// ============================================================================

struct PendingRequest {
    account: AccountId,
    reply: oneshot::Sender<Result<String, AuthError>>,
}

/// Token service whose access token requests stay pending until the test
/// issues a token or an error for them.
pub struct FakeTokenService {
    credentials: Mutex<BTreeMap<AccountId, String>>,
    pending: Mutex<Vec<PendingRequest>>,
    auto_issue: AtomicBool,
    adoptions: Mutex<Vec<(AccountId, usize)>>,
    events: broadcast::Sender<TokenServiceEvent>,
}

impl FakeTokenService {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            credentials: Mutex::new(BTreeMap::new()),
            pending: Mutex::new(Vec::new()),
            auto_issue: AtomicBool::new(false),
            adoptions: Mutex::new(Vec::new()),
            events,
        }
    }

    /// Answer every future request immediately with `access-<account>`.
    pub fn auto_issue_tokens(&self) {
        self.auto_issue.store(true, Ordering::SeqCst);
    }

    pub fn update_credentials(&self, account: &str, refresh_token: &str) {
        let account = AccountId::new(account);
        self.credentials
            .lock()
            .insert(account.clone(), refresh_token.to_string());
        let _ = self
            .events
            .send(TokenServiceEvent::RefreshTokenAvailable(account));
    }

    pub fn revoke_credentials(&self, account: &str) {
        let account = AccountId::new(account);
        if self.credentials.lock().remove(&account).is_some() {
            let _ = self
                .events
                .send(TokenServiceEvent::RefreshTokenRevoked(account));
        }
    }

    pub fn pending_request_count(&self) -> usize {
        self.pending
            .lock()
            .iter()
            .filter(|request| !request.reply.is_closed())
            .count()
    }

    pub fn issue_all_tokens_for_account(&self, account: &str, access_token: &str) {
        let account = AccountId::new(account);
        self.resolve(|request| request.account == account, || Ok(access_token.to_string()));
    }

    pub fn issue_token_for_all_pending_requests(&self, access_token: &str) {
        self.resolve(|_| true, || Ok(access_token.to_string()));
    }

    pub fn issue_error_for_all_pending_requests(&self, error: AuthError) {
        self.resolve(|_| true, || Err(error.clone()));
    }

    pub fn adoptions(&self) -> Vec<(AccountId, usize)> {
        self.adoptions.lock().clone()
    }

    fn resolve(
        &self,
        matches: impl Fn(&PendingRequest) -> bool,
        reply: impl Fn() -> Result<String, AuthError>,
    ) {
        let mut pending = self.pending.lock();
        let (matched, rest): (Vec<_>, Vec<_>) = pending.drain(..).partition(|r| matches(r));
        *pending = rest;
        drop(pending);

        for request in matched {
            let _ = request.reply.send(reply());
        }
    }
}

#[async_trait]
impl TokenService for FakeTokenService {
    fn accounts(&self) -> Vec<AccountId> {
        self.credentials.lock().keys().cloned().collect()
    }

    fn refresh_token_is_available(&self, account: &AccountId) -> bool {
        self.credentials.lock().contains_key(account)
    }

    async fn request_access_token(&self, account: &AccountId) -> Result<String, AuthError> {
        if !self.refresh_token_is_available(account) {
            return Err(AuthError::InvalidGaiaCredentials);
        }
        if self.auto_issue.load(Ordering::SeqCst) {
            return Ok(format!("access-{}", account));
        }

        let (reply, response) = oneshot::channel();
        self.pending.lock().push(PendingRequest {
            account: account.clone(),
            reply,
        });
        response.await.unwrap_or(Err(AuthError::RequestCanceled))
    }

    fn subscribe(&self) -> broadcast::Receiver<TokenServiceEvent> {
        self.events.subscribe()
    }

    fn adopt_session_account(&self, account: &AccountId, session_index: usize) {
        self.adoptions.lock().push((account.clone(), session_index));
    }
}

// ============================================================================
// FakeSessionTransport
// ============================================================================

/// Session transport with canned responses. Unset responses fail with 404.
pub struct FakeSessionTransport {
    list_accounts: Mutex<Result<String, TransportError>>,
    user_info: Mutex<Result<UserInfo, TransportError>>,
    user_info_by_token: Mutex<HashMap<String, Result<UserInfo, TransportError>>>,
    list_calls: AtomicUsize,
    list_held: AtomicBool,
    list_waiters: Mutex<Vec<oneshot::Sender<()>>>,
    ops: Mutex<Vec<String>>,
}

impl FakeSessionTransport {
    pub fn new() -> Self {
        Self {
            list_accounts: Mutex::new(Err(not_found())),
            user_info: Mutex::new(Err(not_found())),
            user_info_by_token: Mutex::new(HashMap::new()),
            list_calls: AtomicUsize::new(0),
            list_held: AtomicBool::new(false),
            list_waiters: Mutex::new(Vec::new()),
            ops: Mutex::new(Vec::new()),
        }
    }

    pub fn set_list_accounts(&self, emails: &[&str]) {
        *self.list_accounts.lock() = Ok(list_accounts_body(emails));
    }

    pub fn set_list_accounts_response(&self, response: Result<String, TransportError>) {
        *self.list_accounts.lock() = response;
    }

    pub fn set_user_info_ok(&self, id: &str) {
        *self.user_info.lock() = Ok(UserInfo {
            id: id.to_string(),
            email: None,
            name: None,
        });
    }

    pub fn set_user_info_for_token(&self, token: &str, response: Result<UserInfo, TransportError>) {
        self.user_info_by_token
            .lock()
            .insert(token.to_string(), response);
    }

    pub fn list_accounts_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Park every subsequent ListAccounts call until `release_list_accounts`
    pub fn hold_list_accounts(&self) {
        self.list_held.store(true, Ordering::SeqCst);
    }

    /// Answer the parked ListAccounts calls and stop holding new ones
    pub fn release_list_accounts(&self) {
        self.list_held.store(false, Ordering::SeqCst);
        for waiter in self.list_waiters.lock().drain(..) {
            let _ = waiter.send(());
        }
    }

    pub fn pending_list_requests(&self) -> usize {
        self.list_waiters.lock().len()
    }

    /// Merge and logout calls in the order they reached the transport
    pub fn session_ops(&self) -> Vec<String> {
        self.ops.lock().clone()
    }
}

#[async_trait]
impl SessionTransport for FakeSessionTransport {
    async fn list_accounts(&self) -> Result<String, TransportError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.list_held.load(Ordering::SeqCst) {
            let (tx, rx) = oneshot::channel();
            self.list_waiters.lock().push(tx);
            let _ = rx.await;
        }
        self.list_accounts.lock().clone()
    }

    async fn user_info(&self, access_token: &str) -> Result<UserInfo, TransportError> {
        if let Some(response) = self.user_info_by_token.lock().get(access_token) {
            return response.clone();
        }
        self.user_info.lock().clone()
    }

    async fn merge_session(&self, access_token: &str) -> Result<(), TransportError> {
        self.ops.lock().push(format!("merge:{}", access_token));
        Ok(())
    }

    async fn logout(&self) -> Result<(), TransportError> {
        self.ops.lock().push("logout".to_string());
        Ok(())
    }
}

// ============================================================================
// RecordingExecutor
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedAction {
    Merge(AccountId),
    StartRemove(AccountId),
    FinishRemove {
        account: AccountId,
        remaining: Option<Vec<AccountId>>,
    },
    AddToChrome(AccountId, usize),
    LogoutAll,
}

/// Executor that records every primitive call instead of performing it.
pub struct RecordingExecutor {
    actions: Mutex<Vec<RecordedAction>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self {
            actions: Mutex::new(Vec::new()),
        }
    }

    pub fn actions(&self) -> Vec<RecordedAction> {
        self.actions.lock().clone()
    }

    fn record(&self, action: RecordedAction) {
        self.actions.lock().push(action);
    }
}

impl ActionExecutor for RecordingExecutor {
    fn perform_merge_action(&self, account: &AccountId) {
        self.record(RecordedAction::Merge(account.clone()));
    }

    fn start_remove_action(&self, account: &AccountId) {
        self.record(RecordedAction::StartRemove(account.clone()));
    }

    fn finish_remove_action(&self, account: &AccountId, result: Result<&[AccountId], &FetchError>) {
        self.record(RecordedAction::FinishRemove {
            account: account.clone(),
            remaining: result.ok().map(|accounts| accounts.to_vec()),
        });
    }

    fn perform_add_to_chrome_action(&self, account: &AccountId, session_index: usize) {
        self.record(RecordedAction::AddToChrome(account.clone(), session_index));
    }

    fn perform_logout_all_accounts_action(&self) {
        self.record(RecordedAction::LogoutAll);
    }
}

// ============================================================================
// Harness
// ============================================================================

/// A reconcilor wired to fakes.
pub struct Harness {
    pub token_service: Arc<FakeTokenService>,
    pub transport: Arc<FakeSessionTransport>,
    pub executor: Arc<RecordingExecutor>,
    pub signin: Arc<SigninManager>,
    pub reconcilor: AccountReconcilor,
}

impl Harness {
    pub fn signed_in(primary: &str) -> Self {
        Self::with_signin(SigninManager::with_authenticated(AccountId::new(primary)))
    }

    pub fn signed_out() -> Self {
        Self::with_signin(SigninManager::new())
    }

    fn with_signin(signin: SigninManager) -> Self {
        let token_service = Arc::new(FakeTokenService::new());
        let transport = Arc::new(FakeSessionTransport::new());
        let executor = Arc::new(RecordingExecutor::new());
        let signin = Arc::new(signin);
        let reconcilor = AccountReconcilor::new(
            token_service.clone(),
            transport.clone(),
            executor.clone(),
            signin.clone(),
        );
        Self {
            token_service,
            transport,
            executor,
            signin,
            reconcilor,
        }
    }
}
