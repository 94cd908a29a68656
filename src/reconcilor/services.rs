// External collaborators consumed by the reconcilor
//
// - TokenService: owns refresh tokens, mints access tokens, broadcasts changes
// - SessionTransport: HTTP calls against the shared cookie session
//
// Both are injected as trait objects so tests can drive them with fakes.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::models::AccountId;

/// Failure to mint an access token for an account
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidGaiaCredentials,
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("request canceled")]
    RequestCanceled,
}

/// Failure of a session HTTP call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Network(String),
    #[error("unexpected HTTP status {status}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Malformed(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

/// Change notifications broadcast by the token service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenServiceEvent {
    RefreshTokenAvailable(AccountId),
    RefreshTokenRevoked(AccountId),
    RefreshTokensLoaded,
}

/// User-info endpoint response. Only `id` is required.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserInfo {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[async_trait]
pub trait TokenService: Send + Sync {
    /// Accounts for which a refresh token is currently held
    fn accounts(&self) -> Vec<AccountId>;

    fn refresh_token_is_available(&self, account: &AccountId) -> bool;

    /// Mint (or return a cached) access token for `account`.
    async fn request_access_token(&self, account: &AccountId) -> Result<String, AuthError>;

    /// Register for change notifications. Dropping the receiver unregisters.
    fn subscribe(&self) -> broadcast::Receiver<TokenServiceEvent>;

    /// Begin tracking an account that only exists in the session.
    fn adopt_session_account(&self, account: &AccountId, session_index: usize);
}

#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Raw body of the account-listing endpoint
    async fn list_accounts(&self) -> Result<String, TransportError>;

    async fn user_info(&self, access_token: &str) -> Result<UserInfo, TransportError>;

    /// Add the account owning `access_token` to the cookie session
    async fn merge_session(&self, access_token: &str) -> Result<(), TransportError>;

    /// Clear every account from the cookie session
    async fn logout(&self) -> Result<(), TransportError>;
}
