use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::models::OAuthClientConfig;
use crate::reconcilor::services::AuthError;

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: i64,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OAuthError {
    #[error("refresh request failed: {0}")]
    Network(String),
    #[error("token endpoint rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("refresh data parsing failed: {0}")]
    Parse(String),
}

impl From<OAuthError> for AuthError {
    fn from(e: OAuthError) -> Self {
        match e {
            OAuthError::Network(msg) => AuthError::ConnectionFailed(msg),
            // invalid_grant / invalid_client: the refresh token is no good
            OAuthError::Rejected { status: 400 | 401, .. } => AuthError::InvalidGaiaCredentials,
            OAuthError::Rejected { status, body } => {
                AuthError::ServiceUnavailable(format!("{}: {}", status, body))
            }
            OAuthError::Parse(msg) => AuthError::ServiceUnavailable(msg),
        }
    }
}

/// Create the HTTP client shared by the token store and the session transport.
///
/// The cookie store holds the web session the reconcilor keeps in sync.
pub fn build_http_client(timeout_secs: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .cookie_store(true)
        .build()
        .unwrap_or_default()
}

/// Refresh access_token using refresh_token
pub async fn refresh_access_token(
    client: &reqwest::Client,
    token_url: &str,
    oauth_client: &OAuthClientConfig,
    refresh_token: &str,
) -> Result<TokenResponse, OAuthError> {
    let params = [
        ("client_id", oauth_client.client_id.as_str()),
        ("client_secret", oauth_client.client_secret.as_str()),
        ("refresh_token", refresh_token),
        ("grant_type", "refresh_token"),
    ];

    let response = client
        .post(token_url)
        .form(&params)
        .send()
        .await
        .map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                OAuthError::Network(format!("{}. Cannot connect to auth server.", e))
            } else {
                OAuthError::Network(e.to_string())
            }
        })?;

    let status = response.status();
    if status.is_success() {
        let token_data = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| OAuthError::Parse(e.to_string()))?;

        info!(
            "Token refreshed successfully! Expires in: {} seconds",
            token_data.expires_in
        );
        Ok(token_data)
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(OAuthError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}
