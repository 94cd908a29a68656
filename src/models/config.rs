use serde::{Deserialize, Serialize};

/// Upper bound for any timer period read from config (one day)
pub const MAX_INTERVAL_SECS: u64 = 86_400;

// ============================================================================
// Reconciliation
// ============================================================================

/// Periodic reconciliation settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconcileConfig {
    /// When false, sign-in still registers with the token service but no timer runs
    pub enabled: bool,
    /// Seconds between periodic passes
    pub interval_secs: u64,
    /// Seconds between re-reads of accounts.json for credentials written by other processes
    pub account_sync_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 300,
            account_sync_secs: 10,
        }
    }
}

impl ReconcileConfig {
    pub fn interval(&self) -> std::time::Duration {
        bounded_secs(self.interval_secs)
    }

    pub fn account_sync_interval(&self) -> std::time::Duration {
        bounded_secs(self.account_sync_secs)
    }
}

fn bounded_secs(secs: u64) -> std::time::Duration {
    std::time::Duration::from_secs(secs.clamp(1, MAX_INTERVAL_SECS))
}

// ============================================================================
// Endpoints
// ============================================================================

/// Session and OAuth endpoints used by the fetchers and the action executor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GaiaEndpoints {
    pub list_accounts_url: String,
    pub user_info_url: String,
    pub merge_session_url: String,
    pub logout_url: String,
    pub token_url: String,
}

impl Default for GaiaEndpoints {
    fn default() -> Self {
        Self {
            list_accounts_url: "https://accounts.google.com/ListAccounts".to_string(),
            user_info_url: "https://www.googleapis.com/oauth2/v1/userinfo".to_string(),
            merge_session_url: "https://accounts.google.com/MergeSession".to_string(),
            logout_url: "https://accounts.google.com/Logout".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
        }
    }
}

/// OAuth client credentials used for the refresh grant
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct OAuthClientConfig {
    pub client_id: String,
    pub client_secret: String,
}

// ============================================================================
// AppConfig
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub endpoints: GaiaEndpoints,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default)]
    pub oauth_client: OAuthClientConfig,
    /// Primary account to sign in with on startup (headless mode)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_account: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_http_timeout_secs() -> u64 {
    30
}

impl AppConfig {
    pub fn new() -> Self {
        Self {
            log_level: default_log_level(),
            reconcile: ReconcileConfig::default(),
            endpoints: GaiaEndpoints::default(),
            http_timeout_secs: default_http_timeout_secs(),
            oauth_client: OAuthClientConfig::default(),
            primary_account: None,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}
