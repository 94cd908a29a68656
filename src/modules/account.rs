use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::mask_email;
use super::oauth::refresh_access_token;
use crate::models::{
    AccountId, AccountIndex, AccountRecord, OAuthClientConfig, PendingAdoption, TokenData,
};
use crate::reconcilor::services::{AuthError, TokenService, TokenServiceEvent};

const DATA_DIR_NAME: &str = "account-reconcilor";
const DATA_DIR_ENV: &str = "ACCOUNT_RECONCILOR_DATA_DIR";
const ACCOUNTS_INDEX: &str = "accounts.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to resolve the platform data directory")]
    NoDataDir,
    #[error("account store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("account index serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Get data directory path (~/.local/share/account-reconcilor or platform equivalent)
pub fn get_data_dir() -> Result<PathBuf, StoreError> {
    // Support custom data directory via environment variable
    if let Ok(env_path) = std::env::var(DATA_DIR_ENV) {
        if !env_path.trim().is_empty() {
            let data_dir = PathBuf::from(env_path);
            fs::create_dir_all(&data_dir)?;
            return Ok(data_dir);
        }
    }

    let data_dir = dirs::data_dir()
        .ok_or(StoreError::NoDataDir)?
        .join(DATA_DIR_NAME);
    fs::create_dir_all(&data_dir)?;
    Ok(data_dir)
}

/// Parse the account index, treating a missing or blank file as empty
fn read_account_index_in_dir(data_dir: &Path) -> Result<AccountIndex, StoreError> {
    let index_path = data_dir.join(ACCOUNTS_INDEX);
    if !index_path.exists() {
        return Ok(AccountIndex::new());
    }

    let raw_content = fs::read(&index_path)?;
    let sanitized = sanitize_index_content(&raw_content);
    if sanitized.trim().is_empty() {
        tracing::warn!("[AccountStore] Account index is empty, starting fresh");
        return Ok(AccountIndex::new());
    }
    Ok(serde_json::from_str::<AccountIndex>(&sanitized)?)
}

/// Load the account index, starting empty when the file is missing or blank.
///
/// An unparseable index is moved aside to `accounts.json.corrupt.<uuid>` so the
/// user can recover refresh tokens by hand.
fn load_account_index_in_dir(data_dir: &Path) -> Result<AccountIndex, StoreError> {
    match read_account_index_in_dir(data_dir) {
        Ok(index) => {
            tracing::info!(
                "[AccountStore] Loaded index with {} account(s)",
                index.accounts.len()
            );
            Ok(index)
        }
        Err(StoreError::Serde(parse_err)) => {
            let index_path = data_dir.join(ACCOUNTS_INDEX);
            let backup = data_dir.join(format!("{}.corrupt.{}", ACCOUNTS_INDEX, Uuid::new_v4()));
            tracing::error!(
                "[AccountStore] Failed to parse account index: {}. Moving it to {}",
                parse_err,
                backup.display()
            );
            fs::rename(&index_path, &backup)?;
            Ok(AccountIndex::new())
        }
        Err(e) => Err(e),
    }
}

/// Save account index through a temp file and an atomic rename
fn save_account_index_in_dir(data_dir: &Path, index: &AccountIndex) -> Result<(), StoreError> {
    let index_path = data_dir.join(ACCOUNTS_INDEX);
    let temp_path = data_dir.join(format!("{}.tmp.{}", ACCOUNTS_INDEX, Uuid::new_v4()));

    let content = serde_json::to_string_pretty(index)?;

    if let Err(e) = fs::write(&temp_path, content) {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }

    if let Err(e) = fs::rename(&temp_path, &index_path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }

    Ok(())
}

fn sanitize_index_content(raw: &[u8]) -> String {
    // Skip UTF-8 BOM if present
    let without_bom = raw.strip_prefix(&[0xEF_u8, 0xBB, 0xBF][..]).unwrap_or(raw);

    // Skip leading NUL bytes
    let start = without_bom
        .iter()
        .position(|&b| b != 0x00)
        .unwrap_or(without_bom.len());

    String::from_utf8_lossy(&without_bom[start..]).into_owned()
}

// ============================================================================
// AccountStore
// ============================================================================

/// File-backed token service.
///
/// Holds one refresh token per account in `<data_dir>/accounts.json` and mints
/// access tokens through the OAuth refresh grant, caching them until they are
/// close to expiry.
pub struct AccountStore {
    data_dir: PathBuf,
    client: reqwest::Client,
    token_url: String,
    oauth_client: OAuthClientConfig,
    accounts: DashMap<AccountId, AccountRecord>,
    pending_adoptions: Mutex<Vec<PendingAdoption>>,
    /// Serializes index writes
    save_lock: Mutex<()>,
    events: broadcast::Sender<TokenServiceEvent>,
}

impl AccountStore {
    /// Create an empty store rooted at `data_dir`. Call [`AccountStore::load`]
    /// once subscribers are registered.
    pub fn new(
        data_dir: PathBuf,
        client: reqwest::Client,
        token_url: String,
        oauth_client: OAuthClientConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            data_dir,
            client,
            token_url,
            oauth_client,
            accounts: DashMap::new(),
            pending_adoptions: Mutex::new(Vec::new()),
            save_lock: Mutex::new(()),
            events,
        }
    }

    /// Read accounts.json and announce `RefreshTokensLoaded`.
    pub fn load(&self) -> Result<usize, StoreError> {
        let index = load_account_index_in_dir(&self.data_dir)?;

        self.accounts.clear();
        for record in index.accounts {
            if record.account_id.is_empty() {
                continue;
            }
            self.accounts.insert(record.account_id.clone(), record);
        }
        *self.pending_adoptions.lock() = index.pending_adoptions;

        let count = self.accounts.len();
        let _ = self.events.send(TokenServiceEvent::RefreshTokensLoaded);
        Ok(count)
    }

    /// Add or replace the refresh token for `account`.
    pub fn upsert_credentials(
        &self,
        account: AccountId,
        refresh_token: String,
    ) -> Result<(), StoreError> {
        match self.accounts.get_mut(&account) {
            Some(mut record) => {
                if record.refresh_token != refresh_token {
                    record.refresh_token = refresh_token;
                    record.token = None;
                }
                record.update_last_used();
            }
            None => {
                self.accounts.insert(
                    account.clone(),
                    AccountRecord::new(account.clone(), refresh_token),
                );
            }
        }
        self.pending_adoptions
            .lock()
            .retain(|pending| pending.account_id != account);
        self.save()?;

        tracing::info!(
            "[AccountStore] Refresh token available for {}",
            mask_email(account.as_str())
        );
        let _ = self
            .events
            .send(TokenServiceEvent::RefreshTokenAvailable(account));
        Ok(())
    }

    /// Drop the refresh token for `account`. Returns false if none was held.
    pub fn revoke_credentials(&self, account: &AccountId) -> Result<bool, StoreError> {
        if self.accounts.remove(account).is_none() {
            return Ok(false);
        }
        self.save()?;

        tracing::info!(
            "[AccountStore] Refresh token revoked for {}",
            mask_email(account.as_str())
        );
        let _ = self
            .events
            .send(TokenServiceEvent::RefreshTokenRevoked(account.clone()));
        Ok(true)
    }

    /// Pick up credentials written to accounts.json by another process.
    ///
    /// Accounts whose refresh token appeared or changed on disk are announced
    /// as available, accounts missing from disk as revoked. Cached access
    /// tokens survive when the refresh token is unchanged. Returns the number
    /// of events sent. A malformed index is left in place and reported.
    pub fn sync_from_disk(&self) -> Result<usize, StoreError> {
        let index = read_account_index_in_dir(&self.data_dir)?;
        let on_disk: BTreeMap<AccountId, AccountRecord> = index
            .accounts
            .into_iter()
            .filter(|record| !record.account_id.is_empty())
            .map(|record| (record.account_id.clone(), record))
            .collect();

        let mut events = Vec::new();
        let mut gone: Vec<AccountId> = self
            .accounts
            .iter()
            .filter(|entry| !on_disk.contains_key(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        gone.sort();
        for account in gone {
            if self.accounts.remove(&account).is_some() {
                events.push(TokenServiceEvent::RefreshTokenRevoked(account));
            }
        }

        for (account, record) in on_disk {
            let changed = match self.accounts.get_mut(&account) {
                Some(mut held) => {
                    if held.refresh_token == record.refresh_token {
                        false
                    } else {
                        *held = record;
                        true
                    }
                }
                None => {
                    self.accounts.insert(account.clone(), record);
                    true
                }
            };
            if changed {
                events.push(TokenServiceEvent::RefreshTokenAvailable(account));
            }
        }

        *self.pending_adoptions.lock() = index
            .pending_adoptions
            .into_iter()
            .filter(|pending| !self.accounts.contains_key(&pending.account_id))
            .collect();

        let count = events.len();
        for event in events {
            match &event {
                TokenServiceEvent::RefreshTokenAvailable(account) => tracing::info!(
                    "[AccountStore] Refresh token for {} changed on disk",
                    mask_email(account.as_str())
                ),
                TokenServiceEvent::RefreshTokenRevoked(account) => tracing::info!(
                    "[AccountStore] Refresh token for {} removed on disk",
                    mask_email(account.as_str())
                ),
                TokenServiceEvent::RefreshTokensLoaded => {}
            }
            let _ = self.events.send(event);
        }
        Ok(count)
    }

    /// Re-read accounts.json every `period` until `cancel` fires.
    pub fn start_disk_sync(
        self: &Arc<Self>,
        period: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("[AccountStore] Disk sync received cancel signal");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = store.sync_from_disk() {
                            tracing::warn!("[AccountStore] Failed to sync account index: {}", e);
                        }
                    }
                }
            }
        })
    }

    pub fn pending_adoptions(&self) -> Vec<PendingAdoption> {
        self.pending_adoptions.lock().clone()
    }

    fn save(&self) -> Result<(), StoreError> {
        let _guard = self.save_lock.lock();

        let mut accounts: Vec<AccountRecord> =
            self.accounts.iter().map(|entry| entry.value().clone()).collect();
        accounts.sort_by(|a, b| a.account_id.cmp(&b.account_id));

        let index = AccountIndex {
            accounts,
            pending_adoptions: self.pending_adoptions.lock().clone(),
            ..AccountIndex::new()
        };
        save_account_index_in_dir(&self.data_dir, &index)
    }

    fn cached_token(&self, account: &AccountId) -> Option<Result<String, String>> {
        let record = self.accounts.get(account)?;
        let now = chrono::Utc::now().timestamp();
        match &record.token {
            Some(token) if !token.needs_refresh(now) => Some(Ok(token.access_token.clone())),
            _ => Some(Err(record.refresh_token.clone())),
        }
    }
}

#[async_trait]
impl TokenService for AccountStore {
    fn accounts(&self) -> Vec<AccountId> {
        let mut accounts: Vec<AccountId> =
            self.accounts.iter().map(|entry| entry.key().clone()).collect();
        accounts.sort();
        accounts
    }

    fn refresh_token_is_available(&self, account: &AccountId) -> bool {
        self.accounts.contains_key(account)
    }

    async fn request_access_token(&self, account: &AccountId) -> Result<String, AuthError> {
        let refresh_token = match self.cached_token(account) {
            None => return Err(AuthError::InvalidGaiaCredentials),
            Some(Ok(access_token)) => return Ok(access_token),
            Some(Err(refresh_token)) => refresh_token,
        };

        tracing::debug!(
            "[AccountStore] Refreshing access token for {}",
            mask_email(account.as_str())
        );
        let response = refresh_access_token(
            &self.client,
            &self.token_url,
            &self.oauth_client,
            &refresh_token,
        )
        .await
        .map_err(|e| {
            tracing::warn!(
                "[AccountStore] Token refresh failed for {}: {}",
                mask_email(account.as_str()),
                e
            );
            AuthError::from(e)
        })?;

        let token = TokenData::new(
            response.access_token.clone(),
            response.expires_in,
            response.token_type,
        );
        let updated = match self.accounts.get_mut(account) {
            Some(mut record) => {
                record.token = Some(token);
                if let Some(rotated) = response.refresh_token {
                    record.refresh_token = rotated;
                }
                record.update_last_used();
                true
            }
            // Revoked while the refresh was in flight
            None => false,
        };
        if updated {
            if let Err(e) = self.save() {
                tracing::warn!("[AccountStore] Failed to persist refreshed token: {}", e);
            }
        }

        Ok(response.access_token)
    }

    fn subscribe(&self) -> broadcast::Receiver<TokenServiceEvent> {
        self.events.subscribe()
    }

    fn adopt_session_account(&self, account: &AccountId, session_index: usize) {
        if self.accounts.contains_key(account) {
            return;
        }
        {
            let mut pending = self.pending_adoptions.lock();
            if pending.iter().any(|p| &p.account_id == account) {
                return;
            }
            pending.push(PendingAdoption {
                account_id: account.clone(),
                session_index,
                requested_at: chrono::Utc::now().timestamp(),
            });
        }

        tracing::info!(
            "[AccountStore] Session account {} (index {}) awaiting credentials",
            mask_email(account.as_str()),
            session_index
        );
        if let Err(e) = self.save() {
            tracing::warn!("[AccountStore] Failed to persist adoption: {}", e);
        }
    }
}
