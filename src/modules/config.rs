use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::models::{AppConfig, GaiaEndpoints, ReconcileConfig, MAX_INTERVAL_SECS};

const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("endpoint {name} is not a valid http(s) URL: {url}")]
    InvalidEndpoint { name: &'static str, url: String },
    #[error("{name} must be between 1 and {max} seconds, got {value}")]
    InvalidInterval {
        name: &'static str,
        value: u64,
        max: u64,
    },
}

/// Load configuration from `data_dir`, persisting defaults when the file is missing
pub fn load_app_config_in(data_dir: &Path) -> Result<AppConfig, ConfigError> {
    let config_path = data_dir.join(CONFIG_FILE);

    if !config_path.exists() {
        let config = AppConfig::new();
        if let Err(e) = save_app_config_in(data_dir, &config) {
            tracing::warn!("Failed to persist default config: {}", e);
        }
        return Ok(config);
    }

    let content = fs::read_to_string(&config_path)?;
    let config: AppConfig = serde_json::from_str(&content)?;
    validate_endpoints(&config.endpoints)?;
    validate_intervals(&config.reconcile)?;
    Ok(config)
}

/// Reject timer periods that are zero or longer than a day
pub fn validate_intervals(reconcile: &ReconcileConfig) -> Result<(), ConfigError> {
    let named = [
        ("interval_secs", reconcile.interval_secs),
        ("account_sync_secs", reconcile.account_sync_secs),
    ];
    for (name, value) in named {
        if value == 0 || value > MAX_INTERVAL_SECS {
            return Err(ConfigError::InvalidInterval {
                name,
                value,
                max: MAX_INTERVAL_SECS,
            });
        }
    }
    Ok(())
}

/// Reject endpoints that are not absolute http(s) URLs
pub fn validate_endpoints(endpoints: &GaiaEndpoints) -> Result<(), ConfigError> {
    let named = [
        ("list_accounts_url", &endpoints.list_accounts_url),
        ("user_info_url", &endpoints.user_info_url),
        ("merge_session_url", &endpoints.merge_session_url),
        ("logout_url", &endpoints.logout_url),
        ("token_url", &endpoints.token_url),
    ];
    for (name, raw) in named {
        let valid = url::Url::parse(raw)
            .map(|parsed| matches!(parsed.scheme(), "http" | "https"))
            .unwrap_or(false);
        if !valid {
            return Err(ConfigError::InvalidEndpoint {
                name,
                url: raw.clone(),
            });
        }
    }
    Ok(())
}

/// Save application configuration to `data_dir`
pub fn save_app_config_in(data_dir: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    let content = serde_json::to_string_pretty(config)?;
    fs::write(data_dir.join(CONFIG_FILE), content)?;
    Ok(())
}
