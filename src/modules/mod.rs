pub mod account;
pub mod config;
pub mod gaia;
pub mod logger;
pub mod oauth;
pub mod signin;

// Re-export commonly used functions
pub use account::{get_data_dir, AccountStore, StoreError};
pub use config::{load_app_config_in, save_app_config_in, ConfigError};
pub use logger::mask_email;
