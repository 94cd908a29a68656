pub mod account;
pub mod config;
pub mod token;

pub use account::{AccountId, AccountIndex, AccountRecord, PendingAdoption};
pub use config::{
    AppConfig, GaiaEndpoints, OAuthClientConfig, ReconcileConfig, MAX_INTERVAL_SECS,
};
pub use token::TokenData;
