pub mod models;
pub mod modules;
pub mod reconcilor;

#[cfg(test)]
pub mod test_utils;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use models::{AccountId, AppConfig};
use modules::gaia::HttpSessionTransport;
use modules::oauth::build_http_client;
use modules::signin::SigninManager;
use modules::AccountStore;
use reconcilor::{AccountReconcilor, GaiaActionExecutor, LifecycleController, TokenService};

#[derive(Parser, Debug)]
#[command(name = "account_reconcilor")]
#[command(about = "Keeps the browser cookie session in step with the stored accounts")]
pub struct Cli {
    /// Override the data directory (accounts.json, config.json, logs)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Run the reconcilor until Ctrl-C (default)
    Run,
    /// Store a refresh token for an account
    AddAccount { email: String, refresh_token: String },
    /// Drop the refresh token of an account
    RemoveAccount { email: String },
    /// Print the accounts that hold a refresh token
    ListAccounts,
}

/// Parse the command line and run the selected command.
pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let data_dir = match cli.data_dir {
        Some(dir) => {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            dir
        }
        None => modules::get_data_dir().context("failed to resolve data directory")?,
    };
    let config = modules::load_app_config_in(&data_dir).context("failed to load config")?;
    let _log_guard = modules::logger::init_logger(&data_dir, &config.log_level)
        .context("failed to initialise logging")?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let rt = tokio::runtime::Runtime::new().context("failed to create Tokio runtime")?;
            rt.block_on(serve(data_dir, config))
        }
        command => {
            for line in run_account_command(&data_dir, &config, command)? {
                println!("{}", line);
            }
            Ok(())
        }
    }
}

fn open_store(data_dir: &Path, config: &AppConfig) -> AccountStore {
    AccountStore::new(
        data_dir.to_path_buf(),
        build_http_client(config.http_timeout_secs),
        config.endpoints.token_url.clone(),
        config.oauth_client.clone(),
    )
}

/// Edit accounts.json in place. A running reconcilor picks the change up on
/// its next disk sync.
fn run_account_command(
    data_dir: &Path,
    config: &AppConfig,
    command: Commands,
) -> anyhow::Result<Vec<String>> {
    let store = open_store(data_dir, config);
    store.load().context("failed to load accounts")?;

    match command {
        Commands::AddAccount {
            email,
            refresh_token,
        } => {
            let account = AccountId::new(&email);
            anyhow::ensure!(!account.is_empty(), "account email must not be empty");
            anyhow::ensure!(
                !refresh_token.trim().is_empty(),
                "refresh token must not be empty"
            );
            store
                .upsert_credentials(account.clone(), refresh_token.trim().to_string())
                .context("failed to save account")?;
            Ok(vec![format!("Stored refresh token for {}", account.as_str())])
        }
        Commands::RemoveAccount { email } => {
            let account = AccountId::new(&email);
            let removed = store
                .revoke_credentials(&account)
                .context("failed to save account")?;
            anyhow::ensure!(removed, "no refresh token stored for {}", account.as_str());
            Ok(vec![format!("Removed refresh token for {}", account.as_str())])
        }
        Commands::ListAccounts => Ok(store
            .accounts()
            .into_iter()
            .map(|account| account.as_str().to_string())
            .collect()),
        Commands::Run => Ok(Vec::new()),
    }
}

async fn serve(data_dir: PathBuf, config: AppConfig) -> anyhow::Result<()> {
    info!("Starting account reconcilor, data dir: {}", data_dir.display());

    let client = build_http_client(config.http_timeout_secs);
    let store = Arc::new(AccountStore::new(
        data_dir,
        client.clone(),
        config.endpoints.token_url.clone(),
        config.oauth_client.clone(),
    ));
    let transport = Arc::new(HttpSessionTransport::new(client, config.endpoints.clone()));
    let executor = Arc::new(GaiaActionExecutor::new(store.clone(), transport.clone()));

    let signin = Arc::new(match config.primary_account.as_deref() {
        Some(primary) if !primary.trim().is_empty() => {
            SigninManager::with_authenticated(AccountId::new(primary))
        }
        _ => SigninManager::new(),
    });
    if !signin.is_authenticated() {
        info!("No primary account configured, waiting for sign-in");
    }

    let reconcilor = AccountReconcilor::new(store.clone(), transport, executor, signin.clone());
    let controller =
        LifecycleController::new(reconcilor, store.clone(), signin, config.reconcile.clone());
    controller.spawn_event_loop();

    // Loaded after registration so the controller sees RefreshTokensLoaded
    let count = store.load().context("failed to load accounts")?;
    info!("Loaded {} account(s), reconcilor is running", count);

    let sync_cancel = CancellationToken::new();
    let sync_task = store.start_disk_sync(
        config.reconcile.account_sync_interval(),
        sync_cancel.clone(),
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("Shutting down");
    sync_cancel.cancel();
    let _ = sync_task.await;
    controller.shutdown().await;
    Ok(())
}
