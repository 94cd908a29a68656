// Lifecycle controller
//
// Owns the engine and the service handles. Sign-in drives registration with
// the token service and the periodic timer; sign-out tears both down and
// aborts the in-flight pass.
//
// Token service notifications are forwarded from their broadcast channel into
// the controller's mpsc event channel while registered. The event loop drains
// that channel together with the sign-in manager's broadcasts.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::engine::AccountReconcilor;
use super::services::{TokenService, TokenServiceEvent};
use crate::models::{AccountId, ReconcileConfig};
use crate::modules::mask_email;
use crate::modules::signin::{SigninEvent, SigninManager};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcilorEvent {
    SignedIn(AccountId),
    SignedOut,
    RefreshTokenAvailable(AccountId),
    RefreshTokenRevoked(AccountId),
    RefreshTokensLoaded,
}

impl From<TokenServiceEvent> for ReconcilorEvent {
    fn from(event: TokenServiceEvent) -> Self {
        match event {
            TokenServiceEvent::RefreshTokenAvailable(account) => Self::RefreshTokenAvailable(account),
            TokenServiceEvent::RefreshTokenRevoked(account) => Self::RefreshTokenRevoked(account),
            TokenServiceEvent::RefreshTokensLoaded => Self::RefreshTokensLoaded,
        }
    }
}

impl From<SigninEvent> for ReconcilorEvent {
    fn from(event: SigninEvent) -> Self {
        match event {
            SigninEvent::SignedIn(account) => Self::SignedIn(account),
            SigninEvent::SignedOut(_) => Self::SignedOut,
        }
    }
}

struct BackgroundTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    fn stop(self) -> JoinHandle<()> {
        self.cancel.cancel();
        self.handle
    }
}

pub struct LifecycleController {
    reconcilor: AccountReconcilor,
    token_service: Arc<dyn TokenService>,
    signin: Arc<SigninManager>,
    config: ReconcileConfig,
    events_tx: mpsc::UnboundedSender<ReconcilorEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<ReconcilorEvent>>>,
    registration: Mutex<Option<BackgroundTask>>,
    periodic: Mutex<Option<BackgroundTask>>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
    cancel_token: CancellationToken,
}

impl LifecycleController {
    /// Build the controller. A profile that is already signed in is treated as
    /// if sign-in just completed. Must be called inside a tokio runtime.
    pub fn new(
        reconcilor: AccountReconcilor,
        token_service: Arc<dyn TokenService>,
        signin: Arc<SigninManager>,
        config: ReconcileConfig,
    ) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let controller = Arc::new(Self {
            reconcilor,
            token_service,
            signin,
            config,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            registration: Mutex::new(None),
            periodic: Mutex::new(None),
            event_loop: Mutex::new(None),
            cancel_token: CancellationToken::new(),
        });

        if let Some(primary) = controller.signin.authenticated_account() {
            controller.on_signed_in(&primary);
        }
        controller
    }

    pub fn reconcilor(&self) -> &AccountReconcilor {
        &self.reconcilor
    }

    /// Sender for injecting events into the controller's queue
    pub fn event_sender(&self) -> mpsc::UnboundedSender<ReconcilorEvent> {
        self.events_tx.clone()
    }

    /// Sign-in completed. Re-authentication of a running profile is a no-op.
    pub fn on_signed_in(&self, account: &AccountId) {
        if self.is_registered_with_token_service() && self.is_periodic_reconciliation_running() {
            tracing::debug!(
                "[Lifecycle] {} re-authenticated, already running",
                mask_email(account.as_str())
            );
            return;
        }

        tracing::info!(
            "[Lifecycle] Signed in as {}, starting reconciliation",
            mask_email(account.as_str())
        );
        self.register_with_token_service();
        if self.config.enabled {
            self.start_periodic_reconciliation();
        }
    }

    pub fn on_signed_out(&self) {
        tracing::info!("[Lifecycle] Signed out, stopping reconciliation");
        self.unregister_with_token_service();
        self.stop_periodic_reconciliation();
        self.reconcilor.abort_reconcile();
    }

    pub fn handle_event(&self, event: ReconcilorEvent) {
        match event {
            ReconcilorEvent::SignedIn(account) => self.on_signed_in(&account),
            ReconcilorEvent::SignedOut => self.on_signed_out(),
            ReconcilorEvent::RefreshTokensLoaded => {
                if self.is_registered_with_token_service() {
                    self.reconcilor.start_reconcile();
                }
            }
            ReconcilorEvent::RefreshTokenAvailable(account) => {
                // Picked up by the next pass
                tracing::debug!(
                    "[Lifecycle] Refresh token available for {}",
                    mask_email(account.as_str())
                );
            }
            ReconcilorEvent::RefreshTokenRevoked(account) => {
                if !self.is_registered_with_token_service() {
                    return;
                }
                let reconcilor = self.reconcilor.clone();
                tokio::spawn(async move {
                    reconcilor.remove_account(account).await;
                });
            }
        }
    }

    /// Start draining the event queue and the sign-in broadcasts.
    ///
    /// Returns false if the loop was already started.
    pub fn spawn_event_loop(self: &Arc<Self>) -> bool {
        let Some(mut events_rx) = self.events_rx.lock().take() else {
            tracing::warn!("[Lifecycle] Event loop already running");
            return false;
        };
        let mut signin_rx = self.signin.subscribe();
        let cancel = self.cancel_token.clone();
        let controller = self.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("[Lifecycle] Event loop received cancel signal");
                        break;
                    }
                    Some(event) = events_rx.recv() => controller.handle_event(event),
                    received = signin_rx.recv() => match received {
                        Ok(event) => controller.handle_event(event.into()),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!("[Lifecycle] Missed {} sign-in event(s)", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });
        *self.event_loop.lock() = Some(handle);
        true
    }

    /// Stop every background task and wait for them to exit.
    pub async fn shutdown(&self) {
        self.cancel_token.cancel();
        self.reconcilor.abort_reconcile();

        let handles: Vec<JoinHandle<()>> = [
            self.registration.lock().take().map(BackgroundTask::stop),
            self.periodic.lock().take().map(BackgroundTask::stop),
            self.event_loop.lock().take(),
        ]
        .into_iter()
        .flatten()
        .collect();

        for handle in handles {
            let _ = handle.await;
        }
        tracing::info!("[Lifecycle] Shut down");
    }

    pub fn is_periodic_reconciliation_running(&self) -> bool {
        self.periodic.lock().is_some()
    }

    pub fn is_registered_with_token_service(&self) -> bool {
        self.registration.lock().is_some()
    }

    fn register_with_token_service(&self) {
        let mut registration = self.registration.lock();
        if registration.is_some() {
            return;
        }

        let mut token_events = self.token_service.subscribe();
        let events_tx = self.events_tx.clone();
        let cancel = self.cancel_token.child_token();
        let task_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    received = token_events.recv() => match received {
                        Ok(event) => {
                            if events_tx.send(event.into()).is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!("[Lifecycle] Missed {} token event(s)", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        *registration = Some(BackgroundTask { cancel, handle });
        tracing::debug!("[Lifecycle] Registered with token service");
    }

    fn unregister_with_token_service(&self) {
        if let Some(task) = self.registration.lock().take() {
            let _ = task.stop();
            tracing::debug!("[Lifecycle] Unregistered from token service");
        }
    }

    fn start_periodic_reconciliation(&self) {
        let mut periodic = self.periodic.lock();
        if periodic.is_some() {
            return;
        }

        let period = self.config.interval();
        let reconcilor = self.reconcilor.clone();
        let cancel = self.cancel_token.child_token();
        let task_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = interval.tick() => {
                        reconcilor.start_reconcile();
                    }
                }
            }
        });

        *periodic = Some(BackgroundTask { cancel, handle });
        tracing::info!(
            "[Lifecycle] Periodic reconciliation started (interval: {}s)",
            period.as_secs()
        );
    }

    fn stop_periodic_reconciliation(&self) {
        if let Some(task) = self.periodic.lock().take() {
            let _ = task.stop();
            tracing::info!("[Lifecycle] Periodic reconciliation stopped");
        }
    }
}

impl Drop for LifecycleController {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
