// Sign-in manager
//
// Holds the profile's primary account and broadcasts sign-in / sign-out.
// The reconcilor only reads the primary account; the lifecycle controller
// subscribes to the events.

use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::models::AccountId;

use super::mask_email;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigninEvent {
    /// Sign-in completed. Also sent when the same account re-authenticates.
    SignedIn(AccountId),
    SignedOut(AccountId),
}

pub struct SigninManager {
    authenticated: RwLock<Option<AccountId>>,
    events: broadcast::Sender<SigninEvent>,
}

impl SigninManager {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            authenticated: RwLock::new(None),
            events,
        }
    }

    /// Manager for a profile that is already signed in
    pub fn with_authenticated(account: AccountId) -> Self {
        let manager = Self::new();
        *manager.authenticated.write() = Some(account);
        manager
    }

    pub fn authenticated_account(&self) -> Option<AccountId> {
        self.authenticated.read().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.read().is_some()
    }

    pub fn sign_in(&self, account: AccountId) {
        tracing::info!("[Signin] Signed in as {}", mask_email(account.as_str()));
        *self.authenticated.write() = Some(account.clone());
        let _ = self.events.send(SigninEvent::SignedIn(account));
    }

    pub fn sign_out(&self) {
        let previous = self.authenticated.write().take();
        if let Some(account) = previous {
            tracing::info!("[Signin] Signed out {}", mask_email(account.as_str()));
            let _ = self.events.send(SigninEvent::SignedOut(account));
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SigninEvent> {
        self.events.subscribe()
    }
}

impl Default for SigninManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sign_in_and_out_broadcast() {
        let manager = SigninManager::new();
        let mut events = manager.subscribe();

        manager.sign_in(AccountId::new("user@gmail.com"));
        assert_eq!(
            manager.authenticated_account(),
            Some(AccountId::new("user@gmail.com"))
        );
        manager.sign_out();
        assert!(!manager.is_authenticated());

        assert_eq!(
            events.recv().await.unwrap(),
            SigninEvent::SignedIn(AccountId::new("user@gmail.com"))
        );
        assert_eq!(
            events.recv().await.unwrap(),
            SigninEvent::SignedOut(AccountId::new("user@gmail.com"))
        );
    }

    #[test]
    fn test_sign_out_when_signed_out_is_silent() {
        let manager = SigninManager::new();
        let mut events = manager.subscribe();
        manager.sign_out();
        assert!(events.try_recv().is_err());
    }
}
