//! Authentication state and credential persistence
//!
//! The store is the single point of truth for the credential bundle: the
//! gateway and session never mutate credentials directly. Interested parties
//! subscribe for auth transitions instead of listening on an ambient global
//! signal; the process-wide "unauthorized" notification is a fire-and-forget
//! broadcast with no delivery-order guarantee.

mod storage;

pub use storage::{FileTokenStorage, MemoryTokenStorage, TokenStorage};

use crate::types::Identity;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};

/// Credential bundle persisted between sessions
///
/// Exactly one bundle may exist per client; absence means "anonymous".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialBundle {
    pub token_type: String,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Identity>,
}

impl CredentialBundle {
    /// Value for the `Authorization` header, `"{token_type} {access_token}"`
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

/// Auth state transition, delivered to all subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEvent {
    LoggedIn,
    LoggedOut,
    /// The backend rejected the credential; the bundle has been cleared and
    /// the user should be prompted to log in again.
    Unauthorized,
}

/// Holds the current credential bundle and notifies subscribers of changes
pub struct AuthStore {
    storage: Box<dyn TokenStorage>,
    current: RwLock<Option<CredentialBundle>>,
    events: broadcast::Sender<AuthEvent>,
}

impl AuthStore {
    /// Create a store over the given persistence backend, hydrating the
    /// current bundle from it.
    pub fn new(storage: Box<dyn TokenStorage>) -> Self {
        let current = storage.load();
        let (events, _) = broadcast::channel(16);
        Self {
            storage,
            current: RwLock::new(current),
            events,
        }
    }

    /// Store with in-process persistence only
    pub fn in_memory() -> Self {
        Self::new(Box::<MemoryTokenStorage>::default())
    }

    /// The current bundle, or `None` when anonymous
    pub async fn read(&self) -> Option<CredentialBundle> {
        self.current.read().await.clone()
    }

    /// Whether a usable access token is present
    pub async fn is_authenticated(&self) -> bool {
        self.current
            .read()
            .await
            .as_ref()
            .map(|b| !b.access_token.is_empty())
            .unwrap_or(false)
    }

    /// Persist a new bundle, replacing any prior one
    pub async fn write(&self, bundle: CredentialBundle) {
        if let Err(err) = self.storage.save(&bundle) {
            tracing::warn!(%err, "failed to persist credential bundle");
        }
        *self.current.write().await = Some(bundle);
        tracing::info!("credentials stored");
        let _ = self.events.send(AuthEvent::LoggedIn);
    }

    /// Attach the resolved identity to the current bundle
    pub async fn update_user(&self, user: Identity) {
        let mut current = self.current.write().await;
        if let Some(bundle) = current.as_mut() {
            bundle.user = Some(user);
            if let Err(err) = self.storage.save(bundle) {
                tracing::warn!(%err, "failed to persist credential bundle");
            }
        }
    }

    /// Remove the bundle on explicit logout
    pub async fn clear(&self) {
        if let Err(err) = self.storage.clear() {
            tracing::warn!(%err, "failed to clear persisted credentials");
        }
        *self.current.write().await = None;
        tracing::info!("credentials cleared");
        let _ = self.events.send(AuthEvent::LoggedOut);
    }

    /// Remove the bundle because the backend rejected it, and broadcast the
    /// unauthorized notification. Called by the gateway exactly once per
    /// failing call, within its response-error handling.
    pub async fn invalidate(&self) {
        if let Err(err) = self.storage.clear() {
            tracing::warn!(%err, "failed to clear persisted credentials");
        }
        *self.current.write().await = None;
        tracing::info!("credentials invalidated by backend");
        let _ = self.events.send(AuthEvent::Unauthorized);
    }

    /// Subscribe to auth transitions. Multiple subscribers are fine; delivery
    /// order between them is unspecified.
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(token: &str) -> CredentialBundle {
        CredentialBundle {
            token_type: "Bearer".to_string(),
            access_token: token.to_string(),
            refresh_token: Some("r1".to_string()),
            user: None,
        }
    }

    #[tokio::test]
    async fn write_read_clear() {
        let store = AuthStore::in_memory();
        assert!(!store.is_authenticated().await);

        store.write(bundle("tok")).await;
        assert!(store.is_authenticated().await);
        assert_eq!(
            store.read().await.unwrap().authorization_header(),
            "Bearer tok"
        );

        store.clear().await;
        assert!(store.read().await.is_none());
    }

    #[tokio::test]
    async fn empty_access_token_is_anonymous() {
        let store = AuthStore::in_memory();
        store.write(bundle("")).await;
        assert!(!store.is_authenticated().await);
    }

    #[tokio::test]
    async fn invalidate_broadcasts_unauthorized_and_clears() {
        let store = AuthStore::in_memory();
        store.write(bundle("tok")).await;

        let mut events = store.subscribe();
        store.invalidate().await;

        assert!(store.read().await.is_none());
        assert_eq!(events.try_recv().unwrap(), AuthEvent::Unauthorized);
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive() {
        let store = AuthStore::in_memory();
        let mut a = store.subscribe();
        let mut b = store.subscribe();

        store.write(bundle("tok")).await;

        assert_eq!(a.try_recv().unwrap(), AuthEvent::LoggedIn);
        assert_eq!(b.try_recv().unwrap(), AuthEvent::LoggedIn);
    }

    #[tokio::test]
    async fn update_user_attaches_identity() {
        let store = AuthStore::in_memory();
        store.write(bundle("tok")).await;
        store
            .update_user(Identity {
                id: "7".to_string(),
                username: "ada".to_string(),
                avatar_url: None,
            })
            .await;

        let user = store.read().await.unwrap().user.unwrap();
        assert_eq!(user.username, "ada");
    }
}
