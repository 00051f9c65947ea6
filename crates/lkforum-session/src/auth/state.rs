use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::storage::TokenStore;
use super::token::is_token_expired;
use crate::models::User;

/// Auth state as seen by consumers of the session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct AuthState {
    pub user: Option<User>,
    pub token: Option<String>,
    pub is_authenticated: bool,
}

impl AuthState {
    /// State implied by whatever is currently persisted
    pub fn from_storage(storage: &TokenStore) -> Self {
        let token = storage.access_token();
        let user = storage.user();
        let is_authenticated = token.as_deref().map(|t| !is_token_expired(t)).unwrap_or(false);
        Self {
            user,
            token,
            is_authenticated,
        }
    }
}

/// Observable cell holding the current `AuthState`.
/// Clone is cheap; all clones publish to the same subscribers.
#[derive(Clone)]
pub struct AuthStore {
    tx: Arc<watch::Sender<AuthState>>,
}

impl AuthStore {
    pub fn new(initial: AuthState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn from_storage(storage: &TokenStore) -> Self {
        Self::new(AuthState::from_storage(storage))
    }

    pub fn current(&self) -> AuthState {
        self.tx.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.tx.borrow().is_authenticated
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.tx.subscribe()
    }

    pub fn set_authenticated(&self, user: User, token: String) {
        self.tx.send_replace(AuthState {
            user: Some(user),
            token: Some(token),
            is_authenticated: true,
        });
    }

    /// Swap in a refreshed access token, keeping the user
    pub fn set_token(&self, token: String) {
        self.tx.send_modify(|state| {
            state.token = Some(token);
            state.is_authenticated = true;
        });
    }

    pub fn clear(&self) {
        self.tx.send_replace(AuthState::default());
    }
}

impl Default for AuthStore {
    fn default() -> Self {
        Self::new(AuthState::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::token::token_expiring_in;
    use crate::models::Role;

    fn bob() -> User {
        User {
            id: "u2".to_string(),
            username: "bob".to_string(),
            email: None,
            role: Role::User,
        }
    }

    #[test]
    fn test_initial_state_from_empty_storage() {
        let store = AuthStore::from_storage(&TokenStore::in_memory());
        assert_eq!(store.current(), AuthState::default());
        assert!(!store.is_authenticated());
    }

    #[test]
    fn test_initial_state_with_fresh_token() {
        let storage = TokenStore::in_memory();
        let token = token_expiring_in("u2", 600);
        storage.save_session(&token, "r1", &bob());

        let state = AuthState::from_storage(&storage);
        assert_eq!(state.user, Some(bob()));
        assert_eq!(state.token.as_deref(), Some(token.as_str()));
        assert!(state.is_authenticated);
    }

    #[test]
    fn test_initial_state_with_expired_token() {
        let storage = TokenStore::in_memory();
        let token = token_expiring_in("u2", -600);
        storage.save_session(&token, "r1", &bob());

        // user and token are still reported, just not authenticated
        let state = AuthState::from_storage(&storage);
        assert_eq!(state.user, Some(bob()));
        assert_eq!(state.token, Some(token));
        assert!(!state.is_authenticated);
    }

    #[test]
    fn test_writers_notify_subscribers() {
        let store = AuthStore::default();
        let mut rx = store.subscribe();
        assert!(!rx.has_changed().unwrap());

        store.set_authenticated(bob(), "a1".to_string());
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_authenticated);

        store.set_token("a2".to_string());
        assert!(rx.has_changed().unwrap());
        {
            let state = rx.borrow_and_update();
            assert_eq!(state.token.as_deref(), Some("a2"));
            assert_eq!(state.user, Some(bob()));
        }

        store.clear();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow(), AuthState::default());
    }

    #[test]
    fn test_writes_without_subscribers_are_kept() {
        let store = AuthStore::default();
        store.set_authenticated(bob(), "a1".to_string());
        assert_eq!(store.current().token.as_deref(), Some("a1"));
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_value(AuthState::default()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "user": null, "token": null, "isAuthenticated": false })
        );
    }
}
