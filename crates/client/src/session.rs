//! Session credentials with durable persistence.
//!
//! The access token and refresh token are stored together or not at all.
//! Every mutation funnels through [`Session::write`]; outside the crate only
//! login and logout can change credentials, and inside it only the refresh
//! coordinator rotates or clears them.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::storage::{self, CredentialStore};

pub const ACCESS_TOKEN_KEY: &str = "taskboard_access_token";
pub const REFRESH_TOKEN_KEY: &str = "taskboard_refresh_token";

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Process-wide session context. Cloning shares the same credentials.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    store: Arc<dyn CredentialStore>,
    current: RwLock<Option<Credentials>>,
    authenticated: watch::Sender<bool>,
}

impl Session {
    /// Restore credentials from `store`. A half-present pair is discarded.
    pub fn restore(store: Arc<dyn CredentialStore>) -> Self {
        let access = storage::load::<String>(store.as_ref(), ACCESS_TOKEN_KEY);
        let refresh = storage::load::<String>(store.as_ref(), REFRESH_TOKEN_KEY);
        let current = match (access, refresh) {
            (Some(access_token), Some(refresh_token)) => Some(Credentials {
                access_token,
                refresh_token,
            }),
            (None, None) => None,
            _ => {
                crate::log_warn!("discarding incomplete stored session credentials");
                store.remove(ACCESS_TOKEN_KEY);
                store.remove(REFRESH_TOKEN_KEY);
                None
            }
        };
        let (authenticated, _) = watch::channel(current.is_some());
        Self {
            inner: Arc::new(SessionInner {
                store,
                current: RwLock::new(current),
                authenticated,
            }),
        }
    }

    pub fn credentials(&self) -> Option<Credentials> {
        self.inner.current.read().ok()?.clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.credentials().map(|c| c.access_token)
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.credentials().map(|c| c.refresh_token)
    }

    pub fn is_authenticated(&self) -> bool {
        self.credentials().is_some()
    }

    /// Observe transitions between authenticated and anonymous.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.authenticated.subscribe()
    }

    /// Store credentials obtained from a successful login.
    pub fn login(&self, credentials: Credentials) {
        self.write(Some(credentials));
    }

    pub fn logout(&self) {
        self.write(None);
    }

    /// Replace the access token, and the refresh token when the server
    /// rotated it. Does nothing if the session was cleared meanwhile.
    pub(crate) fn rotate(&self, access_token: String, refresh_token: Option<String>) {
        let Some(current) = self.credentials() else {
            return;
        };
        self.write(Some(Credentials {
            access_token,
            refresh_token: refresh_token.unwrap_or(current.refresh_token),
        }));
    }

    pub(crate) fn clear(&self) {
        self.write(None);
    }

    fn write(&self, next: Option<Credentials>) {
        let store = &self.inner.store;
        match &next {
            Some(creds) => {
                let saved = storage::save(store.as_ref(), ACCESS_TOKEN_KEY, &creds.access_token)
                    .and_then(|_| storage::save(store.as_ref(), REFRESH_TOKEN_KEY, &creds.refresh_token));
                if let Err(e) = saved {
                    crate::log_error!("failed to persist session credentials: {}", e);
                    store.remove(ACCESS_TOKEN_KEY);
                    store.remove(REFRESH_TOKEN_KEY);
                }
            }
            None => {
                store.remove(ACCESS_TOKEN_KEY);
                store.remove(REFRESH_TOKEN_KEY);
            }
        }

        let authenticated = next.is_some();
        if let Ok(mut current) = self.inner.current.write() {
            *current = next;
        }
        self.inner.authenticated.send_if_modified(|prev| {
            let changed = *prev != authenticated;
            *prev = authenticated;
            changed
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn creds(access: &str, refresh: &str) -> Credentials {
        Credentials {
            access_token: access.to_string(),
            refresh_token: refresh.to_string(),
        }
    }

    #[test]
    fn login_persists_both_tokens() {
        let store = Arc::new(MemoryStore::new());
        let session = Session::restore(store.clone());
        session.login(creds("a1", "r1"));

        assert_eq!(store.load_raw(ACCESS_TOKEN_KEY).as_deref(), Some("\"a1\""));
        assert_eq!(
            storage::load::<String>(store.as_ref(), REFRESH_TOKEN_KEY).as_deref(),
            Some("r1")
        );

        let restored = Session::restore(store);
        assert_eq!(restored.credentials(), Some(creds("a1", "r1")));
    }

    #[test]
    fn restore_discards_token_without_refresh_token() {
        let store = Arc::new(MemoryStore::new());
        storage::save(store.as_ref(), ACCESS_TOKEN_KEY, &"orphan").unwrap();

        let session = Session::restore(store.clone());
        assert!(!session.is_authenticated());
        assert!(store.load_raw(ACCESS_TOKEN_KEY).is_none());
    }

    #[test]
    fn rotate_keeps_refresh_token_when_not_reissued() {
        let session = Session::restore(Arc::new(MemoryStore::new()));
        session.login(creds("a1", "r1"));
        session.rotate("a2".to_string(), None);
        assert_eq!(session.credentials(), Some(creds("a2", "r1")));
        session.rotate("a3".to_string(), Some("r3".to_string()));
        assert_eq!(session.credentials(), Some(creds("a3", "r3")));
    }

    #[test]
    fn rotate_after_logout_is_ignored() {
        let session = Session::restore(Arc::new(MemoryStore::new()));
        session.login(creds("a1", "r1"));
        session.logout();
        session.rotate("a2".to_string(), Some("r2".to_string()));
        assert!(session.credentials().is_none());
    }

    #[test]
    fn subscribers_see_auth_transitions() {
        let session = Session::restore(Arc::new(MemoryStore::new()));
        let rx = session.subscribe();
        assert!(!*rx.borrow());
        session.login(creds("a1", "r1"));
        assert!(*rx.borrow());
        session.clear();
        assert!(!*rx.borrow());
    }

    #[test]
    fn debug_output_redacts_tokens() {
        let text = format!("{:?}", creds("secret-a", "secret-r"));
        assert!(!text.contains("secret"));
    }
}
