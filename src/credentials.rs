//! Credential Store
//!
//! Holds the session credential (an opaque bearer token) and the
//! authenticated flag. The realtime core only ever reads from a store; the
//! account service and the front end write to it.
//!
//! Every write bumps a `watch` channel so the identity resolver can rebuild
//! connection parameters when the user logs in or out. A credential stored
//! with a lifetime arms a timer that bumps the channel again when it lapses,
//! so an expired token is never presented on the next connect.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

/// Default credential lifetime (the backend issues one-hour tokens).
pub const DEFAULT_CREDENTIAL_TTL: Duration = Duration::from_secs(3600);

/// Read access to the session credential.
pub trait CredentialStore: Send + Sync {
    /// Current bearer token, if one is stored and not expired.
    fn credential(&self) -> Option<String>;

    /// Whether the user is currently marked authenticated.
    fn is_authenticated(&self) -> bool;

    /// Receiver that is marked changed on every write to the store and
    /// whenever a stored credential expires.
    fn subscribe(&self) -> watch::Receiver<()>;
}

/// Profile returned by the backend on login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub usage_limit: Option<i64>,
    #[serde(default)]
    pub used_request: Option<i64>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

struct StoredCredential {
    token: String,
    expires_at: Option<Instant>,
}

impl StoredCredential {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Default)]
struct StoreState {
    credential: Option<StoredCredential>,
    user: Option<UserProfile>,
    authenticated: bool,
    /// Fires the change notification at `expires_at`
    expiry_timer: Option<JoinHandle<()>>,
}

/// In-memory credential store with expiry and change notification.
pub struct MemoryCredentialStore {
    state: RwLock<StoreState>,
    changed: Arc<watch::Sender<()>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        let (changed, _) = watch::channel(());
        Self {
            state: RwLock::new(StoreState::default()),
            changed: Arc::new(changed),
        }
    }

    /// Store a token without changing the authenticated flag.
    pub fn save_token(&self, token: impl Into<String>, ttl: Option<Duration>) {
        let expires_at = expiry(ttl);
        {
            let mut state = self.write();
            state.credential = Some(StoredCredential {
                token: token.into(),
                expires_at,
            });
            self.arm_expiry(&mut state, expires_at);
        }
        debug!(ttl = ?ttl, "Credential stored");
        self.notify();
    }

    /// Store a token and profile and mark the user authenticated.
    pub fn sign_in(&self, token: impl Into<String>, user: Option<UserProfile>, ttl: Option<Duration>) {
        let expires_at = expiry(ttl);
        {
            let mut state = self.write();
            state.credential = Some(StoredCredential {
                token: token.into(),
                expires_at,
            });
            state.user = user;
            state.authenticated = true;
            self.arm_expiry(&mut state, expires_at);
        }
        info!("Signed in");
        self.notify();
    }

    pub fn set_authenticated(&self, authenticated: bool) {
        let changed = {
            let mut state = self.write();
            let changed = state.authenticated != authenticated;
            state.authenticated = authenticated;
            changed
        };
        if changed {
            self.notify();
        }
    }

    /// Forget the token and profile.
    pub fn sign_out(&self) {
        {
            let mut state = self.write();
            state.credential = None;
            state.user = None;
            state.authenticated = false;
            self.arm_expiry(&mut state, None);
        }
        info!("Signed out");
        self.notify();
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.read().user.clone()
    }

    fn notify(&self) {
        self.changed.send_replace(());
    }

    /// Replace the pending expiry timer. Outside a runtime the lapse is only
    /// visible on read.
    fn arm_expiry(&self, state: &mut StoreState, expires_at: Option<Instant>) {
        if let Some(timer) = state.expiry_timer.take() {
            timer.abort();
        }
        let Some(at) = expires_at else {
            return;
        };
        let Ok(runtime) = Handle::try_current() else {
            debug!("No runtime, credential expiry will not be announced");
            return;
        };

        let changed = Arc::clone(&self.changed);
        state.expiry_timer = Some(runtime.spawn(async move {
            tokio::time::sleep_until(at).await;
            info!("Credential expired");
            changed.send_replace(());
        }));
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        match self.state.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for MemoryCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemoryCredentialStore {
    fn drop(&mut self) {
        let state = match self.state.get_mut() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(timer) = state.expiry_timer.take() {
            timer.abort();
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn credential(&self) -> Option<String> {
        let state = self.read();
        state
            .credential
            .as_ref()
            .filter(|c| !c.is_expired(Instant::now()))
            .map(|c| c.token.clone())
    }

    fn is_authenticated(&self) -> bool {
        let state = self.read();
        let live = state
            .credential
            .as_ref()
            .is_some_and(|c| !c.is_expired(Instant::now()));
        state.authenticated && live
    }

    fn subscribe(&self) -> watch::Receiver<()> {
        self.changed.subscribe()
    }
}

/// `None` (never expires) when no TTL is given or it overflows the clock.
fn expiry(ttl: Option<Duration>) -> Option<Instant> {
    Instant::now().checked_add(ttl?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_store() {
        let store = MemoryCredentialStore::new();
        assert_eq!(store.credential(), None);
        assert!(!store.is_authenticated());
    }

    #[test]
    fn test_sign_in_and_out() {
        let store = MemoryCredentialStore::new();
        store.sign_in("tok-1", None, Some(DEFAULT_CREDENTIAL_TTL));
        assert_eq!(store.credential().as_deref(), Some("tok-1"));
        assert!(store.is_authenticated());

        store.sign_out();
        assert_eq!(store.credential(), None);
        assert!(!store.is_authenticated());
    }

    #[test]
    fn test_saved_token_is_not_authenticated() {
        let store = MemoryCredentialStore::new();
        store.save_token("tok-1", None);
        assert_eq!(store.credential().as_deref(), Some("tok-1"));
        assert!(!store.is_authenticated());

        store.set_authenticated(true);
        assert!(store.is_authenticated());
    }

    #[test]
    fn test_expired_token_reads_as_absent() {
        let store = MemoryCredentialStore::new();
        store.sign_in("tok-1", None, Some(Duration::ZERO));
        assert_eq!(store.credential(), None);
        assert!(!store.is_authenticated());
    }

    #[tokio::test]
    async fn test_writes_notify_subscribers() {
        let store = MemoryCredentialStore::new();
        let mut rx = store.subscribe();

        store.sign_in("tok-1", None, None);
        assert!(rx.has_changed().unwrap());
        let _ = rx.borrow_and_update();

        store.set_authenticated(true);
        assert!(!rx.has_changed().unwrap(), "no-op flag write must not notify");

        store.sign_out();
        assert!(rx.has_changed().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_notifies_subscribers() {
        let store = MemoryCredentialStore::new();
        store.sign_in("tok-1", None, Some(Duration::from_secs(60)));
        let mut rx = store.subscribe();
        let _ = rx.borrow_and_update();

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert!(!rx.has_changed().unwrap());
        assert!(store.is_authenticated());

        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .expect("expiry not announced")
            .unwrap();
        assert_eq!(store.credential(), None);
        assert!(!store.is_authenticated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sign_out_cancels_expiry() {
        let store = MemoryCredentialStore::new();
        store.sign_in("tok-1", None, Some(Duration::from_secs(60)));
        store.sign_out();
        let mut rx = store.subscribe();
        let _ = rx.borrow_and_update();

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(!rx.has_changed().unwrap());
    }
}
