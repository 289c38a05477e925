//! Pending authorization sessions
//!
//! A session binds the `state` handed to the provider to the PKCE verifier
//! and redirect URI needed to finish the exchange. Sessions are stored under
//! the BLAKE3 digest of their state; the stored state is then compared with
//! the presented one in constant time.
//!
//! Completing an authorization takes the session out of the store under a
//! [`SessionLease`]. A lease that is dropped without being consumed puts the
//! session back, so a timed-out or cancelled exchange can be retried while a
//! concurrent completion of the same state finds nothing to take.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;
use tracing::debug;

/// One pending authorization
#[derive(Clone)]
pub struct OAuthSession {
    state: SecretString,
    code_verifier: Option<SecretString>,
    redirect_uri: String,
    created_at: Instant,
    expires_at: Instant,
}

impl OAuthSession {
    /// Create a session valid until `expires_at`
    pub fn new(
        state: SecretString,
        code_verifier: Option<SecretString>,
        redirect_uri: impl Into<String>,
        created_at: Instant,
        expires_at: Instant,
    ) -> Self {
        Self {
            state,
            code_verifier,
            redirect_uri: redirect_uri.into(),
            created_at,
            expires_at,
        }
    }

    /// Redirect URI the authorization was started with
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// PKCE verifier, when PKCE is in use
    pub fn code_verifier(&self) -> Option<&SecretString> {
        self.code_verifier.as_ref()
    }

    /// Creation time
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Whether the session has timed out at `now`
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

impl fmt::Debug for OAuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthSession")
            .field("state", &"[REDACTED]")
            .field("pkce", &self.code_verifier.is_some())
            .field("redirect_uri", &self.redirect_uri)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

type SessionKey = [u8; 32];

fn session_key(state: &str) -> SessionKey {
    *blake3::hash(state.as_bytes()).as_bytes()
}

/// Pending sessions keyed by state digest
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<SessionKey, OAuthSession>>,
}

impl SessionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a session under its state
    pub fn insert(&self, session: OAuthSession) {
        let key = session_key(session.state.expose_secret());
        self.sessions.lock().insert(key, session);
    }

    /// Store a session unless `capacity` unexpired sessions are already pending
    ///
    /// Expired sessions are purged first when the store is full. Returns
    /// `false`, leaving the store unchanged, when there is still no room.
    pub fn try_insert(&self, session: OAuthSession, capacity: usize, now: Instant) -> bool {
        let key = session_key(session.state.expose_secret());
        let mut sessions = self.sessions.lock();
        if sessions.len() >= capacity {
            sessions.retain(|_, s| !s.is_expired(now));
            if sessions.len() >= capacity {
                return false;
            }
        }
        sessions.insert(key, session);
        true
    }

    /// Take the session for `state` out of the store
    ///
    /// `None` when no session matches. The removal is atomic: of several
    /// concurrent calls for the same state, at most one gets a lease.
    pub fn take(self: &Arc<Self>, state: &str) -> Option<SessionLease> {
        let key = session_key(state);
        let mut sessions = self.sessions.lock();
        let matches = sessions.get(&key).is_some_and(|s| {
            bool::from(s.state.expose_secret().as_bytes().ct_eq(state.as_bytes()))
        });
        if !matches {
            return None;
        }
        let session = sessions.remove(&key)?;
        Some(SessionLease {
            session,
            store: Some(Arc::clone(self)),
        })
    }

    /// Drop sessions that have timed out, returning how many went
    pub fn purge_expired(&self, now: Instant) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(now));
        before - sessions.len()
    }

    /// Number of pending sessions
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Whether no session is pending
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    fn restore(&self, session: OAuthSession) {
        let key = session_key(session.state.expose_secret());
        self.sessions.lock().entry(key).or_insert(session);
    }
}

/// Exclusive hold on a session taken from the store
///
/// Dropping the lease returns the session to the store; call
/// [`SessionLease::consume`] once the outcome is definitive.
pub struct SessionLease {
    session: OAuthSession,
    store: Option<Arc<SessionStore>>,
}

impl SessionLease {
    /// The held session
    pub fn session(&self) -> &OAuthSession {
        &self.session
    }

    /// Destroy the session for good
    pub fn consume(mut self) {
        self.store = None;
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if let Some(store) = self.store.take() {
            debug!("Returning unfinished authorization session to the store");
            store.restore(self.session.clone());
        }
    }
}

impl fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionLease")
            .field("session", &self.session)
            .field("held", &self.store.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn session(state: &str, now: Instant) -> OAuthSession {
        OAuthSession::new(
            SecretString::new(state.to_string()),
            Some(SecretString::new("verifier".to_string())),
            "https://hooks.example.com/cb",
            now,
            now + Duration::from_secs(600),
        )
    }

    #[test]
    fn test_take_is_exclusive() {
        let store = Arc::new(SessionStore::new());
        store.insert(session("s1", Instant::now()));

        let lease = store.take("s1").unwrap();
        assert!(store.take("s1").is_none());
        lease.consume();
        assert!(store.take("s1").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_dropped_lease_restores_session() {
        let store = Arc::new(SessionStore::new());
        store.insert(session("s1", Instant::now()));

        drop(store.take("s1").unwrap());

        assert_eq!(store.len(), 1);
        assert!(store.take("s1").is_some());
    }

    #[test]
    fn test_unknown_state() {
        let store = Arc::new(SessionStore::new());
        store.insert(session("s1", Instant::now()));
        assert!(store.take("s2").is_none());
        assert!(store.take("").is_none());
    }

    #[test]
    fn test_purge_expired() {
        let store = Arc::new(SessionStore::new());
        let now = Instant::now();
        store.insert(session("old", now));
        store.insert(session("new", now + Duration::from_secs(300)));

        assert_eq!(store.purge_expired(now + Duration::from_secs(600)), 1);
        assert!(store.take("new").is_some());
    }

    #[test]
    fn test_try_insert_respects_capacity() {
        let store = SessionStore::new();
        let now = Instant::now();
        assert!(store.try_insert(session("a", now), 2, now));
        assert!(store.try_insert(session("b", now), 2, now));
        assert!(!store.try_insert(session("c", now), 2, now));
        assert_eq!(store.len(), 2);

        // Room is made from expired sessions only
        let later = now + Duration::from_secs(600);
        assert!(store.try_insert(session("d", later), 2, later));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_debug_hides_state() {
        let rendered = format!("{:?}", session("super-secret-state", Instant::now()));
        assert!(!rendered.contains("super-secret-state"));
    }
}
