//! Revocation storage
//!
//! [`RevocationStore`] tracks issued token ids per subject and the set of
//! revoked ids. Entries live until the token's natural expiry; after that an
//! expired token is rejected on expiry grounds and the entry can go.
//!
//! Each subject also carries an epoch that every subject-wide revocation
//! bumps. A refresh compares the epoch before rotating with the epoch after
//! minting, so a sweep that lands between the two is never missed.

use std::collections::{HashMap, HashSet};
use std::fmt;

use parking_lot::RwLock;
use serde::Serialize;

use super::claims::ScopeSet;

/// Why a token was revoked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationReason {
    /// Revoked on request
    Explicit,
    /// Refresh token consumed by rotation
    Rotated,
    /// Swept by a subject-wide revocation
    SubjectCompromised,
}

impl fmt::Display for RevocationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Explicit => "explicit",
            Self::Rotated => "rotated",
            Self::SubjectCompromised => "subject_compromised",
        })
    }
}

/// A revoked token id
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevocationEntry {
    /// Token id
    pub jti: String,
    /// Why it was revoked
    pub reason: RevocationReason,
    /// Unix seconds
    pub revoked_at: u64,
    /// Natural expiry of the token; `u64::MAX` when never tracked
    pub expires_at: u64,
}

/// What the store remembers about an issued token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedToken {
    /// Token id
    pub jti: String,
    /// Subject it was issued to
    pub subject: String,
    /// Scopes it grants
    pub scopes: ScopeSet,
    /// Unix seconds
    pub expires_at: u64,
}

/// Storage for issued and revoked token ids
///
/// Implementations must make [`RevocationStore::revoke`] atomic: exactly one
/// of any number of concurrent calls for the same id returns `true`.
/// [`RevocationStore::revoke_subject`] must bump the subject's epoch in the
/// same critical section as the sweep.
pub trait RevocationStore: Send + Sync + fmt::Debug {
    /// Remember an issued token so it can be found by subject
    fn track_issued(&self, token: TrackedToken);

    /// Issuance record for a token id, while it is tracked
    fn tracked(&self, jti: &str) -> Option<TrackedToken>;

    /// Revoke a token id; `true` only for the first revocation
    fn revoke(&self, jti: &str, reason: RevocationReason, now: u64) -> bool;

    /// Revocation record for a token id
    fn revocation(&self, jti: &str) -> Option<RevocationEntry>;

    /// Revoke every tracked, unrevoked token of `subject`, returning their ids
    fn revoke_subject(&self, subject: &str, now: u64) -> Vec<String>;

    /// Number of subject-wide revocations `subject` has seen
    fn subject_epoch(&self, subject: &str) -> u64;

    /// Drop entries whose tokens have expired, returning how many went
    fn purge_expired(&self, now: u64) -> usize;
}

#[derive(Debug, Default)]
struct RevocationState {
    issued: HashMap<String, TrackedToken>,
    by_subject: HashMap<String, HashSet<String>>,
    revoked: HashMap<String, RevocationEntry>,
    epochs: HashMap<String, u64>,
}

impl RevocationState {
    fn revoke(&mut self, jti: &str, reason: RevocationReason, now: u64) -> bool {
        if self.revoked.contains_key(jti) {
            return false;
        }
        let expires_at = self.issued.get(jti).map_or(u64::MAX, |i| i.expires_at);
        self.revoked.insert(
            jti.to_string(),
            RevocationEntry {
                jti: jti.to_string(),
                reason,
                revoked_at: now,
                expires_at,
            },
        );
        true
    }
}

/// In-memory [`RevocationStore`]
#[derive(Debug, Default)]
pub struct MemoryRevocationStore {
    state: RwLock<RevocationState>,
}

impl MemoryRevocationStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of revoked ids currently held
    pub fn revoked_count(&self) -> usize {
        self.state.read().revoked.len()
    }

    /// Number of issued ids currently tracked
    pub fn tracked_count(&self) -> usize {
        self.state.read().issued.len()
    }
}

impl RevocationStore for MemoryRevocationStore {
    fn track_issued(&self, token: TrackedToken) {
        let mut state = self.state.write();
        state
            .by_subject
            .entry(token.subject.clone())
            .or_default()
            .insert(token.jti.clone());
        state.issued.insert(token.jti.clone(), token);
    }

    fn tracked(&self, jti: &str) -> Option<TrackedToken> {
        self.state.read().issued.get(jti).cloned()
    }

    fn revoke(&self, jti: &str, reason: RevocationReason, now: u64) -> bool {
        self.state.write().revoke(jti, reason, now)
    }

    fn revocation(&self, jti: &str) -> Option<RevocationEntry> {
        self.state.read().revoked.get(jti).cloned()
    }

    fn revoke_subject(&self, subject: &str, now: u64) -> Vec<String> {
        let mut state = self.state.write();
        *state.epochs.entry(subject.to_string()).or_default() += 1;
        let Some(jtis) = state.by_subject.get(subject).cloned() else {
            return Vec::new();
        };
        let mut revoked: Vec<String> = jtis
            .into_iter()
            .filter(|jti| state.revoke(jti, RevocationReason::SubjectCompromised, now))
            .collect();
        revoked.sort();
        revoked
    }

    fn subject_epoch(&self, subject: &str) -> u64 {
        self.state.read().epochs.get(subject).copied().unwrap_or(0)
    }

    fn purge_expired(&self, now: u64) -> usize {
        let mut state = self.state.write();
        let before = state.issued.len() + state.revoked.len();

        state.revoked.retain(|_, entry| entry.expires_at > now);

        let expired: Vec<(String, String)> = state
            .issued
            .iter()
            .filter(|(_, issued)| issued.expires_at <= now)
            .map(|(jti, issued)| (jti.clone(), issued.subject.clone()))
            .collect();
        for (jti, subject) in expired {
            state.issued.remove(&jti);
            if let Some(set) = state.by_subject.get_mut(&subject) {
                set.remove(&jti);
                if set.is_empty() {
                    state.by_subject.remove(&subject);
                    state.epochs.remove(&subject);
                }
            }
        }

        before - (state.issued.len() + state.revoked.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn tracked(jti: &str, subject: &str, expires_at: u64) -> TrackedToken {
        TrackedToken {
            jti: jti.to_string(),
            subject: subject.to_string(),
            scopes: ScopeSet::parse("export:create"),
            expires_at,
        }
    }

    #[test]
    fn test_first_revocation_wins() {
        let store = MemoryRevocationStore::new();
        store.track_issued(tracked("j1", "device:a", 500));

        assert!(store.revoke("j1", RevocationReason::Rotated, 10));
        assert!(!store.revoke("j1", RevocationReason::Explicit, 11));

        let entry = store.revocation("j1").unwrap();
        assert_eq!(entry.reason, RevocationReason::Rotated);
        assert_eq!(entry.revoked_at, 10);
        assert_eq!(entry.expires_at, 500);
    }

    #[test]
    fn test_untracked_revocation_never_expires() {
        let store = MemoryRevocationStore::new();
        assert!(store.revoke("ghost", RevocationReason::Explicit, 1));
        assert_eq!(store.purge_expired(u64::MAX - 1), 0);
        assert!(store.revocation("ghost").is_some());
    }

    #[test]
    fn test_revoke_subject_sweeps_only_that_subject() {
        let store = MemoryRevocationStore::new();
        store.track_issued(tracked("a1", "device:a", 100));
        store.track_issued(tracked("a2", "device:a", 100));
        store.track_issued(tracked("b1", "device:b", 100));
        store.revoke("a2", RevocationReason::Rotated, 1);

        let swept = store.revoke_subject("device:a", 2);

        assert_eq!(swept, vec!["a1".to_string()]);
        assert_eq!(store.revocation("a2").unwrap().reason, RevocationReason::Rotated);
        assert!(store.revocation("b1").is_none());
        assert!(store.revoke_subject("device:nobody", 3).is_empty());
    }

    #[test]
    fn test_subject_sweep_bumps_epoch() {
        let store = MemoryRevocationStore::new();
        store.track_issued(tracked("a1", "device:a", 100));
        assert_eq!(store.subject_epoch("device:a"), 0);

        store.revoke_subject("device:a", 1);
        // A sweep with nothing left to revoke still counts
        store.revoke_subject("device:a", 2);

        assert_eq!(store.subject_epoch("device:a"), 2);
        assert_eq!(store.subject_epoch("device:b"), 0);
        assert_eq!(store.tracked("a1").unwrap().subject, "device:a");
    }

    #[test]
    fn test_purge_drops_expired_entries() {
        let store = MemoryRevocationStore::new();
        store.track_issued(tracked("old", "s", 100));
        store.track_issued(tracked("new", "s", 300));
        store.revoke("old", RevocationReason::Explicit, 50);

        // "old" leaves both the issued index and the revoked set
        assert_eq!(store.purge_expired(100), 2);
        assert_eq!(store.tracked_count(), 1);
        assert_eq!(store.revoked_count(), 0);
        assert_eq!(store.revoke_subject("s", 150), vec!["new".to_string()]);
    }

    #[test]
    fn test_concurrent_revoke_has_single_winner() {
        let store = Arc::new(MemoryRevocationStore::new());
        store.track_issued(tracked("race", "s", 1000));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.revoke("race", RevocationReason::Rotated, 5))
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
