//! Structured Audit Trail for Token and Device Events
//!
//! Every issuance and revocation performed by the guard is reported to an
//! [`AuditSink`]. Recording is fire-and-forget: a sink must return promptly
//! and must never block issuance or validation on its own I/O.
//!
//! ## Sinks
//!
//! - [`TracingAuditSink`] - emits events on the `audit::auth` tracing target
//! - [`ChannelAuditSink`] - hands events to a bounded channel for an async writer
//! - [`MemoryAuditSink`] - keeps events in memory (tests, inspection)
//! - [`NoopAuditSink`] - discards everything
//!
//! ## Usage
//!
//! ```rust
//! use hookguard_auth::audit::{AuditEvent, AuditKind, AuditSink, EventOutcome, TracingAuditSink};
//!
//! let sink = TracingAuditSink::new("webhook").with_identifier_hashing(true);
//! sink.record(AuditEvent::new(
//!     AuditKind::AccessTokenIssued,
//!     "device:4f1c",
//!     EventOutcome::Success,
//!     1_700_000_000,
//! ));
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Destination for audit events
pub trait AuditSink: Send + Sync + std::fmt::Debug {
    /// Record one event; must not block
    fn record(&self, event: AuditEvent);
}

/// What happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// Access token minted
    AccessTokenIssued,
    /// Refresh token minted
    RefreshTokenIssued,
    /// Issuance refused (inactive subject, bad ttl)
    IssuanceDenied,
    /// Refresh token exchanged for a new pair
    TokenRefreshed,
    /// Single token revoked
    TokenRevoked,
    /// A rotated refresh token was presented again
    RefreshReuseDetected,
    /// All outstanding tokens for a subject revoked
    SubjectRevoked,
    /// Device registered
    DeviceRegistered,
    /// Device revoked
    DeviceRevoked,
}

impl AuditKind {
    /// Stable snake_case name used in log fields
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AccessTokenIssued => "access_token_issued",
            Self::RefreshTokenIssued => "refresh_token_issued",
            Self::IssuanceDenied => "issuance_denied",
            Self::TokenRefreshed => "token_refreshed",
            Self::TokenRevoked => "token_revoked",
            Self::RefreshReuseDetected => "refresh_reuse_detected",
            Self::SubjectRevoked => "subject_revoked",
            Self::DeviceRegistered => "device_registered",
            Self::DeviceRevoked => "device_revoked",
        }
    }
}

/// Event outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventOutcome {
    /// Operation succeeded
    Success,
    /// Operation failed
    Failure,
    /// Operation was refused by policy
    Denied,
}

/// One audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique, time-ordered record id
    pub id: Uuid,
    /// Event kind
    pub kind: AuditKind,
    /// Principal the event concerns
    pub subject: String,
    /// Token id, when the event concerns a token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
    /// Scopes granted or requested
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
    /// Outcome
    pub outcome: EventOutcome,
    /// Free-form reason or context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Unix seconds
    pub timestamp: u64,
}

impl AuditEvent {
    /// Create an event with no token, scopes or detail
    pub fn new(
        kind: AuditKind,
        subject: impl Into<String>,
        outcome: EventOutcome,
        timestamp: u64,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind,
            subject: subject.into(),
            token_id: None,
            scopes: Vec::new(),
            outcome,
            detail: None,
            timestamp,
        }
    }

    /// Attach the token id
    pub fn with_token_id(mut self, token_id: impl Into<String>) -> Self {
        self.token_id = Some(token_id.into());
        self
    }

    /// Attach scopes
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Attach a reason
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Audit sink writing to the `audit::auth` tracing target
#[derive(Debug, Clone)]
pub struct TracingAuditSink {
    /// Service name for event attribution
    service_name: String,
    /// Whether to hash subjects and token ids
    hash_identifiers: bool,
}

impl TracingAuditSink {
    /// Create a sink for the given service name
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            hash_identifiers: false,
        }
    }

    /// Builder method to configure identifier hashing
    pub fn with_identifier_hashing(mut self, hash: bool) -> Self {
        self.hash_identifiers = hash;
        self
    }

    fn maybe_hash(&self, value: &str) -> String {
        if self.hash_identifiers {
            let hash = blake3::hash(value.as_bytes());
            format!("b3:{}", &hash.to_hex()[..16])
        } else {
            value.to_string()
        }
    }
}

impl Default for TracingAuditSink {
    fn default() -> Self {
        Self::new("hookguard")
    }
}

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        let subject = self.maybe_hash(&event.subject);
        let token_id = event.token_id.as_deref().map(|t| self.maybe_hash(t));
        let scopes = event.scopes.join(" ");
        let detail = event.detail.as_deref().unwrap_or("");

        match (event.kind, event.outcome) {
            (AuditKind::RefreshReuseDetected | AuditKind::SubjectRevoked, _) => {
                error!(
                    target: "audit::auth",
                    audit_id = %event.id,
                    event_type = event.kind.as_str(),
                    subject = %subject,
                    token_id = ?token_id,
                    detail = %detail,
                    service = %self.service_name,
                    "Credential compromise signal"
                );
            }
            (_, EventOutcome::Success) => {
                info!(
                    target: "audit::auth",
                    audit_id = %event.id,
                    event_type = event.kind.as_str(),
                    subject = %subject,
                    token_id = ?token_id,
                    scopes = %scopes,
                    service = %self.service_name,
                    "Audit event"
                );
            }
            (_, outcome) => {
                warn!(
                    target: "audit::auth",
                    audit_id = %event.id,
                    event_type = event.kind.as_str(),
                    outcome = ?outcome,
                    subject = %subject,
                    token_id = ?token_id,
                    scopes = %scopes,
                    detail = %detail,
                    service = %self.service_name,
                    "Audit event"
                );
            }
        }
    }
}

/// Audit sink that forwards events to a bounded channel
///
/// A consumer task owns the receiver and performs whatever I/O is needed.
/// When the channel is full or closed, events are dropped with a warning
/// rather than blocking the caller.
#[derive(Debug, Clone)]
pub struct ChannelAuditSink {
    tx: mpsc::Sender<AuditEvent>,
}

impl ChannelAuditSink {
    /// Create a sink and the receiver a writer task should drain
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<AuditEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl AuditSink for ChannelAuditSink {
    fn record(&self, event: AuditEvent) {
        if let Err(e) = self.tx.try_send(event) {
            warn!(error = %e, "Audit channel unavailable, dropping event");
        }
    }
}

/// In-memory sink
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl MemoryAuditSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    /// Events of one kind
    pub fn events_of(&self, kind: AuditKind) -> Vec<AuditEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    /// Drop everything recorded so far
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        self.events.lock().push(event);
    }
}

/// Sink used when auditing is switched off
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _event: AuditEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AuditEvent {
        AuditEvent::new(
            AuditKind::TokenRevoked,
            "device:abc",
            EventOutcome::Success,
            42,
        )
        .with_token_id("jti-1")
        .with_scopes(["export:create"])
        .with_detail("explicit")
    }

    #[test]
    fn test_identifier_hashing() {
        let sink = TracingAuditSink::new("test").with_identifier_hashing(true);
        let hashed = sink.maybe_hash("device:abc");
        assert!(hashed.starts_with("b3:"));
        assert_eq!(hashed.len(), 19); // "b3:" + 16 hex chars
        assert_eq!(TracingAuditSink::new("test").maybe_hash("x"), "x");
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert!(json.contains("\"kind\":\"token_revoked\""));
        assert!(json.contains("\"outcome\":\"success\""));
        assert!(json.contains("\"token_id\":\"jti-1\""));
    }

    #[test]
    fn test_memory_sink_filters_by_kind() {
        let sink = MemoryAuditSink::new();
        sink.record(sample());
        sink.record(AuditEvent::new(
            AuditKind::DeviceRegistered,
            "device:abc",
            EventOutcome::Success,
            43,
        ));

        assert_eq!(sink.events().len(), 2);
        assert_eq!(sink.events_of(AuditKind::TokenRevoked).len(), 1);
        sink.clear();
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_channel_sink_never_blocks_when_full() {
        let (sink, mut rx) = ChannelAuditSink::new(1);
        sink.record(sample());
        sink.record(sample()); // dropped, channel full

        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_tracing_sink_records_every_kind() {
        let sink = TracingAuditSink::default();
        for kind in [
            AuditKind::AccessTokenIssued,
            AuditKind::IssuanceDenied,
            AuditKind::RefreshReuseDetected,
        ] {
            sink.record(AuditEvent::new(kind, "user:1", EventOutcome::Denied, 0));
        }
    }
}
