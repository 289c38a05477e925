//! Token issuance, validation, rotation and revocation
//!
//! Lifecycle per token: `issued -> valid -> (expired | revoked)`.
//!
//! Validation checks run in a fixed order so the reported error is stable:
//!
//! 1. signature and structure ([`TokenCodec::decode`])
//! 2. token kind
//! 3. expiry (`now >= exp` is expired)
//! 4. revocation of the token id, or of the device behind the subject
//! 5. scope containment
//!
//! Refresh tokens are single-use. Presenting one that was already rotated is
//! a compromise signal: every outstanding token of the subject is revoked
//! before [`AuthError::ReuseDetected`] is returned. A rotation that races
//! such a sweep revokes the pair it just minted and reports the same error.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};
use uuid::Uuid;

use super::claims::{ScopeSet, TokenClaims, TokenKind};
use super::codec::TokenCodec;
use super::store::{MemoryRevocationStore, RevocationReason, RevocationStore, TrackedToken};
use crate::audit::{AuditEvent, AuditKind, AuditSink, EventOutcome, TracingAuditSink};
use crate::auth_metrics;
use crate::clock::Clock;
use crate::config::TokenConfig;
use crate::device::{DeviceRegistry, device_id_from_subject};
use crate::error::{AuthError, AuthResult};

/// Lifetimes and default grants
#[derive(Debug, Clone)]
pub struct AuthoritySettings {
    /// Access token lifetime
    pub access_ttl: Duration,
    /// Refresh token lifetime
    pub refresh_ttl: Duration,
    /// Scopes granted when the caller names none
    pub default_scopes: ScopeSet,
}

impl Default for AuthoritySettings {
    fn default() -> Self {
        Self::from(&TokenConfig::default())
    }
}

impl From<&TokenConfig> for AuthoritySettings {
    fn from(config: &TokenConfig) -> Self {
        Self {
            access_ttl: config.access_ttl(),
            refresh_ttl: config.refresh_ttl(),
            default_scopes: ScopeSet::new(&config.default_scopes),
        }
    }
}

/// A freshly minted token and its claims
#[derive(Clone)]
pub struct IssuedToken {
    /// Compact wire form
    pub token: String,
    /// Claims it carries
    pub claims: TokenClaims,
}

impl IssuedToken {
    /// Token id
    pub fn token_id(&self) -> &str {
        &self.claims.jti
    }

    /// Expiry, Unix seconds
    pub fn expires_at(&self) -> u64 {
        self.claims.exp
    }

    /// Access or refresh
    pub fn kind(&self) -> TokenKind {
        self.claims.typ
    }
}

impl std::fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedToken")
            .field("token", &"[REDACTED]")
            .field("claims", &self.claims)
            .finish()
    }
}

/// Access token plus its companion refresh token
#[derive(Debug, Clone)]
pub struct TokenPair {
    /// Bearer token
    pub access: IssuedToken,
    /// Single-use refresh token
    pub refresh: IssuedToken,
}

/// Issues and validates this deployment's tokens
#[derive(Debug)]
pub struct TokenAuthority {
    codec: Arc<TokenCodec>,
    devices: Arc<DeviceRegistry>,
    revocations: Arc<dyn RevocationStore>,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
    settings: AuthoritySettings,
}

impl TokenAuthority {
    /// Authority with in-memory revocation, tracing audit and default settings
    pub fn new(codec: Arc<TokenCodec>, devices: Arc<DeviceRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self {
            codec,
            devices,
            revocations: Arc::new(MemoryRevocationStore::new()),
            clock,
            audit: Arc::new(TracingAuditSink::default()),
            settings: AuthoritySettings::default(),
        }
    }

    /// Substitute the revocation store
    pub fn with_revocation_store(mut self, store: Arc<dyn RevocationStore>) -> Self {
        self.revocations = store;
        self
    }

    /// Substitute the audit sink
    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Replace lifetimes and default scopes
    pub fn with_settings(mut self, settings: AuthoritySettings) -> Self {
        self.settings = settings;
        self
    }

    /// Codec in use
    pub fn codec(&self) -> &Arc<TokenCodec> {
        &self.codec
    }

    /// Current settings
    pub fn settings(&self) -> &AuthoritySettings {
        &self.settings
    }

    /// Issue an access token
    ///
    /// An empty `scopes` set grants the configured defaults.
    ///
    /// # Errors
    ///
    /// [`AuthError::UnknownSubject`] when `subject` is a device that is not
    /// active, [`AuthError::InvalidRequest`] for a sub-second `ttl`.
    pub fn issue_access_token(
        &self,
        subject: &str,
        scopes: ScopeSet,
        ttl: Duration,
    ) -> AuthResult<IssuedToken> {
        self.ensure_issuable(subject, ttl)?;
        let scopes = self.or_default(scopes);
        self.mint(subject, scopes, ttl, TokenKind::Access, None)
    }

    /// Issue a generation-0 refresh token bound to the default scopes
    ///
    /// # Errors
    ///
    /// Same as [`TokenAuthority::issue_access_token`].
    pub fn issue_refresh_token(&self, subject: &str, ttl: Duration) -> AuthResult<IssuedToken> {
        self.ensure_issuable(subject, ttl)?;
        let scopes = self.settings.default_scopes.clone();
        self.mint(subject, scopes, ttl, TokenKind::Refresh, Some(0))
    }

    /// Issue an access token and a generation-0 refresh token with the same scopes
    ///
    /// # Errors
    ///
    /// Same as [`TokenAuthority::issue_access_token`].
    pub fn issue_token_pair(&self, subject: &str, scopes: ScopeSet) -> AuthResult<TokenPair> {
        let shortest = self.settings.access_ttl.min(self.settings.refresh_ttl);
        self.ensure_issuable(subject, shortest)?;
        let scopes = self.or_default(scopes);
        self.mint_pair(subject, scopes, 0)
    }

    /// Validate a bearer token and check that it grants `required_scopes`
    ///
    /// # Errors
    ///
    /// One of [`AuthError::MalformedToken`], [`AuthError::InvalidSignature`],
    /// [`AuthError::WrongTokenKind`], [`AuthError::Expired`],
    /// [`AuthError::Revoked`] or [`AuthError::InsufficientScope`], in that
    /// order of precedence.
    pub fn validate(&self, token: &str, required_scopes: &[&str]) -> AuthResult<TokenClaims> {
        let result = self.check_access(token, required_scopes);
        match &result {
            Ok(claims) => {
                auth_metrics::record_validation("ok");
                debug!(subject = %claims.sub, jti = %claims.jti, "Token validated");
            }
            Err(e) => {
                auth_metrics::record_validation(outcome_label(e));
                warn!(error = %e, "Token rejected");
            }
        }
        result
    }

    fn check_access(&self, token: &str, required_scopes: &[&str]) -> AuthResult<TokenClaims> {
        let claims = self.codec.decode(token)?;
        if claims.typ != TokenKind::Access {
            return Err(AuthError::WrongTokenKind {
                expected: TokenKind::Access.as_str(),
            });
        }
        if claims.is_expired_at(self.clock.now_unix()) {
            return Err(AuthError::Expired);
        }
        if self.revocations.revocation(&claims.jti).is_some() {
            return Err(AuthError::Revoked);
        }
        if let Some(device_id) = device_id_from_subject(&claims.sub)
            && !self.devices.is_active(device_id)
        {
            return Err(AuthError::Revoked);
        }
        let missing = claims.scope.missing(required_scopes);
        if !missing.is_empty() {
            return Err(AuthError::InsufficientScope { missing });
        }
        Ok(claims)
    }

    /// Exchange a refresh token for a new pair, revoking it
    ///
    /// # Errors
    ///
    /// Structural, signature, kind and expiry failures as in
    /// [`TokenAuthority::validate`]; [`AuthError::ReuseDetected`] when the
    /// token was already rotated (every token of the subject is revoked
    /// first), or when the subject was swept while the new pair was being
    /// minted (that pair is revoked); [`AuthError::Revoked`] for other
    /// revocations;
    /// [`AuthError::UnknownSubject`] when the device is no longer active.
    pub fn refresh(&self, refresh_token: &str) -> AuthResult<TokenPair> {
        let claims = self.codec.decode(refresh_token)?;
        if claims.typ != TokenKind::Refresh {
            return Err(AuthError::WrongTokenKind {
                expected: TokenKind::Refresh.as_str(),
            });
        }
        let now = self.clock.now_unix();
        if claims.is_expired_at(now) {
            return Err(AuthError::Expired);
        }
        if let Some(entry) = self.revocations.revocation(&claims.jti) {
            return Err(match entry.reason {
                RevocationReason::Rotated => self.reuse_detected(&claims, now),
                _ => AuthError::Revoked,
            });
        }
        if let Some(device_id) = device_id_from_subject(&claims.sub)
            && !self.devices.is_active(device_id)
        {
            self.audit_denied(&claims.sub, "device inactive");
            return Err(AuthError::UnknownSubject(claims.sub));
        }

        // Read before rotating so a sweep racing the mint below is visible
        let epoch = self.revocations.subject_epoch(&claims.sub);

        // Exactly one concurrent refresh of the same token gets past this
        if !self
            .revocations
            .revoke(&claims.jti, RevocationReason::Rotated, now)
        {
            return Err(self.reuse_detected(&claims, now));
        }

        let generation = claims.rotation_generation().saturating_add(1);
        let pair = self.mint_pair(&claims.sub, claims.scope.clone(), generation)?;

        if self.revocations.subject_epoch(&claims.sub) != epoch {
            warn!(
                subject = %claims.sub,
                jti = %claims.jti,
                "Subject swept during rotation, discarding new pair"
            );
            for jti in [pair.access.token_id(), pair.refresh.token_id()] {
                self.revoke_with_reason(jti, RevocationReason::SubjectCompromised, now);
            }
            return Err(AuthError::ReuseDetected);
        }

        self.audit.record(
            AuditEvent::new(AuditKind::TokenRefreshed, &claims.sub, EventOutcome::Success, now)
                .with_token_id(&claims.jti)
                .with_detail(format!("generation {generation}")),
        );
        debug!(subject = %claims.sub, generation, "Refresh token rotated");
        Ok(pair)
    }

    /// Revoke a token id; `true` when it was not revoked before
    pub fn revoke(&self, token_id: &str) -> bool {
        self.revoke_with_reason(token_id, RevocationReason::Explicit, self.clock.now_unix())
    }

    /// Revoke every outstanding token of `subject`, returning their ids
    ///
    /// Each swept token gets its own [`AuditKind::TokenRevoked`] event,
    /// followed by one [`AuditKind::SubjectRevoked`] summary.
    pub fn revoke_subject(&self, subject: &str) -> Vec<String> {
        let now = self.clock.now_unix();
        let revoked = self.revocations.revoke_subject(subject, now);
        for jti in &revoked {
            self.audit_revocation(jti, RevocationReason::SubjectCompromised, now);
        }
        self.audit.record(
            AuditEvent::new(AuditKind::SubjectRevoked, subject, EventOutcome::Success, now)
                .with_detail(format!("{} tokens revoked", revoked.len())),
        );
        revoked
    }

    /// Drop revocation bookkeeping for tokens past their natural expiry
    pub fn purge_expired(&self) -> usize {
        self.revocations.purge_expired(self.clock.now_unix())
    }

    fn reuse_detected(&self, claims: &TokenClaims, now: u64) -> AuthError {
        error!(
            subject = %claims.sub,
            jti = %claims.jti,
            generation = claims.rotation_generation(),
            "Refresh token reuse detected, revoking all tokens for subject"
        );
        self.audit.record(
            AuditEvent::new(
                AuditKind::RefreshReuseDetected,
                &claims.sub,
                EventOutcome::Denied,
                now,
            )
            .with_token_id(&claims.jti),
        );
        self.revoke_subject(&claims.sub);
        AuthError::ReuseDetected
    }

    fn revoke_with_reason(&self, token_id: &str, reason: RevocationReason, now: u64) -> bool {
        let newly = self.revocations.revoke(token_id, reason, now);
        if newly {
            self.audit_revocation(token_id, reason, now);
        }
        newly
    }

    /// Subject and scopes come from the issuance record when it is still tracked
    fn audit_revocation(&self, token_id: &str, reason: RevocationReason, now: u64) {
        let tracked = self.revocations.tracked(token_id);
        let subject = tracked.as_ref().map_or("", |t| t.subject.as_str());
        let mut event = AuditEvent::new(AuditKind::TokenRevoked, subject, EventOutcome::Success, now)
            .with_token_id(token_id)
            .with_detail(reason.to_string());
        if let Some(tracked) = &tracked {
            event = event.with_scopes(tracked.scopes.iter());
        }
        self.audit.record(event);
    }

    fn ensure_issuable(&self, subject: &str, ttl: Duration) -> AuthResult<()> {
        if subject.is_empty() {
            self.audit_denied(subject, "empty subject");
            return Err(AuthError::InvalidRequest("subject must not be empty".into()));
        }
        if ttl.as_secs() == 0 {
            self.audit_denied(subject, "ttl under one second");
            return Err(AuthError::InvalidRequest(
                "token lifetime must be at least one second".into(),
            ));
        }
        if let Some(device_id) = device_id_from_subject(subject)
            && !self.devices.is_active(device_id)
        {
            self.audit_denied(subject, "device inactive");
            warn!(subject = %subject, "Refusing to issue token for inactive device");
            return Err(AuthError::UnknownSubject(subject.to_string()));
        }
        Ok(())
    }

    fn or_default(&self, scopes: ScopeSet) -> ScopeSet {
        if scopes.is_empty() {
            self.settings.default_scopes.clone()
        } else {
            scopes
        }
    }

    fn mint_pair(&self, subject: &str, scopes: ScopeSet, generation: u32) -> AuthResult<TokenPair> {
        let access = self.mint(
            subject,
            scopes.clone(),
            self.settings.access_ttl,
            TokenKind::Access,
            None,
        )?;
        let refresh = self.mint(
            subject,
            scopes,
            self.settings.refresh_ttl,
            TokenKind::Refresh,
            Some(generation),
        )?;
        Ok(TokenPair { access, refresh })
    }

    fn mint(
        &self,
        subject: &str,
        scopes: ScopeSet,
        ttl: Duration,
        typ: TokenKind,
        generation: Option<u32>,
    ) -> AuthResult<IssuedToken> {
        let iat = self.clock.now_unix();
        let claims = TokenClaims {
            sub: subject.to_string(),
            scope: scopes,
            iat,
            exp: iat.saturating_add(ttl.as_secs()),
            jti: Uuid::new_v4().to_string(),
            typ,
            generation,
        };
        let token = self.codec.encode(&claims)?;
        self.revocations.track_issued(TrackedToken {
            jti: claims.jti.clone(),
            subject: claims.sub.clone(),
            scopes: claims.scope.clone(),
            expires_at: claims.exp,
        });

        let kind = match typ {
            TokenKind::Access => AuditKind::AccessTokenIssued,
            TokenKind::Refresh => AuditKind::RefreshTokenIssued,
        };
        self.audit.record(
            AuditEvent::new(kind, subject, EventOutcome::Success, iat)
                .with_token_id(&claims.jti)
                .with_scopes(claims.scope.iter()),
        );
        auth_metrics::record_token_issued(typ.as_str());
        debug!(subject = %subject, jti = %claims.jti, kind = %typ, exp = claims.exp, "Token issued");

        Ok(IssuedToken { token, claims })
    }

    fn audit_denied(&self, subject: &str, reason: &str) {
        self.audit.record(
            AuditEvent::new(
                AuditKind::IssuanceDenied,
                subject,
                EventOutcome::Denied,
                self.clock.now_unix(),
            )
            .with_detail(reason),
        );
    }
}

/// Metric label for a validation failure
fn outcome_label(error: &AuthError) -> &'static str {
    match error {
        AuthError::MalformedToken(_) => "malformed",
        AuthError::InvalidSignature => "invalid_signature",
        AuthError::Expired => "expired",
        AuthError::Revoked => "revoked",
        AuthError::InsufficientScope { .. } => "insufficient_scope",
        AuthError::WrongTokenKind { .. } => "wrong_kind",
        _ => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::clock::ManualClock;
    use crate::device::{DeviceAttributes, device_subject};
    use crate::token::keys::{KeyRing, SigningKey};
    use crate::token::store::RevocationEntry;

    const NOW: u64 = 1_700_000_000;

    struct Fixture {
        clock: ManualClock,
        audit: MemoryAuditSink,
        devices: Arc<DeviceRegistry>,
        authority: TokenAuthority,
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::at(NOW);
        let audit = MemoryAuditSink::new();
        let key = SigningKey::hmac("k1", b"unit-test-secret-0123456789abcdef").unwrap();
        let codec = Arc::new(TokenCodec::new(KeyRing::new(key)));
        let devices = Arc::new(
            DeviceRegistry::new(Arc::new(clock.clone())).with_audit_sink(Arc::new(audit.clone())),
        );
        let authority = TokenAuthority::new(codec, Arc::clone(&devices), Arc::new(clock.clone()))
            .with_audit_sink(Arc::new(audit.clone()));
        Fixture {
            clock,
            audit,
            devices,
            authority,
        }
    }

    fn scopes(s: &str) -> ScopeSet {
        ScopeSet::parse(s)
    }

    #[test]
    fn test_issue_and_validate_with_scopes() {
        let f = fixture();
        let token = f
            .authority
            .issue_access_token("user:1", scopes("export:create"), Duration::from_secs(3600))
            .unwrap();

        assert!(f.authority.validate(&token.token, &["export:create"]).is_ok());
        assert_eq!(
            f.authority.validate(&token.token, &["export:create", "admin"]),
            Err(AuthError::InsufficientScope {
                missing: vec!["admin".into()]
            })
        );
    }

    #[test]
    fn test_empty_scopes_grant_defaults() {
        let f = fixture();
        let token = f
            .authority
            .issue_access_token("user:1", ScopeSet::default(), Duration::from_secs(60))
            .unwrap();
        assert!(token.claims.scope.contains("export:create"));
    }

    #[test]
    fn test_expiry_boundary_is_exclusive() {
        let f = fixture();
        let token = f
            .authority
            .issue_access_token("user:1", scopes("a"), Duration::from_secs(10))
            .unwrap();

        f.clock.advance(Duration::from_secs(9));
        assert!(f.authority.validate(&token.token, &[]).is_ok());

        f.clock.advance(Duration::from_secs(1));
        assert_eq!(f.authority.validate(&token.token, &[]), Err(AuthError::Expired));
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let f = fixture();
        let err = f
            .authority
            .issue_access_token("user:1", scopes("a"), Duration::from_millis(500))
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidRequest(_)));
        assert_eq!(f.audit.events_of(AuditKind::IssuanceDenied).len(), 1);
    }

    #[test]
    fn test_revoked_token_rejected() {
        let f = fixture();
        let token = f
            .authority
            .issue_access_token("user:1", scopes("a"), Duration::from_secs(60))
            .unwrap();

        assert!(f.authority.revoke(token.token_id()));
        assert!(!f.authority.revoke(token.token_id()));
        assert_eq!(f.authority.validate(&token.token, &[]), Err(AuthError::Revoked));
        assert_eq!(f.audit.events_of(AuditKind::TokenRevoked).len(), 1);
    }

    #[test]
    fn test_check_order_expiry_before_revocation_before_scope() {
        let f = fixture();
        let token = f
            .authority
            .issue_access_token("user:1", scopes("a"), Duration::from_secs(60))
            .unwrap();
        f.authority.revoke(token.token_id());

        assert_eq!(f.authority.validate(&token.token, &["b"]), Err(AuthError::Revoked));
        f.clock.advance(Duration::from_secs(60));
        assert_eq!(f.authority.validate(&token.token, &["b"]), Err(AuthError::Expired));
    }

    #[test]
    fn test_refresh_token_is_not_a_bearer_token() {
        let f = fixture();
        let pair = f.authority.issue_token_pair("user:1", scopes("a")).unwrap();

        assert_eq!(
            f.authority.validate(&pair.refresh.token, &[]),
            Err(AuthError::WrongTokenKind { expected: "access" })
        );
        assert!(matches!(
            f.authority.refresh(&pair.access.token),
            Err(AuthError::WrongTokenKind { expected: "refresh" })
        ));
    }

    #[test]
    fn test_refresh_rotates_and_increments_generation() {
        let f = fixture();
        let pair = f.authority.issue_token_pair("user:1", scopes("a b")).unwrap();
        assert_eq!(pair.refresh.claims.generation, Some(0));

        let next = f.authority.refresh(&pair.refresh.token).unwrap();

        assert_eq!(next.refresh.claims.generation, Some(1));
        assert_eq!(next.access.claims.scope, scopes("a b"));
        assert_eq!(
            f.authority.refresh(&pair.refresh.token).unwrap_err(),
            AuthError::ReuseDetected
        );
    }

    #[test]
    fn test_reuse_revokes_whole_subject() {
        let f = fixture();
        let pair = f.authority.issue_token_pair("user:1", scopes("a")).unwrap();
        let other = f.authority.issue_token_pair("user:2", scopes("a")).unwrap();
        let next = f.authority.refresh(&pair.refresh.token).unwrap();

        assert_eq!(f.authority.refresh(&pair.refresh.token).unwrap_err(), AuthError::ReuseDetected);

        assert_eq!(f.authority.validate(&pair.access.token, &[]), Err(AuthError::Revoked));
        assert_eq!(f.authority.validate(&next.access.token, &[]), Err(AuthError::Revoked));
        assert_eq!(f.authority.refresh(&next.refresh.token).unwrap_err(), AuthError::Revoked);
        assert!(f.authority.validate(&other.access.token, &[]).is_ok());
        assert_eq!(f.audit.events_of(AuditKind::RefreshReuseDetected).len(), 1);
    }

    #[test]
    fn test_revocation_audit_carries_subject_and_scopes() {
        let f = fixture();
        let token = f
            .authority
            .issue_access_token("user:7", scopes("export:create"), Duration::from_secs(60))
            .unwrap();

        f.authority.revoke(token.token_id());

        let revoked = f.audit.events_of(AuditKind::TokenRevoked);
        assert_eq!(revoked.len(), 1);
        assert_eq!(revoked[0].subject, "user:7");
        assert_eq!(revoked[0].token_id.as_deref(), Some(token.token_id()));
        assert_eq!(revoked[0].scopes, vec!["export:create".to_string()]);
        assert_eq!(revoked[0].detail.as_deref(), Some("explicit"));
    }

    #[test]
    fn test_subject_sweep_audits_each_token() {
        let f = fixture();
        let pair = f.authority.issue_token_pair("user:8", scopes("a")).unwrap();

        let swept = f.authority.revoke_subject("user:8");
        assert_eq!(swept.len(), 2);

        let revoked = f.audit.events_of(AuditKind::TokenRevoked);
        let mut ids: Vec<&str> = revoked.iter().filter_map(|e| e.token_id.as_deref()).collect();
        ids.sort_unstable();
        let mut expected = vec![pair.access.token_id(), pair.refresh.token_id()];
        expected.sort_unstable();
        assert_eq!(ids, expected);
        assert!(revoked.iter().all(|e| e.subject == "user:8"
            && e.detail.as_deref() == Some("subject_compromised")));
        assert_eq!(f.audit.events_of(AuditKind::SubjectRevoked).len(), 1);
    }

    /// Sweeps the subject as soon as a rotation lands, before the new pair is minted
    #[derive(Debug, Default)]
    struct SweepOnRotate {
        inner: MemoryRevocationStore,
    }

    impl RevocationStore for SweepOnRotate {
        fn track_issued(&self, token: TrackedToken) {
            self.inner.track_issued(token);
        }

        fn tracked(&self, jti: &str) -> Option<TrackedToken> {
            self.inner.tracked(jti)
        }

        fn revoke(&self, jti: &str, reason: RevocationReason, now: u64) -> bool {
            let newly = self.inner.revoke(jti, reason, now);
            if newly
                && reason == RevocationReason::Rotated
                && let Some(token) = self.inner.tracked(jti)
            {
                self.inner.revoke_subject(&token.subject, now);
            }
            newly
        }

        fn revocation(&self, jti: &str) -> Option<RevocationEntry> {
            self.inner.revocation(jti)
        }

        fn revoke_subject(&self, subject: &str, now: u64) -> Vec<String> {
            self.inner.revoke_subject(subject, now)
        }

        fn subject_epoch(&self, subject: &str) -> u64 {
            self.inner.subject_epoch(subject)
        }

        fn purge_expired(&self, now: u64) -> usize {
            self.inner.purge_expired(now)
        }
    }

    #[test]
    fn test_rotation_racing_a_sweep_discards_new_pair() {
        let clock = ManualClock::at(NOW);
        let audit = MemoryAuditSink::new();
        let store = Arc::new(SweepOnRotate::default());
        let key = SigningKey::hmac("k1", b"unit-test-secret-0123456789abcdef").unwrap();
        let authority = TokenAuthority::new(
            Arc::new(TokenCodec::new(KeyRing::new(key))),
            Arc::new(DeviceRegistry::new(Arc::new(clock.clone()))),
            Arc::new(clock.clone()),
        )
        .with_revocation_store(store.clone())
        .with_audit_sink(Arc::new(audit.clone()));
        let pair = authority.issue_token_pair("user:9", scopes("a")).unwrap();

        assert_eq!(authority.refresh(&pair.refresh.token).unwrap_err(), AuthError::ReuseDetected);

        // The pair minted during the sweep never becomes usable
        let issued = audit.events_of(AuditKind::AccessTokenIssued);
        assert_eq!(issued.len(), 2);
        let late_access = issued[1].token_id.clone().unwrap();
        let late_refresh = audit.events_of(AuditKind::RefreshTokenIssued)[1]
            .token_id
            .clone()
            .unwrap();
        for jti in [&late_access, &late_refresh] {
            assert_eq!(
                store.revocation(jti).map(|e| e.reason),
                Some(RevocationReason::SubjectCompromised)
            );
        }
        assert!(audit.events_of(AuditKind::TokenRefreshed).is_empty());
    }

    #[test]
    fn test_inactive_device_cannot_get_or_use_tokens() {
        let f = fixture();
        let device = f
            .devices
            .register(DeviceAttributes::new().with("install_id", "i-1"))
            .unwrap();
        let subject = device_subject(&device.device_id);
        let pair = f.authority.issue_token_pair(&subject, scopes("a")).unwrap();

        f.devices.revoke(&device.device_id).unwrap();

        assert_eq!(f.authority.validate(&pair.access.token, &[]), Err(AuthError::Revoked));
        assert!(matches!(
            f.authority.refresh(&pair.refresh.token),
            Err(AuthError::UnknownSubject(_))
        ));
        assert!(matches!(
            f.authority.issue_access_token(&subject, scopes("a"), Duration::from_secs(60)),
            Err(AuthError::UnknownSubject(_))
        ));
        assert!(matches!(
            f.authority.issue_access_token("device:never-registered", scopes("a"), Duration::from_secs(60)),
            Err(AuthError::UnknownSubject(_))
        ));
    }

    #[test]
    fn test_issuance_is_audited() {
        let f = fixture();
        let pair = f.authority.issue_token_pair("user:1", scopes("export:create")).unwrap();

        let issued = f.audit.events_of(AuditKind::AccessTokenIssued);
        assert_eq!(issued.len(), 1);
        assert_eq!(issued[0].token_id.as_deref(), Some(pair.access.token_id()));
        assert_eq!(issued[0].scopes, vec!["export:create".to_string()]);
        assert_eq!(f.audit.events_of(AuditKind::RefreshTokenIssued).len(), 1);
    }

    #[test]
    fn test_debug_redacts_token() {
        let f = fixture();
        let token = f
            .authority
            .issue_access_token("user:1", scopes("a"), Duration::from_secs(60))
            .unwrap();
        assert!(!format!("{token:?}").contains(&token.token));
    }
}
