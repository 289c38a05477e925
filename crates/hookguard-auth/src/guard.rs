//! Boundary facade
//!
//! [`Guard`] wires every component together and exposes the operations a
//! request handler needs. [`Guard::authenticate`] implements the request
//! path: admission control first, bearer validation second.
//!
//! ```rust
//! use hookguard_auth::config::{GuardConfig, SigningKeyConfig};
//! use hookguard_auth::guard::Guard;
//! use hookguard_auth::rate_limit::RateLimitKey;
//! use hookguard_auth::token::ScopeSet;
//!
//! let mut config = GuardConfig::default();
//! config.token.signing_keys = vec![SigningKeyConfig::new(
//!     "k1",
//!     "0123456789abcdef0123456789abcdef",
//! )];
//! let guard = Guard::from_config(config)?;
//!
//! let pair = guard.issue_token_pair("user:42", ScopeSet::parse("export:create"))?;
//! let claims = guard.authenticate(
//!     &RateLimitKey::ip("203.0.113.9"),
//!     Some(&pair.access.token),
//!     &["export:create"],
//! )?;
//! assert_eq!(claims.sub, "user:42");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::sync::{Arc, Weak};
use std::time::Duration;

use http::HeaderMap;
use http::header::AUTHORIZATION;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::audit::{AuditSink, NoopAuditSink, TracingAuditSink};
use crate::clock::{self, Clock};
use crate::config::GuardConfig;
use crate::device::{Device, DeviceAttributes, DeviceRegistry, DeviceStore};
use crate::error::{AuthError, AuthResult, ConfigError};
use crate::oauth2::{AuthorizationRequest, OAuthCoordinator, TokenExchanger, TokenSet};
use crate::rate_limit::{RateLimitKey, RateLimiter};
use crate::token::{
    AuthoritySettings, IssuedToken, RevocationStore, ScopeSet, SigningKey, TokenAuthority,
    TokenClaims, TokenCodec, TokenPair,
};

/// Bearer token from an `Authorization` header
///
/// The scheme is matched case-insensitively; anything other than exactly
/// `Bearer <token>` yields `None`.
pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() && !token.contains(' '))
        .then_some(token)
}

/// What one maintenance pass cleaned up
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Idle rate limit buckets evicted
    pub evicted_buckets: usize,
    /// Revocation and issued-token entries past expiry
    pub purged_revocations: usize,
    /// Timed-out OAuth sessions
    pub purged_sessions: usize,
}

/// Authentication and admission control for one deployment
#[derive(Debug)]
pub struct Guard {
    clock: Arc<dyn Clock>,
    codec: Arc<TokenCodec>,
    devices: Arc<DeviceRegistry>,
    authority: Arc<TokenAuthority>,
    limiter: RateLimiter,
    oauth: Option<OAuthCoordinator>,
}

impl Guard {
    /// Build with default collaborators
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] when the configuration does not validate.
    pub fn from_config(config: GuardConfig) -> Result<Self, ConfigError> {
        GuardBuilder::new(config).build()
    }

    /// Builder for injecting collaborators
    pub fn builder(config: GuardConfig) -> GuardBuilder {
        GuardBuilder::new(config)
    }

    /// Rate limit, then validate
    ///
    /// # Errors
    ///
    /// [`AuthError::RateLimited`] when `client_key` is out of capacity,
    /// [`AuthError::MalformedToken`] when no bearer was presented, otherwise
    /// any [`TokenAuthority::validate`] failure.
    pub fn authenticate(
        &self,
        client_key: &RateLimitKey,
        bearer: Option<&str>,
        required_scopes: &[&str],
    ) -> AuthResult<TokenClaims> {
        self.limiter
            .check(client_key)
            .map_err(|info| AuthError::RateLimited {
                retry_after: info.retry_after,
            })?;
        let token = bearer.ok_or_else(|| AuthError::MalformedToken("missing bearer token".into()))?;
        self.authority.validate(token, required_scopes)
    }

    // Admission control

    /// Admit one request for `client_key`
    pub fn is_allowed(&self, client_key: &RateLimitKey) -> bool {
        self.limiter.is_allowed(client_key)
    }

    /// Time until `client_key` will be admitted again
    pub fn retry_after(&self, client_key: &RateLimitKey) -> Duration {
        self.limiter.retry_after(client_key)
    }

    // Tokens

    /// See [`TokenAuthority::issue_access_token`]
    ///
    /// # Errors
    ///
    /// As [`TokenAuthority::issue_access_token`].
    pub fn issue_access_token(
        &self,
        subject: &str,
        scopes: ScopeSet,
        ttl: Duration,
    ) -> AuthResult<IssuedToken> {
        self.authority.issue_access_token(subject, scopes, ttl)
    }

    /// See [`TokenAuthority::issue_refresh_token`]
    ///
    /// # Errors
    ///
    /// As [`TokenAuthority::issue_refresh_token`].
    pub fn issue_refresh_token(&self, subject: &str, ttl: Duration) -> AuthResult<IssuedToken> {
        self.authority.issue_refresh_token(subject, ttl)
    }

    /// See [`TokenAuthority::issue_token_pair`]
    ///
    /// # Errors
    ///
    /// As [`TokenAuthority::issue_token_pair`].
    pub fn issue_token_pair(&self, subject: &str, scopes: ScopeSet) -> AuthResult<TokenPair> {
        self.authority.issue_token_pair(subject, scopes)
    }

    /// See [`TokenAuthority::validate`]
    ///
    /// # Errors
    ///
    /// As [`TokenAuthority::validate`].
    pub fn validate(&self, token: &str, required_scopes: &[&str]) -> AuthResult<TokenClaims> {
        self.authority.validate(token, required_scopes)
    }

    /// See [`TokenAuthority::refresh`]
    ///
    /// # Errors
    ///
    /// As [`TokenAuthority::refresh`].
    pub fn refresh(&self, refresh_token: &str) -> AuthResult<TokenPair> {
        self.authority.refresh(refresh_token)
    }

    /// Revoke a token id; `true` when it was not revoked before
    pub fn revoke(&self, token_id: &str) -> bool {
        self.authority.revoke(token_id)
    }

    /// Revoke every outstanding token of `subject`
    pub fn revoke_subject(&self, subject: &str) -> Vec<String> {
        self.authority.revoke_subject(subject)
    }

    /// Make `secret` the signing key; the previous key keeps verifying
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidRequest`] for an empty id or a secret shorter
    /// than [`MIN_SECRET_LEN`](crate::config::MIN_SECRET_LEN) bytes; the ring
    /// is left untouched.
    pub fn rotate_signing_key(&self, kid: &str, secret: &[u8]) -> AuthResult<()> {
        let key = SigningKey::hmac(kid, secret)?;
        self.codec.rotate(key);
        Ok(())
    }

    // Devices

    /// See [`DeviceRegistry::register`]
    ///
    /// # Errors
    ///
    /// As [`DeviceRegistry::register`].
    pub fn register_device(&self, attributes: DeviceAttributes) -> AuthResult<Device> {
        self.devices.register(attributes)
    }

    /// See [`DeviceRegistry::register_strict`]
    ///
    /// # Errors
    ///
    /// As [`DeviceRegistry::register_strict`].
    pub fn register_device_strict(&self, attributes: DeviceAttributes) -> AuthResult<Device> {
        self.devices.register_strict(attributes)
    }

    /// See [`DeviceRegistry::revoke`]
    ///
    /// # Errors
    ///
    /// As [`DeviceRegistry::revoke`].
    pub fn revoke_device(&self, device_id: &str) -> AuthResult<()> {
        self.devices.revoke(device_id)
    }

    /// False for unknown or revoked devices
    pub fn is_device_active(&self, device_id: &str) -> bool {
        self.devices.is_active(device_id)
    }

    /// Look up a device, revoked or not
    pub fn device(&self, device_id: &str) -> Option<Device> {
        self.devices.get(device_id)
    }

    // Delegated authorization

    /// See [`OAuthCoordinator::begin_authorization`]
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidRequest`] when no provider is configured, otherwise
    /// as [`OAuthCoordinator::begin_authorization`].
    pub fn begin_authorization(&self, redirect_uri: &str) -> AuthResult<AuthorizationRequest> {
        self.coordinator()?.begin_authorization(redirect_uri)
    }

    /// See [`OAuthCoordinator::complete_authorization`]
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidRequest`] when no provider is configured, otherwise
    /// as [`OAuthCoordinator::complete_authorization`].
    pub async fn complete_authorization(&self, state: &str, code: &str) -> AuthResult<TokenSet> {
        self.coordinator()?.complete_authorization(state, code).await
    }

    /// See [`OAuthCoordinator::complete_authorization_with_timeout`]
    ///
    /// # Errors
    ///
    /// As [`Guard::complete_authorization`], plus
    /// [`AuthError::ExchangeTimeout`] when `timeout` elapses.
    pub async fn complete_authorization_with_timeout(
        &self,
        state: &str,
        code: &str,
        timeout: Duration,
    ) -> AuthResult<TokenSet> {
        self.coordinator()?
            .complete_authorization_with_timeout(state, code, timeout)
            .await
    }

    fn coordinator(&self) -> AuthResult<&OAuthCoordinator> {
        self.oauth
            .as_ref()
            .ok_or_else(|| AuthError::InvalidRequest("no authorization provider configured".into()))
    }

    // Housekeeping

    /// Evict idle buckets and purge expired revocations and sessions
    pub fn run_maintenance(&self) -> MaintenanceReport {
        let report = MaintenanceReport {
            evicted_buckets: self.limiter.evict_idle(),
            purged_revocations: self.authority.purge_expired(),
            purged_sessions: self
                .oauth
                .as_ref()
                .map_or(0, OAuthCoordinator::purge_expired_sessions),
        };
        debug!(?report, "Maintenance pass complete");
        report
    }

    /// Run [`Guard::run_maintenance`] every `interval` on the tokio runtime
    ///
    /// The task holds a weak reference and ends once the guard is dropped.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn spawn_maintenance(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let guard: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(guard) = guard.upgrade() else {
                    debug!("Guard dropped, stopping maintenance");
                    break;
                };
                guard.run_maintenance();
            }
        })
    }

    // Accessors

    /// Token authority
    pub fn authority(&self) -> &Arc<TokenAuthority> {
        &self.authority
    }

    /// Device registry
    pub fn devices(&self) -> &Arc<DeviceRegistry> {
        &self.devices
    }

    /// Rate limiter
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// OAuth coordinator, when a provider is configured
    pub fn oauth(&self) -> Option<&OAuthCoordinator> {
        self.oauth.as_ref()
    }

    /// Time source
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

/// Builder for [`Guard`] with injectable collaborators
#[derive(Debug)]
pub struct GuardBuilder {
    config: GuardConfig,
    clock: Option<Arc<dyn Clock>>,
    audit: Option<Arc<dyn AuditSink>>,
    revocations: Option<Arc<dyn RevocationStore>>,
    device_store: Option<Arc<dyn DeviceStore>>,
    exchanger: Option<Arc<dyn TokenExchanger>>,
}

impl GuardBuilder {
    /// Builder over `config` with default collaborators
    pub fn new(config: GuardConfig) -> Self {
        Self {
            config,
            clock: None,
            audit: None,
            revocations: None,
            device_store: None,
            exchanger: None,
        }
    }

    /// Time source (default: system clock)
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Audit sink (default: tracing sink, or none when auditing is off)
    pub fn audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Revocation store (default: in memory)
    pub fn revocation_store(mut self, store: Arc<dyn RevocationStore>) -> Self {
        self.revocations = Some(store);
        self
    }

    /// Device store (default: in memory)
    pub fn device_store(mut self, store: Arc<dyn DeviceStore>) -> Self {
        self.device_store = Some(store);
        self
    }

    /// Provider exchanger (default: HTTP)
    pub fn exchanger(mut self, exchanger: Arc<dyn TokenExchanger>) -> Self {
        self.exchanger = Some(exchanger);
        self
    }

    /// Validate the configuration and assemble the guard
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] when the configuration does not validate or
    /// a component cannot be built from it.
    pub fn build(self) -> Result<Guard, ConfigError> {
        let config = self.config;
        config.validate()?;

        let clock = self.clock.unwrap_or_else(clock::system);
        let audit: Arc<dyn AuditSink> = match self.audit {
            Some(audit) => audit,
            None if config.audit.enabled => Arc::new(
                TracingAuditSink::new(&config.service_name)
                    .with_identifier_hashing(config.audit.hash_identifiers),
            ),
            None => Arc::new(NoopAuditSink),
        };

        let codec = Arc::new(
            TokenCodec::from_config(&config.token)
                .map_err(|e| ConfigError::invalid("token.signing_keys", e.to_string()))?,
        );

        let mut registry = DeviceRegistry::new(Arc::clone(&clock)).with_audit_sink(Arc::clone(&audit));
        if let Some(store) = self.device_store {
            registry = registry.with_store(store);
        }
        let devices = Arc::new(registry);

        let mut authority =
            TokenAuthority::new(Arc::clone(&codec), Arc::clone(&devices), Arc::clone(&clock))
                .with_audit_sink(audit)
                .with_settings(AuthoritySettings::from(&config.token));
        if let Some(store) = self.revocations {
            authority = authority.with_revocation_store(store);
        }
        let authority = Arc::new(authority);

        let limiter = RateLimiter::new(config.rate_limit.clone(), Arc::clone(&clock));

        let oauth = match config.oauth {
            Some(oauth) => {
                let coordinator = match self.exchanger {
                    Some(exchanger) => {
                        OAuthCoordinator::with_exchanger(oauth, exchanger, Arc::clone(&clock))
                    }
                    None => OAuthCoordinator::new(oauth, Arc::clone(&clock))
                        .map_err(|e| ConfigError::invalid("oauth", e.to_string()))?,
                };
                Some(coordinator.with_authority(Arc::clone(&authority)))
            }
            None => None,
        };

        info!(
            service = %config.service_name,
            primary_kid = %codec.primary_kid(),
            rate_limit = config.rate_limit.enabled,
            oauth = oauth.is_some(),
            "Guard initialized"
        );

        Ok(Guard {
            clock,
            codec,
            devices,
            authority,
            limiter,
            oauth,
        })
    }
}
