//! Two-phase authorization-code flow
//!
//! 1. [`OAuthCoordinator::begin_authorization`] validates the redirect URI,
//!    generates `state` and a PKCE pair, stores a session and returns the
//!    provider URL to send the user to.
//! 2. [`OAuthCoordinator::complete_authorization`] takes the session for the
//!    returned `state`, redeems the code and, when configured, wraps the
//!    result in a local token pair.
//!
//! A session is destroyed by any definitive outcome (success, expiry,
//! provider rejection). A timeout or a dropped completion future leaves it
//! in place until its own timeout so the caller can retry.

use std::sync::Arc;
use std::time::Duration;

use oauth2::{CsrfToken, PkceCodeChallenge};
use secrecy::SecretString;
use tracing::{debug, info, warn};
use url::Url;

use super::exchange::{ExchangeRequest, HttpTokenExchanger, ProviderTokens, TokenExchanger};
use super::session::{OAuthSession, SessionStore};
use super::validation::validate_allowed_redirect;
use crate::auth_metrics;
use crate::clock::Clock;
use crate::config::OAuthConfig;
use crate::error::{AuthError, AuthResult};
use crate::token::{ScopeSet, TokenAuthority, TokenPair};

/// Subject prefix for principals authenticated through the provider
pub const OAUTH_SUBJECT_PREFIX: &str = "oauth:";

/// URL and state for a started authorization
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    /// Provider authorization URL to redirect the user to
    pub url: Url,
    /// Opaque state the provider will echo back
    pub state: String,
}

/// Result of a completed authorization
#[derive(Debug, Clone)]
pub struct TokenSet {
    /// Tokens as returned by the provider
    pub provider: ProviderTokens,
    /// Locally signed pair, when wrapping is configured
    pub local: Option<TokenPair>,
}

/// Drives authorization-code exchanges against one provider
#[derive(Debug)]
pub struct OAuthCoordinator {
    config: OAuthConfig,
    sessions: Arc<SessionStore>,
    exchanger: Arc<dyn TokenExchanger>,
    authority: Option<Arc<TokenAuthority>>,
    clock: Arc<dyn Clock>,
}

impl OAuthCoordinator {
    /// Coordinator using an HTTP exchanger built from `config`
    ///
    /// # Errors
    ///
    /// Propagates [`HttpTokenExchanger::new`] failures.
    pub fn new(config: OAuthConfig, clock: Arc<dyn Clock>) -> AuthResult<Self> {
        let exchanger = HttpTokenExchanger::new(&config, config.exchange_timeout())?;
        Ok(Self::with_exchanger(config, Arc::new(exchanger), clock))
    }

    /// Coordinator with a caller-supplied exchanger
    pub fn with_exchanger(
        config: OAuthConfig,
        exchanger: Arc<dyn TokenExchanger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            sessions: Arc::new(SessionStore::new()),
            exchanger,
            authority: None,
            clock,
        }
    }

    /// Attach an authority for local wrapping
    pub fn with_authority(mut self, authority: Arc<TokenAuthority>) -> Self {
        self.authority = Some(authority);
        self
    }

    /// Provider configuration
    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Start an authorization
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidRequest`] when the redirect URI is malformed or not
    /// allowed, or the configured authorize URL cannot be parsed;
    /// [`AuthError::TooManyPendingAuthorizations`] when the configured
    /// number of unexpired sessions is already pending.
    pub fn begin_authorization(&self, redirect_uri: &str) -> AuthResult<AuthorizationRequest> {
        validate_allowed_redirect(redirect_uri, &self.config.redirect_uris)?;

        let mut url = Url::parse(&self.config.authorize_url)
            .map_err(|e| AuthError::InvalidRequest(format!("invalid authorize URL: {e}")))?;
        let state = CsrfToken::new_random().secret().clone();
        let verifier = {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.config.client_id)
                .append_pair("redirect_uri", redirect_uri)
                .append_pair("state", &state);
            if !self.config.scopes.is_empty() {
                query.append_pair("scope", &self.config.scopes.join(" "));
            }
            let verifier = if self.config.use_pkce {
                let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
                query
                    .append_pair("code_challenge", challenge.as_str())
                    .append_pair("code_challenge_method", challenge.method().as_str());
                Some(SecretString::new(verifier.secret().clone()))
            } else {
                None
            };
            for (name, value) in &self.config.extra_authorize_params {
                query.append_pair(name, value);
            }
            verifier
        };

        let now = self.clock.monotonic();
        let session = OAuthSession::new(
            SecretString::new(state.clone()),
            verifier,
            redirect_uri,
            now,
            now + self.config.session_timeout(),
        );
        let capacity = self.config.max_pending_sessions;
        if !self.sessions.try_insert(session, capacity, now) {
            warn!(capacity, "Pending authorization store full, refusing new authorization");
            return Err(AuthError::TooManyPendingAuthorizations(capacity));
        }
        debug!(redirect_uri = %redirect_uri, pending = self.sessions.len(), "Authorization started");

        Ok(AuthorizationRequest { url, state })
    }

    /// Finish an authorization with the configured exchange timeout
    ///
    /// # Errors
    ///
    /// See [`OAuthCoordinator::complete_authorization_with_timeout`].
    pub async fn complete_authorization(&self, state: &str, code: &str) -> AuthResult<TokenSet> {
        self.complete_authorization_with_timeout(state, code, self.config.exchange_timeout())
            .await
    }

    /// Finish an authorization, bounding the provider call by `timeout`
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidRequest`] for an empty code (session untouched)
    /// - [`AuthError::UnknownState`] when no session matches `state`
    /// - [`AuthError::StateExpired`] when the session timed out
    /// - [`AuthError::ExchangeFailed`] when the provider rejected the code
    /// - [`AuthError::ExchangeTimeout`] when the provider did not answer in
    ///   time; the session is kept for a retry
    pub async fn complete_authorization_with_timeout(
        &self,
        state: &str,
        code: &str,
        timeout: Duration,
    ) -> AuthResult<TokenSet> {
        if code.is_empty() {
            return Err(AuthError::InvalidRequest("authorization code is empty".into()));
        }
        let lease = self.sessions.take(state).ok_or_else(|| {
            warn!("Authorization completed with unknown state");
            AuthError::UnknownState
        })?;

        if lease.session().is_expired(self.clock.monotonic()) {
            lease.consume();
            return Err(AuthError::StateExpired);
        }

        let request = ExchangeRequest {
            code: code.to_string(),
            redirect_uri: lease.session().redirect_uri().to_string(),
            code_verifier: lease.session().code_verifier().cloned(),
        };

        // Dropping this future before it resolves drops the lease, which
        // returns the session to the store
        match tokio::time::timeout(timeout, self.exchanger.exchange(request)).await {
            Err(_) => {
                drop(lease);
                auth_metrics::record_exchange("timeout");
                warn!(timeout_ms = timeout.as_millis() as u64, "Token exchange timed out, session kept");
                Err(AuthError::ExchangeTimeout(timeout))
            }
            Ok(Err(e)) => {
                lease.consume();
                auth_metrics::record_exchange("failed");
                Err(e)
            }
            Ok(Ok(provider)) => {
                lease.consume();
                auth_metrics::record_exchange("ok");
                let local = self.wrap(&provider)?;
                info!(wrapped = local.is_some(), "Authorization completed");
                Ok(TokenSet { provider, local })
            }
        }
    }

    fn wrap(&self, provider: &ProviderTokens) -> AuthResult<Option<TokenPair>> {
        let (Some(wrap), Some(authority)) = (&self.config.wrap, &self.authority) else {
            return Ok(None);
        };
        let id = provider.extra_str(&wrap.subject_field).ok_or_else(|| {
            AuthError::ExchangeFailed(format!(
                "token response lacks subject field '{}'",
                wrap.subject_field
            ))
        })?;
        let subject = format!("{OAUTH_SUBJECT_PREFIX}{id}");
        authority
            .issue_token_pair(&subject, ScopeSet::new(&wrap.scopes))
            .map(Some)
    }

    /// Drop timed-out sessions, returning how many went
    pub fn purge_expired_sessions(&self) -> usize {
        self.sessions.purge_expired(self.clock.monotonic())
    }

    /// Number of authorizations awaiting completion
    pub fn pending_sessions(&self) -> usize {
        self.sessions.len()
    }
}
