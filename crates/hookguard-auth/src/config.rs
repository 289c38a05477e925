//! Guard Configuration
//!
//! [`GuardConfig`] aggregates everything needed to assemble a
//! [`Guard`](crate::guard::Guard). It is loaded by layering an optional file
//! (TOML, YAML or JSON, chosen by extension) under `HOOKGUARD__*` environment
//! variables, then validated as a whole.
//!
//! ```rust,no_run
//! use hookguard_auth::config::GuardConfig;
//! use std::path::Path;
//!
//! # fn example() -> Result<(), hookguard_auth::error::ConfigError> {
//! // HOOKGUARD__RATE_LIMIT__CAPACITY=30 overrides the file value
//! let config = GuardConfig::load(Some(Path::new("hookguard.toml")))?;
//! println!("access tokens live {:?}", config.token.access_ttl());
//! # Ok(())
//! # }
//! ```
//!
//! Durations are whole seconds so the same file works across all formats and
//! environment overrides.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::oauth2::validation::validate_redirect_uri;

/// Minimum HMAC secret length in bytes
pub const MIN_SECRET_LEN: usize = 32;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "HOOKGUARD";

/// Top-level configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Service name used for audit attribution
    pub service_name: String,
    /// Token issuance and validation
    pub token: TokenConfig,
    /// Per-client admission control
    pub rate_limit: RateLimitConfig,
    /// Delegated authorization provider, if any
    pub oauth: Option<OAuthConfig>,
    /// Audit trail
    pub audit: AuditConfig,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            service_name: "hookguard".to_string(),
            token: TokenConfig::default(),
            rate_limit: RateLimitConfig::default(),
            oauth: None,
            audit: AuditConfig::default(),
        }
    }
}

impl GuardConfig {
    /// Load from an optional file plus `HOOKGUARD__*` environment variables
    ///
    /// Nested fields use `__` as separator, e.g.
    /// `HOOKGUARD__TOKEN__ACCESS_TTL_SECS=900`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] when a source cannot be read or parsed
    /// and [`ConfigError::Invalid`] when validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let loaded: Self = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Parse TOML text without consulting the environment
    ///
    /// # Errors
    ///
    /// Same as [`GuardConfig::load`].
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let loaded: Self = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.token.validate()?;
        self.rate_limit.validate()?;
        if let Some(oauth) = &self.oauth {
            oauth.validate()?;
        }
        Ok(())
    }
}

/// One HMAC signing key
#[derive(Clone, Deserialize)]
pub struct SigningKeyConfig {
    /// Key id written into the token header
    pub kid: String,
    /// Shared secret, at least [`MIN_SECRET_LEN`] bytes
    #[serde(deserialize_with = "deserialize_secret")]
    pub secret: SecretString,
}

impl SigningKeyConfig {
    /// Build a key entry from plain parts
    pub fn new(kid: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            kid: kid.into(),
            secret: SecretString::new(secret.into()),
        }
    }
}

impl std::fmt::Debug for SigningKeyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeyConfig")
            .field("kid", &self.kid)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Token issuance settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Signing keys; the first is primary, the rest verify only
    pub signing_keys: Vec<SigningKeyConfig>,
    /// Access token lifetime
    pub access_ttl_secs: u64,
    /// Refresh token lifetime
    pub refresh_ttl_secs: u64,
    /// Scopes granted when the caller names none
    pub default_scopes: Vec<String>,
    /// Upper bound on keys kept after rotation, primary included
    pub max_verification_keys: usize,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            signing_keys: Vec::new(),
            access_ttl_secs: 3600,
            refresh_ttl_secs: 30 * 24 * 3600,
            default_scopes: vec!["export:create".to_string()],
            max_verification_keys: 3,
        }
    }
}

impl TokenConfig {
    /// Access token lifetime
    pub fn access_ttl(&self) -> Duration {
        Duration::from_secs(self.access_ttl_secs)
    }

    /// Refresh token lifetime
    pub fn refresh_ttl(&self) -> Duration {
        Duration::from_secs(self.refresh_ttl_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.signing_keys.is_empty() {
            return Err(ConfigError::invalid(
                "token.signing_keys",
                "at least one signing key is required",
            ));
        }
        let mut seen = HashSet::new();
        for key in &self.signing_keys {
            if key.kid.trim().is_empty() {
                return Err(ConfigError::invalid("token.signing_keys.kid", "must not be empty"));
            }
            if !seen.insert(key.kid.as_str()) {
                return Err(ConfigError::invalid(
                    "token.signing_keys.kid",
                    format!("duplicate key id '{}'", key.kid),
                ));
            }
            if key.secret.expose_secret().len() < MIN_SECRET_LEN {
                return Err(ConfigError::invalid(
                    "token.signing_keys.secret",
                    format!("key '{}' is shorter than {MIN_SECRET_LEN} bytes", key.kid),
                ));
            }
        }
        if self.access_ttl_secs == 0 {
            return Err(ConfigError::invalid("token.access_ttl_secs", "must be non-zero"));
        }
        if self.refresh_ttl_secs == 0 {
            return Err(ConfigError::invalid("token.refresh_ttl_secs", "must be non-zero"));
        }
        if self.max_verification_keys == 0 {
            return Err(ConfigError::invalid("token.max_verification_keys", "must be at least 1"));
        }
        validate_scopes("token.default_scopes", &self.default_scopes)
    }
}

/// Token-bucket admission settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Whether admission control is applied at all
    pub enabled: bool,
    /// Bucket capacity (burst size)
    pub capacity: u32,
    /// Tokens restored per `refill_period_secs`
    pub refill_tokens: u32,
    /// Period over which `refill_tokens` are restored
    pub refill_period_secs: u64,
    /// Buckets untouched for this long are evicted
    pub idle_eviction_secs: u64,
    /// Minimum gap between opportunistic eviction sweeps
    pub cleanup_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 15,
            refill_tokens: 10,
            refill_period_secs: 60,
            idle_eviction_secs: 600,
            cleanup_interval_secs: 60,
        }
    }
}

impl RateLimitConfig {
    /// Set the burst capacity
    pub fn with_capacity(mut self, capacity: u32) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the sustained rate as `tokens` per `period`
    pub fn with_refill(mut self, tokens: u32, period: Duration) -> Self {
        self.refill_tokens = tokens;
        self.refill_period_secs = period.as_secs();
        self
    }

    /// Set the idle eviction window
    pub fn with_idle_eviction(mut self, idle: Duration) -> Self {
        self.idle_eviction_secs = idle.as_secs();
        self
    }

    /// Refill rate in tokens per second
    pub fn refill_rate(&self) -> f64 {
        f64::from(self.refill_tokens) / self.refill_period_secs.max(1) as f64
    }

    /// Idle eviction window
    pub fn idle_eviction(&self) -> Duration {
        Duration::from_secs(self.idle_eviction_secs)
    }

    /// Gap between eviction sweeps
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }
        if self.capacity == 0 {
            return Err(ConfigError::invalid("rate_limit.capacity", "must be at least 1"));
        }
        if self.refill_tokens == 0 || self.refill_period_secs == 0 {
            return Err(ConfigError::invalid(
                "rate_limit.refill_tokens",
                "refill rate must be positive",
            ));
        }
        Ok(())
    }
}

/// Encoding of the token request body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenRequestFormat {
    /// `application/x-www-form-urlencoded` (RFC 6749)
    #[default]
    Form,
    /// `application/json`, as some providers require
    Json,
}

/// Re-signing provider results into local tokens
#[derive(Debug, Clone, Deserialize)]
pub struct LocalWrapConfig {
    /// Field of the provider's token response naming the principal
    pub subject_field: String,
    /// Scopes granted to the wrapped subject
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// Authorization-code provider settings
#[derive(Clone, Deserialize)]
pub struct OAuthConfig {
    /// Client id registered with the provider
    pub client_id: String,
    /// Client secret
    #[serde(deserialize_with = "deserialize_secret")]
    pub client_secret: SecretString,
    /// Provider authorization endpoint
    pub authorize_url: String,
    /// Provider token endpoint
    pub token_url: String,
    /// Allowed redirect URIs; empty means any URI passing structural checks
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    /// Scopes requested from the provider
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Whether to send a PKCE S256 challenge
    #[serde(default = "default_true")]
    pub use_pkce: bool,
    /// Extra authorize parameters (e.g. `owner=user`)
    #[serde(default)]
    pub extra_authorize_params: BTreeMap<String, String>,
    /// Token request body encoding
    #[serde(default)]
    pub token_request_format: TokenRequestFormat,
    /// Lifetime of a pending authorization
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,
    /// Default bound on the provider exchange
    #[serde(default = "default_exchange_timeout")]
    pub exchange_timeout_secs: u64,
    /// Cap on unexpired pending authorizations
    #[serde(default = "default_max_pending_sessions")]
    pub max_pending_sessions: usize,
    /// Optional local wrapping of the provider result
    #[serde(default)]
    pub wrap: Option<LocalWrapConfig>,
}

impl std::fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("authorize_url", &self.authorize_url)
            .field("token_url", &self.token_url)
            .field("redirect_uris", &self.redirect_uris)
            .field("scopes", &self.scopes)
            .field("use_pkce", &self.use_pkce)
            .field("token_request_format", &self.token_request_format)
            .field("session_timeout_secs", &self.session_timeout_secs)
            .field("exchange_timeout_secs", &self.exchange_timeout_secs)
            .field("max_pending_sessions", &self.max_pending_sessions)
            .field("wrap", &self.wrap)
            .finish_non_exhaustive()
    }
}

impl OAuthConfig {
    /// Minimal provider configuration with defaults for everything optional
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        authorize_url: impl Into<String>,
        token_url: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: SecretString::new(client_secret.into()),
            authorize_url: authorize_url.into(),
            token_url: token_url.into(),
            redirect_uris: Vec::new(),
            scopes: Vec::new(),
            use_pkce: true,
            extra_authorize_params: BTreeMap::new(),
            token_request_format: TokenRequestFormat::Form,
            session_timeout_secs: default_session_timeout(),
            exchange_timeout_secs: default_exchange_timeout(),
            max_pending_sessions: default_max_pending_sessions(),
            wrap: None,
        }
    }

    /// Lifetime of a pending authorization
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    /// Default bound on the provider exchange
    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_secs(self.exchange_timeout_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::invalid("oauth.client_id", "must not be empty"));
        }
        for (field, value) in [
            ("oauth.authorize_url", &self.authorize_url),
            ("oauth.token_url", &self.token_url),
        ] {
            url::Url::parse(value)
                .map_err(|e| ConfigError::invalid(field, format!("not a valid URL: {e}")))?;
        }
        for uri in &self.redirect_uris {
            validate_redirect_uri(uri)
                .map_err(|e| ConfigError::invalid("oauth.redirect_uris", e.to_string()))?;
        }
        if self.session_timeout_secs == 0 {
            return Err(ConfigError::invalid("oauth.session_timeout_secs", "must be non-zero"));
        }
        if self.exchange_timeout_secs == 0 {
            return Err(ConfigError::invalid("oauth.exchange_timeout_secs", "must be non-zero"));
        }
        if self.max_pending_sessions == 0 {
            return Err(ConfigError::invalid("oauth.max_pending_sessions", "must be at least 1"));
        }
        if let Some(wrap) = &self.wrap {
            if wrap.subject_field.trim().is_empty() {
                return Err(ConfigError::invalid("oauth.wrap.subject_field", "must not be empty"));
            }
            validate_scopes("oauth.wrap.scopes", &wrap.scopes)?;
        }
        Ok(())
    }
}

/// Audit trail settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Emit audit events at all
    pub enabled: bool,
    /// Replace subjects and token ids with BLAKE3 digests in log output
    pub hash_identifiers: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hash_identifiers: true,
        }
    }
}

fn validate_scopes(field: &str, scopes: &[String]) -> Result<(), ConfigError> {
    for scope in scopes {
        if scope.is_empty() || scope.chars().any(char::is_whitespace) {
            return Err(ConfigError::invalid(
                field,
                format!("'{scope}' is not a single scope token"),
            ));
        }
    }
    Ok(())
}

// Custom deserialization for SecretString
fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Ok(SecretString::new(s))
}

fn default_true() -> bool {
    true
}

fn default_session_timeout() -> u64 {
    600
}

fn default_exchange_timeout() -> u64 {
    30
}

fn default_max_pending_sessions() -> usize {
    10_000
}
