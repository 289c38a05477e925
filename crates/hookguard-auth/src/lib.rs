//! # hookguard-auth
//!
//! Request authentication and abuse control for webhook-style endpoints:
//! signed bearer tokens with rotation-on-use refresh, device identity with
//! revocation, per-client token-bucket rate limiting and an OAuth 2.1
//! authorization-code exchange against a third-party provider.
//!
//! ## Architecture
//!
//! - [`clock`] - injectable wall and monotonic time
//! - [`error`] - [`AuthError`] taxonomy and HTTP mapping
//! - [`config`] - layered configuration (file + `HOOKGUARD__*` environment)
//! - [`token`] - codec, key ring, revocation store and [`TokenAuthority`]
//! - [`device`] - fingerprinted device registry
//! - [`rate_limit`] - per-key token buckets
//! - [`oauth2`] - authorization-code flow with PKCE
//! - [`audit`] - audit events and sinks
//! - [`guard`] - [`Guard`], the boundary facade
//! - [`logging`] - subscriber setup for binaries
//!
//! ## Request path
//!
//! ```text
//! client key + bearer
//!        |
//!   RateLimiter ----> 429 RateLimited { retry_after }
//!        |
//!   TokenCodec -----> 401 (signature, structure)
//!        |
//!   TokenAuthority -> 401 (kind, expiry, revocation)
//!        |            403 (scope)
//!     claims
//! ```
//!
//! All 401 responses share one public message; [`AuthError`]'s `Display`
//! stays precise for logs.
//!
//! ## Quick Start
//!
//! ```rust
//! use hookguard_auth::{Guard, GuardConfig, RateLimitKey, ScopeSet};
//! use hookguard_auth::config::SigningKeyConfig;
//!
//! let mut config = GuardConfig::default();
//! config.token.signing_keys = vec![SigningKeyConfig::new(
//!     "2024-01",
//!     "a-shared-secret-of-at-least-32-bytes!",
//! )];
//! let guard = Guard::from_config(config)?;
//!
//! let token = guard.issue_token_pair("user:7", ScopeSet::parse("export:create"))?;
//! let claims = guard.authenticate(
//!     &RateLimitKey::ip("192.0.2.10"),
//!     Some(&token.access.token),
//!     &["export:create"],
//! )?;
//! assert!(claims.scope.contains("export:create"));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Feature Flags
//!
//! - `metrics` - counters through the `metrics` facade

pub mod audit;
pub mod auth_metrics;
pub mod clock;
pub mod config;
pub mod device;
pub mod error;
pub mod guard;
pub mod logging;
pub mod oauth2;
pub mod rate_limit;
pub mod token;

#[doc(inline)]
pub use config::GuardConfig;

#[doc(inline)]
pub use error::{AuthError, AuthResult, ConfigError};

#[doc(inline)]
pub use guard::{Guard, GuardBuilder, MaintenanceReport, extract_bearer};

#[doc(inline)]
pub use rate_limit::{RateLimitInfo, RateLimitKey, RateLimiter};

#[doc(inline)]
pub use token::{ScopeSet, TokenAuthority, TokenClaims, TokenKind, TokenPair};

pub use device::{Device, DeviceAttributes, DeviceRegistry};
pub use oauth2::{AuthorizationRequest, OAuthCoordinator, TokenSet};
