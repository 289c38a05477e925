//! OAuth 2.1 authorization-code flow against a third-party provider
//!
//! This module provides:
//! - Authorization Code flow with PKCE (RFC 7636)
//! - Single-use, time-bounded `state` sessions
//! - Form or JSON token requests with HTTP Basic client authentication
//! - Optional wrapping of provider tokens in locally signed tokens
//!
//! ## Submodules
//!
//! - `coordinator` - begin / complete orchestration
//! - `exchange` - token endpoint client
//! - `session` - pending session storage
//! - `validation` - redirect URI validation

pub mod coordinator;
pub mod exchange;
pub mod session;
pub mod validation;

pub use coordinator::{AuthorizationRequest, OAUTH_SUBJECT_PREFIX, OAuthCoordinator, TokenSet};
pub use exchange::{ExchangeRequest, HttpTokenExchanger, ProviderTokens, TokenExchanger};
pub use session::{OAuthSession, SessionLease, SessionStore};
pub use validation::*;
