//! Bearer and refresh tokens
//!
//! - [`claims`] - typed claims and scope sets
//! - [`keys`] - HMAC signing keys and the rotating key ring
//! - [`codec`] - JWS compact encoding and verification
//! - [`store`] - revocation bookkeeping
//! - [`authority`] - issuance, validation, rotation-on-use and revocation

pub mod authority;
pub mod claims;
pub mod codec;
pub mod keys;
pub mod store;

pub use authority::{AuthoritySettings, IssuedToken, TokenAuthority, TokenPair};
pub use claims::{ScopeSet, TokenClaims, TokenKind};
pub use codec::TokenCodec;
pub use keys::{KeyRing, SigningKey};
pub use store::{
    MemoryRevocationStore, RevocationEntry, RevocationReason, RevocationStore, TrackedToken,
};
