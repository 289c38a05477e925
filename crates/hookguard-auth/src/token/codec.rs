//! Compact signed token codec
//!
//! Tokens are JWS compact serializations (`header.payload.signature`, each
//! segment base64url without padding) signed with HS256. The header carries
//! the signing key id so verification can go straight to the right key.
//!
//! Decoding verifies the signature over the raw `header.payload` bytes
//! before the payload is deserialized; a payload is never parsed unless some
//! key in the ring vouches for it.

use std::collections::HashSet;

use arc_swap::ArcSwap;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, Header, Validation};
use tracing::{debug, info};

use super::claims::TokenClaims;
use super::keys::{KeyRing, SigningKey};
use crate::config::TokenConfig;
use crate::error::{AuthError, AuthResult};

/// The only accepted algorithm
pub const ALGORITHM: Algorithm = Algorithm::HS256;

/// Encodes and verifies tokens against a rotating key ring
#[derive(Debug)]
pub struct TokenCodec {
    ring: ArcSwap<KeyRing>,
    max_keys: usize,
    validation: Validation,
}

impl TokenCodec {
    /// Codec over `ring`, retaining at most three keys across rotations
    pub fn new(ring: KeyRing) -> Self {
        let mut validation = Validation::new(ALGORITHM);
        // Expiry is decided against the injected clock by the authority
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        Self {
            ring: ArcSwap::from_pointee(ring),
            max_keys: 3,
            validation,
        }
    }

    /// Set the number of keys kept after rotation, primary included
    pub fn with_retention(mut self, max_keys: usize) -> Self {
        self.max_keys = max_keys.max(1);
        self
    }

    /// Build from configuration
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidRequest`] for an empty or inconsistent key list.
    pub fn from_config(config: &TokenConfig) -> AuthResult<Self> {
        let keys = config
            .signing_keys
            .iter()
            .map(SigningKey::from_config)
            .collect::<AuthResult<Vec<_>>>()?;
        Ok(Self::new(KeyRing::from_keys(keys)?).with_retention(config.max_verification_keys))
    }

    /// Sign `claims` with the primary key
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidRequest`] when `exp <= iat`, [`AuthError::Internal`]
    /// when serialization or signing fails.
    pub fn encode(&self, claims: &TokenClaims) -> AuthResult<String> {
        if claims.exp <= claims.iat {
            return Err(AuthError::InvalidRequest(
                "token must expire after it is issued".into(),
            ));
        }
        let ring = self.ring.load();
        let key = ring.primary();
        let mut header = Header::new(ALGORITHM);
        header.kid = Some(key.kid().to_string());

        jsonwebtoken::encode(&header, claims, key.encoding())
            .map_err(|e| AuthError::Internal(format!("token signing failed: {e}")))
    }

    /// Verify and parse a token
    ///
    /// # Errors
    ///
    /// [`AuthError::MalformedToken`] for structural problems or missing
    /// claims, [`AuthError::InvalidSignature`] when no key verifies it.
    pub fn decode(&self, token: &str) -> AuthResult<TokenClaims> {
        let segments: Vec<&str> = token.split('.').collect();
        if segments.len() != 3 || segments.iter().any(|s| s.is_empty()) {
            return Err(AuthError::MalformedToken(
                "expected three dot-delimited segments".into(),
            ));
        }

        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| AuthError::MalformedToken(format!("unreadable header: {e}")))?;
        if header.alg != ALGORITHM {
            debug!(alg = ?header.alg, "Rejecting token with unexpected algorithm");
            return Err(AuthError::InvalidSignature);
        }

        let ring = self.ring.load();
        for key in ring.candidates(header.kid.as_deref()) {
            match jsonwebtoken::decode::<TokenClaims>(token, key.decoding(), &self.validation) {
                Ok(data) => return Ok(data.claims),
                Err(e) => match e.kind() {
                    ErrorKind::InvalidSignature => continue,
                    ErrorKind::InvalidAlgorithm => return Err(AuthError::InvalidSignature),
                    _ => return Err(AuthError::MalformedToken(e.to_string())),
                },
            }
        }
        Err(AuthError::InvalidSignature)
    }

    /// Make `new_primary` the signing key; the old primary keeps verifying
    pub fn rotate(&self, new_primary: SigningKey) {
        let kid = new_primary.kid().to_string();
        let max_keys = self.max_keys;
        self.ring.rcu(|ring| ring.rotated(new_primary.clone(), max_keys));
        info!(kid = %kid, retained = self.ring.load().len(), "Signing key rotated");
    }

    /// Id of the current signing key
    pub fn primary_kid(&self) -> String {
        self.ring.load().primary().kid().to_string()
    }

    /// All key ids, primary first
    pub fn key_ids(&self) -> Vec<String> {
        self.ring.load().kids()
    }
}
