//! Signing keys and the rotating key ring

use std::fmt;
use std::sync::Arc;

use jsonwebtoken::{DecodingKey, EncodingKey};
use secrecy::ExposeSecret;

use crate::config::{MIN_SECRET_LEN, SigningKeyConfig};
use crate::error::{AuthError, AuthResult};

/// HMAC-SHA256 key with its key id
#[derive(Clone)]
pub struct SigningKey {
    kid: String,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SigningKey {
    /// Build from a key id and raw secret bytes
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidRequest`] for an empty id or a secret
    /// shorter than [`MIN_SECRET_LEN`] bytes.
    pub fn hmac(kid: impl Into<String>, secret: &[u8]) -> AuthResult<Self> {
        let kid = kid.into();
        if kid.is_empty() {
            return Err(AuthError::InvalidRequest("signing key id must not be empty".into()));
        }
        if secret.len() < MIN_SECRET_LEN {
            return Err(AuthError::InvalidRequest(format!(
                "signing key '{kid}' is shorter than {MIN_SECRET_LEN} bytes"
            )));
        }
        Ok(Self {
            kid,
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        })
    }

    /// Build from configuration
    ///
    /// # Errors
    ///
    /// Same as [`SigningKey::hmac`].
    pub fn from_config(config: &SigningKeyConfig) -> AuthResult<Self> {
        Self::hmac(config.kid.clone(), config.secret.expose_secret().as_bytes())
    }

    /// Key id
    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub(crate) fn encoding(&self) -> &EncodingKey {
        &self.encoding
    }

    pub(crate) fn decoding(&self) -> &DecodingKey {
        &self.decoding
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .finish_non_exhaustive()
    }
}

/// Immutable snapshot of the signing key plus verification-only keys
///
/// Rotation produces a new ring; the codec swaps it in atomically.
#[derive(Debug, Clone)]
pub struct KeyRing {
    primary: Arc<SigningKey>,
    verification: Vec<Arc<SigningKey>>,
}

impl KeyRing {
    /// Ring with a single key
    pub fn new(primary: SigningKey) -> Self {
        Self {
            primary: Arc::new(primary),
            verification: Vec::new(),
        }
    }

    /// Ring from an ordered list; the first key signs
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidRequest`] for an empty list or duplicate ids.
    pub fn from_keys(keys: Vec<SigningKey>) -> AuthResult<Self> {
        let mut iter = keys.into_iter();
        let primary = iter
            .next()
            .ok_or_else(|| AuthError::InvalidRequest("at least one signing key is required".into()))?;
        let mut ring = Self::new(primary);
        for key in iter {
            if ring.contains(key.kid()) {
                return Err(AuthError::InvalidRequest(format!(
                    "duplicate signing key id '{}'",
                    key.kid()
                )));
            }
            ring.verification.push(Arc::new(key));
        }
        Ok(ring)
    }

    /// Key used for signing
    pub fn primary(&self) -> &SigningKey {
        &self.primary
    }

    /// Whether a key with this id is present
    pub fn contains(&self, kid: &str) -> bool {
        self.iter().any(|k| k.kid() == kid)
    }

    /// Total number of keys, primary included
    pub fn len(&self) -> usize {
        1 + self.verification.len()
    }

    /// Always false; a ring holds at least its primary
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Key ids, primary first
    pub fn kids(&self) -> Vec<String> {
        self.iter().map(|k| k.kid().to_string()).collect()
    }

    fn iter(&self) -> impl Iterator<Item = &SigningKey> {
        std::iter::once(self.primary.as_ref()).chain(self.verification.iter().map(Arc::as_ref))
    }

    /// Keys to try for a token, the `kid` match first, then ring order
    pub(crate) fn candidates<'a>(&'a self, kid: Option<&'a str>) -> impl Iterator<Item = &'a SigningKey> {
        let matched = kid.and_then(|kid| self.iter().find(|k| k.kid() == kid));
        matched.into_iter().chain(
            self.iter()
                .filter(move |k| kid.is_none_or(|kid| k.kid() != kid)),
        )
    }

    /// New ring with `new_primary` signing and the old primary demoted
    ///
    /// The result holds at most `retain` keys (minimum 1). An existing key
    /// with the same id as `new_primary` is replaced.
    pub fn rotated(&self, new_primary: SigningKey, retain: usize) -> Self {
        let kid = new_primary.kid().to_string();
        let verification = std::iter::once(Arc::clone(&self.primary))
            .chain(self.verification.iter().cloned())
            .filter(|k| k.kid() != kid)
            .take(retain.max(1) - 1)
            .collect();
        Self {
            primary: Arc::new(new_primary),
            verification,
        }
    }
}
