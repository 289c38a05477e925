//! Typed token claims
//!
//! Claims are a closed, explicitly typed structure. A payload missing any of
//! `sub`, `scope`, `iat`, `exp`, `jti` or `typ` fails deserialization and is
//! reported as [`AuthError::MalformedToken`](crate::error::AuthError).

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Access or refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    /// Short-lived bearer capability
    Access,
    /// Single-use credential for minting a new pair
    Refresh,
}

impl TokenKind {
    /// Claim value
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered set of scope names, serialized as one space-delimited string
///
/// ```rust
/// use hookguard_auth::token::ScopeSet;
///
/// let granted = ScopeSet::parse("export:create export:read");
/// assert!(granted.missing(&["export:create"]).is_empty());
/// assert_eq!(granted.missing(&["admin"]), vec!["admin".to_string()]);
/// assert_eq!(granted.to_string(), "export:create export:read");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScopeSet(BTreeSet<String>);

impl ScopeSet {
    /// Build from any iterable of scope names; blank entries are dropped
    pub fn new<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        scopes.into_iter().collect()
    }

    /// Parse the space-delimited wire form
    pub fn parse(value: &str) -> Self {
        Self::new(value.split_whitespace())
    }

    /// Whether `scope` is granted
    pub fn contains(&self, scope: &str) -> bool {
        self.0.contains(scope)
    }

    /// Required scopes not present in this set, in request order
    pub fn missing<S: AsRef<str>>(&self, required: &[S]) -> Vec<String> {
        required
            .iter()
            .map(AsRef::as_ref)
            .filter(|s| !self.contains(s))
            .map(str::to_string)
            .collect()
    }

    /// Number of scopes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no scope is granted
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Scopes in lexical order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: AsRef<str>> FromIterator<S> for ScopeSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .flat_map(|s| {
                    s.as_ref()
                        .split_whitespace()
                        .map(str::to_string)
                        .collect::<Vec<_>>()
                })
                .collect(),
        )
    }
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for scope in &self.0 {
            if !first {
                f.write_str(" ")?;
            }
            f.write_str(scope)?;
            first = false;
        }
        Ok(())
    }
}

impl Serialize for ScopeSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ScopeSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// Claims carried by every token this crate issues
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Principal (`device:<id>`, `oauth:<id>` or an opaque user id)
    pub sub: String,
    /// Granted scopes
    pub scope: ScopeSet,
    /// Issued-at, Unix seconds
    pub iat: u64,
    /// Expiry, Unix seconds; the token is dead once `now >= exp`
    pub exp: u64,
    /// Unique token id used for revocation
    pub jti: String,
    /// Token kind
    pub typ: TokenKind,
    /// Rotation generation, refresh tokens only
    #[serde(rename = "gen", default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<u32>,
}

impl TokenClaims {
    /// Whether the token is dead at `now`
    pub fn is_expired_at(&self, now: u64) -> bool {
        now >= self.exp
    }

    /// Rotation generation, `0` when absent
    pub fn rotation_generation(&self) -> u32 {
        self.generation.unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims() -> TokenClaims {
        TokenClaims {
            sub: "device:abc".into(),
            scope: ScopeSet::new(["export:create", "export:read"]),
            iat: 100,
            exp: 200,
            jti: "j1".into(),
            typ: TokenKind::Refresh,
            generation: Some(2),
        }
    }

    #[test]
    fn test_scope_serializes_as_space_delimited_string() {
        let json = serde_json::to_value(claims()).unwrap();
        assert_eq!(json["scope"], "export:create export:read");
        assert_eq!(json["typ"], "refresh");
        assert_eq!(json["gen"], 2);
    }

    #[test]
    fn test_access_claims_omit_generation() {
        let mut access = claims();
        access.typ = TokenKind::Access;
        access.generation = None;
        let json = serde_json::to_value(&access).unwrap();
        assert!(json.get("gen").is_none());
    }

    #[test]
    fn test_missing_required_claim_fails() {
        for field in ["sub", "scope", "iat", "exp", "jti"] {
            let mut json = serde_json::to_value(claims()).unwrap();
            json.as_object_mut().unwrap().remove(field);
            assert!(
                serde_json::from_value::<TokenClaims>(json).is_err(),
                "claims without {field} must not parse"
            );
        }
    }

    #[test]
    fn test_expiry_boundary() {
        let c = claims();
        assert!(!c.is_expired_at(199));
        assert!(c.is_expired_at(200));
    }

    #[test]
    fn test_scope_set_splits_embedded_whitespace() {
        let set = ScopeSet::new(["a b", " ", "c"]);
        assert_eq!(set.len(), 3);
        assert_eq!(set.to_string(), "a b c");
    }
}
