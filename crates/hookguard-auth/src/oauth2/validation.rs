//! Redirect URI validation
//!
//! Redirect URIs must:
//! - parse as absolute URLs
//! - use `https`, or `http` only for loopback hosts during development
//! - carry no fragment
//! - match the configured allow-list exactly when one is set

use url::{Host, Url};

use crate::error::{AuthError, AuthResult};

/// Check a redirect URI's structure
///
/// # Errors
///
/// [`AuthError::InvalidRequest`] describing the first violated rule.
pub fn validate_redirect_uri(uri: &str) -> AuthResult<Url> {
    let parsed = Url::parse(uri)
        .map_err(|e| AuthError::InvalidRequest(format!("Invalid redirect URI format: {e}")))?;

    match parsed.scheme() {
        "https" => {
            if parsed.host().is_none() {
                return Err(AuthError::InvalidRequest(
                    "Redirect URI must have a valid host".into(),
                ));
            }
        }
        "http" => {
            if !is_loopback(&parsed) {
                return Err(AuthError::InvalidRequest(
                    "HTTP redirect URIs only allowed for localhost in development".into(),
                ));
            }
        }
        other => {
            return Err(AuthError::InvalidRequest(format!(
                "Unsupported redirect URI scheme: {other}. Use https, or http for localhost"
            )));
        }
    }

    if parsed.fragment().is_some() {
        return Err(AuthError::InvalidRequest(
            "Redirect URI must not contain URL fragment".into(),
        ));
    }

    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(AuthError::InvalidRequest(
            "Redirect URI must not embed credentials".into(),
        ));
    }

    Ok(parsed)
}

/// Check structure and, when `allowed` is non-empty, exact membership
///
/// # Errors
///
/// [`AuthError::InvalidRequest`] when the URI is malformed or not allowed.
pub fn validate_allowed_redirect(uri: &str, allowed: &[String]) -> AuthResult<Url> {
    let parsed = validate_redirect_uri(uri)?;
    if !allowed.is_empty() && !allowed.iter().any(|a| a == uri) {
        return Err(AuthError::InvalidRequest(format!(
            "Redirect URI is not registered: {uri}"
        )));
    }
    Ok(parsed)
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}
