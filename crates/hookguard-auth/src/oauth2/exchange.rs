//! Authorization code exchange with the provider's token endpoint

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::{OAuthConfig, TokenRequestFormat};
use crate::error::{AuthError, AuthResult};

/// What the provider needs to redeem a code
#[derive(Clone)]
pub struct ExchangeRequest {
    /// Authorization code returned to the redirect URI
    pub code: String,
    /// Redirect URI used when the authorization began
    pub redirect_uri: String,
    /// PKCE verifier, when PKCE is in use
    pub code_verifier: Option<SecretString>,
}

impl fmt::Debug for ExchangeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeRequest")
            .field("code", &"[REDACTED]")
            .field("redirect_uri", &self.redirect_uri)
            .field("pkce", &self.code_verifier.is_some())
            .finish()
    }
}

/// Parsed token response
///
/// Fields beyond the RFC 6749 set (workspace ids, owner objects, bot ids)
/// are kept in `extra`.
#[derive(Clone, Deserialize)]
pub struct ProviderTokens {
    /// Provider access token
    #[serde(deserialize_with = "deserialize_secret")]
    pub access_token: SecretString,
    /// Usually `bearer`
    #[serde(default)]
    pub token_type: Option<String>,
    /// Provider refresh token
    #[serde(default, deserialize_with = "deserialize_optional_secret")]
    pub refresh_token: Option<SecretString>,
    /// Lifetime in seconds
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Granted scope
    #[serde(default)]
    pub scope: Option<String>,
    /// Every other field of the response
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl ProviderTokens {
    /// Extra field rendered as a string, for string or numeric values
    pub fn extra_str(&self, field: &str) -> Option<String> {
        match self.extra.get(field)? {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

impl fmt::Debug for ProviderTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderTokens")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .field("extra_fields", &self.extra.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Error body per RFC 6749 §5.2
#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Redeems authorization codes
#[async_trait]
pub trait TokenExchanger: Send + Sync + fmt::Debug {
    /// Exchange a code for the provider's tokens
    async fn exchange(&self, request: ExchangeRequest) -> AuthResult<ProviderTokens>;
}

/// [`TokenExchanger`] that POSTs to the provider over HTTPS
///
/// The client never follows redirects and authenticates with HTTP Basic.
#[derive(Clone)]
pub struct HttpTokenExchanger {
    client: reqwest::Client,
    token_url: url::Url,
    client_id: String,
    client_secret: SecretString,
    format: TokenRequestFormat,
}

impl HttpTokenExchanger {
    /// Create an exchanger with security-hardened client defaults
    ///
    /// # Security Configuration
    /// - Redirects disabled (SSRF protection)
    /// - Request timeout of `timeout` as an outer bound
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidRequest`] for an unparsable token URL,
    /// [`AuthError::Internal`] when the HTTP client cannot be built.
    pub fn new(config: &OAuthConfig, timeout: Duration) -> AuthResult<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Internal(format!("HTTP client construction failed: {e}")))?;
        Self::with_client(config, client)
    }

    /// Create from an existing reqwest client
    ///
    /// # Warning
    /// Ensure the client is configured with `redirect::Policy::none()`.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidRequest`] for an unparsable token URL.
    pub fn with_client(config: &OAuthConfig, client: reqwest::Client) -> AuthResult<Self> {
        let token_url = url::Url::parse(&config.token_url)
            .map_err(|e| AuthError::InvalidRequest(format!("invalid token URL: {e}")))?;
        Ok(Self {
            client,
            token_url,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            format: config.token_request_format,
        })
    }
}

impl fmt::Debug for HttpTokenExchanger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTokenExchanger")
            .field("token_url", &self.token_url.as_str())
            .field("client_id", &self.client_id)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenExchanger for HttpTokenExchanger {
    async fn exchange(&self, request: ExchangeRequest) -> AuthResult<ProviderTokens> {
        let mut params: Vec<(&str, &str)> = vec![
            ("grant_type", "authorization_code"),
            ("code", request.code.as_str()),
            ("redirect_uri", request.redirect_uri.as_str()),
        ];
        if let Some(verifier) = &request.code_verifier {
            params.push(("code_verifier", verifier.expose_secret().as_str()));
        }

        let builder = self
            .client
            .post(self.token_url.clone())
            .basic_auth(&self.client_id, Some(self.client_secret.expose_secret()))
            .header(http::header::ACCEPT, "application/json");
        let builder = match self.format {
            TokenRequestFormat::Form => builder.form(&params),
            TokenRequestFormat::Json => {
                let body: HashMap<&str, &str> = params.into_iter().collect();
                builder.json(&body)
            }
        };

        let response = builder.send().await.map_err(|e| {
            warn!(error = %e, "Token endpoint unreachable");
            AuthError::ExchangeFailed(format!("token request failed: {e}"))
        })?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| AuthError::ExchangeFailed(format!("failed to read token response: {e}")))?;

        if !status.is_success() {
            let reason = serde_json::from_slice::<ProviderErrorBody>(&body)
                .map(|e| match e.error_description {
                    Some(description) => format!("{}: {description}", e.error),
                    None => e.error,
                })
                .unwrap_or_else(|_| "unrecognized error body".to_string());
            warn!(status = %status, reason = %reason, "Provider rejected authorization code");
            return Err(AuthError::ExchangeFailed(format!(
                "provider returned {status}: {reason}"
            )));
        }

        let tokens: ProviderTokens = serde_json::from_slice(&body)
            .map_err(|e| AuthError::ExchangeFailed(format!("invalid token response: {e}")))?;
        debug!(token_type = ?tokens.token_type, "Authorization code redeemed");
        Ok(tokens)
    }
}

// Custom deserialization for SecretString
fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Ok(SecretString::new(s))
}

fn deserialize_optional_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: Option<String> = Deserialize::deserialize(deserializer)?;
    Ok(s.map(SecretString::new))
}
