//! Common test utilities for integration tests
//!
//! Shared fixtures: a guard on a manual clock with an in-memory audit sink,
//! and a wiremock-backed authorization provider.

#![allow(dead_code)]

use std::sync::Arc;

use hookguard_auth::audit::MemoryAuditSink;
use hookguard_auth::clock::ManualClock;
use hookguard_auth::config::{GuardConfig, LocalWrapConfig, OAuthConfig, SigningKeyConfig};
use hookguard_auth::Guard;
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

/// Wall-clock start for every fixture clock
pub const START: u64 = 1_700_000_000;

/// Primary test signing secret
pub const SECRET: &str = "test-signing-secret-0123456789abcdef";

/// Redirect URI registered with the mock provider
pub const REDIRECT_URI: &str = "https://hooks.example.com/oauth/callback";

/// Configuration with one signing key and defaults elsewhere
pub fn test_config() -> GuardConfig {
    let mut config = GuardConfig::default();
    config.service_name = "hookguard-test".into();
    config.token.signing_keys = vec![SigningKeyConfig::new("k1", SECRET)];
    config
}

/// Guard plus handles to its clock and audit trail
pub struct TestGuard {
    pub guard: Guard,
    pub clock: ManualClock,
    pub audit: MemoryAuditSink,
}

impl TestGuard {
    /// Guard over [`test_config`]
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    /// Guard over `config` on a manual clock
    pub fn with_config(config: GuardConfig) -> Self {
        let clock = ManualClock::at(START);
        let audit = MemoryAuditSink::new();
        let guard = Guard::builder(config)
            .clock(Arc::new(clock.clone()))
            .audit_sink(Arc::new(audit.clone()))
            .build()
            .expect("test config is valid");
        Self {
            guard,
            clock,
            audit,
        }
    }
}

/// OAuth provider mock
pub struct MockProvider {
    pub server: MockServer,
    pub token_endpoint: String,
    pub authorize_endpoint: String,
}

impl MockProvider {
    /// Start a provider with nothing mounted
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let base_url = server.uri();

        Self {
            token_endpoint: format!("{}/v1/oauth/token", base_url),
            authorize_endpoint: format!("{}/v1/oauth/authorize", base_url),
            server,
        }
    }

    /// Provider configuration pointing at this mock
    pub fn oauth_config(&self) -> OAuthConfig {
        let mut config = OAuthConfig::new(
            "client-abc",
            "client-secret-xyz",
            &self.authorize_endpoint,
            &self.token_endpoint,
        );
        config.redirect_uris = vec![REDIRECT_URI.to_string()];
        config
    }

    /// Same, wrapping results into local tokens keyed by `bot_id`
    pub fn wrapping_oauth_config(&self) -> OAuthConfig {
        let mut config = self.oauth_config();
        config.wrap = Some(LocalWrapConfig {
            subject_field: "bot_id".into(),
            scopes: vec!["export:create".into()],
        });
        config
    }

    /// Successful token response carrying provider-specific fields
    pub async fn mock_token_success(&self, access_token: &str) {
        Mock::given(method("POST"))
            .and(path("/v1/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": access_token,
                "token_type": "bearer",
                "bot_id": "bot-1234",
                "workspace_id": "ws-42",
                "workspace_name": "Acme Notes",
            })))
            .mount(&self.server)
            .await;
    }

    /// RFC 6749 error response
    pub async fn mock_token_error(&self, error: &str, description: &str) {
        Mock::given(method("POST"))
            .and(path("/v1/oauth/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": error,
                "error_description": description,
            })))
            .mount(&self.server)
            .await;
    }

    /// Successful response delivered after `delay`
    pub async fn mock_token_slow(&self, access_token: &str, delay: std::time::Duration) {
        Mock::given(method("POST"))
            .and(path("/v1/oauth/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({
                        "access_token": access_token,
                        "token_type": "bearer",
                        "bot_id": "bot-1234",
                    }))
                    .set_delay(delay),
            )
            .mount(&self.server)
            .await;
    }
}
