// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! OIDC tokens produced by a configured provider, either as the bearer for
//! a cloud STS exchange or as the final credential of a raw OIDC target.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::application::Application;
use crate::cache::FetchOptions;
use crate::constants::{
    CATEGORY_CLOUD_TOKEN, CATEGORY_OIDC_TOKEN, OIDC_TOKEN_EXPIRY_THRESHOLD, OIDC_TOKEN_REFRESH_THRESHOLD,
    RAW_OIDC_EXPIRY_THRESHOLD, RAW_OIDC_REFRESH_THRESHOLD,
};
use crate::errors::{BrokerError, Result, ResultExt};
use crate::oidc::TokenResponse;
use crate::oidc::claims::{SimpleJwtClaims, jwt_valid_at_least};
use crate::oidc::client_credentials::fetch_token_client_credentials;
use crate::oidc::device_code::fetch_token_via_device_code;
use crate::profile::{Digest, OidcTokenProviderConfig};

/// Which field of an [`OidcToken`] the caller is interested in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OidcField {
    IdToken,
    AccessToken,
    /// Both, preferring the ID token for output.
    #[default]
    Default,
}

impl OidcField {
    fn checks_id_token(self) -> bool {
        matches!(self, Self::IdToken | Self::Default)
    }

    fn checks_access_token(self) -> bool {
        matches!(self, Self::AccessToken | Self::Default)
    }
}

impl FromStr for OidcField {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "id_token" => Ok(Self::IdToken),
            "access_token" => Ok(Self::AccessToken),
            "" | "default" => Ok(Self::Default),
            other => Err(BrokerError::config(format!(
                "unknown oidc field: {other}, expected id_token or access_token"
            ))),
        }
    }
}

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OidcToken {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id_token: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub token_type: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub scope: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub access_token: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub refresh_token: String,
    pub expires_in: i64,
    /// Unix seconds, 0 when unknown.
    pub expires_at: i64,
}

impl fmt::Debug for OidcToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OidcToken")
            .field("id_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("access_token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl OidcToken {
    /// `started_at` is the unix time the request was sent, used when the
    /// server only reports a relative lifetime.
    pub fn from_response(response: &TokenResponse, started_at: i64) -> Self {
        let expires_at = if response.expires_at > 0 {
            response.expires_at
        } else if response.expires_in > 0 {
            started_at + response.expires_in
        } else {
            0
        };
        Self {
            id_token: response.id_token.clone(),
            token_type: response.token_type.clone(),
            scope: response.scope.clone(),
            access_token: response.access_token.clone(),
            refresh_token: response.refresh_token.clone(),
            expires_in: response.expires_in,
            expires_at,
        }
    }

    /// The token string handed to consumers for `field`.
    pub fn select(&self, field: OidcField) -> &str {
        match field {
            OidcField::IdToken => &self.id_token,
            OidcField::AccessToken => &self.access_token,
            OidcField::Default if !self.id_token.is_empty() => &self.id_token,
            OidcField::Default => &self.access_token,
        }
    }

    pub fn is_valid_at_least_at(&self, field: OidcField, threshold: Duration, now: i64) -> bool {
        if !self.id_token.is_empty() && field.checks_id_token() {
            let Ok(claims) = SimpleJwtClaims::parse(&self.id_token) else {
                return false;
            };
            if claims.expires_at == 0 || !claims.is_valid_at_least_at(threshold, now) {
                return false;
            }
        }
        if self.expires_at > 0 && field.checks_access_token() {
            let threshold = i64::try_from(threshold.as_secs()).unwrap_or(i64::MAX);
            return self.expires_at - now > threshold;
        }
        true
    }

    pub fn is_valid_at_least(&self, field: OidcField, threshold: Duration) -> bool {
        let valid = self.is_valid_at_least_at(field, threshold, chrono::Utc::now().timestamp());
        tracing::debug!(
            "[oidc] token valid at least {:?} for {:?}: {}",
            threshold,
            field,
            valid
        );
        valid
    }
}

fn parse_oidc_token(content: &str) -> Option<OidcToken> {
    serde_json::from_str(content).ok()
}

/// Runs whichever flow the provider configures. Exactly one must be set.
pub async fn fetch_token_response(
    app: &Application,
    provider: &OidcTokenProviderConfig,
    force_new: bool,
) -> Result<TokenResponse> {
    match (&provider.device_code, &provider.client_credentials) {
        (Some(device_code), None) => fetch_token_via_device_code(app, device_code, force_new).await,
        (None, Some(client_credentials)) => {
            fetch_token_client_credentials(app, client_credentials).await
        }
        (Some(_), Some(_)) => Err(BrokerError::config(
            "device_code and client_credentials cannot both be set",
        )),
        (None, None) => Err(BrokerError::config(
            "one of device_code or client_credentials must be set",
        )),
    }
}

/// Fetches the JWT presented to a cloud STS endpoint: the ID token of a
/// device login, or the access token of a client credentials grant.
#[tracing::instrument(skip(app, provider))]
pub async fn fetch_oidc_bearer_token(
    app: &Application,
    profile: &str,
    provider: &OidcTokenProviderConfig,
    force_new: bool,
) -> Result<String> {
    let digest = provider.digest();
    let key = format!("{}_{}", provider.id(), &digest[..32]);
    tracing::debug!("[oidc] cache key: {} {}", CATEGORY_OIDC_TOKEN, key);

    let options = FetchOptions::with_predicates(
        |envelope| !jwt_valid_at_least(&envelope.content, OIDC_TOKEN_REFRESH_THRESHOLD),
        |envelope| !jwt_valid_at_least(&envelope.content, OIDC_TOKEN_EXPIRY_THRESHOLD),
    )
    .context(json!({"profile": profile, "digest": digest}))
    .force_new(force_new);

    app.cache
        .fetch_or_reuse(CATEGORY_OIDC_TOKEN, &key, options, || async {
            let response = fetch_token_response(app, provider, force_new).await?;
            let token = if provider.device_code.is_some() {
                response.id_token.clone()
            } else {
                response.access_token.clone()
            };
            if token.is_empty() {
                return Err(BrokerError::Transport(
                    "token endpoint returned no bearer token".to_string(),
                ));
            }
            Ok(token)
        })
        .await
        .with_context(|| format!("fetch oidc token, profile: {profile}"))
}

/// Fetches the token of a raw OIDC target profile.
#[tracing::instrument(skip(app, provider))]
pub async fn fetch_oidc_token(
    app: &Application,
    profile: &str,
    provider: &OidcTokenProviderConfig,
    field: OidcField,
    force_new: bool,
) -> Result<OidcToken> {
    let digest = provider.digest();
    let key = format!("{profile}_{}", &digest[..32]);
    tracing::debug!("[oidc] cache key: {} {}", CATEGORY_CLOUD_TOKEN, key);

    let options = FetchOptions::with_predicates(
        move |envelope| {
            parse_oidc_token(&envelope.content)
                .is_none_or(|token| !token.is_valid_at_least(field, RAW_OIDC_REFRESH_THRESHOLD))
        },
        move |envelope| {
            parse_oidc_token(&envelope.content)
                .is_none_or(|token| !token.is_valid_at_least(field, RAW_OIDC_EXPIRY_THRESHOLD))
        },
    )
    .context(json!({"profile": profile, "digest": digest}))
    .force_new(force_new);

    let content = app
        .cache
        .fetch_or_reuse(CATEGORY_CLOUD_TOKEN, &key, options, || async {
            let started_at = chrono::Utc::now().timestamp();
            let response = fetch_token_response(app, provider, force_new).await?;
            let token = OidcToken::from_response(&response, started_at);
            Ok::<_, BrokerError>(serde_json::to_string(&token)?)
        })
        .await
        .with_context(|| format!("fetch oidc token, profile: {profile}"))?;

    serde_json::from_str(&content)
        .map_err(|e| BrokerError::Cache(format!("unmarshal oidc token failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::MetadataEndpoints;
    use crate::cache::{CacheService, CachedEnvelope};
    use crate::http::build_http_client;
    use crate::oidc::claims::unsigned_jwt;
    use crate::profile::{ClientCredentialsConfig, DeviceCodeConfig};
    use idaas_signer::SecretValue;

    fn app(dir: &std::path::Path) -> Application {
        Application::new(
            CacheService::open(dir.join("cache"), dir).unwrap(),
            build_http_client().unwrap(),
            MetadataEndpoints::all("http://127.0.0.1:9"),
        )
    }

    fn client_secret_provider(endpoint: String) -> OidcTokenProviderConfig {
        OidcTokenProviderConfig {
            client_credentials: Some(ClientCredentialsConfig {
                token_endpoint: endpoint,
                client_id: "app".into(),
                client_secret: SecretValue::new("s"),
                ..Default::default()
            }),
            device_code: None,
        }
    }

    // ==================== OidcToken Tests ====================

    #[test]
    fn test_oidc_field_parse() {
        assert_eq!("id_token".parse::<OidcField>().unwrap(), OidcField::IdToken);
        assert_eq!("access_token".parse::<OidcField>().unwrap(), OidcField::AccessToken);
        assert_eq!("".parse::<OidcField>().unwrap(), OidcField::Default);
        assert!("refresh_token".parse::<OidcField>().is_err());
    }

    #[test]
    fn test_expires_at_derived_from_expires_in() {
        let response = TokenResponse {
            access_token: "at".into(),
            expires_in: 600,
            ..Default::default()
        };
        assert_eq!(OidcToken::from_response(&response, 1_000).expires_at, 1_600);

        let response = TokenResponse {
            expires_in: 600,
            expires_at: 5_000,
            ..Default::default()
        };
        assert_eq!(OidcToken::from_response(&response, 1_000).expires_at, 5_000);
        assert_eq!(OidcToken::from_response(&TokenResponse::default(), 1_000).expires_at, 0);
    }

    #[test]
    fn test_select_prefers_id_token() {
        let token = OidcToken {
            id_token: "id".into(),
            access_token: "at".into(),
            ..Default::default()
        };
        assert_eq!(token.select(OidcField::Default), "id");
        assert_eq!(token.select(OidcField::AccessToken), "at");
        let token = OidcToken {
            access_token: "at".into(),
            ..Default::default()
        };
        assert_eq!(token.select(OidcField::Default), "at");
    }

    #[test]
    fn test_validity_checks_selected_fields() {
        let now = 10_000;
        let token = OidcToken {
            id_token: unsigned_jwt(&json!({"exp": now + 60})),
            access_token: "at".into(),
            expires_at: now + 3_600,
            ..Default::default()
        };
        let threshold = Duration::from_secs(180);
        // ID token expires within the threshold
        assert!(!token.is_valid_at_least_at(OidcField::Default, threshold, now));
        assert!(!token.is_valid_at_least_at(OidcField::IdToken, threshold, now));
        assert!(token.is_valid_at_least_at(OidcField::AccessToken, threshold, now));

        let opaque = OidcToken {
            access_token: "at".into(),
            ..Default::default()
        };
        assert!(opaque.is_valid_at_least_at(OidcField::Default, threshold, now));
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let token = OidcToken {
            id_token: "secret-id".into(),
            access_token: "secret-at".into(),
            ..Default::default()
        };
        let debug = format!("{token:?}");
        assert!(!debug.contains("secret-id"));
        assert!(!debug.contains("secret-at"));
    }

    // ==================== Provider Selection Tests ====================

    #[tokio::test]
    async fn test_provider_requires_exactly_one_flow() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        let err = fetch_token_response(&app, &OidcTokenProviderConfig::default(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Config(_)));

        let mut both = client_secret_provider("http://127.0.0.1:9/token".into());
        both.device_code = Some(Default::default());
        let err = fetch_token_response(&app, &both, false).await.unwrap_err();
        assert!(err.to_string().contains("cannot both be set"));
    }

    // ==================== Cached Fetch Tests ====================

    #[tokio::test]
    async fn test_bearer_token_is_cached() {
        let jwt = unsigned_jwt(&json!({"sub": "app", "exp": chrono::Utc::now().timestamp() + 3600}));
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .with_status(200)
            .with_body(json!({"access_token": jwt, "expires_in": 3600}).to_string())
            .expect(1)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        let provider = client_secret_provider(format!("{}/token", server.url()));
        let first = fetch_oidc_bearer_token(&app, "dev", &provider, false).await.unwrap();
        let second = fetch_oidc_bearer_token(&app, "dev", &provider, false).await.unwrap();
        assert_eq!(first, jwt);
        assert_eq!(second, jwt);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_expiring_bearer_token_is_refetched() {
        // valid for 90s, below the 2 minute refresh threshold
        let jwt = unsigned_jwt(&json!({"exp": chrono::Utc::now().timestamp() + 90}));
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .with_status(200)
            .with_body(json!({"access_token": jwt}).to_string())
            .expect(2)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        let provider = client_secret_provider(format!("{}/token", server.url()));
        fetch_oidc_bearer_token(&app, "dev", &provider, false).await.unwrap();
        fetch_oidc_bearer_token(&app, "dev", &provider, false).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_raw_oidc_token_target() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .with_status(200)
            .with_body(r#"{"access_token":"opaque-at","token_type":"Bearer","expires_in":3600}"#)
            .expect(1)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        let provider = client_secret_provider(format!("{}/token", server.url()));
        let token = fetch_oidc_token(&app, "raw", &provider, OidcField::Default, false)
            .await
            .unwrap();
        assert_eq!(token.select(OidcField::Default), "opaque-at");
        assert!(token.expires_at > chrono::Utc::now().timestamp());

        let cached = fetch_oidc_token(&app, "raw", &provider, OidcField::AccessToken, false)
            .await
            .unwrap();
        assert_eq!(cached, token);
        mock.assert_async().await;
    }

    // ==================== Device Login Fallback Tests ====================

    fn device_provider(issuer: String) -> OidcTokenProviderConfig {
        OidcTokenProviderConfig {
            client_credentials: None,
            device_code: Some(DeviceCodeConfig {
                issuer,
                client_id: "cli".into(),
                ..Default::default()
            }),
        }
    }

    /// Caches `token` under the bearer token key of `provider`.
    fn seed_bearer_token(app: &Application, provider: &OidcTokenProviderConfig, token: &str) {
        let key = format!("{}_{}", provider.id(), &provider.digest()[..32]);
        app.cache
            .write(
                CATEGORY_OIDC_TOKEN,
                &key,
                &CachedEnvelope::new(json!({"profile": "dev"}), token.to_string()),
            )
            .unwrap();
    }

    /// Discovery and device authorization succeed, the token poll answers
    /// with `poll_error`.
    async fn mock_device_login(
        server: &mut mockito::ServerGuard,
        poll_error: &str,
    ) -> Vec<mockito::Mock> {
        let discovery = json!({
            "issuer": server.url(),
            "token_endpoint": format!("{}/token", server.url()),
            "device_authorization_endpoint": format!("{}/device", server.url()),
        });
        vec![
            server
                .mock("GET", "/.well-known/openid-configuration")
                .with_status(200)
                .with_body(discovery.to_string())
                .create_async()
                .await,
            server
                .mock("POST", "/device")
                .with_status(200)
                .with_body(
                    json!({"device_code": "dc", "user_code": "UC", "verification_uri": "https://idp/verify", "interval": 2})
                        .to_string(),
                )
                .create_async()
                .await,
            server
                .mock("POST", "/token")
                .with_status(400)
                .with_body(json!({"error": poll_error}).to_string())
                .expect(1)
                .create_async()
                .await,
        ]
    }

    #[tokio::test]
    async fn test_denied_login_does_not_return_stale_token() {
        let mut server = mockito::Server::new_async().await;
        let mocks = mock_device_login(&mut server, "access_denied").await;

        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        let provider = device_provider(server.url());
        // past the refresh threshold, still before hard expiry
        let stale = unsigned_jwt(&json!({"sub": "u", "exp": chrono::Utc::now().timestamp() + 90}));
        seed_bearer_token(&app, &provider, &stale);

        let err = fetch_oidc_bearer_token(&app, "dev", &provider, false)
            .await
            .unwrap_err();
        assert!(err.is_stop_fallback());
        mocks[2].assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_login_falls_back_to_stale_token() {
        let mut server = mockito::Server::new_async().await;
        let mocks = mock_device_login(&mut server, "expired_token").await;

        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        let provider = device_provider(server.url());
        let stale = unsigned_jwt(&json!({"sub": "u", "exp": chrono::Utc::now().timestamp() + 90}));
        seed_bearer_token(&app, &provider, &stale);

        let token = fetch_oidc_bearer_token(&app, "dev", &provider, false)
            .await
            .unwrap();
        assert_eq!(token, stale);
        mocks[2].assert_async().await;
    }
}
