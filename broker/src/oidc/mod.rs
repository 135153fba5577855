// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! OAuth 2.0 / OIDC token acquisition.
//!
//! - [`client_credentials`]: the five client authentication methods
//! - [`device_code`]: RFC 8628 device authorization polling
//! - [`discovery`]: cached `.well-known/openid-configuration`
//! - [`claims`]: unverified JWT claim decoding for expiry estimation

pub mod claims;
pub mod client_credentials;
pub mod device_code;
pub mod discovery;

use std::fmt;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::errors::{BrokerError, Result};
use crate::http::{self, unsafe_debug_enabled};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAssertionType {
    JwtBearer,
    Pkcs7Bearer,
    IdTokenBearer,
    X509JwtBearer,
}

impl ClientAssertionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::JwtBearer => "urn:ietf:params:oauth:client-assertion-type:jwt-bearer",
            Self::Pkcs7Bearer => "urn:cloud:idaas:params:oauth:client-assertion-type:pkcs7-bearer",
            Self::IdTokenBearer => {
                "urn:cloud:idaas:params:oauth:client-assertion-type:id-token-bearer"
            }
            Self::X509JwtBearer => {
                "urn:cloud:idaas:params:oauth:client-assertion-type:x509-jwt-bearer"
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantType {
    ClientCredentials,
    DeviceCode,
}

impl GrantType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientCredentials => "client_credentials",
            Self::DeviceCode => "urn:ietf:params:oauth:grant-type:device_code",
        }
    }
}

/// OAuth error codes the broker reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OAuthErrorCode {
    AuthorizationPending,
    SlowDown,
    AccessDenied,
    Other(String),
}

impl From<&str> for OAuthErrorCode {
    fn from(code: &str) -> Self {
        match code {
            "authorization_pending" => Self::AuthorizationPending,
            "slow_down" => Self::SlowDown,
            "access_denied" => Self::AccessDenied,
            other => Self::Other(other.to_string()),
        }
    }
}

/// RFC 6749 token response, `expires_at` is an IDaaS extension.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub expires_at: i64,
    pub scope: String,
    pub id_token: String,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .field("has_access_token", &!self.access_token.is_empty())
            .field("has_id_token", &!self.id_token.is_empty())
            .finish()
    }
}

/// RFC 8628 device authorization response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DeviceCodeResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub verification_uri_complete: String,
    pub expires_in: i64,
    pub expires_at: i64,
    pub interval: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ErrorResponse {
    pub error: String,
    pub error_description: String,
    pub error_uri: String,
    pub request_id: String,
}

impl ErrorResponse {
    pub fn code(&self) -> OAuthErrorCode {
        OAuthErrorCode::from(self.error.as_str())
    }
}

impl From<ErrorResponse> for BrokerError {
    fn from(response: ErrorResponse) -> Self {
        BrokerError::OAuth {
            error: response.error,
            description: response.error_description,
            request_id: response.request_id,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenIdConfiguration {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub device_authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,
    pub revocation_endpoint: String,
    pub jwks_uri: String,
    pub scopes_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
}

/// Fields of a token endpoint request. Empty fields are not sent.
#[derive(Default)]
pub struct TokenRequest<'a> {
    pub client_id: &'a str,
    pub client_secret: &'a str,
    pub grant_type: Option<GrantType>,
    pub device_code: &'a str,
    pub scope: &'a str,
    pub client_assertion_type: Option<ClientAssertionType>,
    pub client_assertion: &'a str,
    pub client_x509: &'a str,
    pub client_x509_chain: &'a str,
    pub application_federated_credential_name: &'a str,
}

impl TokenRequest<'_> {
    fn form(&self) -> Vec<(&str, &str)> {
        vec![
            ("client_id", self.client_id),
            ("client_secret", self.client_secret),
            ("grant_type", self.grant_type.map(GrantType::as_str).unwrap_or_default()),
            ("device_code", self.device_code),
            ("scope", self.scope),
            (
                "client_assertion_type",
                self.client_assertion_type
                    .map(ClientAssertionType::as_str)
                    .unwrap_or_default(),
            ),
            ("client_assertion", self.client_assertion),
            ("client_x509", self.client_x509),
            ("client_x509_chain", self.client_x509_chain),
            (
                "application_federated_credential_name",
                self.application_federated_credential_name,
            ),
        ]
    }
}

/// A token endpoint answer: the token, or the structured OAuth error the
/// server returned with a non-200 status.
pub type TokenResult = std::result::Result<TokenResponse, ErrorResponse>;

/// POSTs a token request. Transport failures and unparseable bodies are
/// `Err`, protocol errors are `Ok(Err(..))`.
#[tracing::instrument(skip(client, request))]
pub async fn fetch_token(
    client: &Client,
    token_endpoint: &str,
    request: &TokenRequest<'_>,
) -> Result<TokenResult> {
    let response = http::post_form(client, token_endpoint, &request.form()).await?;
    if !response.is_ok() {
        tracing::error!(
            "[oidc] failed to fetch token, status: {}",
            response.status.as_u16()
        );
        let error: ErrorResponse = serde_json::from_str(&response.body).map_err(|e| {
            BrokerError::Transport(format!(
                "failed to parse error response: {}, status: {}: {e}",
                response.body,
                response.status.as_u16()
            ))
        })?;
        return Ok(Err(error));
    }
    let token: TokenResponse = serde_json::from_str(&response.body).map_err(|e| {
        BrokerError::Transport(format!("failed to unmarshal token response: {e}"))
    })?;
    if unsafe_debug_enabled() {
        tracing::debug!("[unsafe] fetched token: {}", response.body);
    }
    Ok(Ok(token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::build_http_client;
    use mockito::Matcher;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(
            OAuthErrorCode::from("authorization_pending"),
            OAuthErrorCode::AuthorizationPending
        );
        assert_eq!(OAuthErrorCode::from("slow_down"), OAuthErrorCode::SlowDown);
        assert_eq!(OAuthErrorCode::from("access_denied"), OAuthErrorCode::AccessDenied);
        assert_eq!(
            OAuthErrorCode::from("invalid_grant"),
            OAuthErrorCode::Other("invalid_grant".into())
        );
    }

    #[tokio::test]
    async fn test_fetch_token_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("client_id".into(), "app".into()),
                Matcher::UrlEncoded(
                    "client_assertion_type".into(),
                    "urn:cloud:idaas:params:oauth:client-assertion-type:pkcs7-bearer".into(),
                ),
                Matcher::UrlEncoded("client_assertion".into(), "MIIB".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token":"at","token_type":"Bearer","expires_in":3600}"#)
            .create_async()
            .await;

        let client = build_http_client().unwrap();
        let request = TokenRequest {
            client_id: "app",
            grant_type: Some(GrantType::ClientCredentials),
            client_assertion_type: Some(ClientAssertionType::Pkcs7Bearer),
            client_assertion: "MIIB",
            ..Default::default()
        };
        let token = fetch_token(&client, &format!("{}/token", server.url()), &request)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(token.access_token, "at");
        assert_eq!(token.expires_in, 3600);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_token_oauth_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_client","error_description":"bad","request_id":"r1"}"#)
            .create_async()
            .await;
        let client = build_http_client().unwrap();
        let result = fetch_token(
            &client,
            &format!("{}/token", server.url()),
            &TokenRequest::default(),
        )
        .await
        .unwrap();
        let error = result.unwrap_err();
        assert_eq!(error.code(), OAuthErrorCode::Other("invalid_client".into()));
        let err: BrokerError = error.into();
        assert_eq!(
            err.to_string(),
            "oauth error: invalid_client, description: bad, request id: r1"
        );
    }

    #[tokio::test]
    async fn test_fetch_token_unparseable_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(502)
            .with_body("<html>bad gateway</html>")
            .create_async()
            .await;
        let client = build_http_client().unwrap();
        let err = fetch_token(
            &client,
            &format!("{}/token", server.url()),
            &TokenRequest::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BrokerError::Transport(_)));
    }

    #[test]
    fn test_token_debug_hides_tokens() {
        let token = TokenResponse {
            access_token: "secret-at".into(),
            id_token: "secret-id".into(),
            ..Default::default()
        };
        let debug = format!("{token:?}");
        assert!(!debug.contains("secret"));
    }
}
