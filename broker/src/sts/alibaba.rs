// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Alibaba Cloud `AssumeRoleWithOIDC`, called anonymously over the RPC
//! style API.

use std::time::Duration;

use data_encoding::HEXLOWER;
use serde::Deserialize;

use crate::application::Application;
use crate::constants::{ALIBABA_STS_API_VERSION, STS_MAX_ATTEMPTS};
use crate::errors::{BrokerError, Result};
use crate::http::{self, HttpResponse, unsafe_debug_enabled};
use crate::models::AlibabaCloudStsToken;
use crate::profile::{AlibabaCloudStsConfig, Digest};
use crate::sts::{fetch_sts_cached, resolve_role_session_name};
use crate::token::fetch_oidc_bearer_token;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct AssumeRoleWithOidcResponse {
    request_id: String,
    credentials: Option<Credentials>,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct Credentials {
    access_key_id: String,
    access_key_secret: String,
    security_token: String,
    expiration: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("expiration", &self.expiration)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct StsErrorResponse {
    request_id: String,
    code: String,
    message: String,
}

/// Parameters of one `AssumeRoleWithOIDC` call.
#[derive(Debug, Clone, Default)]
pub struct AssumeRoleWithOidcRequest<'a> {
    pub oidc_provider_arn: &'a str,
    pub role_arn: &'a str,
    pub role_session_name: &'a str,
    pub duration_seconds: i64,
}

/// `https://sts.<region>.aliyuncs.com` unless an endpoint is configured. A
/// configured endpoint without scheme gets `https://`.
pub fn sts_endpoint(config: &AlibabaCloudStsConfig) -> Result<String> {
    let endpoint = if !config.sts_endpoint.is_empty() {
        config.sts_endpoint.clone()
    } else if !config.region.is_empty() {
        format!("sts.{}.aliyuncs.com", config.region)
    } else {
        return Err(BrokerError::config(
            "StsEndpoint or Region at least one is required",
        ));
    };
    if endpoint.contains("://") {
        Ok(endpoint)
    } else {
        Ok(format!("https://{endpoint}"))
    }
}

/// Exchanges `oidc_token` for temporary credentials. Transport failures and
/// 5xx answers are retried.
#[tracing::instrument(skip(app, oidc_token))]
pub async fn assume_role_with_oidc(
    app: &Application,
    endpoint: &str,
    request: &AssumeRoleWithOidcRequest<'_>,
    oidc_token: &str,
) -> Result<AlibabaCloudStsToken> {
    let role_session_name = resolve_role_session_name(request.role_session_name, oidc_token);
    tracing::debug!(
        "[sts] assume role, OIDCProviderArn: {}, RoleArn: {}, RoleSessionName: {}",
        request.oidc_provider_arn,
        request.role_arn,
        role_session_name
    );

    let duration = if request.duration_seconds > 0 {
        request.duration_seconds.to_string()
    } else {
        String::new()
    };

    let mut attempt = 0;
    let response = loop {
        attempt += 1;
        let timestamp = chrono::Utc::now()
            .format("%Y-%m-%dT%H:%M:%SZ")
            .to_string();
        let mut nonce = [0u8; 16];
        fastrand::fill(&mut nonce);
        let nonce = HEXLOWER.encode(&nonce);
        let params = [
            ("Action", "AssumeRoleWithOIDC"),
            ("Format", "JSON"),
            ("Version", ALIBABA_STS_API_VERSION),
            ("Timestamp", timestamp.as_str()),
            ("SignatureNonce", nonce.as_str()),
            ("OIDCProviderArn", request.oidc_provider_arn),
            ("RoleArn", request.role_arn),
            ("OIDCToken", oidc_token),
            ("RoleSessionName", role_session_name.as_str()),
            ("DurationSeconds", duration.as_str()),
        ];
        let result = http::post_form(&app.http, endpoint, &params).await;
        match result {
            Ok(response) if !response.status.is_server_error() => break response,
            Ok(response) if attempt >= STS_MAX_ATTEMPTS => break response,
            Err(e) if attempt >= STS_MAX_ATTEMPTS => return Err(e),
            Ok(response) => tracing::warn!(
                "[sts] assume role attempt {} failed, status: {}",
                attempt,
                response.status.as_u16()
            ),
            Err(e) => tracing::warn!("[sts] assume role attempt {} failed: {}", attempt, e),
        }
        tokio::time::sleep(retry_backoff(attempt)).await;
    };

    parse_response(response)
}

fn retry_backoff(attempt: u32) -> Duration {
    Duration::from_millis(100 * u64::from(attempt) + fastrand::u64(0..100))
}

fn parse_response(response: HttpResponse) -> Result<AlibabaCloudStsToken> {
    if !response.is_ok() {
        let error: StsErrorResponse = serde_json::from_str(&response.body).unwrap_or_default();
        tracing::error!(
            "[sts] failed assume role with OIDC, status: {}, code: {}",
            response.status.as_u16(),
            error.code
        );
        return Err(BrokerError::Sts(format!(
            "failed assume role with OIDC, status: {}, code: {}, message: {}, request id: {}",
            response.status.as_u16(),
            error.code,
            error.message,
            error.request_id
        )));
    }
    let parsed: AssumeRoleWithOidcResponse = serde_json::from_str(&response.body)
        .map_err(|e| BrokerError::Sts(format!("invalid AssumeRoleWithOIDC response: {e}")))?;
    let credentials = parsed.credentials.ok_or_else(|| {
        BrokerError::Sts(format!(
            "no credentials in AssumeRoleWithOIDC response, request id: {}",
            parsed.request_id
        ))
    })?;
    if unsafe_debug_enabled() {
        tracing::debug!("[unsafe] sts credentials: {:?}", credentials);
    }
    Ok(AlibabaCloudStsToken {
        mode: AlibabaCloudStsToken::MODE.to_string(),
        access_key_id: credentials.access_key_id,
        access_key_secret: credentials.access_key_secret,
        sts_token: credentials.security_token,
        expiration: credentials.expiration,
    })
}

/// Cached Alibaba Cloud credentials for `profile`. The OIDC bearer token is
/// only fetched when the cache needs a refresh.
#[tracing::instrument(skip(app, config))]
pub async fn fetch_alibaba_cloud_sts(
    app: &Application,
    profile: &str,
    config: &AlibabaCloudStsConfig,
    force_new: bool,
) -> Result<AlibabaCloudStsToken> {
    let provider = config
        .oidc_token_provider
        .as_ref()
        .ok_or_else(|| BrokerError::config("OidcTokenProvider is required"))?;
    let endpoint = sts_endpoint(config)?;
    tracing::debug!("[sts] sts endpoint: {}", endpoint);

    fetch_sts_cached(
        app,
        profile,
        &config.digest(),
        force_new,
        AlibabaCloudStsToken::is_valid_at_least,
        || async {
            let oidc_token = fetch_oidc_bearer_token(app, profile, provider, force_new).await?;
            let request = AssumeRoleWithOidcRequest {
                oidc_provider_arn: &config.oidc_provider_arn,
                role_arn: &config.role_arn,
                role_session_name: &config.role_session_name,
                duration_seconds: config.duration_seconds,
            };
            assume_role_with_oidc(app, &endpoint, &request, &oidc_token).await
        },
    )
    .await
}
