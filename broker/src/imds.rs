// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Instance identity documents from cloud metadata services.

use std::str::FromStr;

use aws_config::imds::client::{Client, ImdsResponseRetryClassifier};
use aws_smithy_runtime_api::client::retries::classifiers::SharedRetryClassifier;
use data_encoding::BASE64;
use serde::Deserialize;
use serde_json::json;

use crate::application::Application;
use crate::constants::{DEFAULT_IDENTITY_AUDIENCE, METADATA_TOKEN_TTL};
use crate::errors::{BrokerError, Result, ResultExt};
use crate::http::{fetch_ok, unsafe_debug_enabled};
use crate::profile::{OidcTokenConfig, Pkcs7Config};

const ALIBABA_TOKEN_PATH: &str = "/latest/api/token";
const ALIBABA_TOKEN_TTL_HEADER: &str = "X-aliyun-ecs-metadata-token-ttl-seconds";
const ALIBABA_TOKEN_HEADER: &str = "X-aliyun-ecs-metadata-token";
const ALIBABA_PKCS7_PATH: &str = "/latest/dynamic/instance-identity/pkcs7";
const AWS_RSA2048_PATH: &str = "/latest/dynamic/instance-identity/rsa2048";
const AZURE_ATTESTED_PATH: &str = "/metadata/attested/document?api-version=2020-09-01";
const GCP_IDENTITY_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/identity";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pkcs7Provider {
    AlibabaCloud,
    Aws,
    Azure,
}

impl FromStr for Pkcs7Provider {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "alibaba_cloud" => Ok(Self::AlibabaCloud),
            "aws" => Ok(Self::Aws),
            "azure" => Ok(Self::Azure),
            other => Err(BrokerError::config(format!("unknown provider {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlibabaCloudMode {
    Normal,
    /// Hardened mode, the metadata service requires a session token.
    Secure,
}

impl FromStr for AlibabaCloudMode {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | "normal" => Ok(Self::Normal),
            "secure" => Ok(Self::Secure),
            other => Err(BrokerError::config(format!(
                "unknown alibaba cloud mode: {other}, must be secure or normal"
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AzureAttestedDocument {
    #[serde(default)]
    encoding: String,
    #[serde(default)]
    signature: String,
}

/// Fetches the raw PKCS#7 instance identity document for the configured cloud.
#[tracing::instrument(skip(app))]
pub async fn fetch_pkcs7(app: &Application, config: &Pkcs7Config) -> Result<Vec<u8>> {
    let provider = Pkcs7Provider::from_str(&config.provider)?;
    let pkcs7 = match provider {
        Pkcs7Provider::AlibabaCloud => {
            let mode = AlibabaCloudMode::from_str(&config.alibaba_cloud_mode)?;
            fetch_alibaba_cloud_pkcs7(app, &config.alibaba_cloud_idaas_instance_id, mode).await
        }
        Pkcs7Provider::Aws => fetch_aws_rsa2048(app).await,
        Pkcs7Provider::Azure => fetch_azure_attested(app).await,
    }
    .with_context(|| format!("fetch pkcs7 from {} failed", config.provider))?;

    if unsafe_debug_enabled() {
        tracing::debug!("[unsafe] {} PKCS#7: {}", config.provider, BASE64.encode(&pkcs7));
    }
    Ok(pkcs7)
}

async fn fetch_alibaba_cloud_pkcs7(
    app: &Application,
    instance_id: &str,
    mode: AlibabaCloudMode,
) -> Result<Vec<u8>> {
    let base = app.metadata.alibaba_cloud.trim_end_matches('/');
    let token = match mode {
        AlibabaCloudMode::Secure => Some(
            fetch_ok(
                app.http
                    .put(format!("{base}{ALIBABA_TOKEN_PATH}"))
                    .header(ALIBABA_TOKEN_TTL_HEADER, METADATA_TOKEN_TTL.as_secs().to_string()),
            )
            .await?,
        ),
        AlibabaCloudMode::Normal => None,
    };

    let audience = json!({
        "aud": instance_id,
        "signingTime": chrono::Utc::now().timestamp(),
    })
    .to_string();
    let mut request = app
        .http
        .get(format!("{base}{ALIBABA_PKCS7_PATH}"))
        .query(&[("audience", audience.as_str())]);
    if let Some(token) = token {
        request = request.header(ALIBABA_TOKEN_HEADER, token);
    }
    Ok(decode_document(fetch_ok(request).await?))
}

async fn fetch_aws_rsa2048(app: &Application) -> Result<Vec<u8>> {
    let client = Client::builder()
        .endpoint(&app.metadata.aws)
        .map_err(|e| BrokerError::config(e.to_string()))?
        .token_ttl(METADATA_TOKEN_TTL)
        .retry_classifier(SharedRetryClassifier::new(
            ImdsResponseRetryClassifier::default().with_retry_connect_timeouts(true),
        ))
        .build();
    let document = client
        .get(AWS_RSA2048_PATH)
        .await
        .map_err(|e| BrokerError::Transport(format!("imds: {e}")))?;
    Ok(decode_document(document.as_ref().to_string()))
}

async fn fetch_azure_attested(app: &Application) -> Result<Vec<u8>> {
    let base = app.metadata.azure.trim_end_matches('/');
    let body = fetch_ok(
        app.http
            .get(format!("{base}{AZURE_ATTESTED_PATH}"))
            .header("Metadata", "true"),
    )
    .await?;
    let document: AzureAttestedDocument = serde_json::from_str(&body)?;
    if document.encoding != "pkcs7" {
        return Err(BrokerError::Transport(format!(
            "invalid pkcs7 encoding: {}",
            document.encoding
        )));
    }
    BASE64
        .decode(strip_whitespace(&document.signature).as_bytes())
        .map_err(|e| BrokerError::Transport(format!("invalid pkcs7: {e}")))
}

/// Metadata services usually return base64, fall back to the raw body.
fn decode_document(body: String) -> Vec<u8> {
    match BASE64.decode(strip_whitespace(&body).as_bytes()) {
        Ok(der) => der,
        Err(e) => {
            tracing::warn!("[imds] base64 decode pkcs7 response failed: {}", e);
            body.into_bytes()
        }
    }
}

fn strip_whitespace(s: &str) -> String {
    s.chars().filter(|c| !c.is_ascii_whitespace()).collect()
}

/// Fetches a GCP VM identity token.
#[tracing::instrument(skip(app))]
pub async fn fetch_gcp_identity_token(app: &Application, url: &str, aud: &str) -> Result<String> {
    let aud = if aud.is_empty() {
        DEFAULT_IDENTITY_AUDIENCE
    } else {
        aud
    };
    let request = if url.is_empty() {
        let base = app.metadata.gcp.trim_end_matches('/');
        app.http
            .get(format!("{base}{GCP_IDENTITY_PATH}"))
            .query(&[("audience", aud), ("format", "full"), ("licenses", "TRUE")])
    } else {
        app.http.get(url)
    };
    let token = fetch_ok(request.header("Metadata-Flavor", "Google")).await?;
    Ok(token.trim().to_string())
}

/// Resolves the bearer token of a `client_assertion_oidc_token` source.
pub async fn fetch_assertion_oidc_token(
    app: &Application,
    config: &OidcTokenConfig,
) -> Result<String> {
    match config.provider.as_str() {
        "gcp" => {
            fetch_gcp_identity_token(
                app,
                &config.google_vm_identity_url,
                &config.google_vm_identity_aud,
            )
            .await
        }
        "custom" => {
            let has_token = !config.oidc_token.is_empty();
            let has_file = !config.oidc_token_file.is_empty();
            match (has_token, has_file) {
                (true, true) => Err(BrokerError::config(
                    "oidc_token and oidc_token_file cannot both be set",
                )),
                (true, false) => Ok(config.oidc_token.expose().to_string()),
                (false, true) => {
                    let token = std::fs::read_to_string(&config.oidc_token_file)?;
                    Ok(token.trim().to_string())
                }
                (false, false) => Err(BrokerError::config(
                    "one of oidc_token or oidc_token_file must be specified",
                )),
            }
        }
        other => Err(BrokerError::config(format!("unknown provider {other}"))),
    }
}
