// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::ZeroizeOnDrop;

use crate::errors::{BrokerError, Result};
use crate::token::{OidcField, OidcToken};

fn valid_until(expiration: DateTime<Utc>, threshold: Duration, now: DateTime<Utc>) -> bool {
    let remaining = expiration.signed_duration_since(now);
    remaining
        .to_std()
        .is_ok_and(|remaining| remaining > threshold)
}

/// Temporary credentials minted by Alibaba Cloud STS, in the shape the
/// `aliyun` CLI reads from an external credential process.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize, ZeroizeOnDrop)]
pub struct AlibabaCloudStsToken {
    #[zeroize(skip)]
    pub mode: String,
    pub access_key_id: String,
    pub access_key_secret: String,
    pub sts_token: String,
    /// RFC 3339.
    #[zeroize(skip)]
    pub expiration: String,
}

impl fmt::Debug for AlibabaCloudStsToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlibabaCloudStsToken")
            .field("access_key_id", &self.access_key_id)
            .field("access_key_secret", &"[REDACTED]")
            .field("sts_token", &"[REDACTED]")
            .field("expiration", &self.expiration)
            .finish()
    }
}

impl AlibabaCloudStsToken {
    pub const MODE: &'static str = "StsToken";

    pub fn is_valid_at_least_at(&self, threshold: Duration, now: DateTime<Utc>) -> bool {
        match DateTime::parse_from_rfc3339(&self.expiration) {
            Ok(expiration) => valid_until(expiration.with_timezone(&Utc), threshold, now),
            Err(e) => {
                tracing::error!("[sts] error parsing expiration: {}: {}", self.expiration, e);
                false
            }
        }
    }

    pub fn is_valid_at_least(&self, threshold: Duration) -> bool {
        self.is_valid_at_least_at(threshold, Utc::now())
    }

    /// Renders the token for the consumer named by `format`.
    pub fn to_json(&self, format: AlibabaCloudFormat) -> Result<String> {
        let rendered = match format {
            AlibabaCloudFormat::Aliyuncli => serde_json::to_string(self)?,
            AlibabaCloudFormat::Ossutilv2 => serde_json::to_string(&SecurityTokenView {
                code: None,
                status_code: None,
                access_key_id: &self.access_key_id,
                access_key_secret: &self.access_key_secret,
                security_token: &self.sts_token,
                expiration: &self.expiration,
            })?,
            AlibabaCloudFormat::CredentialsUri => serde_json::to_string(&SecurityTokenView {
                code: Some("Success"),
                status_code: Some("200"),
                access_key_id: &self.access_key_id,
                access_key_secret: &self.access_key_secret,
                security_token: &self.sts_token,
                expiration: &self.expiration,
            })?,
        };
        Ok(rendered)
    }
}

/// Output shapes understood by Alibaba Cloud tools.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AlibabaCloudFormat {
    #[default]
    Aliyuncli,
    Ossutilv2,
    /// Response body of a `credentials_uri` endpoint.
    CredentialsUri,
}

impl FromStr for AlibabaCloudFormat {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | "aliyuncli" => Ok(Self::Aliyuncli),
            "ossutilv2" => Ok(Self::Ossutilv2),
            "credentials-uri" => Ok(Self::CredentialsUri),
            other => Err(BrokerError::config(format!("unknown format {other}"))),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SecurityTokenView<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status_code: Option<&'static str>,
    access_key_id: &'a str,
    access_key_secret: &'a str,
    security_token: &'a str,
    expiration: &'a str,
}

/// AWS temporary credentials in the `credential_process` shape.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, ZeroizeOnDrop)]
#[serde(rename_all = "PascalCase")]
pub struct AwsStsToken {
    #[zeroize(skip)]
    pub version: u8,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    #[zeroize(skip)]
    pub expiration: DateTime<Utc>,
}

impl fmt::Debug for AwsStsToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsStsToken")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .field("session_token", &"[REDACTED]")
            .field("expiration", &self.expiration)
            .finish()
    }
}

impl AwsStsToken {
    pub const VERSION: u8 = 1;

    pub fn is_valid_at_least_at(&self, threshold: Duration, now: DateTime<Utc>) -> bool {
        valid_until(self.expiration, threshold, now)
    }

    pub fn is_valid_at_least(&self, threshold: Duration) -> bool {
        self.is_valid_at_least_at(threshold, Utc::now())
    }
}

/// The credential a profile resolves to. Exactly one shape per profile.
#[derive(Debug, Clone, PartialEq)]
pub enum CloudCredential {
    AlibabaCloud(AlibabaCloudStsToken),
    Aws(AwsStsToken),
    OidcToken(OidcToken),
}

impl CloudCredential {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AlibabaCloud(_) => "AlibabaCloud",
            Self::Aws(_) => "Aws",
            Self::OidcToken(_) => "OidcToken",
        }
    }

    /// JSON printed by `fetch-token`. `format` only applies to Alibaba
    /// Cloud, `field` only to OIDC tokens.
    pub fn to_json(&self, format: &str, field: OidcField) -> Result<String> {
        match self {
            Self::AlibabaCloud(token) => token.to_json(format.parse()?),
            Self::Aws(token) => Ok(serde_json::to_string(token)?),
            Self::OidcToken(token) => match field {
                OidcField::Default => Ok(serde_json::to_string(token)?),
                selected => Ok(serde_json::to_string(
                    &serde_json::json!({ "token": token.select(selected) }),
                )?),
            },
        }
    }

    /// Variables handed to a child process. `region` is exported only when
    /// non-empty.
    pub fn environment(&self, region: &str) -> Vec<(String, String)> {
        let mut env = Vec::new();
        let mut push = |name: &str, value: &str| env.push((name.to_string(), value.to_string()));
        match self {
            Self::AlibabaCloud(token) => {
                push("ALIBABA_CLOUD_ACCESS_KEY_ID", &token.access_key_id);
                push("ALIBABA_CLOUD_ACCESS_KEY_SECRET", &token.access_key_secret);
                push("ALIBABA_CLOUD_SECURITY_TOKEN", &token.sts_token);
                if !region.is_empty() {
                    push("ALIBABA_CLOUD_REGION_ID", region);
                }
            }
            Self::Aws(token) => {
                push("AWS_ACCESS_KEY_ID", &token.access_key_id);
                push("AWS_SECRET_ACCESS_KEY", &token.secret_access_key);
                push("AWS_SESSION_TOKEN", &token.session_token);
                if !region.is_empty() {
                    push("AWS_REGION", region);
                    push("AWS_DEFAULT_REGION", region);
                }
            }
            Self::OidcToken(token) => {
                push("ALIBABA_CLOUD_IDAAS_OIDC_TOKEN", token.select(OidcField::Default));
            }
        }
        env
    }
}

/// Splits profile `environments` entries of the form `KEY=VALUE`. Entries
/// without `=` are skipped.
pub fn parse_environments(entries: &[String]) -> Vec<(String, String)> {
    entries
        .iter()
        .filter_map(|entry| {
            let parsed = entry.split_once('=');
            if parsed.is_none() {
                tracing::warn!("[dispatch] ignore malformed environment entry");
            }
            parsed
        })
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}
