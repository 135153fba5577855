// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! AWS `AssumeRoleWithWebIdentity` through the official SDK.

use aws_sdk_sts::Client;
use aws_sdk_sts::config::retry::RetryConfig;
use aws_sdk_sts::config::{BehaviorVersion, Region};
use aws_sdk_sts::error::DisplayErrorContext;
use chrono::{DateTime, Utc};

use crate::application::Application;
use crate::constants::STS_MAX_ATTEMPTS;
use crate::errors::{BrokerError, Result};
use crate::http::unsafe_debug_enabled;
use crate::models::AwsStsToken;
use crate::profile::{AwsCloudStsConfig, Digest};
use crate::sts::{fetch_sts_cached, resolve_role_session_name};
use crate::token::fetch_oidc_bearer_token;

/// Anonymous STS client for `region` with standard retries. `endpoint_url`
/// overrides the regional endpoint.
pub fn build_sts_client(region: &str, endpoint_url: Option<&str>) -> Result<Client> {
    if region.is_empty() {
        return Err(BrokerError::config("no region specified"));
    }
    let mut builder = aws_sdk_sts::Config::builder()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .retry_config(RetryConfig::standard().with_max_attempts(STS_MAX_ATTEMPTS));
    if let Some(endpoint_url) = endpoint_url {
        builder = builder.endpoint_url(endpoint_url);
    }
    Ok(Client::from_conf(builder.build()))
}

#[tracing::instrument(skip(client, config, oidc_token))]
pub async fn assume_role_with_web_identity(
    client: &Client,
    config: &AwsCloudStsConfig,
    oidc_token: &str,
) -> Result<AwsStsToken> {
    let role_session_name = resolve_role_session_name(&config.role_session_name, oidc_token);
    tracing::debug!(
        "[sts] assume role, RoleArn: {}, RoleSessionName: {}",
        config.role_arn,
        role_session_name
    );
    if unsafe_debug_enabled() {
        tracing::debug!("[unsafe] assume role with web identity, OIDC token: {}", oidc_token);
    }

    let mut request = client
        .assume_role_with_web_identity()
        .role_arn(&config.role_arn)
        .role_session_name(role_session_name)
        .web_identity_token(oidc_token);
    if config.duration_seconds > 0 {
        request = request.duration_seconds(config.duration_seconds);
    }
    let output = request.send().await.map_err(|e| {
        tracing::error!("[sts] error assume role with web identity: {}", DisplayErrorContext(&e));
        BrokerError::Sts(format!(
            "assume role with web identity failed: {}",
            DisplayErrorContext(&e)
        ))
    })?;

    let credentials = output
        .credentials()
        .ok_or_else(|| BrokerError::Sts("no credentials in AssumeRoleWithWebIdentity response".to_string()))?;
    let expiration = credentials.expiration();
    let expiration = DateTime::<Utc>::from_timestamp(expiration.secs(), expiration.subsec_nanos())
        .ok_or_else(|| BrokerError::Sts(format!("invalid expiration: {expiration}")))?;

    Ok(AwsStsToken {
        version: AwsStsToken::VERSION,
        access_key_id: credentials.access_key_id().to_string(),
        secret_access_key: credentials.secret_access_key().to_string(),
        session_token: credentials.session_token().to_string(),
        expiration,
    })
}

/// Cached AWS credentials for `profile`.
#[tracing::instrument(skip(app, config))]
pub async fn fetch_aws_sts(
    app: &Application,
    profile: &str,
    config: &AwsCloudStsConfig,
    force_new: bool,
) -> Result<AwsStsToken> {
    let provider = config
        .oidc_token_provider
        .as_ref()
        .ok_or_else(|| BrokerError::config("OidcTokenProvider is required"))?;
    let client = build_sts_client(&config.region, None)?;

    fetch_sts_cached(
        app,
        profile,
        &config.digest(),
        force_new,
        AwsStsToken::is_valid_at_least,
        || async {
            let oidc_token = fetch_oidc_bearer_token(app, profile, provider, force_new).await?;
            assume_role_with_web_identity(&client, config, &oidc_token).await
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    const ASSUME_ROLE_RESPONSE: &str = r#"<AssumeRoleWithWebIdentityResponse xmlns="https://sts.amazonaws.com/doc/2011-06-15/">
  <AssumeRoleWithWebIdentityResult>
    <SubjectFromWebIdentityToken>app</SubjectFromWebIdentityToken>
    <Credentials>
      <AccessKeyId>ASIAEXAMPLE</AccessKeyId>
      <SecretAccessKey>secret</SecretAccessKey>
      <SessionToken>session</SessionToken>
      <Expiration>2030-01-01T00:00:00Z</Expiration>
    </Credentials>
  </AssumeRoleWithWebIdentityResult>
  <ResponseMetadata>
    <RequestId>req-1</RequestId>
  </ResponseMetadata>
</AssumeRoleWithWebIdentityResponse>"#;

    #[test]
    fn test_region_is_required() {
        let err = build_sts_client("", None).unwrap_err();
        assert_eq!(err.to_string(), "configuration error: no region specified");
    }

    #[tokio::test]
    async fn test_assume_role_with_web_identity() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("Action".into(), "AssumeRoleWithWebIdentity".into()),
                mockito::Matcher::UrlEncoded("RoleArn".into(), "arn:aws:iam::1:role/dev".into()),
                mockito::Matcher::UrlEncoded("RoleSessionName".into(), "ci".into()),
                mockito::Matcher::UrlEncoded("WebIdentityToken".into(), "a.b.c".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "text/xml")
            .with_body(ASSUME_ROLE_RESPONSE)
            .create_async()
            .await;

        let client = build_sts_client("us-east-1", Some(&server.url())).unwrap();
        let config = AwsCloudStsConfig {
            region: "us-east-1".into(),
            role_arn: "arn:aws:iam::1:role/dev".into(),
            role_session_name: "ci".into(),
            ..Default::default()
        };
        let token = assume_role_with_web_identity(&client, &config, "a.b.c")
            .await
            .unwrap();
        assert_eq!(token.version, 1);
        assert_eq!(token.access_key_id, "ASIAEXAMPLE");
        assert_eq!(token.session_token, "session");
        assert_eq!(token.expiration.to_rfc3339(), "2030-01-01T00:00:00+00:00");
        mock.assert_async().await;
    }
}
