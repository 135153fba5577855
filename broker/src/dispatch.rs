// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Resolves which cloud target a profile asks for and fetches it.

use crate::application::Application;
use crate::errors::{BrokerError, Result, ResultExt};
use crate::models::CloudCredential;
use crate::profile::{
    AlibabaCloudStsConfig, AwsCloudStsConfig, CloudStsConfig, OidcTokenProviderConfig,
};
use crate::sts::alibaba::fetch_alibaba_cloud_sts;
use crate::sts::aws::fetch_aws_sts;
use crate::token::{OidcField, fetch_oidc_token};

#[derive(Debug, Clone, Copy, Default)]
pub struct FetchCredentialOptions {
    /// Ignore every cached artifact on the way, discovery documents included.
    pub force_new: bool,
    pub oidc_field: OidcField,
}

/// The single target configured in a profile.
#[derive(Debug, Clone, Copy)]
pub enum CloudTarget<'a> {
    AlibabaCloud(&'a AlibabaCloudStsConfig),
    Aws(&'a AwsCloudStsConfig),
    OidcToken(&'a OidcTokenProviderConfig),
}

impl<'a> CloudTarget<'a> {
    pub fn select(profile: &str, config: &'a CloudStsConfig) -> Result<Self> {
        let mut targets = Vec::new();
        if let Some(alibaba_cloud) = &config.alibaba_cloud_sts {
            targets.push(("AlibabaCloud", Self::AlibabaCloud(alibaba_cloud)));
        }
        if let Some(aws) = &config.aws_sts {
            targets.push(("Aws", Self::Aws(aws)));
        }
        if let Some(oidc_token) = &config.oidc_token {
            let provider = oidc_token
                .oidc_token_provider
                .as_ref()
                .ok_or_else(|| BrokerError::config("OidcTokenProvider is required"))?;
            targets.push(("OidcToken", Self::OidcToken(provider)));
        }

        match targets.len() {
            0 => Err(BrokerError::config(format!(
                "no clouds is set for profile: {profile}"
            ))),
            1 => Ok(targets.remove(0).1),
            _ => Err(BrokerError::config(format!(
                "multiple clouds: {} found for profile: {profile}",
                targets
                    .iter()
                    .map(|(name, _)| *name)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    /// The OIDC provider the target ultimately authenticates with.
    pub fn oidc_token_provider(&self) -> Option<&'a OidcTokenProviderConfig> {
        match self {
            Self::AlibabaCloud(config) => config.oidc_token_provider.as_ref(),
            Self::Aws(config) => config.oidc_token_provider.as_ref(),
            Self::OidcToken(provider) => Some(provider),
        }
    }
}

/// Fetches the credential of `profile` through the cache.
#[tracing::instrument(skip(app, config))]
pub async fn fetch_credential(
    app: &Application,
    profile: &str,
    config: &CloudStsConfig,
    options: FetchCredentialOptions,
) -> Result<CloudCredential> {
    let target = CloudTarget::select(profile, config)?;
    tracing::debug!("[dispatch] profile: {}, target: {:?}", profile, target);

    let credential = match target {
        CloudTarget::AlibabaCloud(sts) => CloudCredential::AlibabaCloud(
            fetch_alibaba_cloud_sts(app, profile, sts, options.force_new).await?,
        ),
        CloudTarget::Aws(sts) => {
            CloudCredential::Aws(fetch_aws_sts(app, profile, sts, options.force_new).await?)
        }
        CloudTarget::OidcToken(provider) => CloudCredential::OidcToken(
            fetch_oidc_token(app, profile, provider, options.oidc_field, options.force_new)
                .await?,
        ),
    };
    tracing::info!("[dispatch] fetched {} credential for profile: {}", credential.kind(), profile);
    Ok(credential)
}

/// Loads `profile` from the config file (or inline JSON) and fetches it.
pub async fn fetch_credential_for_profile(
    app: &Application,
    profile: &str,
    config_file: &std::path::Path,
    options: FetchCredentialOptions,
) -> Result<(String, CloudStsConfig, CloudCredential)> {
    let (name, config) = crate::profile::find_profile(profile, config_file)?;
    let credential = fetch_credential(app, &name, &config, options)
        .await
        .with_context(|| format!("profile: {name}"))?;
    Ok((name, config, credential))
}
