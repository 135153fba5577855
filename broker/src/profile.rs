// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Profile model and the digests that identify each provider configuration
//! in the cache.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use aws_lc_rs::digest;
use data_encoding::{BASE64, HEXLOWER};
use idaas_signer::config::{
    ExternalCommandConfig, KeyFileConfig, Pkcs11Config, YubikeyPivConfig,
};
use idaas_signer::{ExSignerConfig, SecretValue};
use serde::Deserialize;

use crate::constants::{
    CONFIG_FILE_NAME, DEFAULT_PROFILE, DOT_ALIYUN_DIR, TEMP_PROFILE_PREFIX,
};
use crate::errors::{BrokerError, Result};

const UNKNOWN_OIDC_ID: &str = "unknown_oidc";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CloudCredentialConfig {
    pub version: String,
    pub current_profile: String,
    pub profile: BTreeMap<String, CloudStsConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CloudStsConfig {
    pub alibaba_cloud_sts: Option<AlibabaCloudStsConfig>,
    pub aws_sts: Option<AwsCloudStsConfig>,
    pub oidc_token: Option<OidcTokenTargetConfig>,
    /// Extra `KEY=VALUE` pairs handed to `execute` children.
    pub environments: Vec<String>,
    pub comment: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AlibabaCloudStsConfig {
    pub region: String,
    pub sts_endpoint: String,
    pub oidc_provider_arn: String,
    pub role_arn: String,
    pub duration_seconds: i64,
    pub role_session_name: String,
    pub oidc_token_provider: Option<OidcTokenProviderConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AwsCloudStsConfig {
    pub region: String,
    pub role_arn: String,
    pub duration_seconds: i32,
    pub role_session_name: String,
    pub oidc_token_provider: Option<OidcTokenProviderConfig>,
}

/// A profile whose output is the OIDC token itself.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OidcTokenTargetConfig {
    pub oidc_token_provider: Option<OidcTokenProviderConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OidcTokenProviderConfig {
    pub client_credentials: Option<ClientCredentialsConfig>,
    pub device_code: Option<DeviceCodeConfig>,
}

impl OidcTokenProviderConfig {
    pub fn id(&self) -> &str {
        if let Some(cc) = &self.client_credentials {
            return &cc.client_id;
        }
        if let Some(dc) = &self.device_code {
            return &dc.client_id;
        }
        UNKNOWN_OIDC_ID
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClientCredentialsConfig {
    pub token_endpoint: String,
    pub client_id: String,
    pub scope: String,
    pub application_federated_credential_name: String,
    pub client_secret: SecretValue,
    #[serde(alias = "client_assertion_singer")]
    pub client_assertion_signer: Option<ExSignerConfig>,
    pub client_assertion_pkcs7: Option<Pkcs7Config>,
    pub client_assertion_private_ca: Option<PrivateCaConfig>,
    pub client_assertion_oidc_token: Option<OidcTokenConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DeviceCodeConfig {
    pub issuer: String,
    pub client_id: String,
    pub scope: String,
    pub client_secret: SecretValue,
    pub auto_open_url: bool,
    pub show_qr_code: bool,
    pub small_qr_code: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Pkcs7Config {
    /// `alibaba_cloud`, `aws` or `azure`
    pub provider: String,
    /// `normal` (default) or `secure`
    pub alibaba_cloud_mode: String,
    pub alibaba_cloud_idaas_instance_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PrivateCaConfig {
    pub certificate: String,
    pub certificate_file: String,
    /// Comma separated, base64 or PEM.
    pub certificate_chain: String,
    pub certificate_chain_file: String,
    pub certificate_key_signer: Option<ExSignerConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OidcTokenConfig {
    /// `gcp` or `custom`
    pub provider: String,
    pub google_vm_identity_url: String,
    pub google_vm_identity_aud: String,
    pub oidc_token: SecretValue,
    pub oidc_token_file: String,
}

/// Default profile file, `~/.aliyun/alibaba-cloud-idaas.json`.
pub fn default_config_file() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| BrokerError::config("unable to determine home directory"))?;
    Ok(home.join(DOT_ALIYUN_DIR).join(CONFIG_FILE_NAME))
}

impl CloudCredentialConfig {
    /// Reads a profile file. A missing file yields `None`.
    #[tracing::instrument]
    pub fn read(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            tracing::debug!("[profile] config file does not exist: {}", path.display());
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&content).map_err(|e| {
            BrokerError::config(format!("failed to parse config file {}: {e}", path.display()))
        })?;
        Ok(Some(config))
    }

    /// Resolves `name`, falling back to `current_profile` and then `default`.
    pub fn find_profile(&self, name: &str) -> (String, Option<&CloudStsConfig>) {
        let name = if !name.is_empty() {
            name
        } else if !self.current_profile.is_empty() {
            tracing::info!("[profile] current profile: {}", self.current_profile);
            &self.current_profile
        } else {
            DEFAULT_PROFILE
        };
        let found = self.profile.get(name);
        tracing::info!("[profile] profile {} found: {}", name, found.is_some());
        (name.to_string(), found)
    }
}

/// Accepts an inline profile given as JSON or base64 encoded JSON.
pub fn parse_inline_profile(input: &str) -> Option<(String, CloudStsConfig)> {
    if input.is_empty() {
        return None;
    }
    let name = format!("{TEMP_PROFILE_PREFIX}{}", sha256_hex(&[input]));
    if let Ok(config) = serde_json::from_str::<CloudStsConfig>(input) {
        return Some((name, config));
    }
    let decoded = BASE64.decode(input.as_bytes()).ok()?;
    serde_json::from_slice::<CloudStsConfig>(&decoded)
        .ok()
        .map(|config| (name, config))
}

/// Resolves a profile argument against an inline value or the profile file.
pub fn find_profile(input: &str, config_file: &Path) -> Result<(String, CloudStsConfig)> {
    if let Some(inline) = parse_inline_profile(input) {
        tracing::info!("[profile] using inline profile: {}", inline.0);
        return Ok(inline);
    }
    let config = CloudCredentialConfig::read(config_file)?
        .ok_or_else(|| BrokerError::config("config file not found"))?;
    let (name, found) = config.find_profile(input);
    match found {
        Some(profile) => Ok((name, profile.clone())),
        None => Err(BrokerError::config(format!("profile: {name} not found"))),
    }
}

pub fn sha256_hex(parts: &[&str]) -> String {
    let mut context = digest::Context::new(&digest::SHA256);
    for part in parts {
        context.update(part.as_bytes());
    }
    HEXLOWER.encode(context.finish().as_ref())
}

/// Modification time as hex unix seconds, empty when unavailable.
fn file_mod_time(path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| format!("{:x}", d.as_secs()))
        .unwrap_or_default()
}

/// Stable identity of a configuration for cache keys. Secrets, PINs and
/// display preferences never contribute.
pub trait Digest {
    fn digest(&self) -> String;
}

impl<T: Digest> Digest for Option<T> {
    fn digest(&self) -> String {
        self.as_ref().map(Digest::digest).unwrap_or_default()
    }
}

impl Digest for AlibabaCloudStsConfig {
    fn digest(&self) -> String {
        sha256_hex(&[
            &self.region,
            &self.sts_endpoint,
            &self.oidc_provider_arn,
            &self.role_arn,
            &self.duration_seconds.to_string(),
            &self.role_session_name,
            &self.oidc_token_provider.digest(),
        ])
    }
}

impl Digest for AwsCloudStsConfig {
    fn digest(&self) -> String {
        sha256_hex(&[
            &self.region,
            &self.role_arn,
            &self.duration_seconds.to_string(),
            &self.role_session_name,
            &self.oidc_token_provider.digest(),
        ])
    }
}

impl Digest for OidcTokenTargetConfig {
    fn digest(&self) -> String {
        sha256_hex(&[&self.oidc_token_provider.digest()])
    }
}

impl Digest for OidcTokenProviderConfig {
    fn digest(&self) -> String {
        sha256_hex(&[
            &self.client_credentials.digest(),
            &self.device_code.digest(),
        ])
    }
}

impl Digest for ClientCredentialsConfig {
    fn digest(&self) -> String {
        sha256_hex(&[
            &self.token_endpoint,
            &self.client_id,
            &self.scope,
            &self.application_federated_credential_name,
            &self.client_assertion_signer.digest(),
            &self.client_assertion_pkcs7.digest(),
            &self.client_assertion_private_ca.digest(),
            &self.client_assertion_oidc_token.digest(),
        ])
    }
}

impl Digest for DeviceCodeConfig {
    fn digest(&self) -> String {
        sha256_hex(&[&self.issuer, &self.client_id, &self.scope])
    }
}

impl Digest for Pkcs7Config {
    fn digest(&self) -> String {
        sha256_hex(&[
            &self.provider,
            &self.alibaba_cloud_mode,
            &self.alibaba_cloud_idaas_instance_id,
        ])
    }
}

impl Digest for PrivateCaConfig {
    fn digest(&self) -> String {
        sha256_hex(&[
            &self.certificate,
            &file_mod_time(&self.certificate_file),
            &self.certificate_key_signer.digest(),
            &self.certificate_chain,
            &file_mod_time(&self.certificate_chain_file),
        ])
    }
}

impl Digest for OidcTokenConfig {
    fn digest(&self) -> String {
        sha256_hex(&[
            &self.provider,
            &self.google_vm_identity_url,
            &self.google_vm_identity_aud,
            self.oidc_token.expose(),
            &file_mod_time(&self.oidc_token_file),
        ])
    }
}

impl Digest for ExSignerConfig {
    fn digest(&self) -> String {
        sha256_hex(&[
            &self.key_id,
            &self.algorithm,
            &self.pkcs11.digest(),
            &self.yubikey_piv.digest(),
            &self.external_command.digest(),
            &self.key_file.digest(),
        ])
    }
}

impl Digest for Pkcs11Config {
    fn digest(&self) -> String {
        sha256_hex(&[&self.library_path, &self.token_label, &self.key_label])
    }
}

impl Digest for YubikeyPivConfig {
    fn digest(&self) -> String {
        sha256_hex(&[&self.slot])
    }
}

impl Digest for ExternalCommandConfig {
    fn digest(&self) -> String {
        sha256_hex(&[&self.command, &self.parameter])
    }
}

impl Digest for KeyFileConfig {
    fn digest(&self) -> String {
        // the inline key only enters through the hash, the password never does
        sha256_hex(&[self.key.expose(), &self.file, &file_mod_time(&self.file)])
    }
}
