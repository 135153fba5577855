// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Declarative signer configuration as it appears in a profile.

use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A configured secret (PIN, password, client secret). Empty means unset.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the configured value, or the named environment variable when unset.
    pub fn or_env(&self, name: &str) -> Option<SecretValue> {
        if !self.is_empty() {
            return Some(self.clone());
        }
        std::env::var(name)
            .ok()
            .filter(|v| !v.is_empty())
            .map(SecretValue)
    }
}

// Custom Debug implementation to prevent accidental logging of sensitive data
impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("\"\"")
        } else {
            f.write_str("[REDACTED]")
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExSignerConfig {
    pub key_id: String,
    pub algorithm: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pkcs11: Option<Pkcs11Config>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yubikey_piv: Option<YubikeyPivConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_command: Option<ExternalCommandConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_file: Option<KeyFileConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Pkcs11Config {
    pub library_path: String,
    pub token_label: String,
    pub key_label: String,
    #[serde(skip_serializing)]
    pub pin: SecretValue,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct YubikeyPivConfig {
    pub slot: String,
    #[serde(skip_serializing)]
    pub pin: SecretValue,
    pub pin_policy: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalCommandConfig {
    pub command: String,
    pub parameter: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyFileConfig {
    #[serde(skip_serializing)]
    pub key: SecretValue,
    pub file: String,
    #[serde(skip_serializing)]
    pub password: SecretValue,
}
