// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! The signing capability contract shared by every key backend.
//!
//! A backend never hands out private key material. Callers ask for the
//! public key or for a signature over either a message (the backend hashes
//! it) or a digest they computed themselves. ECDSA signatures come back
//! DER encoded; RSA signatures are PKCS#1 v1.5.

use std::fmt;

use der::pem::LineEnding;
use pkcs8::spki::SubjectPublicKeyInfoRef;

use crate::algorithm::JwtSignAlgorithm;
use crate::config::ExSignerConfig;
use crate::errors::{Result, SignerError};
use crate::external::ExternalCommandSigner;
use crate::jwt::ExJwtSigner;
use crate::key_file::KeyFileSigner;

/// What the caller wants signed.
#[derive(Debug, Clone, Copy)]
pub enum SignPayload<'a> {
    Message(&'a [u8]),
    Digest(&'a [u8]),
}

impl SignPayload<'_> {
    /// Hashes a message, or checks a caller digest against the algorithm.
    pub fn to_digest(&self, alg: JwtSignAlgorithm) -> Result<Vec<u8>> {
        match self {
            SignPayload::Message(message) => Ok(alg.hash(message)),
            SignPayload::Digest(digest) => {
                alg.check_digest(digest)?;
                Ok(digest.to_vec())
            }
        }
    }
}

/// DER encoded `SubjectPublicKeyInfo`.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    der: Vec<u8>,
}

impl PublicKey {
    pub fn from_der(der: Vec<u8>) -> Result<Self> {
        SubjectPublicKeyInfoRef::try_from(der.as_slice())
            .map_err(|e| SignerError::InvalidKey(format!("invalid public key: {e}")))?;
        Ok(Self { der })
    }

    pub fn as_der(&self) -> &[u8] {
        &self.der
    }

    pub fn to_pem(&self) -> Result<String> {
        der::pem::encode_string("PUBLIC KEY", LineEnding::LF, &self.der)
            .map_err(|e| SignerError::InvalidKey(e.to_string()))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("der_len", &self.der.len())
            .finish()
    }
}

pub trait ExSigner: Send + Sync {
    fn public_key(&self) -> Result<PublicKey>;

    fn sign(&self, alg: JwtSignAlgorithm, payload: SignPayload<'_>) -> Result<Vec<u8>>;
}

/// Selects the single backend configured in `config`.
pub fn build_ex_signer(config: &ExSignerConfig) -> Result<Box<dyn ExSigner>> {
    let mut backends = Vec::new();
    if config.pkcs11.is_some() {
        backends.push("pkcs11");
    }
    if config.yubikey_piv.is_some() {
        backends.push("yubikey_piv");
    }
    if config.external_command.is_some() {
        backends.push("external_command");
    }
    if config.key_file.is_some() {
        backends.push("key_file");
    }
    if backends.len() > 1 {
        return Err(SignerError::Config(format!(
            "only one signer backend may be set, found: {}",
            backends.join(", ")
        )));
    }

    tracing::debug!("[signer] building signer backend: {:?}", backends.first());

    if let Some(external) = &config.external_command {
        return Ok(Box::new(ExternalCommandSigner::new(
            &external.command,
            &external.parameter,
        )?));
    }
    if let Some(key_file) = &config.key_file {
        return Ok(Box::new(KeyFileSigner::new(key_file)?));
    }
    if let Some(pkcs11) = &config.pkcs11 {
        return build_pkcs11(pkcs11);
    }
    if let Some(piv) = &config.yubikey_piv {
        return build_piv(piv);
    }
    Err(SignerError::Config(
        "one of pkcs11, yubikey_piv, external_command or key_file must be set".to_string(),
    ))
}

#[cfg(feature = "pkcs11")]
fn build_pkcs11(config: &crate::config::Pkcs11Config) -> Result<Box<dyn ExSigner>> {
    Ok(Box::new(crate::pkcs11::Pkcs11Signer::new(config)?))
}

#[cfg(not(feature = "pkcs11"))]
fn build_pkcs11(_config: &crate::config::Pkcs11Config) -> Result<Box<dyn ExSigner>> {
    Err(SignerError::Config(
        "PKCS#11 signer support is not enabled in this build".to_string(),
    ))
}

#[cfg(feature = "yubikey-piv")]
fn build_piv(config: &crate::config::YubikeyPivConfig) -> Result<Box<dyn ExSigner>> {
    Ok(Box::new(crate::piv::YubikeyPivSigner::new(config)?))
}

#[cfg(not(feature = "yubikey-piv"))]
fn build_piv(_config: &crate::config::YubikeyPivConfig) -> Result<Box<dyn ExSigner>> {
    Err(SignerError::Config(
        "YubiKey PIV signer support is not enabled in this build".to_string(),
    ))
}

/// Builds the backend and wraps it in a JWT signer using the configured
/// algorithm and key id.
pub fn build_jwt_signer(config: &ExSignerConfig) -> Result<ExJwtSigner> {
    let alg: JwtSignAlgorithm = config.algorithm.parse()?;
    let signer = build_ex_signer(config)?;
    Ok(ExJwtSigner::new(config.key_id.clone(), alg, signer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExternalCommandConfig, KeyFileConfig, SecretValue};

    #[test]
    fn test_message_payload_is_hashed() {
        let digest = SignPayload::Message(b"hello")
            .to_digest(JwtSignAlgorithm::RS384)
            .unwrap();
        assert_eq!(digest.len(), 48);
    }

    #[test]
    fn test_digest_payload_length_is_checked() {
        let err = SignPayload::Digest(&[0u8; 31])
            .to_digest(JwtSignAlgorithm::ES256)
            .unwrap_err();
        assert!(matches!(err, SignerError::DigestLength { .. }));
    }

    #[test]
    fn test_multiple_backends_rejected() {
        let config = ExSignerConfig {
            algorithm: "RS256".into(),
            external_command: Some(ExternalCommandConfig {
                command: "a".into(),
                parameter: "b".into(),
            }),
            key_file: Some(KeyFileConfig {
                key: SecretValue::new("x"),
                ..Default::default()
            }),
            ..Default::default()
        };
        let err = build_ex_signer(&config).err().unwrap();
        assert!(err.to_string().contains("external_command, key_file"));
    }

    #[test]
    fn test_no_backend_rejected() {
        let config = ExSignerConfig {
            algorithm: "RS256".into(),
            ..Default::default()
        };
        assert!(matches!(
            build_ex_signer(&config),
            Err(SignerError::Config(_))
        ));
    }

    #[test]
    fn test_unknown_algorithm_rejected_before_backend() {
        let config = ExSignerConfig {
            algorithm: "PS256".into(),
            external_command: Some(ExternalCommandConfig {
                command: "a".into(),
                parameter: "b".into(),
            }),
            ..Default::default()
        };
        assert!(matches!(
            build_jwt_signer(&config),
            Err(SignerError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_public_key_rejects_garbage() {
        assert!(PublicKey::from_der(vec![1, 2, 3]).is_err());
    }
}
