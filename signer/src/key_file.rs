// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Signer backed by a private key held in the profile or in a file.
//!
//! The key is re-read on every call so nothing outlives a single signature.
//! Accepted encodings are PEM or standard base64 DER, holding PKCS#8
//! (optionally password encrypted), PKCS#1 RSA or SEC1 EC keys.

use data_encoding::BASE64;
use pkcs8::{DecodePrivateKey, EncodePublicKey, EncryptedPrivateKeyInfo};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::signature::hazmat::PrehashSigner;
use rsa::signature::SignatureEncoding;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Sha256, Sha384, Sha512};
use zeroize::Zeroizing;

use crate::algorithm::{EcCurve, JwtSignAlgorithm};
use crate::config::{KeyFileConfig, SecretValue};
use crate::constants::{ENV_PKCS8_PASSWORD, PEM_ENCRYPTED_PRIVATE_KEY};
use crate::errors::{Result, SignerError};
use crate::signer::{ExSigner, PublicKey, SignPayload};

enum PrivateKey {
    Rsa(Box<RsaPrivateKey>),
    P256(p256::SecretKey),
    P384(p384::SecretKey),
    P521(p521::SecretKey),
}

impl PrivateKey {
    fn describe(&self) -> &'static str {
        match self {
            PrivateKey::Rsa(_) => "RSA",
            PrivateKey::P256(_) => EcCurve::P256.name(),
            PrivateKey::P384(_) => EcCurve::P384.name(),
            PrivateKey::P521(_) => EcCurve::P521.name(),
        }
    }

    fn parse(der: &[u8]) -> Result<Self> {
        if let Ok(key) = RsaPrivateKey::from_pkcs8_der(der) {
            return Ok(PrivateKey::Rsa(Box::new(key)));
        }
        if let Ok(key) = p256::SecretKey::from_pkcs8_der(der) {
            return Ok(PrivateKey::P256(key));
        }
        if let Ok(key) = p384::SecretKey::from_pkcs8_der(der) {
            return Ok(PrivateKey::P384(key));
        }
        if let Ok(key) = p521::SecretKey::from_pkcs8_der(der) {
            return Ok(PrivateKey::P521(key));
        }
        if let Ok(key) = RsaPrivateKey::from_pkcs1_der(der) {
            return Ok(PrivateKey::Rsa(Box::new(key)));
        }
        if let Ok(key) = p256::SecretKey::from_sec1_der(der) {
            return Ok(PrivateKey::P256(key));
        }
        if let Ok(key) = p384::SecretKey::from_sec1_der(der) {
            return Ok(PrivateKey::P384(key));
        }
        if let Ok(key) = p521::SecretKey::from_sec1_der(der) {
            return Ok(PrivateKey::P521(key));
        }
        Err(SignerError::InvalidKey(
            "unsupported private key, expected PKCS#8, PKCS#1 or SEC1".to_string(),
        ))
    }

    fn public_key_der(&self) -> Result<Vec<u8>> {
        let document = match self {
            PrivateKey::Rsa(key) => RsaPublicKey::from(key.as_ref()).to_public_key_der(),
            PrivateKey::P256(key) => key.public_key().to_public_key_der(),
            PrivateKey::P384(key) => key.public_key().to_public_key_der(),
            PrivateKey::P521(key) => key.public_key().to_public_key_der(),
        }
        .map_err(|e| SignerError::InvalidKey(format!("encode public key failed: {e}")))?;
        Ok(document.into_vec())
    }

    fn sign_digest(&self, alg: JwtSignAlgorithm, digest: &[u8]) -> Result<Vec<u8>> {
        let mismatch = || SignerError::KeyMismatch {
            algorithm: alg.as_str(),
            reason: format!("key is {}", self.describe()),
        };
        let sign_error = |e: rsa::signature::Error| SignerError::Sign(e.to_string());

        match (self, alg) {
            (PrivateKey::Rsa(key), JwtSignAlgorithm::RS256) => {
                rsa::pkcs1v15::SigningKey::<Sha256>::new(key.as_ref().clone())
                    .sign_prehash(digest)
                    .map(|s| s.to_vec())
                    .map_err(sign_error)
            }
            (PrivateKey::Rsa(key), JwtSignAlgorithm::RS384) => {
                rsa::pkcs1v15::SigningKey::<Sha384>::new(key.as_ref().clone())
                    .sign_prehash(digest)
                    .map(|s| s.to_vec())
                    .map_err(sign_error)
            }
            (PrivateKey::Rsa(key), JwtSignAlgorithm::RS512) => {
                rsa::pkcs1v15::SigningKey::<Sha512>::new(key.as_ref().clone())
                    .sign_prehash(digest)
                    .map(|s| s.to_vec())
                    .map_err(sign_error)
            }
            (PrivateKey::P256(key), JwtSignAlgorithm::ES256) => {
                let signing_key = p256::ecdsa::SigningKey::from(key);
                let signature: p256::ecdsa::Signature =
                    signing_key.sign_prehash(digest).map_err(sign_error)?;
                Ok(signature.to_der().as_bytes().to_vec())
            }
            (PrivateKey::P384(key), JwtSignAlgorithm::ES384) => {
                let signing_key = p384::ecdsa::SigningKey::from(key);
                let signature: p384::ecdsa::Signature =
                    signing_key.sign_prehash(digest).map_err(sign_error)?;
                Ok(signature.to_der().as_bytes().to_vec())
            }
            (PrivateKey::P521(key), JwtSignAlgorithm::ES512) => {
                let signing_key = p521::ecdsa::SigningKey::from_bytes(&key.to_bytes())
                    .map_err(sign_error)?;
                let signature: p521::ecdsa::Signature =
                    signing_key.sign_prehash(digest).map_err(sign_error)?;
                Ok(signature.to_der().as_bytes().to_vec())
            }
            _ => Err(mismatch()),
        }
    }
}

pub struct KeyFileSigner {
    key: SecretValue,
    file: String,
    password: SecretValue,
}

impl KeyFileSigner {
    pub fn new(config: &KeyFileConfig) -> Result<Self> {
        match (config.key.is_empty(), config.file.is_empty()) {
            (true, true) => Err(SignerError::Config(
                "key file signer requires one of key or file".to_string(),
            )),
            (false, false) => Err(SignerError::Config(
                "only one of key or file can be specified".to_string(),
            )),
            _ => Ok(Self {
                key: config.key.clone(),
                file: config.file.clone(),
                password: config.password.clone(),
            }),
        }
    }

    fn read_key_text(&self) -> Result<Zeroizing<String>> {
        if !self.key.is_empty() {
            return Ok(Zeroizing::new(self.key.expose().to_string()));
        }
        let text = std::fs::read_to_string(&self.file).map_err(|e| {
            SignerError::InvalidKey(format!("read key file {} failed: {e}", self.file))
        })?;
        Ok(Zeroizing::new(text))
    }

    fn load(&self) -> Result<PrivateKey> {
        let text = self.read_key_text()?;
        let trimmed = text.trim();

        let (label, der) = if trimmed.starts_with("-----") {
            let (label, der) = der::pem::decode_vec(trimmed.as_bytes())
                .map_err(|e| SignerError::InvalidKey(format!("invalid PEM: {e}")))?;
            (Some(label.to_string()), Zeroizing::new(der))
        } else {
            let compact: String = trimmed.split_whitespace().collect();
            (None, Zeroizing::new(BASE64.decode(compact.as_bytes())?))
        };

        let encrypted = match label.as_deref() {
            Some(PEM_ENCRYPTED_PRIVATE_KEY) => true,
            Some(_) => false,
            None => EncryptedPrivateKeyInfo::try_from(der.as_slice()).is_ok(),
        };
        if !encrypted {
            return PrivateKey::parse(&der);
        }

        let password = self.password.or_env(ENV_PKCS8_PASSWORD).ok_or_else(|| {
            SignerError::Config("encrypted private key requires password".to_string())
        })?;
        let info = EncryptedPrivateKeyInfo::try_from(der.as_slice())
            .map_err(|e| SignerError::InvalidKey(format!("invalid encrypted key: {e}")))?;
        let document = info
            .decrypt(password.expose())
            .map_err(|e| SignerError::InvalidKey(format!("decrypt private key failed: {e}")))?;
        PrivateKey::parse(document.as_bytes())
    }
}

impl ExSigner for KeyFileSigner {
    fn public_key(&self) -> Result<PublicKey> {
        PublicKey::from_der(self.load()?.public_key_der()?)
    }

    fn sign(&self, alg: JwtSignAlgorithm, payload: SignPayload<'_>) -> Result<Vec<u8>> {
        let digest = payload.to_digest(alg)?;
        self.load()?.sign_digest(alg, &digest)
    }
}
