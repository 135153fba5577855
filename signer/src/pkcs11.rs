// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Signer backed by a PKCS#11 token.
//!
//! Every call loads the module, opens a session on the token with the
//! configured label, logs in, locates the key by label and closes everything
//! again when the session is dropped.

use cryptoki::context::{CInitializeArgs, Pkcs11};
use cryptoki::mechanism::Mechanism;
use cryptoki::object::{Attribute, AttributeType, KeyType, ObjectClass, ObjectHandle};
use cryptoki::session::{Session, UserType};
use cryptoki::types::AuthPin;
use der::asn1::OctetStringRef;
use der::Decode;
use pkcs8::EncodePublicKey;

use crate::algorithm::{EcCurve, JwtSignAlgorithm};
use crate::config::{Pkcs11Config, SecretValue};
use crate::constants::ENV_PKCS11_PIN;
use crate::ecdsa::raw_to_der;
use crate::errors::{Result, SignerError};
use crate::signer::{ExSigner, PublicKey, SignPayload};

fn token_error(e: cryptoki::error::Error) -> SignerError {
    tracing::error!("[signer] PKCS#11 error: {:?}", e);
    SignerError::Token(e.to_string())
}

pub struct Pkcs11Signer {
    library_path: String,
    token_label: String,
    key_label: String,
    pin: SecretValue,
}

impl Pkcs11Signer {
    pub fn new(config: &Pkcs11Config) -> Result<Self> {
        if config.library_path.is_empty() {
            return Err(SignerError::Config("pkcs11 library path is empty".to_string()));
        }
        if config.token_label.is_empty() {
            return Err(SignerError::Config("pkcs11 token label is empty".to_string()));
        }
        if config.key_label.is_empty() {
            return Err(SignerError::Config("pkcs11 key label is empty".to_string()));
        }
        let pin = config.pin.or_env(ENV_PKCS11_PIN).ok_or_else(|| {
            SignerError::Config(format!(
                "pkcs11 pin is not configured and {ENV_PKCS11_PIN} is not set"
            ))
        })?;
        Ok(Self {
            library_path: config.library_path.clone(),
            token_label: config.token_label.clone(),
            key_label: config.key_label.clone(),
            pin,
        })
    }

    #[tracing::instrument(skip(self), fields(token = %self.token_label))]
    fn open_session(&self) -> Result<Session> {
        let context = Pkcs11::new(&self.library_path).map_err(token_error)?;
        context
            .initialize(CInitializeArgs::OsThreads)
            .map_err(token_error)?;

        let slot = context
            .get_slots_with_token()
            .map_err(token_error)?
            .into_iter()
            .find(|slot| {
                context
                    .get_token_info(*slot)
                    .map(|info| info.label().trim() == self.token_label)
                    .unwrap_or(false)
            })
            .ok_or_else(|| {
                SignerError::Token(format!("token with label {} not found", self.token_label))
            })?;

        let session = context.open_ro_session(slot).map_err(token_error)?;
        session
            .login(
                UserType::User,
                Some(&AuthPin::new(self.pin.expose().to_string())),
            )
            .map_err(token_error)?;
        Ok(session)
    }

    fn find_object(&self, session: &Session, class: ObjectClass) -> Result<ObjectHandle> {
        session
            .find_objects(&[
                Attribute::Class(class),
                Attribute::Label(self.key_label.as_bytes().to_vec()),
            ])
            .map_err(token_error)?
            .into_iter()
            .next()
            .ok_or_else(|| {
                SignerError::Token(format!("key with label {} not found", self.key_label))
            })
    }
}

fn key_type(session: &Session, key: ObjectHandle) -> Result<KeyType> {
    session
        .get_attributes(key, &[AttributeType::KeyType])
        .map_err(token_error)?
        .into_iter()
        .find_map(|attribute| match attribute {
            Attribute::KeyType(key_type) => Some(key_type),
            _ => None,
        })
        .ok_or_else(|| SignerError::Token("key type attribute missing".to_string()))
}

fn ec_curve(session: &Session, key: ObjectHandle) -> Result<EcCurve> {
    let params = session
        .get_attributes(key, &[AttributeType::EcParams])
        .map_err(token_error)?
        .into_iter()
        .find_map(|attribute| match attribute {
            Attribute::EcParams(params) => Some(params),
            _ => None,
        })
        .ok_or_else(|| SignerError::Token("EC params attribute missing".to_string()))?;
    EcCurve::from_named_curve_der(&params)
        .ok_or_else(|| SignerError::InvalidKey("unsupported EC curve on token".to_string()))
}

impl ExSigner for Pkcs11Signer {
    fn public_key(&self) -> Result<PublicKey> {
        let session = self.open_session()?;
        let key = self.find_object(&session, ObjectClass::PUBLIC_KEY)?;

        let document = if key_type(&session, key)? == KeyType::RSA {
            let attributes = session
                .get_attributes(key, &[AttributeType::Modulus, AttributeType::PublicExponent])
                .map_err(token_error)?;
            let mut modulus = None;
            let mut exponent = None;
            for attribute in attributes {
                match attribute {
                    Attribute::Modulus(n) => modulus = Some(n),
                    Attribute::PublicExponent(e) => exponent = Some(e),
                    _ => {}
                }
            }
            let (Some(n), Some(e)) = (modulus, exponent) else {
                return Err(SignerError::Token("RSA public key attributes missing".to_string()));
            };
            rsa::RsaPublicKey::new(
                rsa::BigUint::from_bytes_be(&n),
                rsa::BigUint::from_bytes_be(&e),
            )
            .map_err(|e| SignerError::InvalidKey(e.to_string()))?
            .to_public_key_der()
        } else {
            let curve = ec_curve(&session, key)?;
            let point = session
                .get_attributes(key, &[AttributeType::EcPoint])
                .map_err(token_error)?
                .into_iter()
                .find_map(|attribute| match attribute {
                    Attribute::EcPoint(point) => Some(point),
                    _ => None,
                })
                .ok_or_else(|| SignerError::Token("EC point attribute missing".to_string()))?;
            let point = OctetStringRef::from_der(&point)
                .map_err(|e| SignerError::InvalidKey(format!("invalid EC point: {e}")))?;
            let invalid = |e: p256::elliptic_curve::Error| SignerError::InvalidKey(e.to_string());
            match curve {
                EcCurve::P256 => p256::PublicKey::from_sec1_bytes(point.as_bytes())
                    .map_err(invalid)?
                    .to_public_key_der(),
                EcCurve::P384 => p384::PublicKey::from_sec1_bytes(point.as_bytes())
                    .map_err(invalid)?
                    .to_public_key_der(),
                EcCurve::P521 => p521::PublicKey::from_sec1_bytes(point.as_bytes())
                    .map_err(invalid)?
                    .to_public_key_der(),
            }
        }
        .map_err(|e| SignerError::InvalidKey(format!("encode public key failed: {e}")))?;

        PublicKey::from_der(document.into_vec())
    }

    fn sign(&self, alg: JwtSignAlgorithm, payload: SignPayload<'_>) -> Result<Vec<u8>> {
        let digest = payload.to_digest(alg)?;
        let session = self.open_session()?;
        let key = self.find_object(&session, ObjectClass::PRIVATE_KEY)?;
        let key_type = key_type(&session, key)?;

        match alg.curve() {
            None if key_type == KeyType::RSA => {
                let digest_info = alg.pkcs1_digest_info(&digest)?;
                session
                    .sign(&Mechanism::RsaPkcs, key, &digest_info)
                    .map_err(token_error)
            }
            Some(curve) if key_type == KeyType::EC => {
                let key_curve = ec_curve(&session, key)?;
                if key_curve != curve {
                    return Err(SignerError::KeyMismatch {
                        algorithm: alg.as_str(),
                        reason: format!("token key is {}", key_curve.name()),
                    });
                }
                let raw = session
                    .sign(&Mechanism::Ecdsa, key, &digest)
                    .map_err(token_error)?;
                raw_to_der(&raw, curve)
            }
            _ => Err(SignerError::KeyMismatch {
                algorithm: alg.as_str(),
                reason: format!("token key type is {key_type}"),
            }),
        }
    }
}
