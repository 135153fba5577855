// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Signer backed by a key in a YubiKey PIV slot.

use der::Encode;
use pkcs8::spki::SubjectPublicKeyInfoRef;
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use yubikey::piv::{AlgorithmId, RetiredSlotId, SlotId};
use yubikey::{Certificate, YubiKey};

use crate::algorithm::{EcCurve, JwtSignAlgorithm};
use crate::config::{SecretValue, YubikeyPivConfig};
use crate::constants::ENV_YUBIKEY_PIN;
use crate::errors::{Result, SignerError};
use crate::signer::{ExSigner, PublicKey, SignPayload};

const RSA_ENCRYPTION_OID: &str = "1.2.840.113549.1.1.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinPolicy {
    Never,
    Once,
    Always,
}

fn yubikey_error(e: yubikey::Error) -> SignerError {
    tracing::error!("[signer] YubiKey error: {:?}", e);
    SignerError::Token(e.to_string())
}

/// `auth`, `sign`, `cardAuth` (and their long names) or `rN` for retired slot N.
pub fn parse_slot(slot: &str) -> Result<SlotId> {
    match slot {
        "auth" | "authentication" => return Ok(SlotId::Authentication),
        "sign" | "signature" => return Ok(SlotId::Signature),
        "cardAuth" | "cardAuthentication" => return Ok(SlotId::CardAuthentication),
        _ => {}
    }
    let lower = slot.to_ascii_lowercase();
    lower
        .strip_prefix('r')
        .and_then(|index| index.parse::<u8>().ok())
        .and_then(|index| index.checked_add(0x81))
        .and_then(|id| RetiredSlotId::try_from(id).ok())
        .map(SlotId::Retired)
        .ok_or_else(|| SignerError::Config(format!("invalid slot id: {slot}")))
}

pub fn parse_pin_policy(policy: &str) -> Result<PinPolicy> {
    match policy {
        "never" => Ok(PinPolicy::Never),
        "once" | "" => Ok(PinPolicy::Once),
        "always" => Ok(PinPolicy::Always),
        other => Err(SignerError::Config(format!("invalid pin policy: {other}"))),
    }
}

/// EMSA-PKCS1-v1_5 encoding of `digest_info` for a modulus of `key_len` bytes.
pub fn pkcs1_v15_pad(digest_info: &[u8], key_len: usize) -> Result<Vec<u8>> {
    if key_len < digest_info.len() + 11 {
        return Err(SignerError::InvalidKey(format!(
            "RSA key of {key_len} bytes is too short for the digest"
        )));
    }
    let mut block = Vec::with_capacity(key_len);
    block.extend([0x00, 0x01]);
    block.resize(key_len - digest_info.len() - 1, 0xff);
    block.push(0x00);
    block.extend_from_slice(digest_info);
    Ok(block)
}

pub struct YubikeyPivSigner {
    slot: SlotId,
    pin: Option<SecretValue>,
    pin_policy: PinPolicy,
}

impl YubikeyPivSigner {
    pub fn new(config: &YubikeyPivConfig) -> Result<Self> {
        let slot = parse_slot(&config.slot)?;
        let pin_policy = parse_pin_policy(&config.pin_policy)?;
        let pin = config.pin.or_env(ENV_YUBIKEY_PIN);
        if pin.is_none() && pin_policy != PinPolicy::Never {
            return Err(SignerError::Config(format!(
                "YubiKey PIN is not configured and {ENV_YUBIKEY_PIN} is not set"
            )));
        }
        Ok(Self {
            slot,
            pin,
            pin_policy,
        })
    }

    fn open(&self) -> Result<YubiKey> {
        YubiKey::open().map_err(|e| {
            tracing::error!("[signer] yubikey not found: {:?}", e);
            SignerError::Token(
                "yubikey not found, please make sure the key is inserted".to_string(),
            )
        })
    }

    fn slot_public_key(&self, yubikey: &mut YubiKey) -> Result<Vec<u8>> {
        let certificate = Certificate::read(yubikey, self.slot).map_err(yubikey_error)?;
        certificate
            .subject_pki()
            .to_der()
            .map_err(|e| SignerError::InvalidKey(e.to_string()))
    }
}

impl ExSigner for YubikeyPivSigner {
    #[tracing::instrument(skip(self))]
    fn public_key(&self) -> Result<PublicKey> {
        let mut yubikey = self.open()?;
        PublicKey::from_der(self.slot_public_key(&mut yubikey)?)
    }

    #[tracing::instrument(skip(self, payload))]
    fn sign(&self, alg: JwtSignAlgorithm, payload: SignPayload<'_>) -> Result<Vec<u8>> {
        let digest = payload.to_digest(alg)?;
        let mut yubikey = self.open()?;
        let public_key = self.slot_public_key(&mut yubikey)?;
        let spki = SubjectPublicKeyInfoRef::try_from(public_key.as_slice())
            .map_err(|e| SignerError::InvalidKey(e.to_string()))?;

        let mismatch = |reason: String| SignerError::KeyMismatch {
            algorithm: alg.as_str(),
            reason,
        };

        let (algorithm_id, input) = match alg.curve() {
            None => {
                if spki.algorithm.oid.to_string() != RSA_ENCRYPTION_OID {
                    return Err(mismatch("slot key is not RSA".to_string()));
                }
                let rsa_key = rsa::RsaPublicKey::from_public_key_der(&public_key)
                    .map_err(|e| SignerError::InvalidKey(e.to_string()))?;
                let algorithm_id = match rsa_key.size() {
                    128 => AlgorithmId::Rsa1024,
                    256 => AlgorithmId::Rsa2048,
                    other => {
                        return Err(SignerError::InvalidKey(format!(
                            "unsupported PIV RSA key size: {} bits",
                            other * 8
                        )));
                    }
                };
                let digest_info = alg.pkcs1_digest_info(&digest)?;
                (algorithm_id, pkcs1_v15_pad(&digest_info, rsa_key.size())?)
            }
            Some(curve) => {
                let params = spki
                    .algorithm
                    .parameters
                    .and_then(|p| p.to_der().ok())
                    .unwrap_or_default();
                let key_curve = EcCurve::from_named_curve_der(&params)
                    .ok_or_else(|| mismatch("slot key is not an EC key".to_string()))?;
                if key_curve != curve {
                    return Err(mismatch(format!("slot key is {}", key_curve.name())));
                }
                let algorithm_id = match curve {
                    EcCurve::P256 => AlgorithmId::EccP256,
                    EcCurve::P384 => AlgorithmId::EccP384,
                    EcCurve::P521 => {
                        return Err(mismatch("PIV does not support P-521".to_string()));
                    }
                };
                (algorithm_id, digest)
            }
        };

        if self.pin_policy != PinPolicy::Never {
            if let Some(pin) = &self.pin {
                yubikey
                    .verify_pin(pin.expose().as_bytes())
                    .map_err(yubikey_error)?;
            }
        }

        let signature = yubikey::piv::sign_data(&mut yubikey, &input, algorithm_id, self.slot)
            .map_err(yubikey_error)?;
        Ok(signature.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_named_slots() {
        assert_eq!(parse_slot("auth").unwrap(), SlotId::Authentication);
        assert_eq!(parse_slot("signature").unwrap(), SlotId::Signature);
        assert_eq!(parse_slot("cardAuth").unwrap(), SlotId::CardAuthentication);
    }

    #[test]
    fn test_parse_retired_slots() {
        assert_eq!(
            parse_slot("r1").unwrap(),
            SlotId::Retired(RetiredSlotId::R1)
        );
        assert_eq!(
            parse_slot("R20").unwrap(),
            SlotId::Retired(RetiredSlotId::R20)
        );
        assert!(parse_slot("r21").is_err());
        assert!(parse_slot("x1").is_err());
    }

    #[test]
    fn test_pin_policy() {
        assert_eq!(parse_pin_policy("never").unwrap(), PinPolicy::Never);
        assert!(parse_pin_policy("sometimes").is_err());
    }

    #[test]
    fn test_pkcs1_padding() {
        let block = pkcs1_v15_pad(&[0xaa; 51], 256).unwrap();
        assert_eq!(block.len(), 256);
        assert_eq!(&block[..2], &[0x00, 0x01]);
        assert_eq!(block[256 - 52], 0x00);
        assert!(block[2..256 - 52].iter().all(|b| *b == 0xff));
        assert!(pkcs1_v15_pad(&[0xaa; 51], 60).is_err());
    }
}
