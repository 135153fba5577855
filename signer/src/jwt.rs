// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Compact JWS construction over an [`ExSigner`].

use std::fmt;
use std::time::Duration;

use data_encoding::BASE64URL_NOPAD;
use serde_json::{Map, Value};

use crate::algorithm::JwtSignAlgorithm;
use crate::constants::{DEFAULT_ASSERTION_VALIDITY, JTI_NONCE_LEN, JWT_TYPE};
use crate::ecdsa::der_to_raw;
use crate::errors::{Result, SignerError};
use crate::signer::{ExSigner, PublicKey, SignPayload};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Jti {
    #[default]
    Omit,
    Auto,
    Custom(String),
}

#[derive(Debug, Clone)]
pub struct JwtSignerOptions {
    /// `typ` header, `JWT` when unset.
    pub typ: Option<String>,
    pub issuer: String,
    pub audience: String,
    pub subject: String,
    pub jti: Jti,
    pub validity: Duration,
    /// Extra header members. `alg`, `typ` and `kid` are always overwritten.
    pub header: Map<String, Value>,
}

impl Default for JwtSignerOptions {
    fn default() -> Self {
        Self {
            typ: None,
            issuer: String::new(),
            audience: String::new(),
            subject: String::new(),
            jti: Jti::Omit,
            validity: DEFAULT_ASSERTION_VALIDITY,
            header: Map::new(),
        }
    }
}

pub struct ExJwtSigner {
    key_id: String,
    alg: JwtSignAlgorithm,
    signer: Box<dyn ExSigner>,
}

impl fmt::Debug for ExJwtSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExJwtSigner")
            .field("key_id", &self.key_id)
            .field("alg", &self.alg)
            .finish_non_exhaustive()
    }
}

impl ExJwtSigner {
    pub fn new(key_id: String, alg: JwtSignAlgorithm, signer: Box<dyn ExSigner>) -> Self {
        Self {
            key_id,
            alg,
            signer,
        }
    }

    pub fn algorithm(&self) -> JwtSignAlgorithm {
        self.alg
    }

    pub fn public_key(&self) -> Result<PublicKey> {
        self.signer.public_key()
    }

    pub fn sign_jwt_with_options(
        &self,
        claims: Map<String, Value>,
        options: &JwtSignerOptions,
    ) -> Result<String> {
        self.sign_jwt_at(claims, options, chrono::Utc::now().timestamp())
    }

    /// Same as [`Self::sign_jwt_with_options`] with an explicit `iat` in unix seconds.
    pub fn sign_jwt_at(
        &self,
        mut claims: Map<String, Value>,
        options: &JwtSignerOptions,
        issued_at: i64,
    ) -> Result<String> {
        let mut header = options.header.clone();
        header.insert(
            "typ".to_string(),
            Value::from(options.typ.as_deref().unwrap_or(JWT_TYPE)),
        );

        claims.insert("iss".to_string(), Value::from(options.issuer.as_str()));
        claims.insert("aud".to_string(), Value::from(options.audience.as_str()));
        claims.insert("sub".to_string(), Value::from(options.subject.as_str()));
        match &options.jti {
            Jti::Omit => {}
            Jti::Auto => {
                claims.insert("jti".to_string(), Value::from(generate_jti()?));
            }
            Jti::Custom(jti) => {
                claims.insert("jti".to_string(), Value::from(jti.as_str()));
            }
        }
        let validity = i64::try_from(options.validity.as_secs())
            .map_err(|_| SignerError::Config("validity out of range".to_string()))?;
        claims.insert("iat".to_string(), Value::from(issued_at));
        claims.insert("exp".to_string(), Value::from(issued_at + validity));

        self.sign_jwt(header, claims)
    }

    #[tracing::instrument(skip_all, fields(alg = %self.alg))]
    pub fn sign_jwt(
        &self,
        mut header: Map<String, Value>,
        claims: Map<String, Value>,
    ) -> Result<String> {
        header.insert("alg".to_string(), Value::from(self.alg.as_str()));
        if !self.key_id.is_empty() {
            header.insert("kid".to_string(), Value::from(self.key_id.as_str()));
        }

        let signing_input = format!(
            "{}.{}",
            BASE64URL_NOPAD.encode(&serde_json::to_vec(&header)?),
            BASE64URL_NOPAD.encode(&serde_json::to_vec(&claims)?)
        );
        tracing::debug!("[signer] signing JWT header.claims: {}", signing_input);

        let mut signature = self
            .signer
            .sign(self.alg, SignPayload::Message(signing_input.as_bytes()))?;
        if let Some(curve) = self.alg.curve() {
            signature = der_to_raw(&signature, curve)?;
        }

        Ok(format!(
            "{}.{}",
            signing_input,
            BASE64URL_NOPAD.encode(&signature)
        ))
    }
}

fn generate_jti() -> Result<String> {
    let mut nonce = [0u8; JTI_NONCE_LEN];
    aws_lc_rs::rand::fill(&mut nonce)
        .map_err(|_| SignerError::Sign("random generator failure".to_string()))?;
    Ok(format!(
        "jti-{}-{}",
        BASE64URL_NOPAD.encode(&nonce),
        chrono::Utc::now().timestamp_millis()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::EcCurve;
    use crate::config::{KeyFileConfig, SecretValue};
    use crate::ecdsa::raw_to_der;
    use crate::key_file::KeyFileSigner;
    use rsa::pkcs1::DecodeRsaPrivateKey;
    use rsa::signature::Verifier;

    const RSA_PKCS1: &str = include_str!("../testdata/rsa_pkcs1.pem");
    const EC_P256: &str = include_str!("../testdata/ec_p256_sec1.pem");

    fn key_file_signer(key: &str, key_id: &str, alg: JwtSignAlgorithm) -> ExJwtSigner {
        let signer = KeyFileSigner::new(&KeyFileConfig {
            key: SecretValue::new(key),
            ..Default::default()
        })
        .unwrap();
        ExJwtSigner::new(key_id.to_string(), alg, Box::new(signer))
    }

    fn client_assertion_options() -> JwtSignerOptions {
        JwtSignerOptions {
            issuer: "client-1".into(),
            subject: "client-1".into(),
            audience: "https://idp.example.com/token".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_rsa_segments_are_exact() {
        let signer = key_file_signer(RSA_PKCS1, "test-key", JwtSignAlgorithm::RS256);
        let jwt = signer
            .sign_jwt_at(Map::new(), &client_assertion_options(), 1_700_000_000)
            .unwrap();

        let parts: Vec<&str> = jwt.split('.').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(
            parts[0],
            "eyJhbGciOiJSUzI1NiIsImtpZCI6InRlc3Qta2V5IiwidHlwIjoiSldUIn0"
        );
        assert_eq!(
            parts[1],
            "eyJhdWQiOiJodHRwczovL2lkcC5leGFtcGxlLmNvbS90b2tlbiIsImV4cCI6MTcwMDAwMDMwMCwiaWF0IjoxNzAwMDAwMDAwLCJpc3MiOiJjbGllbnQtMSIsInN1YiI6ImNsaWVudC0xIn0"
        );

        let private = rsa::RsaPrivateKey::from_pkcs1_pem(RSA_PKCS1).unwrap();
        let verifier =
            rsa::pkcs1v15::VerifyingKey::<sha2::Sha256>::new(rsa::RsaPublicKey::from(&private));
        let signature = BASE64URL_NOPAD.decode(parts[2].as_bytes()).unwrap();
        let signature = rsa::pkcs1v15::Signature::try_from(signature.as_slice()).unwrap();
        verifier
            .verify(format!("{}.{}", parts[0], parts[1]).as_bytes(), &signature)
            .unwrap();
    }

    #[test]
    fn test_ec_signature_is_fixed_width_raw() {
        let signer = key_file_signer(EC_P256, "", JwtSignAlgorithm::ES256);
        let jwt = signer
            .sign_jwt_at(Map::new(), &client_assertion_options(), 1_700_000_000)
            .unwrap();
        let parts: Vec<&str> = jwt.split('.').collect();
        let raw = BASE64URL_NOPAD.decode(parts[2].as_bytes()).unwrap();
        assert_eq!(raw.len(), 64);

        let der = raw_to_der(&raw, EcCurve::P256).unwrap();
        assert_eq!(der_to_raw(&der, EcCurve::P256).unwrap(), raw);

        let secret = p256::SecretKey::from_sec1_pem(EC_P256).unwrap();
        let verifier = p256::ecdsa::VerifyingKey::from(secret.public_key());
        let signature = p256::ecdsa::Signature::from_slice(&raw).unwrap();
        verifier
            .verify(format!("{}.{}", parts[0], parts[1]).as_bytes(), &signature)
            .unwrap();

        // no kid when the key id is empty
        let header = BASE64URL_NOPAD.decode(parts[0].as_bytes()).unwrap();
        let header: Value = serde_json::from_slice(&header).unwrap();
        assert!(header.get("kid").is_none());
        assert_eq!(header["alg"], "ES256");
    }

    #[test]
    fn test_jti_modes() {
        let signer = key_file_signer(EC_P256, "", JwtSignAlgorithm::ES256);
        let claims_of = |jwt: &str| -> Value {
            let payload = jwt.split('.').nth(1).unwrap();
            serde_json::from_slice(&BASE64URL_NOPAD.decode(payload.as_bytes()).unwrap()).unwrap()
        };

        let omitted = signer
            .sign_jwt_with_options(Map::new(), &client_assertion_options())
            .unwrap();
        assert!(claims_of(&omitted).get("jti").is_none());

        let options = JwtSignerOptions {
            jti: Jti::Auto,
            ..client_assertion_options()
        };
        let auto = signer.sign_jwt_with_options(Map::new(), &options).unwrap();
        let jti = claims_of(&auto)["jti"].as_str().unwrap().to_string();
        assert!(jti.starts_with("jti-"));
        let (_, millis) = jti.rsplit_once('-').unwrap();
        assert!(millis.parse::<i64>().unwrap() > 0);

        let options = JwtSignerOptions {
            jti: Jti::Custom("fixed".into()),
            ..client_assertion_options()
        };
        let custom = signer.sign_jwt_with_options(Map::new(), &options).unwrap();
        assert_eq!(claims_of(&custom)["jti"], "fixed");
    }

    #[test]
    fn test_validity_window() {
        let signer = key_file_signer(EC_P256, "", JwtSignAlgorithm::ES256);
        let options = JwtSignerOptions {
            validity: Duration::from_secs(60),
            typ: Some("client-authentication+jwt".into()),
            ..client_assertion_options()
        };
        let jwt = signer.sign_jwt_at(Map::new(), &options, 100).unwrap();
        let parts: Vec<&str> = jwt.split('.').collect();
        let claims: Value =
            serde_json::from_slice(&BASE64URL_NOPAD.decode(parts[1].as_bytes()).unwrap()).unwrap();
        assert_eq!(claims["iat"], 100);
        assert_eq!(claims["exp"], 160);
        let header: Value =
            serde_json::from_slice(&BASE64URL_NOPAD.decode(parts[0].as_bytes()).unwrap()).unwrap();
        assert_eq!(header["typ"], "client-authentication+jwt");
    }
}
