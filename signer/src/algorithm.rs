// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! JWS signature algorithms supported by every signer backend.

use std::fmt;
use std::str::FromStr;

use aws_lc_rs::digest;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SignerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JwtSignAlgorithm {
    RS256,
    RS384,
    RS512,
    ES256,
    ES384,
    ES512,
}

/// NIST curve an ECDSA algorithm is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcCurve {
    P256,
    P384,
    P521,
}

impl EcCurve {
    /// Width in bytes of each of R and S in the raw JWS encoding.
    pub fn coordinate_len(self) -> usize {
        match self {
            EcCurve::P256 => 32,
            EcCurve::P384 => 48,
            EcCurve::P521 => 66,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EcCurve::P256 => "P-256",
            EcCurve::P384 => "P-384",
            EcCurve::P521 => "P-521",
        }
    }

    /// Maps DER encoded `namedCurve` parameters (as stored in `CKA_EC_PARAMS`).
    pub fn from_named_curve_der(params: &[u8]) -> Option<EcCurve> {
        match params {
            P256_OID_DER => Some(EcCurve::P256),
            P384_OID_DER => Some(EcCurve::P384),
            P521_OID_DER => Some(EcCurve::P521),
            _ => None,
        }
    }
}

const P256_OID_DER: &[u8] = &[0x06, 0x08, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07];
const P384_OID_DER: &[u8] = &[0x06, 0x05, 0x2b, 0x81, 0x04, 0x00, 0x22];
const P521_OID_DER: &[u8] = &[0x06, 0x05, 0x2b, 0x81, 0x04, 0x00, 0x23];

// DER DigestInfo headers for PKCS#1 v1.5, RFC 8017 section 9.2 note 1
const SHA256_DIGEST_INFO: &[u8] = &[
    0x30, 0x31, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01,
    0x05, 0x00, 0x04, 0x20,
];
const SHA384_DIGEST_INFO: &[u8] = &[
    0x30, 0x41, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x02,
    0x05, 0x00, 0x04, 0x30,
];
const SHA512_DIGEST_INFO: &[u8] = &[
    0x30, 0x51, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x03,
    0x05, 0x00, 0x04, 0x40,
];

impl JwtSignAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            JwtSignAlgorithm::RS256 => "RS256",
            JwtSignAlgorithm::RS384 => "RS384",
            JwtSignAlgorithm::RS512 => "RS512",
            JwtSignAlgorithm::ES256 => "ES256",
            JwtSignAlgorithm::ES384 => "ES384",
            JwtSignAlgorithm::ES512 => "ES512",
        }
    }

    pub fn is_ecdsa(self) -> bool {
        self.curve().is_some()
    }

    pub fn curve(self) -> Option<EcCurve> {
        match self {
            JwtSignAlgorithm::ES256 => Some(EcCurve::P256),
            JwtSignAlgorithm::ES384 => Some(EcCurve::P384),
            JwtSignAlgorithm::ES512 => Some(EcCurve::P521),
            _ => None,
        }
    }

    /// Output size of the hash the algorithm signs over.
    pub fn digest_len(self) -> usize {
        match self {
            JwtSignAlgorithm::RS256 | JwtSignAlgorithm::ES256 => 32,
            JwtSignAlgorithm::RS384 | JwtSignAlgorithm::ES384 => 48,
            JwtSignAlgorithm::RS512 | JwtSignAlgorithm::ES512 => 64,
        }
    }

    fn digest_algorithm(self) -> &'static digest::Algorithm {
        match self {
            JwtSignAlgorithm::RS256 | JwtSignAlgorithm::ES256 => &digest::SHA256,
            JwtSignAlgorithm::RS384 | JwtSignAlgorithm::ES384 => &digest::SHA384,
            JwtSignAlgorithm::RS512 | JwtSignAlgorithm::ES512 => &digest::SHA512,
        }
    }

    pub fn hash(self, message: &[u8]) -> Vec<u8> {
        digest::digest(self.digest_algorithm(), message)
            .as_ref()
            .to_vec()
    }

    /// Wraps a digest in the DER `DigestInfo` an RSA PKCS#1 v1.5 token signs.
    pub fn pkcs1_digest_info(self, digest: &[u8]) -> Result<Vec<u8>> {
        self.check_digest(digest)?;
        let prefix = match self {
            JwtSignAlgorithm::RS256 | JwtSignAlgorithm::ES256 => SHA256_DIGEST_INFO,
            JwtSignAlgorithm::RS384 | JwtSignAlgorithm::ES384 => SHA384_DIGEST_INFO,
            JwtSignAlgorithm::RS512 | JwtSignAlgorithm::ES512 => SHA512_DIGEST_INFO,
        };
        Ok([prefix, digest].concat())
    }

    pub fn check_digest(self, digest: &[u8]) -> Result<()> {
        if digest.len() != self.digest_len() {
            return Err(SignerError::DigestLength {
                algorithm: self.as_str(),
                expected: self.digest_len(),
                actual: digest.len(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for JwtSignAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JwtSignAlgorithm {
    type Err = SignerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "RS256" => Ok(JwtSignAlgorithm::RS256),
            "RS384" => Ok(JwtSignAlgorithm::RS384),
            "RS512" => Ok(JwtSignAlgorithm::RS512),
            "ES256" => Ok(JwtSignAlgorithm::ES256),
            "ES384" => Ok(JwtSignAlgorithm::ES384),
            "ES512" => Ok(JwtSignAlgorithm::ES512),
            other => Err(SignerError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}
