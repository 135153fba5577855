// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! # IDaaS Signer
//!
//! Signing capability layer and JWT assertion builder used by the credential
//! broker to authenticate to an identity provider without the broker ever
//! handling raw private key material.
//!
//! ## Architecture
//!
//! ```text
//! ExSignerConfig -> build_ex_signer -> dyn ExSigner
//!                                        |
//!                                        +-> external command (subprocess)
//!                                        +-> key file (PEM / base64 DER)
//!                                        +-> PKCS#11 token   (feature "pkcs11")
//!                                        +-> YubiKey PIV     (feature "yubikey-piv")
//!
//! ExJwtSigner = key id + algorithm + dyn ExSigner -> compact JWS
//! ```
//!
//! ## Modules
//!
//! - [`algorithm`]: RS256/384/512 and ES256/384/512 with their hashes and curves
//! - [`config`]: serde model of the `client_assertion_signer` profile section
//! - [`ecdsa`]: DER to fixed-width `R || S` conversion
//! - [`jwt`]: JWS header and claims assembly
//! - [`signer`]: the [`signer::ExSigner`] contract and backend selection

pub mod algorithm;
pub mod config;
pub mod constants;
pub mod ecdsa;
pub mod errors;
pub mod external;
pub mod jwt;
pub mod key_file;
#[cfg(feature = "pkcs11")]
pub mod pkcs11;
#[cfg(feature = "yubikey-piv")]
pub mod piv;
pub mod signer;

pub use algorithm::JwtSignAlgorithm;
pub use config::{ExSignerConfig, SecretValue};
pub use errors::SignerError;
pub use jwt::{ExJwtSigner, Jti, JwtSignerOptions};
pub use signer::{build_ex_signer, build_jwt_signer, ExSigner, PublicKey, SignPayload};
