// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::time::Duration;

pub const ENV_PKCS11_PIN: &str = "ALIBABA_CLOUD_IDAAS_PKSC11_PIN";
pub const ENV_YUBIKEY_PIN: &str = "ALIBABA_CLOUD_IDAAS_YUBIKEY_PIN";
pub const ENV_PKCS8_PASSWORD: &str = "ALIBABA_CLOUD_IDAAS_PKCS8_PASSWORD";

pub const EXTERNAL_PUBLIC_KEY_ACTION: &str = "external_public_key";
pub const EXTERNAL_SIGN_ACTION: &str = "external_sign";

pub const PEM_ENCRYPTED_PRIVATE_KEY: &str = "ENCRYPTED PRIVATE KEY";

pub const JWT_TYPE: &str = "JWT";
/// Random bytes in an auto-generated `jti`.
pub const JTI_NONCE_LEN: usize = 12;
pub const DEFAULT_ASSERTION_VALIDITY: Duration = Duration::from_secs(5 * 60);
