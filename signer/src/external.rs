// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Signer backed by an external program.
//!
//! The program is invoked once per operation:
//!
//! ```text
//! <command> external_public_key --parameter <parameter>
//! <command> external_sign --alg <ALG> --parameter <parameter> --message-base64 <b64>
//! ```
//!
//! and answers on stdout with `{"success": true, ...}` or
//! `{"success": false, "error": "..."}`. Stdin and stderr are inherited so the
//! program can prompt the operator (PIN entry, touch confirmation).

use std::process::{Command, Stdio};

use data_encoding::BASE64;
use serde::Deserialize;

use crate::algorithm::JwtSignAlgorithm;
use crate::constants::{EXTERNAL_PUBLIC_KEY_ACTION, EXTERNAL_SIGN_ACTION};
use crate::errors::{Result, SignerError};
use crate::signer::{ExSigner, PublicKey, SignPayload};

#[derive(Debug, Deserialize)]
struct ExternalResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    signature_base64: Option<String>,
    #[serde(default)]
    public_key_base64: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExternalCommandSigner {
    command: String,
    parameter: String,
}

impl ExternalCommandSigner {
    pub fn new(command: &str, parameter: &str) -> Result<Self> {
        if command.is_empty() {
            return Err(SignerError::Config(
                "external signer command is empty".to_string(),
            ));
        }
        if parameter.is_empty() {
            return Err(SignerError::Config(
                "external signer parameter is empty".to_string(),
            ));
        }
        Ok(Self {
            command: command.to_string(),
            parameter: parameter.to_string(),
        })
    }

    #[tracing::instrument(skip(self, args))]
    fn run(&self, action: &str, args: &[&str]) -> Result<ExternalResponse> {
        let output = Command::new(&self.command)
            .arg(action)
            .args(args)
            .stdin(Stdio::inherit())
            .stderr(Stdio::inherit())
            .stdout(Stdio::piped())
            .output()?;

        if !output.status.success() {
            return Err(SignerError::CommandFailed(
                output.status.code(),
                format!("{} {} failed", self.command, action),
            ));
        }

        let response: ExternalResponse =
            serde_json::from_slice(output.stdout.as_slice()).map_err(|e| {
                SignerError::CommandRejected(format!(
                    "malformed {action} response: {e}: {}",
                    String::from_utf8_lossy(output.stdout.as_slice())
                ))
            })?;

        if !response.success {
            return Err(SignerError::CommandRejected(
                response
                    .error
                    .unwrap_or_else(|| format!("{action} returned success=false")),
            ));
        }
        Ok(response)
    }
}

impl ExSigner for ExternalCommandSigner {
    fn public_key(&self) -> Result<PublicKey> {
        let response = self.run(
            EXTERNAL_PUBLIC_KEY_ACTION,
            &["--parameter", self.parameter.as_str()],
        )?;
        let encoded = response.public_key_base64.ok_or_else(|| {
            SignerError::CommandRejected("response is missing public_key_base64".to_string())
        })?;
        PublicKey::from_der(BASE64.decode(encoded.as_bytes())?)
    }

    fn sign(&self, alg: JwtSignAlgorithm, payload: SignPayload<'_>) -> Result<Vec<u8>> {
        let SignPayload::Message(message) = payload else {
            return Err(SignerError::Config(
                "external command signer only signs messages, not digests".to_string(),
            ));
        };
        let message_base64 = BASE64.encode(message);
        let response = self.run(
            EXTERNAL_SIGN_ACTION,
            &[
                "--alg",
                alg.as_str(),
                "--parameter",
                self.parameter.as_str(),
                "--message-base64",
                message_base64.as_str(),
            ],
        )?;
        let encoded = response.signature_base64.ok_or_else(|| {
            SignerError::CommandRejected("response is missing signature_base64".to_string())
        })?;
        Ok(BASE64.decode(encoded.as_bytes())?)
    }
}
