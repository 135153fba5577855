// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

#[derive(thiserror::Error, Debug)]
pub enum SignerError {
    #[error("signer configuration error: {0}")]
    Config(String),
    #[error("unsupported sign algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("digest length mismatch: expected {expected} bytes for {algorithm}, got {actual}")]
    DigestLength {
        algorithm: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("key does not match algorithm {algorithm}: {reason}")]
    KeyMismatch {
        algorithm: &'static str,
        reason: String,
    },
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("external command exited with {0:?}: {1}")]
    CommandFailed(Option<i32>, String),
    #[error("external command reported failure: {0}")]
    CommandRejected(String),
    #[error("invalid ECDSA signature: {0}")]
    InvalidSignature(String),
    #[error("hardware token error: {0}")]
    Token(String),
    #[error("signing failed: {0}")]
    Sign(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl From<data_encoding::DecodeError> for SignerError {
    fn from(source: data_encoding::DecodeError) -> Self {
        tracing::error!("[signer] {:?}", source);
        SignerError::InvalidKey(format!("base64 decode failed: {source}"))
    }
}

impl From<der::Error> for SignerError {
    fn from(source: der::Error) -> Self {
        tracing::error!("[signer] {:?}", source);
        SignerError::InvalidSignature(source.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SignerError>;
