// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use idaas_signer::SignerError;

#[derive(thiserror::Error, Debug)]
pub enum BrokerError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("oauth error: {error}, description: {description}, request id: {request_id}")]
    OAuth {
        error: String,
        description: String,
        request_id: String,
    },
    #[error("user denied, stop fallback to local cached credentials: {0}")]
    StopFallback(String),
    #[error("fetch content failed, with ForceNew option: {0}")]
    ForceNewFailed(Box<BrokerError>),
    #[error("sts error: {0}")]
    Sts(String),
    #[error("signer error: {0}")]
    Signer(#[from] SignerError),
    #[error("cache error: {0}")]
    Cache(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<BrokerError>,
    },
}

pub type Result<T> = std::result::Result<T, BrokerError>;

impl BrokerError {
    /// True when the error, or any error it wraps, is an explicit denial that
    /// must not be papered over with cached content.
    pub fn is_stop_fallback(&self) -> bool {
        match self {
            Self::StopFallback(_) => true,
            Self::Context { source, .. } => source.is_stop_fallback(),
            Self::ForceNewFailed(inner) => inner.is_stop_fallback(),
            _ => false,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Attaches a stage or profile description to any fallible broker call.
pub trait ResultExt<T> {
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.context(f()))
    }
}

impl From<reqwest::Error> for BrokerError {
    fn from(source: reqwest::Error) -> Self {
        tracing::error!("{:?}", source);
        BrokerError::Transport(source.to_string())
    }
}

impl From<data_encoding::DecodeError> for BrokerError {
    fn from(source: data_encoding::DecodeError) -> Self {
        tracing::debug!("{:?}", source);
        BrokerError::Cache(format!("decode failed: {source}"))
    }
}

impl From<aws_lc_rs::error::Unspecified> for BrokerError {
    fn from(_source: aws_lc_rs::error::Unspecified) -> Self {
        tracing::debug!("[cache] aead operation failed");
        BrokerError::Cache("aead operation failed".to_string())
    }
}

impl From<tempfile::PersistError> for BrokerError {
    fn from(source: tempfile::PersistError) -> Self {
        tracing::error!("{:?}", source);
        BrokerError::Io(source.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_fallback_through_context() {
        let err = BrokerError::StopFallback("access_denied".to_string())
            .context("device code flow")
            .context("profile: dev");
        assert!(err.is_stop_fallback());
        assert!(err.to_string().starts_with("profile: dev: device code flow"));
    }

    #[test]
    fn test_other_errors_are_not_stop_fallback() {
        assert!(!BrokerError::Transport("timeout".into()).is_stop_fallback());
        assert!(!BrokerError::Sts("AuthenticationFail".into()).is_stop_fallback());
        let oauth = BrokerError::OAuth {
            error: "invalid_client".into(),
            description: "bad secret".into(),
            request_id: "r-1".into(),
        };
        assert!(!oauth.context("token").is_stop_fallback());
    }

    #[test]
    fn test_with_context() {
        let result: Result<()> = Err(BrokerError::config("no region specified"));
        let err = result.with_context(|| "aws sts").unwrap_err();
        assert_eq!(err.to_string(), "aws sts: configuration error: no region specified");
    }
}
