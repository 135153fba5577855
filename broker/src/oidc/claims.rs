// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::time::Duration;

use data_encoding::BASE64URL_NOPAD;
use serde::Deserialize;
use serde_json::Value;

use crate::errors::{BrokerError, Result};

/// Claims decoded from a bearer JWT without verifying it. Only used to
/// estimate expiry locally.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SimpleJwtClaims {
    #[serde(rename = "iss")]
    pub issuer: String,
    /// A string or an array of strings.
    #[serde(rename = "aud")]
    pub audience: Value,
    #[serde(rename = "sub")]
    pub subject: String,
    /// Unix seconds.
    #[serde(rename = "iat")]
    pub issued_at: i64,
    /// Unix seconds.
    #[serde(rename = "exp")]
    pub expires_at: i64,
}

impl SimpleJwtClaims {
    pub fn parse(jwt: &str) -> Result<Self> {
        let parts: Vec<&str> = jwt.trim().split('.').collect();
        if parts.len() != 3 {
            return Err(BrokerError::config(format!(
                "invalid JWT token, {} parts",
                parts.len()
            )));
        }
        // tolerate padded encoders
        let payload = BASE64URL_NOPAD
            .decode(parts[1].trim_end_matches('=').as_bytes())
            .map_err(|e| BrokerError::config(format!("invalid JWT token payload: {e}")))?;
        serde_json::from_slice(&payload)
            .map_err(|e| BrokerError::config(format!("invalid JWT token claims: {e}")))
    }

    /// True when the token stays valid for more than `threshold` from `now`.
    pub fn is_valid_at_least_at(&self, threshold: Duration, now: i64) -> bool {
        let threshold = i64::try_from(threshold.as_secs()).unwrap_or(i64::MAX);
        self.expires_at - now > threshold
    }

    pub fn is_valid_at_least(&self, threshold: Duration) -> bool {
        let valid = self.is_valid_at_least_at(threshold, chrono::Utc::now().timestamp());
        tracing::debug!(
            "[oidc] JWT exp: {}, threshold: {:?}, valid: {}",
            self.expires_at,
            threshold,
            valid
        );
        valid
    }
}

/// Parses `jwt` and reports whether it is valid for more than `threshold`.
/// Undecodable tokens are never valid.
pub fn jwt_valid_at_least(jwt: &str, threshold: Duration) -> bool {
    SimpleJwtClaims::parse(jwt).is_ok_and(|claims| claims.is_valid_at_least(threshold))
}

#[cfg(test)]
pub(crate) fn unsigned_jwt(claims: &Value) -> String {
    format!(
        "{}.{}.c2ln",
        BASE64URL_NOPAD.encode(br#"{"alg":"none"}"#),
        BASE64URL_NOPAD.encode(claims.to_string().as_bytes())
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_claims() {
        let jwt = unsigned_jwt(&json!({
            "iss": "https://idp.example.com",
            "aud": ["a", "b"],
            "sub": "user@example.com",
            "iat": 1700000000,
            "exp": 1700000600
        }));
        let claims = SimpleJwtClaims::parse(&jwt).unwrap();
        assert_eq!(claims.subject, "user@example.com");
        assert_eq!(claims.audience, json!(["a", "b"]));
        assert_eq!(claims.expires_at, 1700000600);
    }

    #[test]
    fn test_threshold() {
        let claims = SimpleJwtClaims {
            expires_at: 1_000,
            ..Default::default()
        };
        assert!(claims.is_valid_at_least_at(Duration::from_secs(60), 900));
        assert!(!claims.is_valid_at_least_at(Duration::from_secs(100), 900));
        assert!(!claims.is_valid_at_least_at(Duration::from_secs(0), 1_000));
    }

    #[test]
    fn test_invalid_tokens() {
        assert!(SimpleJwtClaims::parse("abc").is_err());
        assert!(SimpleJwtClaims::parse("a.!!!.c").is_err());
        assert!(!jwt_valid_at_least("not-a-jwt", Duration::from_secs(1)));
    }

    #[test]
    fn test_jwt_valid_at_least_uses_clock() {
        let now = chrono::Utc::now().timestamp();
        let jwt = unsigned_jwt(&json!({"exp": now + 600}));
        assert!(jwt_valid_at_least(&jwt, Duration::from_secs(120)));
        assert!(!jwt_valid_at_least(&jwt, Duration::from_secs(900)));
    }
}
