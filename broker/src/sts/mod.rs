// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Cloud STS exchange: trades an OIDC bearer token for temporary cloud
//! credentials and caches the result per profile.

use std::time::Duration;

use data_encoding::BASE64URL_NOPAD;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::application::Application;
use crate::cache::FetchOptions;
use crate::constants::{
    CATEGORY_CLOUD_TOKEN, DEFAULT_ROLE_SESSION_PREFIX, ROLE_SESSION_NAME_MAX_LEN,
    ROLE_SESSION_NONCE_LEN, STS_EXPIRY_THRESHOLD, STS_REFRESH_THRESHOLD,
};
use crate::errors::{BrokerError, Result, ResultExt};
use crate::oidc::claims::SimpleJwtClaims;

pub mod alibaba;
pub mod aws;

/// Maps every character outside `[A-Za-z0-9.@_-]` to `_` and stops at
/// `max_len` characters.
pub fn sanitize_session_prefix(subject: &str, max_len: usize) -> String {
    subject
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '@' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .take(max_len)
        .collect()
}

/// Session name `<prefix>-<unix>-<nonce>` with the prefix taken from the
/// token subject. The result never exceeds `min(max_len, 64)` characters.
pub fn role_session_name(subject: &str, max_len: usize) -> String {
    let mut nonce = [0u8; ROLE_SESSION_NONCE_LEN];
    fastrand::fill(&mut nonce);
    role_session_name_at(
        subject,
        max_len,
        chrono::Utc::now().timestamp(),
        &BASE64URL_NOPAD.encode(&nonce),
    )
}

fn role_session_name_at(subject: &str, max_len: usize, now: i64, nonce: &str) -> String {
    let suffix = format!("-{now}-{nonce}");
    let budget = max_len
        .min(ROLE_SESSION_NAME_MAX_LEN)
        .saturating_sub(suffix.len());
    let mut prefix = sanitize_session_prefix(subject, budget);
    if prefix.is_empty() {
        prefix = sanitize_session_prefix(DEFAULT_ROLE_SESSION_PREFIX, budget);
    }
    format!("{prefix}{suffix}")
}

/// The configured session name, or one generated from the token subject.
pub fn resolve_role_session_name(configured: &str, oidc_token: &str) -> String {
    if !configured.is_empty() {
        return configured.to_string();
    }
    let subject = match SimpleJwtClaims::parse(oidc_token) {
        Ok(claims) => claims.subject,
        Err(e) => {
            tracing::debug!("[sts] parse OIDC token failed: {}", e);
            String::new()
        }
    };
    let name = role_session_name(&subject, ROLE_SESSION_NAME_MAX_LEN);
    tracing::info!(
        "[sts] role session name not specified, use role session name {}",
        name
    );
    name
}

/// Cached credentials of one STS target. `is_valid_at_least` decides the
/// 20 minute refresh and 3 minute expiry windows.
pub(crate) async fn fetch_sts_cached<T, V, F, Fut>(
    app: &Application,
    profile: &str,
    digest: &str,
    force_new: bool,
    is_valid_at_least: V,
    fetch: F,
) -> Result<T>
where
    T: Serialize + DeserializeOwned,
    V: Fn(&T, Duration) -> bool + Send + Sync + Copy,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let key = format!("{profile}_{}", &digest[..32]);
    tracing::debug!("[sts] cache key: {} {}", CATEGORY_CLOUD_TOKEN, key);

    let valid = move |content: &str, threshold: Duration| {
        serde_json::from_str::<T>(content).is_ok_and(|token| is_valid_at_least(&token, threshold))
    };
    let options = FetchOptions::with_predicates(
        move |envelope| !valid(&envelope.content, STS_REFRESH_THRESHOLD),
        move |envelope| !valid(&envelope.content, STS_EXPIRY_THRESHOLD),
    )
    .context(json!({"profile": profile, "digest": digest}))
    .force_new(force_new);

    let content = app
        .cache
        .fetch_or_reuse(CATEGORY_CLOUD_TOKEN, &key, options, || async {
            let token = fetch().await?;
            Ok::<_, BrokerError>(serde_json::to_string(&token)?)
        })
        .await
        .with_context(|| format!("fetch cloud sts token, profile: {profile}"))?;

    serde_json::from_str(&content)
        .map_err(|e| BrokerError::Cache(format!("unmarshal sts token failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oidc::claims::unsigned_jwt;

    // ==================== Session Name Tests ====================

    #[test]
    fn test_session_name_from_subject() {
        let name = role_session_name("user@example.com#1", 40);
        assert!(name.len() <= 40);
        assert!(name.starts_with("user@example.com_1-"));
        assert!(
            name.chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '@' | '_' | '-'))
        );
        // the nonce itself may contain '-'
        let (head, _nonce) = name.split_at(name.len() - 8);
        let (_, unix) = head.trim_end_matches('-').rsplit_once('-').unwrap();
        assert!(unix.parse::<i64>().is_ok());
    }

    #[test]
    fn test_session_name_is_truncated() {
        let subject = "a".repeat(200);
        let name = role_session_name_at(&subject, 64, 1_700_000_000, "AAAAAAAA");
        assert_eq!(name.len(), 64);
        assert!(name.ends_with("-1700000000-AAAAAAAA"));

        // the hard limit wins over a larger budget
        let name = role_session_name_at(&subject, 128, 1_700_000_000, "AAAAAAAA");
        assert_eq!(name.len(), 64);
    }

    #[test]
    fn test_session_name_default_prefix() {
        let name = role_session_name_at("", 64, 1_700_000_000, "n0nce123");
        assert_eq!(name, "idaas-assumed-role-1700000000-n0nce123");
    }

    #[test]
    fn test_sanitize_multibyte() {
        assert_eq!(sanitize_session_prefix("张三 x", 10), "___x");
    }

    #[test]
    fn test_resolve_session_name() {
        assert_eq!(resolve_role_session_name("fixed", "not-a-jwt"), "fixed");
        let jwt = unsigned_jwt(&json!({"sub": "svc:deploy"}));
        assert!(resolve_role_session_name("", &jwt).starts_with("svc_deploy-"));
        assert!(resolve_role_session_name("", "not-a-jwt").starts_with("idaas-assumed-role-"));
    }
}
