// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use serde_json::json;

use crate::application::Application;
use crate::cache::FetchOptions;
use crate::constants::{CATEGORY_OIDC, WELL_KNOWN_OPENID_CONFIGURATION};
use crate::errors::{BrokerError, Result, ResultExt};
use crate::http::fetch_ok;
use crate::oidc::OpenIdConfiguration;
use crate::profile::sha256_hex;

/// Fetches the issuer's discovery document through the cache. A cached
/// document is served on failure however old it is.
#[tracing::instrument(skip(app))]
pub async fn fetch_openid_configuration(
    app: &Application,
    issuer: &str,
    force_new: bool,
) -> Result<OpenIdConfiguration> {
    let discovery = format!(
        "{}{WELL_KNOWN_OPENID_CONFIGURATION}",
        issuer.trim_end_matches('/')
    );
    tracing::info!("[oidc] discovery URL: {}", discovery);

    let options = FetchOptions::default()
        .context(json!({"issuer": issuer, "discovery": discovery}))
        .allow_expired(true)
        .force_new(force_new);
    let content = app
        .cache
        .fetch_or_reuse(CATEGORY_OIDC, &sha256_hex(&[issuer]), options, || {
            fetch_ok(app.http.get(&discovery))
        })
        .await
        .with_context(|| format!("fetch openid configuration, issuer: {issuer}"))?;

    serde_json::from_str(&content)
        .map_err(|e| BrokerError::config(format!("parse openid configuration: {e}")))
}
