// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! RFC 8628 device authorization grant.

use std::future::Future;
use std::time::Duration;

use crate::application::Application;
use crate::constants::{
    DEFAULT_DEVICE_CODE_SCOPE, DEVICE_CODE_REQUEST_ATTEMPTS, DEVICE_POLL_MAX_INTERVAL,
    DEVICE_POLL_MAX_ITERATIONS, DEVICE_POLL_MAX_TRANSPORT_FAILURES, DEVICE_POLL_MIN_INTERVAL,
};
use crate::errors::{BrokerError, Result, ResultExt};
use crate::http::post_form;
use crate::oidc::discovery::fetch_openid_configuration;
use crate::oidc::{
    DeviceCodeResponse, ErrorResponse, GrantType, OAuthErrorCode, TokenRequest, TokenResponse,
    TokenResult, fetch_token,
};
use crate::profile::DeviceCodeConfig;

/// What one poll of the token endpoint means for the loop.
#[derive(Debug)]
pub enum PollStep {
    Success(TokenResponse),
    /// `authorization_pending`
    Continue,
    /// `slow_down`
    Backoff,
    TransportFailure(BrokerError),
    Fatal(BrokerError),
}

impl From<Result<TokenResult>> for PollStep {
    fn from(result: Result<TokenResult>) -> Self {
        match result {
            Err(e) => PollStep::TransportFailure(e),
            Ok(Ok(token)) => PollStep::Success(token),
            Ok(Err(error)) => match error.code() {
                OAuthErrorCode::AuthorizationPending => PollStep::Continue,
                OAuthErrorCode::SlowDown => PollStep::Backoff,
                OAuthErrorCode::AccessDenied => {
                    eprintln!("failed to fetch token with response: {}", error.error);
                    PollStep::Fatal(BrokerError::StopFallback(error.error))
                }
                OAuthErrorCode::Other(_) => {
                    eprintln!("failed to fetch token with response: {}", error.error);
                    PollStep::Fatal(error.into())
                }
            },
        }
    }
}

/// Sleep before each poll, server interval clamped to [2s, 5s].
pub fn poll_interval(interval_seconds: i64) -> Duration {
    let seconds = u64::try_from(interval_seconds).unwrap_or(0);
    Duration::from_secs(seconds).clamp(DEVICE_POLL_MIN_INTERVAL, DEVICE_POLL_MAX_INTERVAL)
}

/// Polls until a token arrives, the user denies, a fatal OAuth error is
/// returned, transport fails more than three times in a row, or the
/// iteration budget runs out.
pub async fn poll_for_token<P, PF, S, SF>(
    initial_interval: i64,
    mut poll: P,
    mut sleep: S,
) -> Result<TokenResponse>
where
    P: FnMut() -> PF,
    PF: Future<Output = Result<TokenResult>>,
    S: FnMut(Duration) -> SF,
    SF: Future<Output = ()>,
{
    let mut interval = initial_interval;
    let mut transport_failures = 0;
    for iteration in 0..DEVICE_POLL_MAX_ITERATIONS {
        let wait = poll_interval(interval);
        tracing::debug!("[oidc] sleep {:?}, #{}", wait, iteration);
        sleep(wait).await;

        match PollStep::from(poll().await) {
            PollStep::Success(token) => return Ok(token),
            PollStep::TransportFailure(e) => {
                transport_failures += 1;
                if transport_failures > DEVICE_POLL_MAX_TRANSPORT_FAILURES {
                    return Err(e.context("failed to fetch token, too many transport errors"));
                }
                tracing::warn!("[oidc] poll #{} failed: {}", iteration, e);
                continue;
            }
            PollStep::Continue => {}
            PollStep::Backoff => interval += 1,
            PollStep::Fatal(e) => return Err(e),
        }
        transport_failures = 0;
    }
    Err(BrokerError::Transport(format!(
        "failed to fetch token after {DEVICE_POLL_MAX_ITERATIONS} polls"
    )))
}

/// Requests a device code, retrying transport failures only.
#[tracing::instrument(skip(app))]
pub async fn request_device_code(
    app: &Application,
    device_authorization_endpoint: &str,
    client_id: &str,
    scope: &str,
) -> Result<DeviceCodeResponse> {
    let scope = if scope.is_empty() {
        DEFAULT_DEVICE_CODE_SCOPE
    } else {
        scope
    };
    let mut last_err = None;
    for attempt in 0..DEVICE_CODE_REQUEST_ATTEMPTS {
        let response = match post_form(
            &app.http,
            device_authorization_endpoint,
            &[("client_id", client_id), ("scope", scope)],
        )
        .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("[oidc] failed to fetch device code #{}: {}", attempt, e);
                last_err = Some(e);
                continue;
            }
        };
        if !response.is_ok() {
            match serde_json::from_str::<ErrorResponse>(&response.body) {
                Ok(error) => {
                    return Err(BrokerError::from(error).context("failed to fetch device code"));
                }
                Err(e) => {
                    tracing::warn!(
                        "[oidc] failed to fetch device code #{}, status: {}",
                        attempt,
                        response.status.as_u16()
                    );
                    last_err = Some(BrokerError::Transport(format!(
                        "failed to parse error response, status: {}: {e}",
                        response.status.as_u16()
                    )));
                    continue;
                }
            }
        }
        return Ok(serde_json::from_str(&response.body)?);
    }
    Err(last_err
        .unwrap_or_else(|| BrokerError::Transport("failed to fetch device code".to_string())))
}

/// Runs the whole device flow and returns the token response.
pub async fn fetch_token_via_device_code(
    app: &Application,
    config: &DeviceCodeConfig,
    force_new: bool,
) -> Result<TokenResponse> {
    fetch_token_via_device_code_with_sleep(app, config, force_new, tokio::time::sleep).await
}

#[tracing::instrument(skip(app, config, sleep), fields(issuer = %config.issuer))]
pub async fn fetch_token_via_device_code_with_sleep<S, SF>(
    app: &Application,
    config: &DeviceCodeConfig,
    force_new: bool,
    sleep: S,
) -> Result<TokenResponse>
where
    S: FnMut(Duration) -> SF,
    SF: Future<Output = ()>,
{
    if config.issuer.is_empty() || config.client_id.is_empty() {
        return Err(BrokerError::config(
            "device_code requires issuer and client_id",
        ));
    }
    let openid = fetch_openid_configuration(app, &config.issuer, force_new).await?;
    if openid.device_authorization_endpoint.is_empty() {
        return Err(BrokerError::config(format!(
            "device_authorization_endpoint is empty, issuer: {}",
            config.issuer
        )));
    }
    let device = request_device_code(
        app,
        &openid.device_authorization_endpoint,
        &config.client_id,
        &config.scope,
    )
    .await
    .with_context(|| format!("device authorization: {}", openid.device_authorization_endpoint))?;

    prompt_user(config, &device);

    let request = TokenRequest {
        client_id: &config.client_id,
        client_secret: config.client_secret.expose(),
        grant_type: Some(GrantType::DeviceCode),
        device_code: &device.device_code,
        ..Default::default()
    };
    poll_for_token(
        device.interval,
        || fetch_token(&app.http, &openid.token_endpoint, &request),
        sleep,
    )
    .await
}

fn prompt_user(config: &DeviceCodeConfig, device: &DeviceCodeResponse) {
    if config.show_qr_code {
        tracing::warn!("[oidc] QR code rendering is not available, use the URL below");
    }
    if config.auto_open_url {
        if let Err(e) = open_url(&device.verification_uri_complete) {
            eprintln!("failed to open URL: {e}");
        }
    }
    eprintln!(
        "Open URL: {} , input user code: {}",
        device.verification_uri, device.user_code
    );
    if !device.verification_uri_complete.is_empty() {
        eprintln!("or, direct open URL: {}", device.verification_uri_complete);
    }
}

fn open_url(url: &str) -> std::io::Result<()> {
    let (program, args): (&str, Vec<&str>) = match std::env::consts::OS {
        "windows" => ("cmd", vec!["/c", "start", url]),
        "macos" => ("open", vec![url]),
        "linux" => ("xdg-open", vec![url]),
        other => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                format!("unsupported platform: {other}"),
            ));
        }
    };
    std::process::Command::new(program).args(args).spawn()?;
    Ok(())
}
