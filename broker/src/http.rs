// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use reqwest::{Client, RequestBuilder, StatusCode};

use crate::constants::{ENV_UNSAFE_DEBUG, ENV_USER_AGENT, HTTP_TIMEOUT, USER_AGENT_PRODUCT};
use crate::errors::{BrokerError, Result};

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: String,
}

impl HttpResponse {
    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::OK
    }
}

pub fn user_agent() -> String {
    match std::env::var(ENV_USER_AGENT) {
        Ok(prefix) if !prefix.is_empty() => format!("{prefix} {USER_AGENT_PRODUCT}"),
        _ => format!(
            "{}/{} {USER_AGENT_PRODUCT}",
            std::env::consts::OS,
            std::env::consts::ARCH
        ),
    }
}

/// Token material may be logged only when the operator opted in.
pub fn unsafe_debug_enabled() -> bool {
    std::env::var(ENV_UNSAFE_DEBUG).is_ok_and(|v| v.eq_ignore_ascii_case("true"))
}

pub fn build_http_client() -> Result<Client> {
    Ok(Client::builder()
        .timeout(HTTP_TIMEOUT)
        .user_agent(user_agent())
        .build()?)
}

/// Sends the request and reads the whole body whatever the status.
pub async fn send(request: RequestBuilder) -> Result<HttpResponse> {
    let response = request.send().await?;
    let status = response.status();
    let body = response.text().await?;
    if unsafe_debug_enabled() {
        tracing::debug!("[unsafe] status: {}, response: {}", status, body);
    }
    Ok(HttpResponse { status, body })
}

/// Like [`send`] but any status other than 200 is an error.
pub async fn fetch_ok(request: RequestBuilder) -> Result<String> {
    let response = send(request).await?;
    if !response.is_ok() {
        return Err(BrokerError::Transport(format!(
            "status code {} not 200: {}",
            response.status.as_u16(),
            response.body
        )));
    }
    Ok(response.body)
}

/// Form-encoded POST. Parameters with empty values are not sent.
pub async fn post_form(client: &Client, url: &str, params: &[(&str, &str)]) -> Result<HttpResponse> {
    let form: Vec<(&str, &str)> = params
        .iter()
        .filter(|(_, value)| !value.is_empty())
        .copied()
        .collect();
    tracing::debug!(
        "[http] POST {} with fields: {:?}",
        url,
        form.iter().map(|(k, _)| *k).collect::<Vec<_>>()
    );
    send(client.post(url).form(&form)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_suffix() {
        assert!(user_agent().ends_with(" AlibabaCloudIDaaS/2.0"));
    }

    #[tokio::test]
    async fn test_post_form_skips_empty_fields() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_header("content-type", "application/x-www-form-urlencoded")
            .match_body("client_id=app&grant_type=client_credentials")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let client = build_http_client().unwrap();
        let response = post_form(
            &client,
            &format!("{}/token", server.url()),
            &[
                ("client_id", "app"),
                ("client_secret", ""),
                ("grant_type", "client_credentials"),
            ],
        )
        .await
        .unwrap();
        assert!(response.is_ok());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_ok_rejects_non_200() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/doc")
            .with_status(404)
            .with_body("missing")
            .create_async()
            .await;
        let client = build_http_client().unwrap();
        let err = fetch_ok(client.get(format!("{}/doc", server.url())))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "transport error: status code 404 not 200: missing");
    }
}
