// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Client credentials grant with exactly one client authentication method.

use data_encoding::BASE64;
use idaas_signer::{ExSignerConfig, Jti, JwtSignerOptions, SecretValue, build_jwt_signer};
use serde_json::Map;

use crate::application::Application;
use crate::constants::CLIENT_ASSERTION_VALIDITY;
use crate::errors::{BrokerError, Result};
use crate::imds::{fetch_assertion_oidc_token, fetch_pkcs7};
use crate::oidc::{ClientAssertionType, GrantType, TokenRequest, TokenResponse, fetch_token};
use crate::profile::{ClientCredentialsConfig, OidcTokenConfig, Pkcs7Config, PrivateCaConfig};

#[derive(Debug)]
pub enum AssertionMethod<'a> {
    ClientSecret(&'a SecretValue),
    /// RFC 7523 JWT signed by an external signer.
    JwtBearer(&'a ExSignerConfig),
    /// Cloud instance identity document.
    Pkcs7Bearer(&'a Pkcs7Config),
    /// JWT signed with a private CA issued certificate key.
    X509JwtBearer(&'a PrivateCaConfig),
    IdTokenBearer(&'a OidcTokenConfig),
}

/// Picks the single configured authentication method.
pub fn select_assertion_method(config: &ClientCredentialsConfig) -> Result<AssertionMethod<'_>> {
    let mut methods = Vec::new();
    if !config.client_secret.is_empty() {
        methods.push(("client_secret", AssertionMethod::ClientSecret(&config.client_secret)));
    }
    if let Some(signer) = &config.client_assertion_signer {
        methods.push(("client_assertion_signer", AssertionMethod::JwtBearer(signer)));
    }
    if let Some(pkcs7) = &config.client_assertion_pkcs7 {
        methods.push(("client_assertion_pkcs7", AssertionMethod::Pkcs7Bearer(pkcs7)));
    }
    if let Some(private_ca) = &config.client_assertion_private_ca {
        methods.push((
            "client_assertion_private_ca",
            AssertionMethod::X509JwtBearer(private_ca),
        ));
    }
    if let Some(oidc_token) = &config.client_assertion_oidc_token {
        methods.push((
            "client_assertion_oidc_token",
            AssertionMethod::IdTokenBearer(oidc_token),
        ));
    }

    match methods.len() {
        0 => Err(BrokerError::config(
            "one of client_secret, client_assertion_signer, client_assertion_pkcs7, \
             client_assertion_private_ca or client_assertion_oidc_token must be set",
        )),
        1 => Ok(methods.remove(0).1),
        _ => Err(BrokerError::config(format!(
            "only one client authentication method may be set, found: {}",
            methods
                .iter()
                .map(|(name, _)| *name)
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}

/// Fetches a token with the client credentials grant.
#[tracing::instrument(skip(app, config), fields(client_id = %config.client_id))]
pub async fn fetch_token_client_credentials(
    app: &Application,
    config: &ClientCredentialsConfig,
) -> Result<TokenResponse> {
    if config.token_endpoint.is_empty() {
        return Err(BrokerError::config("client_credentials.token_endpoint is empty"));
    }
    if config.client_id.is_empty() {
        return Err(BrokerError::config("client_credentials.client_id is empty"));
    }
    let method = select_assertion_method(config)?;
    tracing::debug!("[oidc] client authentication: {:?}", method);

    let base = TokenRequest {
        client_id: &config.client_id,
        grant_type: Some(GrantType::ClientCredentials),
        scope: &config.scope,
        ..Default::default()
    };

    let result = match method {
        AssertionMethod::ClientSecret(secret) => {
            let request = TokenRequest {
                client_secret: secret.expose(),
                ..base
            };
            fetch_token(&app.http, &config.token_endpoint, &request).await?
        }
        AssertionMethod::JwtBearer(signer) => {
            let assertion = sign_client_assertion(signer, config)?;
            let request = TokenRequest {
                client_assertion_type: Some(ClientAssertionType::JwtBearer),
                client_assertion: &assertion,
                ..base
            };
            fetch_token(&app.http, &config.token_endpoint, &request).await?
        }
        AssertionMethod::Pkcs7Bearer(pkcs7) => {
            let assertion = BASE64.encode(&fetch_pkcs7(app, pkcs7).await?);
            let request = TokenRequest {
                client_assertion_type: Some(ClientAssertionType::Pkcs7Bearer),
                client_assertion: &assertion,
                application_federated_credential_name: &config
                    .application_federated_credential_name,
                ..base
            };
            fetch_token(&app.http, &config.token_endpoint, &request).await?
        }
        AssertionMethod::X509JwtBearer(private_ca) => {
            let certificate =
                read_certificate(&private_ca.certificate, &private_ca.certificate_file)?
                    .ok_or_else(|| BrokerError::config("no certificate provided"))?;
            let chain = read_certificate(
                &private_ca.certificate_chain,
                &private_ca.certificate_chain_file,
            )?
            .unwrap_or_default();
            let signer = private_ca.certificate_key_signer.as_ref().ok_or_else(|| {
                BrokerError::config("client_assertion_private_ca.certificate_key_signer is required")
            })?;
            let assertion = sign_client_assertion(signer, config)?;
            let request = TokenRequest {
                client_assertion_type: Some(ClientAssertionType::X509JwtBearer),
                client_assertion: &assertion,
                client_x509: &certificate,
                client_x509_chain: &chain,
                application_federated_credential_name: &config
                    .application_federated_credential_name,
                ..base
            };
            fetch_token(&app.http, &config.token_endpoint, &request).await?
        }
        AssertionMethod::IdTokenBearer(oidc_token) => {
            let assertion = fetch_assertion_oidc_token(app, oidc_token).await?;
            let request = TokenRequest {
                client_assertion_type: Some(ClientAssertionType::IdTokenBearer),
                client_assertion: &assertion,
                application_federated_credential_name: &config
                    .application_federated_credential_name,
                ..base
            };
            fetch_token(&app.http, &config.token_endpoint, &request).await?
        }
    };
    result.map_err(BrokerError::from)
}

fn sign_client_assertion(
    signer_config: &ExSignerConfig,
    config: &ClientCredentialsConfig,
) -> Result<String> {
    let signer = build_jwt_signer(signer_config)?;
    let options = JwtSignerOptions {
        issuer: config.client_id.clone(),
        audience: config.token_endpoint.clone(),
        subject: config.client_id.clone(),
        jti: Jti::Auto,
        validity: CLIENT_ASSERTION_VALIDITY,
        ..Default::default()
    };
    eprintln!("Ready to sign the JWT token. If required, interact with your security token to proceed.");
    Ok(signer.sign_jwt_with_options(Map::new(), &options)?)
}

/// Inline value first, then the file content. `None` when neither is set.
fn read_certificate(certificate: &str, certificate_file: &str) -> Result<Option<String>> {
    if !certificate.is_empty() {
        return Ok(Some(certificate.to_string()));
    }
    if !certificate_file.is_empty() {
        let content = std::fs::read_to_string(certificate_file).map_err(|e| {
            BrokerError::config(format!("read certificate file {certificate_file} failed: {e}"))
        })?;
        return Ok(Some(content));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::MetadataEndpoints;
    use crate::cache::CacheService;
    use crate::http::build_http_client;
    use crate::oidc::claims::SimpleJwtClaims;
    use idaas_signer::config::KeyFileConfig;
    use mockito::Matcher;

    const EC_KEY: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../signer/testdata/ec_p256_sec1.pem");

    fn app(dir: &std::path::Path) -> Application {
        Application::new(
            CacheService::open(dir.join("cache"), dir).unwrap(),
            build_http_client().unwrap(),
            MetadataEndpoints::all("http://127.0.0.1:9"),
        )
    }

    fn key_file_signer() -> ExSignerConfig {
        ExSignerConfig {
            key_id: "k1".into(),
            algorithm: "ES256".into(),
            key_file: Some(KeyFileConfig {
                file: EC_KEY.into(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    // ==================== Selection Tests ====================

    #[test]
    fn test_exactly_one_method() {
        let mut config = ClientCredentialsConfig {
            client_id: "app".into(),
            token_endpoint: "https://idp/token".into(),
            ..Default::default()
        };
        let err = select_assertion_method(&config).unwrap_err();
        assert!(matches!(err, BrokerError::Config(_)));

        config.client_secret = SecretValue::new("s");
        assert!(matches!(
            select_assertion_method(&config).unwrap(),
            AssertionMethod::ClientSecret(_)
        ));

        config.client_assertion_pkcs7 = Some(Pkcs7Config::default());
        let err = select_assertion_method(&config).unwrap_err();
        assert_eq!(
            err.to_string(),
            "configuration error: only one client authentication method may be set, \
             found: client_secret, client_assertion_pkcs7"
        );
    }

    #[test]
    fn test_read_certificate_order() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "from-file").unwrap();
        let path = file.path().to_str().unwrap();
        assert_eq!(read_certificate("inline", path).unwrap().unwrap(), "inline");
        assert_eq!(read_certificate("", path).unwrap().unwrap(), "from-file");
        assert!(read_certificate("", "").unwrap().is_none());
        assert!(read_certificate("", "/nonexistent/cert.pem").is_err());
    }

    // ==================== Token Endpoint Tests ====================

    #[tokio::test]
    async fn test_client_secret() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("client_id".into(), "app".into()),
                Matcher::UrlEncoded("client_secret".into(), "s3cret".into()),
                Matcher::UrlEncoded("grant_type".into(), "client_credentials".into()),
                Matcher::UrlEncoded("scope".into(), "sts".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token":"at-1","expires_in":600}"#)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = ClientCredentialsConfig {
            token_endpoint: format!("{}/token", server.url()),
            client_id: "app".into(),
            scope: "sts".into(),
            client_secret: SecretValue::new("s3cret"),
            ..Default::default()
        };
        let token = fetch_token_client_credentials(&app(dir.path()), &config)
            .await
            .unwrap();
        assert_eq!(token.access_token, "at-1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_jwt_bearer_assertion_claims() {
        let mut server = mockito::Server::new_async().await;
        let endpoint = format!("{}/token", server.url());
        let mock = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded(
                    "client_assertion_type".into(),
                    "urn:ietf:params:oauth:client-assertion-type:jwt-bearer".into(),
                ),
                Matcher::Regex("client_assertion=eyJ".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token":"at-2"}"#)
            .create_async()
            .await;

        let config = ClientCredentialsConfig {
            token_endpoint: endpoint.clone(),
            client_id: "app".into(),
            client_assertion_signer: Some(key_file_signer()),
            ..Default::default()
        };
        let assertion = sign_client_assertion(&key_file_signer(), &config).unwrap();
        let claims = SimpleJwtClaims::parse(&assertion).unwrap();
        assert_eq!(claims.issuer, "app");
        assert_eq!(claims.subject, "app");
        assert_eq!(claims.audience, serde_json::json!(endpoint));
        assert_eq!(claims.expires_at - claims.issued_at, 300);

        let dir = tempfile::tempdir().unwrap();
        let token = fetch_token_client_credentials(&app(dir.path()), &config)
            .await
            .unwrap();
        assert_eq!(token.access_token, "at-2");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_x509_jwt_bearer() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded(
                    "client_assertion_type".into(),
                    "urn:cloud:idaas:params:oauth:client-assertion-type:x509-jwt-bearer".into(),
                ),
                Matcher::UrlEncoded("client_x509".into(), "CERT".into()),
                Matcher::UrlEncoded("client_x509_chain".into(), "CHAIN".into()),
                Matcher::UrlEncoded(
                    "application_federated_credential_name".into(),
                    "fed-1".into(),
                ),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token":"at-3"}"#)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let chain = dir.path().join("chain.pem");
        std::fs::write(&chain, "CHAIN").unwrap();
        let config = ClientCredentialsConfig {
            token_endpoint: format!("{}/token", server.url()),
            client_id: "app".into(),
            application_federated_credential_name: "fed-1".into(),
            client_assertion_private_ca: Some(PrivateCaConfig {
                certificate: "CERT".into(),
                certificate_chain_file: chain.to_string_lossy().into_owned(),
                certificate_key_signer: Some(key_file_signer()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let token = fetch_token_client_credentials(&app(dir.path()), &config)
            .await
            .unwrap();
        assert_eq!(token.access_token, "at-3");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_x509_jwt_bearer_without_chain() {
        let mut server = mockito::Server::new_async().await;
        // no client_x509_chain field between the certificate and the credential name
        let mock = server
            .mock("POST", "/token")
            .match_body(Matcher::Regex(
                "client_x509=CERT&application_federated_credential_name=fed-1$".into(),
            ))
            .with_status(200)
            .with_body(r#"{"access_token":"at-4"}"#)
            .expect(1)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = ClientCredentialsConfig {
            token_endpoint: format!("{}/token", server.url()),
            client_id: "app".into(),
            application_federated_credential_name: "fed-1".into(),
            client_assertion_private_ca: Some(PrivateCaConfig {
                certificate: "CERT".into(),
                certificate_key_signer: Some(key_file_signer()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let token = fetch_token_client_credentials(&app(dir.path()), &config)
            .await
            .unwrap();
        assert_eq!(token.access_token, "at-4");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_id_token_bearer() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded(
                    "client_assertion_type".into(),
                    "urn:cloud:idaas:params:oauth:client-assertion-type:id-token-bearer".into(),
                ),
                Matcher::UrlEncoded("client_assertion".into(), "upstream.jwt.token".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token":"at-4"}"#)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = ClientCredentialsConfig {
            token_endpoint: format!("{}/token", server.url()),
            client_id: "app".into(),
            client_assertion_oidc_token: Some(OidcTokenConfig {
                provider: "custom".into(),
                oidc_token: SecretValue::new("upstream.jwt.token"),
                ..Default::default()
            }),
            ..Default::default()
        };
        let token = fetch_token_client_credentials(&app(dir.path()), &config)
            .await
            .unwrap();
        assert_eq!(token.access_token, "at-4");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_oauth_error_is_surfaced() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(401)
            .with_body(r#"{"error":"invalid_client","error_description":"bad secret"}"#)
            .create_async()
            .await;
        let dir = tempfile::tempdir().unwrap();
        let config = ClientCredentialsConfig {
            token_endpoint: format!("{}/token", server.url()),
            client_id: "app".into(),
            client_secret: SecretValue::new("wrong"),
            ..Default::default()
        };
        let err = fetch_token_client_credentials(&app(dir.path()), &config)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::OAuth { ref error, .. } if error == "invalid_client"));
    }
}
