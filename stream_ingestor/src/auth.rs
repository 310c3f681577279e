//! Bearer-token acquisition for the market-data service.
//!
//! The client asks its [`TokenSource`] for a fresh token before every attempt;
//! nothing is cached across attempts, so an expired token is never retried.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use snafu::{Backtrace, OptionExt, ResultExt, Snafu};
use tracing::debug;

/// Errors raised while obtaining an access token.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum AuthError {
    /// The identity endpoint could not be reached.
    #[snafu(display("Token request failed: {source}"))]
    TokenTransport {
        source: reqwest::Error,
        backtrace: Backtrace,
    },

    /// The identity endpoint answered with a non-success status.
    #[snafu(display("Identity endpoint returned {status}: {body}"))]
    TokenRejected {
        status: u16,
        body: String,
        backtrace: Backtrace,
    },

    /// The identity endpoint answered without an `access_token`.
    #[snafu(display("Token response did not contain an access_token"))]
    MissingAccessToken { backtrace: Backtrace },
}

/// Supplies bearer tokens.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> Result<SecretString, AuthError>;
}

/// A fixed token, e.g. one issued out of band.
pub struct StaticToken(SecretString);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::new(token.into().into()))
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn token(&self) -> Result<SecretString, AuthError> {
        Ok(SecretString::new(self.0.expose_secret().into()))
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

/// OAuth2 client-credentials grant against `{authority}/{tenant}/oauth2/token`.
pub struct ClientCredentials {
    client: Client,
    token_url: String,
    client_id: String,
    secret: SecretString,
    resource: String,
}

impl ClientCredentials {
    pub fn new(
        client: Client,
        authority_host: &str,
        tenant: &str,
        client_id: impl Into<String>,
        secret: SecretString,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            client,
            token_url: format!(
                "{}/{}/oauth2/token",
                authority_host.trim_end_matches('/'),
                tenant
            ),
            client_id: client_id.into(),
            secret,
            resource: resource.into(),
        }
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }
}

#[async_trait]
impl TokenSource for ClientCredentials {
    async fn token(&self) -> Result<SecretString, AuthError> {
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.secret.expose_secret()),
            ("resource", self.resource.as_str()),
        ];
        let resp = self
            .client
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .context(TokenTransportSnafu)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return TokenRejectedSnafu {
                status: status.as_u16(),
                body,
            }
            .fail();
        }

        let parsed: TokenResponse = resp.json().await.context(TokenTransportSnafu)?;
        let token = parsed
            .access_token
            .filter(|t| !t.is_empty())
            .context(MissingAccessTokenSnafu)?;
        debug!(url = %self.token_url, "access token acquired");
        Ok(SecretString::new(token.into()))
    }
}
