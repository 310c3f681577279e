//! Market-data source abstraction.
//!
//! [`SeriesSource`] is the seam between the sync engine and the remote
//! service: the engine only ever talks to a `dyn SeriesSource`, so tests and
//! alternative back-ends can stand in for [`stream_rest::provider::StreamProvider`].
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use stream_ingestor::providers::{
//!     FetchError, SeriesSource, ServiceStatus,
//!     stream_rest::{params::SeriesRequest, response::SeriesBatch},
//! };
//!
//! struct Empty;
//!
//! #[async_trait]
//! impl SeriesSource for Empty {
//!     async fn ping(&self) -> Result<ServiceStatus, FetchError> {
//!         Ok(ServiceStatus {
//!             service_time: chrono::Utc::now().fixed_offset(),
//!             latency: std::time::Duration::ZERO,
//!         })
//!     }
//!
//!     async fn fetch(&self, request: &SeriesRequest) -> Result<SeriesBatch, FetchError> {
//!         Ok(request.products().map(|p| (p.to_string(), vec![])).collect())
//!     }
//! }
//! ```

pub mod retry;
pub mod stream_rest;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use shared_utils::env::MissingEnvVarError;
use snafu::{Backtrace, IntoError, Snafu};

use crate::auth::AuthError;

use self::{
    retry::{AttemptError, Exhausted},
    stream_rest::{params::SeriesRequest, response::SeriesBatch},
};

/// Number of characters of the last response body carried by [`FetchError::Upstream`].
pub const SNIPPET_CHARS: usize = 100;

/// Result of a successful liveness probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServiceStatus {
    pub service_time: DateTime<FixedOffset>,
    pub latency: Duration,
}

/// Source of market price series.
#[async_trait]
pub trait SeriesSource: Send + Sync {
    /// Checks the service is up; called once before any fetch.
    async fn ping(&self) -> Result<ServiceStatus, FetchError>;

    /// Fetches every product of `request`. Either all products come back or
    /// the call fails.
    async fn fetch(&self, request: &SeriesRequest) -> Result<SeriesBatch, FetchError>;
}

/// Errors that can occur during the creation of a client.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ClientInitError {
    /// missing client secret
    #[snafu(display("Missing client secret: {source}"))]
    MissingSecret {
        source: MissingEnvVarError,
        backtrace: Backtrace,
    },

    /// a required config setting is absent
    #[snafu(display("Missing configuration setting: {name}"))]
    MissingSetting { name: String, backtrace: Backtrace },

    /// failed to init reqwest client
    #[snafu(display("Failed to build HTTP client: {source}"))]
    ClientBuild {
        source: reqwest::Error,
        backtrace: Backtrace,
    },
}

/// Errors returned once a call has used up its retries.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum FetchError {
    /// No attempt got past token acquisition.
    #[snafu(display("Authentication failed after {attempts} attempts: {source}"))]
    Auth {
        attempts: u32,
        #[snafu(backtrace)]
        source: AuthError,
    },

    /// The service kept failing or kept answering with an error message.
    #[snafu(display("{}", upstream_message(snippet.as_deref(), reason)))]
    Upstream {
        attempts: u32,
        reason: String,
        /// First characters of the last body received, if any.
        snippet: Option<String>,
        backtrace: Backtrace,
    },

    /// The last attempt received a body that could not be decoded.
    #[snafu(display("Undecodable response after {attempts} attempts: {reason}"))]
    Decode {
        attempts: u32,
        reason: String,
        snippet: String,
        backtrace: Backtrace,
    },

    /// The liveness probe never succeeded.
    #[snafu(display("Service unreachable after {attempts} attempts: {reason}"))]
    Unreachable {
        attempts: u32,
        reason: String,
        backtrace: Backtrace,
    },
}

fn upstream_message(snippet: Option<&str>, reason: &str) -> String {
    match snippet {
        Some(s) => format!(
            "Max attempts reached, API call unsuccessful. First {SNIPPET_CHARS} characters of API output: {s}"
        ),
        None => format!("Max attempts reached, API call unsuccessful ({reason})"),
    }
}

fn snippet_of(body: &str) -> String {
    body.chars().take(SNIPPET_CHARS).collect()
}

impl FetchError {
    /// Maps an exhausted data call to its final error.
    pub fn from_exhausted(x: Exhausted) -> Self {
        let attempts = x.attempts;
        let reason = x
            .last
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "no attempt was made".to_string());
        match x.last {
            Some(AttemptError::Token(source)) if !x.reached_service => {
                AuthSnafu { attempts }.into_error(source)
            }
            Some(AttemptError::Decode { body, .. }) => DecodeSnafu {
                attempts,
                reason,
                snippet: snippet_of(&body),
            }
            .build(),
            _ => UpstreamSnafu {
                attempts,
                reason,
                snippet: x.last_body.as_deref().map(snippet_of),
            }
            .build(),
        }
    }

    /// Maps an exhausted liveness probe to its final error.
    pub fn unreachable(x: Exhausted) -> Self {
        match x.last {
            Some(AttemptError::Token(source)) if !x.reached_service => AuthSnafu {
                attempts: x.attempts,
            }
            .into_error(source),
            last => UnreachableSnafu {
                attempts: x.attempts,
                reason: last
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "no attempt was made".to_string()),
            }
            .build(),
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Auth { attempts, .. }
            | Self::Upstream { attempts, .. }
            | Self::Decode { attempts, .. }
            | Self::Unreachable { attempts, .. } => *attempts,
        }
    }
}
