use std::{num::NonZeroU32, sync::Arc, time::Duration};

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::Client;
use secrecy::ExposeSecret;
use snafu::{OptionExt, ResultExt};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::{
    auth::{ClientCredentials, TokenSource},
    config::StreamConfig,
    providers::{
        ClientBuildSnafu, ClientInitError, FetchError, MissingSecretSnafu, MissingSettingSnafu,
        SeriesSource, ServiceStatus,
        retry::{self, AttemptError, RetryPolicy},
        stream_rest::{
            params::SeriesRequest,
            response::{BodyFault, SeriesBatch, decode_series, parse_ping},
        },
    },
};

/// Authenticated, retrying client for the series and liveness endpoints.
pub struct StreamProvider {
    client: Client,
    api_endpoint: String,
    ping_endpoint: String,
    tokens: Arc<dyn TokenSource>,
    retry: RetryPolicy,
    limiter: Option<DefaultDirectRateLimiter>,
}

fn fault(f: BodyFault, body: String) -> AttemptError {
    match f {
        BodyFault::Decode(reason) => AttemptError::Decode { reason, body },
        BodyFault::Message(message) => AttemptError::Message { message, body },
    }
}

impl StreamProvider {
    /// Creates a client that authenticates with the client-credentials grant
    /// configured in `cfg`.
    pub fn from_config(cfg: &StreamConfig) -> Result<Self, ClientInitError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context(ClientBuildSnafu)?;

        let tenant = cfg.tenant.as_deref().context(MissingSettingSnafu { name: "tenant" })?;
        let client_id = cfg
            .client_id
            .as_deref()
            .context(MissingSettingSnafu { name: "client_id" })?;
        let resource = cfg
            .resource
            .as_deref()
            .context(MissingSettingSnafu { name: "resource" })?;
        let secret = cfg.client_secret().context(MissingSecretSnafu)?;

        let tokens = ClientCredentials::new(
            client.clone(),
            &cfg.authority_host,
            tenant,
            client_id,
            secret,
            resource,
        );
        Ok(Self::with_client(client, cfg, Arc::new(tokens)))
    }

    /// Creates a client around an existing token source.
    pub fn with_token_source(
        cfg: &StreamConfig,
        tokens: Arc<dyn TokenSource>,
    ) -> Result<Self, ClientInitError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context(ClientBuildSnafu)?;
        Ok(Self::with_client(client, cfg, tokens))
    }

    fn with_client(client: Client, cfg: &StreamConfig, tokens: Arc<dyn TokenSource>) -> Self {
        let limiter = cfg
            .requests_per_second
            .and_then(NonZeroU32::new)
            .map(|rps| RateLimiter::direct(Quota::per_second(rps)));
        Self {
            client,
            api_endpoint: cfg.api_endpoint.clone(),
            ping_endpoint: cfg.ping_endpoint.clone(),
            tokens,
            retry: RetryPolicy::from(&cfg.retry),
            limiter,
        }
    }

    /// Replaces the retry policy taken from the config.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    async fn attempt_fetch(&self, request: &SeriesRequest) -> Result<SeriesBatch, AttemptError> {
        let token = self.tokens.token().await.map_err(AttemptError::Token)?;
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let resp = self
            .client
            .post(&self.api_endpoint)
            .bearer_auth(token.expose_secret())
            .json(&request.entries)
            .send()
            .await
            .map_err(AttemptError::Transport)?;
        let status = resp.status();
        let body = resp.text().await.map_err(AttemptError::Transport)?;
        if !status.is_success() {
            return Err(AttemptError::Status {
                status: status.as_u16(),
                body,
            });
        }

        match decode_series(&body, request.products()) {
            Ok(batch) => Ok(batch),
            Err(f) => Err(fault(f, body)),
        }
    }

    async fn attempt_ping(&self) -> Result<ServiceStatus, AttemptError> {
        let token = self.tokens.token().await.map_err(AttemptError::Token)?;
        let started = Instant::now();
        let resp = self
            .client
            .get(&self.ping_endpoint)
            .bearer_auth(token.expose_secret())
            .send()
            .await
            .map_err(AttemptError::Transport)?;
        let status = resp.status();
        let body = resp.text().await.map_err(AttemptError::Transport)?;
        let latency = started.elapsed();
        if !status.is_success() {
            return Err(AttemptError::Status {
                status: status.as_u16(),
                body,
            });
        }
        match parse_ping(&body) {
            Ok(service_time) => Ok(ServiceStatus {
                service_time,
                latency,
            }),
            Err(f) => Err(fault(f, body)),
        }
    }
}

#[async_trait]
impl SeriesSource for StreamProvider {
    async fn ping(&self) -> Result<ServiceStatus, FetchError> {
        let status = retry::run(&self.retry, "ping", |_| self.attempt_ping())
            .await
            .map_err(FetchError::unreachable)?;
        info!(
            service_time = %status.service_time,
            latency_ms = status.latency.as_millis() as u64,
            "market-data service is up"
        );
        Ok(status)
    }

    async fn fetch(&self, request: &SeriesRequest) -> Result<SeriesBatch, FetchError> {
        debug!(
            market = %request.market,
            location = %request.location,
            window = %request.window,
            products = ?request.entries.keys().collect::<Vec<_>>(),
            "requesting series"
        );
        let batch = retry::run(&self.retry, "fetch", |_| self.attempt_fetch(request))
            .await
            .map_err(FetchError::from_exhausted)?;
        debug!(
            rows = batch.values().map(Vec::len).sum::<usize>(),
            "series received"
        );
        Ok(batch)
    }
}
