//! Retry loop shared by every call the client makes.
//!
//! Attempt `k` (1-based) waits `base * 2^(k-2)` plus uniform jitter in
//! `[-jitter/2, +jitter/2)` before running; the first attempt runs at once.

use std::{fmt, future::Future, time::Duration};

use rand::Rng;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::auth::AuthError;

/// Attempt budget and back-off schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Total width of the jitter window, centred on the nominal delay.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(5),
            jitter: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    /// Nominal delay before `attempt`, without jitter.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt < 2 {
            return Duration::ZERO;
        }
        let exp = (attempt - 2).min(16);
        self.base_delay.saturating_mul(1 << exp)
    }

    /// Delay before `attempt` with jitter applied; never negative.
    pub fn jittered_delay_before(&self, attempt: u32) -> Duration {
        let nominal = self.delay_before(attempt);
        if attempt < 2 || self.jitter.is_zero() {
            return nominal;
        }
        let half = self.jitter.as_secs_f64() / 2.0;
        let offset = rand::rng().random_range(-half..half);
        Duration::from_secs_f64((nominal.as_secs_f64() + offset).max(0.0))
    }
}

/// `[retry]` table of the client configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryCfg {
    pub max_attempts: u32,
    pub base_delay_secs: f64,
    pub jitter_secs: f64,
}

impl Default for RetryCfg {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_secs: 5.0,
            jitter_secs: 1.0,
        }
    }
}

impl From<&RetryCfg> for RetryPolicy {
    fn from(cfg: &RetryCfg) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base_delay: Duration::from_secs_f64(cfg.base_delay_secs.max(0.0)),
            jitter: Duration::from_secs_f64(cfg.jitter_secs.max(0.0)),
        }
    }
}

/// Why a single attempt failed.
#[derive(Debug)]
pub enum AttemptError {
    /// No token could be obtained; the request was never sent.
    Token(AuthError),
    Transport(reqwest::Error),
    Status { status: u16, body: String },
    Decode { reason: String, body: String },
    /// The service answered with a `message` instead of data.
    Message { message: String, body: String },
}

impl AttemptError {
    /// Raw response body, when one was received.
    pub fn body(&self) -> Option<&str> {
        match self {
            Self::Status { body, .. } | Self::Decode { body, .. } | Self::Message { body, .. } => {
                Some(body)
            }
            Self::Token(_) | Self::Transport(_) => None,
        }
    }
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token(e) => write!(f, "{e}"),
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::Status { status, .. } => write!(f, "HTTP status {status}"),
            Self::Decode { reason, .. } => write!(f, "undecodable response: {reason}"),
            Self::Message { message, .. } => write!(f, "service message: {message}"),
        }
    }
}

/// Every attempt failed.
#[derive(Debug)]
pub struct Exhausted {
    pub attempts: u32,
    pub last: Option<AttemptError>,
    /// Body of the most recent attempt that received one.
    pub last_body: Option<String>,
    /// True when at least one attempt got past token acquisition.
    pub reached_service: bool,
}

/// Runs `op` until it succeeds or the policy's attempts are used up.
///
/// `op` receives the 1-based attempt number.
pub async fn run<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, Exhausted>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AttemptError>>,
{
    let max = policy.max_attempts.max(1);
    let mut out = Exhausted {
        attempts: max,
        last: None,
        last_body: None,
        reached_service: false,
    };

    for attempt in 1..=max {
        if attempt > 1 {
            let delay = policy.jittered_delay_before(attempt);
            debug!(label, attempt, delay_ms = delay.as_millis() as u64, "retrying");
            tokio::time::sleep(delay).await;
        }
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) => {
                warn!(label, attempt, max_attempts = max, error = %e, "attempt failed");
                if !matches!(e, AttemptError::Token(_)) {
                    out.reached_service = true;
                }
                if let Some(body) = e.body() {
                    out.last_body = Some(body.to_string());
                }
                out.last = Some(e);
            }
        }
    }
    Err(out)
}
