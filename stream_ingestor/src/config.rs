//! Client configuration.
//!
//! Parsed once from TOML and passed by reference. The client secret is never
//! kept in a plain `String`: it is read from `STREAM_CLIENT_SECRET` or the
//! `secret` key and held as a [`SecretString`].

use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};
use shared_utils::env::{MissingEnvVarError, get_env_var_opt};
use thiserror::Error;

use crate::providers::{retry::RetryCfg, stream_rest::params::DEFAULT_DATA_TYPE};

/// Environment variable holding the client secret.
pub const SECRET_ENV_VAR: &str = "STREAM_CLIENT_SECRET";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

fn secret_opt<'de, D: Deserializer<'de>>(d: D) -> Result<Option<SecretString>, D::Error> {
    let raw = Option::<String>::deserialize(d)?;
    Ok(raw
        .filter(|s| !s.trim().is_empty())
        .map(|s| SecretString::new(s.into())))
}

fn default_authority() -> String {
    "https://login.microsoftonline.com".to_string()
}

fn default_data_type() -> String {
    DEFAULT_DATA_TYPE.to_string()
}

fn one() -> usize {
    1
}

fn default_timeout() -> u64 {
    120
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamConfig {
    /// Series endpoint (POST).
    pub api_endpoint: String,
    /// Liveness endpoint (GET).
    pub ping_endpoint: String,

    #[serde(default = "default_authority")]
    pub authority_host: String,
    pub tenant: Option<String>,
    pub client_id: Option<String>,
    /// Resource the token is requested for.
    pub resource: Option<String>,
    #[serde(default, deserialize_with = "secret_opt")]
    secret: Option<SecretString>,

    #[serde(default = "default_data_type")]
    pub data_type: String,
    /// Fetch units in flight at once.
    #[serde(default = "one")]
    pub concurrency: usize,
    /// Natives per POST.
    #[serde(default = "one")]
    pub products_per_request: usize,
    /// Client-side pacing; unset or 0 disables it.
    pub requests_per_second: Option<u32>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub retry: RetryCfg,

    /// Replaces the built-in product catalog.
    pub catalog_path: Option<PathBuf>,
}

impl StreamConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: Self = toml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }
        if self.products_per_request == 0 {
            return Err(ConfigError::Invalid(
                "products_per_request must be at least 1".into(),
            ));
        }
        if self.retry.base_delay_secs < 0.0 || self.retry.jitter_secs < 0.0 {
            return Err(ConfigError::Invalid("retry delays cannot be negative".into()));
        }
        Ok(())
    }

    /// The client secret: the environment wins over the config file.
    pub fn client_secret(&self) -> Result<SecretString, MissingEnvVarError> {
        if let Some(s) = get_env_var_opt(SECRET_ENV_VAR) {
            return Ok(SecretString::new(s.into()));
        }
        self.secret
            .as_ref()
            .map(|s| SecretString::new(s.expose_secret().into()))
            .ok_or_else(|| MissingEnvVarError(SECRET_ENV_VAR.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        api_endpoint = "https://stream.example/api/series"
        ping_endpoint = "https://stream.example/api/ping"
    "#;

    #[test]
    fn defaults_apply() {
        let cfg = StreamConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(cfg.data_type, "market-series");
        assert_eq!(cfg.concurrency, 1);
        assert_eq!(cfg.products_per_request, 1);
        assert_eq!(cfg.retry.max_attempts, 5);
        assert!(cfg.requests_per_second.is_none());
        assert_eq!(cfg.authority_host, "https://login.microsoftonline.com");
    }

    #[test]
    fn secret_comes_from_file_when_env_unset() {
        if std::env::var(SECRET_ENV_VAR).is_ok() {
            return;
        }
        let cfg = StreamConfig::from_toml_str(&format!("{MINIMAL}\nsecret = \"abc\"")).unwrap();
        assert_eq!(cfg.client_secret().unwrap().expose_secret(), "abc");

        let cfg = StreamConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(cfg.client_secret().unwrap_err().0, SECRET_ENV_VAR);
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let err = StreamConfig::from_toml_str(&format!("{MINIMAL}\nconcurrency = 0")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(
            StreamConfig::from_toml_str(&format!("{MINIMAL}\nbogus = 1")),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn debug_output_redacts_secret() {
        let cfg = StreamConfig::from_toml_str(&format!("{MINIMAL}\nsecret = \"hunter2\"")).unwrap();
        assert!(!format!("{cfg:?}").contains("hunter2"));
    }

    #[test]
    fn loads_from_file_and_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.toml");
        std::fs::write(&path, format!("{MINIMAL}\ncatalog_path = \"markets.toml\"")).unwrap();
        let cfg = StreamConfig::from_path(&path).unwrap();
        assert_eq!(cfg.catalog_path.as_deref(), Some(Path::new("markets.toml")));

        let missing = StreamConfig::from_path(dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));
    }
}
