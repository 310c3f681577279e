#![allow(dead_code)]

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use stream_ingestor::{
    auth::StaticToken, config::StreamConfig, models::window::DateWindow,
    providers::stream_rest::provider::StreamProvider,
};

pub const TOKEN: &str = "test-token";

/// Config pointing at a mock server, with no back-off between attempts.
pub fn config_for(base_url: &str, extra: &str) -> StreamConfig {
    let text = format!(
        r#"
api_endpoint = "{base_url}/series"
ping_endpoint = "{base_url}/ping"
tenant = "tenant-1"
client_id = "app-id"
resource = "https://stream.example/"
{extra}

[retry]
max_attempts = 5
base_delay_secs = 0.0
jitter_secs = 0.0
"#
    );
    StreamConfig::from_toml_str(&text).expect("test config")
}

pub fn provider_for(base_url: &str) -> StreamProvider {
    StreamProvider::with_token_source(&config_for(base_url, ""), Arc::new(StaticToken::new(TOKEN)))
        .expect("provider")
}

pub fn ts(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .and_then(|d| d.and_hms_opt(h, min, 0))
        .expect("valid timestamp")
}

pub fn window(start: NaiveDateTime, end: NaiveDateTime) -> DateWindow {
    DateWindow::new(start, end).expect("ordered window")
}
