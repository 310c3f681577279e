#![allow(dead_code)]

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use price_sync::OutputPaths;
use stream_ingestor::{
    StreamConfig,
    auth::StaticToken,
    providers::{
        FetchError, SeriesSource, ServiceStatus,
        stream_rest::{
            params::SeriesRequest,
            provider::StreamProvider,
            response::{SeriesBatch, SeriesPoint},
        },
    },
};
use tempfile::TempDir;

pub fn ts(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .and_then(|d| d.and_hms_opt(h, min, 0))
        .expect("valid timestamp")
}

/// HTTP client against a mock server, with no back-off between attempts.
pub fn mock_provider(base_url: &str) -> StreamProvider {
    let cfg = StreamConfig::from_toml_str(&format!(
        r#"
api_endpoint = "{base_url}/series"
ping_endpoint = "{base_url}/ping"

[retry]
max_attempts = 5
base_delay_secs = 0.0
jitter_secs = 0.0
"#
    ))
    .expect("test config");
    StreamProvider::with_token_source(&cfg, Arc::new(StaticToken::new("test-token")))
        .expect("provider")
}

/// Evenly spaced points over `[start, end)`.
pub fn series(
    start: NaiveDateTime,
    end: NaiveDateTime,
    step: Duration,
    price: impl Fn(usize) -> Option<f64>,
) -> Vec<SeriesPoint> {
    let mut out = Vec::new();
    let mut t = start;
    while t < end {
        out.push(SeriesPoint {
            timestamp: t,
            price: price(out.len()),
        });
        t += step;
    }
    out
}

/// In-memory market-data service.
///
/// Answers like the real one: whole days from `startDate` through `endDate`,
/// so adjacent windows overlap on their boundary day.
#[derive(Default)]
pub struct FakeSource {
    /// `(location, native product)` -> points.
    data: HashMap<(String, String), Vec<SeriesPoint>>,
    pub requests: Mutex<Vec<SeriesRequest>>,
    pub pings: AtomicUsize,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, location: &str, product: &str, points: Vec<SeriesPoint>) -> Self {
        self.data
            .insert((location.to_string(), product.to_string()), points);
        self
    }

    pub fn requests(&self) -> Vec<SeriesRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn ping_count(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SeriesSource for FakeSource {
    async fn ping(&self) -> Result<ServiceStatus, FetchError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        Ok(ServiceStatus {
            service_time: chrono::Utc::now().fixed_offset(),
            latency: std::time::Duration::ZERO,
        })
    }

    async fn fetch(&self, request: &SeriesRequest) -> Result<SeriesBatch, FetchError> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());

        let first_day = request.window.start().date();
        let last_day = request.window.end().date() + Duration::days(1);
        Ok(request
            .products()
            .map(|p| {
                let points = self
                    .data
                    .get(&(request.location.clone(), p.to_string()))
                    .map(|pts| {
                        pts.iter()
                            .filter(|pt| {
                                let day = pt.timestamp.date();
                                day >= first_day && day < last_day
                            })
                            .copied()
                            .collect()
                    })
                    .unwrap_or_default();
                (p.to_string(), points)
            })
            .collect())
    }
}

/// Scratch directory with the usual output layout; removed on drop.
pub struct Workspace {
    _dir: TempDir,
    pub root: PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().to_path_buf();
        Self { _dir: dir, root }
    }

    /// Writes the identifier table and returns its path.
    pub fn spot_map(&self, rows: &[(i64, &str)]) -> PathBuf {
        let mut text = String::from("SPOTPRICEID,KEY\n");
        for (id, key) in rows {
            text.push_str(&format!("{id},\"{key}\"\n"));
        }
        let path = self.root.join("spot_map.csv");
        std::fs::write(&path, text).expect("write spot map");
        path
    }

    pub fn paths(&self) -> OutputPaths {
        OutputPaths {
            wide_dir: self.root.join("wide"),
            spot_output: Some(self.root.join("spot.csv")),
            spot_map: None,
            spot_key_column: None,
            cache: Some(self.root.join("cache.csv")),
        }
    }

    pub fn read(&self, relative: &str) -> String {
        std::fs::read_to_string(self.root.join(relative)).expect("read output")
    }
}
