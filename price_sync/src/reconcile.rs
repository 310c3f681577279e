//! Cache reconciliation: decide what still has to be fetched, then fold fresh
//! readings into the cache.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use stream_ingestor::models::{
    reading::{MarketReading, SeriesKey},
    resolution::Resolution,
    window::DateWindow,
};
use tracing::debug;

/// What to fetch for one `(market, location, product)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPlan {
    /// Nothing usable cached, or the cache has a gap: fetch everything.
    Full(DateWindow),
    /// Cache is contiguous: fetch from the last cached slot onwards.
    Tail(DateWindow),
    /// Cache already reaches the end of the range.
    UpToDate,
}

impl FetchPlan {
    /// Window to fetch, if any.
    pub fn window(&self) -> Option<DateWindow> {
        match self {
            Self::Full(w) | Self::Tail(w) => Some(*w),
            Self::UpToDate => None,
        }
    }
}

/// Plans the fetch of `series` over `requested` against cached readings.
///
/// The cache counts as contiguous when it covers `requested.start` and its
/// timestamps from there on are exactly `resolution` apart. Duplicate or
/// misaligned timestamps are gaps. The last cached slot is always refetched.
pub fn plan_fetch(
    cache: &[MarketReading],
    series: &SeriesKey,
    resolution: Resolution,
    requested: DateWindow,
) -> FetchPlan {
    let mut stamps: Vec<NaiveDateTime> = cache
        .iter()
        .filter(|r| r.belongs_to(series))
        .map(|r| r.timestamp)
        .collect();
    stamps.sort_unstable();

    let Some(&first) = stamps.first() else {
        debug!(?series, "nothing cached");
        return FetchPlan::Full(requested);
    };
    if first > requested.start() {
        debug!(?series, %first, "cache starts after requested range");
        return FetchPlan::Full(requested);
    }

    // earlier history does not matter; start at the slot covering the range start
    let anchor = stamps.partition_point(|&ts| ts <= requested.start()) - 1;
    let step = resolution.duration();
    // slots past the range only matter for telling whether the end is reached
    let upper = (stamps.partition_point(|&ts| ts < requested.end()) + 1).min(stamps.len());
    let relevant = &stamps[anchor..upper];
    if let Some(pair) = relevant.windows(2).find(|p| p[1] - p[0] != step) {
        debug!(?series, after = %pair[0], next = %pair[1], "gap in cache");
        return FetchPlan::Full(requested);
    }

    let last = relevant[relevant.len() - 1];
    match DateWindow::new(last, requested.end()) {
        Some(w) if !w.is_empty() => FetchPlan::Tail(w),
        _ => FetchPlan::UpToDate,
    }
}

/// Union of `cached` and `fresh`, one reading per key, `fresh` winning.
///
/// Output is sorted by `(market, location, product, timestamp)`.
pub fn merge(cached: &[MarketReading], fresh: &[MarketReading]) -> Vec<MarketReading> {
    let mut by_key: BTreeMap<(SeriesKey, NaiveDateTime), MarketReading> = BTreeMap::new();
    for r in cached.iter().chain(fresh) {
        by_key.insert(r.key(), r.clone());
    }
    by_key.into_values().collect()
}
