//! Run orchestration.
//!
//! One run covers one market, a list of locations and a product selection
//! over `[start, end)`:
//!
//! 1. the catalog resolves canonical products and the natives behind them;
//! 2. the service is pinged once;
//! 3. each `(location, product)` is planned against the cache, the remaining
//!    range is chunked and split into request batches (fetch units);
//! 4. units run with bounded concurrency; the first failure aborts the run;
//! 5. natives are recombined into canonical series, trimmed to the planned
//!    window and to "now", then merged with the cache;
//! 6. wide tables are built per location.
//!
//! [`sync_to_files`] wraps a run with the file inputs and outputs.

use std::{
    collections::HashMap,
    fs::{self, File},
    io::{self, BufWriter},
    path::{Path, PathBuf},
};

use chrono::NaiveDateTime;
use futures::{StreamExt, TryStreamExt, stream};
use indexmap::IndexMap;
use stream_ingestor::{
    FetchError, ProductCatalog, ProductSelection, SeriesSource, StreamConfig,
    catalog::{CatalogError, MarketEntry, derive::combine},
    chunk::{ChunkError, chunk},
    models::{
        reading::{MarketReading, SeriesKey},
        window::{DateWindow, ProductWindow},
    },
    providers::stream_rest::params::{DEFAULT_DATA_TYPE, SeriesRequest},
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
    cache::{CacheError, LoadedCache, load_cache, write_cache},
    format::{
        spot::{to_spot_price_format, write_spot},
        wide::{WideTable, to_wide_energy_format, write_wide},
    },
    reconcile::{FetchPlan, merge, plan_fetch},
    spot_map::{MappingLoadError, SpotPriceIdMap},
};

/// Canonical real-time energy product checked by `require_energy`.
pub const ENERGY_RT: &str = "energy_rt";

/// Share of missing cells above which a column is reported.
const MISSING_REPORT_THRESHOLD: f64 = 0.01;

/// Errors that abort a run.
#[derive(Debug, Error)]
pub enum EngineError {
    /// `start` is not before `end`.
    #[error("invalid date range: start {start} must be before end {end}")]
    InvalidRange {
        /// Requested start.
        start: NaiveDateTime,
        /// Requested end.
        end: NaiveDateTime,
    },

    /// Unknown market or product.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// A fetch unit used up its retries, or the ping failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The date range could not be chunked.
    #[error(transparent)]
    Chunk(#[from] ChunkError),

    /// `require_energy` was set and a location has no real-time energy price.
    #[error("no real-time energy data retrieved for {location}, check node name and dates")]
    MissingEnergy {
        /// Location identifier.
        location: String,
    },

    /// The spot-price lookup table could not be loaded.
    #[error(transparent)]
    Mapping(#[from] MappingLoadError),

    /// The cache file could not be read or written.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// An output file could not be created.
    #[error("write {path}: {source}")]
    Io {
        /// Output path.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// An output file could not be written.
    #[error("write {path}: {source}")]
    Csv {
        /// Output path.
        path: PathBuf,
        /// Underlying CSV error.
        source: csv::Error,
    },
}

/// What to sync.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Market code or alias.
    pub market: String,
    /// Location names or identifiers.
    pub locations: Vec<String>,
    /// Canonical products.
    pub selection: ProductSelection,
    /// Inclusive range start.
    pub start: NaiveDateTime,
    /// Exclusive range end.
    pub end: NaiveDateTime,
    /// Fail a location without any real-time energy price.
    pub require_energy: bool,
    /// Forces the `useCache` flag; `None` derives it per batch.
    pub use_cache: Option<bool>,
}

/// Engine knobs taken from the client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// `dataType` of every product entry.
    pub data_type: String,
    /// Fetch units in flight at once.
    pub concurrency: usize,
    /// Natives per request.
    pub products_per_request: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            data_type: DEFAULT_DATA_TYPE.to_string(),
            concurrency: 1,
            products_per_request: 1,
        }
    }
}

impl From<&StreamConfig> for EngineOptions {
    fn from(cfg: &StreamConfig) -> Self {
        Self {
            data_type: cfg.data_type.clone(),
            concurrency: cfg.concurrency.max(1),
            products_per_request: cfg.products_per_request.max(1),
        }
    }
}

/// Result of a run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// Catalog code of the market.
    pub market: String,
    /// Wide-table columns.
    pub columns: Vec<String>,
    /// One table per location identifier, in request order.
    pub tables: IndexMap<String, WideTable>,
    /// Canonical readings fetched during this run.
    pub fresh: Vec<MarketReading>,
    /// Cache plus fresh readings; what the cache file should hold next.
    pub merged: Vec<MarketReading>,
    /// Readings of this run's series inside the requested range.
    pub in_range: Vec<MarketReading>,
}

/// One request batch: some natives of one canonical product over one chunk.
#[derive(Debug, Clone)]
struct FetchUnit {
    location: String,
    target: ProductWindow,
    natives: Vec<String>,
}

/// Canonical series of one location plus what its natives must be trimmed to.
#[derive(Debug, Clone)]
struct PlannedSeries {
    key: SeriesKey,
    window: DateWindow,
}

/// Orchestrates one run against a [`SeriesSource`].
pub struct SyncEngine<'a> {
    source: &'a dyn SeriesSource,
    catalog: &'a ProductCatalog,
    options: EngineOptions,
}

impl<'a> SyncEngine<'a> {
    /// Creates an engine over `source`.
    pub fn new(
        source: &'a dyn SeriesSource,
        catalog: &'a ProductCatalog,
        options: EngineOptions,
    ) -> Self {
        Self {
            source,
            catalog,
            options,
        }
    }

    /// Runs `req` against `cache`. Readings at or after `now` are discarded.
    pub async fn run(
        &self,
        req: &RunRequest,
        cache: &[MarketReading],
        now: NaiveDateTime,
    ) -> Result<RunOutput, EngineError> {
        let requested = DateWindow::new(req.start, req.end)
            .filter(|w| !w.is_empty())
            .ok_or(EngineError::InvalidRange {
                start: req.start,
                end: req.end,
            })?;
        let market = self.catalog.market(&req.market)?;
        let products = self.catalog.products_for(&req.market, &req.selection)?;
        if products.is_empty() {
            return Err(CatalogError::EmptySelection.into());
        }
        let columns = self.catalog.output_columns(&req.selection);
        let locations: Vec<String> = req
            .locations
            .iter()
            .map(|l| market.api_location(l))
            .collect();
        info!(
            market = market.api_code(),
            ?locations,
            ?products,
            window = %requested,
            "starting sync"
        );

        let status = self.source.ping().await?;
        debug!(service_time = %status.service_time, "service reachable");

        let mut planned = Vec::new();
        let mut units = Vec::new();
        for location in &locations {
            for product in &products {
                let key = SeriesKey::new(market.code(), location, product);
                let plan = plan_fetch(cache, &key, market.resolution_of(product), requested);
                let Some(window) = plan.window().and_then(|w| w.clip_end(now)) else {
                    debug!(%location, %product, "up to date");
                    continue;
                };
                if let FetchPlan::Tail(_) = plan {
                    info!(%location, %product, %window, "cache is contiguous, fetching tail");
                }
                units.extend(self.units_for(market, location, product, window)?);
                planned.push(PlannedSeries { key, window });
            }
        }
        info!(units = units.len(), "fetch plan ready");

        let concurrency = self.options.concurrency.max(1);
        let results: Vec<Vec<MarketReading>> = stream::iter(units)
            .map(|unit| self.fetch_unit(market, unit, req.use_cache))
            .buffer_unordered(concurrency)
            .try_collect()
            .await?;

        let mut natives_by_location: HashMap<String, Vec<MarketReading>> = HashMap::new();
        for r in results.into_iter().flatten() {
            natives_by_location
                .entry(r.location.clone())
                .or_default()
                .push(r);
        }

        let mut fresh = Vec::new();
        for series in &planned {
            let natives = natives_by_location
                .get(&series.key.location)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let canonical = canonical_series(market, &series.key, natives);
            let before = fresh.len();
            fresh.extend(
                canonical
                    .into_iter()
                    .filter(|r| series.window.contains(r.timestamp) && r.timestamp < now),
            );
            debug!(
                series = ?series.key,
                readings = fresh.len() - before,
                "canonical series built"
            );
        }

        let merged = merge(cache, &fresh);
        let in_range: Vec<MarketReading> = merged
            .iter()
            .filter(|r| {
                r.market == market.code()
                    && requested.contains(r.timestamp)
                    && r.timestamp < now
                    && locations.contains(&r.location)
                    && products.contains(&r.product)
            })
            .cloned()
            .collect();

        let mut tables = IndexMap::with_capacity(locations.len());
        for location in &locations {
            let rows: Vec<MarketReading> = in_range
                .iter()
                .filter(|r| &r.location == location)
                .cloned()
                .collect();
            let table = to_wide_energy_format(&rows, &columns);
            report_missing(location, &table, &products);
            if req.require_energy && products.iter().any(|p| p == ENERGY_RT) {
                let has_energy = rows
                    .iter()
                    .any(|r| r.product == ENERGY_RT && r.price.is_some());
                if !has_energy {
                    return Err(EngineError::MissingEnergy {
                        location: location.clone(),
                    });
                }
            }
            tables.insert(location.clone(), table);
        }

        info!(
            fetched = fresh.len(),
            cached = cache.len(),
            merged = merged.len(),
            "sync complete"
        );
        Ok(RunOutput {
            market: market.code().to_string(),
            columns,
            tables,
            fresh,
            merged,
            in_range,
        })
    }

    /// Splits the natives of `product` into request batches per chunk of `window`.
    fn units_for(
        &self,
        market: &MarketEntry,
        location: &str,
        product: &str,
        window: DateWindow,
    ) -> Result<Vec<FetchUnit>, EngineError> {
        let natives = market.expand(product)?;
        let chunks = chunk(window.start(), window.end())?;
        let per_request = self.options.products_per_request.max(1);

        let mut units = Vec::new();
        for w in chunks.into_iter().filter(|w| !w.is_empty()) {
            for batch in natives.chunks(per_request) {
                units.push(FetchUnit {
                    location: location.to_string(),
                    target: ProductWindow {
                        product: product.to_string(),
                        window: w,
                    },
                    natives: batch.to_vec(),
                });
            }
        }
        Ok(units)
    }

    async fn fetch_unit(
        &self,
        market: &MarketEntry,
        unit: FetchUnit,
        use_cache: Option<bool>,
    ) -> Result<Vec<MarketReading>, EngineError> {
        let use_cache = use_cache.unwrap_or_else(|| self.catalog.use_cache_default(&unit.natives));
        let request = SeriesRequest::new(
            &self.options.data_type,
            market.api_code(),
            &unit.location,
            &unit.natives,
            unit.target.window,
            use_cache,
        );
        info!(
            location = %unit.location,
            products = ?unit.natives,
            window = %unit.target.window,
            use_cache,
            "harvesting"
        );
        let batch = self.source.fetch(&request).await?;

        let mut readings = Vec::new();
        for native in &unit.natives {
            let key = SeriesKey::new(market.code(), &unit.location, native);
            if let Some(points) = batch.get(native) {
                readings.extend(
                    points
                        .iter()
                        .map(|p| MarketReading::new(&key, p.timestamp, p.price)),
                );
            }
        }
        debug!(
            location = %unit.location,
            product = %unit.target.product,
            readings = readings.len(),
            "batch received"
        );
        Ok(readings)
    }
}

/// Builds the canonical series `key` from native readings of its location.
///
/// Adjacent chunks may return the same rows; the last one wins.
fn canonical_series(
    market: &MarketEntry,
    key: &SeriesKey,
    natives: &[MarketReading],
) -> Vec<MarketReading> {
    match market.derivation(&key.product) {
        Some(rule) => {
            let deduped = merge(&[], natives);
            combine(key, rule, &deduped, |p| market.coverage_of(p))
        }
        None => {
            let own: Vec<MarketReading> = natives
                .iter()
                .filter(|r| r.belongs_to(key))
                .cloned()
                .collect();
            merge(&[], &own)
        }
    }
}

fn report_missing(location: &str, table: &WideTable, products: &[String]) {
    for column in &table.columns {
        if !products.contains(column) {
            continue;
        }
        let fraction = table.missing_fraction(column);
        if fraction > MISSING_REPORT_THRESHOLD {
            warn!(
                %location,
                %column,
                missing_pct = format!("{:.2}", 100.0 * fraction),
                "column is missing data"
            );
        }
    }
}

/// File inputs and outputs of a sync.
#[derive(Debug, Clone, Default)]
pub struct OutputPaths {
    /// Directory receiving one `{market}_{location}.csv` per location.
    pub wide_dir: PathBuf,
    /// Spot-price CSV.
    pub spot_output: Option<PathBuf>,
    /// Spot-price identifier table.
    pub spot_map: Option<PathBuf>,
    /// Composite-key column of the identifier table; detected when `None`.
    pub spot_key_column: Option<String>,
    /// Cache file, read before and rewritten after the run. Ignored without a
    /// spot map.
    pub cache: Option<PathBuf>,
}

/// What a successful [`sync_to_files`] wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Wide files, one per location.
    pub wide_files: Vec<PathBuf>,
    /// Rows in the spot-price output.
    pub spot_rows: usize,
    /// Readings fetched from the service.
    pub fetched: usize,
}

/// Wide output path of one location.
pub fn wide_path(dir: &Path, market: &str, location: &str) -> PathBuf {
    let safe: String = location
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
        .collect();
    dir.join(format!("{market}_{safe}.csv"))
}

/// Runs a sync and writes its outputs.
///
/// On failure the error is logged, header-only outputs are written in place
/// of the real ones, the cache is left untouched, and the error is returned.
pub async fn sync_to_files(
    source: &dyn SeriesSource,
    catalog: &ProductCatalog,
    options: EngineOptions,
    paths: &OutputPaths,
    req: &RunRequest,
    now: NaiveDateTime,
) -> Result<RunSummary, EngineError> {
    match try_sync(source, catalog, options, paths, req, now).await {
        Ok(summary) => Ok(summary),
        Err(e) => {
            error!(error = %e, "sync failed, writing empty outputs");
            if let Err(write_err) = write_empty_outputs(catalog, paths, req) {
                error!(error = %write_err, "could not write empty outputs");
            }
            Err(e)
        }
    }
}

async fn try_sync(
    source: &dyn SeriesSource,
    catalog: &ProductCatalog,
    options: EngineOptions,
    paths: &OutputPaths,
    req: &RunRequest,
    now: NaiveDateTime,
) -> Result<RunSummary, EngineError> {
    let map = match &paths.spot_map {
        Some(p) => Some(SpotPriceIdMap::load(p, paths.spot_key_column.as_deref())?),
        None => {
            if paths.spot_output.is_some() || paths.cache.is_some() {
                warn!("no spot map given, spot output will be empty and the cache is left untouched");
            }
            None
        }
    };
    debug!(entries = map.as_ref().map_or(0, SpotPriceIdMap::len), "spot map loaded");
    // without a map, cached identifiers cannot be resolved or written back
    let cache_file = paths.cache.as_deref().filter(|_| map.is_some());
    let map = map.unwrap_or_default();
    let cache = match cache_file {
        Some(p) => load_cache(p, &map, catalog)?,
        None => LoadedCache::default(),
    };

    let output = SyncEngine::new(source, catalog, options)
        .run(req, &cache.readings, now)
        .await?;

    let mut wide_files = Vec::with_capacity(output.tables.len());
    create_dir(&paths.wide_dir)?;
    for (location, table) in &output.tables {
        let path = wide_path(&paths.wide_dir, &output.market, location);
        write_csv(&path, |w| write_wide(table, w))?;
        info!(path = %path.display(), rows = table.rows.len(), "wide output written");
        wide_files.push(path);
    }

    let rows = to_spot_price_format(&output.in_range, &map, catalog, now);
    if let Some(path) = &paths.spot_output {
        write_csv(path, |w| write_spot(&rows, w))?;
        info!(path = %path.display(), rows = rows.len(), "spot output written");
    }
    if let Some(path) = cache_file {
        write_cache(path, &output.merged, &cache.retained, &map, catalog, now)?;
    }

    Ok(RunSummary {
        wide_files,
        spot_rows: rows.len(),
        fetched: output.fresh.len(),
    })
}

/// Writes header-only outputs, attempting every file; returns the first error.
fn write_empty_outputs(
    catalog: &ProductCatalog,
    paths: &OutputPaths,
    req: &RunRequest,
) -> Result<(), EngineError> {
    let columns = catalog.output_columns(&req.selection);
    let (market, locations): (String, Vec<String>) = match catalog.market(&req.market) {
        Ok(m) => (
            m.code().to_string(),
            req.locations.iter().map(|l| m.api_location(l)).collect(),
        ),
        Err(_) => (
            req.market.trim().to_lowercase(),
            req.locations.iter().map(|l| l.trim().to_uppercase()).collect(),
        ),
    };
    let empty = WideTable {
        columns,
        rows: Vec::new(),
    };

    let mut results = Vec::with_capacity(locations.len() + 1);
    match create_dir(&paths.wide_dir) {
        Ok(()) => {
            for location in &locations {
                let path = wide_path(&paths.wide_dir, &market, location);
                results.push(write_csv(&path, |w| write_wide(&empty, w)));
            }
        }
        Err(e) => results.push(Err(e)),
    }
    if let Some(path) = &paths.spot_output {
        results.push(write_csv(path, |w| write_spot(&[], w)));
    }

    let mut errors = results.into_iter().filter_map(Result::err);
    let first = errors.next();
    for e in errors {
        error!(error = %e, "could not write empty output");
    }
    first.map_or(Ok(()), Err)
}

fn create_dir(dir: &Path) -> Result<(), EngineError> {
    fs::create_dir_all(dir).map_err(|source| EngineError::Io {
        path: dir.to_path_buf(),
        source,
    })
}

fn write_csv(
    path: &Path,
    write: impl FnOnce(BufWriter<File>) -> csv::Result<()>,
) -> Result<(), EngineError> {
    let file = File::create(path).map_err(|source| EngineError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    write(BufWriter::new(file)).map_err(|source| EngineError::Csv {
        path: path.to_path_buf(),
        source,
    })
}
