//! Persisted readings from earlier runs.
//!
//! The cache file has the spot-price CSV shape, so series are recovered by
//! reverse lookup through the [`SpotPriceIdMap`]. It is read once before
//! planning and written once after a successful run. Rows the map cannot
//! resolve are carried through untouched so a rewrite never loses them.

use std::{
    collections::BTreeMap,
    fs::File,
    io::{self, BufWriter},
    path::{Path, PathBuf},
};

use chrono::NaiveDateTime;
use stream_ingestor::{
    ProductCatalog,
    models::reading::{MarketReading, SeriesKey},
};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    format::spot::{SpotFormatError, SpotRow, read_spot, to_spot_price_format, write_spot},
    spot_map::SpotPriceIdMap,
};

/// The cache file could not be read or written.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Opening or creating the file failed.
    #[error("open cache {path}: {source}")]
    Io {
        /// Cache path.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The file exists but is not a spot-price CSV.
    #[error("cache {path}: {source}")]
    Format {
        /// Cache path.
        path: PathBuf,
        /// Parse failure.
        source: SpotFormatError,
    },

    /// Writing rows failed.
    #[error("write cache {path}: {source}")]
    Write {
        /// Cache path.
        path: PathBuf,
        /// Underlying CSV error.
        source: csv::Error,
    },
}

/// Contents of the cache file.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LoadedCache {
    /// Rows resolved to series.
    pub readings: Vec<MarketReading>,
    /// Rows whose identifier is not in the map, or whose market the catalog
    /// does not know. Written back as they were read.
    pub retained: Vec<SpotRow>,
}

/// Loads cached readings; a missing file is an empty cache.
pub fn load_cache(
    path: &Path,
    map: &SpotPriceIdMap,
    catalog: &ProductCatalog,
) -> Result<LoadedCache, CacheError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no cache file, starting empty");
            return Ok(LoadedCache::default());
        }
        Err(source) => {
            return Err(CacheError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    let rows = read_spot(file).map_err(|source| CacheError::Format {
        path: path.to_path_buf(),
        source,
    })?;

    let mut loaded = LoadedCache {
        readings: Vec::with_capacity(rows.len()),
        retained: Vec::new(),
    };
    for row in rows {
        let key = match map.triple_for(row.id) {
            Ok(k) => k,
            Err(e) => {
                debug!(error = %e, "cached row kept unresolved");
                loaded.retained.push(row);
                continue;
            }
        };
        let market = match catalog.market(&key.market) {
            Ok(m) => m.code().to_string(),
            Err(e) => {
                debug!(id = row.id, error = %e, "cached row of unknown market kept unresolved");
                loaded.retained.push(row);
                continue;
            }
        };
        let series = SeriesKey::new(market, key.location, key.product);
        loaded
            .readings
            .push(MarketReading::new(&series, row.start, row.price));
    }
    if !loaded.retained.is_empty() {
        warn!(
            path = %path.display(),
            rows = loaded.retained.len(),
            "cache rows the spot map cannot resolve are carried over unchanged"
        );
    }
    debug!(path = %path.display(), readings = loaded.readings.len(), "cache loaded");
    Ok(loaded)
}

/// Writes `readings` and the `retained` rows to the cache file, replacing it.
///
/// Readings without an identifier in `map` cannot be persisted. A reading wins
/// over a retained row with the same `(id, start)`.
pub fn write_cache(
    path: &Path,
    readings: &[MarketReading],
    retained: &[SpotRow],
    map: &SpotPriceIdMap,
    catalog: &ProductCatalog,
    generated_at: NaiveDateTime,
) -> Result<(), CacheError> {
    let mut by_slot: BTreeMap<_, SpotRow> = retained
        .iter()
        .map(|r| ((r.id, r.start), r.clone()))
        .collect();
    for row in to_spot_price_format(readings, map, catalog, generated_at) {
        by_slot.insert((row.id, row.start), row);
    }
    let rows: Vec<SpotRow> = by_slot.into_values().collect();

    let file = File::create(path).map_err(|source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    write_spot(&rows, BufWriter::new(file)).map_err(|source| CacheError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), rows = rows.len(), "cache written");
    Ok(())
}
