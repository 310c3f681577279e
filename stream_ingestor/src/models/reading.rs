//! Canonical in-memory representation of one price observation.
//!
//! Every series fetched from the market-data service, loaded from a cache file,
//! or derived from other series ends up as a list of [`MarketReading`]s. The
//! long format is what reconciliation and both output formats operate on.

use chrono::NaiveDateTime;

/// Identifies one price series: a product at a location in a market.
///
/// Markets are stored as lowercase catalog codes (`"caiso"`), locations as the
/// uppercase identifier used when addressing the service, products as
/// lowercase canonical codes (`"energy_rt"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesKey {
    pub market: String,
    pub location: String,
    pub product: String,
}

impl SeriesKey {
    pub fn new(
        market: impl Into<String>,
        location: impl Into<String>,
        product: impl Into<String>,
    ) -> Self {
        Self {
            market: market.into(),
            location: location.into(),
            product: product.into(),
        }
    }
}

/// A single measured value. Immutable once fetched.
///
/// `(market, location, product, timestamp)` uniquely identifies a reading.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketReading {
    pub market: String,
    pub location: String,
    pub product: String,
    /// Start of the interval the price applies to (market wall-clock time).
    pub timestamp: NaiveDateTime,
    /// `None` when the service reported the slot without a value.
    pub price: Option<f64>,
}

impl MarketReading {
    pub fn new(series: &SeriesKey, timestamp: NaiveDateTime, price: Option<f64>) -> Self {
        Self {
            market: series.market.clone(),
            location: series.location.clone(),
            product: series.product.clone(),
            timestamp,
            price,
        }
    }

    pub fn series_key(&self) -> SeriesKey {
        SeriesKey::new(&self.market, &self.location, &self.product)
    }

    /// De-duplication key.
    pub fn key(&self) -> (SeriesKey, NaiveDateTime) {
        (self.series_key(), self.timestamp)
    }

    pub fn belongs_to(&self, series: &SeriesKey) -> bool {
        self.market == series.market
            && self.location == series.location
            && self.product == series.product
    }
}
