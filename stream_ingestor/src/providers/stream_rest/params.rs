use chrono::NaiveDateTime;
use indexmap::IndexMap;
use serde::{Serialize, Serializer};

use crate::models::window::DateWindow;

/// Date format the service expects in `startDate` / `endDate`.
pub const WIRE_DATE_FORMAT: &str = "%m/%d/%Y";

/// Default `dataType` of every product entry.
pub const DEFAULT_DATA_TYPE: &str = "market-series";

fn wire_date<S: Serializer>(ts: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(&ts.format(WIRE_DATE_FORMAT))
}

fn bool_str<S: Serializer>(v: &bool, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(if *v { "true" } else { "false" })
}

/// `params` object of one product entry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesParams {
    pub market: String,
    pub location: String,
    pub product: String,
    #[serde(serialize_with = "wire_date")]
    pub start_date: NaiveDateTime,
    #[serde(serialize_with = "wire_date")]
    pub end_date: NaiveDateTime,
    #[serde(serialize_with = "bool_str")]
    pub use_cache: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductEntry {
    pub data_type: String,
    pub params: SeriesParams,
}

/// One POST: every product of a batch for one location and window.
#[derive(Debug, Clone)]
pub struct SeriesRequest {
    pub market: String,
    pub location: String,
    pub window: DateWindow,
    /// Product code -> entry; serialized as the request body.
    pub entries: IndexMap<String, ProductEntry>,
}

impl SeriesRequest {
    /// `market` and `location` are the identifiers the service expects
    /// (`ISONE`, uppercase node names).
    pub fn new<S: AsRef<str>>(
        data_type: &str,
        market: &str,
        location: &str,
        products: &[S],
        window: DateWindow,
        use_cache: bool,
    ) -> Self {
        let entries = products
            .iter()
            .map(|p| {
                let product = p.as_ref().to_string();
                let entry = ProductEntry {
                    data_type: data_type.to_string(),
                    params: SeriesParams {
                        market: market.to_string(),
                        location: location.to_string(),
                        product: product.clone(),
                        start_date: window.start(),
                        end_date: window.end(),
                        use_cache,
                    },
                };
                (product, entry)
            })
            .collect();
        Self {
            market: market.to_string(),
            location: location.to_string(),
            window,
            entries,
        }
    }

    pub fn products(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}
