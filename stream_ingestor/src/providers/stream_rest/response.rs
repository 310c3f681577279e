//! Response decoding.
//!
//! A successful body maps each requested product to `{columns, data}` where
//! `data` rows are `[timestamp, price|null]`. The service signals failures with
//! a `message` field, either at the top level or inside a product entry; both
//! count as a failed attempt.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;

/// One `(timestamp, price)` pair as returned by the service.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesPoint {
    pub timestamp: NaiveDateTime,
    pub price: Option<f64>,
}

/// Product code -> points, in the order the service returned them.
pub type SeriesBatch = IndexMap<String, Vec<SeriesPoint>>;

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum ProductPayload {
    Failure {
        message: Value,
    },
    Series {
        data: Vec<(String, Option<f64>)>,
    },
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum Envelope {
    Failure { message: Value },
    Products(IndexMap<String, ProductPayload>),
}

/// Why a body was not usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyFault {
    Decode(String),
    Message(String),
}

fn message_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

const OFFSET_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%:z", "%Y-%m-%dT%H:%M:%S%:z", "%Y-%m-%d %H:%M:%S%z"];
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S",
];

/// Parses a service timestamp; any UTC offset is dropped, keeping wall-clock
/// time.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }
    for f in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, f) {
            return Some(dt.naive_local());
        }
    }
    for f in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, f) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Decodes a series body and checks every requested product is present.
pub fn decode_series<'a>(
    body: &str,
    requested: impl IntoIterator<Item = &'a str>,
) -> Result<SeriesBatch, BodyFault> {
    let envelope: Envelope =
        serde_json::from_str(body).map_err(|e| BodyFault::Decode(e.to_string()))?;
    let products = match envelope {
        Envelope::Failure { message } => return Err(BodyFault::Message(message_text(&message))),
        Envelope::Products(p) => p,
    };

    let mut out = SeriesBatch::with_capacity(products.len());
    for (product, payload) in products {
        match payload {
            ProductPayload::Failure { message } => {
                return Err(BodyFault::Message(format!(
                    "{product}: {}",
                    message_text(&message)
                )));
            }
            ProductPayload::Series { data } => {
                let mut points = Vec::with_capacity(data.len());
                for (ts, price) in data {
                    let timestamp = parse_timestamp(&ts).ok_or_else(|| {
                        BodyFault::Decode(format!("{product}: unparseable timestamp {ts:?}"))
                    })?;
                    points.push(SeriesPoint { timestamp, price });
                }
                out.insert(product, points);
            }
        }
    }

    for p in requested {
        if !out.contains_key(p) {
            return Err(BodyFault::Decode(format!("product {p} missing from response")));
        }
    }
    Ok(out)
}

/// Parses the liveness endpoint body, `%m/%d/%Y %H:%M:%S %z`, optionally
/// JSON-quoted.
pub fn parse_ping(body: &str) -> Result<DateTime<FixedOffset>, BodyFault> {
    let s = body.trim().trim_matches('"');
    DateTime::parse_from_str(s, "%m/%d/%Y %H:%M:%S %z")
        .map_err(|e| BodyFault::Decode(format!("bad liveness timestamp {s:?}: {e}")))
}
