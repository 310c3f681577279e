//! Long spot-price table keyed by opaque identifiers.
//!
//! `SPOTPRICEID, STARTDATE, ENDDATE, PRICE, UPDATEDATETIME`, dates in the
//! `05Jan2021:14:30:00` layout. The same shape doubles as the on-disk cache.

use std::io;

use chrono::NaiveDateTime;
use stream_ingestor::{ProductCatalog, models::reading::MarketReading};
use thiserror::Error;
use tracing::warn;

use super::{
    datefmt::{format_spot, parse_spot},
    parse_price, price_cell,
};
use crate::spot_map::{ID_COLUMN, SpotPriceId, SpotPriceIdMap};

/// Header of the spot-price CSV.
pub const SPOT_HEADER: [&str; 5] = [ID_COLUMN, "STARTDATE", "ENDDATE", "PRICE", "UPDATEDATETIME"];

/// One output row.
#[derive(Debug, Clone, PartialEq)]
pub struct SpotRow {
    /// Series identifier.
    pub id: SpotPriceId,
    /// Interval start.
    pub start: NaiveDateTime,
    /// Interval end: start plus the product resolution.
    pub end: NaiveDateTime,
    /// Blank when the service reported no value.
    pub price: Option<f64>,
    /// When the file was produced; absent in older cache files.
    pub updated: Option<NaiveDateTime>,
}

/// A spot-price CSV could not be parsed.
#[derive(Debug, Error)]
pub enum SpotFormatError {
    /// Malformed CSV.
    #[error("read spot prices: {0}")]
    Csv(#[from] csv::Error),

    /// A required column is absent.
    #[error("spot price file has no {0} column")]
    MissingColumn(&'static str),

    /// A cell could not be parsed.
    #[error("line {line}: invalid {column} {value:?}")]
    BadCell {
        /// 1-based line in the file.
        line: u64,
        /// Column name.
        column: &'static str,
        /// Cell content.
        value: String,
    },
}

/// Converts readings to spot rows, dropping readings without an identifier.
///
/// Rows are sorted by `(id, start)`; `generated_at` stamps every row.
pub fn to_spot_price_format(
    readings: &[MarketReading],
    map: &SpotPriceIdMap,
    catalog: &ProductCatalog,
    generated_at: NaiveDateTime,
) -> Vec<SpotRow> {
    let mut rows: Vec<SpotRow> = readings
        .iter()
        .filter_map(|r| {
            let id = map.id_for(&r.market, &r.location, &r.product)?;
            let width = match catalog.market(&r.market) {
                Ok(m) => m.coverage_of(&r.product),
                Err(e) => {
                    warn!(error = %e, "skipping reading of unknown market");
                    return None;
                }
            };
            Some(SpotRow {
                id,
                start: r.timestamp,
                end: r.timestamp + width,
                price: r.price,
                updated: Some(generated_at),
            })
        })
        .collect();
    rows.sort_by(|a, b| (a.id, a.start).cmp(&(b.id, b.start)));
    rows
}

/// Writes spot rows as CSV; the header is always written.
pub fn write_spot<W: io::Write>(rows: &[SpotRow], writer: W) -> csv::Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(SPOT_HEADER)?;
    for row in rows {
        wtr.write_record([
            row.id.to_string(),
            format_spot(row.start),
            format_spot(row.end),
            price_cell(row.price),
            row.updated.map(format_spot).unwrap_or_default(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

fn column(headers: &csv::StringRecord, name: &'static str) -> Option<usize> {
    headers.iter().position(|h| h.trim().eq_ignore_ascii_case(name))
}

/// Parses a spot-price CSV. `UPDATEDATETIME` is optional.
pub fn read_spot<R: io::Read>(reader: R) -> Result<Vec<SpotRow>, SpotFormatError> {
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers = rdr.headers()?.clone();
    let need = |name: &'static str| column(&headers, name).ok_or(SpotFormatError::MissingColumn(name));
    let id_idx = need(ID_COLUMN)?;
    let start_idx = need("STARTDATE")?;
    let end_idx = need("ENDDATE")?;
    let price_idx = need("PRICE")?;
    let updated_idx = column(&headers, "UPDATEDATETIME");

    let mut rows = Vec::new();
    for rec in rdr.records() {
        let rec = rec?;
        let line = rec.position().map(|p| p.line()).unwrap_or_default();
        let cell = |idx: usize| rec.get(idx).unwrap_or_default().trim();
        let bad = |column: &'static str, value: &str| SpotFormatError::BadCell {
            line,
            column,
            value: value.to_string(),
        };

        if rec.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        let id = cell(id_idx)
            .parse::<SpotPriceId>()
            .map_err(|_| bad(ID_COLUMN, cell(id_idx)))?;
        let start = parse_spot(cell(start_idx)).map_err(|_| bad("STARTDATE", cell(start_idx)))?;
        let end = parse_spot(cell(end_idx)).map_err(|_| bad("ENDDATE", cell(end_idx)))?;
        let price = parse_price(cell(price_idx)).map_err(|_| bad("PRICE", cell(price_idx)))?;
        let updated = match updated_idx.map(cell).filter(|c| !c.is_empty()) {
            Some(raw) => Some(parse_spot(raw).map_err(|_| bad("UPDATEDATETIME", raw))?),
            None => None,
        };
        rows.push(SpotRow {
            id,
            start,
            end,
            price,
            updated,
        });
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use stream_ingestor::models::reading::SeriesKey;

    fn at(d: u32, h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2021, 1, d)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn map() -> SpotPriceIdMap {
        SpotPriceIdMap::from_entries([
            (7, "caiso", "NODE1", "energy_rt"),
            (3, "caiso", "NODE1", "energy_da"),
        ])
    }

    fn reading(product: &str, ts: NaiveDateTime, price: Option<f64>) -> MarketReading {
        MarketReading::new(&SeriesKey::new("caiso", "NODE1", product), ts, price)
    }

    #[test]
    fn unresolved_readings_are_dropped_and_end_uses_resolution() {
        let catalog = ProductCatalog::builtin().unwrap();
        let readings = vec![
            reading("energy_rt", at(5, 14, 35, 0), Some(31.5)),
            reading("energy_rt", at(5, 14, 30, 0), Some(30.0)),
            reading("energy_da", at(5, 14, 0, 0), Some(28.0)),
            reading("regup_rt", at(5, 14, 0, 0), Some(5.0)),
        ];
        let generated = at(6, 9, 0, 0);
        let rows = to_spot_price_format(&readings, &map(), &catalog, generated);

        assert_eq!(rows.len(), 3);
        assert_eq!((rows[0].id, rows[0].end - rows[0].start), (3, Duration::hours(1)));
        assert_eq!((rows[1].id, rows[1].start), (7, at(5, 14, 30, 0)));
        assert_eq!(rows[2].end, at(5, 14, 40, 0));
        assert!(rows.iter().all(|r| r.updated == Some(generated)));
    }

    #[test]
    fn csv_layout_and_round_trip() {
        let catalog = ProductCatalog::builtin().unwrap();
        let readings = vec![
            reading("energy_rt", at(5, 14, 30, 0), Some(31.5)),
            reading("energy_rt", at(5, 14, 35, 0), None),
        ];
        let rows = to_spot_price_format(&readings, &map(), &catalog, at(6, 9, 0, 0));
        let mut out = Vec::new();
        write_spot(&rows, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        insta::assert_snapshot!(text.trim_end(), @r"
        SPOTPRICEID,STARTDATE,ENDDATE,PRICE,UPDATEDATETIME
        7,05Jan2021:14:30:00,05Jan2021:14:35:00,31.5,06Jan2021:09:00:00
        7,05Jan2021:14:35:00,05Jan2021:14:40:00,,06Jan2021:09:00:00
        ");

        let parsed = read_spot(text.as_bytes()).unwrap();
        assert_eq!(parsed, rows);
    }

    #[test]
    fn empty_input_writes_header_only() {
        let mut out = Vec::new();
        write_spot(&[], &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "SPOTPRICEID,STARTDATE,ENDDATE,PRICE,UPDATEDATETIME\n"
        );
    }

    #[test]
    fn cache_shape_without_update_column_parses() {
        let text = "SPOTPRICEID,STARTDATE,ENDDATE,PRICE\n3,05Jan2021:14:00:00,05Jan2021:15:00:00,28\n";
        let rows = read_spot(text.as_bytes()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].price, Some(28.0));
        assert_eq!(rows[0].updated, None);

        assert!(matches!(
            read_spot("SPOTPRICEID,STARTDATE\n".as_bytes()),
            Err(SpotFormatError::MissingColumn("ENDDATE"))
        ));
        assert!(matches!(
            read_spot("SPOTPRICEID,STARTDATE,ENDDATE,PRICE\n3,tomorrow,x,1\n".as_bytes()),
            Err(SpotFormatError::BadCell { column: "STARTDATE", .. })
        ));
    }
}
