//! Wide per-location table: one row per timestamp, one column per canonical
//! product.

use std::{collections::BTreeMap, io};

use chrono::NaiveDateTime;
use stream_ingestor::models::reading::MarketReading;

use super::{datefmt::format_spot, price_cell};

/// Name of the leading timestamp column.
pub const TIMESTAMP_COLUMN: &str = "timestamp";

/// Pivoted readings of one `(market, location)`.
#[derive(Debug, Clone, PartialEq)]
pub struct WideTable {
    /// Product columns, in output order.
    pub columns: Vec<String>,
    /// Timestamp-ordered rows; each holds one cell per column.
    pub rows: Vec<(NaiveDateTime, Vec<Option<f64>>)>,
}

impl WideTable {
    /// Cells of one column, in row order.
    pub fn column(&self, product: &str) -> Option<Vec<Option<f64>>> {
        let idx = self.columns.iter().position(|c| c == product)?;
        Some(self.rows.iter().map(|(_, cells)| cells[idx]).collect())
    }

    /// Share of rows where `product` is missing; `0.0` for an empty table.
    pub fn missing_fraction(&self, product: &str) -> f64 {
        match self.column(product) {
            Some(cells) if !cells.is_empty() => {
                cells.iter().filter(|c| c.is_none()).count() as f64 / cells.len() as f64
            }
            _ => 0.0,
        }
    }
}

/// Pivots long readings into a wide table with exactly `columns`.
///
/// Every column is present even when no reading carries it. Readings of
/// products outside `columns` are ignored; the caller passes readings of a
/// single `(market, location)`.
pub fn to_wide_energy_format(readings: &[MarketReading], columns: &[String]) -> WideTable {
    let index: BTreeMap<&str, usize> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| (c.as_str(), i))
        .collect();

    let mut rows: BTreeMap<NaiveDateTime, Vec<Option<f64>>> = BTreeMap::new();
    for r in readings {
        let Some(&col) = index.get(r.product.as_str()) else {
            continue;
        };
        let row = rows
            .entry(r.timestamp)
            .or_insert_with(|| vec![None; columns.len()]);
        if r.price.is_some() || row[col].is_none() {
            row[col] = r.price;
        }
    }

    WideTable {
        columns: columns.to_vec(),
        rows: rows.into_iter().collect(),
    }
}

/// Writes the table as CSV: `timestamp` followed by the product columns.
///
/// Timestamps use the same layout as the spot-price table.
pub fn write_wide<W: io::Write>(table: &WideTable, writer: W) -> csv::Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    let mut header = vec![TIMESTAMP_COLUMN.to_string()];
    header.extend(table.columns.iter().cloned());
    wtr.write_record(&header)?;

    for (ts, cells) in &table.rows {
        let mut record = Vec::with_capacity(cells.len() + 1);
        record.push(format_spot(*ts));
        record.extend(cells.iter().map(|c| price_cell(*c)));
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}
