//! Output adapters: the per-location wide CSV and the long spot-price CSV.
//!
//! Both tolerate empty input and then write a header-only file.

pub mod datefmt;
pub mod spot;
pub mod wide;

/// Renders a price cell; missing prices are blank.
pub(crate) fn price_cell(price: Option<f64>) -> String {
    price.map(|p| p.to_string()).unwrap_or_default()
}

/// Parses a price cell; blank means missing.
pub(crate) fn parse_price(cell: &str) -> Result<Option<f64>, std::num::ParseFloatError> {
    let cell = cell.trim();
    if cell.is_empty() {
        Ok(None)
    } else {
        cell.parse().map(Some)
    }
}
