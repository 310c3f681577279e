//! Date-range chunking.
//!
//! Wide requests are split so that no single call asks the service for more
//! than roughly a calendar year of data. The split places
//! `2 + (end.year - start.year)` boundaries evenly between `start` and `end`
//! (linear interpolation at whole-second precision), which yields
//! `1 + (end.year - start.year)` contiguous windows covering `[start, end)`.

use chrono::{Datelike, Duration, NaiveDateTime};
use thiserror::Error;

use crate::models::window::DateWindow;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkError {
    #[error("range end {end} is before start {start}")]
    Inverted {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
}

/// Number of boundaries `chunk` produces for a range.
pub fn boundary_count(start: NaiveDateTime, end: NaiveDateTime) -> usize {
    let years = i64::from(end.year()) - i64::from(start.year());
    usize::try_from(2 + years.max(0)).unwrap_or(2)
}

/// Splits `[start, end)` into ordered, gap-free, non-overlapping windows.
///
/// `start == end` yields a single zero-width window; rejecting it is up to the
/// caller.
pub fn chunk(start: NaiveDateTime, end: NaiveDateTime) -> Result<Vec<DateWindow>, ChunkError> {
    if end < start {
        return Err(ChunkError::Inverted { start, end });
    }

    let n = boundary_count(start, end);
    let total = i128::from((end - start).num_seconds());
    let steps = (n - 1) as i128;

    let mut bounds = Vec::with_capacity(n);
    for i in 0..n {
        let b = if i == n - 1 {
            end
        } else {
            // floor division keeps boundaries monotonic
            let offset = total * i as i128 / steps;
            start + Duration::seconds(offset as i64)
        };
        bounds.push(b);
    }

    Ok(bounds
        .windows(2)
        .filter_map(|pair| DateWindow::new(pair[0], pair[1]))
        .collect())
}
