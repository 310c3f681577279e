//! Half-open time windows used for request planning.

use std::fmt;

use chrono::NaiveDateTime;

/// `[start, end)` in market wall-clock time.
///
/// A window may be zero-width (`start == end`); callers that send requests
/// skip or reject those. `start > end` is never constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DateWindow {
    start: NaiveDateTime,
    end: NaiveDateTime,
}

impl DateWindow {
    /// Returns `None` when `end < start`.
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    pub const fn start(&self) -> NaiveDateTime {
        self.start
    }

    pub const fn end(&self) -> NaiveDateTime {
        self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, ts: NaiveDateTime) -> bool {
        self.start <= ts && ts < self.end
    }

    /// Clips the end of the window; `None` if nothing is left.
    pub fn clip_end(&self, limit: NaiveDateTime) -> Option<Self> {
        let end = self.end.min(limit);
        (self.start < end).then_some(Self {
            start: self.start,
            end,
        })
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} .. {})", self.start, self.end)
    }
}

/// One API request's coverage for one product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductWindow {
    pub product: String,
    pub window: DateWindow,
}
