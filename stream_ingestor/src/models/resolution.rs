//! Settlement resolution of a price product.
//!
//! A [`Resolution`] pairs a non-zero amount with a [`ResolutionUnit`] and tells
//! how long a single reading "covers": a reading stamped `t` for a `5m` product
//! covers `[t, t + 5 minutes)`. The catalog stores resolutions as short strings
//! (`"5m"`, `"15m"`, `"1h"`, `"1D"`), which is also what [`fmt::Display`]
//! produces.
//!
//! ```
//! use stream_ingestor::models::resolution::{Resolution, ResolutionUnit};
//!
//! let r: Resolution = "15m".parse().unwrap();
//! assert_eq!(r.unit(), ResolutionUnit::Minute);
//! assert_eq!(r.duration(), chrono::Duration::minutes(15));
//! ```

use std::{fmt, num::NonZeroU32, str::FromStr};

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("empty resolution")]
    Empty,

    #[error("invalid resolution amount in {input:?}")]
    InvalidAmount { input: String },

    #[error("unknown resolution unit {unit:?} (expected m, h or D)")]
    UnknownUnit { unit: String },
}

/// Resolution granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolutionUnit {
    Minute,
    Hour,
    Day,
}

/// amount × unit, e.g. 5-Minute or 1-Hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Resolution {
    amount: NonZeroU32,
    unit: ResolutionUnit,
}

impl Resolution {
    pub const fn new(amount: NonZeroU32, unit: ResolutionUnit) -> Self {
        Self { amount, unit }
    }

    pub const fn minutes(amount: NonZeroU32) -> Self {
        Self::new(amount, ResolutionUnit::Minute)
    }

    pub const fn hours(amount: NonZeroU32) -> Self {
        Self::new(amount, ResolutionUnit::Hour)
    }

    pub const fn amount(&self) -> NonZeroU32 {
        self.amount
    }

    pub const fn unit(&self) -> ResolutionUnit {
        self.unit
    }

    /// Length of time one reading covers.
    pub fn duration(&self) -> Duration {
        let n = i64::from(self.amount.get());
        match self.unit {
            ResolutionUnit::Minute => Duration::minutes(n),
            ResolutionUnit::Hour => Duration::hours(n),
            ResolutionUnit::Day => Duration::days(n),
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let u = match self.unit {
            ResolutionUnit::Minute => "m",
            ResolutionUnit::Hour => "h",
            ResolutionUnit::Day => "D",
        };
        write!(f, "{}{u}", self.amount.get())
    }
}

impl FromStr for Resolution {
    type Err = ResolutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .ok_or(ResolutionError::Empty)?;
        let (digits, unit) = s.split_at(split);
        let amount = digits
            .parse::<u32>()
            .ok()
            .and_then(NonZeroU32::new)
            .ok_or_else(|| ResolutionError::InvalidAmount {
                input: s.to_string(),
            })?;
        let unit = match unit {
            "m" | "min" => ResolutionUnit::Minute,
            "h" | "H" => ResolutionUnit::Hour,
            "D" | "d" => ResolutionUnit::Day,
            other => {
                return Err(ResolutionError::UnknownUnit {
                    unit: other.to_string(),
                });
            }
        };
        Ok(Self::new(amount, unit))
    }
}

impl TryFrom<String> for Resolution {
    type Error = ResolutionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Resolution> for String {
    fn from(value: Resolution) -> Self {
        value.to_string()
    }
}
