//! Derivation rules: canonical products computed from native series.
//!
//! Inputs are aligned with an as-of join: the value of an input at time `t` is
//! the reading whose coverage `[ts, ts + resolution)` contains `t`. Output
//! timestamps are the union of all input timestamps, so a 5-minute input
//! combined with a 15-minute input produces a 5-minute series.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::models::reading::{MarketReading, SeriesKey};

/// How a derived product is computed from its inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum Derivation {
    /// Same values under a canonical name.
    Rename { source: String },

    /// `primary` when it is at or above `threshold`, otherwise `fallback`.
    ThresholdSelect {
        primary: String,
        fallback: String,
        threshold: f64,
    },

    /// `factor * (base + mileage * ratio)`.
    Mileage {
        base: String,
        mileage: String,
        ratio: String,
        factor: f64,
    },
}

impl Derivation {
    /// Native products this rule reads, in evaluation order.
    pub fn inputs(&self) -> Vec<&str> {
        match self {
            Self::Rename { source } => vec![source.as_str()],
            Self::ThresholdSelect {
                primary, fallback, ..
            } => vec![primary.as_str(), fallback.as_str()],
            Self::Mileage {
                base,
                mileage,
                ratio,
                ..
            } => vec![base.as_str(), mileage.as_str(), ratio.as_str()],
        }
    }

    pub(crate) fn inputs_mut(&mut self) -> Vec<&mut String> {
        match self {
            Self::Rename { source } => vec![source],
            Self::ThresholdSelect {
                primary, fallback, ..
            } => vec![primary, fallback],
            Self::Mileage {
                base,
                mileage,
                ratio,
                ..
            } => vec![base, mileage, ratio],
        }
    }

    /// Evaluates the rule for one instant; `values` follows [`Self::inputs`].
    ///
    /// Missing inputs propagate as missing output, except that a missing
    /// primary in a threshold selection falls through to the fallback.
    pub fn evaluate(&self, values: &[Option<f64>]) -> Option<f64> {
        match self {
            Self::Rename { .. } => values.first().copied().flatten(),
            Self::ThresholdSelect { threshold, .. } => {
                let primary = values.first().copied().flatten();
                let fallback = values.get(1).copied().flatten();
                match primary {
                    Some(p) if p >= *threshold => Some(p),
                    _ => fallback,
                }
            }
            Self::Mileage { factor, .. } => {
                let base = values.first().copied().flatten()?;
                let mileage = values.get(1).copied().flatten()?;
                let ratio = values.get(2).copied().flatten()?;
                Some(factor * (base + mileage * ratio))
            }
        }
    }
}

struct AlignedInput {
    points: BTreeMap<NaiveDateTime, Option<f64>>,
    width: Duration,
}

impl AlignedInput {
    fn value_at(&self, t: NaiveDateTime) -> Option<f64> {
        let (ts, price) = self.points.range(..=t).next_back()?;
        if t < *ts + self.width { *price } else { None }
    }
}

/// Applies `rule` to the native readings of one location and labels the
/// result with `output`.
///
/// `width_of` returns the coverage of each native product.
pub fn combine(
    output: &SeriesKey,
    rule: &Derivation,
    natives: &[MarketReading],
    width_of: impl Fn(&str) -> Duration,
) -> Vec<MarketReading> {
    let inputs: Vec<AlignedInput> = rule
        .inputs()
        .into_iter()
        .map(|product| AlignedInput {
            points: natives
                .iter()
                .filter(|r| {
                    r.product == product
                        && r.market == output.market
                        && r.location == output.location
                })
                .map(|r| (r.timestamp, r.price))
                .collect(),
            width: width_of(product),
        })
        .collect();

    let stamps: BTreeSet<NaiveDateTime> = inputs
        .iter()
        .flat_map(|i| i.points.keys().copied())
        .collect();

    stamps
        .into_iter()
        .map(|t| {
            let values: Vec<Option<f64>> = inputs.iter().map(|i| i.value_at(t)).collect();
            MarketReading::new(output, t, rule.evaluate(&values))
        })
        .collect()
}
