//! Health observations, the fact table of the warehouse.
//!
//! An observation is one measured indicator at one location, time range and
//! stratification. Observations are append-only: once loaded, only
//! `updated_at` changes (on a correction pass).

use std::str::FromStr as _;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result, dimension::SurrogateKey};

// ─── Year range ──────────────────────────────────────────────────────────────

/// An inclusive reporting period; `start <= end` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "(i32, i32)", into = "(i32, i32)")]
pub struct YearRange {
  start: i32,
  end:   i32,
}

impl YearRange {
  pub fn new(start: i32, end: i32) -> Result<Self> {
    if start > end {
      return Err(Error::InvertedYearRange { start, end });
    }
    Ok(Self { start, end })
  }

  pub fn single(year: i32) -> Self { Self { start: year, end: year } }

  pub fn start(&self) -> i32 { self.start }

  pub fn end(&self) -> i32 { self.end }
}

impl TryFrom<(i32, i32)> for YearRange {
  type Error = Error;

  fn try_from((start, end): (i32, i32)) -> Result<Self> { Self::new(start, end) }
}

impl From<YearRange> for (i32, i32) {
  fn from(r: YearRange) -> Self { (r.start, r.end) }
}

// ─── Measurement ─────────────────────────────────────────────────────────────

/// A measured value with its confidence interval.
///
/// `value` is `None` when the source text did not parse as a number; the raw
/// text is kept in `text` either way.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Measurement {
  pub value:     Option<Decimal>,
  pub text:      Option<String>,
  pub alt_value: Option<Decimal>,
  pub low:       Option<Decimal>,
  pub high:      Option<Decimal>,
  pub unit:      Option<String>,
}

/// Parse measurement text the way the source publishes it: plain decimals,
/// with scientific notation as a fallback. Anything else is `None`.
///
/// [`Decimal`] holds at most 28 fractional digits; finer values are rounded
/// to that scale rather than rejected. Callers keep the raw text alongside
/// (see [`Measurement::text`]).
pub fn parse_decimal(raw: &str) -> Option<Decimal> {
  let raw = raw.trim();
  if raw.is_empty() {
    return None;
  }
  Decimal::from_str(raw)
    .or_else(|_| Decimal::from_scientific(raw))
    .ok()
}

// ─── Source identifiers ──────────────────────────────────────────────────────

/// Identifiers from the originating dataset, kept for traceability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceIds {
  pub location_id:   Option<String>,
  pub topic_id:      Option<String>,
  pub question_id:   Option<String>,
  pub response_id:   Option<String>,
  pub value_type_id: Option<String>,
}

// ─── Observation ─────────────────────────────────────────────────────────────

/// Input to [`crate::store::WarehouseStore::insert_observation`]. Every key
/// must already exist in its dimension table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewObservation {
  pub topic:           SurrogateKey,
  pub question:        SurrogateKey,
  pub location:        SurrogateKey,
  pub value_type:      Option<SurrogateKey>,
  pub stratifications: [Option<SurrogateKey>; 3],
  pub years:           YearRange,
  pub measurement:     Measurement,
  pub response:        Option<String>,
  pub footnote_symbol: Option<String>,
  pub footnote:        Option<String>,
  pub data_source:     Option<String>,
  pub source_ids:      SourceIds,
  /// The load run that produced this row, if any.
  pub run_id:          Option<Uuid>,
}

impl NewObservation {
  /// Convenience constructor with all optional fields empty.
  pub fn new(
    topic: SurrogateKey,
    question: SurrogateKey,
    location: SurrogateKey,
    years: YearRange,
  ) -> Self {
    Self {
      topic,
      question,
      location,
      value_type: None,
      stratifications: [None; 3],
      years,
      measurement: Measurement::default(),
      response: None,
      footnote_symbol: None,
      footnote: None,
      data_source: None,
      source_ids: SourceIds::default(),
      run_id: None,
    }
  }
}

/// A persisted observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
  pub observation_id:  i64,
  pub topic:           SurrogateKey,
  pub question:        SurrogateKey,
  pub location:        SurrogateKey,
  pub value_type:      Option<SurrogateKey>,
  pub stratifications: [Option<SurrogateKey>; 3],
  pub years:           YearRange,
  pub measurement:     Measurement,
  pub response:        Option<String>,
  pub footnote_symbol: Option<String>,
  pub footnote:        Option<String>,
  pub data_source:     Option<String>,
  pub source_ids:      SourceIds,
  pub run_id:          Option<Uuid>,
  /// Server-assigned; never changes.
  pub loaded_at:       DateTime<Utc>,
  /// Equal to `loaded_at` until a correction pass touches the row.
  pub updated_at:      DateTime<Utc>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn year_range_rejects_inverted() {
    assert!(YearRange::new(2019, 2021).is_ok());
    assert!(YearRange::new(2021, 2021).is_ok());
    assert!(matches!(
      YearRange::new(2022, 2021),
      Err(Error::InvertedYearRange { start: 2022, end: 2021 })
    ));
  }

  #[test]
  fn parse_decimal_accepts_plain_and_scientific() {
    assert_eq!(parse_decimal("12.30").unwrap().to_string(), "12.30");
    assert_eq!(parse_decimal(" -4 ").unwrap(), Decimal::from(-4));
    assert_eq!(parse_decimal("1.5e2").unwrap(), Decimal::from(150));
  }

  #[test]
  fn parse_decimal_rounds_past_max_scale() {
    let tiny = parse_decimal("0.00000000000000000000000000001").unwrap();
    assert_eq!(tiny, Decimal::ZERO);
    assert!(tiny.scale() <= 28);
  }

  #[test]
  fn parse_decimal_rejects_text() {
    assert_eq!(parse_decimal(""), None);
    assert_eq!(parse_decimal("~"), None);
    assert_eq!(parse_decimal("No data"), None);
    assert_eq!(parse_decimal("12.3%"), None);
  }

  #[test]
  fn single_year_range() {
    let r = YearRange::single(2020);
    assert_eq!((r.start(), r.end()), (2020, 2020));
  }
}
