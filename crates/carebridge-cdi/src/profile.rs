//! Data-quality summary of a staging batch, computed before loading.

use carebridge_core::{observation::parse_decimal, staging::StagingRecord};
use serde::Serialize;

/// Columns a usable CDI export must carry.
pub const REQUIRED_COLUMNS: [&str; 6] =
  ["Topic", "Question", "LocationDesc", "YearStart", "YearEnd", "DataValue"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnCoverage {
  pub column:  &'static str,
  /// Records with a non-blank value in this column.
  pub present: usize,
  /// `present` as a percentage of all records; 0 for an empty batch.
  pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StagingProfile {
  pub rows:             usize,
  /// One entry per [`REQUIRED_COLUMNS`] item, in that order.
  pub coverage:         Vec<ColumnCoverage>,
  /// Records whose `DataValue` parses as a number.
  pub numeric_values:   usize,
  /// Smallest and largest parseable `YearStart`.
  pub year_start_range: Option<(i32, i32)>,
}

fn required_field<'a>(record: &'a StagingRecord, column: &str) -> Option<&'a str> {
  let value = match column {
    "Topic" => &record.topic,
    "Question" => &record.question,
    "LocationDesc" => &record.location_desc,
    "YearStart" => &record.year_start,
    "YearEnd" => &record.year_end,
    "DataValue" => &record.data_value,
    _ => return None,
  };
  value.as_deref().filter(|v| !v.trim().is_empty())
}

impl StagingProfile {
  pub fn compute(records: &[StagingRecord]) -> Self {
    let rows = records.len();

    let coverage = REQUIRED_COLUMNS
      .iter()
      .map(|&column| {
        let present = records
          .iter()
          .filter(|r| required_field(r, column).is_some())
          .count();
        let percent = if rows == 0 {
          0.0
        } else {
          present as f64 * 100.0 / rows as f64
        };
        ColumnCoverage { column, present, percent }
      })
      .collect();

    let numeric_values = records
      .iter()
      .filter_map(|r| r.data_value.as_deref())
      .filter(|v| parse_decimal(v).is_some())
      .count();

    let year_start_range = records
      .iter()
      .filter_map(|r| r.year_start.as_deref())
      .filter_map(|y| y.trim().parse::<i32>().ok())
      .fold(None, |range, y| match range {
        None => Some((y, y)),
        Some((lo, hi)) => Some((lo.min(y), hi.max(y))),
      });

    Self { rows, coverage, numeric_values, year_start_range }
  }

  /// Emit the profile as structured log events.
  pub fn log(&self) {
    tracing::info!(
      rows = self.rows,
      numeric_values = self.numeric_values,
      year_start_min = self.year_start_range.map(|r| r.0),
      year_start_max = self.year_start_range.map(|r| r.1),
      "staging profile"
    );
    for c in &self.coverage {
      tracing::info!(
        column = c.column,
        present = c.present,
        percent = format_args!("{:.1}", c.percent),
        "column coverage"
      );
    }
  }
}
