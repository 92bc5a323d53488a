//! Staging rows → observations.
//!
//! Each row is validated, has its dimensions resolved, its measures parsed and
//! is inserted as one observation. Rows that fail validation are skipped and
//! counted; the batch carries on. Store failures abort the batch, leaving the
//! rows already inserted in place.
//!
//! Loading is append-only: feeding the same staging row twice yields two
//! observations.

use std::collections::BTreeMap;

use carebridge_core::{
  observation::{Measurement, NewObservation, SourceIds, YearRange, parse_decimal},
  staging::{StagingRecord, non_blank},
  store::WarehouseStore,
};
use serde::Serialize;
use uuid::Uuid;

use crate::{
  Error, Result,
  resolver::{DimensionResolver, ResolverStats},
};

// ─── Report ──────────────────────────────────────────────────────────────────

/// Why a staging row produced no observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
  /// `DataValue`, `YearStart` or both location columns are blank.
  MissingRequiredField { field: &'static str },
  /// `YearEnd` is before `YearStart`.
  InvalidYearRange { start: i32, end: i32 },
  /// The location fields name nothing that can be resolved.
  UnresolvableReference { location: String },
}

impl SkipReason {
  /// Stable label used for per-reason counts.
  pub fn label(&self) -> &'static str {
    match self {
      Self::MissingRequiredField { .. } => "missing_required_field",
      Self::InvalidYearRange { .. } => "invalid_year_range",
      Self::UnresolvableReference { .. } => "unresolvable_reference",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRow {
  /// Zero-based position in the staging batch.
  pub row:    usize,
  pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
  pub inserted:        usize,
  pub skipped:         usize,
  pub skip_reasons:    Vec<SkippedRow>,
  /// Ids of the inserted observations, in staging order.
  pub observation_ids: Vec<i64>,
  pub dimensions:      ResolverStats,
}

impl LoadReport {
  pub fn reason_counts(&self) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for s in &self.skip_reasons {
      *counts.entry(s.reason.label().to_owned()).or_default() += 1;
    }
    counts
  }

  /// Rows examined; always `inserted + skipped`.
  pub fn processed(&self) -> usize { self.inserted + self.skipped }
}

// ─── Row validation ──────────────────────────────────────────────────────────

fn parse_year(raw: Option<&str>) -> Option<i32> {
  non_blank(raw).and_then(|y| y.trim().parse().ok())
}

/// The required-field and year checks, done before anything is resolved so a
/// rejected row never creates dimension rows.
fn validate(record: &StagingRecord) -> std::result::Result<YearRange, SkipReason> {
  if non_blank(record.data_value.as_deref()).is_none() {
    return Err(SkipReason::MissingRequiredField { field: "DataValue" });
  }
  let Some(start) = parse_year(record.year_start.as_deref()) else {
    return Err(SkipReason::MissingRequiredField { field: "YearStart" });
  };
  if non_blank(record.location_abbr.as_deref()).is_none()
    && non_blank(record.location_desc.as_deref()).is_none()
  {
    return Err(SkipReason::MissingRequiredField { field: "LocationAbbr" });
  }

  let end = parse_year(record.year_end.as_deref()).unwrap_or(start);
  YearRange::new(start, end).map_err(|_| SkipReason::InvalidYearRange { start, end })
}

fn measurement(record: &StagingRecord) -> Measurement {
  let decimal = |v: &Option<String>| v.as_deref().and_then(parse_decimal);
  Measurement {
    value:     decimal(&record.data_value),
    text:      record.data_value.clone(),
    alt_value: decimal(&record.data_value_alt),
    low:       decimal(&record.low_confidence_limit),
    high:      decimal(&record.high_confidence_limit),
    unit:      record.data_value_unit.clone(),
  }
}

// ─── Loader ──────────────────────────────────────────────────────────────────

pub struct FactLoader<'s, S> {
  store:    &'s S,
  resolver: DimensionResolver<'s, S>,
  run_id:   Option<Uuid>,
  progress: LoadReport,
}

impl<'s, S: WarehouseStore> FactLoader<'s, S> {
  pub fn new(store: &'s S) -> Self {
    Self {
      store,
      resolver: DimensionResolver::new(store),
      run_id: None,
      progress: LoadReport::default(),
    }
  }

  /// Stamp every inserted observation with `run_id`.
  pub fn with_run_id(mut self, run_id: Uuid) -> Self {
    self.run_id = Some(run_id);
    self
  }

  /// Rows handled so far by the current or last [`Self::load_batch`] call.
  /// After a store error this is what landed before the failing row.
  pub fn progress(&self) -> &LoadReport { &self.progress }

  /// Load `records` in order.
  pub async fn load_batch(&mut self, records: &[StagingRecord]) -> Result<LoadReport> {
    self.progress = LoadReport::default();

    for (row, record) in records.iter().enumerate() {
      let outcome = match self.load_row(row, record).await {
        Ok(outcome) => outcome,
        Err(e) => {
          self.progress.dimensions = self.resolver.stats().clone();
          return Err(e);
        }
      };
      match outcome {
        Ok(observation_id) => {
          self.progress.inserted += 1;
          self.progress.observation_ids.push(observation_id);
        }
        Err(reason) => {
          match &reason {
            SkipReason::UnresolvableReference { location } => {
              tracing::warn!(row, location = %location, "skipping row: unresolvable location");
            }
            other => {
              tracing::info!(row, reason = other.label(), "skipping row: {other:?}");
            }
          }
          self.progress.skipped += 1;
          self.progress.skip_reasons.push(SkippedRow { row, reason });
        }
      }
    }

    self.progress.dimensions = self.resolver.stats().clone();
    tracing::info!(
      inserted = self.progress.inserted,
      skipped = self.progress.skipped,
      "fact load finished"
    );
    Ok(self.progress.clone())
  }

  /// Outer `Result` is fatal; inner `Err` is a skip.
  async fn load_row(
    &mut self,
    row: usize,
    record: &StagingRecord,
  ) -> Result<std::result::Result<i64, SkipReason>> {
    let years = match validate(record) {
      Ok(years) => years,
      Err(reason) => return Ok(Err(reason)),
    };

    let location = self
      .resolver
      .location(
        record.location_abbr.as_deref(),
        record.location_desc.as_deref(),
        record.geolocation.as_deref(),
      )
      .await?;
    let Some(location) = location else {
      let named = non_blank(record.location_abbr.as_deref())
        .or(non_blank(record.location_desc.as_deref()))
        .unwrap_or_default();
      return Ok(Err(SkipReason::UnresolvableReference { location: named.to_owned() }));
    };

    let topic = self
      .resolver
      .topic(row, record.topic.as_deref(), record.topic_id.as_deref())
      .await?;
    let question = self
      .resolver
      .question(row, record.question.as_deref(), record.question_id.as_deref(), topic)
      .await?;
    let value_type = self
      .resolver
      .value_type(
        record.data_value_type.as_deref(),
        record.data_value_unit.as_deref(),
        record.data_value_type_id.as_deref(),
      )
      .await?;

    let mut stratifications = [None; 3];
    for (slot, pair) in stratifications.iter_mut().zip(record.stratifications()) {
      *slot = self.resolver.stratification(row, pair).await?;
    }

    let mut input = NewObservation::new(topic, question, location, years);
    input.value_type = value_type;
    input.stratifications = stratifications;
    input.measurement = measurement(record);
    input.response = record.response.clone();
    input.footnote_symbol = record.data_value_footnote_symbol.clone();
    input.footnote = record.data_value_footnote.clone();
    input.data_source = record.data_source.clone();
    input.source_ids = SourceIds {
      location_id:   record.location_id.clone(),
      topic_id:      record.topic_id.clone(),
      question_id:   record.question_id.clone(),
      response_id:   record.response_id.clone(),
      value_type_id: record.data_value_type_id.clone(),
    };
    input.run_id = self.run_id;

    let observation = self
      .store
      .insert_observation(input)
      .await
      .map_err(Error::store)?;
    Ok(Ok(observation.observation_id))
  }
}
