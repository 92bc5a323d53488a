//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are RFC 3339 strings, calendar dates are `YYYY-MM-DD`, UUIDs
//! are hyphenated lowercase strings and decimals are their canonical text
//! form, so no precision is lost to SQLite's REAL affinity.

use std::str::FromStr as _;

use carebridge_core::{
  bridge::BridgeRow,
  dimension::{DimensionKind, SurrogateKey, UNKNOWN_NATURAL_KEY},
  geo::StateCode,
  natural_key::{EntityKind, EntityToken},
  observation::{Measurement, Observation, SourceIds, YearRange},
  run::{LoadRun, RunStatus},
  store::{LinkedObservation, StratificationLabel},
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ────────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── NaiveDate ────────────────────────────────────────────────────────────────

pub fn encode_date(d: NaiveDate) -> String { d.format("%Y-%m-%d").to_string() }

pub fn decode_date(s: &str) -> Result<NaiveDate> {
  NaiveDate::parse_from_str(s, "%Y-%m-%d")
    .map_err(|e| Error::DateParse(format!("{s:?}: {e}")))
}

// ─── Decimal ──────────────────────────────────────────────────────────────────

pub fn encode_decimal(d: Option<Decimal>) -> Option<String> {
  d.map(|d| d.to_string())
}

pub fn decode_decimal(s: Option<String>) -> Result<Option<Decimal>> {
  s.map(|s| {
    Decimal::from_str(&s).map_err(|e| Error::DecimalParse(format!("{s:?}: {e}")))
  })
  .transpose()
}

// ─── Dimension tables ─────────────────────────────────────────────────────────

/// Where a dimension kind lives in the schema.
#[derive(Debug, Clone, Copy)]
pub struct DimensionTable {
  pub table:      &'static str,
  pub id_column:  &'static str,
  pub key_column: &'static str,
}

pub fn dimension_table(kind: DimensionKind) -> DimensionTable {
  let (table, id_column, key_column) = match kind {
    DimensionKind::Topic => ("dim_topic", "topic_id", "topic_name"),
    DimensionKind::Question => ("dim_question", "question_id", "question_text"),
    DimensionKind::Location => ("dim_location", "location_id", "location_abbr"),
    DimensionKind::StratificationCategory => {
      ("dim_stratification_category", "category_id", "category_name")
    }
    DimensionKind::Stratification => {
      ("dim_stratification", "stratification_id", "stratification_name")
    }
    DimensionKind::ValueType => ("dim_value_type", "value_type_id", "type_name"),
  };
  DimensionTable { table, id_column, key_column }
}

// ─── Observation rows ─────────────────────────────────────────────────────────

/// Column list matching [`RawObservation::from_row`], qualified with the
/// `f` alias for `fact_observation`.
pub const OBSERVATION_COLUMNS: &str = "\
  f.observation_id, f.topic_id, f.question_id, f.location_id, f.value_type_id, \
  f.stratification_1_id, f.stratification_2_id, f.stratification_3_id, \
  f.year_start, f.year_end, \
  f.data_value, f.data_value_text, f.data_value_alt, \
  f.low_confidence_limit, f.high_confidence_limit, f.data_value_unit, \
  f.response, f.footnote_symbol, f.footnote, f.data_source, \
  f.source_location_id, f.source_topic_id, f.source_question_id, \
  f.source_response_id, f.source_value_type_id, \
  f.run_id, f.loaded_at, f.updated_at";

/// Number of columns in [`OBSERVATION_COLUMNS`].
pub const OBSERVATION_COLUMN_COUNT: usize = 28;

/// Raw column values read from a `fact_observation` row.
pub struct RawObservation {
  pub observation_id:        i64,
  pub topic_id:              i64,
  pub question_id:           i64,
  pub location_id:           i64,
  pub value_type_id:         Option<i64>,
  pub stratification_ids:    [Option<i64>; 3],
  pub year_start:            i32,
  pub year_end:              i32,
  pub data_value:            Option<String>,
  pub data_value_text:       Option<String>,
  pub data_value_alt:        Option<String>,
  pub low_confidence_limit:  Option<String>,
  pub high_confidence_limit: Option<String>,
  pub data_value_unit:       Option<String>,
  pub response:              Option<String>,
  pub footnote_symbol:       Option<String>,
  pub footnote:              Option<String>,
  pub data_source:           Option<String>,
  pub source_ids:            [Option<String>; 5],
  pub run_id:                Option<String>,
  pub loaded_at:             String,
  pub updated_at:            String,
}

impl RawObservation {
  /// Read the [`OBSERVATION_COLUMNS`] block starting at column `at`.
  pub fn from_row(row: &rusqlite::Row<'_>, at: usize) -> rusqlite::Result<Self> {
    Ok(Self {
      observation_id:        row.get(at)?,
      topic_id:              row.get(at + 1)?,
      question_id:           row.get(at + 2)?,
      location_id:           row.get(at + 3)?,
      value_type_id:         row.get(at + 4)?,
      stratification_ids:    [row.get(at + 5)?, row.get(at + 6)?, row.get(at + 7)?],
      year_start:            row.get(at + 8)?,
      year_end:              row.get(at + 9)?,
      data_value:            row.get(at + 10)?,
      data_value_text:       row.get(at + 11)?,
      data_value_alt:        row.get(at + 12)?,
      low_confidence_limit:  row.get(at + 13)?,
      high_confidence_limit: row.get(at + 14)?,
      data_value_unit:       row.get(at + 15)?,
      response:              row.get(at + 16)?,
      footnote_symbol:       row.get(at + 17)?,
      footnote:              row.get(at + 18)?,
      data_source:           row.get(at + 19)?,
      source_ids:            [
        row.get(at + 20)?,
        row.get(at + 21)?,
        row.get(at + 22)?,
        row.get(at + 23)?,
        row.get(at + 24)?,
      ],
      run_id:                row.get(at + 25)?,
      loaded_at:             row.get(at + 26)?,
      updated_at:            row.get(at + 27)?,
    })
  }

  pub fn into_observation(self) -> Result<Observation> {
    let [location_id, topic_id, question_id, response_id, value_type_id] =
      self.source_ids;

    Ok(Observation {
      observation_id:  self.observation_id,
      topic:           SurrogateKey(self.topic_id),
      question:        SurrogateKey(self.question_id),
      location:        SurrogateKey(self.location_id),
      value_type:      self.value_type_id.map(SurrogateKey),
      stratifications: self.stratification_ids.map(|id| id.map(SurrogateKey)),
      years:           YearRange::new(self.year_start, self.year_end)?,
      measurement:     Measurement {
        value:     decode_decimal(self.data_value)?,
        text:      self.data_value_text,
        alt_value: decode_decimal(self.data_value_alt)?,
        low:       decode_decimal(self.low_confidence_limit)?,
        high:      decode_decimal(self.high_confidence_limit)?,
        unit:      self.data_value_unit,
      },
      response:        self.response,
      footnote_symbol: self.footnote_symbol,
      footnote:        self.footnote,
      data_source:     self.data_source,
      source_ids:      SourceIds {
        location_id,
        topic_id,
        question_id,
        response_id,
        value_type_id,
      },
      run_id:          self.run_id.as_deref().map(decode_uuid).transpose()?,
      loaded_at:       decode_dt(&self.loaded_at)?,
      updated_at:      decode_dt(&self.updated_at)?,
    })
  }
}

// ─── Bridge rows ──────────────────────────────────────────────────────────────

pub struct RawBridgeRow {
  pub bridge_id:    i64,
  pub entity_kind:  String,
  pub customer_key: Option<String>,
  pub account_key:  Option<String>,
  pub state_code:   String,
  pub last_updated: String,
}

impl RawBridgeRow {
  pub fn from_row(row: &rusqlite::Row<'_>, at: usize) -> rusqlite::Result<Self> {
    Ok(Self {
      bridge_id:    row.get(at)?,
      entity_kind:  row.get(at + 1)?,
      customer_key: row.get(at + 2)?,
      account_key:  row.get(at + 3)?,
      state_code:   row.get(at + 4)?,
      last_updated: row.get(at + 5)?,
    })
  }

  pub fn into_bridge_row(self) -> Result<BridgeRow> {
    Ok(BridgeRow {
      bridge_id:    self.bridge_id,
      kind:         EntityKind::parse(&self.entity_kind)?,
      customer_key: self.customer_key.as_deref().map(EntityToken::parse).transpose()?,
      account_key:  self.account_key.as_deref().map(EntityToken::parse).transpose()?,
      state:        StateCode::parse(&self.state_code)?,
      last_updated: decode_dt(&self.last_updated)?,
    })
  }
}

// ─── Linked observations ──────────────────────────────────────────────────────

/// One row of the bridge ⋈ location ⋈ observation query. The observation
/// block comes first, then the bridge block, then the labels.
pub struct RawLinkedObservation {
  pub observation:          RawObservation,
  pub bridge:               RawBridgeRow,
  pub location_description: Option<String>,
  pub topic:                String,
  pub question:             String,
  pub value_type:           Option<String>,
  /// (category, value) per slot; either side may be absent after the LEFT
  /// JOINs.
  pub stratifications:      [(Option<String>, Option<String>); 3],
}

impl RawLinkedObservation {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    let at = OBSERVATION_COLUMN_COUNT;
    let labels = at + 6;
    Ok(Self {
      observation:          RawObservation::from_row(row, 0)?,
      bridge:               RawBridgeRow::from_row(row, at)?,
      location_description: row.get(labels)?,
      topic:                row.get(labels + 1)?,
      question:             row.get(labels + 2)?,
      value_type:           row.get(labels + 3)?,
      stratifications:      [
        (row.get(labels + 4)?, row.get(labels + 5)?),
        (row.get(labels + 6)?, row.get(labels + 7)?),
        (row.get(labels + 8)?, row.get(labels + 9)?),
      ],
    })
  }

  pub fn into_linked(self) -> Result<LinkedObservation> {
    let bridge = self.bridge.into_bridge_row()?;
    let token = match bridge.token() {
      Some(t) => t.clone(),
      None => {
        return Err(Error::Core(carebridge_core::Error::MalformedToken(format!(
          "bridge row {} has no {} key",
          bridge.bridge_id, bridge.kind
        ))));
      }
    };

    let stratifications = self
      .stratifications
      .into_iter()
      .filter_map(|(category, value)| {
        value.map(|value| StratificationLabel {
          category: category.unwrap_or_else(|| UNKNOWN_NATURAL_KEY.to_owned()),
          value,
        })
      })
      .collect();

    Ok(LinkedObservation {
      bridge_id: bridge.bridge_id,
      kind: bridge.kind,
      token,
      state: bridge.state,
      location_description: self.location_description,
      topic: self.topic,
      question: self.question,
      value_type: self.value_type,
      stratifications,
      observation: self.observation.into_observation()?,
    })
  }
}

// ─── Load runs ────────────────────────────────────────────────────────────────

/// Column list matching [`RawLoadRun::from_row`].
pub const LOAD_RUN_COLUMNS: &str = "run_id, started_at, finished_at, status, \
  staging_rows, inserted, skipped, skip_counts, bridge_rows, failure";

pub struct RawLoadRun {
  pub run_id:       String,
  pub started_at:   String,
  pub finished_at:  Option<String>,
  pub status:       String,
  pub staging_rows: i64,
  pub inserted:     i64,
  pub skipped:      i64,
  pub skip_counts:  String,
  pub bridge_rows:  i64,
  pub failure:      Option<String>,
}

impl RawLoadRun {
  pub fn from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      run_id:       r.get(0)?,
      started_at:   r.get(1)?,
      finished_at:  r.get(2)?,
      status:       r.get(3)?,
      staging_rows: r.get(4)?,
      inserted:     r.get(5)?,
      skipped:      r.get(6)?,
      skip_counts:  r.get(7)?,
      bridge_rows:  r.get(8)?,
      failure:      r.get(9)?,
    })
  }

  pub fn into_run(self) -> Result<LoadRun> {
    Ok(LoadRun {
      run_id:       decode_uuid(&self.run_id)?,
      started_at:   decode_dt(&self.started_at)?,
      finished_at:  self.finished_at.as_deref().map(decode_dt).transpose()?,
      status:       RunStatus::parse(&self.status)?,
      staging_rows: count(self.staging_rows),
      inserted:     count(self.inserted),
      skipped:      count(self.skipped),
      skip_counts:  serde_json::from_str(&self.skip_counts)?,
      bridge_rows:  count(self.bridge_rows),
      failure:      self.failure,
    })
  }
}

/// SQLite hands counts back as `i64`; negative values never occur.
pub fn count(n: i64) -> usize { usize::try_from(n).unwrap_or(0) }
