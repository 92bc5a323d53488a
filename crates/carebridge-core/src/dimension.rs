//! Dimension tables of the health-statistics warehouse.
//!
//! Dimension rows are append-only reference data. Each has a surrogate key
//! generated by the store and a natural key that is unique within its table.
//! Once a row exists its attributes are never overwritten: the first load to
//! mention a natural key decides its extra attributes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result, geo::StateCode};

// ─── Keys ────────────────────────────────────────────────────────────────────

/// A store-generated dimension identity.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SurrogateKey(pub i64);

impl SurrogateKey {
  /// The seeded "Unknown" member of every dimension except Location.
  pub const UNKNOWN: Self = Self(1);
}

impl fmt::Display for SurrogateKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Display::fmt(&self.0, f)
  }
}

/// Natural key of the seeded "Unknown" members.
pub const UNKNOWN_NATURAL_KEY: &str = "Unknown";

// ─── Kinds ───────────────────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DimensionKind {
  Topic,
  Question,
  Location,
  StratificationCategory,
  Stratification,
  ValueType,
}

impl DimensionKind {
  pub const ALL: [Self; 6] = [
    Self::Topic,
    Self::Question,
    Self::Location,
    Self::StratificationCategory,
    Self::Stratification,
    Self::ValueType,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Topic => "topic",
      Self::Question => "question",
      Self::Location => "location",
      Self::StratificationCategory => "stratification_category",
      Self::Stratification => "stratification",
      Self::ValueType => "value_type",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    Self::ALL
      .into_iter()
      .find(|k| k.as_str() == s)
      .ok_or_else(|| Error::UnknownDimensionKind(s.to_owned()))
  }

  /// Whether the table carries a seeded "Unknown" member at
  /// [`SurrogateKey::UNKNOWN`]. Location deliberately has none.
  pub fn has_unknown_member(self) -> bool { !matches!(self, Self::Location) }
}

impl fmt::Display for DimensionKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

// ─── Entries ─────────────────────────────────────────────────────────────────

/// A dimension row to find or create. The natural key identifies the row; the
/// remaining fields are only written when the row is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DimensionEntry {
  Topic {
    name: String,
    code: Option<String>,
  },
  Question {
    text:  String,
    code:  Option<String>,
    /// Parent topic; must already be resolved.
    topic: SurrogateKey,
  },
  Location {
    abbr:        StateCode,
    description: Option<String>,
    geolocation: Option<String>,
  },
  StratificationCategory {
    name: String,
    code: Option<String>,
  },
  Stratification {
    name:     String,
    code:     Option<String>,
    /// Parent category; must already be resolved.
    category: SurrogateKey,
  },
  ValueType {
    name: String,
    unit: Option<String>,
    code: Option<String>,
  },
}

impl DimensionEntry {
  pub fn kind(&self) -> DimensionKind {
    match self {
      Self::Topic { .. } => DimensionKind::Topic,
      Self::Question { .. } => DimensionKind::Question,
      Self::Location { .. } => DimensionKind::Location,
      Self::StratificationCategory { .. } => DimensionKind::StratificationCategory,
      Self::Stratification { .. } => DimensionKind::Stratification,
      Self::ValueType { .. } => DimensionKind::ValueType,
    }
  }

  /// The value that must be unique within the entry's table.
  pub fn natural_key(&self) -> &str {
    match self {
      Self::Topic { name, .. }
      | Self::StratificationCategory { name, .. }
      | Self::Stratification { name, .. }
      | Self::ValueType { name, .. } => name,
      Self::Question { text, .. } => text,
      Self::Location { abbr, .. } => abbr.as_str(),
    }
  }
}

/// Outcome of a find-or-create call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
  pub key:     SurrogateKey,
  /// `true` if this call inserted the row.
  pub created: bool,
}
