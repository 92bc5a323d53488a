//! Staging records: raw CDI observations awaiting dimensional load.
//!
//! Staging is ephemeral: the whole set is replaced on every load cycle and a
//! record has no identity beyond its row position. Every field is kept as raw
//! optional text; parsing happens in the fact loader.
//!
//! Column names and their order are those of the CDI export and are relied on
//! downstream, so [`STAGING_COLUMNS`], the serde renames and
//! [`StagingRecord::values`] must stay in step.

use serde::{Deserialize, Serialize};

/// The CDI column names, in source order.
pub const STAGING_COLUMNS: [&str; 34] = [
  "YearStart",
  "YearEnd",
  "LocationAbbr",
  "LocationDesc",
  "DataSource",
  "Topic",
  "Question",
  "Response",
  "DataValueUnit",
  "DataValueType",
  "DataValue",
  "DataValueAlt",
  "DataValueFootnoteSymbol",
  "DataValueFootnote",
  "LowConfidenceLimit",
  "HighConfidenceLimit",
  "StratificationCategory1",
  "Stratification1",
  "StratificationCategory2",
  "Stratification2",
  "StratificationCategory3",
  "Stratification3",
  "Geolocation",
  "LocationID",
  "TopicID",
  "QuestionID",
  "ResponseID",
  "DataValueTypeID",
  "StratificationCategoryID1",
  "StratificationID1",
  "StratificationCategoryID2",
  "StratificationID2",
  "StratificationCategoryID3",
  "StratificationID3",
];

/// One raw row of the CDI dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct StagingRecord {
  pub year_start:                  Option<String>,
  pub year_end:                    Option<String>,
  pub location_abbr:               Option<String>,
  pub location_desc:               Option<String>,
  pub data_source:                 Option<String>,
  pub topic:                       Option<String>,
  pub question:                    Option<String>,
  pub response:                    Option<String>,
  pub data_value_unit:             Option<String>,
  pub data_value_type:             Option<String>,
  pub data_value:                  Option<String>,
  pub data_value_alt:              Option<String>,
  pub data_value_footnote_symbol:  Option<String>,
  pub data_value_footnote:         Option<String>,
  pub low_confidence_limit:        Option<String>,
  pub high_confidence_limit:       Option<String>,
  pub stratification_category1:    Option<String>,
  pub stratification1:             Option<String>,
  pub stratification_category2:    Option<String>,
  pub stratification2:             Option<String>,
  pub stratification_category3:    Option<String>,
  pub stratification3:             Option<String>,
  pub geolocation:                 Option<String>,
  #[serde(rename = "LocationID")]
  pub location_id:                 Option<String>,
  #[serde(rename = "TopicID")]
  pub topic_id:                    Option<String>,
  #[serde(rename = "QuestionID")]
  pub question_id:                 Option<String>,
  #[serde(rename = "ResponseID")]
  pub response_id:                 Option<String>,
  #[serde(rename = "DataValueTypeID")]
  pub data_value_type_id:          Option<String>,
  #[serde(rename = "StratificationCategoryID1")]
  pub stratification_category_id1: Option<String>,
  #[serde(rename = "StratificationID1")]
  pub stratification_id1:          Option<String>,
  #[serde(rename = "StratificationCategoryID2")]
  pub stratification_category_id2: Option<String>,
  #[serde(rename = "StratificationID2")]
  pub stratification_id2:          Option<String>,
  #[serde(rename = "StratificationCategoryID3")]
  pub stratification_category_id3: Option<String>,
  #[serde(rename = "StratificationID3")]
  pub stratification_id3:          Option<String>,
}

/// One stratification slot of a staging record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StratificationPair<'a> {
  pub category:      Option<&'a str>,
  pub value:         Option<&'a str>,
  pub category_code: Option<&'a str>,
  pub value_code:    Option<&'a str>,
}

impl StagingRecord {
  /// Field values in [`STAGING_COLUMNS`] order.
  pub fn values(&self) -> [Option<&str>; 34] {
    [
      self.year_start.as_deref(),
      self.year_end.as_deref(),
      self.location_abbr.as_deref(),
      self.location_desc.as_deref(),
      self.data_source.as_deref(),
      self.topic.as_deref(),
      self.question.as_deref(),
      self.response.as_deref(),
      self.data_value_unit.as_deref(),
      self.data_value_type.as_deref(),
      self.data_value.as_deref(),
      self.data_value_alt.as_deref(),
      self.data_value_footnote_symbol.as_deref(),
      self.data_value_footnote.as_deref(),
      self.low_confidence_limit.as_deref(),
      self.high_confidence_limit.as_deref(),
      self.stratification_category1.as_deref(),
      self.stratification1.as_deref(),
      self.stratification_category2.as_deref(),
      self.stratification2.as_deref(),
      self.stratification_category3.as_deref(),
      self.stratification3.as_deref(),
      self.geolocation.as_deref(),
      self.location_id.as_deref(),
      self.topic_id.as_deref(),
      self.question_id.as_deref(),
      self.response_id.as_deref(),
      self.data_value_type_id.as_deref(),
      self.stratification_category_id1.as_deref(),
      self.stratification_id1.as_deref(),
      self.stratification_category_id2.as_deref(),
      self.stratification_id2.as_deref(),
      self.stratification_category_id3.as_deref(),
      self.stratification_id3.as_deref(),
    ]
  }

  /// Rebuild a record from values in [`STAGING_COLUMNS`] order.
  pub fn from_values(values: [Option<String>; 34]) -> Self {
    let [
      year_start,
      year_end,
      location_abbr,
      location_desc,
      data_source,
      topic,
      question,
      response,
      data_value_unit,
      data_value_type,
      data_value,
      data_value_alt,
      data_value_footnote_symbol,
      data_value_footnote,
      low_confidence_limit,
      high_confidence_limit,
      stratification_category1,
      stratification1,
      stratification_category2,
      stratification2,
      stratification_category3,
      stratification3,
      geolocation,
      location_id,
      topic_id,
      question_id,
      response_id,
      data_value_type_id,
      stratification_category_id1,
      stratification_id1,
      stratification_category_id2,
      stratification_id2,
      stratification_category_id3,
      stratification_id3,
    ] = values;

    Self {
      year_start,
      year_end,
      location_abbr,
      location_desc,
      data_source,
      topic,
      question,
      response,
      data_value_unit,
      data_value_type,
      data_value,
      data_value_alt,
      data_value_footnote_symbol,
      data_value_footnote,
      low_confidence_limit,
      high_confidence_limit,
      stratification_category1,
      stratification1,
      stratification_category2,
      stratification2,
      stratification_category3,
      stratification3,
      geolocation,
      location_id,
      topic_id,
      question_id,
      response_id,
      data_value_type_id,
      stratification_category_id1,
      stratification_id1,
      stratification_category_id2,
      stratification_id2,
      stratification_category_id3,
      stratification_id3,
    }
  }

  /// The three stratification slots, in order.
  pub fn stratifications(&self) -> [StratificationPair<'_>; 3] {
    [
      StratificationPair {
        category:      self.stratification_category1.as_deref(),
        value:         self.stratification1.as_deref(),
        category_code: self.stratification_category_id1.as_deref(),
        value_code:    self.stratification_id1.as_deref(),
      },
      StratificationPair {
        category:      self.stratification_category2.as_deref(),
        value:         self.stratification2.as_deref(),
        category_code: self.stratification_category_id2.as_deref(),
        value_code:    self.stratification_id2.as_deref(),
      },
      StratificationPair {
        category:      self.stratification_category3.as_deref(),
        value:         self.stratification3.as_deref(),
        category_code: self.stratification_category_id3.as_deref(),
        value_code:    self.stratification_id3.as_deref(),
      },
    ]
  }
}

/// Treat blank text as absent.
pub fn non_blank(value: Option<&str>) -> Option<&str> {
  value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn numbered() -> StagingRecord {
    let values: [Option<String>; 34] =
      std::array::from_fn(|i| Some(format!("v{i}")));
    StagingRecord::from_values(values)
  }

  #[test]
  fn values_follow_column_order() {
    let record = numbered();
    for (i, v) in record.values().iter().enumerate() {
      assert_eq!(*v, Some(format!("v{i}").as_str()), "column {}", STAGING_COLUMNS[i]);
    }
    assert_eq!(record.location_abbr.as_deref(), Some("v2"));
    assert_eq!(record.stratification_id3.as_deref(), Some("v33"));
  }

  #[test]
  fn serde_names_match_columns() {
    let json = serde_json::to_value(numbered()).unwrap();
    let object = json.as_object().unwrap();
    assert_eq!(object.len(), STAGING_COLUMNS.len());
    for (i, column) in STAGING_COLUMNS.iter().enumerate() {
      assert_eq!(object[*column], format!("v{i}"), "column {column}");
    }
  }

  #[test]
  fn stratification_slots() {
    let record = StagingRecord {
      stratification_category1: Some("Sex".into()),
      stratification1: Some("Female".into()),
      stratification_id1: Some("SEXF".into()),
      ..Default::default()
    };
    let [first, second, _] = record.stratifications();
    assert_eq!(first.category, Some("Sex"));
    assert_eq!(first.value, Some("Female"));
    assert_eq!(first.value_code, Some("SEXF"));
    assert_eq!(second.value, None);
  }

  #[test]
  fn non_blank_filters_whitespace() {
    assert_eq!(non_blank(Some("  ")), None);
    assert_eq!(non_blank(None), None);
    assert_eq!(non_blank(Some("x")), Some("x"));
  }
}
