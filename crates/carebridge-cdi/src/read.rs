//! CSV → [`StagingRecord`] decoding.

use std::{fs::File, io::Read, path::Path};

use carebridge_core::staging::{STAGING_COLUMNS, StagingRecord};
use csv::{ReaderBuilder, StringRecord, Trim};

use crate::{Error, Result, profile::REQUIRED_COLUMNS};

/// The decoded contents of one CDI export.
#[derive(Debug, Clone, Default)]
pub struct StagingBatch {
  pub records:         Vec<StagingRecord>,
  /// Required columns the header did not contain. Their fields decode as
  /// absent on every record.
  pub missing_columns: Vec<&'static str>,
  /// Header names that are not CDI columns; their values are dropped.
  pub unknown_columns: Vec<String>,
}

/// Decode a CDI CSV stream.
///
/// Columns are matched by header name, so their order in the file does not
/// matter. Every field is trimmed and empty fields become `None`. Values are
/// otherwise kept as text; parsing is the fact loader's job.
pub fn read_staging(input: impl Read) -> Result<StagingBatch> {
  let mut reader = ReaderBuilder::new().trim(Trim::All).from_reader(input);
  let headers = reader.headers()?.clone();

  let missing_columns: Vec<&'static str> = REQUIRED_COLUMNS
    .iter()
    .copied()
    .filter(|c| !headers.iter().any(|h| h == *c))
    .collect();
  let unknown_columns: Vec<String> = headers
    .iter()
    .filter(|h| !STAGING_COLUMNS.contains(h))
    .map(str::to_owned)
    .collect();

  for column in &missing_columns {
    tracing::warn!(column, "required CDI column missing from header");
  }
  if !unknown_columns.is_empty() {
    tracing::debug!(?unknown_columns, "ignoring non-CDI columns");
  }

  let mut records = Vec::new();
  let mut record = StringRecord::new();
  while reader.read_record(&mut record)? {
    records.push(record.deserialize(Some(&headers))?);
  }

  tracing::debug!(rows = records.len(), "decoded CDI staging rows");
  Ok(StagingBatch { records, missing_columns, unknown_columns })
}

/// [`read_staging`] over a file on disk.
pub fn read_staging_file(path: impl AsRef<Path>) -> Result<StagingBatch> {
  let path = path.as_ref();
  let file = File::open(path).map_err(|source| Error::Open {
    path: path.to_path_buf(),
    source,
  })?;
  read_staging(file)
}

#[cfg(test)]
mod tests {
  use std::io::Write as _;

  use super::*;

  const HEADER: &str = "YearStart,YearEnd,LocationAbbr,LocationDesc,DataSource,Topic,\
    Question,Response,DataValueUnit,DataValueType,DataValue,DataValueAlt,\
    DataValueFootnoteSymbol,DataValueFootnote,LowConfidenceLimit,HighConfidenceLimit,\
    StratificationCategory1,Stratification1,StratificationCategory2,Stratification2,\
    StratificationCategory3,Stratification3,Geolocation,LocationID,TopicID,QuestionID,\
    ResponseID,DataValueTypeID,StratificationCategoryID1,StratificationID1,\
    StratificationCategoryID2,StratificationID2,StratificationCategoryID3,StratificationID3";

  #[test]
  fn full_header_decodes_every_column() {
    let row = "2020,2021,CA,California,BRFSS,Diabetes,Diabetes prevalence,,%,\
      Crude Prevalence,12.30,12.3,,,10.1,14.7,Gender,Female,,,,,\"(37.6, -120.9)\",\
      06,DIA,DIA01,,CRDPREV,GENDER,GENF,,,,";
    let input = format!("{HEADER}\n{row}\n");

    let batch = read_staging(input.as_bytes()).unwrap();
    assert!(batch.missing_columns.is_empty());
    assert!(batch.unknown_columns.is_empty());
    assert_eq!(batch.records.len(), 1);

    let r = &batch.records[0];
    assert_eq!(r.year_start.as_deref(), Some("2020"));
    assert_eq!(r.location_abbr.as_deref(), Some("CA"));
    assert_eq!(r.data_value.as_deref(), Some("12.30"));
    assert_eq!(r.stratification1.as_deref(), Some("Female"));
    assert_eq!(r.geolocation.as_deref(), Some("(37.6, -120.9)"));
    assert_eq!(r.location_id.as_deref(), Some("06"));
    assert_eq!(r.stratification_id1.as_deref(), Some("GENF"));
    assert_eq!(r.response, None);
    assert_eq!(r.stratification_category2, None);
  }

  #[test]
  fn fields_are_trimmed_and_blanks_become_none() {
    let input = "Topic , DataValue,YearStart\n  Asthma  ,   ,2019\n";
    let batch = read_staging(input.as_bytes()).unwrap();

    let r = &batch.records[0];
    assert_eq!(r.topic.as_deref(), Some("Asthma"));
    assert_eq!(r.data_value, None);
    assert_eq!(r.year_start.as_deref(), Some("2019"));
  }

  #[test]
  fn columns_match_by_name_not_position() {
    let input = "DataValue,Topic,YearStart\n7.5,Obesity,2018\n";
    let batch = read_staging(input.as_bytes()).unwrap();

    let r = &batch.records[0];
    assert_eq!(r.data_value.as_deref(), Some("7.5"));
    assert_eq!(r.topic.as_deref(), Some("Obesity"));
  }

  #[test]
  fn reports_missing_and_unknown_columns() {
    let input = "Topic,YearStart,Comment\nAsthma,2019,hello\n";
    let batch = read_staging(input.as_bytes()).unwrap();

    assert_eq!(
      batch.missing_columns,
      vec!["Question", "LocationDesc", "YearEnd", "DataValue"]
    );
    assert_eq!(batch.unknown_columns, vec!["Comment".to_owned()]);
    assert_eq!(batch.records.len(), 1);
  }

  #[test]
  fn ragged_row_is_an_error() {
    let input = "Topic,YearStart\nAsthma,2019,extra\n";
    assert!(matches!(read_staging(input.as_bytes()), Err(Error::Csv(_))));
  }

  #[test]
  fn reads_from_disk() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "Topic,YearStart,DataValue").unwrap();
    writeln!(file, "Asthma,2019,9.1").unwrap();
    writeln!(file, "Obesity,2020,30").unwrap();

    let batch = read_staging_file(file.path()).unwrap();
    assert_eq!(batch.records.len(), 2);
  }

  #[test]
  fn missing_file_names_the_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.csv");
    match read_staging_file(&path) {
      Err(Error::Open { path: p, .. }) => assert_eq!(p, path),
      other => panic!("expected Open error, got {other:?}"),
    }
  }
}
