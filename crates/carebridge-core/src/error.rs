//! Error types for `carebridge-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("malformed natural-key token: {0:?}")]
  MalformedToken(String),

  #[error("malformed state code: {0:?}")]
  MalformedStateCode(String),

  #[error("year range is inverted: start {start} > end {end}")]
  InvertedYearRange { start: i32, end: i32 },

  #[error("unknown entity kind discriminant: {0:?}")]
  UnknownEntityKind(String),

  #[error("unknown dimension kind: {0:?}")]
  UnknownDimensionKind(String),

  #[error("unknown run status: {0:?}")]
  UnknownRunStatus(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
