//! Codec for the U.S. Chronic Disease Indicators (CDI) CSV export.
//!
//! [`read_staging`] decodes a CSV stream into [`StagingRecord`]s, trimming
//! every field and treating empty cells as absent. [`StagingProfile`]
//! summarises a batch before it is loaded.
//!
//! [`StagingRecord`]: carebridge_core::staging::StagingRecord

pub mod error;
pub mod profile;
pub mod read;

pub use error::{Error, Result};
pub use profile::{ColumnCoverage, REQUIRED_COLUMNS, StagingProfile};
pub use read::{StagingBatch, read_staging, read_staging_file};
