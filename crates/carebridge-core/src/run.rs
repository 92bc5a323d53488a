//! Load-run audit records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
  Running,
  Completed,
  Failed,
}

impl RunStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Running => "running",
      Self::Completed => "completed",
      Self::Failed => "failed",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "running" => Ok(Self::Running),
      "completed" => Ok(Self::Completed),
      "failed" => Ok(Self::Failed),
      other => Err(Error::UnknownRunStatus(other.to_owned())),
    }
  }
}

/// One invocation of the batch pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadRun {
  pub run_id:       Uuid,
  pub started_at:   DateTime<Utc>,
  pub finished_at:  Option<DateTime<Utc>>,
  pub status:       RunStatus,
  pub staging_rows: usize,
  pub inserted:     usize,
  pub skipped:      usize,
  /// Skipped-row counts keyed by reason label.
  pub skip_counts:  BTreeMap<String, usize>,
  pub bridge_rows:  usize,
  pub failure:      Option<String>,
}

impl LoadRun {
  /// A fresh run in the `Running` state.
  pub fn start() -> Self {
    Self {
      run_id:       Uuid::new_v4(),
      started_at:   Utc::now(),
      finished_at:  None,
      status:       RunStatus::Running,
      staging_rows: 0,
      inserted:     0,
      skipped:      0,
      skip_counts:  BTreeMap::new(),
      bridge_rows:  0,
      failure:      None,
    }
  }

  pub fn complete(&mut self) {
    self.status = RunStatus::Completed;
    self.finished_at = Some(Utc::now());
  }

  pub fn fail(&mut self, message: impl Into<String>) {
    self.status = RunStatus::Failed;
    self.failure = Some(message.into());
    self.finished_at = Some(Utc::now());
  }
}
