//! One audited batch: stage, load, bridge, verify.

use carebridge_cdi::StagingProfile;
use carebridge_core::{
  bridge::BridgeWriteMode, run::LoadRun, staging::StagingRecord, store::WarehouseStore,
};
use serde::{Deserialize, Serialize};
use tracing::Instrument as _;

use crate::{
  Error, Result,
  bridge::{BridgeBuilder, BridgeReport},
  loader::{FactLoader, LoadReport},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOptions {
  /// Load the staging table into observations.
  pub load_facts:     bool,
  /// Rebuild the geographic bridge from the business tables.
  pub rebuild_bridge: bool,
  pub bridge_mode:    BridgeWriteMode,
}

impl Default for BatchOptions {
  fn default() -> Self {
    Self {
      load_facts:     true,
      rebuild_bridge: true,
      bridge_mode:    BridgeWriteMode::Refresh,
    }
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
  /// The audit record as saved at the end of the run.
  pub run:                   LoadRun,
  pub load:                  Option<LoadReport>,
  pub bridge:                Option<BridgeReport>,
  /// Observations with a dangling dimension key after the run.
  pub orphaned_observations: usize,
}

/// Run one batch against `store`.
///
/// If `staging` is given it replaces the staging table first; otherwise the
/// rows already staged are loaded. The run is recorded in the store as
/// `running`, then `completed` or `failed`. A failure leaves whatever was
/// already written in place and is returned after the run is marked failed.
pub async fn run_batch<S: WarehouseStore>(
  store: &S,
  staging: Option<Vec<StagingRecord>>,
  options: BatchOptions,
) -> Result<BatchOutcome> {
  let mut run = LoadRun::start();
  store.save_run(&run).await.map_err(Error::store)?;

  let span = tracing::info_span!("batch", run_id = %run.run_id);
  let result = execute(store, staging, options, &mut run)
    .instrument(span)
    .await;

  match result {
    Ok((load, bridge, orphaned_observations)) => {
      run.complete();
      store.save_run(&run).await.map_err(Error::store)?;
      tracing::info!(
        run_id = %run.run_id,
        inserted = run.inserted,
        skipped = run.skipped,
        bridge_rows = run.bridge_rows,
        "batch completed"
      );
      Ok(BatchOutcome { run, load, bridge, orphaned_observations })
    }
    Err(e) => {
      run.fail(e.to_string());
      if let Err(save_err) = store.save_run(&run).await {
        tracing::error!(run_id = %run.run_id, error = %save_err, "could not record failed run");
      }
      tracing::error!(run_id = %run.run_id, error = %e, "batch failed");
      Err(e)
    }
  }
}

/// Copy load counters onto the run; on an aborted load these are the rows
/// handled before the failure.
fn record_load(run: &mut LoadRun, report: &LoadReport) {
  run.inserted = report.inserted;
  run.skipped = report.skipped;
  run.skip_counts = report.reason_counts();
}

async fn execute<S: WarehouseStore>(
  store: &S,
  staging: Option<Vec<StagingRecord>>,
  options: BatchOptions,
  run: &mut LoadRun,
) -> Result<(Option<LoadReport>, Option<BridgeReport>, usize)> {
  if let Some(records) = staging {
    let n = store.replace_staging(records).await.map_err(Error::store)?;
    tracing::info!(rows = n, "staging replaced");
  }

  let load = if options.load_facts {
    let records = store.staging_records().await.map_err(Error::store)?;
    run.staging_rows = records.len();
    StagingProfile::compute(&records).log();

    let mut loader = FactLoader::new(store).with_run_id(run.run_id);
    let loaded = loader.load_batch(&records).await;
    record_load(run, loader.progress());
    let report = loaded?;
    store.save_run(run).await.map_err(Error::store)?;
    Some(report)
  } else {
    None
  };

  let bridge = if options.rebuild_bridge {
    let report = BridgeBuilder::new(store, options.bridge_mode).rebuild().await?;
    run.bridge_rows = report.write.total;
    Some(report)
  } else {
    None
  };

  let orphans = store
    .orphaned_observation_count()
    .await
    .map_err(Error::store)?;
  if orphans > 0 {
    tracing::error!(orphans, "observations reference missing dimension rows");
  }

  Ok((load, bridge, orphans))
}
