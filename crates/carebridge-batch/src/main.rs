//! carebridge batch job.
//!
//! Reads `carebridge.toml` (or the path given with `--config`), opens the
//! SQLite warehouse, optionally re-stages a CDI CSV export, and runs one
//! audited load: facts first, then the geographic bridge. Meant to be started
//! by a scheduler; every invocation is one load run.
//!
//! Every config key can also be set from the environment, e.g.
//! `CAREBRIDGE_STORE_PATH=~/warehouse.db`.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use carebridge_core::bridge::BridgeWriteMode;
use carebridge_etl::{BatchOptions, run_batch};
use carebridge_store_sqlite::SqliteStore;
use clap::Parser;
use serde::Deserialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "carebridge warehouse batch load")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "carebridge.toml")]
  config: PathBuf,

  /// CDI CSV export to stage before loading; overrides `staging_csv`.
  #[arg(short, long)]
  staging: Option<PathBuf>,

  /// Delete the bridge before rebuilding it.
  #[arg(long)]
  full_rebuild: bool,

  /// Print the finished load run as JSON on stdout.
  #[arg(long)]
  json: bool,
}

// ─── Configuration ────────────────────────────────────────────────────────────

/// Batch configuration, deserialised from `carebridge.toml` and
/// `CAREBRIDGE_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
struct BatchConfig {
  store_path:          PathBuf,
  /// When unset, whatever is already in the staging table is loaded.
  #[serde(default)]
  staging_csv:         Option<PathBuf>,
  #[serde(default)]
  bridge_full_rebuild: bool,
  #[serde(default = "enabled")]
  load_facts:          bool,
  #[serde(default = "enabled")]
  rebuild_bridge:      bool,
}

fn enabled() -> bool { true }

impl BatchConfig {
  fn options(&self) -> BatchOptions {
    BatchOptions {
      load_facts:     self.load_facts,
      rebuild_bridge: self.rebuild_bridge,
      bridge_mode:    if self.bridge_full_rebuild {
        BridgeWriteMode::FullRebuild
      } else {
        BridgeWriteMode::Refresh
      },
    }
  }
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("CAREBRIDGE"))
    .build()
    .context("failed to read config file")?;

  let mut batch_cfg: BatchConfig = settings
    .try_deserialize()
    .context("failed to deserialise BatchConfig")?;
  if let Some(path) = cli.staging {
    batch_cfg.staging_csv = Some(path);
  }
  if cli.full_rebuild {
    batch_cfg.bridge_full_rebuild = true;
  }

  let store_path = expand_tilde(&batch_cfg.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let staging = match &batch_cfg.staging_csv {
    Some(path) => {
      let path = expand_tilde(path);
      let batch = carebridge_cdi::read_staging_file(&path)
        .with_context(|| format!("failed to read staging export {path:?}"))?;
      tracing::info!(
        path = %path.display(),
        rows = batch.records.len(),
        missing_columns = batch.missing_columns.len(),
        unknown_columns = batch.unknown_columns.len(),
        "staging export read"
      );
      Some(batch.records)
    }
    None => None,
  };

  let outcome = run_batch(&store, staging, batch_cfg.options())
    .await
    .context("batch run failed")?;

  if outcome.orphaned_observations > 0 {
    tracing::warn!(
      orphans = outcome.orphaned_observations,
      "warehouse has observations with dangling dimension keys"
    );
  }

  if cli.json {
    let json = serde_json::to_string_pretty(&outcome.run).context("failed to encode load run")?;
    println!("{json}");
  }

  Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
