//! The `WarehouseStore` trait and supporting query types.
//!
//! The trait is implemented by storage backends (e.g.
//! `carebridge-store-sqlite`). The ETL pipeline depends on this abstraction,
//! not on any concrete backend.

use std::future::Future;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  bridge::{BridgeRow, BridgeWrite, BridgeWriteMode, NewBridgeRow},
  dimension::{DimensionEntry, DimensionKind, Resolution, SurrogateKey},
  entity::{Account, Customer},
  geo::StateCode,
  natural_key::{EntityKind, EntityToken},
  observation::{NewObservation, Observation},
  run::LoadRun,
  staging::StagingRecord,
};

// ─── Query type ──────────────────────────────────────────────────────────────

/// Filters for [`WarehouseStore::linked_observations`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ViewQuery {
  pub kind:   Option<EntityKind>,
  pub token:  Option<EntityToken>,
  pub state:  Option<StateCode>,
  /// Exact topic name.
  pub topic:  Option<String>,
  pub limit:  Option<usize>,
  pub offset: Option<usize>,
}

// ─── Result rows ─────────────────────────────────────────────────────────────

/// A (category, value) label pair for one stratification slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StratificationLabel {
  pub category: String,
  pub value:    String,
}

/// One observation reached from one bridge row: bridge ⋈ location ⋈
/// observation ⋈ dimension labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedObservation {
  pub bridge_id:            i64,
  pub kind:                 EntityKind,
  pub token:                EntityToken,
  pub state:                StateCode,
  pub location_description: Option<String>,
  pub topic:                String,
  pub question:             String,
  pub value_type:           Option<String>,
  /// Populated slots only, in slot order.
  pub stratifications:      Vec<StratificationLabel>,
  pub observation:          Observation,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a warehouse backend.
///
/// Dimension rows are append-only and first-write-wins. Observations are
/// append-only. The bridge is rewritten by the bridge builder only. Business
/// entities are read-only.
///
/// The pipeline assumes a single writer per run; readers may observe a
/// partially loaded fact table while a run is in progress.
pub trait WarehouseStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Staging ───────────────────────────────────────────────────────────

  /// Truncate staging and insert `records` in order. Returns the row count.
  fn replace_staging(
    &self,
    records: Vec<StagingRecord>,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  /// All staging records, in insertion order.
  fn staging_records(
    &self,
  ) -> impl Future<Output = Result<Vec<StagingRecord>, Self::Error>> + Send + '_;

  // ── Dimensions ────────────────────────────────────────────────────────

  /// Return the row whose natural key matches `entry`, inserting it first if
  /// absent. Existing rows are never modified. A uniqueness conflict on
  /// insert is resolved by re-reading the now-existing row.
  fn get_or_create_dimension(
    &self,
    entry: DimensionEntry,
  ) -> impl Future<Output = Result<Resolution, Self::Error>> + Send + '_;

  /// Look up a natural key without creating anything.
  fn find_dimension(
    &self,
    kind: DimensionKind,
    natural_key: String,
  ) -> impl Future<Output = Result<Option<SurrogateKey>, Self::Error>> + Send + '_;

  /// Look up an existing location by its exact description.
  fn find_location_by_description(
    &self,
    description: String,
  ) -> impl Future<Output = Result<Option<SurrogateKey>, Self::Error>> + Send + '_;

  /// Number of rows in a dimension table, seeded members included.
  fn dimension_count(
    &self,
    kind: DimensionKind,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  // ── Observations, append-only ─────────────────────────────────────────

  /// Insert one observation. `loaded_at` and `updated_at` are set by the
  /// store.
  fn insert_observation(
    &self,
    input: NewObservation,
  ) -> impl Future<Output = Result<Observation, Self::Error>> + Send + '_;

  fn get_observation(
    &self,
    observation_id: i64,
  ) -> impl Future<Output = Result<Option<Observation>, Self::Error>> + Send + '_;

  fn observation_count(
    &self,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  /// Observations whose topic, question or location key has no dimension
  /// row. Always zero for a store written only through the loader.
  fn orphaned_observation_count(
    &self,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  /// Correction pass: set `updated_at` to now on the given observations.
  /// Returns how many rows were touched.
  fn touch_observations(
    &self,
    observation_ids: Vec<i64>,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  // ── Business entities (read-only) ─────────────────────────────────────

  fn customers(
    &self,
  ) -> impl Future<Output = Result<Vec<Customer>, Self::Error>> + Send + '_;

  fn accounts(
    &self,
  ) -> impl Future<Output = Result<Vec<Account>, Self::Error>> + Send + '_;

  // ── Bridge ────────────────────────────────────────────────────────────

  /// Write bridge rows in one transaction. Pairs already present are never
  /// duplicated.
  fn write_bridge(
    &self,
    rows: Vec<NewBridgeRow>,
    mode: BridgeWriteMode,
  ) -> impl Future<Output = Result<BridgeWrite, Self::Error>> + Send + '_;

  fn bridge_rows(
    &self,
  ) -> impl Future<Output = Result<Vec<BridgeRow>, Self::Error>> + Send + '_;

  // ── Cross-domain read ─────────────────────────────────────────────────

  /// Every (bridge row, observation) pair meeting at a state code, with
  /// dimension labels resolved. Ordered by bridge row, then observation.
  fn linked_observations<'a>(
    &'a self,
    query: &'a ViewQuery,
  ) -> impl Future<Output = Result<Vec<LinkedObservation>, Self::Error>> + Send + 'a;

  // ── Load runs ─────────────────────────────────────────────────────────

  /// Insert or overwrite the audit record for `run.run_id`.
  fn save_run<'a>(
    &'a self,
    run: &'a LoadRun,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  fn get_run(
    &self,
    run_id: Uuid,
  ) -> impl Future<Output = Result<Option<LoadRun>, Self::Error>> + Send + '_;

  /// The most recently started run, if any.
  fn latest_run(
    &self,
  ) -> impl Future<Output = Result<Option<LoadRun>, Self::Error>> + Send + '_;
}
