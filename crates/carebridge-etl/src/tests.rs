//! End-to-end pipeline tests against an in-memory `SqliteStore`.

use std::sync::atomic::{AtomicUsize, Ordering};

use carebridge_core::{
  bridge::{BridgeRow, BridgeWrite, BridgeWriteMode, NewBridgeRow},
  dimension::{DimensionEntry, DimensionKind, Resolution, SurrogateKey},
  entity::{Account, BusinessEntity, Customer, CustomerAddress},
  geo::StateCode,
  natural_key::{AccountKey, CustomerKey, EntityKind},
  observation::{NewObservation, Observation},
  run::{LoadRun, RunStatus},
  staging::StagingRecord,
  store::{LinkedObservation, ViewQuery, WarehouseStore},
};
use carebridge_store_sqlite::SqliteStore;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::{
  BatchOptions, Error,
  bridge::BridgeBuilder,
  loader::{FactLoader, SkipReason},
  resolver::DimensionResolver,
  run_batch,
  view::UnifiedView,
};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn cdi(abbr: &str, topic: &str, question: &str, value: &str) -> StagingRecord {
  StagingRecord {
    year_start: Some("2020".into()),
    location_abbr: Some(abbr.into()),
    location_desc: Some(format!("State {abbr}")),
    topic: Some(topic.into()),
    question: Some(question.into()),
    data_value: Some(value.into()),
    data_value_type: Some("Crude Prevalence".into()),
    data_value_unit: Some("%".into()),
    ..Default::default()
  }
}

fn customer(first: &str, states: &[&str]) -> Customer {
  Customer {
    key:       CustomerKey {
      last_name:      "Smith".into(),
      first_name:     first.into(),
      middle_initial: None,
      suffix:         None,
      birth_date:     NaiveDate::from_ymd_opt(1980, 4, 1).unwrap(),
    },
    addresses: states
      .iter()
      .map(|s| CustomerAddress {
        address_line: Some("1 Main St".into()),
        city:         None,
        state:        Some((*s).into()),
        zip:          None,
        valid_from:   None,
        valid_to:     None,
      })
      .collect(),
  }
}

fn account(state: &str) -> Account {
  Account {
    key: AccountKey {
      name:         "Acme Corp".into(),
      address_line: "5 Elm St".into(),
      city:         "Austin".into(),
      state:        state.into(),
      zip:          "73301".into(),
      company_code: "C1".into(),
    },
  }
}

/// Dimension rows beyond the seeded `Unknown` member.
async fn created(s: &SqliteStore, kind: DimensionKind) -> usize {
  s.dimension_count(kind).await.unwrap() - usize::from(kind.has_unknown_member())
}

// ─── Dimension resolution ────────────────────────────────────────────────────

#[tokio::test]
async fn resolution_is_idempotent_across_resolvers() {
  let s = store().await;

  let mut first = DimensionResolver::new(&s);
  let a = first.topic(0, Some("Asthma"), Some("AST")).await.unwrap();
  let a_again = first.topic(1, Some("Asthma"), None).await.unwrap();
  assert_eq!(a, a_again);
  assert_eq!(first.stats().cache_hits, 1);
  assert_eq!(first.stats().created.get(&DimensionKind::Topic), Some(&1));

  let mut second = DimensionResolver::new(&s);
  let b = second.topic(0, Some("Asthma"), None).await.unwrap();
  assert_eq!(a, b);
  assert!(second.stats().created.is_empty());
  assert_eq!(created(&s, DimensionKind::Topic).await, 1);
}

#[tokio::test]
async fn blank_parents_fall_back_to_unknown() {
  let s = store().await;
  let mut r = DimensionResolver::new(&s);

  let topic = r.topic(3, Some("   "), None).await.unwrap();
  assert_eq!(topic, SurrogateKey::UNKNOWN);
  let question = r.question(3, None, None, topic).await.unwrap();
  assert_eq!(question, SurrogateKey::UNKNOWN);

  assert_eq!(r.stats().defaulted.get(&DimensionKind::Topic), Some(&1));
  assert_eq!(r.stats().defaulted.get(&DimensionKind::Question), Some(&1));
  assert_eq!(created(&s, DimensionKind::Topic).await, 0);
}

#[tokio::test]
async fn location_never_falls_back() {
  let s = store().await;
  let mut r = DimensionResolver::new(&s);

  assert_eq!(r.location(None, None, None).await.unwrap(), None);
  assert_eq!(r.location(Some("C4"), None, None).await.unwrap(), None);
  assert_eq!(r.location(None, Some("Atlantis"), None).await.unwrap(), None);

  let ca = r
    .location(Some("CA"), Some("California"), None)
    .await
    .unwrap()
    .unwrap();
  let by_desc = r.location(None, Some("California"), None).await.unwrap();
  assert_eq!(by_desc, Some(ca));
  assert_eq!(created(&s, DimensionKind::Location).await, 1);
}

#[tokio::test]
async fn stratification_without_category_uses_unknown_category() {
  let s = store().await;
  let record = StagingRecord {
    stratification1: Some("Overall".into()),
    stratification_category2: Some("Gender".into()),
    ..Default::default()
  };
  let [first, second, _] = record.stratifications();

  let mut r = DimensionResolver::new(&s);
  assert!(r.stratification(0, first).await.unwrap().is_some());
  assert_eq!(r.stratification(0, second).await.unwrap(), None);

  assert_eq!(
    r.stats().defaulted.get(&DimensionKind::StratificationCategory),
    Some(&1)
  );
  // A category with no value in its slot creates nothing.
  assert_eq!(created(&s, DimensionKind::StratificationCategory).await, 0);
  assert_eq!(created(&s, DimensionKind::Stratification).await, 1);
}

// ─── Fact loading ────────────────────────────────────────────────────────────

#[tokio::test]
async fn duplicate_staging_rows_load_twice() {
  let s = store().await;
  let row = cdi("CA", "Diabetes", "Diabetes prevalence", "10.5");

  let report = FactLoader::new(&s)
    .load_batch(&[row.clone(), row])
    .await
    .unwrap();

  assert_eq!(report.inserted, 2);
  assert_eq!(s.observation_count().await.unwrap(), 2);
  assert_eq!(created(&s, DimensionKind::Topic).await, 1);
  assert_eq!(created(&s, DimensionKind::Question).await, 1);
  assert_eq!(created(&s, DimensionKind::Location).await, 1);
  assert_eq!(created(&s, DimensionKind::ValueType).await, 1);
}

#[tokio::test]
async fn every_staging_row_is_inserted_or_skipped() {
  let s = store().await;
  let rows = vec![
    cdi("CA", "Diabetes", "Prevalence", "10.5"),
    StagingRecord { data_value: None, ..cdi("CA", "Diabetes", "Prevalence", "") },
    StagingRecord { year_start: Some("year".into()), ..cdi("NY", "Asthma", "Q", "1") },
    StagingRecord { year_end: Some("2010".into()), ..cdi("NY", "Asthma", "Q", "1") },
    StagingRecord {
      location_abbr: None,
      location_desc: Some("Nowhere".into()),
      ..cdi("NY", "Asthma", "Q", "1")
    },
    StagingRecord { topic: None, question: None, ..cdi("TX", "", "", "No data") },
  ];

  let report = FactLoader::new(&s).load_batch(&rows).await.unwrap();

  assert_eq!(report.inserted, 2);
  assert_eq!(report.skipped, 4);
  assert_eq!(report.processed(), rows.len());
  assert_eq!(s.observation_count().await.unwrap(), 2);

  let reasons: Vec<_> = report.skip_reasons.iter().map(|r| (r.row, r.reason.clone())).collect();
  assert_eq!(
    reasons,
    vec![
      (1, SkipReason::MissingRequiredField { field: "DataValue" }),
      (2, SkipReason::MissingRequiredField { field: "YearStart" }),
      (3, SkipReason::InvalidYearRange { start: 2020, end: 2010 }),
      (4, SkipReason::UnresolvableReference { location: "Nowhere".into() }),
    ]
  );

  // Rejected rows never touch the dimensions: no Asthma, no NY.
  assert_eq!(created(&s, DimensionKind::Topic).await, 1);
  assert_eq!(created(&s, DimensionKind::Location).await, 2);
}

#[tokio::test]
async fn loaded_observation_keeps_measures_and_source_ids() {
  let s = store().await;
  let row = StagingRecord {
    year_end: Some("2021".into()),
    low_confidence_limit: Some("9.80".into()),
    high_confidence_limit: Some("~".into()),
    data_value_footnote: Some("Age-adjusted".into()),
    location_id: Some("06".into()),
    topic_id: Some("DIA".into()),
    stratification_category1: Some("Gender".into()),
    stratification1: Some("Female".into()),
    ..cdi("CA", "Diabetes", "Prevalence", "10.50")
  };
  let run_id = Uuid::new_v4();

  let report = FactLoader::new(&s)
    .with_run_id(run_id)
    .load_batch(&[row])
    .await
    .unwrap();
  let obs = s
    .get_observation(report.observation_ids[0])
    .await
    .unwrap()
    .unwrap();

  assert_eq!((obs.years.start(), obs.years.end()), (2020, 2021));
  assert_eq!(obs.measurement.value.unwrap().to_string(), "10.50");
  assert_eq!(obs.measurement.low.unwrap().to_string(), "9.80");
  assert_eq!(obs.measurement.high, None);
  assert_eq!(obs.footnote.as_deref(), Some("Age-adjusted"));
  assert_eq!(obs.source_ids.location_id.as_deref(), Some("06"));
  assert!(obs.stratifications[0].is_some());
  assert_eq!(obs.stratifications[1], None);
  assert_eq!(obs.run_id, Some(run_id));
  assert_eq!(s.orphaned_observation_count().await.unwrap(), 0);
}

// ─── Bridge ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn customer_in_two_states_gets_two_bridge_rows() {
  let s = store().await;
  s.import_customer(customer("Jane", &["CA", "NY"])).await.unwrap();

  let report = BridgeBuilder::new(&s, BridgeWriteMode::Refresh)
    .rebuild()
    .await
    .unwrap();
  assert_eq!(report.pairs, 2);
  assert_eq!(report.write.total, 2);

  let again = BridgeBuilder::new(&s, BridgeWriteMode::Refresh)
    .rebuild()
    .await
    .unwrap();
  assert_eq!((again.write.inserted, again.write.refreshed), (0, 2));
  assert_eq!(s.bridge_rows().await.unwrap().len(), 2);
}

#[tokio::test]
async fn malformed_state_excludes_only_that_entity() {
  let s = store().await;
  s.import_customer(customer("Jane", &["CA"])).await.unwrap();
  s.import_account(account("Texas")).await.unwrap();

  let report = BridgeBuilder::new(&s, BridgeWriteMode::Refresh)
    .rebuild()
    .await
    .unwrap();
  assert_eq!(report.write.total, 1);
  assert_eq!(report.excluded.len(), 1);
  assert_eq!(report.excluded[0].kind, EntityKind::Account);
}

// ─── Unified view ────────────────────────────────────────────────────────────

#[tokio::test]
async fn one_bridge_row_times_three_facts_is_three_rows() {
  let s = store().await;
  let jane = customer("Jane", &["CA"]);
  s.import_customer(jane.clone()).await.unwrap();

  FactLoader::new(&s)
    .load_batch(&[
      cdi("CA", "Diabetes", "Prevalence", "1"),
      cdi("CA", "Diabetes", "Mortality", "2"),
      cdi("CA", "Obesity", "Prevalence among adults", "3"),
      cdi("TX", "Obesity", "Prevalence among adults", "4"),
    ])
    .await
    .unwrap();
  BridgeBuilder::new(&s, BridgeWriteMode::Refresh)
    .rebuild()
    .await
    .unwrap();

  let rows = UnifiedView::new(&s).query(&ViewQuery::default()).await.unwrap();
  assert_eq!(rows.len(), 3);
  for row in &rows {
    assert_eq!(row.linked.state, StateCode::parse("CA").unwrap());
    assert_eq!(row.entity, Some(BusinessEntity::Customer(jane.clone())));
    assert_eq!(row.linked.value_type.as_deref(), Some("Crude Prevalence"));
  }

  let obesity = UnifiedView::new(&s)
    .query(&ViewQuery { topic: Some("Obesity".into()), ..Default::default() })
    .await
    .unwrap();
  assert_eq!(obesity.len(), 1);
  assert_eq!(obesity[0].linked.question, "Prevalence among adults");
}

#[tokio::test]
async fn two_state_customer_sees_observations_from_both() {
  let s = store().await;
  let jane = customer("Jane", &["CA", "NY"]);
  s.import_customer(jane.clone()).await.unwrap();
  s.import_customer(customer("Bob", &["WA"])).await.unwrap();

  FactLoader::new(&s)
    .load_batch(&[
      cdi("CA", "Diabetes", "Prevalence", "1"),
      cdi("NY", "Diabetes", "Prevalence", "2"),
      cdi("TX", "Diabetes", "Prevalence", "3"),
    ])
    .await
    .unwrap();
  BridgeBuilder::new(&s, BridgeWriteMode::Refresh)
    .rebuild()
    .await
    .unwrap();

  let rows = UnifiedView::new(&s)
    .query(&ViewQuery { token: Some(jane.key.token()), ..Default::default() })
    .await
    .unwrap();
  let mut states: Vec<_> = rows.iter().map(|r| r.linked.state.as_str().to_owned()).collect();
  states.sort();
  assert_eq!(states, vec!["CA", "NY"]);

  // Bob's state has no observations, so he contributes nothing.
  let all = UnifiedView::new(&s).query(&ViewQuery::default()).await.unwrap();
  assert_eq!(all.len(), 2);
}

// ─── Batch runs ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn batch_run_is_audited_and_rerunnable() {
  let s = store().await;
  s.import_customer(customer("Jane", &["CA", "NY"])).await.unwrap();
  s.import_account(account("CA")).await.unwrap();

  let staging = vec![
    cdi("CA", "Diabetes", "Prevalence", "1"),
    cdi("NY", "Diabetes", "Prevalence", "2"),
    StagingRecord { data_value: None, ..cdi("NY", "Diabetes", "Prevalence", "") },
  ];

  let first = run_batch(&s, Some(staging), BatchOptions::default())
    .await
    .unwrap();
  assert_eq!(first.run.status, RunStatus::Completed);
  assert_eq!(first.run.staging_rows, 3);
  assert_eq!(first.run.inserted + first.run.skipped, first.run.staging_rows);
  assert_eq!(first.run.skip_counts.get("missing_required_field"), Some(&1));
  assert_eq!(first.run.bridge_rows, 3);
  assert_eq!(first.orphaned_observations, 0);

  let saved = s.get_run(first.run.run_id).await.unwrap().unwrap();
  assert_eq!(saved, first.run);

  // Second run reloads the same staging: facts double, bridge does not.
  let second = run_batch(&s, None, BatchOptions::default()).await.unwrap();
  assert_eq!(second.run.inserted, 2);
  assert_eq!(s.observation_count().await.unwrap(), 4);
  assert_eq!(second.run.bridge_rows, 3);
  assert_eq!(s.bridge_rows().await.unwrap().len(), 3);
}

#[tokio::test]
async fn bridge_only_run_leaves_facts_alone() {
  let s = store().await;
  s.import_customer(customer("Jane", &["CA"])).await.unwrap();
  s.replace_staging(vec![cdi("CA", "Diabetes", "Prevalence", "1")])
    .await
    .unwrap();

  let outcome = run_batch(
    &s,
    None,
    BatchOptions {
      load_facts:     false,
      rebuild_bridge: true,
      bridge_mode:    BridgeWriteMode::FullRebuild,
    },
  )
  .await
  .unwrap();

  assert!(outcome.load.is_none());
  assert_eq!(outcome.run.bridge_rows, 1);
  assert_eq!(s.observation_count().await.unwrap(), 0);
}

// ─── Failure handling ────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
enum FlakyError {
  #[error(transparent)]
  Inner(#[from] carebridge_store_sqlite::Error),
  #[error("injected insert failure")]
  Injected,
}

/// Delegates to SQLite but refuses observation inserts once `allowed` have
/// gone through.
struct FailingInserts {
  inner:    SqliteStore,
  allowed:  usize,
  attempts: AtomicUsize,
}

impl FailingInserts {
  fn after(inner: SqliteStore, allowed: usize) -> Self {
    Self { inner, allowed, attempts: AtomicUsize::new(0) }
  }
}

impl WarehouseStore for FailingInserts {
  type Error = FlakyError;

  async fn replace_staging(&self, records: Vec<StagingRecord>) -> Result<usize, FlakyError> {
    Ok(self.inner.replace_staging(records).await?)
  }

  async fn staging_records(&self) -> Result<Vec<StagingRecord>, FlakyError> {
    Ok(self.inner.staging_records().await?)
  }

  async fn get_or_create_dimension(
    &self,
    entry: DimensionEntry,
  ) -> Result<Resolution, FlakyError> {
    Ok(self.inner.get_or_create_dimension(entry).await?)
  }

  async fn find_dimension(
    &self,
    kind: DimensionKind,
    natural_key: String,
  ) -> Result<Option<SurrogateKey>, FlakyError> {
    Ok(self.inner.find_dimension(kind, natural_key).await?)
  }

  async fn find_location_by_description(
    &self,
    description: String,
  ) -> Result<Option<SurrogateKey>, FlakyError> {
    Ok(self.inner.find_location_by_description(description).await?)
  }

  async fn dimension_count(&self, kind: DimensionKind) -> Result<usize, FlakyError> {
    Ok(self.inner.dimension_count(kind).await?)
  }

  async fn insert_observation(
    &self,
    input: NewObservation,
  ) -> Result<Observation, FlakyError> {
    if self.attempts.fetch_add(1, Ordering::SeqCst) >= self.allowed {
      return Err(FlakyError::Injected);
    }
    Ok(self.inner.insert_observation(input).await?)
  }

  async fn get_observation(&self, id: i64) -> Result<Option<Observation>, FlakyError> {
    Ok(self.inner.get_observation(id).await?)
  }

  async fn observation_count(&self) -> Result<usize, FlakyError> {
    Ok(self.inner.observation_count().await?)
  }

  async fn orphaned_observation_count(&self) -> Result<usize, FlakyError> {
    Ok(self.inner.orphaned_observation_count().await?)
  }

  async fn touch_observations(&self, ids: Vec<i64>) -> Result<usize, FlakyError> {
    Ok(self.inner.touch_observations(ids).await?)
  }

  async fn customers(&self) -> Result<Vec<Customer>, FlakyError> {
    Ok(self.inner.customers().await?)
  }

  async fn accounts(&self) -> Result<Vec<Account>, FlakyError> {
    Ok(self.inner.accounts().await?)
  }

  async fn write_bridge(
    &self,
    rows: Vec<NewBridgeRow>,
    mode: BridgeWriteMode,
  ) -> Result<BridgeWrite, FlakyError> {
    Ok(self.inner.write_bridge(rows, mode).await?)
  }

  async fn bridge_rows(&self) -> Result<Vec<BridgeRow>, FlakyError> {
    Ok(self.inner.bridge_rows().await?)
  }

  async fn linked_observations<'a>(
    &'a self,
    query: &'a ViewQuery,
  ) -> Result<Vec<LinkedObservation>, FlakyError> {
    Ok(self.inner.linked_observations(query).await?)
  }

  async fn save_run<'a>(&'a self, run: &'a LoadRun) -> Result<(), FlakyError> {
    Ok(self.inner.save_run(run).await?)
  }

  async fn get_run(&self, run_id: Uuid) -> Result<Option<LoadRun>, FlakyError> {
    Ok(self.inner.get_run(run_id).await?)
  }

  async fn latest_run(&self) -> Result<Option<LoadRun>, FlakyError> {
    Ok(self.inner.latest_run().await?)
  }
}

#[tokio::test]
async fn store_failure_marks_the_run_failed() {
  let s = FailingInserts::after(store().await, 0);

  let err = run_batch(
    &s,
    Some(vec![cdi("CA", "Diabetes", "Prevalence", "1")]),
    BatchOptions::default(),
  )
  .await
  .unwrap_err();
  assert!(matches!(err, Error::Store(_)));

  let run = s.latest_run().await.unwrap().unwrap();
  assert_eq!(run.status, RunStatus::Failed);
  assert!(run.failure.unwrap().contains("injected insert failure"));
  assert!(run.finished_at.is_some());

  // Dimensions resolved before the failure stay; the staged row stays too.
  assert_eq!(s.inner.staging_records().await.unwrap().len(), 1);
  assert_eq!(created(&s.inner, DimensionKind::Location).await, 1);
  assert_eq!(s.inner.bridge_rows().await.unwrap().len(), 0);
}

#[tokio::test]
async fn failed_run_records_rows_loaded_before_the_failure() {
  let s = FailingInserts::after(store().await, 2);
  let mut blank = cdi("CA", "Diabetes", "Prevalence", "9");
  blank.data_value = None;

  run_batch(
    &s,
    Some(vec![
      cdi("CA", "Diabetes", "Prevalence", "1"),
      blank,
      cdi("CA", "Diabetes", "Prevalence", "2"),
      cdi("CA", "Diabetes", "Prevalence", "3"),
      cdi("CA", "Diabetes", "Prevalence", "4"),
    ]),
    BatchOptions::default(),
  )
  .await
  .unwrap_err();

  let run = s.latest_run().await.unwrap().unwrap();
  assert_eq!(run.status, RunStatus::Failed);
  assert_eq!(run.staging_rows, 5);
  assert_eq!(run.inserted, 2);
  assert_eq!(run.skipped, 1);
  assert_eq!(run.skip_counts.get("missing_required_field"), Some(&1));
  assert_eq!(s.inner.observation_count().await.unwrap(), run.inserted);
}
