//! [`SqliteStore`], the SQLite implementation of [`WarehouseStore`].

use std::{collections::BTreeMap, path::Path};

use chrono::Utc;
use rusqlite::{ErrorCode, OptionalExtension as _};
use uuid::Uuid;

use carebridge_core::{
  bridge::{BridgeRow, BridgeWrite, BridgeWriteMode, NewBridgeRow},
  dimension::{DimensionEntry, DimensionKind, Resolution, SurrogateKey},
  entity::{Account, Customer, CustomerAddress},
  natural_key::{AccountKey, CustomerKey, EntityKind},
  observation::{NewObservation, Observation},
  run::LoadRun,
  staging::{STAGING_COLUMNS, StagingRecord},
  store::{LinkedObservation, ViewQuery, WarehouseStore},
};

use crate::{
  Result,
  encode::{
    LOAD_RUN_COLUMNS, OBSERVATION_COLUMNS, RawBridgeRow, RawLinkedObservation, RawLoadRun,
    RawObservation, count, decode_date, dimension_table, encode_date,
    encode_decimal, encode_dt, encode_uuid,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A carebridge warehouse backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Business-schema import ────────────────────────────────────────────

  /// Insert a customer and its addresses. The pipeline itself never writes
  /// business tables; this exists for loading fixtures and exports.
  pub async fn import_customer(&self, customer: Customer) -> Result<i64> {
    let birth = encode_date(customer.key.birth_date);
    let addresses: Vec<_> = customer
      .addresses
      .into_iter()
      .map(|a| {
        (
          a.address_line,
          a.city,
          a.state,
          a.zip,
          a.valid_from.map(encode_date),
          a.valid_to.map(encode_date),
        )
      })
      .collect();
    let key = customer.key;

    let id = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "INSERT INTO customers
             (last_name, first_name, middle_initial, suffix, birth_date)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          rusqlite::params![
            key.last_name,
            key.first_name,
            key.middle_initial,
            key.suffix,
            birth
          ],
        )?;
        let customer_id = tx.last_insert_rowid();

        {
          let mut stmt = tx.prepare(
            "INSERT INTO customer_addresses
               (customer_id, address_line, city, state_code, zip, valid_from, valid_to)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
          )?;
          for (line, city, state, zip, from, to) in &addresses {
            stmt.execute(rusqlite::params![
              customer_id,
              line,
              city,
              state,
              zip,
              from,
              to
            ])?;
          }
        }

        tx.commit()?;
        Ok(customer_id)
      })
      .await?;
    Ok(id)
  }

  /// Insert an account. See [`Self::import_customer`].
  pub async fn import_account(&self, account: Account) -> Result<i64> {
    let key = account.key;
    let id = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO accounts
             (name, address_line, city, state_code, zip, company_code)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![
            key.name,
            key.address_line,
            key.city,
            key.state,
            key.zip,
            key.company_code
          ],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;
    Ok(id)
  }
}

// ─── Dimension writes ────────────────────────────────────────────────────────

fn select_dimension(
  conn: &rusqlite::Connection,
  kind: DimensionKind,
  natural_key: &str,
) -> rusqlite::Result<Option<i64>> {
  let t = dimension_table(kind);
  let sql = format!(
    "SELECT {} FROM {} WHERE {} = ?1",
    t.id_column, t.table, t.key_column
  );
  conn
    .query_row(&sql, rusqlite::params![natural_key], |r| r.get(0))
    .optional()
}

fn insert_dimension(
  conn: &rusqlite::Connection,
  entry: &DimensionEntry,
  now: &str,
) -> rusqlite::Result<i64> {
  match entry {
    DimensionEntry::Topic { name, code } => conn.execute(
      "INSERT INTO dim_topic (topic_name, topic_code, created_at)
       VALUES (?1, ?2, ?3)",
      rusqlite::params![name, code, now],
    )?,
    DimensionEntry::Question { text, code, topic } => conn.execute(
      "INSERT INTO dim_question (question_text, question_code, topic_id, created_at)
       VALUES (?1, ?2, ?3, ?4)",
      rusqlite::params![text, code, topic.0, now],
    )?,
    DimensionEntry::Location { abbr, description, geolocation } => conn.execute(
      "INSERT INTO dim_location (location_abbr, location_desc, geolocation, created_at)
       VALUES (?1, ?2, ?3, ?4)",
      rusqlite::params![abbr.as_str(), description, geolocation, now],
    )?,
    DimensionEntry::StratificationCategory { name, code } => conn.execute(
      "INSERT INTO dim_stratification_category (category_name, category_code, created_at)
       VALUES (?1, ?2, ?3)",
      rusqlite::params![name, code, now],
    )?,
    DimensionEntry::Stratification { name, code, category } => conn.execute(
      "INSERT INTO dim_stratification
         (stratification_name, stratification_code, category_id, created_at)
       VALUES (?1, ?2, ?3, ?4)",
      rusqlite::params![name, code, category.0, now],
    )?,
    DimensionEntry::ValueType { name, unit, code } => conn.execute(
      "INSERT INTO dim_value_type (type_name, unit_of_measure, type_code, created_at)
       VALUES (?1, ?2, ?3, ?4)",
      rusqlite::params![name, unit, code, now],
    )?,
  };
  Ok(conn.last_insert_rowid())
}

/// Insert `entry`; if its natural key already exists, return the existing
/// row instead. Other constraint failures (a missing parent key, say) are
/// returned as errors.
pub(crate) fn insert_or_reuse(
  conn: &rusqlite::Connection,
  entry: &DimensionEntry,
  now: &str,
) -> rusqlite::Result<Resolution> {
  match insert_dimension(conn, entry, now) {
    Ok(id) => Ok(Resolution { key: SurrogateKey(id), created: true }),
    Err(rusqlite::Error::SqliteFailure(err, msg))
      if err.code == ErrorCode::ConstraintViolation
        && err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
    {
      let kind = entry.kind();
      tracing::debug!(
        dimension = %kind,
        natural_key = entry.natural_key(),
        "natural key inserted concurrently, reusing existing row"
      );
      match select_dimension(conn, kind, entry.natural_key())? {
        Some(id) => Ok(Resolution { key: SurrogateKey(id), created: false }),
        None => Err(rusqlite::Error::SqliteFailure(err, msg)),
      }
    }
    Err(e) => Err(e),
  }
}

// ─── WarehouseStore impl ─────────────────────────────────────────────────────

impl WarehouseStore for SqliteStore {
  type Error = crate::Error;

  // ── Staging ───────────────────────────────────────────────────────────

  async fn replace_staging(&self, records: Vec<StagingRecord>) -> Result<usize> {
    let columns = STAGING_COLUMNS.join(", ");
    let placeholders = (1..=STAGING_COLUMNS.len())
      .map(|i| format!("?{i}"))
      .collect::<Vec<_>>()
      .join(", ");
    let sql = format!("INSERT INTO staging_cdi ({columns}) VALUES ({placeholders})");

    let n = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM staging_cdi", [])?;
        {
          let mut stmt = tx.prepare(&sql)?;
          for record in &records {
            stmt.execute(rusqlite::params_from_iter(record.values()))?;
          }
        }
        tx.commit()?;
        Ok(records.len())
      })
      .await?;
    Ok(n)
  }

  async fn staging_records(&self) -> Result<Vec<StagingRecord>> {
    let sql = format!(
      "SELECT {} FROM staging_cdi ORDER BY row_no",
      STAGING_COLUMNS.join(", ")
    );
    let records = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map([], |row| {
            let mut values: [Option<String>; STAGING_COLUMNS.len()] =
              std::array::from_fn(|_| None);
            for (i, slot) in values.iter_mut().enumerate() {
              *slot = row.get(i)?;
            }
            Ok(StagingRecord::from_values(values))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(records)
  }

  // ── Dimensions ────────────────────────────────────────────────────────

  async fn get_or_create_dimension(&self, entry: DimensionEntry) -> Result<Resolution> {
    let now = encode_dt(Utc::now());
    let resolution = self
      .conn
      .call(move |conn| {
        if let Some(id) = select_dimension(conn, entry.kind(), entry.natural_key())? {
          return Ok(Resolution { key: SurrogateKey(id), created: false });
        }
        Ok(insert_or_reuse(conn, &entry, &now)?)
      })
      .await?;
    Ok(resolution)
  }

  async fn find_dimension(
    &self,
    kind: DimensionKind,
    natural_key: String,
  ) -> Result<Option<SurrogateKey>> {
    let id = self
      .conn
      .call(move |conn| Ok(select_dimension(conn, kind, &natural_key)?))
      .await?;
    Ok(id.map(SurrogateKey))
  }

  async fn find_location_by_description(
    &self,
    description: String,
  ) -> Result<Option<SurrogateKey>> {
    let id: Option<i64> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT location_id FROM dim_location
               WHERE location_desc = ?1
               ORDER BY location_id LIMIT 1",
              rusqlite::params![description],
              |r| r.get(0),
            )
            .optional()?,
        )
      })
      .await?;
    Ok(id.map(SurrogateKey))
  }

  async fn dimension_count(&self, kind: DimensionKind) -> Result<usize> {
    let sql = format!("SELECT COUNT(*) FROM {}", dimension_table(kind).table);
    let n: i64 = self
      .conn
      .call(move |conn| Ok(conn.query_row(&sql, [], |r| r.get(0))?))
      .await?;
    Ok(count(n))
  }

  // ── Observations ──────────────────────────────────────────────────────

  async fn insert_observation(&self, input: NewObservation) -> Result<Observation> {
    let now = Utc::now();
    let now_str = encode_dt(now);
    let m = &input.measurement;
    let s = &input.source_ids;
    let [s1, s2, s3] = input.stratifications.map(|k| k.map(|k| k.0));

    let params = (
      (
        input.topic.0,
        input.question.0,
        input.location.0,
        input.value_type.map(|k| k.0),
        s1,
        s2,
        s3,
        input.years.start(),
        input.years.end(),
      ),
      (
        encode_decimal(m.value),
        m.text.clone(),
        encode_decimal(m.alt_value),
        encode_decimal(m.low),
        encode_decimal(m.high),
        m.unit.clone(),
      ),
      (
        input.response.clone(),
        input.footnote_symbol.clone(),
        input.footnote.clone(),
        input.data_source.clone(),
      ),
      (
        s.location_id.clone(),
        s.topic_id.clone(),
        s.question_id.clone(),
        s.response_id.clone(),
        s.value_type_id.clone(),
      ),
      input.run_id.map(encode_uuid),
    );

    let observation_id = self
      .conn
      .call(move |conn| {
        let (keys, values, notes, ids, run_id) = params;
        let (topic, question, location, value_type, s1, s2, s3, start, end) = keys;
        let (value, text, alt, low, high, unit) = values;
        let (response, symbol, footnote, source) = notes;
        let (loc_id, topic_id, question_id, response_id, type_id) = ids;
        conn.execute(
          "INSERT INTO fact_observation (
             topic_id, question_id, location_id, value_type_id,
             stratification_1_id, stratification_2_id, stratification_3_id,
             year_start, year_end,
             data_value, data_value_text, data_value_alt,
             low_confidence_limit, high_confidence_limit, data_value_unit,
             response, footnote_symbol, footnote, data_source,
             source_location_id, source_topic_id, source_question_id,
             source_response_id, source_value_type_id,
             run_id, loaded_at, updated_at
           ) VALUES (
             ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
             ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?26
           )",
          rusqlite::params![
            topic, question, location, value_type, s1, s2, s3, start, end,
            value, text, alt, low, high, unit,
            response, symbol, footnote, source,
            loc_id, topic_id, question_id, response_id, type_id,
            run_id, now_str
          ],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;

    let NewObservation {
      topic,
      question,
      location,
      value_type,
      stratifications,
      years,
      measurement,
      response,
      footnote_symbol,
      footnote,
      data_source,
      source_ids,
      run_id,
    } = input;

    Ok(Observation {
      observation_id,
      topic,
      question,
      location,
      value_type,
      stratifications,
      years,
      measurement,
      response,
      footnote_symbol,
      footnote,
      data_source,
      source_ids,
      run_id,
      loaded_at: now,
      updated_at: now,
    })
  }

  async fn get_observation(&self, observation_id: i64) -> Result<Option<Observation>> {
    let sql = format!(
      "SELECT {OBSERVATION_COLUMNS} FROM fact_observation f WHERE f.observation_id = ?1"
    );
    let raw = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(&sql, rusqlite::params![observation_id], |row| {
              RawObservation::from_row(row, 0)
            })
            .optional()?,
        )
      })
      .await?;
    raw.map(RawObservation::into_observation).transpose()
  }

  async fn observation_count(&self) -> Result<usize> {
    let n: i64 = self
      .conn
      .call(|conn| {
        Ok(conn.query_row("SELECT COUNT(*) FROM fact_observation", [], |r| r.get(0))?)
      })
      .await?;
    Ok(count(n))
  }

  async fn orphaned_observation_count(&self) -> Result<usize> {
    let n: i64 = self
      .conn
      .call(|conn| {
        Ok(conn.query_row(
          "SELECT COUNT(*) FROM fact_observation f
           LEFT JOIN dim_topic t    ON t.topic_id = f.topic_id
           LEFT JOIN dim_question q ON q.question_id = f.question_id
           LEFT JOIN dim_location l ON l.location_id = f.location_id
           WHERE t.topic_id IS NULL
              OR q.question_id IS NULL
              OR l.location_id IS NULL",
          [],
          |r| r.get(0),
        )?)
      })
      .await?;
    Ok(count(n))
  }

  async fn touch_observations(&self, observation_ids: Vec<i64>) -> Result<usize> {
    let now = encode_dt(Utc::now());
    let n = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut touched = 0;
        {
          let mut stmt = tx.prepare(
            "UPDATE fact_observation SET updated_at = ?1 WHERE observation_id = ?2",
          )?;
          for id in &observation_ids {
            touched += stmt.execute(rusqlite::params![now, id])?;
          }
        }
        tx.commit()?;
        Ok(touched)
      })
      .await?;
    Ok(n)
  }

  // ── Business entities ─────────────────────────────────────────────────

  async fn customers(&self) -> Result<Vec<Customer>> {
    type RawCustomer =
      (i64, String, String, Option<String>, Option<String>, String);
    type RawAddress = (
      i64,
      Option<String>,
      Option<String>,
      Option<String>,
      Option<String>,
      Option<String>,
      Option<String>,
    );

    let (customers, addresses): (Vec<RawCustomer>, Vec<RawAddress>) = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT customer_id, last_name, first_name, middle_initial, suffix, birth_date
           FROM customers ORDER BY customer_id",
        )?;
        let customers = stmt
          .query_map([], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = conn.prepare(
          "SELECT customer_id, address_line, city, state_code, zip, valid_from, valid_to
           FROM customer_addresses ORDER BY address_id",
        )?;
        let addresses = stmt
          .query_map([], |r| {
            Ok((
              r.get(0)?,
              r.get(1)?,
              r.get(2)?,
              r.get(3)?,
              r.get(4)?,
              r.get(5)?,
              r.get(6)?,
            ))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok((customers, addresses))
      })
      .await?;

    let mut by_id: BTreeMap<i64, Customer> = BTreeMap::new();
    for (id, last_name, first_name, middle_initial, suffix, birth) in customers {
      let key = CustomerKey {
        last_name,
        first_name,
        middle_initial,
        suffix,
        birth_date: decode_date(&birth)?,
      };
      by_id.insert(id, Customer { key, addresses: Vec::new() });
    }
    for (customer_id, address_line, city, state, zip, from, to) in addresses {
      let Some(customer) = by_id.get_mut(&customer_id) else {
        continue;
      };
      customer.addresses.push(CustomerAddress {
        address_line,
        city,
        state,
        zip,
        valid_from: from.as_deref().map(decode_date).transpose()?,
        valid_to: to.as_deref().map(decode_date).transpose()?,
      });
    }
    Ok(by_id.into_values().collect())
  }

  async fn accounts(&self) -> Result<Vec<Account>> {
    let accounts = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT name, address_line, city, state_code, zip, company_code
           FROM accounts ORDER BY account_id",
        )?;
        let rows = stmt
          .query_map([], |r| {
            Ok(Account {
              key: AccountKey {
                name:         r.get(0)?,
                address_line: r.get(1)?,
                city:         r.get(2)?,
                state:        r.get(3)?,
                zip:          r.get(4)?,
                company_code: r.get(5)?,
              },
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(accounts)
  }

  // ── Bridge ────────────────────────────────────────────────────────────

  async fn write_bridge(
    &self,
    rows: Vec<NewBridgeRow>,
    mode: BridgeWriteMode,
  ) -> Result<BridgeWrite> {
    let now = encode_dt(Utc::now());
    let write = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut write = BridgeWrite::default();

        if mode == BridgeWriteMode::FullRebuild {
          write.removed = tx.execute("DELETE FROM geo_bridge", [])?;
        }

        {
          let mut find = tx.prepare(
            "SELECT bridge_id FROM geo_bridge
             WHERE entity_kind = ?1
               AND customer_key IS ?2
               AND account_key IS ?3
               AND state_code = ?4",
          )?;
          let mut touch =
            tx.prepare("UPDATE geo_bridge SET last_updated = ?1 WHERE bridge_id = ?2")?;
          let mut insert = tx.prepare(
            "INSERT INTO geo_bridge
               (entity_kind, customer_key, account_key, state_code, last_updated)
             VALUES (?1, ?2, ?3, ?4, ?5)",
          )?;

          for row in &rows {
            let (customer_key, account_key) = match row.kind {
              EntityKind::Customer => (Some(row.token.as_str()), None),
              EntityKind::Account => (None, Some(row.token.as_str())),
            };
            let existing: Option<i64> = find
              .query_row(
                rusqlite::params![
                  row.kind.as_str(),
                  customer_key,
                  account_key,
                  row.state.as_str()
                ],
                |r| r.get(0),
              )
              .optional()?;
            match existing {
              Some(id) => {
                touch.execute(rusqlite::params![now, id])?;
                write.refreshed += 1;
              }
              None => {
                insert.execute(rusqlite::params![
                  row.kind.as_str(),
                  customer_key,
                  account_key,
                  row.state.as_str(),
                  now
                ])?;
                write.inserted += 1;
              }
            }
          }
        }

        let total: i64 =
          tx.query_row("SELECT COUNT(*) FROM geo_bridge", [], |r| r.get(0))?;
        write.total = count(total);
        tx.commit()?;
        Ok(write)
      })
      .await?;
    Ok(write)
  }

  async fn bridge_rows(&self) -> Result<Vec<BridgeRow>> {
    let raws = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT bridge_id, entity_kind, customer_key, account_key, state_code, last_updated
           FROM geo_bridge ORDER BY bridge_id",
        )?;
        let rows = stmt
          .query_map([], |row| RawBridgeRow::from_row(row, 0))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawBridgeRow::into_bridge_row).collect()
  }

  // ── Cross-domain read ─────────────────────────────────────────────────

  async fn linked_observations<'a>(
    &'a self,
    query: &'a ViewQuery,
  ) -> Result<Vec<LinkedObservation>> {
    let kind = query.kind.map(|k| k.as_str());
    let token = query.token.as_ref().map(|t| t.as_str().to_owned());
    let state = query.state.map(|s| s.as_str().to_owned());
    let topic = query.topic.clone();
    let limit = query.limit.map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX));
    let offset = query.offset.map_or(0, |n| i64::try_from(n).unwrap_or(i64::MAX));

    let sql = format!(
      "SELECT {OBSERVATION_COLUMNS},
              b.bridge_id, b.entity_kind, b.customer_key, b.account_key,
              b.state_code, b.last_updated,
              l.location_desc, t.topic_name, q.question_text, vt.type_name,
              c1.category_name, s1.stratification_name,
              c2.category_name, s2.stratification_name,
              c3.category_name, s3.stratification_name
       FROM geo_bridge b
       JOIN dim_location l     ON l.location_abbr = b.state_code
       JOIN fact_observation f ON f.location_id = l.location_id
       JOIN dim_topic t        ON t.topic_id = f.topic_id
       JOIN dim_question q     ON q.question_id = f.question_id
       LEFT JOIN dim_value_type vt ON vt.value_type_id = f.value_type_id
       LEFT JOIN dim_stratification s1          ON s1.stratification_id = f.stratification_1_id
       LEFT JOIN dim_stratification_category c1 ON c1.category_id = s1.category_id
       LEFT JOIN dim_stratification s2          ON s2.stratification_id = f.stratification_2_id
       LEFT JOIN dim_stratification_category c2 ON c2.category_id = s2.category_id
       LEFT JOIN dim_stratification s3          ON s3.stratification_id = f.stratification_3_id
       LEFT JOIN dim_stratification_category c3 ON c3.category_id = s3.category_id
       WHERE (?1 IS NULL OR b.entity_kind = ?1)
         AND (?2 IS NULL OR COALESCE(b.customer_key, b.account_key) = ?2)
         AND (?3 IS NULL OR b.state_code = ?3)
         AND (?4 IS NULL OR t.topic_name = ?4)
       ORDER BY b.bridge_id, f.observation_id
       LIMIT ?5 OFFSET ?6"
    );

    let raws = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(
            rusqlite::params![kind, token, state, topic, limit, offset],
            RawLinkedObservation::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawLinkedObservation::into_linked).collect()
  }

  // ── Load runs ─────────────────────────────────────────────────────────

  async fn save_run<'a>(&'a self, run: &'a LoadRun) -> Result<()> {
    let run_id = encode_uuid(run.run_id);
    let started_at = encode_dt(run.started_at);
    let finished_at = run.finished_at.map(encode_dt);
    let status = run.status.as_str();
    let counts = (
      run.staging_rows as i64,
      run.inserted as i64,
      run.skipped as i64,
      run.bridge_rows as i64,
    );
    let skip_counts = serde_json::to_string(&run.skip_counts)?;
    let failure = run.failure.clone();

    self
      .conn
      .call(move |conn| {
        let (staging_rows, inserted, skipped, bridge_rows) = counts;
        conn.execute(
          "INSERT INTO load_runs (
             run_id, started_at, finished_at, status,
             staging_rows, inserted, skipped, skip_counts, bridge_rows, failure
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
           ON CONFLICT(run_id) DO UPDATE SET
             finished_at  = excluded.finished_at,
             status       = excluded.status,
             staging_rows = excluded.staging_rows,
             inserted     = excluded.inserted,
             skipped      = excluded.skipped,
             skip_counts  = excluded.skip_counts,
             bridge_rows  = excluded.bridge_rows,
             failure      = excluded.failure",
          rusqlite::params![
            run_id,
            started_at,
            finished_at,
            status,
            staging_rows,
            inserted,
            skipped,
            skip_counts,
            bridge_rows,
            failure
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn get_run(&self, run_id: Uuid) -> Result<Option<LoadRun>> {
    let id = encode_uuid(run_id);
    let sql = format!("SELECT {LOAD_RUN_COLUMNS} FROM load_runs WHERE run_id = ?1");
    let raw = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(&sql, rusqlite::params![id], RawLoadRun::from_row)
            .optional()?,
        )
      })
      .await?;
    raw.map(RawLoadRun::into_run).transpose()
  }

  async fn latest_run(&self) -> Result<Option<LoadRun>> {
    // Runs are inserted once at start and only updated after, so rowid order
    // is start order.
    let sql = format!("SELECT {LOAD_RUN_COLUMNS} FROM load_runs ORDER BY rowid DESC LIMIT 1");
    let raw = self
      .conn
      .call(move |conn| Ok(conn.query_row(&sql, [], RawLoadRun::from_row).optional()?))
      .await?;
    raw.map(RawLoadRun::into_run).transpose()
  }
}

#[cfg(test)]
impl SqliteStore {
  /// Run raw SQL, bypassing the trait. Lets tests set up states the pipeline
  /// never produces.
  pub(crate) async fn execute_raw(&self, sql: &'static str) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.execute_batch(sql)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}
