//! SQL schema for the carebridge SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS` / `INSERT OR IGNORE`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Raw CDI rows. Truncated and reloaded on every cycle; column names and
-- order are those of the source export.
CREATE TABLE IF NOT EXISTS staging_cdi (
    row_no                    INTEGER PRIMARY KEY,
    YearStart                 TEXT,
    YearEnd                   TEXT,
    LocationAbbr              TEXT,
    LocationDesc              TEXT,
    DataSource                TEXT,
    Topic                     TEXT,
    Question                  TEXT,
    Response                  TEXT,
    DataValueUnit             TEXT,
    DataValueType             TEXT,
    DataValue                 TEXT,
    DataValueAlt              TEXT,
    DataValueFootnoteSymbol   TEXT,
    DataValueFootnote         TEXT,
    LowConfidenceLimit        TEXT,
    HighConfidenceLimit       TEXT,
    StratificationCategory1   TEXT,
    Stratification1           TEXT,
    StratificationCategory2   TEXT,
    Stratification2           TEXT,
    StratificationCategory3   TEXT,
    Stratification3           TEXT,
    Geolocation               TEXT,
    LocationID                TEXT,
    TopicID                   TEXT,
    QuestionID                TEXT,
    ResponseID                TEXT,
    DataValueTypeID           TEXT,
    StratificationCategoryID1 TEXT,
    StratificationID1         TEXT,
    StratificationCategoryID2 TEXT,
    StratificationID2         TEXT,
    StratificationCategoryID3 TEXT,
    StratificationID3         TEXT
);

-- Dimensions are append-only. Natural keys are unique per table; no UPDATE
-- or DELETE is ever issued against them.
CREATE TABLE IF NOT EXISTS dim_topic (
    topic_id    INTEGER PRIMARY KEY,
    topic_name  TEXT NOT NULL UNIQUE,
    topic_code  TEXT,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS dim_question (
    question_id   INTEGER PRIMARY KEY,
    question_text TEXT NOT NULL UNIQUE,
    question_code TEXT,
    topic_id      INTEGER NOT NULL REFERENCES dim_topic(topic_id),
    created_at    TEXT NOT NULL
);

-- No 'Unknown' member: observations must name a real location.
CREATE TABLE IF NOT EXISTS dim_location (
    location_id   INTEGER PRIMARY KEY,
    location_abbr TEXT NOT NULL UNIQUE,   -- two-letter state code
    location_desc TEXT,
    geolocation   TEXT,
    created_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS dim_stratification_category (
    category_id   INTEGER PRIMARY KEY,
    category_name TEXT NOT NULL UNIQUE,
    category_code TEXT,
    created_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS dim_stratification (
    stratification_id   INTEGER PRIMARY KEY,
    stratification_name TEXT NOT NULL UNIQUE,
    stratification_code TEXT,
    category_id         INTEGER NOT NULL
                        REFERENCES dim_stratification_category(category_id),
    created_at          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS dim_value_type (
    value_type_id   INTEGER PRIMARY KEY,
    type_name       TEXT NOT NULL UNIQUE,
    unit_of_measure TEXT,
    type_code       TEXT,
    created_at      TEXT NOT NULL
);

INSERT OR IGNORE INTO dim_topic (topic_id, topic_name, created_at)
    VALUES (1, 'Unknown', '1970-01-01T00:00:00+00:00');
INSERT OR IGNORE INTO dim_question (question_id, question_text, topic_id, created_at)
    VALUES (1, 'Unknown', 1, '1970-01-01T00:00:00+00:00');
INSERT OR IGNORE INTO dim_stratification_category (category_id, category_name, created_at)
    VALUES (1, 'Unknown', '1970-01-01T00:00:00+00:00');
INSERT OR IGNORE INTO dim_stratification (stratification_id, stratification_name, category_id, created_at)
    VALUES (1, 'Unknown', 1, '1970-01-01T00:00:00+00:00');
INSERT OR IGNORE INTO dim_value_type (value_type_id, type_name, created_at)
    VALUES (1, 'Unknown', '1970-01-01T00:00:00+00:00');

-- Observations are append-only; only updated_at changes after insert.
-- Decimal columns hold canonical decimal text.
CREATE TABLE IF NOT EXISTS fact_observation (
    observation_id        INTEGER PRIMARY KEY,
    topic_id              INTEGER NOT NULL REFERENCES dim_topic(topic_id),
    question_id           INTEGER NOT NULL REFERENCES dim_question(question_id),
    location_id           INTEGER NOT NULL REFERENCES dim_location(location_id),
    value_type_id         INTEGER REFERENCES dim_value_type(value_type_id),
    stratification_1_id   INTEGER REFERENCES dim_stratification(stratification_id),
    stratification_2_id   INTEGER REFERENCES dim_stratification(stratification_id),
    stratification_3_id   INTEGER REFERENCES dim_stratification(stratification_id),
    year_start            INTEGER NOT NULL,
    year_end              INTEGER NOT NULL,
    data_value            TEXT,
    data_value_text       TEXT,
    data_value_alt        TEXT,
    low_confidence_limit  TEXT,
    high_confidence_limit TEXT,
    data_value_unit       TEXT,
    response              TEXT,
    footnote_symbol       TEXT,
    footnote              TEXT,
    data_source           TEXT,
    source_location_id    TEXT,
    source_topic_id       TEXT,
    source_question_id    TEXT,
    source_response_id    TEXT,
    source_value_type_id  TEXT,
    run_id                TEXT,
    loaded_at             TEXT NOT NULL,
    updated_at            TEXT NOT NULL,
    CHECK (year_start <= year_end)
);

-- Business entities. Owned by the business schema; read-only to the pipeline.
CREATE TABLE IF NOT EXISTS customers (
    customer_id    INTEGER PRIMARY KEY,
    last_name      TEXT NOT NULL,
    first_name     TEXT NOT NULL,
    middle_initial TEXT,
    suffix         TEXT,
    birth_date     TEXT NOT NULL   -- YYYY-MM-DD
);

CREATE TABLE IF NOT EXISTS customer_addresses (
    address_id   INTEGER PRIMARY KEY,
    customer_id  INTEGER NOT NULL REFERENCES customers(customer_id),
    address_line TEXT,
    city         TEXT,
    state_code   TEXT,
    zip          TEXT,
    valid_from   TEXT,
    valid_to     TEXT
);

CREATE TABLE IF NOT EXISTS accounts (
    account_id   INTEGER PRIMARY KEY,
    name         TEXT NOT NULL,
    address_line TEXT NOT NULL,
    city         TEXT NOT NULL,
    state_code   TEXT NOT NULL,
    zip          TEXT NOT NULL,
    company_code TEXT NOT NULL
);

-- One row per (entity, state) pair. Exactly one key column is set, matching
-- entity_kind.
CREATE TABLE IF NOT EXISTS geo_bridge (
    bridge_id    INTEGER PRIMARY KEY,
    entity_kind  TEXT NOT NULL,   -- 'customer' | 'account'
    customer_key TEXT,
    account_key  TEXT,
    state_code   TEXT NOT NULL,
    last_updated TEXT NOT NULL,
    CHECK (
        (entity_kind = 'customer' AND customer_key IS NOT NULL AND account_key IS NULL)
     OR (entity_kind = 'account'  AND account_key IS NOT NULL AND customer_key IS NULL)
    ),
    CHECK (length(state_code) = 2)
);

CREATE TABLE IF NOT EXISTS load_runs (
    run_id       TEXT PRIMARY KEY,
    started_at   TEXT NOT NULL,
    finished_at  TEXT,
    status       TEXT NOT NULL,   -- 'running' | 'completed' | 'failed'
    staging_rows INTEGER NOT NULL DEFAULT 0,
    inserted     INTEGER NOT NULL DEFAULT 0,
    skipped      INTEGER NOT NULL DEFAULT 0,
    skip_counts  TEXT NOT NULL DEFAULT '{}',
    bridge_rows  INTEGER NOT NULL DEFAULT 0,
    failure      TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS geo_bridge_pair_uq
    ON geo_bridge(entity_kind, COALESCE(customer_key, account_key), state_code);
CREATE INDEX IF NOT EXISTS geo_bridge_state_idx      ON geo_bridge(state_code);
CREATE INDEX IF NOT EXISTS location_desc_idx         ON dim_location(location_desc);
CREATE INDEX IF NOT EXISTS observation_location_idx  ON fact_observation(location_id);
CREATE INDEX IF NOT EXISTS observation_topic_idx     ON fact_observation(topic_id);
CREATE INDEX IF NOT EXISTS address_customer_idx      ON customer_addresses(customer_id);

PRAGMA user_version = 1;
";
