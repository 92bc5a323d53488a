//! The geographic bridge between business entities and the health warehouse.
//!
//! A bridge row says "this customer (or account) is associated with this
//! state". An entity may appear once per state it has ever been linked to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  geo::StateCode,
  natural_key::{EntityKind, EntityToken},
};

/// A bridge row to write. The kind decides which key column the token lands
/// in, so exactly one of the two is ever populated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NewBridgeRow {
  pub kind:  EntityKind,
  pub token: EntityToken,
  pub state: StateCode,
}

/// A persisted bridge row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeRow {
  pub bridge_id:    i64,
  pub kind:         EntityKind,
  pub customer_key: Option<EntityToken>,
  pub account_key:  Option<EntityToken>,
  pub state:        StateCode,
  pub last_updated: DateTime<Utc>,
}

impl BridgeRow {
  /// Whichever key column is populated.
  pub fn token(&self) -> Option<&EntityToken> {
    match self.kind {
      EntityKind::Customer => self.customer_key.as_ref(),
      EntityKind::Account => self.account_key.as_ref(),
    }
  }
}

/// How a bridge write treats rows that are already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeWriteMode {
  /// Insert unseen pairs and touch `last_updated` on existing ones.
  #[default]
  Refresh,
  /// Delete every row first, then insert the given pairs.
  FullRebuild,
}

/// Counts from one bridge write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeWrite {
  pub inserted:  usize,
  pub refreshed: usize,
  pub removed:   usize,
  /// Rows in the bridge table after the write.
  pub total:     usize,
}
