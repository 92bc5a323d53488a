//! Building the geographic bridge from the business entity tables.
//!
//! A customer contributes one (customer, state) pair per address; an account
//! contributes the single state in its own key. Pairs are deduplicated before
//! they reach the store, and the store refuses duplicates anyway, so running
//! the builder twice leaves the bridge unchanged apart from `last_updated`.

use std::collections::BTreeSet;

use carebridge_core::{
  bridge::{BridgeWrite, BridgeWriteMode, NewBridgeRow},
  entity::{Account, Customer},
  geo::StateCode,
  natural_key::{EntityKind, EntityToken},
  store::WarehouseStore,
};
use serde::Serialize;

use crate::{Error, Result};

/// A state attribute that could not become a bridge row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Exclusion {
  pub kind:  EntityKind,
  pub token: EntityToken,
  /// The raw state value; `None` when it was missing altogether.
  pub state: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BridgeReport {
  /// Distinct (entity, state) pairs written.
  pub pairs:    usize,
  pub excluded: Vec<Exclusion>,
  pub write:    BridgeWrite,
}

/// Derive the distinct bridge pairs for the given entities.
pub fn bridge_pairs(
  customers: &[Customer],
  accounts: &[Account],
) -> (BTreeSet<NewBridgeRow>, Vec<Exclusion>) {
  let mut pairs = BTreeSet::new();
  let mut excluded = Vec::new();

  let mut push = |kind: EntityKind, token: &EntityToken, raw: Option<&str>| {
    match raw.map(StateCode::parse) {
      Some(Ok(state)) => {
        pairs.insert(NewBridgeRow { kind, token: token.clone(), state });
      }
      _ => {
        tracing::warn!(
          kind = %kind,
          token = %token,
          state = ?raw,
          "excluding entity from bridge: missing or malformed state"
        );
        excluded.push(Exclusion {
          kind,
          token: token.clone(),
          state: raw.map(str::to_owned),
        });
      }
    }
  };

  for customer in customers {
    let token = customer.key.token();
    if customer.addresses.is_empty() {
      push(EntityKind::Customer, &token, None);
    }
    for address in &customer.addresses {
      push(EntityKind::Customer, &token, address.state.as_deref());
    }
  }
  for account in accounts {
    push(EntityKind::Account, &account.key.token(), Some(&account.key.state));
  }

  (pairs, excluded)
}

pub struct BridgeBuilder<'s, S> {
  store: &'s S,
  mode:  BridgeWriteMode,
}

impl<'s, S: WarehouseStore> BridgeBuilder<'s, S> {
  pub fn new(store: &'s S, mode: BridgeWriteMode) -> Self { Self { store, mode } }

  /// Read every customer and account and write the resulting pairs.
  pub async fn rebuild(&self) -> Result<BridgeReport> {
    let customers = self.store.customers().await.map_err(Error::store)?;
    let accounts = self.store.accounts().await.map_err(Error::store)?;

    let (pairs, excluded) = bridge_pairs(&customers, &accounts);
    let n = pairs.len();
    let write = self
      .store
      .write_bridge(pairs.into_iter().collect(), self.mode)
      .await
      .map_err(Error::store)?;

    tracing::info!(
      customers = customers.len(),
      accounts = accounts.len(),
      pairs = n,
      excluded = excluded.len(),
      inserted = write.inserted,
      refreshed = write.refreshed,
      removed = write.removed,
      total = write.total,
      "bridge rebuilt"
    );
    Ok(BridgeReport { pairs: n, excluded, write })
  }
}
