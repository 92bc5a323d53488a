//! The unified location view: health observations seen through the business
//! entities that share their state.
//!
//! Nothing here is materialized. The store produces bridge ⋈ location ⋈
//! observation rows; this module left-joins the business entity onto each by
//! kind and token.

use std::collections::HashMap;

use carebridge_core::{
  entity::BusinessEntity,
  natural_key::{EntityKind, EntityToken},
  store::{LinkedObservation, ViewQuery, WarehouseStore},
};
use serde::Serialize;

use crate::{Error, Result};

/// One (entity, state, observation) combination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnifiedRow {
  pub linked: LinkedObservation,
  /// `None` when the bridge refers to an entity that no longer exists.
  pub entity: Option<BusinessEntity>,
}

pub struct UnifiedView<'s, S> {
  store: &'s S,
}

impl<'s, S: WarehouseStore> UnifiedView<'s, S> {
  pub fn new(store: &'s S) -> Self { Self { store } }

  pub async fn query(&self, query: &ViewQuery) -> Result<Vec<UnifiedRow>> {
    let linked = self
      .store
      .linked_observations(query)
      .await
      .map_err(Error::store)?;
    if linked.is_empty() {
      return Ok(Vec::new());
    }

    let mut entities: HashMap<(EntityKind, EntityToken), BusinessEntity> = HashMap::new();
    if linked.iter().any(|l| l.kind == EntityKind::Customer) {
      for c in self.store.customers().await.map_err(Error::store)? {
        let entity = BusinessEntity::Customer(c);
        entities.insert((entity.kind(), entity.token()), entity);
      }
    }
    if linked.iter().any(|l| l.kind == EntityKind::Account) {
      for a in self.store.accounts().await.map_err(Error::store)? {
        let entity = BusinessEntity::Account(a);
        entities.insert((entity.kind(), entity.token()), entity);
      }
    }

    let rows = linked
      .into_iter()
      .map(|linked| {
        let entity = entities.get(&(linked.kind, linked.token.clone())).cloned();
        if entity.is_none() {
          tracing::debug!(
            bridge_id = linked.bridge_id,
            token = %linked.token,
            "bridge row has no matching entity"
          );
        }
        UnifiedRow { linked, entity }
      })
      .collect();
    Ok(rows)
  }
}
