//! Dimension resolution: natural key in, surrogate key out.
//!
//! Every dimension lookup in the pipeline goes through
//! [`DimensionResolver::resolve`], which wraps the store's get-or-create and
//! memoizes results for the life of the resolver (one run). The typed helpers
//! on top encode the blank-key policy: a blank topic, question or
//! stratification category falls back to the seeded `Unknown` member; a
//! location never does.

use std::collections::{BTreeMap, HashMap};

use carebridge_core::{
  dimension::{DimensionEntry, DimensionKind, SurrogateKey},
  geo::StateCode,
  staging::{StratificationPair, non_blank},
  store::WarehouseStore,
};
use serde::Serialize;

use crate::{Error, Result};

/// Per-kind counters for one resolver's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolverStats {
  /// Rows inserted by this resolver.
  pub created:    BTreeMap<DimensionKind, usize>,
  /// Blank natural keys mapped to the `Unknown` member.
  pub defaulted:  BTreeMap<DimensionKind, usize>,
  pub cache_hits: usize,
}

pub struct DimensionResolver<'s, S> {
  store:     &'s S,
  cache:     HashMap<(DimensionKind, String), SurrogateKey>,
  locations: HashMap<String, SurrogateKey>,
  stats:     ResolverStats,
}

fn owned(value: Option<&str>) -> Option<String> { non_blank(value).map(str::to_owned) }

impl<'s, S: WarehouseStore> DimensionResolver<'s, S> {
  pub fn new(store: &'s S) -> Self {
    Self {
      store,
      cache: HashMap::new(),
      locations: HashMap::new(),
      stats: ResolverStats::default(),
    }
  }

  pub fn stats(&self) -> &ResolverStats { &self.stats }

  /// Find or create the row for `entry` and return its key.
  ///
  /// Existing rows are returned untouched, so attributes from later entries
  /// with the same natural key are ignored.
  pub async fn resolve(&mut self, entry: DimensionEntry) -> Result<SurrogateKey> {
    let kind = entry.kind();
    let cache_key = (kind, entry.natural_key().to_owned());
    if let Some(&key) = self.cache.get(&cache_key) {
      self.stats.cache_hits += 1;
      return Ok(key);
    }

    let resolution = self
      .store
      .get_or_create_dimension(entry)
      .await
      .map_err(Error::store)?;
    if resolution.created {
      *self.stats.created.entry(kind).or_default() += 1;
      tracing::debug!(
        dimension = %kind,
        key = %resolution.key,
        natural_key = %cache_key.1,
        "created dimension row"
      );
    }
    self.cache.insert(cache_key, resolution.key);
    Ok(resolution.key)
  }

  /// Only valid for kinds with a seeded `Unknown` member; a location is
  /// skipped instead.
  fn default_to_unknown(&mut self, row: usize, kind: DimensionKind) -> SurrogateKey {
    debug_assert!(kind.has_unknown_member(), "{kind} has no Unknown member");
    *self.stats.defaulted.entry(kind).or_default() += 1;
    tracing::warn!(row, dimension = %kind, "blank natural key, using Unknown member");
    SurrogateKey::UNKNOWN
  }

  // ── Typed helpers ─────────────────────────────────────────────────────

  pub async fn topic(
    &mut self,
    row: usize,
    name: Option<&str>,
    code: Option<&str>,
  ) -> Result<SurrogateKey> {
    match non_blank(name) {
      Some(name) => {
        self
          .resolve(DimensionEntry::Topic { name: name.to_owned(), code: owned(code) })
          .await
      }
      None => Ok(self.default_to_unknown(row, DimensionKind::Topic)),
    }
  }

  /// `topic` must already be resolved; it is recorded only if the question is
  /// new.
  pub async fn question(
    &mut self,
    row: usize,
    text: Option<&str>,
    code: Option<&str>,
    topic: SurrogateKey,
  ) -> Result<SurrogateKey> {
    match non_blank(text) {
      Some(text) => {
        self
          .resolve(DimensionEntry::Question {
            text: text.to_owned(),
            code: owned(code),
            topic,
          })
          .await
      }
      None => Ok(self.default_to_unknown(row, DimensionKind::Question)),
    }
  }

  /// Resolve a location by state code, creating it if needed. With no code,
  /// fall back to an existing location with exactly this description.
  ///
  /// `None` means the row names no resolvable location; there is no
  /// `Unknown` location to fall back to.
  pub async fn location(
    &mut self,
    abbr: Option<&str>,
    description: Option<&str>,
    geolocation: Option<&str>,
  ) -> Result<Option<SurrogateKey>> {
    if let Some(abbr) = non_blank(abbr) {
      let Ok(abbr) = StateCode::parse(abbr) else {
        return Ok(None);
      };
      let key = self
        .resolve(DimensionEntry::Location {
          abbr,
          description: owned(description),
          geolocation: owned(geolocation),
        })
        .await?;
      return Ok(Some(key));
    }

    let Some(description) = non_blank(description) else {
      return Ok(None);
    };
    if let Some(&key) = self.locations.get(description) {
      self.stats.cache_hits += 1;
      return Ok(Some(key));
    }
    let found = self
      .store
      .find_location_by_description(description.to_owned())
      .await
      .map_err(Error::store)?;
    if let Some(key) = found {
      self.locations.insert(description.to_owned(), key);
    }
    Ok(found)
  }

  /// A slot with no value resolves to `None`. A value with a blank category
  /// is filed under the `Unknown` category.
  pub async fn stratification(
    &mut self,
    row: usize,
    pair: StratificationPair<'_>,
  ) -> Result<Option<SurrogateKey>> {
    let Some(value) = non_blank(pair.value) else {
      return Ok(None);
    };

    let category = match non_blank(pair.category) {
      Some(name) => {
        self
          .resolve(DimensionEntry::StratificationCategory {
            name: name.to_owned(),
            code: owned(pair.category_code),
          })
          .await?
      }
      None => self.default_to_unknown(row, DimensionKind::StratificationCategory),
    };

    let key = self
      .resolve(DimensionEntry::Stratification {
        name: value.to_owned(),
        code: owned(pair.value_code),
        category,
      })
      .await?;
    Ok(Some(key))
  }

  /// Value type is optional on an observation: blank means `None`.
  pub async fn value_type(
    &mut self,
    name: Option<&str>,
    unit: Option<&str>,
    code: Option<&str>,
  ) -> Result<Option<SurrogateKey>> {
    let Some(name) = non_blank(name) else {
      return Ok(None);
    };
    let key = self
      .resolve(DimensionEntry::ValueType {
        name: name.to_owned(),
        unit: owned(unit),
        code: owned(code),
      })
      .await?;
    Ok(Some(key))
  }
}

#[cfg(test)]
mod tests {
  use carebridge_store_sqlite::SqliteStore;

  use super::*;

  #[tokio::test]
  async fn defaulting_counts_per_kind() {
    let store = SqliteStore::open_in_memory().await.unwrap();
    let mut r = DimensionResolver::new(&store);
    assert_eq!(r.default_to_unknown(0, DimensionKind::Topic), SurrogateKey::UNKNOWN);
    r.default_to_unknown(1, DimensionKind::Topic);
    assert_eq!(r.stats().defaulted.get(&DimensionKind::Topic), Some(&2));
  }

  #[tokio::test]
  #[should_panic(expected = "has no Unknown member")]
  async fn location_never_defaults_to_unknown() {
    let store = SqliteStore::open_in_memory().await.unwrap();
    let mut r = DimensionResolver::new(&store);
    r.default_to_unknown(0, DimensionKind::Location);
  }
}
