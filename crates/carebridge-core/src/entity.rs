//! Business entities as seen by the pipeline.
//!
//! Customers and accounts belong to the insurance business schema; the
//! pipeline reads them and never writes them. Only the attributes needed to
//! derive a natural key and a state are modelled here.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::natural_key::{AccountKey, CustomerKey, EntityKind, EntityToken};

/// A postal address held for a customer, optionally with the period it was
/// in effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerAddress {
  pub address_line: Option<String>,
  pub city:         Option<String>,
  /// Raw state attribute; validated by the bridge builder.
  pub state:        Option<String>,
  pub zip:          Option<String>,
  pub valid_from:   Option<NaiveDate>,
  pub valid_to:     Option<NaiveDate>,
}

/// A person customer with every address on record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
  pub key:       CustomerKey,
  pub addresses: Vec<CustomerAddress>,
}

/// A business account; its location is part of its natural key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
  pub key: AccountKey,
}

/// Either side of the bridge, as attached to unified view rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BusinessEntity {
  Customer(Customer),
  Account(Account),
}

impl BusinessEntity {
  pub fn kind(&self) -> EntityKind {
    match self {
      Self::Customer(_) => EntityKind::Customer,
      Self::Account(_) => EntityKind::Account,
    }
  }

  pub fn token(&self) -> EntityToken {
    match self {
      Self::Customer(c) => c.key.token(),
      Self::Account(a) => a.key.token(),
    }
  }
}
