//! Natural-key tokens for business entities.
//!
//! Customers and accounts are identified by multi-field tuples rather than a
//! single opaque id. A token is the canonical serialisation of such a tuple:
//!
//! ```text
//! customer|5:Smith|4:Jane|1:Q|-|10:1980-04-01
//! ```
//!
//! Every field is either `-` (absent) or `<byte length>:<value>`. Values are
//! length-prefixed, so any character (including `|`, `:` and `-`) may appear
//! inside a field without two different tuples ever producing the same token.
//! Values are taken verbatim: keys are case-sensitive and whitespace is
//! significant.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const FIELD_SEPARATOR: char = '|';
const LENGTH_SEPARATOR: char = ':';
const ABSENT: char = '-';

// ─── Entity kind ─────────────────────────────────────────────────────────────

/// Which business-entity universe a natural key belongs to.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
  Customer,
  Account,
}

impl EntityKind {
  /// The discriminant stored in the bridge table and used as token prefix.
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Customer => "customer",
      Self::Account => "account",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "customer" => Ok(Self::Customer),
      "account" => Ok(Self::Account),
      other => Err(Error::UnknownEntityKind(other.to_owned())),
    }
  }

  /// Number of fields in this kind's natural key.
  pub fn arity(self) -> usize {
    match self {
      Self::Customer => 5,
      Self::Account => 6,
    }
  }
}

impl fmt::Display for EntityKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

// ─── Token ───────────────────────────────────────────────────────────────────

/// The canonical string form of a business entity's natural key.
#[derive(
  Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EntityToken(String);

impl EntityToken {
  /// Wrap a token read back from storage, rejecting anything that does not
  /// decode.
  pub fn parse(s: &str) -> Result<Self> {
    decode(s)?;
    Ok(Self(s.to_owned()))
  }

  pub fn as_str(&self) -> &str { &self.0 }

  /// Split the token back into its kind and field values.
  pub fn decode(&self) -> Result<(EntityKind, Vec<Option<String>>)> {
    decode(&self.0)
  }
}

impl fmt::Display for EntityToken {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// Serialise an identifying tuple into a token.
///
/// `fields` must hold exactly [`EntityKind::arity`] entries; prefer
/// [`CustomerKey::token`] and [`AccountKey::token`], which always do.
pub fn normalize(kind: EntityKind, fields: &[Option<&str>]) -> EntityToken {
  debug_assert_eq!(fields.len(), kind.arity(), "wrong field count for {kind}");

  let mut out = String::from(kind.as_str());
  for field in fields {
    out.push(FIELD_SEPARATOR);
    match field {
      None => out.push(ABSENT),
      Some(value) => {
        out.push_str(&value.len().to_string());
        out.push(LENGTH_SEPARATOR);
        out.push_str(value);
      }
    }
  }
  EntityToken(out)
}

fn decode(token: &str) -> Result<(EntityKind, Vec<Option<String>>)> {
  let malformed = || Error::MalformedToken(token.to_owned());

  let (kind_str, mut rest) =
    token.split_once(FIELD_SEPARATOR).ok_or_else(malformed)?;
  let kind = EntityKind::parse(kind_str).map_err(|_| malformed())?;

  let mut fields = Vec::with_capacity(kind.arity());
  loop {
    if let Some(after) = rest.strip_prefix(ABSENT) {
      fields.push(None);
      rest = after;
    } else {
      let (len_str, after) =
        rest.split_once(LENGTH_SEPARATOR).ok_or_else(malformed)?;
      // Canonical lengths only: no sign, no leading zeros.
      if len_str.is_empty()
        || !len_str.bytes().all(|b| b.is_ascii_digit())
        || (len_str.len() > 1 && len_str.starts_with('0'))
      {
        return Err(malformed());
      }
      let len: usize = len_str.parse().map_err(|_| malformed())?;
      let value = after.get(..len).ok_or_else(malformed)?;
      fields.push(Some(value.to_owned()));
      rest = &after[len..];
    }

    if rest.is_empty() {
      break;
    }
    rest = rest.strip_prefix(FIELD_SEPARATOR).ok_or_else(malformed)?;
  }

  if fields.len() != kind.arity() {
    return Err(malformed());
  }
  Ok((kind, fields))
}

// ─── Typed keys ──────────────────────────────────────────────────────────────

/// Identifying attributes of a person customer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CustomerKey {
  pub last_name:      String,
  pub first_name:     String,
  pub middle_initial: Option<String>,
  pub suffix:         Option<String>,
  pub birth_date:     NaiveDate,
}

impl CustomerKey {
  pub fn token(&self) -> EntityToken {
    let birth = self.birth_date.format("%Y-%m-%d").to_string();
    normalize(
      EntityKind::Customer,
      &[
        Some(&self.last_name),
        Some(&self.first_name),
        self.middle_initial.as_deref(),
        self.suffix.as_deref(),
        Some(&birth),
      ],
    )
  }
}

/// Identifying attributes of a business account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountKey {
  pub name:         String,
  pub address_line: String,
  pub city:         String,
  /// Raw state attribute as held by the account system; not validated here.
  pub state:        String,
  pub zip:          String,
  pub company_code: String,
}

impl AccountKey {
  pub fn token(&self) -> EntityToken {
    normalize(
      EntityKind::Account,
      &[
        Some(&self.name),
        Some(&self.address_line),
        Some(&self.city),
        Some(&self.state),
        Some(&self.zip),
        Some(&self.company_code),
      ],
    )
  }
}
