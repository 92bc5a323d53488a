//! Two-letter state codes: the only attribute shared by the business and
//! health-statistics domains.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A well-formed two-letter state (or territory) abbreviation.
///
/// State codes are case-insensitive by definition; they are stored upper-case
/// so that `"ca"` and `"CA"` meet in the same bridge and location rows.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct StateCode([u8; 2]);

impl StateCode {
  /// Accepts exactly two ASCII letters, ignoring surrounding whitespace.
  pub fn parse(raw: &str) -> Result<Self> {
    match raw.trim().as_bytes() {
      [a, b] if a.is_ascii_alphabetic() && b.is_ascii_alphabetic() => {
        Ok(Self([a.to_ascii_uppercase(), b.to_ascii_uppercase()]))
      }
      _ => Err(Error::MalformedStateCode(raw.to_owned())),
    }
  }

  pub fn as_str(&self) -> &str {
    // Both bytes are ASCII letters by construction.
    std::str::from_utf8(&self.0).unwrap_or("??")
  }
}

impl fmt::Display for StateCode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl TryFrom<String> for StateCode {
  type Error = Error;

  fn try_from(value: String) -> Result<Self> { Self::parse(&value) }
}

impl From<StateCode> for String {
  fn from(code: StateCode) -> Self { code.as_str().to_owned() }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn accepts_two_letters_any_case() {
    assert_eq!(StateCode::parse("CA").unwrap().as_str(), "CA");
    assert_eq!(StateCode::parse("ny").unwrap().as_str(), "NY");
    assert_eq!(StateCode::parse(" tx ").unwrap().as_str(), "TX");
  }

  #[test]
  fn rejects_malformed_codes() {
    for bad in ["", "C", "CAL", "C1", "59", "C A", "É1"] {
      assert!(
        matches!(StateCode::parse(bad), Err(Error::MalformedStateCode(_))),
        "{bad:?} should be rejected"
      );
    }
  }

  #[test]
  fn serde_roundtrip_uses_plain_string() {
    let code = StateCode::parse("wa").unwrap();
    let json = serde_json::to_string(&code).unwrap();
    assert_eq!(json, "\"WA\"");
    let back: StateCode = serde_json::from_str(&json).unwrap();
    assert_eq!(back, code);
    assert!(serde_json::from_str::<StateCode>("\"Wash\"").is_err());
  }
}
