//! NCM (Nomenclatura Comum do Mercosul) code type and hierarchy helpers.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A validated, normalised 8-digit NCM code.
///
/// Construction strips punctuation and pads/validates length so that every
/// call site downstream of `Ncm::parse` can rely on a clean 8-digit string
/// rather than re-checking the raw input (per KB normalisation rules).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ncm(String);

impl Ncm {
    pub fn parse(raw: &str) -> Result<Self> {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return Err(Error::input("NCM code is empty"));
        }
        if digits.len() > 8 {
            return Err(Error::input(format!("NCM code '{raw}' has more than 8 digits")));
        }
        let padded = format!("{:0<8}", digits);
        Ok(Self(padded))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 2-digit chapter prefix.
    pub fn chapter(&self) -> &str {
        &self.0[0..2]
    }

    /// 4-digit position prefix.
    pub fn position(&self) -> &str {
        &self.0[0..4]
    }

    /// 6-digit subposition prefix.
    pub fn subposition(&self) -> &str {
        &self.0[0..6]
    }

    /// All hierarchy prefixes from most general (chapter) to the full code,
    /// in the order used for index lookups and graph edges: 2, 4, 6, 8.
    pub fn prefixes(&self) -> [&str; 4] {
        [self.chapter(), self.position(), self.subposition(), self.as_str()]
    }

    /// True if `pattern` (a 2/4/6/8-digit prefix) matches this code.
    pub fn matches_pattern(&self, pattern: &str) -> bool {
        !pattern.is_empty() && self.0.starts_with(pattern)
    }
}

impl TryFrom<String> for Ncm {
    type Error = Error;
    fn try_from(value: String) -> Result<Self> {
        Ncm::parse(&value)
    }
}

impl From<Ncm> for String {
    fn from(ncm: Ncm) -> String {
        ncm.0
    }
}

impl fmt::Display for Ncm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One row of the `ncm` structured table, plus derived hierarchy levels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NcmNode {
    pub code: Ncm,
    pub description: String,
}

impl NcmNode {
    pub fn chapter(&self) -> &str {
        self.code.chapter()
    }

    pub fn position(&self) -> &str {
        self.code.position()
    }

    pub fn subposition(&self) -> &str {
        self.code.subposition()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_strips_punctuation_and_pads() {
        let ncm = Ncm::parse("3004.90.69").unwrap();
        assert_eq!(ncm.as_str(), "30049069");

        let short = Ncm::parse("3917").unwrap();
        assert_eq!(short.as_str(), "39170000");
    }

    #[test]
    fn rejects_too_many_digits() {
        assert!(Ncm::parse("123456789").is_err());
    }

    #[test]
    fn hierarchy_prefixes() {
        let ncm = Ncm::parse("30049069").unwrap();
        assert_eq!(ncm.chapter(), "30");
        assert_eq!(ncm.position(), "3004");
        assert_eq!(ncm.subposition(), "300490");
        assert!(ncm.matches_pattern("3004"));
        assert!(!ncm.matches_pattern("3917"));
    }
}
