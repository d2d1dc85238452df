//! CEST (Código Especificador da Substituição Tributária) code type and rule model.

use crate::error::{Error, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A validated, normalised 7-digit CEST code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cest(String);

impl Cest {
    /// Parse a CEST code in either `XX.YYY.ZZ` or bare-digit form.
    pub fn parse(raw: &str) -> Result<Self> {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.len() != 7 {
            return Err(Error::input(format!(
                "CEST code '{raw}' must decompose to 7 digits, got {}",
                digits.len()
            )));
        }
        Ok(Self(digits))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `segment_id` is the first two digits of the CEST code.
    pub fn segment_id(&self) -> &str {
        &self.0[0..2]
    }
}

impl TryFrom<String> for Cest {
    type Error = Error;
    fn try_from(value: String) -> Result<Self> {
        Cest::parse(&value)
    }
}

impl From<Cest> for String {
    fn from(cest: Cest) -> String {
        cest.0
    }
}

impl fmt::Display for Cest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Final CEST outcome for a Classification: either a concrete code or the
/// explicit non-applicability verdict named in the data model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CestOutcome {
    Code(Cest),
    NotApplicable,
}

impl fmt::Display for CestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(c) => write!(f, "{c}"),
            Self::NotApplicable => write!(f, "NOT_APPLICABLE"),
        }
    }
}

/// Validity/revocation status of a CEST rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleSituation {
    Vigente,
    Revogado,
}

/// Which table the rule originates from; used to prefer the regional record
/// over Convênio 142 when both are vigente for the same NCM pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleSource {
    Convenio142,
    Regional(String),
}

impl fmt::Display for RuleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Convenio142 => write!(f, "conv_142"),
            Self::Regional(uf) => write!(f, "regional_{uf}"),
        }
    }
}

/// One row of the `cest_rule` table, joined with its `ncm_pattern`
/// associations (`cest_ncm_association`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CestRule {
    pub cest: Cest,
    pub segment_id: String,
    pub description: String,
    /// One or more NCM prefixes (2/4/6/8 digits) this rule applies under.
    pub ncm_patterns: Vec<String>,
    pub validity_start: NaiveDate,
    pub validity_end: Option<NaiveDate>,
    pub situation: RuleSituation,
    pub source: RuleSource,
}

impl CestRule {
    /// Most specific (longest) ncm_pattern this rule carries, used for
    /// specificity tie-breaking during candidate ranking.
    pub fn most_specific_pattern_len(&self) -> usize {
        self.ncm_patterns
            .iter()
            .map(|p| p.len())
            .max()
            .unwrap_or(0)
    }

    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        if self.situation != RuleSituation::Vigente {
            return false;
        }
        if date < self.validity_start {
            return false;
        }
        match self.validity_end {
            Some(end) => date <= end,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_dotted_form() {
        let cest = Cest::parse("13.001.00").unwrap();
        assert_eq!(cest.as_str(), "1300100");
        assert_eq!(cest.segment_id(), "13");
    }

    #[test]
    fn rejects_wrong_digit_count() {
        assert!(Cest::parse("13.001.0").is_err());
    }

    #[test]
    fn active_window_respects_end_date() {
        let rule = CestRule {
            cest: Cest::parse("0100200").unwrap(),
            segment_id: "01".into(),
            description: "Autopeças".into(),
            ncm_patterns: vec!["3917".into()],
            validity_start: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            validity_end: Some(NaiveDate::from_ymd_opt(2021, 1, 1).unwrap()),
            situation: RuleSituation::Vigente,
            source: RuleSource::Convenio142,
        };
        assert!(rule.is_active_on(NaiveDate::from_ymd_opt(2020, 6, 1).unwrap()));
        assert!(!rule.is_active_on(NaiveDate::from_ymd_opt(2021, 6, 1).unwrap()));
    }
}
