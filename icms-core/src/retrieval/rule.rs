//! Rule retrieval mode: deterministic NCM->CEST lookup via the graph store
//! and structured CEST rule table, ranked by pattern specificity.

use super::types::ModeHit;
use crate::domain::cest::CestRule;
use crate::domain::evidence::{SourceKind, SourceLocator};
use crate::domain::ncm::Ncm;
use crate::error::Result;
use crate::kb::KbSnapshot;
use chrono::Utc;

pub fn run(snapshot: &KbSnapshot, ncm_hint: &str, segment_id: Option<&str>) -> Result<Vec<ModeHit>> {
    let ncm = match Ncm::parse(ncm_hint) {
        Ok(ncm) => ncm,
        Err(_) => return Ok(Vec::new()),
    };

    let today = Utc::now().date_naive();
    let rules: Vec<CestRule> = snapshot
        .structured
        .cest_rules_for_ncm(&ncm, segment_id)?
        .into_iter()
        .filter(|rule| rule.is_active_on(today))
        .collect();

    let max_specificity = rules.iter().map(CestRule::most_specific_pattern_len).max().unwrap_or(1).max(1) as f64;

    Ok(rules
        .into_iter()
        .map(|rule| {
            let specificity = rule.most_specific_pattern_len() as f64 / max_specificity;
            ModeHit {
                source_kind: SourceKind::CestRule,
                source_locator: SourceLocator::table_row("cest_rule", format!("{}:{}", rule.cest, rule.source)),
                excerpt: rule.description.clone(),
                dense: 0.0,
                sparse: 0.0,
                rule: specificity,
                golden: 0.0,
            }
        })
        .collect())
}
