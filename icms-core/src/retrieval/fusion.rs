//! Fuses per-mode hits into a single ranked `Evidence` list, merging hits
//! that point at the same source row so a single Evidence can carry
//! non-zero scores across more than one mode.

use super::types::ModeHit;
use crate::config::RetrievalWeights;
use crate::domain::evidence::Evidence;
use std::collections::HashMap;

pub fn fuse(hits: Vec<ModeHit>, weights: &RetrievalWeights, top_k: usize) -> Vec<Evidence> {
    let mut merged: HashMap<String, ModeHit> = HashMap::new();

    for hit in hits {
        let key = locator_key(&hit);
        merged
            .entry(key)
            .and_modify(|existing| {
                existing.dense = existing.dense.max(hit.dense);
                existing.sparse = existing.sparse.max(hit.sparse);
                existing.rule = existing.rule.max(hit.rule);
                existing.golden = existing.golden.max(hit.golden);
                if existing.excerpt.is_empty() {
                    existing.excerpt = hit.excerpt.clone();
                }
            })
            .or_insert(hit);
    }

    let mut evidence: Vec<Evidence> = merged
        .into_values()
        .map(|hit| {
            let components = crate::domain::evidence::ScoreComponents {
                dense: hit.dense,
                sparse: hit.sparse,
                rule: hit.rule,
                golden: hit.golden,
            };
            let score = components.fused(weights);
            hit.into_evidence().with_score(score, components)
        })
        .collect();

    evidence.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    evidence.truncate(top_k);
    evidence
}

fn locator_key(hit: &ModeHit) -> String {
    match &hit.source_locator {
        crate::domain::evidence::SourceLocator::TableRow { table, key } => format!("table:{table}:{key}"),
        crate::domain::evidence::SourceLocator::TextSection { file, chapter, section } => {
            format!("text:{file}:{chapter}:{}", section.clone().unwrap_or_default())
        }
        crate::domain::evidence::SourceLocator::GraphNode { node_id } => format!("graph:{node_id}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::evidence::{SourceKind, SourceLocator};

    #[test]
    fn fusion_ranks_by_weighted_score_and_dedupes() {
        let weights = RetrievalWeights::default();
        let hits = vec![
            ModeHit {
                source_kind: SourceKind::NcmTable,
                source_locator: SourceLocator::table_row("ncm", "30049069"),
                excerpt: "Medicamentos".into(),
                dense: 0.9,
                sparse: 0.0,
                rule: 0.0,
                golden: 0.0,
            },
            ModeHit {
                source_kind: SourceKind::NcmTable,
                source_locator: SourceLocator::table_row("ncm", "30049069"),
                excerpt: String::new(),
                dense: 0.0,
                sparse: 0.8,
                rule: 0.0,
                golden: 0.0,
            },
            ModeHit {
                source_kind: SourceKind::CestRule,
                source_locator: SourceLocator::table_row("cest_rule", "1300100:conv_142"),
                excerpt: "Some rule".into(),
                dense: 0.1,
                sparse: 0.1,
                rule: 0.1,
                golden: 0.0,
            },
        ];

        let evidence = fuse(hits, &weights, 10);
        assert_eq!(evidence.len(), 2);
        assert_eq!(evidence[0].excerpt, "Medicamentos");
    }
}
