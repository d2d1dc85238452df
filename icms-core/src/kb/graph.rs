//! Graph store: adjacency lists over NCM hierarchy, CEST-to-NCM
//! associations, segments, and golden-set links.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A node in the classification graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GraphNodeRef {
    Ncm(String),
    Cest(String),
    Segment(String),
    GoldenSetEntry(String),
}

impl GraphNodeRef {
    fn key(&self) -> String {
        match self {
            Self::Ncm(code) => format!("ncm:{code}"),
            Self::Cest(code) => format!("cest:{code}"),
            Self::Segment(id) => format!("segment:{id}"),
            Self::GoldenSetEntry(id) => format!("golden:{id}"),
        }
    }
}

/// Why two nodes are linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// NCM chapter/position/subposition/code hierarchy.
    NcmParent,
    /// A CEST rule applies under an NCM pattern.
    CestAppliesTo,
    /// A CEST rule belongs to a segment.
    CestInSegment,
    /// A golden-set entry's confirmed NCM.
    GoldenSetNcm,
}

/// Adjacency-list graph over the classification hierarchy, built from the
/// structured store at load time and queried for hierarchy walks and
/// specificity-based CEST candidate expansion.
#[derive(Debug, Clone, Default)]
pub struct GraphStore {
    edges: HashMap<String, Vec<(EdgeKind, GraphNodeRef)>>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self { edges: HashMap::new() }
    }

    pub fn add_edge(&mut self, from: GraphNodeRef, kind: EdgeKind, to: GraphNodeRef) {
        self.edges.entry(from.key()).or_default().push((kind, to));
    }

    pub fn neighbors(&self, from: &GraphNodeRef) -> &[(EdgeKind, GraphNodeRef)] {
        self.edges.get(&from.key()).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Walks the NCM chapter -> position -> subposition -> code chain,
    /// inserting `NcmParent` edges between each consecutive pair.
    pub fn add_ncm_hierarchy(&mut self, chapter: &str, position: &str, subposition: &str, code: &str) {
        self.add_edge(GraphNodeRef::Ncm(position.to_string()), EdgeKind::NcmParent, GraphNodeRef::Ncm(chapter.to_string()));
        self.add_edge(GraphNodeRef::Ncm(subposition.to_string()), EdgeKind::NcmParent, GraphNodeRef::Ncm(position.to_string()));
        self.add_edge(GraphNodeRef::Ncm(code.to_string()), EdgeKind::NcmParent, GraphNodeRef::Ncm(subposition.to_string()));
    }

    pub fn cest_candidates_for_ncm(&self, ncm_prefixes: &[&str]) -> Vec<String> {
        let mut found = Vec::new();
        for prefix in ncm_prefixes {
            for (kind, target) in self.neighbors(&GraphNodeRef::Ncm(prefix.to_string())) {
                if *kind == EdgeKind::CestAppliesTo {
                    if let GraphNodeRef::Cest(code) = target {
                        found.push(code.clone());
                    }
                }
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ncm_hierarchy_walk() {
        let mut graph = GraphStore::new();
        graph.add_ncm_hierarchy("30", "3004", "300490", "30049069");

        let neighbors = graph.neighbors(&GraphNodeRef::Ncm("30049069".into()));
        assert_eq!(neighbors.len(), 1);
        assert_eq!(neighbors[0].1, GraphNodeRef::Ncm("300490".into()));
    }

    #[test]
    fn cest_candidates_by_ncm_prefix() {
        let mut graph = GraphStore::new();
        graph.add_edge(GraphNodeRef::Ncm("3004".into()), EdgeKind::CestAppliesTo, GraphNodeRef::Cest("1300100".into()));

        let candidates = graph.cest_candidates_for_ncm(&["3004", "30049069"]);
        assert_eq!(candidates, vec!["1300100".to_string()]);
    }
}
