//! Evidence: a retrieved fragment grounding an agent's decision.

use serde::{Deserialize, Serialize};

/// Where a piece of Evidence came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    NcmTable,
    CestRule,
    NeshChapter,
    CestRegional,
    ProductExample,
    GoldenSet,
}

/// Locates the original text/table row an Evidence excerpt was drawn from,
/// so a reviewer can re-open it later even after the KB has reloaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "locator_type", rename_all = "snake_case")]
pub enum SourceLocator {
    TableRow { table: String, key: String },
    TextSection { file: String, chapter: String, section: Option<String> },
    GraphNode { node_id: String },
}

impl SourceLocator {
    pub fn table_row(table: impl Into<String>, key: impl Into<String>) -> Self {
        Self::TableRow {
            table: table.into(),
            key: key.into(),
        }
    }
}

/// Score broken down by retrieval mode, matching the Retrieval Toolbox's
/// fusion formula (§4.2).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ScoreComponents {
    pub dense: f64,
    pub sparse: f64,
    pub rule: f64,
    pub golden: f64,
}

impl ScoreComponents {
    pub fn fused(&self, weights: &crate::config::RetrievalWeights) -> f64 {
        weights.dense * self.dense
            + weights.sparse * self.sparse
            + weights.rule * self.rule
            + weights.golden * self.golden
    }
}

/// A single retrieved fragment grounding a decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub source_kind: SourceKind,
    pub source_locator: SourceLocator,
    pub excerpt: String,
    pub score: f64,
    pub score_components: ScoreComponents,
}

impl Evidence {
    /// Maximum excerpt length allowed by the data model (≤2 KB).
    pub const MAX_EXCERPT_BYTES: usize = 2048;

    pub fn new(source_kind: SourceKind, source_locator: SourceLocator, excerpt: impl Into<String>) -> Self {
        let mut excerpt = excerpt.into();
        if excerpt.len() > Self::MAX_EXCERPT_BYTES {
            excerpt.truncate(Self::MAX_EXCERPT_BYTES);
        }
        Self {
            source_kind,
            source_locator,
            excerpt,
            score: 0.0,
            score_components: ScoreComponents::default(),
        }
    }

    pub fn with_score(mut self, score: f64, components: ScoreComponents) -> Self {
        self.score = score;
        self.score_components = components;
        self
    }
}
