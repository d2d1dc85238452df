//! Shared retrieval types: a plan, a mode's raw hits, and the fused result.

use crate::domain::evidence::{Evidence, ScoreComponents, SourceKind, SourceLocator};
use serde::{Deserialize, Serialize};

/// Which retrieval modes an agent wants run, and with what query text. An
/// agent builds one `RetrievalPlan` per call; modes it omits are skipped
/// entirely rather than run and discarded, to avoid wasted KB round trips.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalPlan {
    pub query_text: String,
    pub ncm_hint: Option<String>,
    pub segment_id: Option<String>,
    pub gtin: Option<String>,
    pub run_dense: bool,
    pub run_sparse: bool,
    pub run_rule: bool,
    pub run_golden: bool,
    pub top_k: usize,
}

impl RetrievalPlan {
    pub fn for_text(query_text: impl Into<String>) -> Self {
        Self {
            query_text: query_text.into(),
            ncm_hint: None,
            segment_id: None,
            gtin: None,
            run_dense: true,
            run_sparse: true,
            run_rule: false,
            run_golden: true,
            top_k: 8,
        }
    }

    pub fn with_ncm_hint(mut self, ncm: impl Into<String>) -> Self {
        self.ncm_hint = Some(ncm.into());
        self.run_rule = true;
        self
    }

    /// Restricts rule-mode CEST retrieval to rules whose segment matches the
    /// company's resolved segment (spec §4.4.4's "segment compatible with
    /// company_activity/segment_hint" query condition).
    pub fn with_segment_hint(mut self, segment_id: impl Into<String>) -> Self {
        self.segment_id = Some(segment_id.into());
        self
    }

    pub fn with_gtin(mut self, gtin: impl Into<String>) -> Self {
        self.gtin = Some(gtin.into());
        self
    }
}

/// One mode's un-fused hit, before weighting.
#[derive(Debug, Clone)]
pub struct ModeHit {
    pub source_kind: SourceKind,
    pub source_locator: SourceLocator,
    pub excerpt: String,
    pub dense: f64,
    pub sparse: f64,
    pub rule: f64,
    pub golden: f64,
}

impl ModeHit {
    pub fn into_evidence(self) -> Evidence {
        let components = ScoreComponents { dense: self.dense, sparse: self.sparse, rule: self.rule, golden: self.golden };
        Evidence::new(self.source_kind, self.source_locator, self.excerpt).with_score(0.0, components)
    }
}
