//! The Retrieval Toolbox: fuses dense, sparse, rule, and golden-set
//! retrieval modes against a `KbSnapshot` into one ranked Evidence list
//! (spec §4.2).

mod dense;
mod fusion;
mod golden;
mod rule;
mod sparse;
mod types;

pub use types::{ModeHit, RetrievalPlan};

use crate::config::RetrievalWeights;
use crate::domain::evidence::Evidence;
use crate::error::Result;
use crate::kb::KbSnapshot;
use crate::llm::LLMClient;

/// Runs every retrieval mode named in `plan` against `snapshot` and returns
/// a single ranked, deduplicated list of Evidence.
pub async fn retrieve(
    snapshot: &KbSnapshot,
    llm: &dyn LLMClient,
    embedding_model: &str,
    weights: &RetrievalWeights,
    plan: &RetrievalPlan,
) -> Result<Vec<Evidence>> {
    let mut hits = Vec::new();

    if plan.run_dense {
        hits.extend(dense::run(snapshot, llm, embedding_model, &plan.query_text, plan.top_k).await?);
    }
    if plan.run_sparse {
        hits.extend(sparse::run(snapshot, &plan.query_text, plan.top_k)?);
    }
    if plan.run_rule {
        if let Some(ncm_hint) = &plan.ncm_hint {
            hits.extend(rule::run(snapshot, ncm_hint, plan.segment_id.as_deref())?);
        }
    }
    if plan.run_golden {
        hits.extend(golden::run(snapshot, &plan.query_text, plan.gtin.as_deref(), plan.top_k)?);
    }

    Ok(fusion::fuse(hits, weights, plan.top_k))
}
