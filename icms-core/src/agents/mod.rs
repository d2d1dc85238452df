//! The five classification agents (spec §4.4): Enrichment, Aggregation,
//! NCM, CEST, and Reconciliation. Each wraps a `Predict<S>` signature and
//! records one `AuditStep` per invocation.

mod aggregation;
mod cest;
mod enrichment;
mod ncm;
mod reconciliation;

pub use aggregation::{AggregationAgent, AggregationSignature};
pub use cest::{CestAgent, CestOutcomeResult, CestSignature};
pub use enrichment::{EnrichmentAgent, EnrichmentSignature};
pub use ncm::{NcmAgent, NcmOutcome, NcmSignature};
pub use reconciliation::{ReconciliationAgent, ReconciliationSignature, ReconciliationVerdict};

use crate::domain::evidence::Evidence;
use crate::error::{Error, Result};
use crate::module::Module;
use crate::signature::Signature;
use std::time::Instant;

/// How many times an agent will retry a failed predict call before giving
/// up and recording the step as errored (spec §4.3).
pub const MAX_REPAIR_ATTEMPTS: u32 = 2;

/// Calls `module.forward(inputs)`, retrying up to `MAX_REPAIR_ATTEMPTS`
/// times on failure (schema-parse errors and transient LLM errors alike).
/// Returns the outputs and the elapsed wall time for the attempt that
/// succeeded.
pub async fn forward_with_repair<M>(
    module: &M,
    inputs: <M::Sig as Signature>::Inputs,
) -> Result<(<M::Sig as Signature>::Outputs, u64)>
where
    M: Module,
{
    let start = Instant::now();
    let mut last_error: Option<Error> = None;

    for _attempt in 0..=MAX_REPAIR_ATTEMPTS {
        match module.forward(inputs.clone()).await {
            Ok(outputs) => return Ok((outputs, start.elapsed().as_millis() as u64)),
            Err(err) => last_error = Some(err),
        }
    }

    Err(last_error.unwrap_or_else(|| Error::internal("forward_with_repair exhausted attempts without an error")))
}

/// Joins retrieved Evidence into a compact block suitable for embedding in
/// an agent prompt.
pub fn evidence_block(evidence: &[Evidence]) -> String {
    evidence
        .iter()
        .enumerate()
        .map(|(i, e)| format!("[{}] ({:?}, score={:.2}) {}", i + 1, e.source_kind, e.score, e.excerpt))
        .collect::<Vec<_>>()
        .join("\n")
}
