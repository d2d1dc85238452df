//! ReconciliationAgent: the final cross-check before a Classification is
//! accepted — compares the NCM/CEST agents' outputs against declared codes,
//! Golden-Set precedent, and each other, and decides CONFIRMED/DETERMINED
//! vs MANUAL_REVIEW (spec §4.4.5).
//!
//! Two deterministic structured checks against the KB snapshot run before
//! the LLM call and can veto it outright: the NCM/CEST pattern-consistency
//! check and the cited-evidence-exists check. The LLM is reserved for the
//! rationale text and the softer disagreement judgement calls the grounded
//! checks can't make (confidence thresholds, Golden-Set precedent).
//!
//! Grounded on the same adversarial-review posture as a fresh-context
//! critic: this agent sees only the candidate verdict and its evidence, not
//! the reasoning that produced it, so it cannot rubber-stamp its own work.

use super::{evidence_block, forward_with_repair};
use crate::domain::cest::CestOutcome;
use crate::domain::classification::{ClassificationStatus, FlowKind};
use crate::domain::evidence::{Evidence, SourceKind, SourceLocator};
use crate::error::Result;
use crate::kb::KbSnapshot;
use crate::llm::LLMClient;
use crate::module::{Module, Predict, PredictConfig};
use crate::signature::Signature;
use icms_core_derive::Signature as SignatureDerive;
use std::sync::Arc;

#[derive(SignatureDerive)]
#[signature(instructions = "You are the final reviewer of an NCM/CEST classification before it is \
accepted. Check the candidate NCM and CEST against the supporting evidence, the declared codes (if \
any), and any matching Golden-Set precedent. Flag a disagreement whenever the evidence does not \
clearly support the candidate, or whenever it conflicts with a higher-confidence Golden-Set entry. \
Do not second-guess a well-supported candidate just to find something to say.")]
pub struct ReconciliationSignature {
    #[input(desc = "Enriched product description")]
    description_enriched: String,

    #[input(desc = "Candidate NCM code under review")]
    ncm_candidate: String,

    #[input(desc = "Candidate CEST outcome under review (a code, or NOT_APPLICABLE)")]
    cest_candidate: String,

    #[input(desc = "Declared NCM code, if the product arrived with one")]
    ncm_declared: Option<String>,

    #[input(desc = "Declared CEST code, if the product arrived with one")]
    cest_declared: Option<String>,

    #[input(desc = "Supporting evidence, including any Golden-Set precedent")]
    evidence: String,

    #[output(desc = "True if the candidate classification should be accepted as-is")]
    accepted: bool,

    #[output(desc = "Issues found, each a short string naming the disagreement")]
    issues: Vec<String>,

    #[output(desc = "Confidence in the accept/reject verdict, from 0.0 to 1.0")]
    confidence: f64,
}

/// The reconciliation agent's verdict for one candidate classification.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ReconciliationVerdict {
    pub status: ClassificationStatus,
    pub issues: Vec<String>,
    pub confidence: f64,
}

pub struct ReconciliationAgent {
    predict: Predict<ReconciliationSignature>,
}

impl ReconciliationAgent {
    pub fn new(llm: Arc<dyn LLMClient>, model: Option<String>) -> Self {
        let mut config = PredictConfig::new();
        if let Some(model) = model {
            config = config.with_model(model);
        }
        Self { predict: Predict::with_lm(llm).with_config(config) }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        description_enriched: &str,
        ncm_candidate: &str,
        cest_candidate: &CestOutcome,
        ncm_declared: Option<&str>,
        cest_declared: Option<&str>,
        flow_kind: FlowKind,
        evidence: &[Evidence],
        snapshot: &KbSnapshot,
    ) -> Result<(ReconciliationVerdict, u64)> {
        let mut structured_issues = Self::cest_pattern_consistency(ncm_candidate, cest_candidate, evidence);
        structured_issues.extend(Self::evidence_exists(snapshot, evidence)?);

        let inputs = ReconciliationSignatureInputs {
            description_enriched: description_enriched.to_string(),
            ncm_candidate: ncm_candidate.to_string(),
            cest_candidate: cest_candidate.to_string(),
            ncm_declared: ncm_declared.map(|s| s.to_string()),
            cest_declared: cest_declared.map(|s| s.to_string()),
            evidence: evidence_block(evidence),
        };

        let (outputs, duration_ms) = forward_with_repair(&self.predict, inputs).await?;

        let accepted = outputs.accepted && structured_issues.is_empty();
        let status = if !accepted {
            ClassificationStatus::ManualReview
        } else {
            match flow_kind {
                FlowKind::Confirmation => ClassificationStatus::Confirmed,
                FlowKind::Determination => ClassificationStatus::Determined,
            }
        };

        let mut issues = structured_issues;
        issues.extend(outputs.issues);

        Ok((ReconciliationVerdict { status, issues, confidence: outputs.confidence }, duration_ms))
    }

    /// §4.4.5(a): the NCM satisfies at least one CEST rule's pattern (after
    /// segment filtering, already applied by retrieval) iff CEST is set.
    fn cest_pattern_consistency(ncm_candidate: &str, cest_candidate: &CestOutcome, evidence: &[Evidence]) -> Vec<String> {
        let matching_rule_evidence = evidence.iter().filter(|e| e.source_kind == SourceKind::CestRule);

        match cest_candidate {
            CestOutcome::Code(code) => {
                let backed = matching_rule_evidence
                    .filter_map(|e| match &e.source_locator {
                        SourceLocator::TableRow { key, .. } => Some(key),
                        _ => None,
                    })
                    .any(|key| key.starts_with(code.as_str()));
                if backed {
                    Vec::new()
                } else {
                    vec![format!(
                        "CEST {} is not backed by any retrieved CEST rule evidence for NCM {ncm_candidate}",
                        code.as_str()
                    )]
                }
            }
            CestOutcome::NotApplicable => {
                if matching_rule_evidence.count() > 0 {
                    vec![format!(
                        "CEST marked NOT_APPLICABLE for NCM {ncm_candidate} despite matching CEST rule evidence in the snapshot"
                    )]
                } else {
                    Vec::new()
                }
            }
        }
    }

    /// §4.4.5(b): justifications must cite evidence that actually exists in
    /// the KB snapshot, not a stale or synthesized reference.
    fn evidence_exists(snapshot: &KbSnapshot, evidence: &[Evidence]) -> Result<Vec<String>> {
        let mut issues = Vec::new();
        for e in evidence {
            if let SourceLocator::TableRow { table, key } = &e.source_locator {
                if !snapshot.structured.row_exists(table, key)? {
                    issues.push(format!("cited evidence {table}:{key} does not exist in the knowledge base snapshot"));
                }
            }
        }
        Ok(issues)
    }
}
