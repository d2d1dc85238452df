//! NCMAgent: determines or confirms a product's NCM classification.

use super::{evidence_block, forward_with_repair};
use crate::domain::evidence::Evidence;
use crate::domain::ncm::Ncm;
use crate::error::{Error, Result};
use crate::kb::KbSnapshot;
use crate::llm::LLMClient;
use crate::module::{Module, Predict, PredictConfig};
use crate::signature::Signature;
use icms_core_derive::Signature as SignatureDerive;
use std::sync::Arc;

#[derive(SignatureDerive)]
#[signature(instructions = "You are classifying a Brazilian merchandise description under the \
Nomenclatura Comum do Mercosul (NCM). Choose the single most specific 8-digit NCM code that the \
evidence supports. If a declared NCM is provided, evaluate whether it is correct rather than \
assuming it. Ground every decision in the provided evidence; never invent an NCM code that does \
not appear in it.")]
pub struct NcmSignature {
    #[input(desc = "Enriched, normalised product description")]
    description_enriched: String,

    #[input(desc = "Extracted product attributes as JSON")]
    extracted_attributes: serde_json::Value,

    #[input(desc = "Declared NCM code, if the product arrived with one")]
    ncm_declared: Option<String>,

    #[input(desc = "Supporting evidence retrieved from the knowledge base")]
    evidence: String,

    #[output(desc = "The determined 8-digit NCM code")]
    ncm_code: String,

    #[output(desc = "Confidence in the NCM determination, from 0.0 to 1.0")]
    confidence: f64,

    #[output(desc = "One-paragraph justification citing the evidence used")]
    justification: String,
}

pub struct NcmAgent {
    predict: Predict<NcmSignature>,
}

/// Outcome of one NCM agent invocation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct NcmOutcome {
    pub ncm: Ncm,
    pub confidence: f64,
    pub justification: String,
    /// False when the code (or one of its chapter/position/subposition
    /// ancestors) does not exist in the KB snapshot, even after the
    /// error-repair retry (§4.4.3 post-conditions). The orchestrator
    /// downgrades the final status to MANUAL_REVIEW when this is false.
    pub hierarchy_valid: bool,
}

impl NcmAgent {
    pub fn new(llm: Arc<dyn LLMClient>, model: Option<String>) -> Self {
        let mut config = PredictConfig::new();
        if let Some(model) = model {
            config = config.with_model(model);
        }
        Self { predict: Predict::with_lm(llm).with_config(config) }
    }

    pub async fn run(
        &self,
        description_enriched: &str,
        extracted_attributes: &serde_json::Map<String, serde_json::Value>,
        ncm_declared: Option<&str>,
        evidence: &[Evidence],
        snapshot: &KbSnapshot,
    ) -> Result<(NcmOutcome, u64)> {
        let inputs = NcmSignatureInputs {
            description_enriched: description_enriched.to_string(),
            extracted_attributes: serde_json::Value::Object(extracted_attributes.clone()),
            ncm_declared: ncm_declared.map(|s| s.to_string()),
            evidence: evidence_block(evidence),
        };

        let (mut outputs, mut duration_ms) = forward_with_repair(&self.predict, inputs.clone()).await?;
        let mut ncm = Ncm::parse(&outputs.ncm_code)
            .map_err(|e| Error::postcondition(format!("NCM agent returned an invalid code: {e}")))?;
        let mut hierarchy_valid = Self::hierarchy_exists(snapshot, &ncm)?;

        if !hierarchy_valid {
            // One error-repair retry per §4.4.3; a second miss downgrades
            // rather than erroring the node out.
            let (retry_outputs, retry_duration) = forward_with_repair(&self.predict, inputs).await?;
            let retry_ncm = Ncm::parse(&retry_outputs.ncm_code)
                .map_err(|e| Error::postcondition(format!("NCM agent returned an invalid code: {e}")))?;
            hierarchy_valid = Self::hierarchy_exists(snapshot, &retry_ncm)?;
            ncm = retry_ncm;
            outputs = retry_outputs;
            duration_ms += retry_duration;
        }

        Ok((
            NcmOutcome { ncm, confidence: outputs.confidence, justification: outputs.justification, hierarchy_valid },
            duration_ms,
        ))
    }

    /// The code itself and its chapter/position/subposition ancestors must
    /// all resolve in the structured store (§4.4.3, §8.2) — a well-formed
    /// but hallucinated code fails here even though `Ncm::parse` accepted it.
    fn hierarchy_exists(snapshot: &KbSnapshot, ncm: &Ncm) -> Result<bool> {
        if snapshot.structured.get_ncm(ncm)?.is_none() {
            return Ok(false);
        }
        for prefix in [ncm.chapter(), ncm.position(), ncm.subposition()] {
            if snapshot.structured.ncm_by_prefix(prefix)?.is_empty() {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
