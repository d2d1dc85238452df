//! CESTAgent: determines whether a CEST code applies to an already-NCM'd
//! product, and if so which one.

use super::{evidence_block, forward_with_repair};
use crate::domain::cest::{Cest, CestOutcome};
use crate::domain::evidence::Evidence;
use crate::error::{Error, Result};
use crate::llm::LLMClient;
use crate::module::{Module, Predict, PredictConfig};
use crate::signature::Signature;
use icms_core_derive::Signature as SignatureDerive;
use std::sync::Arc;

#[derive(SignatureDerive)]
#[signature(instructions = "You are deciding whether the Código Especificador da Substituição \
Tributária (CEST) applies to a product given its NCM code, and if so which CEST. A product with no \
matching CEST rule in the evidence is NOT_APPLICABLE; do not guess a code the evidence does not \
support. When more than one CEST rule matches, prefer the most specific NCM pattern and the most \
recently vigente rule.")]
pub struct CestSignature {
    #[input(desc = "Enriched, normalised product description")]
    description_enriched: String,

    #[input(desc = "The product's determined or confirmed NCM code")]
    ncm_code: String,

    #[input(desc = "Declared CEST code, if the product arrived with one")]
    cest_declared: Option<String>,

    #[input(desc = "The company's resolved CEST segment id, if known; retrieval has already \
restricted the evidence to this segment")]
    segment_id: Option<String>,

    #[input(desc = "Candidate CEST rules and other supporting evidence retrieved from the knowledge base")]
    evidence: String,

    #[output(desc = "True if a CEST code applies to this product")]
    applicable: bool,

    #[output(desc = "The CEST code, if applicable; ignored otherwise")]
    cest_code: Option<String>,

    #[output(desc = "Confidence in the CEST determination, from 0.0 to 1.0")]
    confidence: f64,

    #[output(desc = "One-paragraph justification citing the evidence used")]
    justification: String,
}

pub struct CestAgent {
    predict: Predict<CestSignature>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CestOutcomeResult {
    pub outcome: CestOutcome,
    pub confidence: f64,
    pub justification: String,
}

impl CestAgent {
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
        ncm_code: &str,
        cest_declared: Option<&str>,
        segment_id: Option<&str>,
        evidence: &[Evidence],
    ) -> Result<(CestOutcomeResult, u64)> {
        let inputs = CestSignatureInputs {
            description_enriched: description_enriched.to_string(),
            ncm_code: ncm_code.to_string(),
            cest_declared: cest_declared.map(|s| s.to_string()),
            segment_id: segment_id.map(|s| s.to_string()),
            evidence: evidence_block(evidence),
        };

        let (outputs, duration_ms) = forward_with_repair(&self.predict, inputs).await?;

        let outcome = if outputs.applicable {
            let code = outputs
                .cest_code
                .ok_or_else(|| Error::postcondition("CEST agent marked applicable but returned no code".to_string()))?;
            let cest = Cest::parse(&code)
                .map_err(|e| Error::postcondition(format!("CEST agent returned an invalid code: {e}")))?;
            CestOutcome::Code(cest)
        } else {
            CestOutcome::NotApplicable
        };

        Ok((
            CestOutcomeResult { outcome, confidence: outputs.confidence, justification: outputs.justification },
            duration_ms,
        ))
    }
}
