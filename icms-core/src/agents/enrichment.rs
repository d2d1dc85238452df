//! EnrichmentAgent: normalises a raw product description and extracts
//! structured attributes before aggregation and classification.

use super::{evidence_block, forward_with_repair};
use crate::domain::evidence::Evidence;
use crate::domain::product::{EnrichedProduct, Product};
use crate::error::Result;
use crate::llm::LLMClient;
use crate::module::{Module, Predict};
use crate::signature::Signature;
use icms_core_derive::Signature as SignatureDerive;
use std::sync::Arc;

#[derive(SignatureDerive)]
#[signature(instructions = "You are enriching a Brazilian merchandise description for fiscal \
classification. Normalise the raw description, spell out abbreviations, and extract structured \
attributes (material, usage, presentation, measurements) that would help identify its NCM \
classification. Use the supporting evidence only to recognise domain terminology, never invent \
facts the description does not support.")]
pub struct EnrichmentSignature {
    #[input(desc = "Raw product description as submitted")]
    description_raw: String,

    #[input(desc = "Declared company economic activity, if known")]
    company_activity: Option<String>,

    #[input(desc = "Supporting evidence retrieved from the knowledge base")]
    evidence: String,

    #[output(desc = "Normalised, spelled-out description")]
    description_enriched: String,

    #[output(desc = "Extracted attributes as a flat JSON object of string values")]
    extracted_attributes: serde_json::Value,

    #[output(desc = "A short hint at the product's commercial segment, if evident")]
    segment_hint: Option<String>,

    #[output(desc = "Confidence in the enrichment, from 0.0 to 1.0")]
    confidence: f64,
}

/// Wraps `Predict<EnrichmentSignature>` with the evidence formatting and
/// repair-retry policy shared by every agent.
pub struct EnrichmentAgent {
    predict: Predict<EnrichmentSignature>,
}

impl EnrichmentAgent {
    pub fn new(llm: Arc<dyn LLMClient>, model: Option<String>) -> Self {
        let mut config = crate::module::PredictConfig::new();
        if let Some(model) = model {
            config = config.with_model(model);
        }
        Self { predict: Predict::with_lm(llm).with_config(config) }
    }

    pub async fn run(&self, product: &Product, evidence: &[Evidence]) -> Result<(EnrichedProduct, u64)> {
        let inputs = EnrichmentSignatureInputs {
            description_raw: product.description_raw.clone(),
            company_activity: product.company_activity.clone(),
            evidence: evidence_block(evidence),
        };

        let (outputs, duration_ms) = forward_with_repair(&self.predict, inputs).await?;

        let attributes = match outputs.extracted_attributes {
            serde_json::Value::Object(map) => map,
            other => {
                let mut map = serde_json::Map::new();
                map.insert("raw".to_string(), other);
                map
            }
        };

        let confidence = schema_conformance(&attributes);

        Ok((
            EnrichedProduct {
                product_id: product.product_id.clone(),
                description_enriched: outputs.description_enriched,
                extracted_attributes: attributes,
                segment_hint: outputs.segment_hint,
                confidence,
            },
            duration_ms,
        ))
    }
}

/// Confidence is the fraction of extracted attributes whose value parses
/// against the signature's declared schema — a flat JSON object of string
/// values — rather than the LLM's self-reported confidence (§4.4.1).
fn schema_conformance(attributes: &serde_json::Map<String, serde_json::Value>) -> f64 {
    if attributes.is_empty() {
        return 0.0;
    }
    let valid = attributes
        .values()
        .filter(|v| matches!(v, serde_json::Value::String(s) if !s.trim().is_empty()))
        .count();
    valid as f64 / attributes.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_is_fraction_of_schema_valid_attributes() {
        let mut attrs = serde_json::Map::new();
        attrs.insert("material".to_string(), serde_json::json!("plastico"));
        attrs.insert("voltagem".to_string(), serde_json::json!("220v"));
        attrs.insert("peso".to_string(), serde_json::json!(500));
        attrs.insert("embalagem".to_string(), serde_json::json!(""));
        assert_eq!(schema_conformance(&attrs), 0.5);
    }

    #[test]
    fn no_attributes_means_zero_confidence() {
        assert_eq!(schema_conformance(&serde_json::Map::new()), 0.0);
    }
}
