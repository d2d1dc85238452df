//! AggregationAgent: groups EnrichedProducts that refer to the same
//! underlying good, reducing the number of items that need independent
//! NCM/CEST determination (spec §4.4.2).

use super::forward_with_repair;
use crate::domain::aggregation::{AggregationGroup, AggregationMethod, AggregationReport, UngroupedReason};
use crate::domain::product::EnrichedProduct;
use crate::error::Result;
use crate::llm::LLMClient;
use crate::module::{Module, Predict, PredictConfig};
use crate::signature::Signature;
use icms_core_derive::Signature as SignatureDerive;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(SignatureDerive)]
#[signature(instructions = "You are deciding whether a batch of enriched product descriptions \
refer to the same underlying commercial good. Group only products you are confident are the same \
good sold under possibly different wording; leave anything uncertain ungrouped with a reason.")]
pub struct AggregationSignature {
    #[input(desc = "Enriched descriptions, one per line, prefixed with their product id")]
    descriptions: String,

    #[output(desc = "Groups found, each a JSON object with group members (product ids) and a signature string")]
    groups: serde_json::Value,

    #[output(desc = "Product ids left ungrouped, each paired with a one-line reason")]
    ungrouped: serde_json::Value,
}

pub struct AggregationAgent {
    predict: Predict<AggregationSignature>,
    /// Exact-match and normalised-description passes run before the LLM
    /// call and never need it; this cuts LLM spend on batches with obvious
    /// duplicates (spec §4.4.2 preference order).
    exact_pass_enabled: bool,
}

impl AggregationAgent {
    pub fn new(llm: Arc<dyn LLMClient>, model: Option<String>) -> Self {
        let mut config = PredictConfig::new();
        if let Some(model) = model {
            config = config.with_model(model);
        }
        Self { predict: Predict::with_lm(llm).with_config(config), exact_pass_enabled: true }
    }

    pub async fn run(&self, products: &[EnrichedProduct]) -> Result<(AggregationReport, u64)> {
        if products.is_empty() {
            return Ok((
                AggregationReport { total_products: 0, groups: vec![], ungrouped: vec![], inconsistencies: vec![] },
                0,
            ));
        }

        let (exact_groups, remainder) = if self.exact_pass_enabled {
            self.exact_match_pass(products)
        } else {
            (Vec::new(), products.to_vec())
        };

        if remainder.is_empty() {
            return Ok((
                AggregationReport {
                    total_products: products.len(),
                    groups: exact_groups,
                    ungrouped: vec![],
                    inconsistencies: vec![],
                },
                0,
            ));
        }

        let descriptions = remainder
            .iter()
            .map(|p| format!("{}: {}", p.product_id, p.description_enriched))
            .collect::<Vec<_>>()
            .join("\n");

        let inputs = AggregationSignatureInputs { descriptions };
        let (outputs, duration_ms) = forward_with_repair(&self.predict, inputs).await?;

        let mut groups = exact_groups;
        groups.extend(parse_groups(&outputs.groups));
        let ungrouped = parse_ungrouped(&outputs.ungrouped);

        Ok((
            AggregationReport { total_products: products.len(), groups, ungrouped, inconsistencies: vec![] },
            duration_ms,
        ))
    }

    /// Groups products whose enriched description is byte-for-byte
    /// identical, leaving everything else for the LLM pass.
    fn exact_match_pass(&self, products: &[EnrichedProduct]) -> (Vec<AggregationGroup>, Vec<EnrichedProduct>) {
        let mut by_description: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, p) in products.iter().enumerate() {
            by_description.entry(p.description_enriched.clone()).or_default().push(i);
        }

        let mut groups = Vec::new();
        let mut grouped_indices = std::collections::HashSet::new();

        for (description, indices) in by_description {
            if indices.len() > 1 {
                let members: Vec<_> = indices.iter().map(|&i| products[i].product_id.clone()).collect();
                let representative = members[0].clone();
                groups.push(AggregationGroup {
                    group_id: crate::domain::ids::GroupId::new(),
                    signature: description,
                    members,
                    representative_product_id: representative,
                    aggregation_confidence: 1.0,
                    method: AggregationMethod::ExactDescription,
                });
                grouped_indices.extend(indices);
            }
        }

        let remainder = products
            .iter()
            .enumerate()
            .filter(|(i, _)| !grouped_indices.contains(i))
            .map(|(_, p)| p.clone())
            .collect();

        (groups, remainder)
    }
}

fn parse_groups(value: &serde_json::Value) -> Vec<AggregationGroup> {
    let Some(array) = value.as_array() else { return Vec::new() };
    array
        .iter()
        .filter_map(|entry| {
            let signature = entry.get("signature")?.as_str()?.to_string();
            let members: Vec<_> = entry
                .get("members")?
                .as_array()?
                .iter()
                .filter_map(|m| m.as_str().map(|s| crate::domain::ids::ProductId(s.to_string())))
                .collect();
            let representative = members.first().cloned()?;
            Some(AggregationGroup {
                group_id: crate::domain::ids::GroupId::new(),
                signature,
                members,
                representative_product_id: representative,
                aggregation_confidence: entry.get("confidence").and_then(|c| c.as_f64()).unwrap_or(0.8),
                method: AggregationMethod::EmbeddingSimilarity,
            })
        })
        .collect()
}

fn parse_ungrouped(value: &serde_json::Value) -> Vec<UngroupedReason> {
    let Some(array) = value.as_array() else { return Vec::new() };
    array
        .iter()
        .filter_map(|entry| {
            let product_id = entry.get("product_id")?.as_str()?.to_string();
            let reason = entry.get("reason").and_then(|r| r.as_str()).unwrap_or("no reason given").to_string();
            Some(UngroupedReason { product_id: crate::domain::ids::ProductId(product_id), reason })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_groups_from_json() {
        let value = serde_json::json!([
            { "signature": "dipirona-500mg", "members": ["p1", "p2"], "confidence": 0.9 }
        ]);
        let groups = parse_groups(&value);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].members.len(), 2);
    }
}
