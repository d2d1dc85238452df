//! AggregationGroup: a set of Products judged to be the same underlying good.

use super::ids::{GroupId, ProductId};
use serde::{Deserialize, Serialize};

/// How a product ended up in an `AggregationGroup`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMethod {
    ExactDescription,
    NormalisedDescription,
    EmbeddingSimilarity,
    CodeEquivalence,
}

/// A set of Products the `AggregationAgent` judged to refer to the same
/// underlying good. A product belongs to at most one active group per
/// tenant (§3 invariant).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationGroup {
    pub group_id: GroupId,
    pub signature: String,
    pub members: Vec<ProductId>,
    pub representative_product_id: ProductId,
    pub aggregation_confidence: f64,
    pub method: AggregationMethod,
}

impl AggregationGroup {
    pub fn single(product_id: ProductId, signature: impl Into<String>) -> Self {
        Self {
            group_id: GroupId::new(),
            signature: signature.into(),
            members: vec![product_id.clone()],
            representative_product_id: product_id,
            aggregation_confidence: 1.0,
            method: AggregationMethod::ExactDescription,
        }
    }
}

/// Why a product was left out of every group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UngroupedReason {
    pub product_id: ProductId,
    pub reason: String,
}

/// Summary emitted by the `AggregationAgent` for one batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationReport {
    pub total_products: usize,
    pub groups: Vec<AggregationGroup>,
    pub ungrouped: Vec<UngroupedReason>,
    /// Same-signature products with divergent declared NCMs.
    pub inconsistencies: Vec<String>,
}

impl AggregationReport {
    /// §8 invariant 4: `sum(members) = |input products|`, every product
    /// appears in exactly one group or in `ungrouped` with a reason.
    pub fn is_complete(&self) -> bool {
        let grouped: usize = self.groups.iter().map(|g| g.members.len()).sum();
        grouped + self.ungrouped.len() == self.total_products
    }

    pub fn reduction_percent(&self) -> f64 {
        if self.total_products == 0 {
            return 0.0;
        }
        let distinct = self.groups.len() + self.ungrouped.len();
        100.0 * (1.0 - (distinct as f64 / self.total_products as f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(s: &str) -> ProductId {
        ProductId(s.to_string())
    }

    #[test]
    fn completeness_invariant() {
        let group = AggregationGroup {
            group_id: GroupId::new(),
            signature: "dipirona-500mg".into(),
            members: vec![pid("p1"), pid("p2"), pid("p3")],
            representative_product_id: pid("p1"),
            aggregation_confidence: 0.95,
            method: AggregationMethod::EmbeddingSimilarity,
        };
        let report = AggregationReport {
            total_products: 4,
            groups: vec![group],
            ungrouped: vec![UngroupedReason {
                product_id: pid("p4"),
                reason: "no similar description found".into(),
            }],
            inconsistencies: vec![],
        };
        assert!(report.is_complete());
    }

    #[test]
    fn incomplete_report_detected() {
        let report = AggregationReport {
            total_products: 5,
            groups: vec![],
            ungrouped: vec![],
            inconsistencies: vec![],
        };
        assert!(!report.is_complete());
    }
}
