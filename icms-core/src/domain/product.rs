//! Product: the immutable input row to the classification engine.

use super::ids::{ProductId, TenantId};
use serde::{Deserialize, Serialize};

/// A merchandise row submitted for classification.
///
/// Immutable after import: corrections produce new `Classification` records
/// rather than mutating the product (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub product_id: ProductId,
    pub tenant_id: TenantId,
    pub description_raw: String,
    pub internal_code: Option<String>,
    pub barcode: Option<String>,
    pub ncm_declared: Option<String>,
    pub cest_declared: Option<String>,
    pub company_activity: Option<String>,
}

impl Product {
    pub fn has_declared_codes(&self) -> bool {
        self.ncm_declared.is_some()
    }
}

/// The enriched view of a product produced by the `EnrichmentAgent`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedProduct {
    pub product_id: ProductId,
    pub description_enriched: String,
    pub extracted_attributes: serde_json::Map<String, serde_json::Value>,
    pub segment_hint: Option<String>,
    pub confidence: f64,
}
