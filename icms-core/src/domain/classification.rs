//! Classification: the final NCM/CEST verdict for a Product.

use super::cest::CestOutcome;
use super::ids::{ClassificationId, GoldenSetEntryId, ProductId};
use super::ncm::Ncm;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which workflow path produced a `Classification` (§2 Workflow Orchestrator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    /// Product arrived with declared NCM/CEST; the pipeline only confirms or
    /// overrides them.
    Confirmation,
    /// Product arrived without declared codes; the pipeline determines them
    /// from scratch.
    Determination,
}

/// Terminal state of a `Classification` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClassificationStatus {
    Confirmed,
    Determined,
    ManualReview,
    Error,
}

/// The classification engine's final verdict for one product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub classification_id: ClassificationId,
    pub product_id: ProductId,
    pub ncm_final: Option<Ncm>,
    pub cest_final: Option<CestOutcome>,
    pub confidence_ncm: f64,
    pub confidence_cest: f64,
    pub status: ClassificationStatus,
    pub flow_kind: FlowKind,
    pub created_at: DateTime<Utc>,
    pub golden_set_ref: Option<GoldenSetEntryId>,
}

impl Classification {
    pub fn needs_manual_review(&self) -> bool {
        matches!(self.status, ClassificationStatus::ManualReview | ClassificationStatus::Error)
    }

    /// §8 invariant: a `CONFIRMED`/`DETERMINED` classification always carries
    /// a final NCM.
    pub fn is_consistent(&self) -> bool {
        match self.status {
            ClassificationStatus::Confirmed | ClassificationStatus::Determined => {
                self.ncm_final.is_some() && self.cest_final.is_some()
            }
            ClassificationStatus::ManualReview | ClassificationStatus::Error => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::cest::Cest;

    #[test]
    fn confirmed_without_ncm_is_inconsistent() {
        let c = Classification {
            classification_id: ClassificationId::new(),
            product_id: ProductId("p1".into()),
            ncm_final: None,
            cest_final: None,
            confidence_ncm: 0.9,
            confidence_cest: 0.9,
            status: ClassificationStatus::Confirmed,
            flow_kind: FlowKind::Confirmation,
            created_at: Utc::now(),
            golden_set_ref: None,
        };
        assert!(!c.is_consistent());
    }

    #[test]
    fn determined_with_codes_is_consistent() {
        let c = Classification {
            classification_id: ClassificationId::new(),
            product_id: ProductId("p1".into()),
            ncm_final: Some(Ncm::parse("30049069").unwrap()),
            cest_final: Some(CestOutcome::Code(Cest::parse("1300100").unwrap())),
            confidence_ncm: 0.9,
            confidence_cest: 0.8,
            status: ClassificationStatus::Determined,
            flow_kind: FlowKind::Determination,
            created_at: Utc::now(),
            golden_set_ref: None,
        };
        assert!(c.is_consistent());
        assert!(!c.needs_manual_review());
    }
}
