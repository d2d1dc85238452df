//! Golden Set promotion: turning a confirmed `Classification` into a
//! `GoldenSetEntry` that future retrieval can match against directly (§4.7).
//!
//! Grounded on the teacher's memory-tier promotion pattern: promoting never
//! mutates an existing entry in place. A product already on the Golden Set
//! (matched by `gtin`) gets a new, higher-`version` entry that `supersedes`
//! the old one; concurrent promotions for the same product simply chain
//! through `supersedes` rather than racing on a lock.

use crate::domain::classification::Classification;
use crate::domain::golden_set::GoldenSetEntry;
use crate::domain::product::Product;
use crate::error::{Error, Result};
use crate::kb::StructuredStore;

/// Promotes `classification` to a `GoldenSetEntry`, superseding any existing
/// entry for the same `gtin`. `description_enriched` is optional since not
/// every flow retains the enriched text by the time promotion happens.
pub fn promote_classification(
    store: &StructuredStore,
    product: &Product,
    classification: &Classification,
    description_enriched: Option<&str>,
    source_user: &str,
) -> Result<GoldenSetEntry> {
    if classification.needs_manual_review() {
        return Err(Error::postcondition(
            "cannot promote a classification pending manual review to the golden set".to_string(),
        ));
    }
    let Some(ncm_final) = classification.ncm_final.as_ref() else {
        return Err(Error::postcondition("cannot promote a classification with no final NCM".to_string()));
    };

    let ncm_correct = ncm_final.as_str().to_string();
    let cest_correct = classification.cest_final.as_ref().and_then(|outcome| match outcome {
        crate::domain::cest::CestOutcome::Code(code) => Some(code.as_str().to_string()),
        crate::domain::cest::CestOutcome::NotApplicable => None,
    });

    let existing = match product.barcode.as_deref() {
        Some(gtin) => store.golden_set_by_gtin(gtin)?,
        None => None,
    };

    let entry = match existing {
        Some(previous) => GoldenSetEntry::supersede(&previous, ncm_correct, cest_correct, source_user.to_string()),
        None => GoldenSetEntry {
            entry_id: crate::domain::ids::GoldenSetEntryId::new(),
            description_raw: product.description_raw.clone(),
            description_enriched: description_enriched.map(|s| s.to_string()),
            gtin: product.barcode.clone(),
            ncm_correct,
            cest_correct,
            source_user: source_user.to_string(),
            source_tenant: product.tenant_id.clone(),
            version: 1,
            supersedes: None,
        },
    };

    store.insert_golden_set_entry(&entry)?;
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cest::{Cest, CestOutcome};
    use crate::domain::classification::{ClassificationStatus, FlowKind};
    use crate::domain::ids::{ClassificationId, ProductId, TenantId};
    use crate::domain::ncm::Ncm;
    use chrono::Utc;

    fn sample_product() -> Product {
        Product {
            product_id: ProductId("p1".into()),
            tenant_id: TenantId("tenant-1".into()),
            description_raw: "dipirona 500mg 20 comprimidos".into(),
            internal_code: None,
            barcode: Some("7891234567890".into()),
            ncm_declared: None,
            cest_declared: None,
            company_activity: None,
        }
    }

    fn sample_classification() -> Classification {
        Classification {
            classification_id: ClassificationId::new(),
            product_id: ProductId("p1".into()),
            ncm_final: Some(Ncm::parse("30049069").unwrap()),
            cest_final: Some(CestOutcome::Code(Cest::parse("1300100").unwrap())),
            confidence_ncm: 0.93,
            confidence_cest: 0.9,
            status: ClassificationStatus::Determined,
            flow_kind: FlowKind::Determination,
            created_at: Utc::now(),
            golden_set_ref: None,
        }
    }

    #[test]
    fn promotes_new_entry_at_version_one() {
        let store = StructuredStore::in_memory().unwrap();
        let entry = promote_classification(&store, &sample_product(), &sample_classification(), Some("dipirona sodica 500mg"), "analyst-a").unwrap();
        assert_eq!(entry.version, 1);
        assert_eq!(entry.ncm_correct, "30049069");
        assert!(entry.supersedes.is_none());
    }

    #[test]
    fn repromoting_same_gtin_supersedes_prior_entry() {
        let store = StructuredStore::in_memory().unwrap();
        let product = sample_product();
        let first = promote_classification(&store, &product, &sample_classification(), None, "analyst-a").unwrap();

        let second = promote_classification(&store, &product, &sample_classification(), None, "analyst-b").unwrap();
        assert_eq!(second.version, 2);
        assert_eq!(second.supersedes, Some(first.entry_id));
    }

    #[test]
    fn refuses_to_promote_manual_review() {
        let store = StructuredStore::in_memory().unwrap();
        let mut classification = sample_classification();
        classification.status = ClassificationStatus::ManualReview;
        let result = promote_classification(&store, &sample_product(), &classification, None, "analyst-a");
        assert!(result.is_err());
    }
}
