//! GoldenSetEntry: a confirmed-correct classification reused as a retrieval source.

use super::ids::GoldenSetEntryId;
use super::ids::TenantId;
use serde::{Deserialize, Serialize};

/// A human-confirmed NCM/CEST pair for a description, promoted into the
/// Golden-Set store so future retrieval can match against it directly
/// (§4.7 memory-tier promotion).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoldenSetEntry {
    pub entry_id: GoldenSetEntryId,
    pub description_raw: String,
    pub description_enriched: Option<String>,
    pub gtin: Option<String>,
    pub ncm_correct: String,
    pub cest_correct: Option<String>,
    pub source_user: String,
    /// Tenant that produced this entry. Per the Open Question decision
    /// (SPEC_FULL.md §9), entries are shared across tenants by default but
    /// always record their origin for optional tenant-scoped filtering.
    pub source_tenant: TenantId,
    pub version: u32,
    pub supersedes: Option<GoldenSetEntryId>,
}

impl GoldenSetEntry {
    /// A new entry superseding an older one keeps the same logical lineage
    /// but bumps `version` and never reuses the old entry's id.
    pub fn supersede(previous: &GoldenSetEntry, ncm_correct: String, cest_correct: Option<String>, source_user: String) -> Self {
        Self {
            entry_id: GoldenSetEntryId::new(),
            description_raw: previous.description_raw.clone(),
            description_enriched: previous.description_enriched.clone(),
            gtin: previous.gtin.clone(),
            ncm_correct,
            cest_correct,
            source_user,
            source_tenant: previous.source_tenant.clone(),
            version: previous.version + 1,
            supersedes: Some(previous.entry_id.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supersession_bumps_version_and_links_back() {
        let original = GoldenSetEntry {
            entry_id: GoldenSetEntryId::new(),
            description_raw: "dipirona 500mg 20 comprimidos".into(),
            description_enriched: None,
            gtin: Some("7891234567890".into()),
            ncm_correct: "30049069".into(),
            cest_correct: Some("1300100".into()),
            source_user: "analyst-a".into(),
            source_tenant: TenantId("tenant-1".into()),
            version: 1,
            supersedes: None,
        };
        let next = GoldenSetEntry::supersede(&original, "30049069".into(), None, "analyst-b".into());
        assert_eq!(next.version, 2);
        assert_eq!(next.supersedes, Some(original.entry_id.clone()));
        assert_eq!(next.source_tenant, original.source_tenant);
    }
}
