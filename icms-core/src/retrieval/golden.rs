//! Golden-set retrieval mode: exact GTIN match and sparse match over prior
//! confirmed classifications.

use super::types::ModeHit;
use crate::domain::evidence::{SourceKind, SourceLocator};
use crate::error::Result;
use crate::kb::KbSnapshot;

pub fn run(snapshot: &KbSnapshot, query_text: &str, gtin: Option<&str>, top_k: usize) -> Result<Vec<ModeHit>> {
    let mut hits = Vec::new();

    if let Some(gtin) = gtin {
        if let Some(entry) = snapshot.structured.golden_set_by_gtin(gtin)? {
            hits.push(ModeHit {
                source_kind: SourceKind::GoldenSet,
                source_locator: SourceLocator::table_row("golden_set_entry", entry.entry_id.to_string()),
                excerpt: entry.description_enriched.unwrap_or(entry.description_raw),
                dense: 0.0,
                sparse: 0.0,
                rule: 0.0,
                // An exact GTIN match is the strongest possible golden-set
                // signal; rank it above text-similarity hits.
                golden: 1.0,
            });
        }
    }

    let text_hits = snapshot.structured.sparse_search(query_text, top_k)?;
    for hit in text_hits.into_iter().filter(|h| h.source_table == "golden_set_entry") {
        hits.push(ModeHit {
            source_kind: SourceKind::GoldenSet,
            source_locator: SourceLocator::table_row("golden_set_entry", hit.source_key),
            excerpt: hit.body,
            dense: 0.0,
            sparse: 0.0,
            rule: 0.0,
            golden: 0.6,
        });
    }

    Ok(hits)
}
