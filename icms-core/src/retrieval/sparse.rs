//! Sparse retrieval mode: FTS5/BM25 search over the shared `kb_fts` index.

use super::types::ModeHit;
use crate::domain::evidence::{SourceKind, SourceLocator};
use crate::error::Result;
use crate::kb::KbSnapshot;

pub fn run(snapshot: &KbSnapshot, query_text: &str, top_k: usize) -> Result<Vec<ModeHit>> {
    let hits = snapshot.structured.sparse_search(&fts_query(query_text), top_k)?;

    // SQLite FTS5 rank is negative-is-better (bm25); fold it into a
    // 0..1 score so it composes with the other modes' similarity scores.
    let max_abs_rank = hits.iter().map(|h| h.rank.abs()).fold(0.0_f64, f64::max).max(1e-9);

    Ok(hits
        .into_iter()
        .map(|hit| {
            let normalised = 1.0 - (hit.rank.abs() / max_abs_rank).min(1.0);
            ModeHit {
                source_kind: source_kind_for_table(&hit.source_table),
                source_locator: SourceLocator::table_row(hit.source_table, hit.source_key),
                excerpt: hit.body,
                dense: 0.0,
                sparse: normalised,
                rule: 0.0,
                golden: 0.0,
            }
        })
        .collect())
}

/// Builds a safe FTS5 MATCH expression from free text: strips characters
/// that would otherwise be parsed as FTS5 query syntax (quotes, `:`,
/// parens, `*`) before wrapping each token in double quotes.
fn fts_query(raw: &str) -> String {
    raw.split_whitespace()
        .map(|token| {
            let cleaned: String = token.chars().filter(|c| c.is_alphanumeric()).collect();
            format!("\"{cleaned}\"")
        })
        .filter(|t| t.len() > 2)
        .collect::<Vec<_>>()
        .join(" OR ")
}

fn source_kind_for_table(table: &str) -> SourceKind {
    match table {
        "ncm" => SourceKind::NcmTable,
        "cest_rule" => SourceKind::CestRule,
        "nesh_chapter" => SourceKind::NeshChapter,
        "product_example" => SourceKind::ProductExample,
        "golden_set_entry" => SourceKind::GoldenSet,
        _ => SourceKind::NcmTable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fts_query_strips_punctuation_and_quotes_tokens() {
        let q = fts_query("antibiotico: 500mg!");
        assert_eq!(q, "\"antibiotico\" OR \"500mg\"");
    }
}
