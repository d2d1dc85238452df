//! Dense retrieval mode: embed the query and search the vector index.

use super::types::ModeHit;
use crate::domain::evidence::{SourceKind, SourceLocator};
use crate::error::Result;
use crate::kb::KbSnapshot;
use crate::llm::{EmbeddingRequest, LLMClient};

pub async fn run(snapshot: &KbSnapshot, llm: &dyn LLMClient, embedding_model: &str, query_text: &str, top_k: usize) -> Result<Vec<ModeHit>> {
    if snapshot.vector.is_empty() {
        return Ok(Vec::new());
    }
    let response = llm
        .embed(EmbeddingRequest { model: Some(embedding_model.to_string()), texts: vec![query_text.to_string()] })
        .await?;
    let query_embedding = match response.embeddings.into_iter().next() {
        Some(v) => v,
        None => return Ok(Vec::new()),
    };

    let hits = snapshot.vector.search(&query_embedding, top_k);
    Ok(hits
        .into_iter()
        .map(|hit| ModeHit {
            source_kind: source_kind_for_table(&hit.source_table),
            source_locator: SourceLocator::table_row(hit.source_table, hit.source_key),
            excerpt: String::new(),
            dense: hit.score,
            sparse: 0.0,
            rule: 0.0,
            golden: 0.0,
        })
        .collect())
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
