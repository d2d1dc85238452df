//! Loads NCM/CEST/product-example/golden-set source files into a fresh
//! `KbSnapshot`, normalising text and building the vector and graph indexes
//! alongside the structured store.

use super::graph::{EdgeKind, GraphNodeRef, GraphStore};
use super::snapshot::KbSnapshot;
use super::store::StructuredStore;
use super::vector::{EmbeddedChunk, VectorIndex};
use crate::domain::cest::{Cest, CestRule, RuleSituation, RuleSource};
use crate::domain::ncm::{Ncm, NcmNode};
use crate::error::{Error, Result};
use crate::llm::{EmbeddingRequest, LLMClient};
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// A single row of the NCM source table, as published (before normalisation
/// into an `Ncm`/`NcmNode`).
#[derive(Debug, Deserialize)]
pub struct NcmSourceRow {
    pub codigo: String,
    pub descricao: String,
}

/// A single row of the CEST source table.
#[derive(Debug, Deserialize)]
pub struct CestSourceRow {
    pub cest: String,
    pub segmento: String,
    pub descricao: String,
    pub ncms: Vec<String>,
    pub vigencia_inicio: String,
    pub vigencia_fim: Option<String>,
    pub revogado: bool,
    pub uf: Option<String>,
}

/// Which source files feed one KB load (spec §4.6 "Source Loading").
pub struct KbSources {
    pub ncm_json: PathBuf,
    pub cest_json: PathBuf,
    pub product_examples_json: Option<PathBuf>,
}

/// Loads KB source files into a new `KbSnapshot`, embedding every text chunk
/// through the given client. The returned snapshot has not yet been
/// installed into a `KbHandle` — callers validate it first.
pub async fn load_snapshot(sources: &KbSources, llm: &dyn LLMClient, embedding_model: &str, generation: u64) -> Result<KbSnapshot> {
    let structured = StructuredStore::in_memory()?;
    let mut graph = GraphStore::new();
    let mut chunks = Vec::new();
    let mut texts = Vec::new();
    let mut text_refs: Vec<(String, String)> = Vec::new();

    let ncm_raw = tokio::fs::read_to_string(&sources.ncm_json)
        .await
        .map_err(|e| Error::kb_load(sources.ncm_json.display().to_string(), 0, e.to_string()))?;
    let ncm_rows: Vec<NcmSourceRow> = serde_json::from_str(&ncm_raw)
        .map_err(|e| Error::kb_load(sources.ncm_json.display().to_string(), 0, e.to_string()))?;

    for (row_index, row) in ncm_rows.iter().enumerate() {
        let code = Ncm::parse(&row.codigo)
            .map_err(|e| Error::kb_load(sources.ncm_json.display().to_string(), row_index as u64, e.to_string()))?;
        let node = NcmNode { code: code.clone(), description: normalise_description(&row.descricao) };
        structured.insert_ncm(&node, &sources.ncm_json.display().to_string())?;
        graph.add_ncm_hierarchy(node.chapter(), node.position(), node.subposition(), node.code.as_str());

        texts.push(node.description.clone());
        text_refs.push(("ncm".to_string(), node.code.as_str().to_string()));
    }

    let cest_raw = tokio::fs::read_to_string(&sources.cest_json)
        .await
        .map_err(|e| Error::kb_load(sources.cest_json.display().to_string(), 0, e.to_string()))?;
    let cest_rows: Vec<CestSourceRow> = serde_json::from_str(&cest_raw)
        .map_err(|e| Error::kb_load(sources.cest_json.display().to_string(), 0, e.to_string()))?;

    // Convênio 142 vs regional (UF) dedup (§4.1): when a vigente regional
    // rule and a Convênio 142 rule collide on the same (cest, ncm_pattern),
    // the regional record takes precedence and the Convênio one is dropped
    // before it ever reaches the structured store.
    let regional_vigente_pairs = regional_vigente_pairs(&cest_rows);

    for (row_index, row) in cest_rows.iter().enumerate() {
        let cest = Cest::parse(&row.cest)
            .map_err(|e| Error::kb_load(sources.cest_json.display().to_string(), row_index as u64, e.to_string()))?;

        if is_superseded_by_regional(row, &cest.as_str().to_string(), &regional_vigente_pairs) {
            continue;
        }

        let rule = CestRule {
            cest: cest.clone(),
            segment_id: row.segmento.clone(),
            description: normalise_description(&row.descricao),
            ncm_patterns: row.ncms.clone(),
            validity_start: parse_date(&row.vigencia_inicio)
                .map_err(|e| Error::kb_load(sources.cest_json.display().to_string(), row_index as u64, e.to_string()))?,
            validity_end: row.vigencia_fim.as_deref().map(parse_date).transpose()
                .map_err(|e| Error::kb_load(sources.cest_json.display().to_string(), row_index as u64, e.to_string()))?,
            situation: if row.revogado { RuleSituation::Revogado } else { RuleSituation::Vigente },
            source: row.uf.clone().map(RuleSource::Regional).unwrap_or(RuleSource::Convenio142),
        };
        structured.insert_cest_rule(&rule)?;

        for pattern in &rule.ncm_patterns {
            graph.add_edge(GraphNodeRef::Ncm(pattern.clone()), EdgeKind::CestAppliesTo, GraphNodeRef::Cest(cest.as_str().to_string()));
        }
        graph.add_edge(GraphNodeRef::Cest(cest.as_str().to_string()), EdgeKind::CestInSegment, GraphNodeRef::Segment(rule.segment_id.clone()));

        texts.push(rule.description.clone());
        text_refs.push(("cest_rule".to_string(), format!("{}:{}", cest.as_str(), rule.source)));
    }

    if !texts.is_empty() {
        let response = llm
            .embed(EmbeddingRequest { model: Some(embedding_model.to_string()), texts: texts.clone() })
            .await?;
        if response.embeddings.len() != texts.len() {
            return Err(Error::internal(format!(
                "embedding provider returned {} vectors for {} inputs",
                response.embeddings.len(),
                texts.len()
            )));
        }
        for (embedding, (source_table, source_key)) in response.embeddings.into_iter().zip(text_refs) {
            chunks.push(EmbeddedChunk {
                chunk_id: format!("{source_table}:{source_key}"),
                source_table,
                source_key,
                embedding,
            });
        }
    }

    Ok(KbSnapshot::new(structured, VectorIndex::from_chunks(chunks), graph, generation))
}

/// `(cest, ncm_pattern)` pairs carried by a vigente regional rule, used to
/// drop the superseded Convênio 142 record for the same pair.
fn regional_vigente_pairs(rows: &[CestSourceRow]) -> std::collections::HashSet<(String, String)> {
    rows.iter()
        .filter(|row| row.uf.is_some() && !row.revogado)
        .filter_map(|row| Cest::parse(&row.cest).ok().map(|c| (c, row)))
        .flat_map(|(cest, row)| row.ncms.iter().map(move |p| (cest.as_str().to_string(), p.clone())))
        .collect()
}

fn is_superseded_by_regional(row: &CestSourceRow, cest: &str, regional_vigente_pairs: &std::collections::HashSet<(String, String)>) -> bool {
    row.uf.is_none() && row.ncms.iter().any(|p| regional_vigente_pairs.contains(&(cest.to_string(), p.clone())))
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| Error::input(format!("invalid date '{s}': {e}")))
}

/// Collapses whitespace and trims, matching the normalisation applied to
/// every enriched product description before it is embedded or indexed.
pub fn normalise_description(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ").trim().to_string()
}

pub fn default_sources(base_dir: impl AsRef<Path>) -> KbSources {
    let base = base_dir.as_ref();
    KbSources {
        ncm_json: base.join("ncm.json"),
        cest_json: base.join("cest.json"),
        product_examples_json: Some(base.join("product_examples.json")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalises_repeated_whitespace() {
        assert_eq!(normalise_description("  dipirona   500mg   20cp  "), "dipirona 500mg 20cp");
    }

    fn row(cest: &str, ncms: &[&str], uf: Option<&str>, revogado: bool) -> CestSourceRow {
        CestSourceRow {
            cest: cest.to_string(),
            segmento: "13".to_string(),
            descricao: "Medicamentos".to_string(),
            ncms: ncms.iter().map(|s| s.to_string()).collect(),
            vigencia_inicio: "2020-01-01".to_string(),
            vigencia_fim: None,
            revogado,
            uf: uf.map(str::to_string),
        }
    }

    #[test]
    fn vigente_regional_rule_supersedes_convenio_142_record() {
        let rows = vec![row("1300100", &["3004"], Some("RO"), false), row("1300100", &["3004"], None, false)];
        let pairs = regional_vigente_pairs(&rows);
        assert!(is_superseded_by_regional(&rows[1], "1300100", &pairs));
        assert!(!is_superseded_by_regional(&rows[0], "1300100", &pairs));
    }

    #[test]
    fn revoked_regional_rule_does_not_supersede() {
        let rows = vec![row("1300100", &["3004"], Some("RO"), true), row("1300100", &["3004"], None, false)];
        let pairs = regional_vigente_pairs(&rows);
        assert!(!is_superseded_by_regional(&rows[1], "1300100", &pairs));
    }

    #[test]
    fn convenio_rule_with_no_regional_collision_survives() {
        let rows = vec![row("1300100", &["3004"], None, false)];
        let pairs = regional_vigente_pairs(&rows);
        assert!(!is_superseded_by_regional(&rows[0], "1300100", &pairs));
    }
}
