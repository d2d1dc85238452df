//! SQLite-backed structured store: NCM hierarchy, CEST rules, product
//! examples, and the Golden Set, plus the shared FTS5 sparse index.

use crate::domain::cest::{Cest, CestRule, RuleSituation, RuleSource};
use crate::domain::golden_set::GoldenSetEntry;
use crate::domain::ids::TenantId;
use crate::domain::ncm::{Ncm, NcmNode};
use crate::error::{Error, Result};
use crate::kb::schema::{initialize_schema, is_initialized};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// A sparse (FTS5) search hit: which table/row it came from and the
/// matched excerpt.
#[derive(Debug, Clone)]
pub struct SparseHit {
    pub source_table: String,
    pub source_key: String,
    pub body: String,
    pub rank: f64,
}

/// SQLite-backed structured store.
pub struct StructuredStore {
    conn: Arc<Mutex<Connection>>,
}

impl StructuredStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(Error::from)?;
        if !is_initialized(&conn) {
            initialize_schema(&conn).map_err(Error::from)?;
        }
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(Error::from)?;
        initialize_schema(&conn).map_err(Error::from)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| Error::internal(format!("failed to lock structured store connection: {e}")))?;
        f(&conn).map_err(Error::from)
    }

    // ==================== NCM ====================

    pub fn insert_ncm(&self, node: &NcmNode, source_file: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO ncm (code, chapter, position, subposition, description, source_file)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    node.code.as_str(),
                    node.chapter(),
                    node.position(),
                    node.subposition(),
                    node.description,
                    source_file,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_ncm(&self, code: &Ncm) -> Result<Option<NcmNode>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT code, description FROM ncm WHERE code = ?1",
                params![code.as_str()],
                Self::row_to_ncm_node,
            )
            .optional()
        })
    }

    /// All NCM nodes whose code starts with `prefix` (a 2/4/6-digit level).
    pub fn ncm_by_prefix(&self, prefix: &str) -> Result<Vec<NcmNode>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT code, description FROM ncm WHERE code LIKE ?1 ORDER BY code")?;
            let pattern = format!("{prefix}%");
            let rows = stmt
                .query_map(params![pattern], Self::row_to_ncm_node)?
                .filter_map(|r| r.ok())
                .collect();
            Ok(rows)
        })
    }

    fn row_to_ncm_node(row: &rusqlite::Row) -> rusqlite::Result<NcmNode> {
        let code_str: String = row.get(0)?;
        Ok(NcmNode {
            code: Ncm::parse(&code_str).unwrap_or_else(|_| Ncm::parse("00000000").unwrap()),
            description: row.get(1)?,
        })
    }

    // ==================== NESH ====================

    pub fn insert_nesh_chapter(&self, chapter: &str, file: &str, section: Option<&str>, body: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO nesh_chapter (chapter, file, section, body) VALUES (?1, ?2, ?3, ?4)",
                params![chapter, file, section, body],
            )?;
            Ok(())
        })
    }

    // ==================== CEST ====================

    pub fn insert_cest_rule(&self, rule: &CestRule) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO cest_rule
                    (cest, segment_id, description, validity_start, validity_end, situation, source)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    rule.cest.as_str(),
                    rule.segment_id,
                    rule.description,
                    rule.validity_start.to_string(),
                    rule.validity_end.map(|d| d.to_string()),
                    situation_str(rule.situation),
                    rule.source.to_string(),
                ],
            )?;
            conn.execute(
                "DELETE FROM cest_ncm_association WHERE cest = ?1 AND source = ?2",
                params![rule.cest.as_str(), rule.source.to_string()],
            )?;
            for pattern in &rule.ncm_patterns {
                conn.execute(
                    "INSERT INTO cest_ncm_association (cest, source, ncm_pattern) VALUES (?1, ?2, ?3)",
                    params![rule.cest.as_str(), rule.source.to_string(), pattern],
                )?;
            }
            Ok(())
        })
    }

    /// CEST rules whose ncm_patterns include a prefix of `ncm`, most
    /// specific pattern first. When `segment_id` is given, rules whose
    /// segment does not match it are excluded here rather than left for the
    /// agent to filter — a product outside a rule's segment never counts as
    /// a candidate (spec: "an NCM that could match a CEST rule but whose
    /// product does not fall under the rule's segment yields NOT_APPLICABLE").
    pub fn cest_rules_for_ncm(&self, ncm: &Ncm, segment_id: Option<&str>) -> Result<Vec<CestRule>> {
        self.with_conn(|conn| {
            let prefixes = ncm.prefixes();
            let placeholders: Vec<String> = prefixes.iter().map(|_| "?".to_string()).collect();
            let sql = format!(
                "SELECT DISTINCT r.cest, r.segment_id, r.description, r.validity_start, r.validity_end, r.situation, r.source
                 FROM cest_rule r
                 JOIN cest_ncm_association a ON r.cest = a.cest AND r.source = a.source
                 WHERE a.ncm_pattern IN ({}){}",
                placeholders.join(","),
                if segment_id.is_some() { " AND r.segment_id = ?" } else { "" },
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut params_vec: Vec<&str> = prefixes.to_vec();
            if let Some(segment_id) = segment_id {
                params_vec.push(segment_id);
            }
            let mut rules: Vec<CestRule> = stmt
                .query_map(rusqlite::params_from_iter(params_vec.iter()), |row| {
                    Self::row_to_cest_rule(conn, row)
                })?
                .filter_map(|r| r.ok())
                .collect();
            rules.sort_by(|a, b| b.most_specific_pattern_len().cmp(&a.most_specific_pattern_len()));
            Ok(rules)
        })
    }

    /// True if `table:key` (the shape every retrieval mode's `SourceLocator`
    /// uses) still resolves to a live row — used by reconciliation to
    /// confirm cited evidence has not gone stale since it was retrieved.
    pub fn row_exists(&self, table: &str, key: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let sql = match table {
                "ncm" => "SELECT 1 FROM ncm WHERE code = ?1",
                "cest_rule" => {
                    let (cest, source) = key.split_once(':').unwrap_or((key, ""));
                    return conn
                        .query_row("SELECT 1 FROM cest_rule WHERE cest = ?1 AND source = ?2", params![cest, source], |_| Ok(()))
                        .optional()
                        .map(|row| row.is_some());
                }
                "nesh_chapter" => "SELECT 1 FROM nesh_chapter WHERE chapter = ?1",
                "product_example" => "SELECT 1 FROM product_example WHERE id = ?1",
                "golden_set_entry" => "SELECT 1 FROM golden_set_entry WHERE entry_id = ?1",
                _ => return Ok(true),
            };
            conn.query_row(sql, params![key], |_| Ok(())).optional().map(|row| row.is_some())
        })
    }

    fn row_to_cest_rule(conn: &Connection, row: &rusqlite::Row) -> rusqlite::Result<CestRule> {
        let cest_str: String = row.get(0)?;
        let situation_str: String = row.get(5)?;
        let source_str: String = row.get(6)?;
        let cest = Cest::parse(&cest_str).unwrap_or_else(|_| Cest::parse("0000000").unwrap());

        let mut pattern_stmt = conn.prepare(
            "SELECT ncm_pattern FROM cest_ncm_association WHERE cest = ?1 AND source = ?2",
        )?;
        let ncm_patterns = pattern_stmt
            .query_map(params![cest_str, source_str], |r| r.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(CestRule {
            cest,
            segment_id: row.get(1)?,
            description: row.get(2)?,
            ncm_patterns,
            validity_start: parse_date(row.get::<_, String>(3)?),
            validity_end: row.get::<_, Option<String>>(4)?.map(parse_date),
            situation: parse_situation(&situation_str),
            source: parse_source(&source_str),
        })
    }

    // ==================== Product examples ====================

    pub fn insert_product_example(&self, id: &str, description: &str, ncm: &str, cest: Option<&str>, segment_hint: Option<&str>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO product_example (id, description, ncm, cest, segment_hint)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, description, ncm, cest, segment_hint],
            )?;
            Ok(())
        })
    }

    // ==================== Golden Set ====================

    pub fn insert_golden_set_entry(&self, entry: &GoldenSetEntry) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO golden_set_entry
                    (entry_id, description_raw, description_enriched, gtin, ncm_correct, cest_correct,
                     source_user, source_tenant, version, supersedes)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    entry.entry_id.to_string(),
                    entry.description_raw,
                    entry.description_enriched,
                    entry.gtin,
                    entry.ncm_correct,
                    entry.cest_correct,
                    entry.source_user,
                    entry.source_tenant.0,
                    entry.version,
                    entry.supersedes.map(|id| id.to_string()),
                ],
            )?;
            Ok(())
        })
    }

    pub fn golden_set_by_gtin(&self, gtin: &str) -> Result<Option<GoldenSetEntry>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT entry_id, description_raw, description_enriched, gtin, ncm_correct, cest_correct,
                        source_user, source_tenant, version, supersedes
                 FROM golden_set_entry WHERE gtin = ?1 ORDER BY version DESC LIMIT 1",
                params![gtin],
                Self::row_to_golden_entry,
            )
            .optional()
        })
    }

    fn row_to_golden_entry(row: &rusqlite::Row) -> rusqlite::Result<GoldenSetEntry> {
        use crate::domain::ids::GoldenSetEntryId;
        use uuid::Uuid;

        let entry_id: String = row.get(0)?;
        let supersedes: Option<String> = row.get(9)?;
        Ok(GoldenSetEntry {
            entry_id: GoldenSetEntryId(Uuid::parse_str(&entry_id).unwrap_or_default()),
            description_raw: row.get(1)?,
            description_enriched: row.get(2)?,
            gtin: row.get(3)?,
            ncm_correct: row.get(4)?,
            cest_correct: row.get(5)?,
            source_user: row.get(6)?,
            source_tenant: TenantId(row.get(7)?),
            version: row.get::<_, i64>(8)? as u32,
            supersedes: supersedes.and_then(|s| Uuid::parse_str(&s).ok()).map(GoldenSetEntryId),
        })
    }

    // ==================== Sparse search ====================

    /// Full-text search across the shared `kb_fts` index (BM25-ranked by
    /// SQLite's FTS5 `rank` column).
    pub fn sparse_search(&self, query: &str, limit: usize) -> Result<Vec<SparseHit>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT source_table, source_key, body, rank
                 FROM kb_fts WHERE kb_fts MATCH ?1 ORDER BY rank LIMIT ?2",
            )?;
            let hits = stmt
                .query_map(params![query, limit as i64], |row| {
                    Ok(SparseHit {
                        source_table: row.get(0)?,
                        source_key: row.get(1)?,
                        body: row.get(2)?,
                        rank: row.get(3)?,
                    })
                })?
                .filter_map(|r| r.ok())
                .collect();
            Ok(hits)
        })
    }
}

fn situation_str(situation: RuleSituation) -> &'static str {
    match situation {
        RuleSituation::Vigente => "vigente",
        RuleSituation::Revogado => "revogado",
    }
}

fn parse_situation(s: &str) -> RuleSituation {
    match s {
        "revogado" => RuleSituation::Revogado,
        _ => RuleSituation::Vigente,
    }
}

fn parse_source(s: &str) -> RuleSource {
    if s == "conv_142" {
        RuleSource::Convenio142
    } else {
        RuleSource::Regional(s.trim_start_matches("regional_").to_string())
    }
}

fn parse_date(s: String) -> NaiveDate {
    NaiveDate::parse_from_str(&s, "%Y-%m-%d").unwrap_or_else(|_| NaiveDate::from_ymd_opt(1970, 1, 1).unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::GoldenSetEntryId;

    fn sample_rule() -> CestRule {
        CestRule {
            cest: Cest::parse("1300100").unwrap(),
            segment_id: "13".into(),
            description: "Medicamentos de referencia".into(),
            ncm_patterns: vec!["3004".into()],
            validity_start: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            validity_end: None,
            situation: RuleSituation::Vigente,
            source: RuleSource::Convenio142,
        }
    }

    #[test]
    fn round_trips_ncm() {
        let store = StructuredStore::in_memory().unwrap();
        let node = NcmNode { code: Ncm::parse("30049069").unwrap(), description: "Medicamentos".into() };
        store.insert_ncm(&node, "ncm.csv").unwrap();

        let fetched = store.get_ncm(&Ncm::parse("30049069").unwrap()).unwrap().unwrap();
        assert_eq!(fetched.description, "Medicamentos");

        let by_chapter = store.ncm_by_prefix("30").unwrap();
        assert_eq!(by_chapter.len(), 1);
    }

    #[test]
    fn cest_rule_lookup_by_ncm_prefix() {
        let store = StructuredStore::in_memory().unwrap();
        store.insert_cest_rule(&sample_rule()).unwrap();

        let rules = store.cest_rules_for_ncm(&Ncm::parse("30049069").unwrap()).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].cest.as_str(), "1300100");
    }

    #[test]
    fn golden_set_round_trip_by_gtin() {
        let store = StructuredStore::in_memory().unwrap();
        let entry = GoldenSetEntry {
            entry_id: GoldenSetEntryId::new(),
            description_raw: "dipirona 500mg".into(),
            description_enriched: None,
            gtin: Some("7891234567890".into()),
            ncm_correct: "30049069".into(),
            cest_correct: Some("1300100".into()),
            source_user: "analyst-a".into(),
            source_tenant: TenantId("tenant-1".into()),
            version: 1,
            supersedes: None,
        };
        store.insert_golden_set_entry(&entry).unwrap();

        let fetched = store.golden_set_by_gtin("7891234567890").unwrap().unwrap();
        assert_eq!(fetched.ncm_correct, "30049069");
    }

    #[test]
    fn sparse_search_finds_across_sources() {
        let store = StructuredStore::in_memory().unwrap();
        store
            .insert_ncm(&NcmNode { code: Ncm::parse("30049069").unwrap(), description: "Antibioticos diversos".into() }, "ncm.csv")
            .unwrap();
        store.insert_product_example("p1", "Antibiotico generico 500mg", "30049069", None, None).unwrap();

        let hits = store.sparse_search("antibiotico", 10).unwrap();
        assert!(hits.len() >= 1);
    }
}
