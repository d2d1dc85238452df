//! SQLite schema and migrations for the Knowledge Base's structured store.

use rusqlite::{Connection, Result as SqliteResult};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema.
pub fn initialize_schema(conn: &Connection) -> SqliteResult<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current_version < 1 {
        apply_v1_schema(conn)?;
    }

    Ok(())
}

/// Apply version 1 schema: NCM hierarchy, CEST rules, product examples,
/// and the Golden Set, plus an FTS5 index over human-readable text columns.
fn apply_v1_schema(conn: &Connection) -> SqliteResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS ncm (
            code TEXT PRIMARY KEY,
            chapter TEXT NOT NULL,
            position TEXT NOT NULL,
            subposition TEXT NOT NULL,
            description TEXT NOT NULL,
            source_file TEXT NOT NULL,
            imported_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS nesh_chapter (
            chapter TEXT PRIMARY KEY,
            file TEXT NOT NULL,
            section TEXT,
            body TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS cest_rule (
            cest TEXT NOT NULL,
            segment_id TEXT NOT NULL,
            description TEXT NOT NULL,
            validity_start TEXT NOT NULL,
            validity_end TEXT,
            situation TEXT NOT NULL,
            source TEXT NOT NULL,
            PRIMARY KEY (cest, source)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS cest_ncm_association (
            cest TEXT NOT NULL,
            source TEXT NOT NULL,
            ncm_pattern TEXT NOT NULL,
            PRIMARY KEY (cest, source, ncm_pattern),
            FOREIGN KEY (cest, source) REFERENCES cest_rule(cest, source) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_cest_ncm_pattern ON cest_ncm_association(ncm_pattern)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS product_example (
            id TEXT PRIMARY KEY,
            description TEXT NOT NULL,
            ncm TEXT NOT NULL,
            cest TEXT,
            segment_hint TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS golden_set_entry (
            entry_id TEXT PRIMARY KEY,
            description_raw TEXT NOT NULL,
            description_enriched TEXT,
            gtin TEXT,
            ncm_correct TEXT NOT NULL,
            cest_correct TEXT,
            source_user TEXT NOT NULL,
            source_tenant TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 1,
            supersedes TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_golden_set_gtin ON golden_set_entry(gtin)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_golden_set_tenant ON golden_set_entry(source_tenant)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS kb_chunk_embedding (
            chunk_id TEXT PRIMARY KEY,
            source_table TEXT NOT NULL,
            source_key TEXT NOT NULL,
            embedding BLOB NOT NULL,
            dim INTEGER NOT NULL
        )",
        [],
    )?;

    // Full-text search across every text source the sparse retrieval mode
    // queries: NCM descriptions, NESH chapter bodies, CEST rule descriptions,
    // product examples, and golden-set descriptions. One flat FTS5 table
    // keeps the sparse query a single statement regardless of source_kind.
    conn.execute(
        "CREATE VIRTUAL TABLE IF NOT EXISTS kb_fts USING fts5(
            source_table,
            source_key,
            body
        )",
        [],
    )?;

    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS ncm_ai AFTER INSERT ON ncm BEGIN
            INSERT INTO kb_fts(source_table, source_key, body) VALUES ('ncm', NEW.code, NEW.description);
        END",
        [],
    )?;
    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS nesh_ai AFTER INSERT ON nesh_chapter BEGIN
            INSERT INTO kb_fts(source_table, source_key, body) VALUES ('nesh_chapter', NEW.chapter, NEW.body);
        END",
        [],
    )?;
    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS cest_rule_ai AFTER INSERT ON cest_rule BEGIN
            INSERT INTO kb_fts(source_table, source_key, body) VALUES ('cest_rule', NEW.cest || ':' || NEW.source, NEW.description);
        END",
        [],
    )?;
    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS product_example_ai AFTER INSERT ON product_example BEGIN
            INSERT INTO kb_fts(source_table, source_key, body) VALUES ('product_example', NEW.id, NEW.description);
        END",
        [],
    )?;
    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS golden_set_ai AFTER INSERT ON golden_set_entry BEGIN
            INSERT INTO kb_fts(source_table, source_key, body) VALUES ('golden_set_entry', NEW.entry_id, COALESCE(NEW.description_enriched, NEW.description_raw));
        END",
        [],
    )?;

    conn.execute("INSERT INTO schema_version (version) VALUES (1)", [])?;

    Ok(())
}

/// Get the current schema version.
pub fn get_schema_version(conn: &Connection) -> SqliteResult<i32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
}

/// Check if the schema is initialized.
pub fn is_initialized(conn: &Connection) -> bool {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='ncm'",
        [],
        |row| row.get::<_, i32>(0),
    )
    .map(|count| count > 0)
    .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initializes_and_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        initialize_schema(&conn).unwrap();

        assert!(is_initialized(&conn));
        assert_eq!(get_schema_version(&conn).unwrap(), 1);
    }

    #[test]
    fn fts_trigger_indexes_ncm_insert() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        conn.execute(
            "INSERT INTO ncm (code, chapter, position, subposition, description, source_file) \
             VALUES ('30049069', '30', '3004', '300490', 'Medicamentos contendo outros antibioticos', 'ncm.csv')",
            [],
        )
        .unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM kb_fts WHERE kb_fts MATCH 'antibioticos'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}
