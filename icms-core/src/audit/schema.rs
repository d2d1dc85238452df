//! SQLite schema for the append-only Audit / Evidence Store (spec §4.6).

use rusqlite::{Connection, Result as SqliteResult};

pub const SCHEMA_VERSION: i32 = 1;

pub fn initialize_schema(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    if !is_initialized(conn) {
        apply_v1_schema(conn)?;
        conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [SCHEMA_VERSION])?;
    }
    Ok(())
}

fn apply_v1_schema(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE classification (
            classification_id TEXT PRIMARY KEY,
            product_id        TEXT NOT NULL,
            tenant_id         TEXT NOT NULL,
            ncm_final         TEXT,
            cest_final        TEXT,
            confidence_ncm    REAL NOT NULL,
            confidence_cest   REAL NOT NULL,
            status            TEXT NOT NULL,
            flow_kind         TEXT NOT NULL,
            created_at        TEXT NOT NULL,
            golden_set_ref    TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_classification_product ON classification(product_id);
        CREATE INDEX IF NOT EXISTS idx_classification_tenant_time ON classification(tenant_id, created_at);

        CREATE TABLE audit_step (
            step_id             TEXT PRIMARY KEY,
            classification_id   TEXT NOT NULL REFERENCES classification(classification_id),
            agent                TEXT NOT NULL,
            step_index           INTEGER NOT NULL,
            input_snapshot       TEXT NOT NULL,
            output_snapshot      TEXT NOT NULL,
            prompt_id            TEXT NOT NULL,
            model_id              TEXT NOT NULL,
            retrieved_evidence    TEXT NOT NULL,
            justification         TEXT NOT NULL,
            duration_ms           INTEGER NOT NULL,
            error                 TEXT,
            recorded_at           TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_audit_step_classification ON audit_step(classification_id);
        CREATE INDEX IF NOT EXISTS idx_audit_step_agent_error ON audit_step(agent, error);
        ",
    )?;
    Ok(())
}

pub fn is_initialized(conn: &Connection) -> bool {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='classification'",
        [],
        |row| row.get::<_, i64>(0),
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
        assert!(is_initialized(&conn));
        initialize_schema(&conn).unwrap();
    }
}
