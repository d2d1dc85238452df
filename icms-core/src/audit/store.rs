//! SQLite-backed Audit / Evidence Store: the append-only record of every
//! `Classification` and the `AuditStep`s that produced it (spec §4.6).

use crate::audit::schema::{initialize_schema, is_initialized};
use crate::domain::audit::{AgentKind, AuditStep};
use crate::domain::cest::{Cest, CestOutcome};
use crate::domain::classification::{Classification, ClassificationStatus, FlowKind};
use crate::domain::ids::{AuditStepId, ClassificationId, GoldenSetEntryId, ProductId, TenantId};
use crate::domain::ncm::Ncm;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// SQLite-backed Audit / Evidence Store.
pub struct AuditStore {
    conn: Arc<Mutex<Connection>>,
}

impl AuditStore {
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
        let conn = self.conn.lock().map_err(|e| Error::internal(format!("failed to lock audit store connection: {e}")))?;
        f(&conn).map_err(Error::from)
    }

    /// Records one `AuditStep`. Per §4.6, this is called for every node the
    /// orchestrator runs, whether it succeeded or not.
    pub fn record_step(&self, step: &AuditStep) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO audit_step
                    (step_id, classification_id, agent, step_index, input_snapshot, output_snapshot,
                     prompt_id, model_id, retrieved_evidence, justification, duration_ms, error, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    step.step_id.to_string(),
                    step.classification_id.to_string(),
                    agent_kind_str(step.agent),
                    step.step_index,
                    step.input_snapshot.to_string(),
                    step.output_snapshot.to_string(),
                    step.prompt_id,
                    step.model_id,
                    serde_json::to_string(&step.retrieved_evidence).unwrap_or_default(),
                    step.justification,
                    step.duration_ms,
                    step.error,
                    step.recorded_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    /// Writes the final `Classification` row. Callable only once the
    /// Reconciliation node has produced a terminal status (§4.6). `tenant_id`
    /// comes from the `Product` the classification was produced for, since
    /// `Classification` itself does not carry one.
    pub fn write_classification(&self, classification: &Classification, tenant_id: &TenantId) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO classification
                    (classification_id, product_id, tenant_id, ncm_final, cest_final, confidence_ncm,
                     confidence_cest, status, flow_kind, created_at, golden_set_ref)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    classification.classification_id.to_string(),
                    classification.product_id.0,
                    tenant_id.0,
                    classification.ncm_final.as_ref().map(|n| n.as_str().to_string()),
                    classification.cest_final.as_ref().map(|c| c.to_string()),
                    classification.confidence_ncm,
                    classification.confidence_cest,
                    status_str(classification.status),
                    flow_kind_str(classification.flow_kind),
                    classification.created_at.to_rfc3339(),
                    classification.golden_set_ref.map(|id| id.to_string()),
                ],
            )?;
            Ok(())
        })
    }

    pub fn classification_by_id(&self, classification_id: ClassificationId) -> Result<Option<Classification>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT classification_id, product_id, ncm_final, cest_final, confidence_ncm, confidence_cest,
                        status, flow_kind, created_at, golden_set_ref
                 FROM classification WHERE classification_id = ?1",
                params![classification_id.to_string()],
                row_to_classification,
            )
            .optional()
        })
    }

    /// A product's classification history, most recent first.
    pub fn classifications_for_product(&self, product_id: &ProductId) -> Result<Vec<Classification>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT classification_id, product_id, ncm_final, cest_final, confidence_ncm, confidence_cest,
                        status, flow_kind, created_at, golden_set_ref
                 FROM classification WHERE product_id = ?1 ORDER BY created_at DESC",
            )?;
            let rows = stmt.query_map(params![product_id.0], row_to_classification)?.filter_map(|r| r.ok()).collect();
            Ok(rows)
        })
    }

    /// Classifications for a tenant within `[since, until]`, most recent first.
    pub fn classifications_for_tenant(&self, tenant_id: &TenantId, since: DateTime<Utc>, until: DateTime<Utc>) -> Result<Vec<Classification>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT classification_id, product_id, ncm_final, cest_final, confidence_ncm, confidence_cest,
                        status, flow_kind, created_at, golden_set_ref
                 FROM classification
                 WHERE tenant_id = ?1 AND created_at BETWEEN ?2 AND ?3
                 ORDER BY created_at DESC",
            )?;
            let rows = stmt
                .query_map(params![tenant_id.0, since.to_rfc3339(), until.to_rfc3339()], row_to_classification)?
                .filter_map(|r| r.ok())
                .collect();
            Ok(rows)
        })
    }

    pub fn steps_for_classification(&self, classification_id: ClassificationId) -> Result<Vec<AuditStep>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT step_id, classification_id, agent, step_index, input_snapshot, output_snapshot,
                        prompt_id, model_id, retrieved_evidence, justification, duration_ms, error, recorded_at
                 FROM audit_step WHERE classification_id = ?1 ORDER BY step_index ASC",
            )?;
            let rows = stmt.query_map(params![classification_id.to_string()], row_to_audit_step)?.filter_map(|r| r.ok()).collect();
            Ok(rows)
        })
    }

    /// Steps for a given agent that recorded an error, most recent first.
    pub fn failed_steps_for_agent(&self, agent: AgentKind) -> Result<Vec<AuditStep>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT step_id, classification_id, agent, step_index, input_snapshot, output_snapshot,
                        prompt_id, model_id, retrieved_evidence, justification, duration_ms, error, recorded_at
                 FROM audit_step WHERE agent = ?1 AND error IS NOT NULL ORDER BY recorded_at DESC",
            )?;
            let rows = stmt.query_map(params![agent_kind_str(agent)], row_to_audit_step)?.filter_map(|r| r.ok()).collect();
            Ok(rows)
        })
    }
}

fn agent_kind_str(agent: AgentKind) -> &'static str {
    match agent {
        AgentKind::Enrichment => "enrichment",
        AgentKind::Aggregation => "aggregation",
        AgentKind::Ncm => "ncm",
        AgentKind::Cest => "cest",
        AgentKind::Reconciliation => "reconciliation",
    }
}

fn parse_agent_kind(s: &str) -> AgentKind {
    match s {
        "aggregation" => AgentKind::Aggregation,
        "ncm" => AgentKind::Ncm,
        "cest" => AgentKind::Cest,
        "reconciliation" => AgentKind::Reconciliation,
        _ => AgentKind::Enrichment,
    }
}

fn status_str(status: ClassificationStatus) -> &'static str {
    match status {
        ClassificationStatus::Confirmed => "CONFIRMED",
        ClassificationStatus::Determined => "DETERMINED",
        ClassificationStatus::ManualReview => "MANUAL_REVIEW",
        ClassificationStatus::Error => "ERROR",
    }
}

fn parse_status(s: &str) -> ClassificationStatus {
    match s {
        "CONFIRMED" => ClassificationStatus::Confirmed,
        "DETERMINED" => ClassificationStatus::Determined,
        "ERROR" => ClassificationStatus::Error,
        _ => ClassificationStatus::ManualReview,
    }
}

fn flow_kind_str(flow_kind: FlowKind) -> &'static str {
    match flow_kind {
        FlowKind::Confirmation => "confirmation",
        FlowKind::Determination => "determination",
    }
}

fn parse_flow_kind(s: &str) -> FlowKind {
    if s == "confirmation" {
        FlowKind::Confirmation
    } else {
        FlowKind::Determination
    }
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s).map(|dt| dt.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now())
}

fn row_to_classification(row: &rusqlite::Row) -> rusqlite::Result<Classification> {
    let classification_id: String = row.get(0)?;
    let ncm_final: Option<String> = row.get(2)?;
    let cest_final: Option<String> = row.get(3)?;
    let status_s: String = row.get(6)?;
    let flow_s: String = row.get(7)?;
    let golden_set_ref: Option<String> = row.get(9)?;

    Ok(Classification {
        classification_id: ClassificationId(Uuid::parse_str(&classification_id).unwrap_or_default()),
        product_id: ProductId(row.get(1)?),
        ncm_final: ncm_final.and_then(|s| Ncm::parse(&s).ok()),
        cest_final: cest_final.map(|s| parse_cest_outcome(&s)),
        confidence_ncm: row.get(4)?,
        confidence_cest: row.get(5)?,
        status: parse_status(&status_s),
        flow_kind: parse_flow_kind(&flow_s),
        created_at: parse_datetime(row.get(8)?),
        golden_set_ref: golden_set_ref.and_then(|s| Uuid::parse_str(&s).ok()).map(GoldenSetEntryId),
    })
}

fn parse_cest_outcome(s: &str) -> CestOutcome {
    Cest::parse(s).map(CestOutcome::Code).unwrap_or(CestOutcome::NotApplicable)
}

fn row_to_audit_step(row: &rusqlite::Row) -> rusqlite::Result<AuditStep> {
    let step_id: String = row.get(0)?;
    let classification_id: String = row.get(1)?;
    let agent_s: String = row.get(2)?;
    let input_snapshot: String = row.get(4)?;
    let output_snapshot: String = row.get(5)?;
    let retrieved_evidence: String = row.get(8)?;

    Ok(AuditStep {
        step_id: AuditStepId(Uuid::parse_str(&step_id).unwrap_or_default()),
        classification_id: ClassificationId(Uuid::parse_str(&classification_id).unwrap_or_default()),
        agent: parse_agent_kind(&agent_s),
        step_index: row.get(3)?,
        input_snapshot: serde_json::from_str(&input_snapshot).unwrap_or(serde_json::Value::Null),
        output_snapshot: serde_json::from_str(&output_snapshot).unwrap_or(serde_json::Value::Null),
        prompt_id: row.get(6)?,
        model_id: row.get(7)?,
        retrieved_evidence: serde_json::from_str(&retrieved_evidence).unwrap_or_default(),
        justification: row.get(9)?,
        duration_ms: row.get(10)?,
        error: row.get(11)?,
        recorded_at: parse_datetime(row.get(12)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::evidence::Evidence;

    fn sample_step(classification_id: ClassificationId, index: u32) -> AuditStep {
        AuditStep {
            step_id: AuditStepId::new(),
            classification_id,
            agent: AgentKind::Ncm,
            step_index: index,
            input_snapshot: serde_json::json!({"description": "dipirona 500mg"}),
            output_snapshot: serde_json::json!({"ncm": "30049069"}),
            prompt_id: "ncm_v1".into(),
            model_id: "claude-3-5-sonnet".into(),
            retrieved_evidence: Vec::<Evidence>::new(),
            justification: "matches NESH chapter 30".into(),
            duration_ms: 340,
            error: None,
            recorded_at: Utc::now(),
        }
    }

    fn sample_classification(classification_id: ClassificationId, product_id: &str) -> Classification {
        Classification {
            classification_id,
            product_id: ProductId(product_id.to_string()),
            ncm_final: Ncm::parse("30049069").ok(),
            cest_final: Some(CestOutcome::NotApplicable),
            confidence_ncm: 0.91,
            confidence_cest: 0.95,
            status: ClassificationStatus::Determined,
            flow_kind: FlowKind::Determination,
            created_at: Utc::now(),
            golden_set_ref: None,
        }
    }

    #[test]
    fn records_and_retrieves_steps_in_order() {
        let store = AuditStore::in_memory().unwrap();
        let classification_id = ClassificationId::new();
        store.write_classification(&sample_classification(classification_id, "p1"), &TenantId("tenant-1".into())).unwrap();
        store.record_step(&sample_step(classification_id, 0)).unwrap();
        store.record_step(&sample_step(classification_id, 1)).unwrap();

        let steps = store.steps_for_classification(classification_id).unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].step_index, 0);
        assert_eq!(steps[1].step_index, 1);
    }

    #[test]
    fn classification_round_trips_by_id_and_product() {
        let store = AuditStore::in_memory().unwrap();
        let classification_id = ClassificationId::new();
        let classification = sample_classification(classification_id, "p1");
        store.write_classification(&classification, &TenantId("tenant-1".into())).unwrap();

        let fetched = store.classification_by_id(classification_id).unwrap().unwrap();
        assert_eq!(fetched.ncm_final.as_ref().map(|n| n.as_str().to_string()), Some("30049069".to_string()));

        let history = store.classifications_for_product(&ProductId("p1".into())).unwrap();
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn failed_steps_filter_by_agent_and_error() {
        let store = AuditStore::in_memory().unwrap();
        let classification_id = ClassificationId::new();
        store.write_classification(&sample_classification(classification_id, "p1"), &TenantId("tenant-1".into())).unwrap();

        let mut failing = sample_step(classification_id, 0);
        failing.error = Some("llm timeout".into());
        store.record_step(&failing).unwrap();
        store.record_step(&sample_step(classification_id, 1)).unwrap();

        let failed = store.failed_steps_for_agent(AgentKind::Ncm).unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].step_index, 0);
    }
}
