//! AuditStep: one agent invocation recorded against a Classification.

use super::evidence::Evidence;
use super::ids::{AuditStepId, ClassificationId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which agent produced an `AuditStep`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Enrichment,
    Aggregation,
    Ncm,
    Cest,
    Reconciliation,
}

/// One recorded step in a Classification's audit trail. The audit log is
/// append-only: a step is never mutated or deleted once written (§8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditStep {
    pub step_id: AuditStepId,
    pub classification_id: ClassificationId,
    pub agent: AgentKind,
    pub step_index: u32,
    pub input_snapshot: serde_json::Value,
    pub output_snapshot: serde_json::Value,
    pub prompt_id: String,
    pub model_id: String,
    pub retrieved_evidence: Vec<Evidence>,
    pub justification: String,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl AuditStep {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_with_error_is_not_success() {
        let step = AuditStep {
            step_id: AuditStepId::new(),
            classification_id: ClassificationId::new(),
            agent: AgentKind::Ncm,
            step_index: 2,
            input_snapshot: serde_json::json!({}),
            output_snapshot: serde_json::json!({}),
            prompt_id: "ncm_v1".into(),
            model_id: "claude-3-5-sonnet".into(),
            retrieved_evidence: vec![],
            justification: String::new(),
            duration_ms: 120,
            error: Some("llm timeout".into()),
            recorded_at: Utc::now(),
        };
        assert!(!step.succeeded());
    }
}
