//! Trajectory event types for observable classification runs.
//!
//! The Dispatcher and Workflow Orchestrator emit one `TrajectoryEvent` per
//! notable transition; the CLI binary subscribes to these as structured
//! `tracing` events, but the type itself carries no dependency on how it is
//! rendered.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Kinds of events emitted while a Dispatcher job or a single workflow run
/// progresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrajectoryEventType {
    /// A Dispatcher job started.
    DispatchStart,
    /// Periodic Dispatcher progress (processed/total/failed/manual_review).
    DispatchProgress,
    /// A Dispatcher job finished (possibly with `partial_success`).
    DispatchComplete,
    /// A single product's workflow run started.
    WorkflowStart,
    /// A state machine node started (Enrichment/NCM/CEST/Reconciliation).
    NodeStart,
    /// A node's attempt failed with a transient error and is retrying.
    NodeRetry,
    /// A node finished, successfully or not.
    NodeComplete,
    /// A Classification reached `ManualReview`.
    ManualReview,
    /// The Knowledge Base was reloaded and the snapshot swapped.
    KbReload,
    /// A Classification was promoted to a `GoldenSetEntry`.
    GoldenSetPromote,
    /// An unrecoverable error ended a run.
    Error,
}

impl std::fmt::Display for TrajectoryEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::DispatchStart => "DISPATCH_START",
            Self::DispatchProgress => "DISPATCH_PROGRESS",
            Self::DispatchComplete => "DISPATCH_COMPLETE",
            Self::WorkflowStart => "WORKFLOW_START",
            Self::NodeStart => "NODE_START",
            Self::NodeRetry => "NODE_RETRY",
            Self::NodeComplete => "NODE_COMPLETE",
            Self::ManualReview => "MANUAL_REVIEW",
            Self::KbReload => "KB_RELOAD",
            Self::GoldenSetPromote => "GOLDEN_SET_PROMOTE",
            Self::Error => "ERROR",
        };
        write!(f, "{}", s)
    }
}

/// One event in a classification run's trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryEvent {
    pub event_type: TrajectoryEventType,
    /// Tenant the event belongs to, when scoped to one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Product the event belongs to, when scoped to one item.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    /// Human-readable summary of the event.
    pub content: String,
    /// Event-specific metadata (node name, attempt count, progress counts).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, Value>>,
    pub timestamp: DateTime<Utc>,
}

impl TrajectoryEvent {
    pub fn new(event_type: TrajectoryEventType, content: impl Into<String>) -> Self {
        Self {
            event_type,
            tenant_id: None,
            product_id: None,
            content: content.into(),
            metadata: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_product(mut self, product_id: impl Into<String>) -> Self {
        self.product_id = Some(product_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.get_or_insert_with(HashMap::new).insert(key.into(), value.into());
        self
    }

    pub fn get_metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.as_ref()?.get(key)
    }

    // --- Convenience constructors -----------------------------------

    pub fn dispatch_start(tenant_id: impl Into<String>, total: usize) -> Self {
        Self::new(TrajectoryEventType::DispatchStart, format!("dispatch started ({total} candidates)"))
            .with_tenant(tenant_id)
            .with_metadata("total", total as i64)
    }

    pub fn dispatch_progress(tenant_id: impl Into<String>, processed: usize, total: usize, failed: usize, manual_review: usize) -> Self {
        Self::new(TrajectoryEventType::DispatchProgress, format!("{processed}/{total} processed"))
            .with_tenant(tenant_id)
            .with_metadata("processed", processed as i64)
            .with_metadata("total", total as i64)
            .with_metadata("failed", failed as i64)
            .with_metadata("manual_review", manual_review as i64)
    }

    pub fn dispatch_complete(tenant_id: impl Into<String>, partial_success: bool) -> Self {
        Self::new(TrajectoryEventType::DispatchComplete, "dispatch complete")
            .with_tenant(tenant_id)
            .with_metadata("partial_success", partial_success)
    }

    pub fn workflow_start(product_id: impl Into<String>) -> Self {
        let product_id = product_id.into();
        Self::new(TrajectoryEventType::WorkflowStart, format!("workflow started for {product_id}")).with_product(product_id)
    }

    pub fn node_start(product_id: impl Into<String>, node: &str) -> Self {
        Self::new(TrajectoryEventType::NodeStart, format!("{node} started"))
            .with_product(product_id)
            .with_metadata("node", node)
    }

    pub fn node_retry(product_id: impl Into<String>, node: &str, attempt: u32, reason: impl Into<String>) -> Self {
        Self::new(TrajectoryEventType::NodeRetry, reason)
            .with_product(product_id)
            .with_metadata("node", node)
            .with_metadata("attempt", attempt as i64)
    }

    pub fn node_complete(product_id: impl Into<String>, node: &str, duration_ms: u64, succeeded: bool) -> Self {
        Self::new(TrajectoryEventType::NodeComplete, format!("{node} finished"))
            .with_product(product_id)
            .with_metadata("node", node)
            .with_metadata("duration_ms", duration_ms as i64)
            .with_metadata("succeeded", succeeded)
    }

    pub fn manual_review(product_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(TrajectoryEventType::ManualReview, reason).with_product(product_id)
    }

    pub fn kb_reload(generation: u64) -> Self {
        Self::new(TrajectoryEventType::KbReload, format!("knowledge base reloaded, generation {generation}"))
            .with_metadata("generation", generation as i64)
    }

    pub fn golden_set_promote(classification_id: impl Into<String>) -> Self {
        Self::new(TrajectoryEventType::GoldenSetPromote, "promoted to golden set")
            .with_metadata("classification_id", classification_id.into())
    }

    pub fn error(product_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(TrajectoryEventType::Error, message).with_product(product_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_progress_carries_counts() {
        let event = TrajectoryEvent::dispatch_progress("tenant-a", 3, 10, 1, 1);
        assert_eq!(event.get_metadata("processed").and_then(|v| v.as_i64()), Some(3));
        assert_eq!(event.tenant_id.as_deref(), Some("tenant-a"));
    }

    #[test]
    fn node_complete_reports_duration_and_outcome() {
        let event = TrajectoryEvent::node_complete("p1", "ncm", 450, true);
        assert_eq!(event.get_metadata("duration_ms").and_then(|v| v.as_i64()), Some(450));
        assert_eq!(event.get_metadata("succeeded").and_then(|v| v.as_bool()), Some(true));
    }
}
