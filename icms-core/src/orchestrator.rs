//! Workflow Orchestrator: drives one Product through Enrichment -> NCM ->
//! CEST -> Reconciliation as a typed state machine (spec §4.5).
//!
//! Aggregation is batch-scoped (spec §4.4.2) and run once per batch by the
//! Dispatcher before per-item workflows start; it is not a node of this
//! state machine.

use crate::agents::{CestAgent, CestOutcomeResult, EnrichmentAgent, NcmAgent, NcmOutcome, ReconciliationAgent};
use crate::config::Config;
use crate::domain::audit::{AgentKind, AuditStep};
use crate::domain::cest::CestOutcome;
use crate::domain::classification::{Classification, ClassificationStatus, FlowKind};
use crate::domain::evidence::Evidence;
use crate::domain::ids::{AuditStepId, ClassificationId};
use crate::domain::ncm::Ncm;
use crate::domain::product::Product;
use crate::error::{Error, Result};
use crate::kb::{KbHandle, KbSnapshot};
use crate::llm::LLMClient;
use crate::retrieval::{self, RetrievalPlan};
use chrono::Utc;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A node-level deadline plus a cooperative cancellation flag, threaded
/// through every suspension point in a workflow run (§5, §9: "pass a call
/// context, don't leak a scheduling primitive into agent code").
#[derive(Clone)]
pub struct CallContext {
    deadline: Instant,
    cancelled: Arc<AtomicBool>,
}

impl CallContext {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { deadline: Instant::now() + timeout, cancelled: Arc::new(AtomicBool::new(false)) }
    }

    /// A handle the Dispatcher can hold onto and flip independently of the
    /// `CallContext` passed into the running workflow.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::cancelled("workflow cancelled"));
        }
        if self.remaining().is_zero() {
            return Err(Error::timeout(0));
        }
        Ok(())
    }
}

/// Which NCM/CEST mode a step ran in, per the ConfirmationFlow/
/// DeterminationFlow split (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepMode {
    Validate,
    Determine,
}

/// Node of the per-item workflow state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowState {
    Start,
    Enrichment,
    NcmStep(StepMode),
    CestStep,
    Reconciliation,
    Complete,
    ManualReview,
    Error,
}

/// A serialisable point-in-time view of a run, persisted at every
/// transition so an interrupted run can be replayed or inspected (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSnapshot {
    pub classification_id: ClassificationId,
    pub product_id: crate::domain::ids::ProductId,
    pub flow_kind: FlowKind,
    pub state: WorkflowState,
    pub ncm_final: Option<String>,
    pub ncm_confidence: f64,
    pub cest_final: Option<String>,
    pub cest_confidence: f64,
    pub audit_step_count: u32,
}

/// The terminal result of one workflow run.
pub struct WorkflowOutcome {
    pub classification: Classification,
    pub audit_steps: Vec<AuditStep>,
    pub final_snapshot: WorkflowSnapshot,
}

/// Bounded retry attempts per node (§4.5 default: 2).
pub const MAX_NODE_ATTEMPTS: u32 = 2;

/// Drives a single Product through the classification state machine
/// against one immutable `KbSnapshot`, recording one `AuditStep` per agent
/// invocation.
pub struct WorkflowOrchestrator {
    llm: Arc<dyn LLMClient>,
    enrichment: EnrichmentAgent,
    ncm: NcmAgent,
    cest: CestAgent,
    reconciliation: ReconciliationAgent,
    kb: Arc<KbHandle>,
    config: Config,
}

impl WorkflowOrchestrator {
    pub fn new(llm: Arc<dyn LLMClient>, kb: Arc<KbHandle>, config: Config) -> Self {
        let models = config.models.clone();
        Self {
            enrichment: EnrichmentAgent::new(llm.clone(), Some(models.enrichment)),
            ncm: NcmAgent::new(llm.clone(), Some(models.ncm)),
            cest: CestAgent::new(llm.clone(), Some(models.cest)),
            reconciliation: ReconciliationAgent::new(llm.clone(), Some(models.reconciliation)),
            llm,
            kb,
            config,
        }
    }

    /// Runs `product` to completion or to a terminal `Error`/`ManualReview`
    /// state. Never returns `Err` for expected terminal conditions
    /// (timeout, cancellation, agent failure past its retry budget) — those
    /// are reported as the `Classification`'s status, with whatever
    /// `AuditStep`s were recorded before the failure preserved in the
    /// outcome, per §4.5/§7.
    pub async fn run(&self, product: &Product, flow_kind: FlowKind, ctx: &CallContext) -> Result<WorkflowOutcome> {
        let classification_id = ClassificationId::new();
        let per_node = Duration::from_millis(self.config.timeouts.per_node_ms);
        let mut audit = Vec::new();
        let snapshot = self.kb.current().await;

        // --- Enrichment -----------------------------------------------
        let enrichment_plan = RetrievalPlan::for_text(&product.description_raw);
        let Ok(evidence) = self.retrieve(&snapshot, &enrichment_plan, ctx, per_node).await else {
            return Ok(self.finish(classification_id, product, flow_kind, WorkflowState::Error, ClassificationStatus::Error, None, 0.0, None, 0.0, audit));
        };

        let (enriched, step) = self
            .run_node(ctx, per_node, classification_id, AgentKind::Enrichment, 0, &evidence, "enrichment_v1", || {
                Box::pin(self.enrichment.run(product, &evidence))
            })
            .await;
        audit.push(step);
        let Some(enriched) = enriched else {
            return Ok(self.finish(classification_id, product, flow_kind, WorkflowState::Error, ClassificationStatus::Error, None, 0.0, None, 0.0, audit));
        };

        // --- NCM ---------------------------------------------------------
        let ncm_mode = if flow_kind == FlowKind::Confirmation && product.ncm_declared.is_some() {
            StepMode::Validate
        } else {
            StepMode::Determine
        };
        let attrs_json = serde_json::Value::Object(enriched.extracted_attributes.clone());
        let ncm_query = format!("{} {}", enriched.description_enriched, attrs_json);
        let mut ncm_plan = RetrievalPlan::for_text(ncm_query);
        if let Some(declared) = &product.ncm_declared {
            ncm_plan = ncm_plan.with_ncm_hint(declared.clone());
        }
        let Ok(ncm_evidence) = self.retrieve(&snapshot, &ncm_plan, ctx, per_node).await else {
            return Ok(self.finish(classification_id, product, flow_kind, WorkflowState::Error, ClassificationStatus::Error, None, 0.0, None, 0.0, audit));
        };

        let ncm_declared = product.ncm_declared.as_deref();
        let (ncm_outcome, step) = self
            .run_node(ctx, per_node, classification_id, AgentKind::Ncm, 1, &ncm_evidence, "ncm_v1", || {
                Box::pin(self.ncm.run(&enriched.description_enriched, &enriched.extracted_attributes, ncm_declared, &ncm_evidence, &snapshot))
            })
            .await;
        audit.push(step);
        let Some(ncm_outcome): Option<NcmOutcome> = ncm_outcome else {
            return Ok(self.finish(classification_id, product, flow_kind, WorkflowState::Error, ClassificationStatus::Error, None, 0.0, None, 0.0, audit));
        };

        // ConfirmationFlow pivots to a Determine-grade read whenever the
        // validated code disagrees with the declaration or confidence
        // falls under the pivot threshold; the agent has already produced
        // its best-supported code either way (its instructions ask it to
        // evaluate, not assume, a declared code), so the pivot here
        // reclassifies how much to trust the result rather than issuing a
        // second agent call.
        let ncm_confirmed = ncm_mode == StepMode::Validate
            && ncm_declared.map(|d| d == ncm_outcome.ncm.as_str()).unwrap_or(false)
            && ncm_outcome.confidence >= self.config.thresholds.pivot;

        // --- CEST ----------------------------------------------------------
        // Segment exclusion (§4.4.4) is enforced here, not left to the
        // agent: rule retrieval only returns CEST rules whose segment
        // matches the company's resolved segment, so a rule the company
        // falls outside of is never presented as a candidate.
        let segment_id = crate::domain::resolve_segment_id(enriched.segment_hint.as_deref(), product.company_activity.as_deref());
        let mut cest_plan = RetrievalPlan::for_text(enriched.description_enriched.clone()).with_ncm_hint(ncm_outcome.ncm.as_str());
        if let Some(segment_id) = &segment_id {
            cest_plan = cest_plan.with_segment_hint(segment_id.clone());
        }
        let Ok(cest_evidence) = self.retrieve(&snapshot, &cest_plan, ctx, per_node).await else {
            return Ok(self.finish(
                classification_id, product, flow_kind, WorkflowState::Error, ClassificationStatus::Error,
                Some(ncm_outcome.ncm.clone()), ncm_outcome.confidence, None, 0.0, audit,
            ));
        };

        let cest_declared = product.cest_declared.as_deref();
        let ncm_code = ncm_outcome.ncm.as_str().to_string();
        let (cest_outcome, step) = self
            .run_node(ctx, per_node, classification_id, AgentKind::Cest, 2, &cest_evidence, "cest_v1", || {
                Box::pin(self.cest.run(&enriched.description_enriched, &ncm_code, cest_declared, segment_id.as_deref(), &cest_evidence))
            })
            .await;
        audit.push(step);
        let Some(cest_outcome): Option<CestOutcomeResult> = cest_outcome else {
            return Ok(self.finish(
                classification_id, product, flow_kind, WorkflowState::Error, ClassificationStatus::Error,
                Some(ncm_outcome.ncm.clone()), ncm_outcome.confidence, None, 0.0, audit,
            ));
        };

        // --- Reconciliation --------------------------------------------
        let mut recon_evidence = ncm_evidence;
        recon_evidence.extend(cest_evidence);
        let (verdict, step) = self
            .run_node(ctx, per_node, classification_id, AgentKind::Reconciliation, 3, &recon_evidence, "reconciliation_v1", || {
                Box::pin(self.reconciliation.run(
                    &enriched.description_enriched,
                    ncm_outcome.ncm.as_str(),
                    &cest_outcome.outcome,
                    ncm_declared,
                    cest_declared,
                    flow_kind,
                    &recon_evidence,
                    &snapshot,
                ))
            })
            .await;
        audit.push(step);

        let Some(verdict) = verdict else {
            return Ok(self.finish(
                classification_id, product, flow_kind, WorkflowState::Error, ClassificationStatus::Error,
                Some(ncm_outcome.ncm.clone()), ncm_outcome.confidence,
                Some(cest_outcome.outcome.clone()), cest_outcome.confidence, audit,
            ));
        };

        // A confirmed-but-low-confidence NCM under ConfirmationFlow still
        // needs the Reconciliation verdict to decide the final status; a
        // disagreement downgrades straight to ManualReview without undoing
        // the NCM/CEST steps already recorded (§4.4.5: "may downgrade
        // without re-running agents").
        // A hallucinated NCM (no match in the KB snapshot even after the
        // agent's error-repair retry) can never be CONFIRMED/DETERMINED
        // regardless of what Reconciliation concluded (§4.4.3, §8.2).
        let status = if !ncm_outcome.hierarchy_valid {
            ClassificationStatus::ManualReview
        } else if !ncm_confirmed && flow_kind == FlowKind::Confirmation {
            match verdict.status {
                ClassificationStatus::Confirmed => ClassificationStatus::Determined,
                other => other,
            }
        } else {
            verdict.status
        };

        let state = match status {
            ClassificationStatus::Confirmed | ClassificationStatus::Determined => WorkflowState::Complete,
            ClassificationStatus::ManualReview => WorkflowState::ManualReview,
            ClassificationStatus::Error => WorkflowState::Error,
        };

        Ok(self.finish(
            classification_id, product, flow_kind, state, status,
            Some(ncm_outcome.ncm), ncm_outcome.confidence,
            Some(cest_outcome.outcome), cest_outcome.confidence, audit,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        classification_id: ClassificationId,
        product: &Product,
        flow_kind: FlowKind,
        state: WorkflowState,
        status: ClassificationStatus,
        ncm_final: Option<Ncm>,
        confidence_ncm: f64,
        cest_final: Option<CestOutcome>,
        confidence_cest: f64,
        audit_steps: Vec<AuditStep>,
    ) -> WorkflowOutcome {
        let final_snapshot = WorkflowSnapshot {
            classification_id,
            product_id: product.product_id.clone(),
            flow_kind,
            state,
            ncm_final: ncm_final.as_ref().map(|n| n.as_str().to_string()),
            ncm_confidence: confidence_ncm,
            cest_final: cest_final.as_ref().map(|c| c.to_string()),
            cest_confidence: confidence_cest,
            audit_step_count: audit_steps.len() as u32,
        };

        let classification = Classification {
            classification_id,
            product_id: product.product_id.clone(),
            ncm_final,
            cest_final,
            confidence_ncm,
            confidence_cest,
            status,
            flow_kind,
            created_at: Utc::now(),
            golden_set_ref: None,
        };

        WorkflowOutcome { classification, audit_steps, final_snapshot }
    }

    async fn retrieve(&self, snapshot: &KbSnapshot, plan: &RetrievalPlan, ctx: &CallContext, per_node: Duration) -> Result<Vec<Evidence>> {
        ctx.check()?;
        let budget = ctx.remaining().min(per_node);
        tokio::time::timeout(
            budget,
            retrieval::retrieve(snapshot, self.llm.as_ref(), &self.config.models.default, &self.config.retrieval_weights, plan),
        )
        .await
        .map_err(|_| Error::timeout(budget.as_millis() as u64))?
    }

    /// Runs one agent call with bounded retries and a per-node deadline,
    /// recording exactly one `AuditStep` regardless of how many attempts
    /// it took (§4.4: "each call produces exactly one AuditStep").
    #[allow(clippy::too_many_arguments)]
    async fn run_node<'a, T>(
        &'a self,
        ctx: &CallContext,
        per_node: Duration,
        classification_id: ClassificationId,
        agent: AgentKind,
        step_index: u32,
        evidence: &[Evidence],
        prompt_id: &str,
        mut attempt: impl FnMut() -> BoxFuture<'a, Result<(T, u64)>>,
    ) -> (Option<T>, AuditStep)
    where
        T: serde::Serialize,
    {
        let start = Instant::now();
        let mut retries = 0u32;

        let outcome = loop {
            if let Err(err) = ctx.check() {
                break Err(err);
            }
            let budget = ctx.remaining().min(per_node);
            match tokio::time::timeout(budget, attempt()).await {
                Ok(Ok((value, _duration))) => break Ok(value),
                Ok(Err(err)) if err.is_transient() && retries < MAX_NODE_ATTEMPTS => {
                    retries += 1;
                    let backoff = Duration::from_millis(100 * 2u64.pow(retries));
                    tokio::time::sleep(backoff.min(ctx.remaining())).await;
                }
                Ok(Err(err)) => break Err(err),
                Err(_) => break Err(Error::timeout(budget.as_millis() as u64)),
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;

        let (value, output_snapshot, error) = match outcome {
            Ok(value) => {
                let snapshot = serde_json::to_value(&value).unwrap_or(serde_json::Value::Null);
                (Some(value), snapshot, None)
            }
            Err(err) => (None, serde_json::Value::Null, Some(err.to_string())),
        };

        let step = AuditStep {
            step_id: AuditStepId::new(),
            classification_id,
            agent,
            step_index,
            input_snapshot: serde_json::json!({ "evidence_count": evidence.len() }),
            output_snapshot,
            prompt_id: prompt_id.to_string(),
            model_id: self.config.models.default.clone(),
            retrieved_evidence: evidence.to_vec(),
            justification: String::new(),
            duration_ms,
            error,
            recorded_at: Utc::now(),
        };

        (value, step)
    }
}
