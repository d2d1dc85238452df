//! Dispatcher: bounded-concurrency batch runner over a tenant's Products
//! (spec §4.8). Grounded on `llm::batch::BatchExecutor`'s
//! `Semaphore`-gated concurrency and order-preserving result collection,
//! generalised from "batch of LLM prompts" to "batch of workflow runs".

use crate::agents::AggregationAgent;
use crate::audit::AuditStore;
use crate::config::Config;
use crate::domain::classification::{Classification, FlowKind};
use crate::domain::ids::TenantId;
use crate::domain::product::{EnrichedProduct, Product};
use crate::error::Result;
use crate::kb::normalise_description;
use crate::llm::LLMClient;
use crate::orchestrator::{CallContext, WorkflowOrchestrator};
use crate::trajectory::TrajectoryEvent;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Outcome of one product's run within a batch.
#[derive(Debug, Clone)]
pub struct ItemResult {
    pub product_id: crate::domain::ids::ProductId,
    pub classification: Classification,
    pub skipped: bool,
}

/// Summary of a completed (or cancelled) Dispatcher job (§4.8).
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub total: usize,
    pub processed: usize,
    pub skipped: usize,
    pub manual_review: usize,
    pub failed: usize,
    pub partial_success: bool,
    pub items: Vec<ItemResult>,
}

/// Bounded-concurrency runner that drives a `WorkflowOrchestrator` over a
/// tenant's Products, deduplicating near-identical descriptions via
/// batch-scoped Aggregation before dispatching one workflow run per group
/// representative (§4.4.2, §4.8).
pub struct Dispatcher {
    orchestrator: Arc<WorkflowOrchestrator>,
    audit: Arc<AuditStore>,
    aggregation: AggregationAgent,
    config: Config,
}

impl Dispatcher {
    pub fn new(orchestrator: Arc<WorkflowOrchestrator>, audit: Arc<AuditStore>, llm: Arc<dyn LLMClient>, config: Config) -> Self {
        let aggregation = AggregationAgent::new(llm, Some(config.models.default.clone()));
        Self { orchestrator, audit, aggregation, config }
    }

    /// Runs `products` (already scoped to `tenant_id` by the caller) to
    /// completion, or until `cancel` is flipped. Non-terminal per-item
    /// failures never abort the batch: a failed item is recorded as
    /// `ManualReview`/`Error` and the run continues (§4.8 "partial
    /// success").
    pub async fn run(&self, tenant_id: &TenantId, products: Vec<Product>, cancel: Arc<AtomicBool>) -> Result<DispatchReport> {
        let total = products.len();
        tracing::info!(tenant_id = %tenant_id, total, "dispatch started");
        let _start_event = TrajectoryEvent::dispatch_start(tenant_id.0.clone(), total);

        let (to_run, skipped_items) = self.partition_resumable(products)?;

        let groups = self.group_by_similarity(&to_run).await;

        let processed = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));
        let manual_review = Arc::new(AtomicUsize::new(0));
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let per_item = Duration::from_millis(self.config.timeouts.per_item_ms);

        let mut handles = Vec::with_capacity(groups.len());
        for representative in groups {
            let semaphore = Arc::clone(&semaphore);
            let orchestrator = Arc::clone(&self.orchestrator);
            let cancel = Arc::clone(&cancel);
            let processed = Arc::clone(&processed);
            let failed = Arc::clone(&failed);
            let manual_review = Arc::clone(&manual_review);
            let flow_kind = if representative.has_declared_codes() { FlowKind::Confirmation } else { FlowKind::Determination };

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.expect("dispatcher semaphore closed unexpectedly");
                if cancel.load(Ordering::Relaxed) {
                    return None;
                }

                let ctx = CallContext::with_timeout(per_item);
                let outcome = orchestrator.run(&representative, flow_kind, &ctx).await;

                match outcome {
                    Ok(outcome) => {
                        processed.fetch_add(1, Ordering::Relaxed);
                        if outcome.classification.needs_manual_review() {
                            manual_review.fetch_add(1, Ordering::Relaxed);
                        }
                        Some((representative, outcome))
                    }
                    Err(err) => {
                        tracing::warn!(product_id = %representative.product_id, error = %err, "workflow run failed outright");
                        failed.fetch_add(1, Ordering::Relaxed);
                        None
                    }
                }
            }));
        }

        let mut items = skipped_items;
        for handle in handles {
            let Some((representative, outcome)) = handle.await.map_err(|e| crate::error::Error::internal(format!("dispatcher task panicked: {e}")))? else {
                continue;
            };

            self.audit.write_classification(&outcome.classification, tenant_id)?;
            for step in &outcome.audit_steps {
                self.audit.record_step(step)?;
            }

            items.push(ItemResult { product_id: representative.product_id.clone(), classification: outcome.classification, skipped: false });
        }

        let failed_count = failed.load(Ordering::Relaxed);
        let report = DispatchReport {
            total,
            processed: processed.load(Ordering::Relaxed),
            skipped: items.iter().filter(|i| i.skipped).count(),
            manual_review: manual_review.load(Ordering::Relaxed),
            failed: failed_count,
            partial_success: failed_count > 0,
            items,
        };

        let _complete_event = TrajectoryEvent::dispatch_complete(tenant_id.0.clone(), report.partial_success);
        tracing::info!(tenant_id = %tenant_id, processed = report.processed, failed = report.failed, "dispatch complete");
        Ok(report)
    }

    /// Splits `products` into those that still need a run and those
    /// resolved by a prior non-error classification, per `resume`/
    /// `force_reclassify` (§4.8).
    fn partition_resumable(&self, products: Vec<Product>) -> Result<(Vec<Product>, Vec<ItemResult>)> {
        if self.config.force_reclassify || !self.config.resume {
            return Ok((products, Vec::new()));
        }

        let mut to_run = Vec::new();
        let mut skipped = Vec::new();
        for product in products {
            let history = self.audit.classifications_for_product(&product.product_id)?;
            match history.into_iter().find(|c| !c.needs_manual_review()) {
                Some(existing) => skipped.push(ItemResult { product_id: product.product_id.clone(), classification: existing, skipped: true }),
                None => to_run.push(product),
            }
        }
        Ok((to_run, skipped))
    }

    /// Batch-scoped Aggregation pass (§4.4.2): groups products the
    /// `AggregationAgent` judges to be the same good and returns one
    /// representative per group, so the state machine only runs once per
    /// distinct product. Uses a whitespace-normalised description rather
    /// than the full `EnrichmentAgent` pass, since the representative is
    /// re-enriched anyway once its workflow run starts.
    async fn group_by_similarity(&self, products: &[Product]) -> Vec<Product> {
        if products.len() <= 1 {
            return products.to_vec();
        }

        let lightly_enriched: Vec<EnrichedProduct> = products
            .iter()
            .map(|p| EnrichedProduct {
                product_id: p.product_id.clone(),
                description_enriched: normalise_description(&p.description_raw),
                extracted_attributes: serde_json::Map::new(),
                segment_hint: None,
                confidence: 0.0,
            })
            .collect();

        let Ok((report, _duration_ms)) = self.aggregation.run(&lightly_enriched).await else {
            return products.to_vec();
        };

        let by_id: std::collections::HashMap<_, _> = products.iter().map(|p| (p.product_id.clone(), p.clone())).collect();
        let mut representatives: Vec<Product> = report
            .groups
            .iter()
            .filter_map(|group| by_id.get(&group.representative_product_id).cloned())
            .collect();
        representatives.extend(report.ungrouped.iter().filter_map(|u| by_id.get(&u.product_id).cloned()));
        representatives
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditStore;
    use crate::domain::cest::{Cest, CestOutcome};
    use crate::domain::classification::ClassificationStatus;
    use crate::domain::ids::{ClassificationId, ProductId};
    use crate::domain::ncm::Ncm;
    use crate::kb::{GraphStore, KbHandle, KbSnapshot, StructuredStore, VectorIndex};
    use crate::llm::{CompletionRequest, CompletionResponse, EmbeddingRequest, EmbeddingResponse, ModelSpec, Provider};
    use async_trait::async_trait;
    use chrono::Utc;

    /// Never actually called by `partition_resumable`; exists only so a
    /// `Dispatcher` can be constructed in these tests.
    struct UnusedClient;

    #[async_trait]
    impl LLMClient for UnusedClient {
        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse> {
            unreachable!("test does not exercise LLM calls")
        }

        async fn embed(&self, _request: EmbeddingRequest) -> Result<EmbeddingResponse> {
            unreachable!("test does not exercise LLM calls")
        }

        fn provider(&self) -> Provider {
            Provider::Anthropic
        }

        fn available_models(&self) -> Vec<ModelSpec> {
            Vec::new()
        }
    }

    fn sample_product(id: &str) -> Product {
        Product {
            product_id: ProductId(id.to_string()),
            tenant_id: TenantId("tenant-1".into()),
            description_raw: "dipirona 500mg 20 comprimidos".into(),
            internal_code: None,
            barcode: None,
            ncm_declared: None,
            cest_declared: None,
            company_activity: None,
        }
    }

    fn sample_classification(product_id: &str) -> Classification {
        Classification {
            classification_id: ClassificationId::new(),
            product_id: ProductId(product_id.to_string()),
            ncm_final: Some(Ncm::parse("30049069").unwrap()),
            cest_final: Some(CestOutcome::Code(Cest::parse("1300100").unwrap())),
            confidence_ncm: 0.93,
            confidence_cest: 0.9,
            status: ClassificationStatus::Determined,
            flow_kind: FlowKind::Determination,
            created_at: Utc::now(),
            golden_set_ref: None,
        }
    }

    fn build_dispatcher(audit: Arc<AuditStore>) -> Dispatcher {
        build_dispatcher_with_llm(audit, Arc::new(UnusedClient))
    }

    fn build_dispatcher_with_llm(audit: Arc<AuditStore>, llm: Arc<dyn LLMClient>) -> Dispatcher {
        let kb = Arc::new(KbHandle::new(KbSnapshot::new(
            StructuredStore::in_memory().unwrap(),
            VectorIndex::new(),
            GraphStore::new(),
            1,
        )));
        let config = Config::default();
        let orchestrator = Arc::new(WorkflowOrchestrator::new(llm.clone(), kb, config.clone()));
        Dispatcher::new(orchestrator, audit, llm, config)
    }

    /// Returns a fixed aggregation verdict regardless of the prompt, used
    /// only to drive `group_by_similarity`'s batch-scoped grouping pass.
    struct FixedAggregationResponse(String);

    #[async_trait]
    impl LLMClient for FixedAggregationResponse {
        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse> {
            Ok(CompletionResponse {
                id: "test".to_string(),
                model: "test-model".to_string(),
                content: self.0.clone(),
                stop_reason: None,
                usage: Default::default(),
                timestamp: Utc::now(),
                cost: None,
            })
        }

        async fn embed(&self, _request: EmbeddingRequest) -> Result<EmbeddingResponse> {
            unreachable!("aggregation does not embed")
        }

        fn provider(&self) -> Provider {
            Provider::Anthropic
        }

        fn available_models(&self) -> Vec<ModelSpec> {
            Vec::new()
        }
    }

    #[test]
    fn resume_skips_products_with_a_non_error_classification() {
        let audit = Arc::new(AuditStore::in_memory().unwrap());
        audit
            .write_classification(&sample_classification("p1"), &TenantId("tenant-1".into()))
            .unwrap();

        let dispatcher = build_dispatcher(audit);
        let (to_run, skipped) = dispatcher.partition_resumable(vec![sample_product("p1"), sample_product("p2")]).unwrap();

        assert_eq!(to_run.len(), 1);
        assert_eq!(to_run[0].product_id, ProductId("p2".to_string()));
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].product_id, ProductId("p1".to_string()));
    }

    #[test]
    fn force_reclassify_ignores_prior_classifications() {
        let audit = Arc::new(AuditStore::in_memory().unwrap());
        audit
            .write_classification(&sample_classification("p1"), &TenantId("tenant-1".into()))
            .unwrap();

        let mut dispatcher = build_dispatcher(audit);
        dispatcher.config.force_reclassify = true;
        let (to_run, skipped) = dispatcher.partition_resumable(vec![sample_product("p1")]).unwrap();

        assert_eq!(to_run.len(), 1);
        assert!(skipped.is_empty());
    }

    #[tokio::test]
    async fn single_product_batch_skips_the_aggregation_pass() {
        let audit = Arc::new(AuditStore::in_memory().unwrap());
        let dispatcher = build_dispatcher(audit);
        let representatives = dispatcher.group_by_similarity(&[sample_product("p1")]).await;
        assert_eq!(representatives.len(), 1);
    }

    fn product_with_description(id: &str, description: &str) -> Product {
        Product { description_raw: description.to_string(), ..sample_product(id) }
    }

    // S6 - Aggregation: three differently-worded rows for the same
    // medicine collapse to a single group; only its representative is
    // carried forward for classification.
    #[tokio::test]
    async fn s6_aggregation_collapses_near_duplicate_descriptions() {
        let products = vec![
            product_with_description("p1", "DIPIRONA 500MG C/10"),
            product_with_description("p2", "DIPIRONA SODICA 500MG 10COMP"),
            product_with_description("p3", "ANALGESICO DIPIRONA 500 MG BL C/10"),
        ];

        let aggregation_response = serde_json::json!({
            "groups": [{
                "signature": "dipirona-500mg-10un",
                "members": ["p1", "p2", "p3"],
                "confidence": 0.92,
            }],
            "ungrouped": [],
        })
        .to_string();

        let audit = Arc::new(AuditStore::in_memory().unwrap());
        let dispatcher = build_dispatcher_with_llm(audit, Arc::new(FixedAggregationResponse(aggregation_response)));

        let representatives = dispatcher.group_by_similarity(&products).await;

        assert_eq!(representatives.len(), 1);
        assert_eq!(representatives[0].product_id, ProductId("p1".to_string()));
    }
}
