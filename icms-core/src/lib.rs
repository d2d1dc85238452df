//! # icms-core
//!
//! A multi-agent classification engine that assigns NCM (Nomenclatura Comum
//! do Mercosul) and CEST (Código Especificador da Substituição Tributária)
//! codes to merchandise descriptions, grounded in a tri-hybrid Knowledge
//! Base (structured, vector, and graph stores) and backed by an append-only
//! audit trail.
//!
//! ## Core components
//!
//! - **domain**: storage-independent data model (Product, Classification,
//!   Evidence, AuditStep, GoldenSetEntry, ...)
//! - **kb**: the Knowledge Base's structured/vector/graph stores
//! - **retrieval**: the fused dense/sparse/rule/golden retrieval toolbox
//! - **agents**: the five classification agents (Enrichment, Aggregation,
//!   NCM, CEST, Reconciliation)
//! - **orchestrator**: the per-product workflow state machine
//! - **dispatcher**: bounded-concurrency batch execution across a run
//! - **audit** / **golden_set**: append-only trail and promotion store
//! - **llm**: multi-provider LLM client abstraction and routing
//! - **signature** / **module**: typed LLM I/O contracts and composition
//!
//! ## Example
//!
//! ```rust,ignore
//! use icms_core::config::Config;
//! use icms_core::domain::Product;
//!
//! let config = Config::default();
//! ```

// Self-alias for derive macro support within the crate
extern crate self as icms_core;

pub mod agents;
pub mod audit;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod error;
pub mod golden_set;
pub mod kb;
pub mod llm;
pub mod module;
pub mod orchestrator;
pub mod retrieval;
pub mod signature;
pub mod trajectory;

pub use audit::AuditStore;
pub use config::Config;
pub use dispatcher::{DispatchReport, Dispatcher, ItemResult};
pub use error::{Error, Result};
pub use golden_set::promote_classification;
pub use orchestrator::{CallContext, WorkflowOrchestrator, WorkflowOutcome, WorkflowSnapshot, WorkflowState};
pub use llm::{
    AnthropicClient, BatchConfig, BatchExecutor, BatchQueryResult, BatchedLLMQuery,
    BatchedQueryResults, ClientConfig, CompletionRequest, CompletionResponse, CostTracker,
    DualModelConfig, LLMClient, ModelCallTier, ModelSpec, ModelTier, Provider, QueryType,
    RoutingContext, SmartRouter, SwitchStrategy, TierBreakdown,
};
pub use module::{
    chain_direct, BootstrapFewShot, Chain, Demonstration, Example, Module, ModuleConfig,
    Metric, NamedMetric, OptimizationStats, OptimizedModule, Optimizer, ParallelVec, Predict,
    PredictConfig, Predictor,
};
pub use signature::{
    apply_defaults, validate_fields, validate_value, FieldSpec, FieldType, ParseError, Signature,
    ValidationError, ValidationResult,
};
pub use trajectory::{TrajectoryEvent, TrajectoryEventType};
