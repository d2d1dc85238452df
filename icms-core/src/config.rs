//! Runtime configuration: defaults layered with an optional TOML file and
//! `ICMS_`-prefixed environment overrides, validated once at construction.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Confidence thresholds gating automatic confirmation/determination vs.
/// manual review (spec §6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub ncm_confirm: f64,
    pub cest_confirm: f64,
    pub golden_match: f64,
    pub embed_group: f64,
    /// Below this confidence, a ConfirmationFlow pivots its NCM/CEST step
    /// from validate to determine mode (§4.5).
    pub pivot: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            ncm_confirm: 0.85,
            cest_confirm: 0.85,
            golden_match: 0.92,
            embed_group: 0.90,
            pivot: 0.7,
        }
    }
}

/// Weights for the retrieval fusion formula (§4.2). Must sum to 1.0.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalWeights {
    pub dense: f64,
    pub sparse: f64,
    pub rule: f64,
    pub golden: f64,
}

impl Default for RetrievalWeights {
    fn default() -> Self {
        Self {
            dense: 0.35,
            sparse: 0.25,
            rule: 0.20,
            golden: 0.20,
        }
    }
}

impl RetrievalWeights {
    fn validate(&self) -> Result<()> {
        let sum = self.dense + self.sparse + self.rule + self.golden;
        if (sum - 1.0).abs() > 1e-6 {
            return Err(Error::config(format!(
                "retrieval_weights must sum to 1.0, got {sum}"
            )));
        }
        Ok(())
    }
}

/// Per-scope timeouts, all expressed in milliseconds (§5).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub per_item_ms: u64,
    pub per_node_ms: u64,
    pub per_retrieval_mode_ms: u64,
    pub per_llm_call_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            per_item_ms: 120_000,
            per_node_ms: 30_000,
            per_retrieval_mode_ms: 5_000,
            per_llm_call_ms: 20_000,
        }
    }
}

/// Model id assigned to each agent role (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelAssignments {
    pub enrichment: String,
    pub ncm: String,
    pub cest: String,
    pub reconciliation: String,
    pub default: String,
}

impl Default for ModelAssignments {
    fn default() -> Self {
        let default = "claude-3-5-sonnet-latest".to_string();
        Self {
            enrichment: default.clone(),
            ncm: default.clone(),
            cest: default.clone(),
            reconciliation: default.clone(),
            default,
        }
    }
}

/// Golden-Set scoping behaviour (Open Question decision, §9).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct GoldenSetConfig {
    pub shared_across_tenants: bool,
}

impl Default for GoldenSetConfig {
    fn default() -> Self {
        Self { shared_across_tenants: true }
    }
}

/// Which aggregation methods the `AggregationAgent` may use, in preference
/// order (§4.4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    pub methods_enabled: Vec<String>,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            methods_enabled: vec![
                "exact_description".into(),
                "normalised_description".into(),
                "embedding_similarity".into(),
                "code_equivalence".into(),
            ],
        }
    }
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub concurrency: usize,
    pub thresholds: Thresholds,
    pub retrieval_weights: RetrievalWeights,
    pub timeouts: Timeouts,
    pub models: ModelAssignments,
    pub prompts_version: String,
    pub golden_set: GoldenSetConfig,
    pub aggregation: AggregationConfig,
    pub force_reclassify: bool,
    pub resume: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            concurrency: 8,
            thresholds: Thresholds::default(),
            retrieval_weights: RetrievalWeights::default(),
            timeouts: Timeouts::default(),
            models: ModelAssignments::default(),
            prompts_version: "v1".to_string(),
            golden_set: GoldenSetConfig::default(),
            aggregation: AggregationConfig::default(),
            force_reclassify: false,
            resume: true,
        }
    }
}

impl Config {
    /// Load defaults, overlay an optional TOML file, then overlay
    /// `ICMS_`-prefixed environment variables, and validate the result.
    ///
    /// Mirrors the layered-config pattern used elsewhere in the example
    /// pack (defaults -> file -> env), adapted to this crate's settings.
    pub fn load(file_path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = file_path {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| Error::config(format!("reading config file {}: {e}", path.display())))?;
            config = toml::from_str(&raw)
                .map_err(|e| Error::config(format!("parsing config file {}: {e}", path.display())))?;
        }

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("ICMS_CONCURRENCY") {
            if let Ok(n) = v.parse() {
                self.concurrency = n;
            }
        }
        if let Ok(v) = std::env::var("ICMS_FORCE_RECLASSIFY") {
            self.force_reclassify = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("ICMS_RESUME") {
            self.resume = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("ICMS_DEFAULT_MODEL") {
            self.models.default = v;
        }
    }

    fn validate(&self) -> Result<()> {
        self.retrieval_weights.validate()?;
        for (name, value) in [
            ("ncm_confirm", self.thresholds.ncm_confirm),
            ("cest_confirm", self.thresholds.cest_confirm),
            ("golden_match", self.thresholds.golden_match),
            ("embed_group", self.thresholds.embed_group),
            ("pivot", self.thresholds.pivot),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::config(format!("threshold '{name}' must be in [0,1], got {value}")));
            }
        }
        if self.concurrency == 0 {
            return Err(Error::config("concurrency must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn weights_must_sum_to_one() {
        let weights = RetrievalWeights { dense: 0.5, sparse: 0.5, rule: 0.5, golden: 0.5 };
        assert!(weights.validate().is_err());
    }

    #[test]
    fn rejects_zero_concurrency() {
        let config = Config { concurrency: 0, ..Config::default() };
        assert!(config.validate().is_err());
    }
}
