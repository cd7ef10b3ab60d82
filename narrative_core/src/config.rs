//! Configuration for every narrative component.
//!
//! A single immutable [`NarrativeConfig`] is built once (in code or from TOML),
//! wrapped in an `Arc` and handed to each component at construction.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use story_graph::{ActivationConfig, RelationType};

use crate::error::{NarrativeError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrativeConfig {
    pub classifier: ClassifierConfig,
    pub extractor: ExtractorConfig,
    pub analyzer: AnalyzerConfig,
    pub assembler: AssemblerConfig,
    pub embedding: EmbeddingConfig,
    pub router: RouterConfig,
}

impl NarrativeConfig {
    /// Parse a TOML document. Missing sections and fields take their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: NarrativeConfig =
            toml::from_str(source).map_err(|e| NarrativeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| NarrativeError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&source)
    }

    /// Reject values no component can work with.
    pub fn validate(&self) -> Result<()> {
        if self.assembler.default_budget == 0 {
            return Err(NarrativeError::Config(
                "assembler.default_budget must be positive".to_string(),
            ));
        }
        if let Some((model, _)) = self.assembler.model_budgets.iter().find(|(_, b)| **b == 0) {
            return Err(NarrativeError::Config(format!(
                "budget for model '{}' must be positive",
                model
            )));
        }
        if self.embedding.batch_size == 0 || self.embedding.max_concurrency == 0 {
            return Err(NarrativeError::Config(
                "embedding.batch_size and embedding.max_concurrency must be positive".to_string(),
            ));
        }
        if self.extractor.max_input_chars == 0 {
            return Err(NarrativeError::Config(
                "extractor.max_input_chars must be positive".to_string(),
            ));
        }
        let analyzer = &self.analyzer;
        if !(analyzer.tension_scale.is_finite() && analyzer.tension_scale > 0.0) {
            return Err(NarrativeError::Config(
                "analyzer.tension_scale must be finite and positive".to_string(),
            ));
        }
        for (name, weight) in [
            ("hinders_weight", analyzer.hinders_weight),
            ("foreshadows_weight", analyzer.foreshadows_weight),
            ("contradicts_weight", analyzer.contradicts_weight),
        ] {
            if !(weight.is_finite() && weight >= 0.0) {
                return Err(NarrativeError::Config(format!(
                    "analyzer.{} must be finite and non-negative, got {}",
                    name, weight
                )));
            }
        }
        for (name, value) in [
            ("analyzer.tension_medium_threshold", analyzer.tension_medium_threshold),
            ("analyzer.tension_high_threshold", analyzer.tension_high_threshold),
            ("analyzer.pacing_fast_threshold", analyzer.pacing_fast_threshold),
            ("analyzer.pacing_slow_threshold", analyzer.pacing_slow_threshold),
            ("analyzer.pacing_concluding_threshold", analyzer.pacing_concluding_threshold),
            ("classifier.min_confidence", self.classifier.min_confidence),
        ] {
            if !unit_interval(value) {
                return Err(NarrativeError::Config(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        if !analyzer.min_modularity.is_finite() {
            return Err(NarrativeError::Config(
                "analyzer.min_modularity must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

fn unit_interval(value: f32) -> bool {
    value.is_finite() && (0.0..=1.0).contains(&value)
}

/// Query classification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Below this confidence a query is treated as HYBRID.
    pub min_confidence: f32,

    /// Extra words dropped from keywords.
    pub extra_stopwords: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            extra_stopwords: Vec::new(),
        }
    }
}

/// What extraction does with relations that are disabled or outside the vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnknownRelationPolicy {
    /// Keep the edge as a `Custom` relation carrying the original label.
    #[default]
    Coerce,
    /// Drop the edge and report it.
    Drop,
}

/// Narrative extraction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Scene text beyond this many characters is cut before inference.
    pub max_input_chars: usize,

    /// Enable or disable relation types by label, overriding their defaults.
    pub relation_overrides: BTreeMap<String, bool>,

    pub unknown_relation_policy: UnknownRelationPolicy,

    /// Maximum edit distance for a near-match against a known name.
    pub near_match_distance: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            max_input_chars: 12_000,
            relation_overrides: BTreeMap::new(),
            unknown_relation_policy: UnknownRelationPolicy::Coerce,
            near_match_distance: 1,
        }
    }
}

impl ExtractorConfig {
    /// Whether extraction accepts `relation` as-is.
    pub fn is_enabled(&self, relation: &RelationType) -> bool {
        if relation.is_experimental() {
            return false;
        }
        self.relation_overrides
            .iter()
            .find(|(label, _)| RelationType::parse(label) == *relation)
            .map(|(_, enabled)| *enabled)
            .unwrap_or_else(|| relation.default_enabled())
    }
}

/// Graph analytics settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub hinders_weight: f32,
    pub foreshadows_weight: f32,
    pub contradicts_weight: f32,

    /// Raw tension that maps to roughly 63% of the normalized score.
    pub tension_scale: f32,

    pub tension_medium_threshold: f32,
    pub tension_high_threshold: f32,

    /// Partitions with lower modularity collapse to connected components.
    pub min_modularity: f64,

    /// How many bridge characters to report.
    pub bridge_count: usize,

    pub pacing_fast_threshold: f32,
    pub pacing_slow_threshold: f32,
    pub pacing_concluding_threshold: f32,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            hinders_weight: 1.0,
            foreshadows_weight: 0.6,
            contradicts_weight: 0.8,
            tension_scale: 5.0,
            tension_medium_threshold: 0.33,
            tension_high_threshold: 0.66,
            min_modularity: 0.3,
            bridge_count: 3,
            pacing_fast_threshold: 0.5,
            pacing_slow_threshold: 0.5,
            pacing_concluding_threshold: 0.4,
        }
    }
}

/// Context assembly settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblerConfig {
    /// Budget for models missing from `model_budgets`.
    pub default_budget: usize,

    /// Token budget per model id or model-id prefix.
    pub model_budgets: BTreeMap<String, usize>,

    /// Tokenizer family per model id or model-id prefix.
    pub tokenizer_families: BTreeMap<String, String>,

    pub max_decision_entries: usize,
    pub max_semantic_results: usize,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        let model_budgets = [
            ("claude", 180_000),
            ("gpt-4o", 120_000),
            ("gpt-3.5", 14_000),
            ("llama3", 7_000),
            ("mistral", 30_000),
        ]
        .into_iter()
        .map(|(model, budget)| (model.to_string(), budget))
        .collect();

        Self {
            default_budget: 4_096,
            model_budgets,
            tokenizer_families: BTreeMap::new(),
            max_decision_entries: 5,
            max_semantic_results: 8,
        }
    }
}

impl AssemblerConfig {
    /// Budget for `model`: exact id, then longest matching prefix, then the default.
    pub fn budget_for(&self, model: &str) -> usize {
        lookup_by_prefix(&self.model_budgets, model)
            .copied()
            .unwrap_or(self.default_budget)
    }

    /// Tokenizer family configured for `model`, if any.
    pub fn tokenizer_family_for(&self, model: &str) -> Option<&str> {
        lookup_by_prefix(&self.tokenizer_families, model).map(String::as_str)
    }
}

fn lookup_by_prefix<'a, V>(table: &'a BTreeMap<String, V>, model: &str) -> Option<&'a V> {
    table.get(model).or_else(|| {
        table
            .iter()
            .filter(|(prefix, _)| model.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, value)| value)
    })
}

/// Embedding index settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Upper bound for a single provider call.
    pub timeout_ms: u64,

    /// Nodes per reindex batch.
    pub batch_size: usize,

    /// Batches in flight at once during reindexing.
    pub max_concurrency: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            batch_size: 16,
            max_concurrency: 2,
        }
    }
}

/// Retrieval orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Hop radius for ego-network traversal.
    pub ego_radius: usize,

    /// Upper bound for each optional retrieval source.
    pub source_timeout_ms: u64,

    /// Entries requested from each external source.
    pub max_source_entries: usize,

    pub activation: ActivationConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            ego_radius: 2,
            source_timeout_ms: 2_000,
            max_source_entries: 10,
            activation: ActivationConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(NarrativeConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = NarrativeConfig::from_toml_str(
            r#"
            [assembler]
            default_budget = 200

            [assembler.model_budgets]
            "tiny-model" = 150

            [router]
            ego_radius = 1
            "#,
        )
        .unwrap();

        assert_eq!(config.assembler.default_budget, 200);
        assert_eq!(config.assembler.budget_for("tiny-model"), 150);
        assert_eq!(config.assembler.budget_for("unheard-of"), 200);
        assert_eq!(config.router.ego_radius, 1);
        assert_eq!(config.router.source_timeout_ms, 2_000);
        assert_eq!(config.extractor.max_input_chars, 12_000);
    }

    #[test]
    fn test_budget_longest_prefix_wins() {
        let mut config = AssemblerConfig::default();
        config.model_budgets.insert("gpt-4o-mini".to_string(), 60_000);

        assert_eq!(config.budget_for("gpt-4o-2024-08-06"), 120_000);
        assert_eq!(config.budget_for("gpt-4o-mini-2024"), 60_000);
        assert_eq!(config.budget_for("claude-3-haiku"), 180_000);
    }

    #[test]
    fn test_invalid_toml_is_a_config_error() {
        let err = NarrativeConfig::from_toml_str("[assembler]\ndefault_budget = \"lots\"").unwrap_err();
        assert!(matches!(err, NarrativeError::Config(_)));

        let err = NarrativeConfig::from_toml_str("[assembler]\ndefault_budget = 0").unwrap_err();
        assert!(matches!(err, NarrativeError::Config(_)));
    }

    #[test]
    fn test_nan_tension_scale_rejected() {
        for bad in ["nan", "inf", "0.0", "-1.0"] {
            let source = format!("[analyzer]\ntension_scale = {}", bad);
            let err = NarrativeConfig::from_toml_str(&source).unwrap_err();
            assert!(matches!(err, NarrativeError::Config(_)), "accepted {}", bad);
        }
    }

    #[test]
    fn test_negative_or_nan_weights_rejected() {
        for field in ["hinders_weight", "foreshadows_weight", "contradicts_weight"] {
            for bad in ["-0.5", "nan", "inf"] {
                let source = format!("[analyzer]\n{} = {}", field, bad);
                let err = NarrativeConfig::from_toml_str(&source).unwrap_err();
                assert!(matches!(err, NarrativeError::Config(_)), "accepted {} = {}", field, bad);
            }
        }
        assert!(NarrativeConfig::from_toml_str("[analyzer]\nhinders_weight = 0.0").is_ok());
    }

    #[test]
    fn test_thresholds_outside_unit_interval_rejected() {
        let fields = [
            ("analyzer", "tension_medium_threshold"),
            ("analyzer", "tension_high_threshold"),
            ("analyzer", "pacing_fast_threshold"),
            ("analyzer", "pacing_slow_threshold"),
            ("analyzer", "pacing_concluding_threshold"),
            ("classifier", "min_confidence"),
        ];
        for (section, field) in fields {
            for bad in ["1.5", "-0.1", "nan"] {
                let source = format!("[{}]\n{} = {}", section, field, bad);
                let err = NarrativeConfig::from_toml_str(&source).unwrap_err();
                assert!(matches!(err, NarrativeError::Config(_)), "accepted {} = {}", field, bad);
            }
            let edge = format!("[{}]\n{} = 1.0", section, field);
            assert!(NarrativeConfig::from_toml_str(&edge).is_ok(), "rejected {} = 1.0", field);
        }
    }

    #[test]
    fn test_non_finite_min_modularity_rejected() {
        for bad in ["nan", "inf", "-inf"] {
            let source = format!("[analyzer]\nmin_modularity = {}", bad);
            let err = NarrativeConfig::from_toml_str(&source).unwrap_err();
            assert!(matches!(err, NarrativeError::Config(_)), "accepted {}", bad);
        }
        assert!(NarrativeConfig::from_toml_str("[analyzer]\nmin_modularity = -0.2").is_ok());
    }

    #[test]
    fn test_relation_overrides() {
        let mut config = ExtractorConfig::default();
        assert!(config.is_enabled(&RelationType::Loves));

        config.relation_overrides.insert("loves".to_string(), false);
        config.relation_overrides.insert("contradicts".to_string(), true);
        config.relation_overrides.insert("mentors".to_string(), true);

        assert!(!config.is_enabled(&RelationType::Loves));
        assert!(!config.is_enabled(&RelationType::Contradicts), "always routed to conflicts");
        assert!(config.is_enabled(&RelationType::Custom("mentors".to_string())));
        assert!(!config.is_enabled(&RelationType::Custom("haunts".to_string())));
    }
}
