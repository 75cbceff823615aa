//! Typed configuration mirroring the recognized options.
//!
//! These structs are deserialized by the caller (CLI/config-file loading is
//! out of scope) and handed to [`crate::manager::MemoryManager`].

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// Trim settings for a single tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrimConfig {
    /// Content longer than this is eligible for trimming. `None`/`<= 0` disables trimming.
    #[serde(default)]
    pub max_chars: Option<usize>,
}

impl Default for TrimConfig {
    fn default() -> Self {
        Self { max_chars: None }
    }
}

/// Summarization settings for a single tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizeConfig {
    /// Content at or above this length is eligible for summarization. `None` disables it.
    #[serde(default)]
    pub min_chars: Option<usize>,
    #[serde(default = "default_target_chars")]
    pub target_chars: usize,
}

fn default_target_chars() -> usize {
    400
}

impl Default for SummarizeConfig {
    fn default() -> Self {
        Self {
            min_chars: None,
            target_chars: default_target_chars(),
        }
    }
}

/// One entry of `storage.tiers[]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierSettings {
    /// Matches a [`crate::types::Tier`]'s `as_str()` (`short_term`, `mid_term`, `long_term`).
    pub name: String,
    /// `None` (whether explicitly null or omitted) means "never expires".
    #[serde(default)]
    pub expiry_days: Option<i64>,
    #[serde(default)]
    pub capacity: Option<usize>,
    #[serde(default)]
    pub trim: TrimConfig,
    #[serde(default)]
    pub summarize: SummarizeConfig,
}

/// Default per-tier settings applied when a caller doesn't configure
/// `storage.tiers[]` explicitly: every tier trims past 8000 chars, and only
/// `long_term` summarizes (content at or above 2000 chars, down to 400).
fn default_tiers() -> Vec<TierSettings> {
    let trim = TrimConfig { max_chars: Some(8_000) };
    vec![
        TierSettings {
            name: crate::types::Tier::ShortTerm.as_str().to_string(),
            expiry_days: None,
            capacity: None,
            trim: trim.clone(),
            summarize: SummarizeConfig {
                min_chars: None,
                target_chars: default_target_chars(),
            },
        },
        TierSettings {
            name: crate::types::Tier::MidTerm.as_str().to_string(),
            expiry_days: None,
            capacity: None,
            trim: trim.clone(),
            summarize: SummarizeConfig {
                min_chars: None,
                target_chars: default_target_chars(),
            },
        },
        TierSettings {
            name: crate::types::Tier::LongTerm.as_str().to_string(),
            expiry_days: None,
            capacity: None,
            trim,
            summarize: SummarizeConfig {
                min_chars: Some(2_000),
                target_chars: default_target_chars(),
            },
        },
    ]
}

/// One entry of `policies.migrate[]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigratePolicy {
    pub from: crate::types::Tier,
    pub to: crate::types::Tier,
    pub when_age_days: i64,
}

/// `summarization.thread` settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadSummaryConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_min_records")]
    pub min_records: usize,
    #[serde(default = "default_thread_max_chars")]
    pub max_chars: usize,
    #[serde(default)]
    pub include_metadata: bool,
}

fn default_min_records() -> usize {
    3
}

fn default_thread_max_chars() -> usize {
    4000
}

impl Default for ThreadSummaryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_records: default_min_records(),
            max_chars: default_thread_max_chars(),
            include_metadata: true,
        }
    }
}

/// `clustering` settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_min_cluster_size")]
    pub min_cluster_size: usize,
    #[serde(default = "default_strategy")]
    pub strategy: String,
}

fn default_min_cluster_size() -> usize {
    3
}

fn default_strategy() -> String {
    "topic_category".to_string()
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_cluster_size: default_min_cluster_size(),
            strategy: default_strategy(),
        }
    }
}

/// Retrieval scope, as named by `retrieval.scope`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    #[default]
    Thread,
    Topic,
    User,
    Global,
}

/// `retrieval` settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default)]
    pub scope: ScopeKind,
    /// If set, a `thread` scope with no results retries as `topic` scope.
    #[serde(default)]
    pub fallback: Option<ScopeKind>,
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
    #[serde(default = "default_candidate_floor")]
    pub candidate_floor: usize,
    #[serde(default)]
    pub include_summarized: bool,
}

fn default_top_k() -> usize {
    10
}

fn default_candidate_multiplier() -> usize {
    4
}

fn default_candidate_floor() -> usize {
    50
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            scope: ScopeKind::default(),
            fallback: None,
            default_top_k: default_top_k(),
            candidate_multiplier: default_candidate_multiplier(),
            candidate_floor: default_candidate_floor(),
            include_summarized: false,
        }
    }
}

/// `scoring` settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_w_importance")]
    pub importance: f64,
    #[serde(default = "default_w_recency")]
    pub recency: f64,
    #[serde(default = "default_w_repetition")]
    pub repetition: f64,
    #[serde(default = "default_half_life_seconds")]
    pub half_life_seconds: f64,
    #[serde(default = "default_saturation")]
    pub repetition_saturation: f64,
}

fn default_w_importance() -> f64 {
    0.6
}
fn default_w_recency() -> f64 {
    0.3
}
fn default_w_repetition() -> f64 {
    0.1
}
fn default_half_life_seconds() -> f64 {
    14.0 * 24.0 * 3600.0
}
fn default_saturation() -> f64 {
    5.0
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            importance: default_w_importance(),
            recency: default_w_recency(),
            repetition: default_w_repetition(),
            half_life_seconds: default_half_life_seconds(),
            repetition_saturation: default_saturation(),
        }
    }
}

/// `text_processing.trimmer` / `text_processing.summarizer` shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextProcessorConfig {
    #[serde(default = "default_processor_type")]
    pub kind: String,
    #[serde(default)]
    pub params: std::collections::HashMap<String, serde_json::Value>,
}

fn default_processor_type() -> String {
    "noop".to_string()
}

impl Default for TextProcessorConfig {
    fn default() -> Self {
        Self {
            kind: default_processor_type(),
            params: Default::default(),
        }
    }
}

/// `metadata.enrichment` settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub model: Option<String>,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: None,
        }
    }
}

/// `privacy` settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivacyConfig {
    #[serde(default = "default_true")]
    pub enforce_user_scope: bool,
    #[serde(default)]
    pub allow_shared_namespace: bool,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            enforce_user_scope: true,
            allow_shared_namespace: false,
        }
    }
}

/// Policy-executor-specific knobs governing the five lifecycle phases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub migrate: Vec<MigratePolicy>,
    #[serde(default)]
    pub thread: ThreadSummaryConfig,
    #[serde(default)]
    pub clustering: ClusteringConfig,
    /// Whether `importance=high` records are exempt from trim/summarize.
    /// Applies uniformly to both phases.
    #[serde(default = "default_true")]
    pub exempt_high_importance: bool,
    /// Number of users processed per policy-run batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    100
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            migrate: vec![
                MigratePolicy {
                    from: crate::types::Tier::ShortTerm,
                    to: crate::types::Tier::MidTerm,
                    when_age_days: 7,
                },
                MigratePolicy {
                    from: crate::types::Tier::MidTerm,
                    to: crate::types::Tier::LongTerm,
                    when_age_days: 30,
                },
            ],
            thread: ThreadSummaryConfig::default(),
            clustering: ClusteringConfig::default(),
            exempt_high_importance: true,
            batch_size: default_batch_size(),
        }
    }
}

/// Top-level configuration object handed to the Memory Manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_tiers")]
    pub tiers: Vec<TierSettings>,
    #[serde(default)]
    pub policies: PolicyConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub trimmer: TextProcessorConfig,
    #[serde(default)]
    pub summarizer: TextProcessorConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub privacy: PrivacyConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tiers: default_tiers(),
            policies: PolicyConfig::default(),
            retrieval: RetrievalConfig::default(),
            scoring: ScoringConfig::default(),
            trimmer: TextProcessorConfig::default(),
            summarizer: TextProcessorConfig::default(),
            enrichment: EnrichmentConfig::default(),
            privacy: PrivacyConfig::default(),
        }
    }
}

impl Config {
    /// Looks up `storage.tiers[]` settings for one tier by name.
    pub fn tier_settings(&self, tier: crate::types::Tier) -> Option<&TierSettings> {
        self.tiers.iter().find(|settings| settings.name == tier.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_migrate_policies() {
        let cfg = Config::default();
        assert_eq!(cfg.policies.migrate.len(), 2);
        assert_eq!(cfg.policies.migrate[0].from, crate::types::Tier::ShortTerm);
    }

    #[test]
    fn scoring_defaults_match_spec() {
        let s = ScoringConfig::default();
        assert!((s.importance - 0.6).abs() < f64::EPSILON);
        assert!((s.recency - 0.3).abs() < f64::EPSILON);
        assert!((s.repetition - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn text_processor_default_is_noop() {
        assert_eq!(TextProcessorConfig::default().kind, "noop");
    }

    #[test]
    fn tier_settings_looks_up_by_tier_name() {
        let cfg = Config::default();
        let long_term = cfg.tier_settings(crate::types::Tier::LongTerm).unwrap();
        assert_eq!(long_term.summarize.min_chars, Some(2_000));
        assert!(cfg.tier_settings(crate::types::Tier::ShortTerm).unwrap().summarize.min_chars.is_none());
    }
}
