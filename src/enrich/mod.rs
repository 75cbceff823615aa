//! Metadata enrichment: derives `{topic, category, entities, importance}`
//! from content.
//!
//! The built-in [`HeuristicEnricher`] is deterministic, keyword/regex based
//! rather than anything model-backed. External, possibly nondeterministic
//! implementations (e.g.
//! LLM-based) may be plugged in via the same trait but must preserve
//! existing metadata keys.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::types::{reserved_keys, Metadata, MetadataValue};

/// Derives metadata from content. Must always return a superset of
/// `existing_metadata` — implementations only add, never remove, keys.
pub trait Enricher: Send + Sync {
    fn enrich(&self, content: &str, existing_metadata: &Metadata) -> Metadata;
}

/// Runs `enricher.enrich`, degrading to `existing_metadata` unchanged and
/// logging a warning on panic-free failure paths. Enrichment in this crate
/// cannot fail (the trait returns a plain `Metadata`, not a `Result`), but
/// this wrapper is the seam an external, fallible implementation would be
/// adapted through.
pub fn enrich_or_default(enricher: &dyn Enricher, content: &str, existing: &Metadata) -> Metadata {
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        enricher.enrich(content, existing)
    }));
    match result {
        Ok(metadata) => metadata,
        Err(_) => {
            warn!("enrichment failed, proceeding with existing metadata unchanged");
            existing.clone()
        }
    }
}

static TITLE_CASE_PHRASE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-Z][a-zA-Z0-9]*(?:\s+[A-Z][a-zA-Z0-9]*){0,3})\b").expect("valid regex")
});

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z][A-Za-z0-9_-]{2,}").expect("valid regex"));

/// Deterministic default enricher: heuristic title-case noun-phrase topic
/// extraction, keyword-based category, mid-value importance. No model
/// dependency.
#[derive(Debug, Default, Clone)]
pub struct HeuristicEnricher {
    category_keywords: HashMap<&'static str, &'static [&'static str]>,
}

impl HeuristicEnricher {
    pub fn new() -> Self {
        let mut category_keywords: HashMap<&'static str, &'static [&'static str]> = HashMap::new();
        category_keywords.insert("billing", &["invoice", "payment", "refund", "charge", "subscription"]);
        category_keywords.insert("support", &["error", "bug", "issue", "broken", "crash", "fail"]);
        category_keywords.insert("account", &["login", "password", "signup", "profile", "email"]);
        category_keywords.insert("product", &["feature", "roadmap", "release", "launch"]);
        Self { category_keywords }
    }

    fn extract_topic(&self, content: &str) -> Option<String> {
        TITLE_CASE_PHRASE
            .find_iter(content)
            .map(|m| m.as_str().to_string())
            .max_by_key(|s| s.len())
    }

    fn extract_category(&self, content: &str) -> Option<String> {
        let lowered = content.to_lowercase();
        let mut best: Option<(&'static str, usize)> = None;
        for (category, keywords) in &self.category_keywords {
            let hits = keywords.iter().filter(|kw| lowered.contains(*kw)).count();
            if hits > 0 && best.map(|(_, best_hits)| hits > best_hits).unwrap_or(true) {
                best = Some((category, hits));
            }
        }
        best.map(|(category, _)| category.to_string())
    }

    fn extract_entities(&self, content: &str) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut entities = Vec::new();
        for m in TITLE_CASE_PHRASE.find_iter(content) {
            let candidate = m.as_str().to_string();
            if candidate.split_whitespace().count() >= 1 && seen.insert(candidate.clone()) {
                entities.push(candidate);
            }
            if entities.len() >= 8 {
                break;
            }
        }
        entities
    }

    fn word_count(content: &str) -> usize {
        WORD.find_iter(content).count()
    }
}

impl Enricher for HeuristicEnricher {
    fn enrich(&self, content: &str, existing_metadata: &Metadata) -> Metadata {
        let mut metadata = existing_metadata.clone();

        if !metadata.contains_key(reserved_keys::TOPIC) {
            if let Some(topic) = self.extract_topic(content) {
                metadata.insert(reserved_keys::TOPIC.to_string(), MetadataValue::string(topic));
            }
        }

        if !metadata.contains_key(reserved_keys::CATEGORY) {
            if let Some(category) = self.extract_category(content) {
                metadata.insert(reserved_keys::CATEGORY.to_string(), MetadataValue::string(category));
            }
        }

        if !metadata.contains_key(reserved_keys::ENTITIES) {
            let entities = self.extract_entities(content);
            if !entities.is_empty() {
                metadata.insert(
                    reserved_keys::ENTITIES.to_string(),
                    MetadataValue::array_of_strings(entities),
                );
            }
        }

        if !metadata.contains_key(reserved_keys::IMPORTANCE) {
            // Longer, denser content skews slightly above the neutral midpoint;
            // still deterministic and bounded to keep the default conservative.
            let words = Self::word_count(content);
            let importance = if words > 80 { 0.6 } else { 0.5 };
            metadata.insert(reserved_keys::IMPORTANCE.to_string(), MetadataValue::Number(importance));
        }

        metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_existing_keys() {
        let enricher = HeuristicEnricher::new();
        let mut existing = Metadata::new();
        existing.insert("custom".to_string(), MetadataValue::string("keep-me"));
        let out = enricher.enrich("a plain note", &existing);
        assert_eq!(out.get("custom").and_then(MetadataValue::as_str), Some("keep-me"));
    }

    #[test]
    fn does_not_overwrite_existing_topic() {
        let enricher = HeuristicEnricher::new();
        let mut existing = Metadata::new();
        existing.insert(reserved_keys::TOPIC.to_string(), MetadataValue::string("Preset Topic"));
        let out = enricher.enrich("Something About Refunds", &existing);
        assert_eq!(out.get(reserved_keys::TOPIC).and_then(MetadataValue::as_str), Some("Preset Topic"));
    }

    #[test]
    fn detects_category_from_keywords() {
        let enricher = HeuristicEnricher::new();
        let out = enricher.enrich("I was charged twice for my subscription invoice", &Metadata::new());
        assert_eq!(out.get(reserved_keys::CATEGORY).and_then(MetadataValue::as_str), Some("billing"));
    }

    #[test]
    fn default_importance_is_mid_value() {
        let enricher = HeuristicEnricher::new();
        let out = enricher.enrich("short note", &Metadata::new());
        assert_eq!(out.get(reserved_keys::IMPORTANCE).and_then(MetadataValue::as_f64), Some(0.5));
    }

    #[test]
    fn deterministic_across_runs() {
        let enricher = HeuristicEnricher::new();
        let a = enricher.enrich("Refund Request for Acme Corp", &Metadata::new());
        let b = enricher.enrich("Refund Request for Acme Corp", &Metadata::new());
        assert_eq!(a.get(reserved_keys::TOPIC), b.get(reserved_keys::TOPIC));
    }
}
