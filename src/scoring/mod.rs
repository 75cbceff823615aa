//! Deterministic retrieval scoring.
//!
//! `score = w_importance*importance_norm + w_recency*recency_norm +
//! w_repetition*repetition_norm + Σ boost_rules`, clamped to `[0.0, 1.0]`
//! after boosts are applied. The weighted sum is extensible with an open
//! set of [`BoostRule`]s rather than a fixed number of components.

use chrono::{DateTime, Utc};

use crate::config::ScoringConfig;
use crate::types::MemoryRecord;

/// A named addend applied after the base weighted sum. Boost rules never
/// see each other's output — each is evaluated against the record alone
/// and the query context, then summed.
pub trait BoostRule: Send + Sync {
    fn name(&self) -> &str;
    fn boost(&self, record: &MemoryRecord, ctx: &QueryContext) -> f64;
}

/// Context the scoring engine needs beyond the record itself.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    pub query_topic: Option<String>,
    pub query_entities: Vec<String>,
}

/// Adds a fixed boost when the record's topic matches the query's topic
/// case-insensitively.
pub struct TopicBoost {
    pub amount: f64,
}

impl BoostRule for TopicBoost {
    fn name(&self) -> &str {
        "topic_boost"
    }

    fn boost(&self, record: &MemoryRecord, ctx: &QueryContext) -> f64 {
        match (record.topic(), ctx.query_topic.as_deref()) {
            (Some(topic), Some(query_topic)) if topic.eq_ignore_ascii_case(query_topic) => self.amount,
            _ => 0.0,
        }
    }
}

/// Penalizes records that have gone unretrieved for longer than
/// `stale_after_days`, nudging the long tail down independent of the
/// smooth recency decay.
pub struct StalePenalty {
    pub stale_after_days: i64,
    pub amount: f64,
}

impl BoostRule for StalePenalty {
    fn name(&self) -> &str {
        "stale_penalty"
    }

    fn boost(&self, record: &MemoryRecord, _ctx: &QueryContext) -> f64 {
        let age_days = (Utc::now() - record.updated_at).num_days();
        if age_days > self.stale_after_days {
            -self.amount
        } else {
            0.0
        }
    }
}

/// Adds a boost proportional to the fraction of query entities the record
/// shares, up to `max_amount`.
pub struct EntityMatch {
    pub max_amount: f64,
}

impl BoostRule for EntityMatch {
    fn name(&self) -> &str {
        "entity_match"
    }

    fn boost(&self, record: &MemoryRecord, ctx: &QueryContext) -> f64 {
        if ctx.query_entities.is_empty() {
            return 0.0;
        }
        let record_entities = record.entities();
        let matches = ctx
            .query_entities
            .iter()
            .filter(|e| record_entities.iter().any(|r| r.eq_ignore_ascii_case(e)))
            .count();
        self.max_amount * (matches as f64 / ctx.query_entities.len() as f64)
    }
}

/// Per-record breakdown, kept for observability/debugging (not persisted).
#[derive(Debug, Clone, Copy)]
pub struct ScoreBreakdown {
    pub importance_norm: f64,
    pub recency_norm: f64,
    pub repetition_norm: f64,
    pub boosts_total: f64,
    pub score: f64,
}

/// Evaluates the weighted formula plus configured boost rules.
pub struct ScoringEngine {
    config: ScoringConfig,
    boost_rules: Vec<Box<dyn BoostRule>>,
}

impl ScoringEngine {
    pub fn new(config: ScoringConfig) -> Self {
        Self {
            config,
            boost_rules: Vec::new(),
        }
    }

    pub fn with_boost_rule(mut self, rule: Box<dyn BoostRule>) -> Self {
        self.boost_rules.push(rule);
        self
    }

    /// Exponential recency decay: `exp(-age_seconds / half_life_seconds)`.
    /// A record updated right now scores 1.0; one aged one half-life scores
    /// ~0.5.
    fn recency_norm(&self, record: &MemoryRecord, now: DateTime<Utc>) -> f64 {
        let age_seconds = (now - record.updated_at).num_seconds().max(0) as f64;
        if self.config.half_life_seconds <= 0.0 {
            return 1.0;
        }
        (-age_seconds / self.config.half_life_seconds).exp()
    }

    /// Saturating repetition signal: `occurrences` sourced from a joined
    /// cluster when the record belongs to one, else a flat 1, normalized
    /// against `repetition_saturation` occurrences.
    fn repetition_norm(&self, occurrences: f64) -> f64 {
        let saturation = self.config.repetition_saturation.max(1.0);
        (occurrences / saturation).min(1.0)
    }

    /// Scores a record with no cluster context (`occurrences` defaults to 1).
    pub fn score(&self, record: &MemoryRecord, ctx: &QueryContext) -> ScoreBreakdown {
        self.score_with_occurrences(record, ctx, 1.0)
    }

    /// Scores a record using `occurrences` from its joined cluster, if any.
    pub fn score_with_occurrences(&self, record: &MemoryRecord, ctx: &QueryContext, occurrences: f64) -> ScoreBreakdown {
        self.score_at(record, ctx, occurrences, Utc::now())
    }

    fn score_at(&self, record: &MemoryRecord, ctx: &QueryContext, occurrences: f64, now: DateTime<Utc>) -> ScoreBreakdown {
        let importance_norm = record.importance_norm();
        let recency_norm = self.recency_norm(record, now);
        let repetition_norm = self.repetition_norm(occurrences);

        let base = self.config.importance * importance_norm
            + self.config.recency * recency_norm
            + self.config.repetition * repetition_norm;

        let boosts_total: f64 = self.boost_rules.iter().map(|rule| rule.boost(record, ctx)).sum();

        ScoreBreakdown {
            importance_norm,
            recency_norm,
            repetition_norm,
            boosts_total,
            score: (base + boosts_total).clamp(0.0, 1.0),
        }
    }
}

/// Deterministic tie-break: higher score first, then more recently updated,
/// then higher id — guarantees a total order regardless of score ties.
pub fn compare_scored(
    a: (&MemoryRecord, f64),
    b: (&MemoryRecord, f64),
) -> std::cmp::Ordering {
    let (record_a, score_a) = a;
    let (record_b, score_b) = b;
    score_b
        .partial_cmp(&score_a)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| record_b.updated_at.cmp(&record_a.updated_at))
        .then_with(|| record_b.id.cmp(&record_a.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{default_namespace, Metadata, MetadataValue, Tier};
    use chrono::Duration;

    fn record_with(updated_at: DateTime<Utc>, importance: f64) -> MemoryRecord {
        let mut metadata = Metadata::new();
        metadata.insert("importance".to_string(), MetadataValue::Number(importance));
        MemoryRecord {
            id: 1,
            user_id: "u1".to_string(),
            namespace: default_namespace(),
            thread_id: None,
            session_id: None,
            content: "hi".to_string(),
            metadata,
            tier: Tier::ShortTerm,
            related_threads: vec![],
            created_at: updated_at,
            updated_at,
        }
    }

    #[test]
    fn fresh_record_has_recency_norm_near_one() {
        let engine = ScoringEngine::new(ScoringConfig::default());
        let record = record_with(Utc::now(), 0.5);
        let breakdown = engine.score_at(&record, &QueryContext::default(), 1.0, Utc::now());
        assert!(breakdown.recency_norm > 0.99);
    }

    #[test]
    fn half_life_aged_record_has_recency_norm_near_half() {
        let mut config = ScoringConfig::default();
        config.half_life_seconds = 86_400.0;
        let engine = ScoringEngine::new(config);
        let now = Utc::now();
        let record = record_with(now - Duration::seconds(86_400), 0.5);
        let breakdown = engine.score_at(&record, &QueryContext::default(), 1.0, now);
        assert!((breakdown.recency_norm - 0.5).abs() < 0.01);
    }

    #[test]
    fn topic_boost_applies_only_on_match() {
        let mut record = record_with(Utc::now(), 0.5);
        record.metadata.insert("topic".to_string(), MetadataValue::string("Billing"));
        let engine = ScoringEngine::new(ScoringConfig::default())
            .with_boost_rule(Box::new(TopicBoost { amount: 0.2 }));

        let matching_ctx = QueryContext {
            query_topic: Some("billing".to_string()),
            query_entities: vec![],
        };
        let matched = engine.score(&record, &matching_ctx);
        let unmatched = engine.score(&record, &QueryContext::default());
        assert!(matched.score > unmatched.score);
    }

    #[test]
    fn score_is_clamped_to_unit_interval() {
        let mut record = record_with(Utc::now(), 1.0);
        record.metadata.insert("topic".to_string(), MetadataValue::string("X"));
        let engine = ScoringEngine::new(ScoringConfig::default())
            .with_boost_rule(Box::new(TopicBoost { amount: 5.0 }));
        let ctx = QueryContext {
            query_topic: Some("X".to_string()),
            query_entities: vec![],
        };
        assert!(engine.score(&record, &ctx).score <= 1.0);
    }

    #[test]
    fn repetition_norm_saturates_at_configured_occurrences() {
        let mut config = ScoringConfig::default();
        config.repetition_saturation = 4.0;
        let engine = ScoringEngine::new(config);
        let record = record_with(Utc::now(), 0.5);

        let low = engine.score_with_occurrences(&record, &QueryContext::default(), 1.0);
        let saturated = engine.score_with_occurrences(&record, &QueryContext::default(), 4.0);
        let beyond = engine.score_with_occurrences(&record, &QueryContext::default(), 10.0);

        assert!((low.repetition_norm - 0.25).abs() < 0.001);
        assert!((saturated.repetition_norm - 1.0).abs() < 0.001);
        assert!((beyond.repetition_norm - 1.0).abs() < 0.001);
    }

    #[test]
    fn tie_break_prefers_more_recent_then_higher_id() {
        let now = Utc::now();
        let mut older = record_with(now - Duration::days(1), 0.5);
        older.id = 1;
        let mut newer = record_with(now, 0.5);
        newer.id = 2;
        assert_eq!(
            compare_scored((&newer, 0.5), (&older, 0.5)),
            std::cmp::Ordering::Less
        );
    }
}
