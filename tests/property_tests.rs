//! Property-based tests verifying invariants that must hold for all inputs.
//!
//! Run with: cargo test --test property_tests

use proptest::prelude::*;

mod containment_tests {
    use super::*;
    use memoric::store::MetadataFilter;
    use memoric::types::{Metadata, MetadataValue};

    fn arb_scalar() -> impl Strategy<Value = MetadataValue> {
        prop_oneof![
            Just(MetadataValue::Null),
            any::<bool>().prop_map(MetadataValue::Bool),
            any::<i32>().prop_map(|n| MetadataValue::Number(n as f64)),
            "[a-z]{1,10}".prop_map(MetadataValue::string),
        ]
    }

    proptest! {
        /// Invariant: a filter built from a record's own metadata always matches that record.
        #[test]
        fn self_derived_filter_always_matches(key in "[a-z]{1,8}", value in arb_scalar()) {
            let mut metadata = Metadata::new();
            metadata.insert(key.clone(), value.clone());
            let filter = MetadataFilter::new().with(key, value);
            prop_assert!(memoric::store::filter::matches(&metadata, &filter));
        }

        /// Invariant: the application-level containment predicate and the
        /// JSON1 pre-filter SQL agree on which scalar values are equal —
        /// the dialect-equivalence law exercised over random scalar pairs.
        #[test]
        fn prefilter_and_predicate_agree_on_scalars(key in "[a-z]{1,8}", a in arb_scalar(), b in arb_scalar()) {
            let mut metadata = Metadata::new();
            metadata.insert(key.clone(), a.clone());

            let filter = MetadataFilter::new().with(key.clone(), b.clone());
            let predicate_says_match = memoric::store::filter::matches(&metadata, &filter);

            let (_, binds) = memoric::store::filter::to_sql_prefilter(&filter);
            let bind_repr = binds.first().cloned().unwrap_or_default();
            let scalar_repr = match &a {
                MetadataValue::String(s) => s.clone(),
                MetadataValue::Number(n) => n.to_string(),
                MetadataValue::Bool(flag) => flag.to_string(),
                _ => String::new(),
            };
            // When the stored value is a plain scalar, the textual bind
            // representation used by the pre-filter must agree with the
            // predicate's verdict for equal-valued inputs.
            if matches!(a, MetadataValue::String(_) | MetadataValue::Number(_) | MetadataValue::Bool(_))
                && matches!(b, MetadataValue::String(_) | MetadataValue::Number(_) | MetadataValue::Bool(_))
            {
                let textual_match = scalar_repr == bind_repr;
                prop_assert_eq!(predicate_says_match, textual_match);
            }
        }

        /// Invariant: an empty filter matches any metadata map.
        #[test]
        fn empty_filter_matches_any_metadata(key in "[a-z]{1,8}", value in arb_scalar()) {
            let mut metadata = Metadata::new();
            metadata.insert(key, value);
            prop_assert!(memoric::store::filter::matches(&metadata, &MetadataFilter::new()));
        }
    }
}

mod tier_tests {
    use super::*;
    use memoric::Tier;

    proptest! {
        /// Invariant: tier ordering is total and never cyclic for the three variants.
        #[test]
        fn tier_ordering_is_consistent(a in 0..3usize, b in 0..3usize) {
            let tiers = [Tier::ShortTerm, Tier::MidTerm, Tier::LongTerm];
            let (ta, tb) = (tiers[a], tiers[b]);
            if a < b {
                prop_assert!(ta < tb);
            } else if a > b {
                prop_assert!(ta > tb);
            } else {
                prop_assert_eq!(ta, tb);
            }
        }
    }
}

mod scoring_tests {
    use super::*;
    use chrono::{Duration, Utc};
    use memoric::config::ScoringConfig;
    use memoric::scoring::{QueryContext, ScoringEngine};
    use memoric::types::{default_namespace, Metadata, MemoryRecord, Tier};

    fn record_with_age(age_days: i64) -> MemoryRecord {
        let updated_at = Utc::now() - Duration::days(age_days);
        MemoryRecord {
            id: 1,
            user_id: "u1".to_string(),
            namespace: default_namespace(),
            thread_id: None,
            session_id: None,
            content: "x".to_string(),
            metadata: Metadata::new(),
            tier: Tier::ShortTerm,
            related_threads: vec![],
            created_at: updated_at,
            updated_at,
        }
    }

    proptest! {
        /// Invariant: scoring is deterministic for a fixed record (no hidden RNG).
        #[test]
        fn scoring_is_deterministic(age_days in 0i64..365) {
            let engine = ScoringEngine::new(ScoringConfig::default());
            let record = record_with_age(age_days);
            let ctx = QueryContext::default();
            let a = engine.score(&record, &ctx).score;
            let b = engine.score(&record, &ctx).score;
            prop_assert!((a - b).abs() < f64::EPSILON);
        }

        /// Invariant: score is always within [0, 1].
        #[test]
        fn score_is_bounded(age_days in 0i64..3650) {
            let engine = ScoringEngine::new(ScoringConfig::default());
            let record = record_with_age(age_days);
            let score = engine.score(&record, &QueryContext::default()).score;
            prop_assert!((0.0..=1.0).contains(&score));
        }
    }
}
