//! Dialect-agnostic metadata containment filter.
//!
//! A [`MetadataFilter`] names a set of required key/value pairs. A record
//! matches when every pair is present and equal in its metadata — plain
//! structural containment, no comparison operators. [`matches`] is the one
//! pure function both the SQLite backend's `json_extract` pre-filter and
//! any future backend must agree with: native filtering is only ever an
//! optimization layered in front of it, never an independent
//! implementation, so the two can't drift. Containment only — no
//! comparison-operator DSL — so a single predicate can serve as the final
//! arbiter regardless of backend.

use std::collections::HashMap;

use crate::types::{Metadata, MetadataValue};

/// Required key/value pairs a record's metadata must contain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataFilter {
    required: HashMap<String, MetadataValue>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: MetadataValue) -> Self {
        self.required.insert(key.into(), value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.required.is_empty()
    }

    pub fn pairs(&self) -> impl Iterator<Item = (&str, &MetadataValue)> {
        self.required.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// The single containment predicate. A native pre-filter (e.g. SQLite's
/// `json_extract`) may narrow candidates first, but every candidate it
/// returns must still pass this function before being considered a match —
/// that is what makes the two dialects equivalent by construction.
pub fn matches(metadata: &Metadata, filter: &MetadataFilter) -> bool {
    filter
        .required
        .iter()
        .all(|(key, expected)| metadata.get(key).is_some_and(|actual| values_equal(actual, expected)))
}

/// `expected` is contained in `actual`: scalars compare equal, an expected
/// array must have every element present in the stored array, and an
/// expected object must have every key present in the stored object with a
/// recursively contained value. Containment, not exact equality — a filter
/// of `{entities: ["A"]}` matches a stored `{entities: ["A", "B"]}`.
fn values_equal(actual: &MetadataValue, expected: &MetadataValue) -> bool {
    match (actual, expected) {
        (MetadataValue::Number(x), MetadataValue::Number(y)) => (x - y).abs() < f64::EPSILON,
        (MetadataValue::Array(stored), MetadataValue::Array(wanted)) => {
            wanted.iter().all(|w| stored.iter().any(|s| values_equal(s, w)))
        }
        (MetadataValue::Object(stored), MetadataValue::Object(wanted)) => wanted
            .iter()
            .all(|(k, v)| stored.get(k).is_some_and(|other| values_equal(other, v))),
        _ => actual == expected,
    }
}

/// Renders a `json_extract(metadata, '$.key') = ?` pre-filter fragment for
/// each *scalar* required pair, for backends that want to push equality
/// down to the database. Array/object pairs are containment, not equality,
/// and are deliberately left out of the SQL — pushing `json_extract(...) =
/// ?` for them would reject a stored superset that `matches` would accept,
/// breaking dialect equivalence. Those pairs are left entirely to
/// `matches`, which every row returned here must still pass.
pub fn to_sql_prefilter(filter: &MetadataFilter) -> (String, Vec<String>) {
    let mut clauses = Vec::new();
    let mut binds = Vec::new();
    for (key, value) in &filter.required {
        if let Some(bind) = scalar_bind(value) {
            clauses.push(format!("json_extract(metadata, '$.{}') = ?", key));
            binds.push(bind);
        }
    }
    if clauses.is_empty() {
        return ("1=1".to_string(), Vec::new());
    }
    (clauses.join(" AND "), binds)
}

fn scalar_bind(value: &MetadataValue) -> Option<String> {
    match value {
        MetadataValue::String(s) => Some(s.clone()),
        MetadataValue::Number(n) => Some(n.to_string()),
        MetadataValue::Bool(b) => Some(b.to_string()),
        MetadataValue::Null | MetadataValue::Array(_) | MetadataValue::Object(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_matches_everything() {
        let metadata = Metadata::new();
        assert!(matches(&metadata, &MetadataFilter::new()));
    }

    #[test]
    fn matches_requires_every_pair() {
        let mut metadata = Metadata::new();
        metadata.insert("topic".to_string(), MetadataValue::string("billing"));
        metadata.insert("category".to_string(), MetadataValue::string("support"));

        let filter = MetadataFilter::new()
            .with("topic", MetadataValue::string("billing"))
            .with("category", MetadataValue::string("support"));
        assert!(matches(&metadata, &filter));

        let mismatched = MetadataFilter::new().with("category", MetadataValue::string("billing"));
        assert!(!matches(&metadata, &mismatched));
    }

    #[test]
    fn missing_key_fails_match() {
        let metadata = Metadata::new();
        let filter = MetadataFilter::new().with("topic", MetadataValue::string("billing"));
        assert!(!matches(&metadata, &filter));
    }

    #[test]
    fn number_equality_is_float_tolerant() {
        let mut metadata = Metadata::new();
        metadata.insert("importance".to_string(), MetadataValue::Number(0.5));
        let filter = MetadataFilter::new().with("importance", MetadataValue::Number(0.5));
        assert!(matches(&metadata, &filter));
    }

    #[test]
    fn prefilter_sql_uses_json_extract_per_key() {
        let filter = MetadataFilter::new().with("topic", MetadataValue::string("billing"));
        let (sql, binds) = to_sql_prefilter(&filter);
        assert!(sql.contains("json_extract(metadata, '$.topic') = ?"));
        assert_eq!(binds, vec!["billing".to_string()]);
    }
}
