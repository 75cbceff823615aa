//! End-to-end scenario tests exercising the Manager facade against an
//! on-disk SQLite database.

use memoric::store::{ListFilter, MetadataFilter, NewMemory, SqliteStore, StorageBackend};
use memoric::types::{Metadata, MetadataValue, Tier};
use memoric::{Capability, Config, MemoryManager, RetrieveRequest, SaveRequest};

fn open_store() -> (SqliteStore, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("memoric.db");
    let store = SqliteStore::open(path.to_str().unwrap(), 2).unwrap();
    (store, dir)
}

#[test]
fn user_isolation_holds_across_save_and_retrieve() {
    let (store, _dir) = open_store();
    let manager = MemoryManager::new(&store, Config::default());

    manager
        .save(SaveRequest {
            user_id: "alice".to_string(),
            thread_id: Some("t1".to_string()),
            content: Some("alice's secret".to_string()),
            ..SaveRequest::default()
        })
        .unwrap();
    manager
        .save(SaveRequest {
            user_id: "bob".to_string(),
            thread_id: Some("t1".to_string()),
            content: Some("bob's secret".to_string()),
            ..SaveRequest::default()
        })
        .unwrap();

    let alice_results = manager
        .retrieve(
            RetrieveRequest {
                user_id: "alice".to_string(),
                thread_id: Some("t1".to_string()),
                ..RetrieveRequest::default()
            },
            Capability::NONE,
        )
        .unwrap();

    assert_eq!(alice_results.len(), 1);
    assert_eq!(alice_results[0].record.content, "alice's secret");
}

#[test]
fn tier_migration_is_forward_only_over_a_policy_run() {
    let (store, _dir) = open_store();
    let manager = MemoryManager::new(&store, Config::default());

    let record = manager
        .save(SaveRequest {
            user_id: "u1".to_string(),
            content: Some("note".to_string()),
            ..SaveRequest::default()
        })
        .unwrap();

    let mut aged = store.get("u1", record.id).unwrap().unwrap();
    aged.created_at = chrono::Utc::now() - chrono::Duration::days(40);
    store.update(&aged).unwrap();

    let report = manager.run_policies(None);
    assert!(report.migrated >= 1);

    let after = store.get("u1", record.id).unwrap().unwrap();
    assert!(after.tier >= Tier::MidTerm);

    let rejected = manager.promote_tier("u1", record.id, Tier::ShortTerm);
    assert!(rejected.is_err());
}

#[test]
fn thread_summary_is_idempotent_across_reruns() {
    let (store, _dir) = open_store();
    let manager = MemoryManager::new(&store, Config::default());

    for i in 0..4 {
        manager
            .save(SaveRequest {
                user_id: "u1".to_string(),
                thread_id: Some("support-thread".to_string()),
                content: Some(format!("message {i}")),
                ..SaveRequest::default()
            })
            .unwrap();
    }

    let first_report = manager.run_policies(None);
    assert_eq!(first_report.thread_summarized, 1);

    let second_report = manager.run_policies(None);
    assert_eq!(second_report.thread_summarized, 0);

    let summaries: Vec<_> = store
        .list(
            "u1",
            &ListFilter {
                thread_id: Some("support-thread".to_string()),
                limit: 100,
                ..ListFilter::new()
            },
        )
        .unwrap()
        .into_iter()
        .filter(|r| r.is_thread_summary())
        .collect();
    assert_eq!(summaries.len(), 1);
}

#[test]
fn default_thread_retrieval_returns_only_the_summary_after_summarization() {
    let (store, _dir) = open_store();
    let manager = MemoryManager::new(&store, Config::default());

    for i in 0..4 {
        manager
            .save(SaveRequest {
                user_id: "u1".to_string(),
                thread_id: Some("support-thread".to_string()),
                content: Some(format!("message {i}")),
                ..SaveRequest::default()
            })
            .unwrap();
    }

    let report = manager.run_policies(None);
    assert_eq!(report.thread_summarized, 1);

    let results = manager
        .retrieve(
            RetrieveRequest {
                user_id: "u1".to_string(),
                scope: Some(memoric::retriever::Scope::Thread),
                thread_id: Some("support-thread".to_string()),
                ..RetrieveRequest::default()
            },
            Capability::NONE,
        )
        .unwrap();

    assert_eq!(results.len(), 1);
    assert!(results[0].record.is_thread_summary());
}

#[test]
fn list_filter_by_entities_is_containment_not_equality() {
    let (store, _dir) = open_store();

    let mut with_both = Metadata::new();
    with_both.insert(
        "entities".to_string(),
        MetadataValue::array_of_strings(["Acme Corp", "Jane Doe"]),
    );
    store
        .create(NewMemory {
            user_id: "u1".to_string(),
            namespace: "global".to_string(),
            thread_id: None,
            session_id: None,
            content: "mentions both".to_string(),
            metadata: with_both,
            tier: Tier::ShortTerm,
            related_threads: vec![],
        })
        .unwrap();

    let filter = ListFilter {
        metadata: MetadataFilter::new().with("entities", MetadataValue::array_of_strings(["Acme Corp"])),
        limit: 100,
        ..ListFilter::new()
    };
    let results = store.list("u1", &filter).unwrap();
    assert_eq!(results.len(), 1);
}

#[test]
fn topic_scope_falls_back_when_thread_scope_is_empty() {
    let (store, _dir) = open_store();
    let mut config = Config::default();
    config.retrieval.fallback = Some(memoric::config::ScopeKind::Topic);

    let manager = MemoryManager::new(&store, config);

    let mut metadata = Metadata::new();
    metadata.insert("topic".to_string(), MetadataValue::string("Billing"));
    manager
        .save(SaveRequest {
            user_id: "u1".to_string(),
            thread_id: Some("other-thread".to_string()),
            content: Some("billing note".to_string()),
            metadata,
            ..SaveRequest::default()
        })
        .unwrap();

    let results = manager
        .retrieve(
            RetrieveRequest {
                user_id: "u1".to_string(),
                scope: Some(memoric::retriever::Scope::Thread),
                thread_id: Some("empty-thread".to_string()),
                topic: Some("Billing".to_string()),
                ..RetrieveRequest::default()
            },
            Capability::NONE,
        )
        .unwrap();

    assert_eq!(results.len(), 1);
}

#[test]
fn cluster_rebuild_is_idempotent() {
    let (store, _dir) = open_store();
    let manager = MemoryManager::new(&store, Config::default());

    for i in 0..3 {
        let mut metadata = Metadata::new();
        metadata.insert("topic".to_string(), MetadataValue::string("Refunds"));
        metadata.insert("category".to_string(), MetadataValue::string("billing"));
        manager
            .save(SaveRequest {
                user_id: "u1".to_string(),
                content: Some(format!("refund case {i}")),
                metadata,
                ..SaveRequest::default()
            })
            .unwrap();
    }

    let first = manager.rebuild_clusters("u1").unwrap();
    let second = manager.rebuild_clusters("u1").unwrap();
    assert_eq!(first, 1);
    assert_eq!(second, 1);

    let clusters = store.list_clusters("u1").unwrap();
    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters[0].occurrences, 3);
}

#[test]
fn metadata_containment_matches_across_prefilter_and_application_filter() {
    let (store, _dir) = open_store();

    let mut with_priority = Metadata::new();
    with_priority.insert("priority".to_string(), MetadataValue::Number(3.0));
    store
        .create(NewMemory {
            user_id: "u1".to_string(),
            namespace: "global".to_string(),
            thread_id: None,
            session_id: None,
            content: "urgent".to_string(),
            metadata: with_priority,
            tier: Tier::ShortTerm,
            related_threads: vec![],
        })
        .unwrap();
    store
        .create(NewMemory {
            user_id: "u1".to_string(),
            namespace: "global".to_string(),
            thread_id: None,
            session_id: None,
            content: "not urgent".to_string(),
            metadata: Metadata::new(),
            tier: Tier::ShortTerm,
            related_threads: vec![],
        })
        .unwrap();

    let filter = ListFilter {
        metadata: MetadataFilter::new().with("priority", MetadataValue::Number(3.0)),
        limit: 100,
        ..ListFilter::new()
    };
    let results = store.list("u1", &filter).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].content, "urgent");
}
