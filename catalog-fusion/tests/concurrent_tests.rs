//! Integration tests for batch resolution and rule reloads
//!
//! Covers:
//! - Batch output order and equivalence with sequential resolution
//! - Cancellation before and during a batch
//! - Concurrent fact producers feeding one store
//! - Hot reload while evaluations hold an older snapshot

use std::sync::Arc;

use catalog_fusion::{
    compile, ConcurrentFactStore, FactStore, Resolver, RuleSet, RuleSetHandle, BUILTIN_RULES,
};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

fn builtin() -> RuleSet {
    compile(BUILTIN_RULES).expect("builtin rules compile")
}

fn populated(rules: &RuleSet, keys: usize) -> FactStore {
    let mut facts = FactStore::for_rules(rules);
    for i in 0..keys {
        let key = format!("{:014}", 39015000000000u64 + i as u64);
        facts
            .put("marc_title", &key, vec![format!("Title {}", i).into()])
            .unwrap();
        if i % 3 == 0 {
            facts
                .put("google_books_title", &key, vec![format!("Title {} ", i).into()])
                .unwrap();
        }
        if i % 5 == 0 {
            facts
                .put("marc_author", &key, vec![format!("Author {}", i).into()])
                .unwrap();
        }
    }
    facts
}

// ============================================================================
// Batch resolution
// ============================================================================

#[tokio::test]
async fn test_batch_matches_sequential_resolution() {
    let rules = builtin();
    let facts = populated(&rules, 200);
    let resolver = Resolver::new(Arc::new(rules), Arc::new(facts));

    let outcome = resolver
        .resolve_batch(CancellationToken::new(), 8)
        .await
        .unwrap();

    assert!(!outcome.cancelled);
    assert!(outcome.unprocessed.is_empty());
    assert_eq!(outcome.rule_set, resolver.rules().fingerprint());
    assert!(outcome.finished_at >= outcome.started_at);

    // Same records, same (key) order, same bytes
    let sequential = resolver.resolve_all();
    assert_eq!(
        serde_json::to_vec(&outcome.records).unwrap(),
        serde_json::to_vec(&sequential).unwrap()
    );
}

#[tokio::test]
async fn test_cancelled_before_start_processes_nothing() {
    let rules = builtin();
    let facts = populated(&rules, 20);
    let resolver = Resolver::new(Arc::new(rules), Arc::new(facts));

    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = resolver.resolve_batch(cancel, 4).await.unwrap();

    assert!(outcome.cancelled);
    assert!(outcome.records.is_empty());
    assert_eq!(outcome.unprocessed, resolver.keys());
}

#[tokio::test]
async fn test_cancellation_mid_batch_keeps_completed_prefix() {
    let rules = builtin();
    let facts = populated(&rules, 2000);
    let resolver = Resolver::new(Arc::new(rules), Arc::new(facts));
    let all_keys = resolver.keys();

    let cancel = CancellationToken::new();
    let batch = {
        let resolver = resolver.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { resolver.resolve_batch(cancel, 2).await })
    };
    tokio::task::yield_now().await;
    cancel.cancel();

    let outcome = batch.await.unwrap().unwrap();

    // Every key is either resolved or reported unprocessed, never both
    assert_eq!(outcome.records.len() + outcome.unprocessed.len(), all_keys.len());
    let resolved: Vec<&str> = outcome.records.iter().map(|r| r.key.as_str()).collect();
    for key in &outcome.unprocessed {
        assert!(!resolved.contains(&key.as_str()));
    }
    assert_eq!(outcome.cancelled, !outcome.unprocessed.is_empty());
}

// ============================================================================
// Concurrent population
// ============================================================================

#[tokio::test]
async fn test_concurrent_producers_then_resolve() {
    let rules = builtin();
    let store = Arc::new(ConcurrentFactStore::for_rules(&rules));

    // One producer per source, all writing the same keys
    let mut join_set = JoinSet::new();
    for relation in ["marc_title", "google_books_title", "loc_title"] {
        let store = Arc::clone(&store);
        join_set.spawn(async move {
            for i in 0..100 {
                store
                    .put(relation, &format!("B{:03}", i), vec![format!("{} {}", relation, i).into()])
                    .unwrap();
            }
        });
    }
    while let Some(result) = join_set.join_next().await {
        result.unwrap();
    }

    let facts = Arc::try_unwrap(store).unwrap().freeze();
    assert_eq!(facts.len(), 300);

    let resolver = Resolver::new(Arc::new(rules), Arc::new(facts));
    let record = resolver.resolve("B042");
    let provenance = record.attribute("title").unwrap().provenance().unwrap();
    assert_eq!(provenance.contributing_relations, vec!["google_books_title"]);
    assert_eq!(provenance.conflicting_alternatives.len(), 2);
}

// ============================================================================
// Hot reload
// ============================================================================

#[tokio::test]
async fn test_reload_does_not_affect_in_flight_snapshot() {
    let handle = Arc::new(RuleSetHandle::new(builtin()));
    let before = handle.snapshot().await;

    let mut facts = FactStore::for_rules(&before);
    facts.put("marc_title", "B1", vec!["Dune".into()]).unwrap();
    facts.put("google_books_title", "B1", vec!["Dune (Deluxe Edition)".into()]).unwrap();
    let facts = Arc::new(facts);

    let old_resolver = Resolver::new(Arc::clone(&before), Arc::clone(&facts));

    // MARC first
    let reordered = BUILTIN_RULES.replace(
        "title(B, T) :- google_books_title(B, T).\ntitle(B, T) :- loc_title(B, T).\ntitle(B, T) :- marc_title(B, T).",
        "title(B, T) :- marc_title(B, T).\ntitle(B, T) :- google_books_title(B, T).\ntitle(B, T) :- loc_title(B, T).",
    );
    assert_ne!(reordered, BUILTIN_RULES);
    let fingerprint = handle.reload(&reordered).await.unwrap();

    let new_resolver = Resolver::new(handle.snapshot().await, facts);

    let old = old_resolver.resolve("B1");
    let new = new_resolver.resolve("B1");
    assert_eq!(old.rule_set, before.fingerprint());
    assert_eq!(new.rule_set, fingerprint);
    assert_ne!(old.attribute("title"), new.attribute("title"));
    assert_eq!(
        new.attribute("title").unwrap().provenance().unwrap().contributing_rule.as_str(),
        "title#1"
    );
    assert_eq!(
        new.attribute("title").unwrap().provenance().unwrap().contributing_relations,
        vec!["marc_title"]
    );
}

#[tokio::test]
async fn test_concurrent_snapshots_during_reloads() {
    let handle = Arc::new(RuleSetHandle::new(builtin()));
    let builtin_fingerprint = handle.snapshot().await.fingerprint().to_string();

    let mut join_set = JoinSet::new();
    for i in 0..10 {
        let handle = Arc::clone(&handle);
        join_set.spawn(async move {
            if i % 2 == 0 {
                // Broken rule text never replaces the active rules
                assert!(handle.reload("title(B, T) :- ").await.is_err());
            }
            handle.snapshot().await.fingerprint().to_string()
        });
    }

    while let Some(result) = join_set.join_next().await {
        assert_eq!(result.unwrap(), builtin_fingerprint);
    }
}
