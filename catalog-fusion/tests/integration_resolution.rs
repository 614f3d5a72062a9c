// Resolution Integration Tests
//
// End-to-end resolution of catalog records with the builtin rule set: facts from
// several sources for the same barcode are fused into one record per key, with
// provenance and conflict annotations.

use std::sync::Arc;

use catalog_fusion::fusion::{AttributeValue, Resolution};
use catalog_fusion::{
    compile, CompileError, ConfidencePolicy, ConflictReporter, FactStore, Resolver, RuleSet,
    Value, BUILTIN_RULES,
};

fn builtin() -> RuleSet {
    compile(BUILTIN_RULES).expect("builtin rules compile")
}

fn single(resolution: Option<&Resolution>) -> Option<Vec<Value>> {
    match resolution?.value()? {
        AttributeValue::Single(values) => Some(values.clone()),
        AttributeValue::Merged(_) => None,
    }
}

// ================================================================================================
// Title scenarios
// ================================================================================================
//
// B1: MARC and Google Books disagree; Google Books is listed first and wins, the
//     MARC title is reported as a conflicting alternative
// B2: only MARC has a title; it resolves without conflict
// B3: no source has a title; title is Unresolved while other attributes resolve

fn title_store(rules: &RuleSet) -> FactStore {
    let mut facts = FactStore::for_rules(rules);
    facts
        .put("marc_title", "B1", vec!["Old Man and the Sea".into()])
        .unwrap();
    facts
        .put("google_books_title", "B1", vec!["The Old Man and the Sea".into()])
        .unwrap();
    facts.put("marc_title", "B2", vec!["Dune".into()]).unwrap();
    facts.put("marc_author", "B3", vec!["Herbert, Frank".into()]).unwrap();
    facts
}

#[test]
fn test_conflicting_sources_first_listed_wins() {
    let rules = builtin();
    let facts = title_store(&rules);
    let resolver = Resolver::new(Arc::new(rules), Arc::new(facts));

    let record = resolver.resolve("B1");
    let title = record.attribute("title").unwrap();

    assert_eq!(
        single(Some(title)),
        Some(vec![Value::from("The Old Man and the Sea")])
    );

    let provenance = title.provenance().unwrap();
    assert_eq!(provenance.contributing_rule.as_str(), "title#1");
    assert_eq!(provenance.contributing_relations, vec!["google_books_title"]);
    assert_eq!(provenance.sources, vec!["google_books_title", "marc_title"]);
    assert!(provenance.conflicting);
    assert_eq!(provenance.conflicting_alternatives.len(), 1);
    assert_eq!(
        provenance.conflicting_alternatives[0].values,
        vec![Value::from("Old Man and the Sea")]
    );
    assert!(provenance.conflicting_alternatives[0].similarity > 0.7);
}

#[test]
fn test_single_source_resolves_without_conflict() {
    let rules = builtin();
    let facts = title_store(&rules);
    let resolver = Resolver::new(Arc::new(rules), Arc::new(facts));

    let record = resolver.resolve("B2");
    let title = record.attribute("title").unwrap();

    assert_eq!(single(Some(title)), Some(vec![Value::from("Dune")]));
    let provenance = title.provenance().unwrap();
    assert!(!provenance.conflicting);
    assert_eq!(provenance.contributing_relations, vec!["marc_title"]);
    assert_eq!(provenance.sources, vec!["marc_title"]);
    assert_eq!(provenance.agreement_count, 1);
}

#[test]
fn test_missing_title_is_unresolved_independently() {
    let rules = builtin();
    let facts = title_store(&rules);
    let resolver = Resolver::new(Arc::new(rules), Arc::new(facts));

    let record = resolver.resolve("B3");

    assert_eq!(record.attribute("title"), Some(&Resolution::Unresolved));
    assert_eq!(
        single(record.attribute("author")),
        Some(vec![Value::from("Herbert, Frank")])
    );
    // needs_review only fires for titled records
    assert_eq!(record.attribute("needs_review"), Some(&Resolution::Unresolved));
}

// ================================================================================================
// Priority and idempotence
// ================================================================================================

#[test]
fn test_reordering_alternatives_changes_winner() {
    let decls = r#"
        decl marc_title(Barcode, Title: string).
        decl google_books_title(Barcode, Title: string).
    "#;
    let google_first = compile(&format!(
        "{}\ntitle(B, T) :- google_books_title(B, T).\ntitle(B, T) :- marc_title(B, T).",
        decls
    ))
    .unwrap();
    let marc_first = compile(&format!(
        "{}\ntitle(B, T) :- marc_title(B, T).\ntitle(B, T) :- google_books_title(B, T).",
        decls
    ))
    .unwrap();
    assert_ne!(google_first.fingerprint(), marc_first.fingerprint());

    let mut facts = FactStore::for_rules(&google_first);
    facts.put("marc_title", "B1", vec!["Emma".into()]).unwrap();
    facts
        .put("google_books_title", "B1", vec!["Emma: A Novel".into()])
        .unwrap();
    let facts = Arc::new(facts);

    let a = Resolver::new(Arc::new(google_first), Arc::clone(&facts)).resolve("B1");
    let b = Resolver::new(Arc::new(marc_first), facts).resolve("B1");

    assert_eq!(
        single(a.attribute("title")),
        Some(vec![Value::from("Emma: A Novel")])
    );
    assert_eq!(single(b.attribute("title")), Some(vec![Value::from("Emma")]));
}

#[test]
fn test_resolution_is_idempotent() {
    let rules = builtin();
    let facts = title_store(&rules);
    let resolver = Resolver::new(Arc::new(rules), Arc::new(facts));

    let first = serde_json::to_vec(&resolver.resolve_all()).unwrap();
    let second = serde_json::to_vec(&resolver.resolve_all()).unwrap();
    assert_eq!(first, second);
}

// ================================================================================================
// Classification thresholds, merges and record-level rules
// ================================================================================================

#[test]
fn test_low_confidence_vertex_classification_falls_through() {
    let rules = builtin();
    let mut facts = FactStore::for_rules(&rules);
    facts
        .put("vertex_classification", "B1", vec!["813.54".into(), Value::Float(0.62)])
        .unwrap();
    facts
        .put("vertex_classification", "B2", vec!["823.91".into(), Value::Float(0.91)])
        .unwrap();
    facts.put("marc_call_number", "B1", vec!["PS3515".into()]).unwrap();
    facts.put("marc_call_number", "B2", vec!["PR6039".into()]).unwrap();
    let resolver = Resolver::new(Arc::new(rules), Arc::new(facts));

    assert_eq!(
        single(resolver.resolve("B1").attribute("classification")),
        Some(vec![Value::from("PS3515")])
    );

    let b2 = resolver.resolve("B2");
    let classification = b2.attribute("classification").unwrap();
    assert_eq!(single(Some(classification)), Some(vec![Value::from("823.91")]));
    assert!(classification.provenance().unwrap().conflicting);
}

#[test]
fn test_genres_merge_across_sources() {
    let rules = builtin();
    let mut facts = FactStore::for_rules(&rules);
    facts.put("google_books_genre", "B1", vec!["Fiction".into()]).unwrap();
    facts.put("google_books_genre", "B1", vec!["Classics".into()]).unwrap();
    facts.put("vertex_genre", "B1", vec!["Classics".into()]).unwrap();
    facts.put("vertex_genre", "B1", vec!["Adventure".into()]).unwrap();
    let resolver = Resolver::new(Arc::new(rules), Arc::new(facts));

    let record = resolver.resolve("B1");
    let genres = record.attribute("genres").unwrap();

    assert_eq!(
        genres.value(),
        Some(&AttributeValue::Merged(vec![
            vec![Value::from("Fiction")],
            vec![Value::from("Classics")],
            vec![Value::from("Adventure")],
        ]))
    );
    let provenance = genres.provenance().unwrap();
    assert_eq!(provenance.contributing_relations, vec!["google_books_genre", "vertex_genre"]);
    assert!(!provenance.conflicting);
}

#[test]
fn test_later_stratum_joins_resolved_attributes() {
    let rules = builtin();
    let mut facts = FactStore::for_rules(&rules);
    facts.put("marc_title", "B1", vec!["Dune".into()]).unwrap();
    facts.put("marc_author", "B1", vec!["Herbert, Frank".into()]).unwrap();
    facts.put("marc_call_number", "B1", vec!["PS3558".into()]).unwrap();
    facts.put("marc_title", "B2", vec!["Emma".into()]).unwrap();
    let resolver = Resolver::new(Arc::new(rules), Arc::new(facts));

    assert_eq!(
        single(resolver.resolve("B1").attribute("enriched_book")),
        Some(vec![
            Value::from("Dune"),
            Value::from("Herbert, Frank"),
            Value::from("PS3558"),
        ])
    );

    let b2 = resolver.resolve("B2");
    assert_eq!(b2.attribute("enriched_book"), Some(&Resolution::Unresolved));
    assert_eq!(
        b2.attribute("needs_review").and_then(Resolution::value),
        Some(&AttributeValue::Merged(vec![
            vec![Value::from("missing_author")],
            vec![Value::from("missing_classification")],
        ]))
    );
}

#[test]
fn test_configured_reliability_drives_confidence() {
    let rules = builtin();
    let facts = title_store(&rules);
    let mut policy = ConfidencePolicy::default();
    policy.reliability.insert("google_books_title".to_string(), 0.9);
    policy.disagreement_penalty = 0.5;

    let resolver = Resolver::new(Arc::new(rules), Arc::new(facts))
        .with_reporter(ConflictReporter::new(policy));

    let b1 = resolver.resolve("B1");
    let confidence = b1.attribute("title").unwrap().provenance().unwrap().confidence;
    assert!((confidence - 0.4).abs() < 1e-9);
}

// ================================================================================================
// Compile-time rejections
// ================================================================================================

#[test]
fn test_mutually_dependent_relations_are_rejected() {
    let err = compile(
        r#"
        decl marc_title(Barcode, Title: string).
        title(B, T) :- display_title(B, T).
        title(B, T) :- marc_title(B, T).
        display_title(B, T) :- title(B, T).
        "#,
    )
    .unwrap_err();

    match err {
        CompileError::CyclicDependency { cycle } => {
            assert_eq!(cycle.first(), cycle.last());
            assert!(cycle.contains(&"title".to_string()));
            assert!(cycle.contains(&"display_title".to_string()));
        }
        other => panic!("expected cyclic dependency, got {:?}", other),
    }
}
