//! Fact storage
//!
//! The FactStore holds typed tuples for each declared base relation, indexed by
//! record key. It is populated once per run (append-only), then shared read-only
//! by every evaluation of that run.

pub mod loader;
pub mod schema;
pub mod value;

pub use schema::{FieldDef, RelationSchema};
pub use value::{Tuple, Value, ValueType};

use crate::error::FactError;
use crate::rules::RuleSet;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use tracing::debug;

/// One source observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub relation: String,
    pub key: String,
    pub values: Tuple,
}

/// Facts of one relation, indexed by key
#[derive(Debug, Clone)]
struct RelationFacts {
    schema: RelationSchema,
    by_key: HashMap<String, Vec<Tuple>>,
    len: usize,
}

impl RelationFacts {
    fn new(schema: RelationSchema) -> Self {
        Self {
            schema,
            by_key: HashMap::new(),
            len: 0,
        }
    }

    fn insert(&mut self, key: &str, values: Tuple) -> Result<(), FactError> {
        if key.is_empty() {
            return Err(FactError::EmptyKey {
                relation: self.schema.name.clone(),
            });
        }

        self.schema
            .check(&values)
            .map_err(|detail| FactError::SchemaMismatch {
                relation: self.schema.name.clone(),
                key: key.to_string(),
                detail,
            })?;

        let rows = self.by_key.entry(key.to_string()).or_default();
        if !self.schema.multi && !rows.is_empty() {
            return Err(FactError::DuplicateKey {
                relation: self.schema.name.clone(),
                key: key.to_string(),
            });
        }

        rows.push(values);
        self.len += 1;
        Ok(())
    }
}

/// Typed, key-indexed fact tuples for every registered relation
#[derive(Debug, Clone, Default)]
pub struct FactStore {
    relations: HashMap<String, RelationFacts>,
}

impl FactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with every base relation declared by the rule set registered
    pub fn for_rules(rules: &RuleSet) -> Self {
        let mut store = Self::new();
        for schema in rules.schemas() {
            store.register(schema.clone());
        }
        store
    }

    /// Register a relation schema
    ///
    /// Re-registering an identical schema is a no-op; a different schema for the
    /// same relation replaces it only while the relation holds no facts.
    pub fn register(&mut self, schema: RelationSchema) {
        match self.relations.get_mut(&schema.name) {
            Some(existing) if existing.len > 0 => {
                if existing.schema != schema {
                    debug!(
                        relation = %schema.name,
                        "Ignoring schema change for relation that already holds facts"
                    );
                }
            }
            Some(existing) => existing.schema = schema,
            None => {
                self.relations
                    .insert(schema.name.clone(), RelationFacts::new(schema));
            }
        }
    }

    pub fn schema(&self, relation: &str) -> Option<&RelationSchema> {
        self.relations.get(relation).map(|r| &r.schema)
    }

    /// Append one fact
    pub fn put(
        &mut self,
        relation: &str,
        key: &str,
        values: Tuple,
    ) -> Result<(), FactError> {
        let facts = self
            .relations
            .get_mut(relation)
            .ok_or_else(|| FactError::UndeclaredRelation {
                relation: relation.to_string(),
            })?;
        facts.insert(key, values)
    }

    /// Append a fact value
    pub fn put_fact(&mut self, fact: Fact) -> Result<(), FactError> {
        self.put(&fact.relation, &fact.key, fact.values)
    }

    /// Value tuples stored for `key` in `relation`, in insertion order
    pub fn lookup(&self, relation: &str, key: &str) -> &[Tuple] {
        self.relations
            .get(relation)
            .and_then(|r| r.by_key.get(key))
            .map(|rows| rows.as_slice())
            .unwrap_or(&[])
    }

    /// Keys with at least one fact in `relation`
    pub fn keys(&self, relation: &str) -> BTreeSet<&str> {
        self.relations
            .get(relation)
            .map(|r| r.by_key.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Keys with at least one fact in any relation
    pub fn all_keys(&self) -> BTreeSet<&str> {
        self.relations
            .values()
            .flat_map(|r| r.by_key.keys().map(String::as_str))
            .collect()
    }

    /// Number of stored facts across all relations
    pub fn len(&self) -> usize {
        self.relations.values().map(|r| r.len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fact store that accepts appends from several producers at once
///
/// The set of relations is fixed at creation; appends to the same relation are
/// serialized by that relation's lock while different relations proceed in
/// parallel. [`ConcurrentFactStore::freeze`] yields the lock-free store used for
/// evaluation.
#[derive(Debug, Default)]
pub struct ConcurrentFactStore {
    relations: HashMap<String, Mutex<RelationFacts>>,
}

impl ConcurrentFactStore {
    pub fn new(schemas: impl IntoIterator<Item = RelationSchema>) -> Self {
        let relations = schemas
            .into_iter()
            .map(|schema| (schema.name.clone(), Mutex::new(RelationFacts::new(schema))))
            .collect();
        Self { relations }
    }

    pub fn for_rules(rules: &RuleSet) -> Self {
        Self::new(rules.schemas().cloned())
    }

    pub fn put(
        &self,
        relation: &str,
        key: &str,
        values: Tuple,
    ) -> Result<(), FactError> {
        let facts = self
            .relations
            .get(relation)
            .ok_or_else(|| FactError::UndeclaredRelation {
                relation: relation.to_string(),
            })?;
        // insert validates before mutating, so a poisoned index is still consistent
        let mut guard = facts.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.insert(key, values)
    }

    /// Stop accepting facts and hand over a read-only store
    pub fn freeze(self) -> FactStore {
        let relations = self
            .relations
            .into_iter()
            .map(|(name, facts)| {
                let facts = facts.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
                (name, facts)
            })
            .collect();
        FactStore { relations }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn title_store() -> FactStore {
        let mut store = FactStore::new();
        store.register(RelationSchema::new("marc_title", "Barcode").field("Title", ValueType::String));
        store.register(
            RelationSchema::new("loc_subject", "Barcode")
                .field("Subject", ValueType::String)
                .multi(),
        );
        store
    }

    #[test]
    fn test_put_and_lookup_by_key() {
        let mut store = title_store();
        store.put("marc_title", "B1", vec!["Dune".into()]).unwrap();

        assert_eq!(store.lookup("marc_title", "B1"), &[vec![Value::from("Dune")]]);
        assert!(store.lookup("marc_title", "B2").is_empty());
        assert!(store.lookup("no_such_relation", "B1").is_empty());
    }

    #[test]
    fn test_schema_mismatch_rejects_only_that_fact() {
        let mut store = title_store();
        let err = store.put("marc_title", "B1", vec![Value::Int(7)]).unwrap_err();
        assert!(matches!(err, FactError::SchemaMismatch { .. }));

        store.put("marc_title", "B1", vec!["Dune".into()]).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_duplicate_key_rejected_unless_multi() {
        let mut store = title_store();
        store.put("marc_title", "B1", vec!["Dune".into()]).unwrap();
        let err = store.put("marc_title", "B1", vec!["Dune Messiah".into()]).unwrap_err();
        assert_eq!(
            err,
            FactError::DuplicateKey {
                relation: "marc_title".into(),
                key: "B1".into()
            }
        );

        store.put("loc_subject", "B1", vec!["Deserts".into()]).unwrap();
        store.put("loc_subject", "B1", vec!["Ecology".into()]).unwrap();
        assert_eq!(store.lookup("loc_subject", "B1").len(), 2);
    }

    #[test]
    fn test_undeclared_relation_and_empty_key() {
        let mut store = title_store();
        assert!(matches!(
            store.put("google_books_title", "B1", vec!["Dune".into()]),
            Err(FactError::UndeclaredRelation { .. })
        ));
        assert!(matches!(
            store.put("marc_title", "", vec!["Dune".into()]),
            Err(FactError::EmptyKey { .. })
        ));
    }

    #[test]
    fn test_keys_are_sorted_and_unioned() {
        let mut store = title_store();
        store.put("marc_title", "B2", vec!["Emma".into()]).unwrap();
        store.put("marc_title", "B1", vec!["Dune".into()]).unwrap();
        store.put("loc_subject", "B3", vec!["Deserts".into()]).unwrap();

        assert_eq!(store.keys("marc_title").into_iter().collect::<Vec<_>>(), vec!["B1", "B2"]);
        assert_eq!(
            store.all_keys().into_iter().collect::<Vec<_>>(),
            vec!["B1", "B2", "B3"]
        );
    }

    #[test]
    fn test_concurrent_producers_serialize_per_relation() {
        let store = Arc::new(ConcurrentFactStore::new(vec![RelationSchema::new(
            "loc_subject",
            "Barcode",
        )
        .field("Subject", ValueType::String)
        .multi()]));

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        store
                            .put("loc_subject", &format!("B{}", i % 5), vec![format!("s{}-{}", worker, i).into()])
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let store = Arc::try_unwrap(store).unwrap().freeze();
        assert_eq!(store.len(), 400);
        assert_eq!(store.keys("loc_subject").len(), 5);
    }
}
