// Resolver - assembles ResolvedRecords from evaluations
//
// Holds a RuleSet snapshot and a populated FactStore. Cloning is cheap and every
// clone evaluates independently, so keys can be resolved on any number of workers.

use crate::facts::FactStore;
use crate::fusion::{
    AttributeValue, ConflictReporter, Evaluator, Explanation, KeyEvaluation, Resolution,
    ResolvedRecord,
};
use crate::rules::RuleSet;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Resolver {
    rules: Arc<RuleSet>,
    facts: Arc<FactStore>,
    reporter: ConflictReporter,
}

impl Resolver {
    pub fn new(rules: Arc<RuleSet>, facts: Arc<FactStore>) -> Self {
        Self {
            rules,
            facts,
            reporter: ConflictReporter::default(),
        }
    }

    pub fn with_reporter(mut self, reporter: ConflictReporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn rules(&self) -> &Arc<RuleSet> {
        &self.rules
    }

    pub fn facts(&self) -> &Arc<FactStore> {
        &self.facts
    }

    /// Every key with at least one fact, sorted
    pub fn keys(&self) -> Vec<String> {
        self.facts.all_keys().into_iter().map(str::to_string).collect()
    }

    /// Evaluate all strata for `key` and assemble its record
    ///
    /// A key without facts yields a record whose attributes are all Unresolved.
    pub fn resolve(&self, key: &str) -> ResolvedRecord {
        let evaluation = Evaluator::new(&self.rules, &self.facts).evaluate(key);
        let record = self.assemble(&evaluation);

        debug!(
            key = %key,
            resolved = record.attributes.values().filter(|r| r.is_resolved()).count(),
            unresolved = record.unresolved().count(),
            conflicting = record.has_conflicts(),
            "Record resolved"
        );

        record
    }

    /// Resolve every known key, in key order
    pub fn resolve_all(&self) -> Vec<ResolvedRecord> {
        self.keys().iter().map(|key| self.resolve(key)).collect()
    }

    /// Trace every alternative of `relation` for `key`; `None` for an unknown relation
    pub fn explain(&self, key: &str, relation: &str) -> Option<Explanation> {
        let derived = self.rules.derived(relation)?;
        let evaluation = Evaluator::new(&self.rules, &self.facts).evaluate(key);
        Some(Explanation::build(&evaluation, derived))
    }

    fn assemble(&self, evaluation: &KeyEvaluation<'_>) -> ResolvedRecord {
        let mut attributes = BTreeMap::new();

        for outcome in evaluation.outcomes().iter().filter(|o| !o.internal) {
            let Some(relation) = self.rules.derived(&outcome.relation) else {
                continue;
            };

            let resolution = if outcome.merge {
                match self.reporter.annotate_merged(relation, &outcome.tuples) {
                    Some(provenance) => Resolution::Resolved {
                        value: AttributeValue::Merged(
                            outcome.tuples.iter().map(|t| t.values.clone()).collect(),
                        ),
                        provenance,
                    },
                    None => Resolution::Unresolved,
                }
            } else {
                match outcome.tuples.first() {
                    Some(winner) => Resolution::Resolved {
                        value: AttributeValue::Single(winner.values.clone()),
                        provenance: self.reporter.annotate(evaluation, relation, winner),
                    },
                    None => Resolution::Unresolved,
                }
            };

            attributes.insert(outcome.relation.clone(), resolution);
        }

        ResolvedRecord {
            key: evaluation.key().to_string(),
            rule_set: self.rules.fingerprint().to_string(),
            attributes,
        }
    }
}
