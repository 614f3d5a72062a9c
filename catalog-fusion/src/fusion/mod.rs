// Fusion - per-key rule evaluation, conflict annotation and record assembly
//
// Evaluator derives tuples stratum by stratum, ConflictReporter annotates each
// winning value with provenance, Resolver assembles ResolvedRecords.

pub mod batch;
pub mod conflict_reporter;
pub mod evaluator;
pub mod explain;
pub mod resolver;

pub use batch::BatchOutcome;
pub use conflict_reporter::{ConfidencePolicy, ConflictReporter};
pub use evaluator::{Evaluator, KeyEvaluation, RelationOutcome, RuleTrace};
pub use explain::{AlternativeTrace, Explanation, TraceOutcome};
pub use resolver::Resolver;

use crate::facts::Tuple;
use crate::rules::RuleId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A tuple produced by one rule for one key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedTuple {
    pub relation: String,
    pub key: String,
    pub values: Tuple,
    pub source_rule: RuleId,
}

/// Resolved value of one derived relation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeValue {
    /// Winning tuple of a single-valued relation
    Single(Tuple),
    /// Every distinct tuple of a mergeable relation, first-derivation order
    Merged(Vec<Tuple>),
}

/// A satisfiable alternative whose value disagrees with the winner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternative {
    pub rule: RuleId,
    pub relations: Vec<String>,
    pub values: Tuple,
    /// Normalized Levenshtein similarity to the winning value (1.0 = identical)
    pub similarity: f64,
}

/// Where a resolved value came from and how much the sources agree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub contributing_rule: RuleId,
    pub contributing_relations: Vec<String>,
    /// Every relation that supplied a candidate value, the winner's first
    pub sources: Vec<String>,
    /// Candidates materially equal to the winning value, the winner included
    pub agreement_count: usize,
    pub conflicting: bool,
    pub confidence: f64,
    /// Other rules whose value agrees with the winner
    pub corroborating_rules: Vec<RuleId>,
    pub conflicting_alternatives: Vec<Alternative>,
}

/// Outcome for one attribute of a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Resolution {
    Resolved {
        value: AttributeValue,
        provenance: Provenance,
    },
    /// No alternative was satisfiable for this key
    Unresolved,
}

impl Resolution {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Resolution::Resolved { .. })
    }

    pub fn value(&self) -> Option<&AttributeValue> {
        match self {
            Resolution::Resolved { value, .. } => Some(value),
            Resolution::Unresolved => None,
        }
    }

    pub fn provenance(&self) -> Option<&Provenance> {
        match self {
            Resolution::Resolved { provenance, .. } => Some(provenance),
            Resolution::Unresolved => None,
        }
    }
}

/// Fused record for one key
///
/// `rule_set` is the fingerprint of the RuleSet that produced it; attributes are
/// every non-internal derived relation, in name order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedRecord {
    pub key: String,
    pub rule_set: String,
    pub attributes: BTreeMap<String, Resolution>,
}

impl ResolvedRecord {
    pub fn attribute(&self, name: &str) -> Option<&Resolution> {
        self.attributes.get(name)
    }

    pub fn unresolved(&self) -> impl Iterator<Item = &str> {
        self.attributes
            .iter()
            .filter(|(_, r)| !r.is_resolved())
            .map(|(name, _)| name.as_str())
    }

    pub fn has_conflicts(&self) -> bool {
        self.attributes
            .values()
            .filter_map(Resolution::provenance)
            .any(|p| p.conflicting)
    }
}
