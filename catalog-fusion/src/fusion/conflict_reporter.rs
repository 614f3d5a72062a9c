// Conflict Reporter - agreement, disagreement and confidence for resolved values
//
// Re-evaluates every alternative of a resolved relation read-only and compares
// what it would have produced with the winning value. Never changes the winner.

use crate::facts::{Tuple, Value};
use crate::fusion::evaluator::{values_equal, KeyEvaluation};
use crate::fusion::{Alternative, DerivedTuple, Provenance};
use crate::rules::{CompiledRule, DerivedRelation, RuleId};
use catalog_common::config::ConfidenceConfig;
use std::collections::HashMap;
use tracing::debug;

/// Source reliabilities and the penalty applied per disagreeing candidate
#[derive(Debug, Clone, PartialEq)]
pub struct ConfidencePolicy {
    pub default_reliability: f64,
    pub disagreement_penalty: f64,
    /// Per base relation, in [0, 1]
    pub reliability: HashMap<String, f64>,
}

impl Default for ConfidencePolicy {
    fn default() -> Self {
        Self::from(&ConfidenceConfig::default())
    }
}

impl From<&ConfidenceConfig> for ConfidencePolicy {
    fn from(config: &ConfidenceConfig) -> Self {
        Self {
            default_reliability: config.default_reliability,
            disagreement_penalty: config.disagreement_penalty,
            reliability: config
                .reliability
                .iter()
                .map(|(relation, r)| (relation.clone(), *r))
                .collect(),
        }
    }
}

impl ConfidencePolicy {
    pub fn relation_reliability(&self, relation: &str) -> f64 {
        self.reliability
            .get(relation)
            .copied()
            .unwrap_or(self.default_reliability)
    }

    /// A rule is as reliable as its least reliable positive source
    pub fn rule_reliability(&self, rule: &CompiledRule) -> f64 {
        rule.source_relations
            .iter()
            .map(|relation| self.relation_reliability(relation))
            .reduce(f64::min)
            .unwrap_or(self.default_reliability)
    }
}

/// Builds provenance for resolved attributes
#[derive(Debug, Clone, Default)]
pub struct ConflictReporter {
    policy: ConfidencePolicy,
}

impl ConflictReporter {
    pub fn new(policy: ConfidencePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ConfidencePolicy {
        &self.policy
    }

    /// Provenance for the winning tuple of a single-valued relation
    ///
    /// Candidates are every distinct tuple of every alternative, including extra
    /// tuples of the winning rule itself.
    pub fn annotate(
        &self,
        evaluation: &KeyEvaluation<'_>,
        relation: &DerivedRelation,
        winner: &DerivedTuple,
    ) -> Provenance {
        let mut winner_reliability = self.policy.default_reliability;
        let mut contributing_relations = Vec::new();
        let mut sources: Vec<String> = Vec::new();
        let mut agreeing: Vec<f64> = Vec::new();
        let mut corroborating_rules: Vec<RuleId> = Vec::new();
        let mut alternatives = Vec::new();

        for rule in &relation.rules {
            let reliability = self.policy.rule_reliability(rule);
            let is_winner = rule.id == winner.source_rule;
            if is_winner {
                winner_reliability = reliability;
                contributing_relations = rule.source_relations.clone();
            }

            let candidates = evaluation.all(rule);
            if !candidates.is_empty() {
                for source in &rule.source_relations {
                    if !sources.contains(source) {
                        sources.push(source.clone());
                    }
                }
            }

            let mut winner_seen = !is_winner;
            for values in candidates {
                if !winner_seen && values == winner.values {
                    winner_seen = true;
                    continue;
                }

                if materially_equal(&values, &winner.values) {
                    agreeing.push(reliability);
                    if !is_winner && !corroborating_rules.contains(&rule.id) {
                        corroborating_rules.push(rule.id.clone());
                    }
                } else {
                    alternatives.push(Alternative {
                        rule: rule.id.clone(),
                        relations: rule.source_relations.clone(),
                        similarity: similarity(&values, &winner.values),
                        values,
                    });
                }
            }
        }

        let confidence = noisy_or(std::iter::once(winner_reliability).chain(agreeing.iter().copied()))
            - self.policy.disagreement_penalty * alternatives.len() as f64;

        if !alternatives.is_empty() {
            debug!(
                key = %winner.key,
                relation = %relation.name,
                winner = %winner.source_rule,
                alternatives = alternatives.len(),
                "Conflicting alternatives"
            );
        }

        Provenance {
            contributing_rule: winner.source_rule.clone(),
            contributing_relations,
            sources,
            agreement_count: agreeing.len() + 1,
            conflicting: !alternatives.is_empty(),
            confidence: confidence.clamp(0.0, 1.0),
            corroborating_rules,
            conflicting_alternatives: alternatives,
        }
    }

    /// Provenance for a mergeable relation; `None` when nothing was derived
    pub fn annotate_merged(
        &self,
        relation: &DerivedRelation,
        tuples: &[DerivedTuple],
    ) -> Option<Provenance> {
        let first = tuples.first()?;

        let mut producing: Vec<&CompiledRule> = Vec::new();
        for tuple in tuples {
            if producing.iter().any(|r| r.id == tuple.source_rule) {
                continue;
            }
            if let Some(rule) = relation.rules.iter().find(|r| r.id == tuple.source_rule) {
                producing.push(rule);
            }
        }

        let mut contributing_relations: Vec<String> = Vec::new();
        for rule in &producing {
            for source in &rule.source_relations {
                if !contributing_relations.contains(source) {
                    contributing_relations.push(source.clone());
                }
            }
        }

        let confidence = noisy_or(producing.iter().map(|r| self.policy.rule_reliability(r)));

        Some(Provenance {
            contributing_rule: first.source_rule.clone(),
            sources: contributing_relations.clone(),
            contributing_relations,
            agreement_count: producing.len(),
            conflicting: false,
            confidence: confidence.clamp(0.0, 1.0),
            corroborating_rules: producing.iter().skip(1).map(|r| r.id.clone()).collect(),
            conflicting_alternatives: Vec::new(),
        })
    }
}

/// 1 - prod(1 - r)
fn noisy_or(reliabilities: impl IntoIterator<Item = f64>) -> f64 {
    1.0 - reliabilities
        .into_iter()
        .map(|r| 1.0 - r.clamp(0.0, 1.0))
        .product::<f64>()
}

/// Trim, collapse inner whitespace, lowercase
fn normalize_str(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn normalized_text(value: &Value) -> String {
    match value {
        Value::Str(s) => normalize_str(s),
        Value::List(items) => format!(
            "[{}]",
            items.iter().map(normalized_text).collect::<Vec<_>>().join(", ")
        ),
        other => other.to_string(),
    }
}

fn value_materially_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => normalize_str(x) == normalize_str(y),
        (Value::List(xs), Value::List(ys)) => {
            xs.len() == ys.len()
                && xs.iter().zip(ys).all(|(x, y)| value_materially_equal(x, y))
        }
        _ => values_equal(a, b),
    }
}

/// Equal after string normalization, lists compared element-wise
pub fn materially_equal(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| value_materially_equal(x, y))
}

/// Normalized Levenshtein similarity of two tuples' normalized text
pub fn similarity(a: &Tuple, b: &Tuple) -> f64 {
    let text = |t: &Tuple| {
        t.iter()
            .map(normalized_text)
            .collect::<Vec<_>>()
            .join(" | ")
    };
    strsim::normalized_levenshtein(&text(a), &text(b))
}
