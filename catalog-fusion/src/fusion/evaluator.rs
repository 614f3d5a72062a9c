// Evaluator - per-key, stratum-ordered rule evaluation
//
// For one key, derived relations are computed stratum by stratum. A single-valued
// relation tries its alternatives in declaration order and stops at the first
// satisfiable one; the first binding found (fact insertion order) is the winner.
// A mergeable relation collects every distinct tuple of every satisfiable
// alternative. Tuples derived in earlier strata are visible to later ones.

use crate::facts::{FactStore, Tuple, Value};
use crate::fusion::DerivedTuple;
use crate::rules::{CmpOp, CompiledRule, DerivedRelation, Operand, RelationRef, RuleSet, Slot, Step};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::ops::ControlFlow;

/// Evaluates a RuleSet against a populated FactStore
#[derive(Debug, Clone, Copy)]
pub struct Evaluator<'a> {
    rules: &'a RuleSet,
    facts: &'a FactStore,
}

impl<'a> Evaluator<'a> {
    pub fn new(rules: &'a RuleSet, facts: &'a FactStore) -> Self {
        Self { rules, facts }
    }

    /// Derive every relation of the RuleSet for `key`
    pub fn evaluate(&self, key: &str) -> KeyEvaluation<'a> {
        let mut evaluation = KeyEvaluation {
            key: key.to_string(),
            facts: self.facts,
            derived: HashMap::new(),
            outcomes: Vec::new(),
        };

        for stratum in self.rules.strata() {
            for relation in &stratum.relations {
                let tuples = if relation.merge {
                    evaluation.merge(relation)
                } else {
                    evaluation.first_match(relation).into_iter().collect()
                };

                evaluation.derived.insert(
                    relation.name.clone(),
                    tuples.iter().map(|t| t.values.clone()).collect(),
                );
                evaluation.outcomes.push(RelationOutcome {
                    relation: relation.name.clone(),
                    merge: relation.merge,
                    internal: relation.internal,
                    tuples,
                });
            }
        }

        evaluation
    }
}

/// Derived tuples of one relation for one key
///
/// Single-valued relations hold at most one tuple (the winner).
#[derive(Debug, Clone, PartialEq)]
pub struct RelationOutcome {
    pub relation: String,
    pub merge: bool,
    pub internal: bool,
    pub tuples: Vec<DerivedTuple>,
}

/// What a single rule yields for a key
#[derive(Debug, Clone, PartialEq)]
pub enum RuleTrace {
    /// Distinct head tuples, first-derivation order
    Satisfied(Vec<Tuple>),
    /// Index (into the rule body) of the literal no binding got past
    NotSatisfied { literal: usize },
}

/// Result of evaluating all strata for one key
///
/// Also answers read-only questions about individual rules against the same
/// facts and derived tuples, which conflict annotation and explanations rely on.
#[derive(Debug, Clone)]
pub struct KeyEvaluation<'a> {
    key: String,
    facts: &'a FactStore,
    derived: HashMap<String, Vec<Tuple>>,
    outcomes: Vec<RelationOutcome>,
}

impl<'a> KeyEvaluation<'a> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Outcomes in evaluation order
    pub fn outcomes(&self) -> &[RelationOutcome] {
        &self.outcomes
    }

    pub fn outcome(&self, relation: &str) -> Option<&RelationOutcome> {
        self.outcomes.iter().find(|o| o.relation == relation)
    }

    pub fn derived_tuples(&self, relation: &str) -> &[Tuple] {
        self.derived
            .get(relation)
            .map(|rows| rows.as_slice())
            .unwrap_or(&[])
    }

    fn tuples(&self, relation: &RelationRef) -> &[Tuple] {
        match relation {
            RelationRef::Base(name) => self.facts.lookup(name, &self.key),
            RelationRef::Derived(name) => self.derived_tuples(name),
        }
    }

    /// First head tuple the rule derives, if any
    pub fn first(&self, rule: &CompiledRule) -> Option<Tuple> {
        let mut found = None;
        let mut matcher = Matcher::new(self, rule);
        let _ = matcher.run(0, &mut |tuple| {
            found = Some(tuple);
            ControlFlow::Break(())
        });
        found
    }

    /// Every distinct head tuple the rule derives
    pub fn all(&self, rule: &CompiledRule) -> Vec<Tuple> {
        match self.trace(rule) {
            RuleTrace::Satisfied(tuples) => tuples,
            RuleTrace::NotSatisfied { .. } => Vec::new(),
        }
    }

    pub fn trace(&self, rule: &CompiledRule) -> RuleTrace {
        let mut seen = HashSet::new();
        let mut tuples = Vec::new();
        let mut matcher = Matcher::new(self, rule);
        let _ = matcher.run(0, &mut |tuple| {
            if seen.insert(tuple.clone()) {
                tuples.push(tuple);
            }
            ControlFlow::Continue(())
        });

        if !tuples.is_empty() {
            return RuleTrace::Satisfied(tuples);
        }

        let step = matcher.deepest.min(rule.steps.len().saturating_sub(1));
        RuleTrace::NotSatisfied {
            literal: rule.steps.get(step).map(Step::literal).unwrap_or(0),
        }
    }

    fn first_match(&self, relation: &DerivedRelation) -> Option<DerivedTuple> {
        relation.rules.iter().find_map(|rule| {
            self.first(rule).map(|values| DerivedTuple {
                relation: relation.name.clone(),
                key: self.key.clone(),
                values,
                source_rule: rule.id.clone(),
            })
        })
    }

    fn merge(&self, relation: &DerivedRelation) -> Vec<DerivedTuple> {
        let mut seen = HashSet::new();
        let mut merged = Vec::new();
        for rule in &relation.rules {
            for values in self.all(rule) {
                if seen.insert(values.clone()) {
                    merged.push(DerivedTuple {
                        relation: relation.name.clone(),
                        key: self.key.clone(),
                        values,
                        source_rule: rule.id.clone(),
                    });
                }
            }
        }
        merged
    }
}

/// Equal, or numerically equal across int and float
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    a == b || a.compare(b) == Some(Ordering::Equal)
}

fn holds(op: CmpOp, left: &Value, right: &Value) -> bool {
    match op {
        CmpOp::Eq => values_equal(left, right),
        CmpOp::Ne => !values_equal(left, right),
        CmpOp::Lt => left.compare(right) == Some(Ordering::Less),
        CmpOp::Le => matches!(left.compare(right), Some(Ordering::Less | Ordering::Equal)),
        CmpOp::Gt => left.compare(right) == Some(Ordering::Greater),
        CmpOp::Ge => matches!(
            left.compare(right),
            Some(Ordering::Greater | Ordering::Equal)
        ),
    }
}

/// Backtracking walk over one rule's plan
struct Matcher<'e, 'a> {
    evaluation: &'e KeyEvaluation<'a>,
    rule: &'e CompiledRule,
    env: Vec<Option<Value>>,
    /// Furthest plan step reached by any binding
    deepest: usize,
}

impl<'e, 'a> Matcher<'e, 'a> {
    fn new(evaluation: &'e KeyEvaluation<'a>, rule: &'e CompiledRule) -> Self {
        let mut env = vec![None; rule.var_names.len().max(1)];
        env[0] = Some(Value::Str(evaluation.key.clone()));
        Self {
            evaluation,
            rule,
            env,
            deepest: 0,
        }
    }

    fn run(
        &mut self,
        step: usize,
        emit: &mut dyn FnMut(Tuple) -> ControlFlow<()>,
    ) -> ControlFlow<()> {
        self.deepest = self.deepest.max(step);
        let rule = self.rule;
        let evaluation = self.evaluation;

        let Some(current) = rule.steps.get(step) else {
            return match self.head() {
                Some(tuple) => emit(tuple),
                None => ControlFlow::Continue(()),
            };
        };

        match current {
            Step::Scan { relation, slots, .. } => {
                for tuple in evaluation.tuples(relation) {
                    let Some(bound) = self.bind(slots, tuple) else {
                        continue;
                    };
                    let flow = self.run(step + 1, emit);
                    for var in bound {
                        self.env[var] = None;
                    }
                    if flow.is_break() {
                        return flow;
                    }
                }
                ControlFlow::Continue(())
            }
            Step::Absent { relation, slots, .. } => {
                let blocked = evaluation
                    .tuples(relation)
                    .iter()
                    .any(|tuple| self.matches(slots, tuple));
                if blocked {
                    ControlFlow::Continue(())
                } else {
                    self.run(step + 1, emit)
                }
            }
            Step::Compare {
                left, op, right, ..
            } => {
                let satisfied = match (self.value(left), self.value(right)) {
                    (Some(l), Some(r)) => holds(*op, l, r),
                    _ => false,
                };
                if satisfied {
                    self.run(step + 1, emit)
                } else {
                    ControlFlow::Continue(())
                }
            }
            Step::Bind { var, value, .. } => {
                let Some(value) = self.value(value).cloned() else {
                    return ControlFlow::Continue(());
                };
                self.env[*var] = Some(value);
                let flow = self.run(step + 1, emit);
                self.env[*var] = None;
                flow
            }
        }
    }

    fn value<'v>(&'v self, operand: &'v Operand) -> Option<&'v Value> {
        match operand {
            Operand::Var(i) => self.env.get(*i).and_then(Option::as_ref),
            Operand::Const(value) => Some(value),
        }
    }

    /// Match slots against a tuple, binding first occurrences
    ///
    /// Returns the variables bound so the caller can undo them; on mismatch the
    /// environment is left unchanged.
    fn bind(&mut self, slots: &[Slot], tuple: &[Value]) -> Option<Vec<usize>> {
        let mut bound = Vec::new();
        for (slot, value) in slots.iter().zip(tuple) {
            let ok = match slot {
                Slot::Bind(i) => {
                    self.env[*i] = Some(value.clone());
                    bound.push(*i);
                    true
                }
                Slot::Bound(i) => self.env[*i]
                    .as_ref()
                    .map(|v| values_equal(v, value))
                    .unwrap_or(false),
                Slot::Const(c) => values_equal(c, value),
                Slot::Wildcard => true,
            };
            if !ok {
                for i in bound {
                    self.env[i] = None;
                }
                return None;
            }
        }
        Some(bound)
    }

    fn matches(&self, slots: &[Slot], tuple: &[Value]) -> bool {
        slots.iter().zip(tuple).all(|(slot, value)| match slot {
            Slot::Bound(i) | Slot::Bind(i) => self.env[*i]
                .as_ref()
                .map(|v| values_equal(v, value))
                .unwrap_or(false),
            Slot::Const(c) => values_equal(c, value),
            Slot::Wildcard => true,
        })
    }

    fn head(&self) -> Option<Tuple> {
        self.rule
            .head
            .iter()
            .map(|operand| self.value(operand).cloned())
            .collect()
    }
}
