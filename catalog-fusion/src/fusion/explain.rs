//! Explanations: why one alternative won over another
//!
//! For a key and a derived relation, every alternative is reported in priority
//! order with what it would have produced, or the first body literal that no
//! binding got past.

use crate::facts::Tuple;
use crate::fusion::conflict_reporter::materially_equal;
use crate::fusion::evaluator::{KeyEvaluation, RuleTrace};
use crate::rules::{DerivedRelation, RuleId};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TraceOutcome {
    /// Produced the resolved value (every contributing rule, for merged relations)
    Won { values: Vec<Tuple> },
    /// Satisfiable, but a higher-priority alternative won
    Shadowed {
        values: Vec<Tuple>,
        agrees_with_winner: bool,
    },
    NotSatisfied { failed_literal: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlternativeTrace {
    pub rule: RuleId,
    pub text: String,
    #[serde(flatten)]
    pub outcome: TraceOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Explanation {
    pub key: String,
    pub relation: String,
    pub merge: bool,
    pub alternatives: Vec<AlternativeTrace>,
}

impl Explanation {
    pub(crate) fn build(evaluation: &KeyEvaluation<'_>, relation: &DerivedRelation) -> Self {
        let resolved = evaluation
            .outcome(&relation.name)
            .map(|o| o.tuples.as_slice())
            .unwrap_or(&[]);

        let alternatives = relation
            .rules
            .iter()
            .map(|rule| {
                let outcome = match evaluation.trace(rule) {
                    RuleTrace::NotSatisfied { literal } => TraceOutcome::NotSatisfied {
                        failed_literal: rule
                            .def
                            .body
                            .get(literal)
                            .map(|l| l.to_string())
                            .unwrap_or_default(),
                    },
                    RuleTrace::Satisfied(values) if relation.merge => TraceOutcome::Won { values },
                    RuleTrace::Satisfied(values) => match resolved.first() {
                        Some(winner) if winner.source_rule == rule.id => TraceOutcome::Won {
                            values: vec![winner.values.clone()],
                        },
                        winner => TraceOutcome::Shadowed {
                            agrees_with_winner: winner
                                .map(|w| values.iter().all(|v| materially_equal(v, &w.values)))
                                .unwrap_or(false),
                            values,
                        },
                    },
                };

                AlternativeTrace {
                    rule: rule.id.clone(),
                    text: rule.def.to_string(),
                    outcome,
                }
            })
            .collect();

        Self {
            key: evaluation.key().to_string(),
            relation: relation.name.clone(),
            merge: relation.merge,
            alternatives,
        }
    }

    /// The winning alternative, if any
    pub fn winner(&self) -> Option<&AlternativeTrace> {
        self.alternatives
            .iter()
            .find(|a| matches!(a.outcome, TraceOutcome::Won { .. }))
    }
}

impl fmt::Display for Explanation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} for {}:", self.relation, self.key)?;
        for alternative in &self.alternatives {
            let outcome = match &alternative.outcome {
                TraceOutcome::Won { values } => format!("won {}", render(values)),
                TraceOutcome::Shadowed {
                    values,
                    agrees_with_winner,
                } => format!(
                    "shadowed {}{}",
                    render(values),
                    if *agrees_with_winner { " (agrees)" } else { "" }
                ),
                TraceOutcome::NotSatisfied { failed_literal } => {
                    format!("not satisfied at {}", failed_literal)
                }
            };
            writeln!(f, "  {:<12} {}", alternative.rule.as_str(), outcome)?;
            writeln!(f, "  {:<12} {}", "", alternative.text)?;
        }
        Ok(())
    }
}

fn render(values: &[Tuple]) -> String {
    values
        .iter()
        .map(|t| {
            let cells: Vec<String> = t.iter().map(|v| v.to_string()).collect();
            format!("({})", cells.join(", "))
        })
        .collect::<Vec<_>>()
        .join(" ")
}
