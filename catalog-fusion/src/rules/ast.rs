// Rule text syntax tree
//
// Display impls print canonical rule text; the RuleSet fingerprint is computed
// over that text so formatting differences in the source do not change identity
// while reordering rules does.

use crate::facts::{RelationSchema, Value};
use std::fmt;

/// Argument position of an atom, or operand of a comparison
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Var(String),
    Wildcard,
    Const(Value),
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Var(name) => write!(f, "{}", name),
            Term::Wildcard => write!(f, "_"),
            Term::Const(value) => write!(f, "{}", value),
        }
    }
}

/// `relation(term, ...)`
#[derive(Debug, Clone, PartialEq)]
pub struct Atom {
    pub relation: String,
    pub terms: Vec<Term>,
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.relation)?;
        for (i, term) in self.terms.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", term)?;
        }
        write!(f, ")")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        };
        write!(f, "{}", s)
    }
}

/// Body literal
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// At least one matching tuple must exist
    Positive(Atom),
    /// No matching tuple may exist
    Absent(Atom),
    /// Filter (or binding, for `Var = term` with an unbound variable)
    Compare { left: Term, op: CmpOp, right: Term },
}

impl Literal {
    pub fn atom(&self) -> Option<&Atom> {
        match self {
            Literal::Positive(atom) | Literal::Absent(atom) => Some(atom),
            Literal::Compare { .. } => None,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Positive(atom) => write!(f, "{}", atom),
            Literal::Absent(atom) => write!(f, "!{}", atom),
            Literal::Compare { left, op, right } => write!(f, "{} {} {}", left, op, right),
        }
    }
}

/// `head :- body.`
#[derive(Debug, Clone, PartialEq)]
pub struct RuleDef {
    pub head: Atom,
    pub body: Vec<Literal>,
    /// 1-based source line of the head
    pub line: usize,
}

impl fmt::Display for RuleDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} :- ", self.head)?;
        for (i, literal) in self.body.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", literal)?;
        }
        write!(f, ".")
    }
}

/// `derive relation [merge] [internal].`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeriveDecl {
    pub relation: String,
    /// Collect every distinct tuple from every satisfiable alternative
    pub merge: bool,
    /// Usable by later strata but left out of resolved records
    pub internal: bool,
    pub line: usize,
}

impl fmt::Display for DeriveDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "derive {}", self.relation)?;
        if self.merge {
            write!(f, " merge")?;
        }
        if self.internal {
            write!(f, " internal")?;
        }
        write!(f, ".")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Decl { schema: RelationSchema, line: usize },
    Derive(DeriveDecl),
    Rule(RuleDef),
}

/// Parsed rule text, statements in source order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub statements: Vec<Statement>,
}
