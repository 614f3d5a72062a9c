//! Rule language and compilation
//!
//! Rule text holds three kinds of statements:
//!
//! ```text
//! decl marc_title(Barcode, Title: string).          # base relation
//! derive genres merge.                               # derived relation options
//! title(B, T) :- google_books_title(B, T).           # rule, highest priority first
//! title(B, T) :- marc_title(B, T).
//! ```
//!
//! [`compile`] validates the text and produces an immutable [`RuleSet`].

pub mod ast;
pub mod compiler;
pub mod handle;
pub mod lexer;
pub mod parser;

pub use ast::{Atom, CmpOp, Literal, Program, RuleDef, Term};
pub use compiler::{
    compile, compile_program, CompiledRule, DerivedRelation, Operand, RelationRef, RuleId,
    RuleSet, Slot, Step, Stratum,
};
pub use handle::RuleSetHandle;
pub use parser::parse_program;

/// Catalog rules shipped with the binary
pub const BUILTIN_RULES: &str = include_str!("../../rules/catalog.rules");
