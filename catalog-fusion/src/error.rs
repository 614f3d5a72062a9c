//! Error types for catalog-fusion
//!
//! Three classes of failure, handled differently:
//! - [`FactError`]: one rejected fact; reported and the run continues
//! - [`CompileError`]: the rule set cannot be used; fatal at load time
//! - [`FusionError`]: failures of library-level runs (compile, fact, batch worker)
//!
//! An unresolved attribute is not an error; it is carried as data in
//! [`crate::fusion::Resolution::Unresolved`].

use thiserror::Error;

/// Result type for rule compilation
pub type CompileResult<T> = std::result::Result<T, CompileError>;

/// Result type for top-level fusion operations
pub type FusionResult<T> = std::result::Result<T, FusionError>;

/// A single fact was rejected by the FactStore
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FactError {
    /// Arity or field type disagrees with the registered schema
    #[error("Schema mismatch for {relation}({key}): {detail}")]
    SchemaMismatch {
        relation: String,
        key: String,
        detail: String,
    },

    /// No schema was registered for the relation
    #[error("Undeclared relation: {relation}")]
    UndeclaredRelation { relation: String },

    /// Second fact for a key in a single-valued relation
    #[error("Duplicate key {key} for single-valued relation {relation}")]
    DuplicateKey { relation: String, key: String },

    /// Record identifiers must be non-empty
    #[error("Empty key for relation {relation}")]
    EmptyKey { relation: String },
}

/// The rule text could not be compiled into a RuleSet
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    /// Lexical or grammatical error in the rule text
    #[error("Syntax error at line {line}, column {column}: {message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },

    /// A body literal references a relation that is neither declared nor derived
    #[error("Unknown relation {relation} referenced by rule {rule}")]
    UnknownRelation { relation: String, rule: String },

    /// Derived relations depend on each other in a cycle
    #[error("Cyclic dependency between derived relations: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    /// A variable is used where nothing binds it
    #[error("Unbound variable {variable} in rule {rule}")]
    UnboundVariable { variable: String, rule: String },

    /// Atom arity disagrees with the relation's declaration or earlier heads
    #[error("Arity mismatch for {relation} in rule {rule}: expected {expected}, found {found}")]
    ArityMismatch {
        relation: String,
        rule: String,
        expected: usize,
        found: usize,
    },

    /// Structurally invalid rule or declaration
    #[error("Invalid rule {rule}: {reason}")]
    InvalidRule { rule: String, reason: String },

    /// A relation was declared twice
    #[error("Relation {relation} declared more than once")]
    DuplicateDeclaration { relation: String },
}

/// Top-level error for loading and running fusion
#[derive(Debug, Error)]
pub enum FusionError {
    #[error("Rule compilation failed: {0}")]
    Compile(#[from] CompileError),

    #[error("Fact rejected: {0}")]
    Fact(#[from] FactError),

    /// A worker task panicked or was aborted
    #[error("Worker task failed: {0}")]
    Worker(String),
}
