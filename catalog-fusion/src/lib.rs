//! # Catalog Fusion
//!
//! Multi-source catalog record fusion driven by declarative rules:
//! - Facts: typed, key-indexed observations from each source
//! - Rules: Datalog-style priority rules, compiled and stratified
//! - Fusion: per-key evaluation, conflict annotation, resolved records
//! - Output: flattened warehouse rows
//!
//! ```no_run
//! use catalog_fusion::{compile, FactStore, Resolver};
//! use std::sync::Arc;
//!
//! let rules = compile(catalog_fusion::BUILTIN_RULES)?;
//! let mut facts = FactStore::for_rules(&rules);
//! facts.put("marc_title", "39015012345678", vec!["Dune".into()])?;
//!
//! let resolver = Resolver::new(Arc::new(rules), Arc::new(facts));
//! let record = resolver.resolve("39015012345678");
//! # Ok::<(), catalog_fusion::FusionError>(())
//! ```

pub mod error;
pub mod facts;
pub mod fusion;
pub mod output;
pub mod rules;

pub use error::{CompileError, FactError, FusionError, FusionResult};
pub use facts::{ConcurrentFactStore, Fact, FactStore, RelationSchema, Tuple, Value, ValueType};
pub use fusion::{
    AttributeValue, BatchOutcome, ConfidencePolicy, ConflictReporter, Explanation, Provenance,
    Resolution, ResolvedRecord, Resolver,
};
pub use output::WarehouseRow;
pub use rules::{compile, RuleId, RuleSet, RuleSetHandle, BUILTIN_RULES};
