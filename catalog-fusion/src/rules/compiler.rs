// Rule compiler
//
// Turns a parsed program into an immutable RuleSet:
// 1. Collect base relation declarations and group rules by head relation,
//    keeping alternatives in declaration order (that order is the priority)
// 2. Validate every rule (known relations, arities, key discipline, safety)
//    and build its execution plan
// 3. Stratify derived relations by dependency, rejecting cycles

use crate::error::{CompileError, CompileResult};
use crate::facts::{RelationSchema, Value};
use crate::rules::ast::{Atom, CmpOp, DeriveDecl, Literal, Program, RuleDef, Statement, Term};
use crate::rules::parser::parse_program;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use tracing::debug;

/// Field names taken by warehouse rows; visible derived relations cannot use them
pub const RESERVED_ATTRIBUTE_NAMES: [&str; 3] = ["key", "unresolved", "provenance"];

/// Identity of one alternative rule: `relation#ordinal` (1-based)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(String);

impl RuleId {
    fn new(relation: &str, ordinal: usize) -> Self {
        RuleId(format!("{}#{}", relation, ordinal))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where an atom's tuples come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationRef {
    Base(String),
    Derived(String),
}

impl RelationRef {
    pub fn name(&self) -> &str {
        match self {
            RelationRef::Base(name) | RelationRef::Derived(name) => name,
        }
    }
}

/// How one non-key atom position is matched against a tuple value
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    /// First occurrence of a variable: bind it
    Bind(usize),
    /// Variable already bound: values must be equal
    Bound(usize),
    Const(Value),
    Wildcard,
}

/// Comparison operand, resolved to a bound variable or constant
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Var(usize),
    Const(Value),
}

/// One step of a rule's execution plan
///
/// `literal` is the index of the originating body literal, used by explanations.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Scan {
        relation: RelationRef,
        slots: Vec<Slot>,
        literal: usize,
    },
    Absent {
        relation: RelationRef,
        slots: Vec<Slot>,
        literal: usize,
    },
    Compare {
        left: Operand,
        op: CmpOp,
        right: Operand,
        literal: usize,
    },
    Bind {
        var: usize,
        value: Operand,
        literal: usize,
    },
}

impl Step {
    pub fn literal(&self) -> usize {
        match self {
            Step::Scan { literal, .. }
            | Step::Absent { literal, .. }
            | Step::Compare { literal, .. }
            | Step::Bind { literal, .. } => *literal,
        }
    }
}

/// A validated rule with its execution plan
///
/// Variable 0 is always the key variable and is bound before the first step.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub id: RuleId,
    /// Position among all rules of the program
    pub declaration_index: usize,
    pub def: RuleDef,
    pub steps: Vec<Step>,
    /// Head values after the key
    pub head: Vec<Operand>,
    pub var_names: Vec<String>,
    /// Relations of positive body atoms, first-use order, no duplicates
    pub source_relations: Vec<String>,
}

/// A derived relation with its ordered alternatives
#[derive(Debug, Clone)]
pub struct DerivedRelation {
    pub name: String,
    /// Atom arity including the key
    pub arity: usize,
    pub merge: bool,
    pub internal: bool,
    pub stratum: usize,
    pub rules: Vec<CompiledRule>,
}

/// Derived relations whose dependencies lie in earlier strata or base facts
#[derive(Debug, Clone)]
pub struct Stratum {
    pub index: usize,
    pub relations: Vec<DerivedRelation>,
}

/// Compiled, immutable rule set
///
/// Shared across evaluations as `Arc<RuleSet>`. The fingerprint covers the canonical
/// rule text in declaration order, so reordering alternatives yields a different
/// fingerprint.
#[derive(Debug, Clone)]
pub struct RuleSet {
    schemas: Vec<RelationSchema>,
    schema_index: HashMap<String, usize>,
    strata: Vec<Stratum>,
    derived_index: HashMap<String, (usize, usize)>,
    canonical_text: String,
    fingerprint: String,
}

impl RuleSet {
    /// Declared base relations in declaration order
    pub fn schemas(&self) -> impl Iterator<Item = &RelationSchema> {
        self.schemas.iter()
    }

    pub fn schema(&self, relation: &str) -> Option<&RelationSchema> {
        self.schema_index.get(relation).map(|&i| &self.schemas[i])
    }

    pub fn is_base(&self, relation: &str) -> bool {
        self.schema_index.contains_key(relation)
    }

    pub fn strata(&self) -> &[Stratum] {
        &self.strata
    }

    pub fn derived(&self, relation: &str) -> Option<&DerivedRelation> {
        self.derived_index
            .get(relation)
            .map(|&(s, r)| &self.strata[s].relations[r])
    }

    /// Derived relations in evaluation order
    pub fn derived_relations(&self) -> impl Iterator<Item = &DerivedRelation> {
        self.strata.iter().flat_map(|s| s.relations.iter())
    }

    pub fn rule_count(&self) -> usize {
        self.derived_relations().map(|d| d.rules.len()).sum()
    }

    pub fn canonical_text(&self) -> &str {
        &self.canonical_text
    }

    /// Hex SHA-256 of the canonical rule text
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

/// Parse and compile rule text
pub fn compile(source: &str) -> CompileResult<RuleSet> {
    let program = parse_program(source)?;
    compile_program(&program)
}

/// Compile an already parsed program
pub fn compile_program(program: &Program) -> CompileResult<RuleSet> {
    // Step 1: Base declarations
    let mut schemas: Vec<RelationSchema> = Vec::new();
    let mut schema_index: HashMap<String, usize> = HashMap::new();
    for statement in &program.statements {
        if let Statement::Decl { schema, .. } = statement {
            if schema_index.contains_key(&schema.name) {
                return Err(CompileError::DuplicateDeclaration {
                    relation: schema.name.clone(),
                });
            }
            schema_index.insert(schema.name.clone(), schemas.len());
            schemas.push(schema.clone());
        }
    }

    // Step 2: Group alternatives by head relation, declaration order preserved
    let mut groups: Vec<(String, Vec<&RuleDef>)> = Vec::new();
    let mut group_index: HashMap<String, usize> = HashMap::new();
    for statement in &program.statements {
        if let Statement::Rule(rule) = statement {
            let name = &rule.head.relation;
            let ordinal = match group_index.get(name) {
                Some(&i) => {
                    groups[i].1.push(rule);
                    groups[i].1.len()
                }
                None => {
                    group_index.insert(name.clone(), groups.len());
                    groups.push((name.clone(), vec![rule]));
                    1
                }
            };

            if schema_index.contains_key(name) {
                return Err(CompileError::InvalidRule {
                    rule: rule_label(&RuleId::new(name, ordinal), rule.line),
                    reason: format!("head relation {} is declared as a base fact relation", name),
                });
            }
        }
    }

    let mut derive_decls: HashMap<String, &DeriveDecl> = HashMap::new();
    for statement in &program.statements {
        if let Statement::Derive(decl) = statement {
            if !group_index.contains_key(&decl.relation) {
                return Err(CompileError::InvalidRule {
                    rule: decl.to_string(),
                    reason: format!("no rule derives {}", decl.relation),
                });
            }
            if derive_decls.insert(decl.relation.clone(), decl).is_some() {
                return Err(CompileError::DuplicateDeclaration {
                    relation: decl.relation.clone(),
                });
            }
        }
    }

    for (name, rules) in &groups {
        let internal = derive_decls.get(name).map(|d| d.internal).unwrap_or(false);
        if !internal && RESERVED_ATTRIBUTE_NAMES.contains(&name.as_str()) {
            return Err(CompileError::InvalidRule {
                rule: rule_label(&RuleId::new(name, 1), rules[0].line),
                reason: format!(
                    "{} is a reserved output field; rename the relation or declare it internal",
                    name
                ),
            });
        }
    }

    // Derived arity comes from the first head; later heads must agree
    let mut derived_arity: HashMap<&str, usize> = HashMap::new();
    for (name, rules) in &groups {
        let expected = rules[0].head.terms.len();
        for (i, rule) in rules.iter().enumerate() {
            if rule.head.terms.len() != expected {
                return Err(CompileError::ArityMismatch {
                    relation: name.clone(),
                    rule: rule_label(&RuleId::new(name, i + 1), rule.line),
                    expected,
                    found: rule.head.terms.len(),
                });
            }
        }
        derived_arity.insert(name.as_str(), expected);
    }

    let catalog = RelationCatalog {
        schemas: &schemas,
        schema_index: &schema_index,
        derived_arity: &derived_arity,
    };

    // Step 3: Validate and plan each rule
    let mut declaration_index = 0;
    let mut compiled_groups: Vec<(String, Vec<CompiledRule>, BTreeSet<String>)> = Vec::new();
    for (name, rules) in &groups {
        let mut compiled = Vec::with_capacity(rules.len());
        let mut deps = BTreeSet::new();
        for (i, rule) in rules.iter().enumerate() {
            let id = RuleId::new(name, i + 1);
            let (rule, rule_deps) = compile_rule(rule, id, declaration_index, &catalog)?;
            declaration_index += 1;
            deps.extend(rule_deps);
            compiled.push(rule);
        }
        compiled_groups.push((name.clone(), compiled, deps));
    }

    // Step 4: Stratify
    let dependencies: Vec<(&str, &BTreeSet<String>)> = compiled_groups
        .iter()
        .map(|(name, _, deps)| (name.as_str(), deps))
        .collect();
    let levels: HashMap<String, usize> = stratify(&dependencies)?
        .into_iter()
        .map(|(name, level)| (name.to_string(), level))
        .collect();

    let stratum_count = levels.values().copied().max().map(|m| m + 1).unwrap_or(0);
    let mut strata: Vec<Stratum> = (0..stratum_count)
        .map(|index| Stratum {
            index,
            relations: Vec::new(),
        })
        .collect();
    let mut derived_index = HashMap::new();

    for (name, rules, _) in compiled_groups {
        let stratum = levels[name.as_str()];
        let decl = derive_decls.get(&name);
        let relation = DerivedRelation {
            arity: derived_arity[name.as_str()],
            merge: decl.map(|d| d.merge).unwrap_or(false),
            internal: decl.map(|d| d.internal).unwrap_or(false),
            stratum,
            rules,
            name,
        };
        derived_index.insert(
            relation.name.clone(),
            (stratum, strata[stratum].relations.len()),
        );
        strata[stratum].relations.push(relation);
    }

    let canonical_text = canonical_text(program);
    let fingerprint = Sha256::digest(canonical_text.as_bytes())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<String>();

    debug!(
        relations = schemas.len(),
        derived = derived_index.len(),
        strata = strata.len(),
        fingerprint = %&fingerprint[..12],
        "Rule set compiled"
    );

    Ok(RuleSet {
        schemas,
        schema_index,
        strata,
        derived_index,
        canonical_text,
        fingerprint,
    })
}

/// Known relations and their atom arities
struct RelationCatalog<'a> {
    schemas: &'a [RelationSchema],
    schema_index: &'a HashMap<String, usize>,
    derived_arity: &'a HashMap<&'a str, usize>,
}

impl RelationCatalog<'_> {
    fn resolve(&self, relation: &str) -> Option<(RelationRef, usize)> {
        if let Some(&i) = self.schema_index.get(relation) {
            return Some((
                RelationRef::Base(relation.to_string()),
                self.schemas[i].atom_arity(),
            ));
        }
        self.derived_arity
            .get(relation)
            .map(|&arity| (RelationRef::Derived(relation.to_string()), arity))
    }
}

fn rule_label(id: &RuleId, line: usize) -> String {
    format!("{} (line {})", id, line)
}

/// Variable numbering and binding state while planning one rule
struct Planner {
    label: String,
    var_index: HashMap<String, usize>,
    var_names: Vec<String>,
    bound: HashSet<usize>,
}

impl Planner {
    fn var(&mut self, name: &str) -> usize {
        if let Some(&i) = self.var_index.get(name) {
            return i;
        }
        let i = self.var_names.len();
        self.var_index.insert(name.to_string(), i);
        self.var_names.push(name.to_string());
        i
    }

    fn is_ready(&self, term: &Term) -> bool {
        match term {
            Term::Var(name) => self
                .var_index
                .get(name)
                .map(|i| self.bound.contains(i))
                .unwrap_or(false),
            Term::Const(_) | Term::Wildcard => true,
        }
    }

    fn operand(&mut self, term: &Term) -> CompileResult<Operand> {
        match term {
            Term::Var(name) => {
                let i = self.var(name);
                if self.bound.contains(&i) {
                    Ok(Operand::Var(i))
                } else {
                    Err(self.unbound(name))
                }
            }
            Term::Const(value) => Ok(Operand::Const(value.clone())),
            Term::Wildcard => Err(CompileError::InvalidRule {
                rule: self.label.clone(),
                reason: "'_' cannot be used as a comparison operand or head value".to_string(),
            }),
        }
    }

    fn relation(&self, catalog: &RelationCatalog<'_>, atom: &Atom) -> CompileResult<RelationRef> {
        catalog
            .resolve(&atom.relation)
            .map(|(relation, _)| relation)
            .ok_or_else(|| CompileError::UnknownRelation {
                relation: atom.relation.clone(),
                rule: self.label.clone(),
            })
    }

    fn unbound(&self, name: &str) -> CompileError {
        CompileError::UnboundVariable {
            variable: name.to_string(),
            rule: self.label.clone(),
        }
    }

    /// Slots for a scanned atom; binds first occurrences
    fn scan_slots(&mut self, atom: &Atom) -> Vec<Slot> {
        atom.terms[1..]
            .iter()
            .map(|term| match term {
                Term::Var(name) => {
                    let i = self.var(name);
                    if self.bound.insert(i) {
                        Slot::Bind(i)
                    } else {
                        Slot::Bound(i)
                    }
                }
                Term::Const(value) => Slot::Const(value.clone()),
                Term::Wildcard => Slot::Wildcard,
            })
            .collect()
    }

    /// Slots for an absence check; every variable must already be bound
    fn absent_slots(&mut self, atom: &Atom) -> CompileResult<Vec<Slot>> {
        atom.terms[1..]
            .iter()
            .map(|term| match term {
                Term::Var(name) => match self.var_index.get(name) {
                    Some(&i) if self.bound.contains(&i) => Ok(Slot::Bound(i)),
                    _ => Err(self.unbound(name)),
                },
                Term::Const(value) => Ok(Slot::Const(value.clone())),
                Term::Wildcard => Ok(Slot::Wildcard),
            })
            .collect()
    }

    /// Schedule every pending filter whose inputs are bound, until nothing changes
    fn schedule_ready(
        &mut self,
        pending: &mut Vec<(usize, &Literal)>,
        catalog: &RelationCatalog<'_>,
        steps: &mut Vec<Step>,
    ) -> CompileResult<()> {
        loop {
            let mut progressed = false;
            let mut i = 0;
            while i < pending.len() {
                let (literal_index, literal) = pending[i];
                let step = match literal {
                    Literal::Absent(atom) if atom.terms[1..].iter().all(|t| self.is_ready(t)) => {
                        let relation = self.relation(catalog, atom)?;
                        Some(Step::Absent {
                            relation,
                            slots: self.absent_slots(atom)?,
                            literal: literal_index,
                        })
                    }
                    Literal::Compare { left, op, right } => {
                        self.plan_compare(left, *op, right, literal_index)?
                    }
                    _ => None,
                };

                match step {
                    Some(step) => {
                        steps.push(step);
                        pending.remove(i);
                        progressed = true;
                    }
                    None => i += 1,
                }
            }
            if !progressed {
                return Ok(());
            }
        }
    }

    fn plan_compare(
        &mut self,
        left: &Term,
        op: CmpOp,
        right: &Term,
        literal: usize,
    ) -> CompileResult<Option<Step>> {
        if matches!(left, Term::Wildcard) || matches!(right, Term::Wildcard) {
            return Err(CompileError::InvalidRule {
                rule: self.label.clone(),
                reason: "'_' cannot be used as a comparison operand or head value".to_string(),
            });
        }

        match (self.is_ready(left), self.is_ready(right)) {
            (true, true) => Ok(Some(Step::Compare {
                left: self.operand(left)?,
                op,
                right: self.operand(right)?,
                literal,
            })),
            (false, true) if op == CmpOp::Eq => self.plan_binding(left, right, literal),
            (true, false) if op == CmpOp::Eq => self.plan_binding(right, left, literal),
            _ => Ok(None),
        }
    }

    fn plan_binding(
        &mut self,
        target: &Term,
        source: &Term,
        literal: usize,
    ) -> CompileResult<Option<Step>> {
        let Term::Var(name) = target else {
            return Ok(None);
        };
        let value = self.operand(source)?;
        let var = self.var(name);
        self.bound.insert(var);
        Ok(Some(Step::Bind {
            var,
            value,
            literal,
        }))
    }
}

/// Validate one rule and build its plan; returns the derived relations it reads
fn compile_rule(
    rule: &RuleDef,
    id: RuleId,
    declaration_index: usize,
    catalog: &RelationCatalog<'_>,
) -> CompileResult<(CompiledRule, BTreeSet<String>)> {
    let label = rule_label(&id, rule.line);

    let key_var = match &rule.head.terms[0] {
        Term::Var(name) => name.clone(),
        _ => {
            return Err(CompileError::InvalidRule {
                rule: label,
                reason: "first head argument must be the key variable".to_string(),
            })
        }
    };

    let mut deps = BTreeSet::new();
    let mut source_relations: Vec<String> = Vec::new();
    for literal in &rule.body {
        let Some(atom) = literal.atom() else { continue };

        let (relation, arity) =
            catalog
                .resolve(&atom.relation)
                .ok_or_else(|| CompileError::UnknownRelation {
                    relation: atom.relation.clone(),
                    rule: label.clone(),
                })?;

        if atom.terms.len() != arity {
            return Err(CompileError::ArityMismatch {
                relation: atom.relation.clone(),
                rule: label,
                expected: arity,
                found: atom.terms.len(),
            });
        }

        if atom.terms[0] != Term::Var(key_var.clone()) {
            return Err(CompileError::InvalidRule {
                rule: label,
                reason: format!(
                    "first argument of {} must be the key variable {}",
                    atom.relation, key_var
                ),
            });
        }

        if let RelationRef::Derived(name) = &relation {
            deps.insert(name.clone());
        }
        if matches!(literal, Literal::Positive(_)) && !source_relations.contains(&atom.relation) {
            source_relations.push(atom.relation.clone());
        }
    }

    let mut planner = Planner {
        label: label.clone(),
        var_index: HashMap::new(),
        var_names: Vec::new(),
        bound: HashSet::new(),
    };
    let key = planner.var(&key_var);
    planner.bound.insert(key);

    let mut pending: Vec<(usize, &Literal)> = rule
        .body
        .iter()
        .enumerate()
        .filter(|(_, literal)| !matches!(literal, Literal::Positive(_)))
        .collect();
    let mut steps = Vec::new();

    planner.schedule_ready(&mut pending, catalog, &mut steps)?;
    for (literal_index, literal) in rule.body.iter().enumerate() {
        let Literal::Positive(atom) = literal else { continue };
        let relation = planner.relation(catalog, atom)?;
        let slots = planner.scan_slots(atom);
        steps.push(Step::Scan {
            relation,
            slots,
            literal: literal_index,
        });
        planner.schedule_ready(&mut pending, catalog, &mut steps)?;
    }

    if let Some((_, literal)) = pending.first() {
        let unbound = first_unbound_var(literal, &planner).unwrap_or_default();
        return Err(planner.unbound(&unbound));
    }

    let head = rule.head.terms[1..]
        .iter()
        .map(|term| planner.operand(term))
        .collect::<CompileResult<Vec<_>>>()?;

    Ok((
        CompiledRule {
            id,
            declaration_index,
            def: rule.clone(),
            steps,
            head,
            var_names: planner.var_names,
            source_relations,
        },
        deps,
    ))
}

fn first_unbound_var(literal: &Literal, planner: &Planner) -> Option<String> {
    let terms: Vec<&Term> = match literal {
        Literal::Positive(atom) | Literal::Absent(atom) => atom.terms.iter().collect(),
        Literal::Compare { left, right, .. } => vec![left, right],
    };
    terms.into_iter().find_map(|term| match term {
        Term::Var(name) if !planner.is_ready(term) => Some(name.clone()),
        _ => None,
    })
}

/// Assign each derived relation a stratum level, rejecting cycles
///
/// Level 0 relations read only base facts; every other relation sits one level above
/// its highest derived dependency.
fn stratify<'a>(
    dependencies: &[(&'a str, &'a BTreeSet<String>)],
) -> CompileResult<HashMap<&'a str, usize>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit<'a>(
        name: &'a str,
        graph: &HashMap<&'a str, &'a BTreeSet<String>>,
        marks: &mut HashMap<&'a str, Mark>,
        levels: &mut HashMap<&'a str, usize>,
        path: &mut Vec<&'a str>,
    ) -> CompileResult<usize> {
        match marks.get(name) {
            Some(Mark::Done) => return Ok(levels[name]),
            Some(Mark::Visiting) => {
                let start = path.iter().position(|n| *n == name).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|n| n.to_string()).collect();
                cycle.push(name.to_string());
                return Err(CompileError::CyclicDependency { cycle });
            }
            None => {}
        }

        marks.insert(name, Mark::Visiting);
        path.push(name);

        let mut level = 0;
        if let Some(deps) = graph.get(name) {
            for dep in deps.iter() {
                let Some((&dep, _)) = graph.get_key_value(dep.as_str()) else {
                    continue;
                };
                level = level.max(visit(dep, graph, marks, levels, path)? + 1);
            }
        }

        path.pop();
        marks.insert(name, Mark::Done);
        levels.insert(name, level);
        Ok(level)
    }

    let graph: HashMap<&str, &BTreeSet<String>> = dependencies.iter().copied().collect();
    let mut marks = HashMap::new();
    let mut levels = HashMap::new();
    let mut path = Vec::new();

    for &(name, _) in dependencies {
        visit(name, &graph, &mut marks, &mut levels, &mut path)?;
    }

    Ok(levels)
}

fn canonical_text(program: &Program) -> String {
    let mut text = String::new();
    for statement in &program.statements {
        let line = match statement {
            Statement::Decl { schema, .. } => schema.to_string(),
            Statement::Derive(decl) => decl.to_string(),
            Statement::Rule(rule) => rule.to_string(),
        };
        text.push_str(&line);
        text.push('\n');
    }
    text
}
