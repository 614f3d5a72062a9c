// Relation schemas
//
// A schema fixes the key name plus the ordered, typed value fields of a base relation.
// The key always sits in position 0 of rule atoms and is not part of the value tuple.

use crate::facts::value::{Value, ValueType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One typed value field of a relation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub ty: ValueType,
}

/// Declared shape of a base fact relation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationSchema {
    pub name: String,
    /// Name of the record identifier column (documentation only)
    pub key_name: String,
    pub fields: Vec<FieldDef>,
    /// Allow more than one fact per key
    pub multi: bool,
}

impl RelationSchema {
    pub fn new(name: impl Into<String>, key_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_name: key_name.into(),
            fields: Vec::new(),
            multi: false,
        }
    }

    /// Builder-style field addition
    pub fn field(mut self, name: impl Into<String>, ty: ValueType) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            ty,
        });
        self
    }

    /// Builder-style multi flag
    pub fn multi(mut self) -> Self {
        self.multi = true;
        self
    }

    /// Arity as seen by rule atoms (key + fields)
    pub fn atom_arity(&self) -> usize {
        self.fields.len() + 1
    }

    /// Check a value tuple against this schema
    ///
    /// Returns a human-readable description of the first mismatch.
    pub fn check(&self, values: &[Value]) -> Result<(), String> {
        if values.len() != self.fields.len() {
            return Err(format!(
                "expected {} values, got {}",
                self.fields.len(),
                values.len()
            ));
        }

        for (value, field) in values.iter().zip(&self.fields) {
            if !value.conforms_to(&field.ty) {
                return Err(format!(
                    "field {} expects {}, got {} {}",
                    field.name,
                    field.ty,
                    value.kind(),
                    value
                ));
            }
        }

        Ok(())
    }
}

impl fmt::Display for RelationSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "decl {}({}", self.name, self.key_name)?;
        for field in &self.fields {
            write!(f, ", {}: {}", field.name, field.ty)?;
        }
        write!(f, ")")?;
        if self.multi {
            write!(f, " multi")?;
        }
        write!(f, ".")
    }
}
