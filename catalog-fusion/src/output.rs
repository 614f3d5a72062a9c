//! Warehouse row flattening
//!
//! A [`ResolvedRecord`] becomes one flat row: the key, one column per resolved
//! attribute, the names of unresolved attributes, and a provenance side channel.
//! One-column tuples become scalars; wider tuples become arrays; merged
//! attributes become arrays of those.

use crate::facts::{Tuple, Value};
use crate::fusion::{AttributeValue, Resolution, ResolvedRecord};
use serde::Serialize;
use std::collections::BTreeMap;

/// Provenance summary for one warehouse column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnProvenance {
    pub rule: String,
    pub sources: Vec<String>,
    pub conflicting: bool,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WarehouseRow {
    pub key: String,
    #[serde(flatten)]
    pub columns: BTreeMap<String, serde_json::Value>,
    pub unresolved: Vec<String>,
    pub provenance: BTreeMap<String, ColumnProvenance>,
}

impl From<&ResolvedRecord> for WarehouseRow {
    fn from(record: &ResolvedRecord) -> Self {
        let mut columns = BTreeMap::new();
        let mut unresolved = Vec::new();
        let mut provenance = BTreeMap::new();

        for (name, resolution) in &record.attributes {
            match resolution {
                Resolution::Resolved {
                    value,
                    provenance: p,
                } => {
                    let column = match value {
                        AttributeValue::Single(tuple) => tuple_json(tuple),
                        AttributeValue::Merged(tuples) => {
                            serde_json::Value::Array(tuples.iter().map(tuple_json).collect())
                        }
                    };
                    columns.insert(name.clone(), column);
                    provenance.insert(
                        name.clone(),
                        ColumnProvenance {
                            rule: p.contributing_rule.to_string(),
                            sources: p.sources.clone(),
                            conflicting: p.conflicting,
                            confidence: p.confidence,
                        },
                    );
                }
                Resolution::Unresolved => unresolved.push(name.clone()),
            }
        }

        Self {
            key: record.key.clone(),
            columns,
            unresolved,
            provenance,
        }
    }
}

fn tuple_json(tuple: &Tuple) -> serde_json::Value {
    match tuple.as_slice() {
        [single] => value_json(single),
        values => serde_json::Value::Array(values.iter().map(value_json).collect()),
    }
}

fn value_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Str(s) => serde_json::Value::String(s.clone()),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Float(x) => serde_json::Number::from_f64(*x)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::List(items) => serde_json::Value::Array(items.iter().map(value_json).collect()),
    }
}
