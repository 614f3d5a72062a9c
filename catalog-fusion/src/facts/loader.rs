// JSON-lines fact ingestion
//
// Each non-blank line is one fact: {"relation": "...", "key": "...", "values": [...]}.
// Malformed lines and rejected facts are collected in the report; ingestion never
// stops early on a bad fact.

use crate::error::FactError;
use crate::facts::{Fact, FactStore};
use serde::Serialize;
use std::io::BufRead;
use tracing::{debug, warn};

/// Why a single input line was not stored
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Rejection {
    /// Line is not a valid fact object
    Malformed { message: String },
    /// FactStore refused the fact
    Rejected {
        relation: String,
        key: String,
        message: String,
    },
}

/// A rejected input line
#[derive(Debug, Clone, Serialize)]
pub struct RejectedLine {
    pub line: usize,
    #[serde(flatten)]
    pub rejection: Rejection,
}

/// Outcome of loading one fact stream
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub accepted: usize,
    pub rejected: Vec<RejectedLine>,
}

impl IngestReport {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }

    fn reject_malformed(&mut self, line: usize, message: String) {
        warn!(line, "Malformed fact line: {}", message);
        self.rejected.push(RejectedLine {
            line,
            rejection: Rejection::Malformed { message },
        });
    }

    fn reject_fact(&mut self, line: usize, fact: &Fact, error: &FactError) {
        warn!(
            line,
            relation = %fact.relation,
            key = %fact.key,
            "Fact rejected: {}",
            error
        );
        self.rejected.push(RejectedLine {
            line,
            rejection: Rejection::Rejected {
                relation: fact.relation.clone(),
                key: fact.key.clone(),
                message: error.to_string(),
            },
        });
    }
}

/// Load JSON-lines facts into `store`
///
/// Lines are decoded individually, so a line that is not valid UTF-8 is reported
/// as malformed like any other bad line. Only I/O failures of the reader are
/// returned as errors.
pub fn load_json_lines<R: BufRead>(
    mut reader: R,
    store: &mut FactStore,
) -> std::io::Result<IngestReport> {
    let mut report = IngestReport::default();
    let mut buf = Vec::new();
    let mut line_no = 0;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        line_no += 1;

        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line,
            Err(e) => {
                report.reject_malformed(line_no, format!("invalid UTF-8: {}", e));
                continue;
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let fact: Fact = match serde_json::from_str(trimmed) {
            Ok(fact) => fact,
            Err(e) => {
                report.reject_malformed(line_no, e.to_string());
                continue;
            }
        };

        match store.put(&fact.relation, &fact.key, fact.values.clone()) {
            Ok(()) => report.accepted += 1,
            Err(e) => report.reject_fact(line_no, &fact, &e),
        }
    }

    debug!(
        accepted = report.accepted,
        rejected = report.rejected.len(),
        "Fact ingestion complete"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::{RelationSchema, Value, ValueType};

    fn store() -> FactStore {
        let mut store = FactStore::new();
        store.register(RelationSchema::new("marc_title", "Barcode").field("Title", ValueType::String));
        store
    }

    #[test]
    fn test_bad_lines_do_not_abort_ingestion() {
        let input = r#"
{"relation": "marc_title", "key": "B1", "values": ["Dune"]}
not json at all
{"relation": "marc_title", "key": "B2", "values": [42]}
{"relation": "unknown", "key": "B3", "values": ["x"]}
{"relation": "marc_title", "key": "B3", "values": ["Emma"]}
"#;
        let mut store = store();
        let report = load_json_lines(input.as_bytes(), &mut store).unwrap();

        assert_eq!(report.accepted, 2);
        assert_eq!(report.rejected.len(), 3);
        assert_eq!(report.rejected[0].line, 3);
        assert!(matches!(report.rejected[0].rejection, Rejection::Malformed { .. }));
        assert!(matches!(report.rejected[1].rejection, Rejection::Rejected { .. }));
        assert_eq!(store.lookup("marc_title", "B3"), &[vec![Value::from("Emma")]]);
    }

    #[test]
    fn test_undecodable_line_is_rejected_and_loading_continues() {
        let mut input = Vec::new();
        input.extend_from_slice(b"{\"relation\": \"marc_title\", \"key\": \"B1\", \"values\": [\"Dune\"]}\n");
        input.extend_from_slice(b"{\"relation\": \"marc_title\", \"key\": \"B2\", \"values\": [\"\xff\xfe\"]}\n");
        input.extend_from_slice(b"{\"relation\": \"marc_title\", \"key\": \"B3\", \"values\": [\"Emma\"]}");

        let mut store = store();
        let report = load_json_lines(input.as_slice(), &mut store).unwrap();

        assert_eq!(report.accepted, 2);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].line, 2);
        assert!(matches!(report.rejected[0].rejection, Rejection::Malformed { .. }));
        assert_eq!(store.lookup("marc_title", "B3"), &[vec![Value::from("Emma")]]);
        assert!(store.lookup("marc_title", "B2").is_empty());
    }
}
