//! Path predicates over event payloads
//!
//! A [`Predicate`] is parsed once from JSONPath-flavoured text and then
//! evaluated any number of times against payload trees:
//!
//! ```text
//! $.type == "transaction.created"
//! $[?(@.type == "transaction.created" && @.data.files[*].mimetype == "text/plain")]
//! $..files[?(@.size > 1024)]
//! ```
//!
//! Evaluation is lazy, side-effect free and never mutates the payload.

pub mod ast;
mod eval;
mod parser;

pub use ast::{CmpOp, FilterExpr, LeafTest, Operand, Path, PathRoot, Segment, Selector};
pub use eval::{Binding, Location, PathElement};

use crate::utils::{DispatchError, DispatchResult};
use serde_json::Value;
use std::path::Path as FsPath;

/// A parsed, immutable route predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    source_name: String,
    text: String,
    path: Path,
    test: Option<LeafTest>,
}

impl Predicate {
    /// Parse inline predicate text.
    pub fn parse(text: &str) -> DispatchResult<Self> {
        Self::parse_named("<inline>", text)
    }

    /// Parse predicate text, naming its origin in any error.
    pub fn parse_named(source_name: impl Into<String>, text: &str) -> DispatchResult<Self> {
        let source_name = source_name.into();
        let (path, test) = parser::parse(&source_name, text)?;
        Ok(Self {
            source_name,
            text: text.trim().to_string(),
            path,
            test,
        })
    }

    /// Load a predicate from a text file. One file describes one route.
    pub fn from_file(path: impl AsRef<FsPath>) -> DispatchResult<Self> {
        let path = path.as_ref();
        let source_name = path.display().to_string();
        let text = std::fs::read_to_string(path)
            .map_err(|e| DispatchError::routing(&source_name, 0, format!("cannot read file: {}", e)))?;
        Self::parse_named(source_name, &text)
    }

    /// Every binding of this predicate in `payload`, lazily, in document order.
    pub fn matches<'a>(&'a self, payload: &'a Value) -> impl Iterator<Item = Binding<'a>> + 'a {
        eval::evaluate(&self.path, self.test.as_ref(), payload)
    }

    pub fn is_match(&self, payload: &Value) -> bool {
        self.matches(payload).next().is_some()
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Free-function form of [`Predicate::matches`].
pub fn matches<'a>(predicate: &'a Predicate, payload: &'a Value) -> impl Iterator<Item = Binding<'a>> + 'a {
    predicate.matches(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn payload() -> Value {
        json!({
            "specversion": "1.0",
            "type": "transaction.created",
            "source": "/catalog/ingest",
            "id": "evt-1",
            "data": {
                "transaction": {"_id": 42, "submitter": "alice", "instrument": "I1", "project": "P1"},
                "files": [
                    {"path": "data/a.txt", "size": 10, "mimetype": "text/plain"},
                    {"path": "data/b.csv", "size": 2048, "mimetype": "text/csv"},
                    {"path": "raw/c.bin", "size": 4096, "mimetype": "application/octet-stream"}
                ],
                "tags": ["raw", "calibrated"]
            }
        })
    }

    fn locations(predicate: &str, payload: &Value) -> Vec<String> {
        let predicate = Predicate::parse(predicate).expect("predicate should parse");
        predicate
            .matches(payload)
            .map(|b| b.location.to_string())
            .collect()
    }

    #[test]
    fn should_match_top_level_equality() {
        let payload = payload();
        let predicate = Predicate::parse(r#"$.type == "transaction.created""#).unwrap();

        let bindings: Vec<_> = predicate.matches(&payload).collect();

        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].value, &json!("transaction.created"));
        assert_eq!(bindings[0].location.to_string(), "$['type']");
    }

    #[test]
    fn should_not_match_other_event_types() {
        let payload = payload();
        let predicate = Predicate::parse("$.type == 'transaction.deleted'").unwrap();

        assert!(!predicate.is_match(&payload));
    }

    #[test]
    fn should_match_root_filter_once() {
        let payload = json!([payload()]);

        let found = locations("$[?(@.type = 'transaction.created')]", &payload);

        assert_eq!(found, vec!["$[0]"]);
    }

    #[test]
    fn should_follow_field_access_and_indices() {
        let payload = payload();

        assert_eq!(locations("$.data.files[0].path", &payload), vec!["$['data']['files'][0]['path']"]);
        assert_eq!(locations("$.data.files[-1].size", &payload), vec!["$['data']['files'][2]['size']"]);
        assert!(locations("$.data.files[7]", &payload).is_empty());
        assert!(locations("$.data.missing.path", &payload).is_empty());
    }

    #[test]
    fn should_expand_wildcards_in_order() {
        let payload = payload();

        let found = locations("$.data.files[*].path", &payload);

        assert_eq!(
            found,
            vec![
                "$['data']['files'][0]['path']",
                "$['data']['files'][1]['path']",
                "$['data']['files'][2]['path']",
            ]
        );
    }

    #[test]
    fn should_descend_recursively_in_pre_order() {
        let payload = json!({"a": {"size": 1, "b": {"size": 2}}, "size": 0});

        let predicate = Predicate::parse("$..size").unwrap();
        let values: Vec<_> = predicate.matches(&payload).map(|b| b.value.clone()).collect();

        // root first, then members in map order
        assert_eq!(values, vec![json!(0), json!(1), json!(2)]);
    }

    #[test]
    fn should_filter_on_leaf_values() {
        let payload = payload();

        assert_eq!(
            locations("$.data.files[?(@.size > 1024)].path", &payload),
            vec!["$['data']['files'][1]['path']", "$['data']['files'][2]['path']"]
        );
        assert_eq!(
            locations("$.data.files[?(@.mimetype == 'text/plain')]", &payload),
            vec!["$['data']['files'][0]"]
        );
        assert_eq!(
            locations("$.data.files[?(@.path contains 'raw/')]", &payload),
            vec!["$['data']['files'][2]"]
        );
        assert_eq!(
            locations("$.data[?(@ contains 'calibrated')]", &payload),
            vec!["$['data']['tags']"]
        );
        assert_eq!(
            locations("$.data.files[?(@.mimetype in ['text/csv', 'text/plain'])]", &payload),
            vec!["$['data']['files'][0]", "$['data']['files'][1]"]
        );
    }

    #[test]
    fn should_not_match_across_incompatible_types() {
        let payload = payload();

        assert!(locations("$.data.transaction[?(@ == '42')]", &payload).is_empty());
        assert!(locations("$.data.files[?(@.size == '10')]", &payload).is_empty());
        assert!(locations("$.data.files[?(@.path > 3)]", &payload).is_empty());
    }

    #[test]
    fn should_compare_against_document_root_inside_filters() {
        let payload = json!({
            "wanted": "text/csv",
            "files": [{"mimetype": "text/plain"}, {"mimetype": "text/csv"}]
        });

        assert_eq!(locations("$.files[?(@.mimetype == $.wanted)]", &payload), vec!["$['files'][1]"]);
    }

    #[test]
    fn should_support_existence_and_negation() {
        let payload = json!({"items": [{"id": 1}, {"name": "x"}, {"id": 2, "hidden": true}]});

        assert_eq!(locations("$.items[?(@.id)]", &payload), vec!["$['items'][0]", "$['items'][2]"]);
        assert_eq!(
            locations("$.items[?(@.id && !@.hidden)]", &payload),
            vec!["$['items'][0]"]
        );
        assert_eq!(
            locations("$.items[?(@.name or @.hidden == true)]", &payload),
            vec!["$['items'][1]", "$['items'][2]"]
        );
    }

    #[test]
    fn should_select_unions_and_slices() {
        let payload = json!({"xs": [10, 11, 12, 13], "a": 1, "b": 2});

        assert_eq!(locations("$['a','b']", &payload), vec!["$['a']", "$['b']"]);
        assert_eq!(locations("$.xs[1:3]", &payload), vec!["$['xs'][1]", "$['xs'][2]"]);
        assert_eq!(locations("$.xs[::-2]", &payload), vec!["$['xs'][3]", "$['xs'][1]"]);
    }

    #[test]
    fn should_match_slices_with_huge_steps() {
        let payload = json!({"xs": [0, 1, 2]});

        assert_eq!(locations("$.xs[1::9223372036854775807]", &payload), vec!["$['xs'][1]"]);
        assert_eq!(locations("$.xs[1::-9223372036854775808]", &payload), vec!["$['xs'][1]"]);
    }

    #[test]
    fn should_leave_payload_untouched() {
        let payload = payload();
        let before = payload.clone();
        let predicate = Predicate::parse("$..*").unwrap();

        let count = predicate.matches(&payload).count();

        assert!(count > 10);
        assert_eq!(payload, before);
    }

    #[test]
    fn should_evaluate_lazily() {
        let payload = payload();
        let predicate = Predicate::parse("$..*").unwrap();

        let first = predicate.matches(&payload).next().expect("at least one binding");

        assert!(first.location.to_string().starts_with("$['"));
    }

    #[test]
    fn should_load_predicate_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# created transactions only").unwrap();
        writeln!(file, "$.type == \"transaction.created\"").unwrap();

        let predicate = Predicate::from_file(file.path()).unwrap();

        assert!(predicate.is_match(&payload()));
        assert_eq!(predicate.source_name(), file.path().display().to_string());
    }

    #[test]
    fn should_fail_for_missing_predicate_file() {
        let err = Predicate::from_file("/nonexistent/route.jsonpath").unwrap_err();

        assert!(matches!(err, DispatchError::RoutingConfiguration { .. }));
    }
}
