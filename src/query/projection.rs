//! Projection parsing
//!
//! Validates a projection document against the query's predicate tree and
//! precomputes the properties the planner consults: whether the full
//! document is needed, and which fields a covering index must supply.

use serde_json::Value;

use super::errors::{QueryError, QueryResult};
use super::expr::{MatchExpr, MatchType};
use super::parser;

/// A validated projection
#[derive(Debug, Clone)]
pub struct ParsedProjection {
    spec: Value,
    requires_document: bool,
    required_fields: Vec<String>,
    wants_text_score: bool,
}

impl ParsedProjection {
    /// Parses and validates `projection` against the normalized predicate
    /// root.
    pub fn make(projection: &Value, root: &MatchExpr) -> QueryResult<ParsedProjection> {
        let fields = projection
            .as_object()
            .ok_or_else(|| QueryError::bad_value("projection must be an object"))?;

        let mut includes = false;
        let mut excludes = false;
        let mut requires_document = false;
        let mut required_fields = Vec::new();
        let mut wants_text_score = false;

        for (name, value) in fields {
            if let Some(obj) = value.as_object() {
                if let Some(meta) = obj.get("$meta") {
                    if meta.as_str() != Some("textScore") {
                        return Err(QueryError::bad_value("unsupported $meta projection"));
                    }
                    if !root.has_node(MatchType::Text) {
                        return Err(QueryError::bad_value(
                            "$meta: textScore requires a text expression in the query",
                        ));
                    }
                    wants_text_score = true;
                    continue;
                }
                if let Some(slice) = obj.get("$slice") {
                    let valid = slice.is_i64()
                        || slice
                            .as_array()
                            .map(|a| a.len() == 2 && a.iter().all(Value::is_i64))
                            .unwrap_or(false);
                    if !valid {
                        return Err(QueryError::bad_value(
                            "$slice takes a number or a [skip, limit] pair",
                        ));
                    }
                    requires_document = true;
                    continue;
                }
                if let Some(elem) = obj.get("$elemMatch") {
                    // The sub-filter must be grammatical on its own.
                    parser::parse(elem)?;
                    requires_document = true;
                    continue;
                }
                return Err(QueryError::bad_value(format!(
                    "unsupported projection operator for field '{}'",
                    name
                )));
            }

            if truthy(value) {
                includes = true;
                required_fields.push(name.clone());
            } else if name == "_id" {
                // _id exclusion composes with either projection style.
            } else {
                excludes = true;
            }
        }

        if includes && excludes {
            return Err(QueryError::bad_value(
                "cannot mix including and excluding fields",
            ));
        }

        // Exclusion-style projections keep the rest of the document, so the
        // full document must be fetched.
        if excludes {
            requires_document = true;
            required_fields.clear();
        }

        Ok(ParsedProjection {
            spec: projection.clone(),
            requires_document,
            required_fields,
            wants_text_score,
        })
    }

    /// The raw projection document
    pub fn spec(&self) -> &Value {
        &self.spec
    }

    /// True if the projection cannot be computed from index keys alone
    pub fn requires_document(&self) -> bool {
        self.requires_document
    }

    /// Fields a covering index must supply (inclusion projections only)
    pub fn required_fields(&self) -> &[String] {
        &self.required_fields
    }

    /// True if the projection extracts the text score
    pub fn wants_text_score(&self) -> bool {
        self.wants_text_score
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64() != Some(0.0),
        Value::Null => false,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text_root() -> MatchExpr {
        MatchExpr::Text {
            search: "s".into(),
            language: None,
        }
    }

    fn plain_root() -> MatchExpr {
        MatchExpr::And(vec![])
    }

    #[test]
    fn test_inclusion_tracks_required_fields() {
        let proj = ParsedProjection::make(&json!({"_id": 0, "a": 1, "b": 1}), &plain_root())
            .unwrap();
        assert!(!proj.requires_document());
        assert_eq!(proj.required_fields(), ["a", "b"]);
    }

    #[test]
    fn test_exclusion_requires_document() {
        let proj = ParsedProjection::make(&json!({"secret": 0}), &plain_root()).unwrap();
        assert!(proj.requires_document());
        assert!(proj.required_fields().is_empty());
    }

    #[test]
    fn test_mixed_inclusion_exclusion_rejected() {
        assert!(ParsedProjection::make(&json!({"a": 1, "b": 0}), &plain_root()).is_err());
    }

    #[test]
    fn test_meta_text_score_requires_text_node() {
        let spec = json!({"score": {"$meta": "textScore"}});
        assert!(ParsedProjection::make(&spec, &plain_root()).is_err());

        let proj = ParsedProjection::make(&spec, &text_root()).unwrap();
        assert!(proj.wants_text_score());
    }

    #[test]
    fn test_unknown_meta_rejected() {
        let spec = json!({"score": {"$meta": "somethingElse"}});
        assert!(ParsedProjection::make(&spec, &text_root()).is_err());
    }

    #[test]
    fn test_slice_forms() {
        assert!(ParsedProjection::make(&json!({"arr": {"$slice": 3}}), &plain_root()).is_ok());
        assert!(
            ParsedProjection::make(&json!({"arr": {"$slice": [2, 3]}}), &plain_root()).is_ok()
        );
        assert!(
            ParsedProjection::make(&json!({"arr": {"$slice": "x"}}), &plain_root()).is_err()
        );
    }

    #[test]
    fn test_elem_match_validates_sub_filter() {
        assert!(ParsedProjection::make(
            &json!({"arr": {"$elemMatch": {"x": {"$gt": 1}}}}),
            &plain_root()
        )
        .is_ok());
        assert!(ParsedProjection::make(
            &json!({"arr": {"$elemMatch": {"x": {"$no_such_op": 1}}}}),
            &plain_root()
        )
        .is_err());
    }
}
