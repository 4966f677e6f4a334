//! Query shape keys
//!
//! Encodes (normalized predicate tree, sort, projection) into a compact
//! byte key. Queries expected to share an optimal plan share a key;
//! comparison literals are deliberately left out of the encoding so that
//! `{a: 1}` and `{a: 2}` collapse onto the same shape. The encoding is
//! purely structural and stable across processes.

use std::fmt;

use serde_json::Value;

use super::expr::MatchExpr;

/// Opaque shape identifier; equality and ordering are byte compares.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShapeKey(String);

impl ShapeKey {
    /// Returns the raw key bytes
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShapeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Builds the shape key for a canonicalized query. Appenders run in fixed
/// order: tree, sort, projection.
pub fn encode(root: &MatchExpr, sort: &Value, projection: &Value) -> ShapeKey {
    let mut out = String::new();
    encode_expr_into(root, &mut out);
    encode_sort_into(sort, &mut out);
    encode_projection_into(projection, &mut out);
    ShapeKey(out)
}

/// Encodes a single subtree; used for the tertiary sibling ordering key.
pub fn encode_expr(expr: &MatchExpr) -> String {
    let mut out = String::new();
    encode_expr_into(expr, &mut out);
    out
}

fn encode_expr_into(expr: &MatchExpr, out: &mut String) {
    out.push_str(expr.match_type().shape_tag());
    out.push_str(expr.path());
    for child in expr.children() {
        encode_expr_into(child, out);
    }
}

fn is_text_score_meta(value: &Value) -> bool {
    value
        .as_object()
        .and_then(|obj| obj.get("$meta"))
        .and_then(Value::as_str)
        == Some("textScore")
}

fn encode_sort_into(sort: &Value, out: &mut String) {
    let Some(fields) = sort.as_object() else {
        return;
    };
    for (name, value) in fields {
        if is_text_score_meta(value) {
            out.push('t');
        } else if value.as_i64() == Some(1) || value.as_f64() == Some(1.0) {
            out.push('a');
        } else {
            out.push('d');
        }
        out.push_str(name);
    }
}

fn encode_projection_into(projection: &Value, out: &mut String) {
    let Some(fields) = projection.as_object() else {
        return;
    };
    if fields.is_empty() {
        return;
    }
    out.push('p');
    for (name, value) in fields {
        // The canonical text of the value distinguishes special operators
        // ($meta, $elemMatch, $slice) as well as inclusion vs exclusion.
        out.push_str(&value.to_string());
        out.push_str(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::expr::{ComparisonOp, MatchExpr};
    use serde_json::json;

    fn eq(path: &str, value: Value) -> MatchExpr {
        MatchExpr::Comparison {
            path: path.into(),
            op: ComparisonOp::Eq,
            value,
        }
    }

    #[test]
    fn test_literals_do_not_affect_key() {
        let a = encode(&eq("a", json!(1)), &json!({}), &json!({}));
        let b = encode(&eq("a", json!(2)), &json!({}), &json!({}));
        assert_eq!(a, b);
    }

    #[test]
    fn test_operator_changes_key() {
        let eq_key = encode(&eq("a", json!(1)), &json!({}), &json!({}));
        let gt = MatchExpr::Comparison {
            path: "a".into(),
            op: ComparisonOp::Gt,
            value: json!(1),
        };
        let gt_key = encode(&gt, &json!({}), &json!({}));
        assert_ne!(eq_key, gt_key);
    }

    #[test]
    fn test_path_changes_key() {
        let a = encode(&eq("a", json!(1)), &json!({}), &json!({}));
        let b = encode(&eq("b", json!(1)), &json!({}), &json!({}));
        assert_ne!(a, b);
    }

    #[test]
    fn test_sort_direction_and_field() {
        let root = eq("a", json!(1));
        let asc = encode(&root, &json!({"a": 1}), &json!({}));
        let desc = encode(&root, &json!({"a": -1}), &json!({}));
        let other = encode(&root, &json!({"b": 1}), &json!({}));
        assert_ne!(asc, desc);
        assert_ne!(asc, other);
        assert!(asc.as_str().contains("aa"));
        assert!(desc.as_str().contains("da"));
    }

    #[test]
    fn test_sort_meta_text_score() {
        let root = eq("a", json!(1));
        let meta = encode(&root, &json!({"s": {"$meta": "textScore"}}), &json!({}));
        let asc = encode(&root, &json!({"s": 1}), &json!({}));
        assert_ne!(meta, asc);
        assert!(meta.as_str().contains("ts"));
    }

    #[test]
    fn test_projection_operators_diverge() {
        let root = eq("a", json!(1));
        let slice = encode(&root, &json!({}), &json!({"arr": {"$slice": 3}}));
        let elem = encode(&root, &json!({}), &json!({"arr": {"$elemMatch": {"x": 1}}}));
        let plain = encode(&root, &json!({}), &json!({"arr": 1}));
        assert_ne!(slice, elem);
        assert_ne!(slice, plain);
    }

    #[test]
    fn test_empty_projection_adds_nothing() {
        let root = eq("a", json!(1));
        let none = encode(&root, &json!({}), &json!({}));
        assert!(!none.as_str().contains('p'));
    }

    #[test]
    fn test_key_is_deterministic() {
        let root = MatchExpr::And(vec![eq("a", json!(1)), eq("b", json!(2))]);
        let sort = json!({"a": -1});
        let proj = json!({"_id": 0, "a": 1});
        assert_eq!(encode(&root, &sort, &proj), encode(&root, &sort, &proj));
    }
}
