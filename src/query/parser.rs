//! Filter document parsing
//!
//! Turns a raw filter document into a predicate tree. The grammar is the
//! usual document-query surface: implicit equality on plain fields,
//! operator objects (`{age: {$gte: 18}}`), and top-level logical
//! connectives. The parser always returns an `And` root; canonicalization
//! unwraps singletons afterwards.

use serde_json::Value;

use super::errors::{QueryError, QueryResult};
use super::expr::{ComparisonOp, MatchExpr};

/// Parses a filter document into a predicate tree.
pub fn parse(filter: &Value) -> QueryResult<MatchExpr> {
    let obj = filter
        .as_object()
        .ok_or_else(|| QueryError::bad_value("filter must be an object"))?;

    let mut roots = Vec::new();
    for (name, value) in obj {
        if let Some(op) = name.strip_prefix('$') {
            parse_top_level_operator(op, value, &mut roots)?;
        } else {
            parse_field(name, value, &mut roots)?;
        }
    }
    Ok(MatchExpr::And(roots))
}

fn parse_top_level_operator(op: &str, value: &Value, out: &mut Vec<MatchExpr>) -> QueryResult<()> {
    match op {
        "and" | "or" | "nor" => {
            let arr = value.as_array().ok_or_else(|| {
                QueryError::bad_value(format!("${} argument must be an array", op))
            })?;
            if arr.is_empty() {
                return Err(QueryError::bad_value(format!(
                    "${} argument must be a non-empty array",
                    op
                )));
            }
            let mut children = Vec::with_capacity(arr.len());
            for item in arr {
                if !item.is_object() {
                    return Err(QueryError::bad_value(format!(
                        "${} argument's entries must be objects",
                        op
                    )));
                }
                children.push(parse(item)?);
            }
            out.push(match op {
                "and" => MatchExpr::And(children),
                "or" => MatchExpr::Or(children),
                _ => MatchExpr::Nor(children),
            });
        }
        "where" => {
            let code = value
                .as_str()
                .ok_or_else(|| QueryError::bad_value("$where requires a string"))?;
            out.push(MatchExpr::Where { code: code.into() });
        }
        "text" => {
            let spec = value
                .as_object()
                .ok_or_else(|| QueryError::bad_value("$text expects an object"))?;
            let search = spec
                .get("$search")
                .and_then(Value::as_str)
                .ok_or_else(|| QueryError::bad_value("$text requires a $search string"))?;
            let language = spec.get("$language").and_then(Value::as_str);
            out.push(MatchExpr::Text {
                search: search.into(),
                language: language.map(String::from),
            });
        }
        "atomic" | "isolated" => {
            out.push(MatchExpr::Atomic);
        }
        "comment" => {}
        _ => {
            return Err(QueryError::bad_value(format!(
                "unknown top level operator: ${}",
                op
            )));
        }
    }
    Ok(())
}

/// Returns true if the object is an operator object, i.e. its first field
/// starts with `$`.
fn is_operator_object(value: &Value) -> bool {
    value
        .as_object()
        .and_then(|obj| obj.keys().next())
        .map(|k| k.starts_with('$'))
        .unwrap_or(false)
}

fn parse_field(path: &str, value: &Value, out: &mut Vec<MatchExpr>) -> QueryResult<()> {
    if is_operator_object(value) {
        parse_operator_object(path, value, out)
    } else {
        // Plain value, including a literal object match.
        out.push(MatchExpr::Comparison {
            path: path.into(),
            op: ComparisonOp::Eq,
            value: value.clone(),
        });
        Ok(())
    }
}

fn comparison_op(op: &str) -> Option<ComparisonOp> {
    match op {
        "eq" => Some(ComparisonOp::Eq),
        "lt" => Some(ComparisonOp::Lt),
        "lte" => Some(ComparisonOp::Lte),
        "gt" => Some(ComparisonOp::Gt),
        "gte" => Some(ComparisonOp::Gte),
        _ => None,
    }
}

fn require_array(op: &str, value: &Value) -> QueryResult<Vec<Value>> {
    value
        .as_array()
        .cloned()
        .ok_or_else(|| QueryError::bad_value(format!("${} needs an array", op)))
}

fn parse_operator_object(path: &str, value: &Value, out: &mut Vec<MatchExpr>) -> QueryResult<()> {
    let obj = value.as_object().ok_or_else(|| {
        QueryError::bad_value(format!("expected operator object for field '{}'", path))
    })?;

    for (key, operand) in obj {
        let Some(op) = key.strip_prefix('$') else {
            return Err(QueryError::bad_value(format!(
                "cannot mix operators and plain fields under '{}'",
                path
            )));
        };

        if let Some(cmp) = comparison_op(op) {
            out.push(MatchExpr::Comparison {
                path: path.into(),
                op: cmp,
                value: operand.clone(),
            });
            continue;
        }

        match op {
            "in" => out.push(MatchExpr::In {
                path: path.into(),
                values: require_array(op, operand)?,
            }),
            "nin" => out.push(MatchExpr::NotIn {
                path: path.into(),
                values: require_array(op, operand)?,
            }),
            "all" => out.push(MatchExpr::All {
                path: path.into(),
                values: require_array(op, operand)?,
            }),
            "exists" => out.push(MatchExpr::Exists {
                path: path.into(),
                exists: truthy(operand),
            }),
            "type" => {
                let code = operand
                    .as_i64()
                    .ok_or_else(|| QueryError::bad_value("$type needs a number"))?;
                out.push(MatchExpr::Type {
                    path: path.into(),
                    code,
                });
            }
            "size" => {
                let size = operand
                    .as_i64()
                    .ok_or_else(|| QueryError::bad_value("$size needs a number"))?;
                out.push(MatchExpr::Size {
                    path: path.into(),
                    size,
                });
            }
            "mod" => out.push(parse_mod(path, operand)?),
            "regex" => {
                let pattern = operand
                    .as_str()
                    .ok_or_else(|| QueryError::bad_value("$regex needs a string"))?;
                let options = obj
                    .get("$options")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                out.push(MatchExpr::Regex {
                    path: path.into(),
                    pattern: pattern.into(),
                    options: options.into(),
                });
            }
            "options" => {
                if !obj.contains_key("$regex") {
                    return Err(QueryError::bad_value("$options needs a $regex"));
                }
            }
            "elemMatch" => out.push(parse_elem_match(path, operand)?),
            "not" => out.push(parse_not(path, operand)?),
            "near" | "geoNear" | "nearSphere" => out.push(MatchExpr::GeoNear {
                path: path.into(),
                near: operand.clone(),
            }),
            "geoWithin" | "within" | "geoIntersects" => out.push(MatchExpr::Geo {
                path: path.into(),
                predicate: operand.clone(),
            }),
            // Modifier on an accompanying geo operator.
            "maxDistance" | "uniqueDocs" => {}
            _ => {
                return Err(QueryError::bad_value(format!("unknown operator: ${}", op)));
            }
        }
    }

    Ok(())
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64() != Some(0.0),
        Value::Null => false,
        _ => true,
    }
}

fn parse_mod(path: &str, operand: &Value) -> QueryResult<MatchExpr> {
    let arr = operand
        .as_array()
        .ok_or_else(|| QueryError::bad_value("malformed mod, needs to be an array"))?;
    if arr.len() != 2 {
        return Err(QueryError::bad_value("malformed mod, not enough elements"));
    }
    let divisor = arr[0]
        .as_i64()
        .ok_or_else(|| QueryError::bad_value("malformed mod, divisor not a number"))?;
    let remainder = arr[1]
        .as_i64()
        .ok_or_else(|| QueryError::bad_value("malformed mod, remainder not a number"))?;
    if divisor == 0 {
        return Err(QueryError::bad_value("divisor cannot be 0"));
    }
    Ok(MatchExpr::Mod {
        path: path.into(),
        divisor,
        remainder,
    })
}

fn parse_elem_match(path: &str, operand: &Value) -> QueryResult<MatchExpr> {
    let obj = operand
        .as_object()
        .ok_or_else(|| QueryError::bad_value("$elemMatch needs an object"))?;

    // An all-operator body matches against the array elements themselves;
    // anything else matches element subdocuments.
    let value_match = !obj.is_empty() && obj.keys().all(|k| k.starts_with('$'));
    if value_match {
        let mut predicates = Vec::new();
        parse_operator_object("", operand, &mut predicates)?;
        Ok(MatchExpr::ElemMatchValue {
            path: path.into(),
            predicates,
        })
    } else {
        let filter = parse(operand)?;
        Ok(MatchExpr::ElemMatchObject {
            path: path.into(),
            filter: Box::new(filter),
        })
    }
}

fn parse_not(path: &str, operand: &Value) -> QueryResult<MatchExpr> {
    if !is_operator_object(operand) {
        return Err(QueryError::bad_value("$not needs an operator object"));
    }
    let mut inner = Vec::new();
    parse_operator_object(path, operand, &mut inner)?;
    if inner.is_empty() {
        return Err(QueryError::bad_value("$not cannot be empty"));
    }
    let child = if inner.len() == 1 {
        inner.remove(0)
    } else {
        MatchExpr::And(inner)
    };
    Ok(MatchExpr::Not(Box::new(child)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::expr::MatchType;
    use serde_json::json;

    #[test]
    fn test_empty_filter_is_empty_and() {
        let tree = parse(&json!({})).unwrap();
        assert_eq!(tree.match_type(), MatchType::And);
        assert_eq!(tree.children().len(), 0);
    }

    #[test]
    fn test_implicit_equality() {
        let tree = parse(&json!({"a": 1})).unwrap();
        assert_eq!(tree.children().len(), 1);
        let child = &tree.children()[0];
        assert_eq!(child.match_type(), MatchType::Eq);
        assert_eq!(child.path(), "a");
    }

    #[test]
    fn test_comparison_operators() {
        let tree = parse(&json!({"age": {"$gte": 18, "$lt": 65}})).unwrap();
        let kinds: Vec<MatchType> = tree.children().iter().map(|c| c.match_type()).collect();
        assert_eq!(kinds, vec![MatchType::Gte, MatchType::Lt]);
    }

    #[test]
    fn test_logical_connectives() {
        let tree = parse(&json!({"$or": [{"a": 1}, {"b": 1}]})).unwrap();
        assert_eq!(tree.children().len(), 1);
        assert_eq!(tree.children()[0].match_type(), MatchType::Or);

        let tree = parse(&json!({"$nor": [{"a": 1}]})).unwrap();
        assert_eq!(tree.children()[0].match_type(), MatchType::Nor);
    }

    #[test]
    fn test_logical_requires_nonempty_array() {
        assert!(parse(&json!({"$and": []})).is_err());
        assert!(parse(&json!({"$or": 5})).is_err());
        assert!(parse(&json!({"$and": [5]})).is_err());
    }

    #[test]
    fn test_unknown_operator_rejected() {
        assert!(parse(&json!({"a": {"$no_such_op": 1}})).is_err());
        assert!(parse(&json!({"$bogus": [{"a": 1}]})).is_err());
    }

    #[test]
    fn test_in_requires_array() {
        assert!(parse(&json!({"a": {"$in": [1, 2]}})).is_ok());
        assert!(parse(&json!({"a": {"$in": 3}})).is_err());
    }

    #[test]
    fn test_mod_validation() {
        assert!(parse(&json!({"a": {"$mod": [3, 1]}})).is_ok());
        assert!(parse(&json!({"a": {"$mod": [3]}})).is_err());
        assert!(parse(&json!({"a": {"$mod": [0, 1]}})).is_err());
        assert!(parse(&json!({"a": {"$mod": "x"}})).is_err());
    }

    #[test]
    fn test_regex_with_options() {
        let tree = parse(&json!({"name": {"$regex": "^al", "$options": "i"}})).unwrap();
        match &tree.children()[0] {
            MatchExpr::Regex {
                pattern, options, ..
            } => {
                assert_eq!(pattern, "^al");
                assert_eq!(options, "i");
            }
            other => panic!("expected Regex, got {:?}", other),
        }
        assert!(parse(&json!({"name": {"$options": "i"}})).is_err());
    }

    #[test]
    fn test_elem_match_forms() {
        let value = parse(&json!({"arr": {"$elemMatch": {"$gte": 1, "$lt": 5}}})).unwrap();
        assert_eq!(
            value.children()[0].match_type(),
            MatchType::ElemMatchValue
        );

        let object = parse(&json!({"arr": {"$elemMatch": {"x": 1}}})).unwrap();
        assert_eq!(
            object.children()[0].match_type(),
            MatchType::ElemMatchObject
        );
    }

    #[test]
    fn test_not_wraps_operator_object() {
        let tree = parse(&json!({"a": {"$not": {"$gt": 5}}})).unwrap();
        let not = &tree.children()[0];
        assert_eq!(not.match_type(), MatchType::Not);
        assert_eq!(not.children()[0].match_type(), MatchType::Gt);

        assert!(parse(&json!({"a": {"$not": 5}})).is_err());
    }

    #[test]
    fn test_text_and_where() {
        let tree = parse(&json!({"$text": {"$search": "coffee"}})).unwrap();
        assert_eq!(tree.children()[0].match_type(), MatchType::Text);
        assert!(parse(&json!({"$text": {"$language": "en"}})).is_err());

        let tree = parse(&json!({"$where": "this.a > 1"})).unwrap();
        assert_eq!(tree.children()[0].match_type(), MatchType::Where);
    }

    #[test]
    fn test_geo_operators() {
        let near = parse(&json!({"loc": {"$near": [0, 0]}})).unwrap();
        assert_eq!(near.children()[0].match_type(), MatchType::GeoNear);

        let within = parse(&json!({"loc": {"$geoWithin": {"$center": [[0, 0], 5]}}})).unwrap();
        assert_eq!(within.children()[0].match_type(), MatchType::Geo);
    }
}
