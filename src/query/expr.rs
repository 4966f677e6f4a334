//! Predicate expression trees
//!
//! Defines the tagged match-expression tree produced by the filter parser,
//! plus the canonicalization passes run on it: flattening of associative
//! logical operators, removal of singleton wrappers, stable sibling
//! ordering, and query-legality validation.

use std::cmp::Ordering;
use std::slice;

use serde_json::Value;

use super::errors::{QueryError, QueryResult};
use super::shape;

/// Match kinds, declared in canonical order.
///
/// The declaration order is the primary sort key for sibling ordering, so
/// reordering variants changes every shape key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MatchType {
    And,
    Or,
    Nor,
    Not,
    All,
    ElemMatchObject,
    ElemMatchValue,
    Size,
    Lte,
    Lt,
    Eq,
    Gt,
    Gte,
    Regex,
    Mod,
    Exists,
    In,
    NotIn,
    Type,
    Geo,
    Where,
    Atomic,
    AlwaysFalse,
    GeoNear,
    Text,
}

impl MatchType {
    /// Two-character tag used in the shape key encoding.
    pub fn shape_tag(&self) -> &'static str {
        match self {
            MatchType::And => "an",
            MatchType::Or => "or",
            MatchType::Nor => "nr",
            MatchType::Not => "nt",
            MatchType::All => "al",
            MatchType::ElemMatchObject => "eo",
            MatchType::ElemMatchValue => "ev",
            MatchType::Size => "sz",
            MatchType::Lte => "le",
            MatchType::Lt => "lt",
            MatchType::Eq => "eq",
            MatchType::Gt => "gt",
            MatchType::Gte => "ge",
            MatchType::Regex => "re",
            MatchType::Mod => "mo",
            MatchType::Exists => "ex",
            MatchType::In => "in",
            MatchType::NotIn => "ni",
            MatchType::Type => "ty",
            MatchType::Geo => "go",
            MatchType::Where => "wh",
            MatchType::Atomic => "at",
            MatchType::AlwaysFalse => "af",
            MatchType::GeoNear => "gn",
            MatchType::Text => "te",
        }
    }
}

/// Comparison operators folded into a single node shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Lte,
    Lt,
    Eq,
    Gt,
    Gte,
}

/// A node in the predicate tree.
///
/// Children are exclusively owned by their parent; the root is owned by the
/// enclosing `CanonicalQuery`.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchExpr {
    And(Vec<MatchExpr>),
    Or(Vec<MatchExpr>),
    Nor(Vec<MatchExpr>),
    Not(Box<MatchExpr>),
    All { path: String, values: Vec<Value> },
    ElemMatchObject { path: String, filter: Box<MatchExpr> },
    ElemMatchValue { path: String, predicates: Vec<MatchExpr> },
    Size { path: String, size: i64 },
    Comparison { path: String, op: ComparisonOp, value: Value },
    Regex { path: String, pattern: String, options: String },
    Mod { path: String, divisor: i64, remainder: i64 },
    Exists { path: String, exists: bool },
    In { path: String, values: Vec<Value> },
    NotIn { path: String, values: Vec<Value> },
    Type { path: String, code: i64 },
    Geo { path: String, predicate: Value },
    Where { code: String },
    Atomic,
    AlwaysFalse,
    GeoNear { path: String, near: Value },
    Text { search: String, language: Option<String> },
}

impl MatchExpr {
    /// Returns the match kind of this node
    pub fn match_type(&self) -> MatchType {
        match self {
            MatchExpr::And(_) => MatchType::And,
            MatchExpr::Or(_) => MatchType::Or,
            MatchExpr::Nor(_) => MatchType::Nor,
            MatchExpr::Not(_) => MatchType::Not,
            MatchExpr::All { .. } => MatchType::All,
            MatchExpr::ElemMatchObject { .. } => MatchType::ElemMatchObject,
            MatchExpr::ElemMatchValue { .. } => MatchType::ElemMatchValue,
            MatchExpr::Size { .. } => MatchType::Size,
            MatchExpr::Comparison { op, .. } => match op {
                ComparisonOp::Lte => MatchType::Lte,
                ComparisonOp::Lt => MatchType::Lt,
                ComparisonOp::Eq => MatchType::Eq,
                ComparisonOp::Gt => MatchType::Gt,
                ComparisonOp::Gte => MatchType::Gte,
            },
            MatchExpr::Regex { .. } => MatchType::Regex,
            MatchExpr::Mod { .. } => MatchType::Mod,
            MatchExpr::Exists { .. } => MatchType::Exists,
            MatchExpr::In { .. } => MatchType::In,
            MatchExpr::NotIn { .. } => MatchType::NotIn,
            MatchExpr::Type { .. } => MatchType::Type,
            MatchExpr::Geo { .. } => MatchType::Geo,
            MatchExpr::Where { .. } => MatchType::Where,
            MatchExpr::Atomic => MatchType::Atomic,
            MatchExpr::AlwaysFalse => MatchType::AlwaysFalse,
            MatchExpr::GeoNear { .. } => MatchType::GeoNear,
            MatchExpr::Text { .. } => MatchType::Text,
        }
    }

    /// Returns the field path this node applies to, or "" for pathless nodes
    pub fn path(&self) -> &str {
        match self {
            MatchExpr::All { path, .. }
            | MatchExpr::ElemMatchObject { path, .. }
            | MatchExpr::ElemMatchValue { path, .. }
            | MatchExpr::Size { path, .. }
            | MatchExpr::Comparison { path, .. }
            | MatchExpr::Regex { path, .. }
            | MatchExpr::Mod { path, .. }
            | MatchExpr::Exists { path, .. }
            | MatchExpr::In { path, .. }
            | MatchExpr::NotIn { path, .. }
            | MatchExpr::Type { path, .. }
            | MatchExpr::Geo { path, .. }
            | MatchExpr::GeoNear { path, .. } => path,
            _ => "",
        }
    }

    /// Child nodes, in current sibling order
    pub fn children(&self) -> &[MatchExpr] {
        match self {
            MatchExpr::And(children) | MatchExpr::Or(children) | MatchExpr::Nor(children) => {
                children
            }
            MatchExpr::ElemMatchValue { predicates, .. } => predicates,
            MatchExpr::Not(child) | MatchExpr::ElemMatchObject { filter: child, .. } => {
                slice::from_ref(&**child)
            }
            _ => &[],
        }
    }

    fn children_mut(&mut self) -> &mut [MatchExpr] {
        match self {
            MatchExpr::And(children) | MatchExpr::Or(children) | MatchExpr::Nor(children) => {
                children
            }
            MatchExpr::ElemMatchValue { predicates, .. } => predicates,
            MatchExpr::Not(child) | MatchExpr::ElemMatchObject { filter: child, .. } => {
                slice::from_mut(&mut **child)
            }
            _ => &mut [],
        }
    }

    /// Counts nodes of the given kind in this subtree (inclusive)
    pub fn count_nodes(&self, kind: MatchType) -> usize {
        let mut sum = if self.match_type() == kind { 1 } else { 0 };
        for child in self.children() {
            sum += child.count_nodes(kind);
        }
        sum
    }

    /// Returns true if this subtree contains a node of the given kind
    pub fn has_node(&self, kind: MatchType) -> bool {
        self.match_type() == kind || self.children().iter().any(|c| c.has_node(kind))
    }
}

/// Does `root` contain a subtree rooted at `subtree_type` that itself
/// contains a node of `child_type`?
fn has_node_in_subtree(root: &MatchExpr, child_type: MatchType, subtree_type: MatchType) -> bool {
    if root.match_type() == subtree_type {
        return root.has_node(child_type);
    }
    root.children()
        .iter()
        .any(|c| has_node_in_subtree(c, child_type, subtree_type))
}

/// Flattens associative logical operators and unwraps singleton wrappers.
///
/// Applied bottom-up, to `And` and `Or` only; negations are left alone.
/// After this pass no `And` directly contains an `And`, no `Or` directly
/// contains an `Or`, and no `And`/`Or` has exactly one child.
pub fn normalize(expr: MatchExpr) -> MatchExpr {
    let (children, is_and) = match expr {
        MatchExpr::And(children) => (children, true),
        MatchExpr::Or(children) => (children, false),
        other => return other,
    };

    let mut flat = Vec::with_capacity(children.len());
    for child in children {
        // Clean up each child before merging; a normalized child has no
        // nested run of the same operator left to absorb.
        let child = normalize(child);
        match child {
            MatchExpr::And(grand) if is_and => flat.extend(grand),
            MatchExpr::Or(grand) if !is_and => flat.extend(grand),
            other => flat.push(other),
        }
    }

    // AND of 1 thing is the thing, OR of 1 thing is the thing.
    if flat.len() == 1 {
        return flat.remove(0);
    }

    if is_and {
        MatchExpr::And(flat)
    } else {
        MatchExpr::Or(flat)
    }
}

/// Total order on sibling nodes: match kind, then path bytes, then the
/// shape encoding of the subtree. The tertiary key breaks ties between
/// siblings with identical kind and path, e.g. two OR branches over
/// different fields.
fn node_ordering(a: &MatchExpr, b: &MatchExpr) -> Ordering {
    a.match_type()
        .cmp(&b.match_type())
        .then_with(|| a.path().cmp(b.path()))
        .then_with(|| shape::encode_expr(a).cmp(&shape::encode_expr(b)))
}

/// Sorts every node's children into the canonical sibling order, post-order.
pub fn sort_tree(expr: &mut MatchExpr) {
    for child in expr.children_mut() {
        sort_tree(child);
    }
    match expr {
        MatchExpr::And(children) | MatchExpr::Or(children) | MatchExpr::Nor(children) => {
            children.sort_by(node_ordering);
        }
        MatchExpr::ElemMatchValue { predicates, .. } => {
            predicates.sort_by(node_ordering);
        }
        _ => {}
    }
}

/// Enforces query-legality invariants on a normalized tree.
///
/// There can be at most one text node and it may not appear under a `Nor`.
/// There can be at most one geo-near node and it must be the root or a
/// direct child of an `And` root. Text and geo-near cannot coexist.
pub fn is_valid(root: &MatchExpr) -> QueryResult<()> {
    let num_text = root.count_nodes(MatchType::Text);
    if num_text > 1 {
        return Err(QueryError::bad_value("Too many text expressions"));
    }
    if num_text == 1 && has_node_in_subtree(root, MatchType::Text, MatchType::Nor) {
        return Err(QueryError::bad_value("text expression not allowed in nor"));
    }

    let num_geo_near = root.count_nodes(MatchType::GeoNear);
    if num_geo_near > 1 {
        return Err(QueryError::bad_value("Too many geoNear expressions"));
    }
    if num_geo_near == 1 {
        let top_level = match root {
            MatchExpr::GeoNear { .. } => true,
            MatchExpr::And(children) => children
                .iter()
                .any(|c| c.match_type() == MatchType::GeoNear),
            _ => false,
        };
        if !top_level {
            return Err(QueryError::bad_value("geoNear must be top-level expr"));
        }
    }

    if num_text > 0 && num_geo_near > 0 {
        return Err(QueryError::bad_value(
            "text and geoNear not allowed in same query",
        ));
    }

    Ok(())
}
