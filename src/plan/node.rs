//! Plan tree nodes
//!
//! The tree form a chosen plan takes between planning and execution. Each
//! node is tagged by stage kind and owns its children. The sort rewriter
//! operates directly on these trees.

use std::slice;

use serde_json::Value;

use super::bounds::IndexBounds;

/// Stage kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageType {
    AndHash,
    AndSorted,
    CollScan,
    Fetch,
    GeoNear2d,
    GeoNear2dSphere,
    IxScan,
    Limit,
    Or,
    Projection,
    ShardingFilter,
    Skip,
    Sort,
    SortMerge,
    Text,
}

impl StageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageType::AndHash => "AND_HASH",
            StageType::AndSorted => "AND_SORTED",
            StageType::CollScan => "COLLSCAN",
            StageType::Fetch => "FETCH",
            StageType::GeoNear2d => "GEO_NEAR_2D",
            StageType::GeoNear2dSphere => "GEO_NEAR_2DSPHERE",
            StageType::IxScan => "IXSCAN",
            StageType::Limit => "LIMIT",
            StageType::Or => "OR",
            StageType::Projection => "PROJECTION",
            StageType::ShardingFilter => "SHARDING_FILTER",
            StageType::Skip => "SKIP",
            StageType::Sort => "SORT",
            StageType::SortMerge => "SORT_MERGE",
            StageType::Text => "TEXT",
        }
    }
}

/// Payload of an index scan stage
#[derive(Debug, Clone, PartialEq)]
pub struct IndexScanNode {
    /// Key pattern of the scanned index, e.g. `{a: 1, b: 1}`
    pub index_key_pattern: Value,
    pub index_is_multikey: bool,
    /// 1 forward, -1 reverse
    pub direction: i32,
    pub max_scan: u64,
    pub add_key_metadata: bool,
    pub bounds: IndexBounds,
}

/// A node of a query plan tree
#[derive(Debug, Clone, PartialEq)]
pub enum PlanNode {
    AndHash { children: Vec<PlanNode> },
    AndSorted { children: Vec<PlanNode> },
    CollScan { direction: i32 },
    Fetch { child: Box<PlanNode> },
    GeoNear2d { path: String },
    GeoNear2dSphere { path: String },
    IndexScan(IndexScanNode),
    Limit { limit: u64, child: Box<PlanNode> },
    Or { children: Vec<PlanNode> },
    Projection { projection: Value, child: Box<PlanNode> },
    ShardingFilter { child: Box<PlanNode> },
    Skip { skip: u64, child: Box<PlanNode> },
    Sort { pattern: Value, limit: u64, child: Box<PlanNode> },
    SortMerge { sort: Value, children: Vec<PlanNode> },
    Text { query: String },
}

impl PlanNode {
    pub fn stage_type(&self) -> StageType {
        match self {
            PlanNode::AndHash { .. } => StageType::AndHash,
            PlanNode::AndSorted { .. } => StageType::AndSorted,
            PlanNode::CollScan { .. } => StageType::CollScan,
            PlanNode::Fetch { .. } => StageType::Fetch,
            PlanNode::GeoNear2d { .. } => StageType::GeoNear2d,
            PlanNode::GeoNear2dSphere { .. } => StageType::GeoNear2dSphere,
            PlanNode::IndexScan(_) => StageType::IxScan,
            PlanNode::Limit { .. } => StageType::Limit,
            PlanNode::Or { .. } => StageType::Or,
            PlanNode::Projection { .. } => StageType::Projection,
            PlanNode::ShardingFilter { .. } => StageType::ShardingFilter,
            PlanNode::Skip { .. } => StageType::Skip,
            PlanNode::Sort { .. } => StageType::Sort,
            PlanNode::SortMerge { .. } => StageType::SortMerge,
            PlanNode::Text { .. } => StageType::Text,
        }
    }

    pub fn children(&self) -> &[PlanNode] {
        match self {
            PlanNode::AndHash { children }
            | PlanNode::AndSorted { children }
            | PlanNode::Or { children }
            | PlanNode::SortMerge { children, .. } => children,
            PlanNode::Fetch { child }
            | PlanNode::Limit { child, .. }
            | PlanNode::Projection { child, .. }
            | PlanNode::ShardingFilter { child }
            | PlanNode::Skip { child, .. }
            | PlanNode::Sort { child, .. } => slice::from_ref(&**child),
            _ => &[],
        }
    }

    /// The sort orders this subtree provides without blocking.
    ///
    /// Downstream sort analysis consults this after any structural rewrite
    /// of the tree.
    pub fn compute_sorts(&self) -> Vec<Value> {
        match self {
            PlanNode::IndexScan(isn) => vec![direction_adjusted(
                &isn.index_key_pattern,
                isn.direction,
            )],
            PlanNode::SortMerge { sort, .. } => vec![sort.clone()],
            PlanNode::Sort { pattern, .. } => vec![pattern.clone()],
            PlanNode::Fetch { child }
            | PlanNode::Limit { child, .. }
            | PlanNode::Projection { child, .. }
            | PlanNode::ShardingFilter { child }
            | PlanNode::Skip { child, .. } => child.compute_sorts(),
            _ => Vec::new(),
        }
    }
}

/// The key pattern as a sort order, taking scan direction into account.
fn direction_adjusted(key_pattern: &Value, direction: i32) -> Value {
    if direction >= 0 {
        return key_pattern.clone();
    }
    let Some(fields) = key_pattern.as_object() else {
        return key_pattern.clone();
    };
    let mut reversed = serde_json::Map::new();
    for (name, value) in fields {
        let flipped = if value.as_f64().unwrap_or(0.0) > 0.0 {
            -1
        } else {
            1
        };
        reversed.insert(name.clone(), Value::from(flipped));
    }
    Value::Object(reversed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::bounds::{Interval, OrderedIntervalList};
    use serde_json::json;

    fn scan(key_pattern: Value, direction: i32) -> IndexScanNode {
        let mut bounds = IndexBounds::default();
        for (name, _) in key_pattern.as_object().unwrap() {
            let mut oil = OrderedIntervalList::new(name.clone());
            oil.intervals.push(Interval::all_values());
            bounds.fields.push(oil);
        }
        IndexScanNode {
            index_key_pattern: key_pattern,
            index_is_multikey: false,
            direction,
            max_scan: 0,
            add_key_metadata: false,
            bounds,
        }
    }

    #[test]
    fn test_forward_scan_provides_key_pattern_order() {
        let node = PlanNode::IndexScan(scan(json!({"a": 1, "b": -1}), 1));
        assert_eq!(node.compute_sorts(), vec![json!({"a": 1, "b": -1})]);
    }

    #[test]
    fn test_reverse_scan_flips_directions() {
        let node = PlanNode::IndexScan(scan(json!({"a": 1, "b": -1}), -1));
        assert_eq!(node.compute_sorts(), vec![json!({"a": -1, "b": 1})]);
    }

    #[test]
    fn test_single_child_stages_pass_sorts_through() {
        let node = PlanNode::Fetch {
            child: Box::new(PlanNode::IndexScan(scan(json!({"a": 1}), 1))),
        };
        assert_eq!(node.compute_sorts(), vec![json!({"a": 1})]);
    }

    #[test]
    fn test_merge_sort_provides_its_sort() {
        let node = PlanNode::SortMerge {
            sort: json!({"b": 1}),
            children: vec![],
        };
        assert_eq!(node.compute_sorts(), vec![json!({"b": 1})]);
    }

    #[test]
    fn test_collscan_provides_nothing() {
        let node = PlanNode::CollScan { direction: 1 };
        assert!(node.compute_sorts().is_empty());
    }
}
