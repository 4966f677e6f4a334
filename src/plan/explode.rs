//! Explode for sort
//!
//! When a desired sort is not provided by the chosen index scan but every
//! field ahead of the sort columns resolves to a finite union of point
//! intervals, the scan can be rewritten as a merge-sort of one narrower
//! scan per point-prefix combination, providing the order without a
//! blocking sort.
//!
//! For `find({a: {$in: [1, 2]}}).sort({b: 1})` over index `{a: 1, b: 1}`,
//! the scan with bounds `a: [[1,1],[2,2]], b: [MinKey, MaxKey]` becomes a
//! merge-sort of the scans `a: [[1,1]]` and `a: [[2,2]]`.

use serde_json::{Map, Value};
use tracing::debug;

use crate::util::ordered_object_eq;

use super::bounds::{IndexBounds, Interval};
use super::node::{IndexScanNode, PlanNode};

/// Upper bound on the number of scans a rewrite may produce
pub const MAX_SCANS_TO_EXPLODE: usize = 50;

/// Checks one index scan against the desired sort. Returns the number of
/// leading point fields to expand and the number of scans that expansion
/// produces, or `None` if the scan cannot provide the sort by exploding.
fn analyze_scan(isn: &IndexScanNode, desired_sort: &Value) -> Option<(usize, usize)> {
    let bounds = &isn.bounds;

    // A simple range has no per-field interval structure to expand.
    if bounds.is_simple_range {
        return None;
    }

    let key_fields = isn.index_key_pattern.as_object()?;
    let fields: Vec<(&String, &Value)> = key_fields.iter().collect();

    // Skip every leading field that is a union of points, tracking how
    // many scans the Cartesian product will produce.
    let mut num_scans = 1usize;
    let mut fields_to_explode = 0usize;
    for (idx, _) in fields.iter().enumerate() {
        let oil = bounds.fields.get(idx)?;
        if oil.intervals.is_empty() || !oil.is_union_of_points() {
            break;
        }
        num_scans *= oil.intervals.len();
        fields_to_explode += 1;
    }

    if fields_to_explode == 0 {
        return None;
    }
    // No sort order left to gain by exploding.
    if fields_to_explode == fields.len() {
        return None;
    }

    // The remaining fields, in order, are the sort the exploded scans
    // would provide. It must match the desired sort exactly.
    let mut suffix = Map::new();
    for (name, value) in fields.iter().skip(fields_to_explode) {
        suffix.insert((*name).clone(), (*value).clone());
    }
    if !ordered_object_eq(&Value::Object(suffix), desired_sort) {
        return None;
    }

    Some((fields_to_explode, num_scans))
}

/// The Cartesian product of the first `fields_to_explode` fields' point
/// intervals, preserving field order.
fn make_cartesian_product(bounds: &IndexBounds, fields_to_explode: usize) -> Vec<Vec<Interval>> {
    let mut prefixes: Vec<Vec<Interval>> = vec![Vec::new()];
    for field_idx in 0..fields_to_explode {
        let mut next = Vec::new();
        for interval in &bounds.fields[field_idx].intervals {
            for prefix in &prefixes {
                let mut extended = prefix.clone();
                extended.push(interval.clone());
                next.push(extended);
            }
        }
        prefixes = next;
    }
    prefixes
}

/// Builds the merge-sort of narrower scans equivalent to `isn` that
/// provides `sort`.
fn explode_scan(isn: &IndexScanNode, sort: &Value, fields_to_explode: usize) -> PlanNode {
    let prefixes = make_cartesian_product(&isn.bounds, fields_to_explode);

    let mut children = Vec::with_capacity(prefixes.len());
    for prefix in prefixes {
        // Direction, key pattern, flags and the suffix bounds carry over;
        // only the exploded prefix fields narrow to single points.
        let mut child = isn.clone();
        for (field_idx, interval) in prefix.into_iter().enumerate() {
            child.bounds.fields[field_idx].intervals = vec![interval];
        }
        children.push(PlanNode::IndexScan(child));
    }

    PlanNode::SortMerge {
        sort: sort.clone(),
        children,
    }
}

/// Rewrites `root` so it provides `desired_sort` by exploding a
/// point-prefixed index scan into a merge-sort of narrower scans.
///
/// Returns false, leaving the tree untouched, when the structure is not an
/// index scan (optionally under a fetch), when the bounds cannot be
/// expanded, when the remaining key suffix is not the desired sort, or
/// when the expansion would exceed `MAX_SCANS_TO_EXPLODE`.
pub fn explode_for_sort(desired_sort: &Value, root: &mut PlanNode) -> bool {
    let analysis = match &*root {
        PlanNode::IndexScan(isn) => analyze_scan(isn, desired_sort),
        PlanNode::Fetch { child } => match &**child {
            PlanNode::IndexScan(isn) => analyze_scan(isn, desired_sort),
            _ => None,
        },
        _ => None,
    };
    let Some((fields_to_explode, total_scans)) = analysis else {
        return false;
    };

    if total_scans > MAX_SCANS_TO_EXPLODE {
        debug!(
            total_scans,
            "could expand index scans to pull out sort order but resulting scan count is too high"
        );
        return false;
    }

    let new_node = match &*root {
        PlanNode::IndexScan(isn) => explode_scan(isn, desired_sort, fields_to_explode),
        PlanNode::Fetch { child } => match &**child {
            PlanNode::IndexScan(isn) => explode_scan(isn, desired_sort, fields_to_explode),
            _ => return false,
        },
        _ => return false,
    };

    match root {
        PlanNode::Fetch { child } => **child = new_node,
        other => *other = new_node,
    }
    true
}
