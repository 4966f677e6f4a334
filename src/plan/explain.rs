//! Plan explain
//!
//! Derives a summary document from a tree of stage statistics. Plans using
//! index intersection get a generic summary with counters summed over the
//! leaves; everything else takes the legacy path, descending the
//! single-child spine to the leaf (or an OR/SORT_MERGE branchpoint) and
//! mapping the leaf kind onto cursor label and counters.

use serde_json::{json, Map, Value};

use crate::query::{QueryError, QueryResult};

use super::node::StageType;
use super::stats::{PlanStageStats, SpecificStats};

/// Derived execution summary
#[derive(Debug, Clone, Default)]
pub struct PlanSummary {
    pub cursor: Option<String>,
    pub is_multi_key: bool,
    pub n: u64,
    pub n_scanned: u64,
    pub n_scanned_objects: u64,
    pub index_only: bool,
    pub index_bounds: Option<Value>,
    pub scan_and_order: bool,
    pub n_chunk_skips: u64,
    pub n_yields: Option<u64>,
    /// Per-branch summaries when the plan has an OR branchpoint
    pub clauses: Vec<PlanSummary>,
    /// Verbatim stats dump, present in full-detail mode
    pub stats: Option<Value>,
}

fn is_or_stage(stage_type: StageType) -> bool {
    matches!(stage_type, StageType::Or | StageType::SortMerge)
}

fn is_intersect_plan(stats: &PlanStageStats) -> bool {
    if matches!(
        stats.stage_type,
        StageType::AndHash | StageType::AndSorted
    ) {
        return true;
    }
    stats.children.iter().any(is_intersect_plan)
}

fn leaf_nodes<'a>(stats: &'a PlanStageStats, out: &mut Vec<&'a PlanStageStats>) {
    if stats.children.is_empty() {
        out.push(stats);
    }
    for child in &stats.children {
        leaf_nodes(child, out);
    }
}

fn find_node(root: &PlanStageStats, stage_type: StageType) -> Option<&PlanStageStats> {
    if root.stage_type == stage_type {
        return Some(root);
    }
    root.children
        .iter()
        .find_map(|c| find_node(c, stage_type))
}

fn explain_intersect_plan(
    stats: &PlanStageStats,
    full_details: bool,
) -> QueryResult<PlanSummary> {
    let mut res = PlanSummary {
        cursor: Some("Complex Plan".into()),
        n: stats.common.advanced,
        ..Default::default()
    };

    // Sum the counters at the leaves.
    let mut leaves = Vec::new();
    leaf_nodes(stats, &mut leaves);
    for leaf in leaves {
        let leaf_summary = explain_plan(leaf, false)?;
        res.n_scanned += leaf_summary.n_scanned;
        res.n_scanned_objects += leaf_summary.n_scanned_objects;
    }

    if let Some(shard_filter) = find_node(stats, StageType::ShardingFilter) {
        if let SpecificStats::ShardingFilter { chunk_skips } = shard_filter.specific {
            res.n_chunk_skips = chunk_skips;
        }
    }

    if full_details {
        res.n_yields = Some(stats.common.yields);
        res.stats = Some(stats_to_json(stats));
    }

    Ok(res)
}

/// Derives the summary for an executed plan's statistics tree.
///
/// Fails with `InternalError` when the tree bottoms out in a stage the
/// summary has no interpretation for.
pub fn explain_plan(stats: &PlanStageStats, full_details: bool) -> QueryResult<PlanSummary> {
    if is_intersect_plan(stats) {
        return explain_intersect_plan(stats, full_details);
    }

    // Descend the spine looking for structural properties: an OR
    // branchpoint, a fetch (not covered), a blocking sort, chunk skips.
    let mut covered = true;
    let mut sort_present = false;
    let mut chunk_skips = 0;

    let root = stats;
    let mut leaf = stats;
    let mut or_stage: Option<&PlanStageStats> = None;

    while !leaf.children.is_empty() {
        if leaf.children.len() > 1 && !is_or_stage(leaf.stage_type) {
            return Err(QueryError::internal("cannot interpret execution plan"));
        }
        if is_or_stage(leaf.stage_type) {
            or_stage = Some(leaf);
            break;
        }

        match (&leaf.stage_type, &leaf.specific) {
            (StageType::Fetch, _) => covered = false,
            (StageType::Sort, _) => sort_present = true,
            (StageType::ShardingFilter, SpecificStats::ShardingFilter { chunk_skips: n }) => {
                chunk_skips = *n;
            }
            _ => {}
        }

        leaf = &leaf.children[0];
    }

    let mut res = PlanSummary::default();

    if let Some(or_node) = or_stage {
        for child in &or_node.children {
            let child_summary = explain_plan(child, false)?;
            res.n_scanned += child_summary.n_scanned;
            // Branches do not necessarily fetch, but the summary mirrors
            // the scan count as the legacy cursor layer did.
            res.n_scanned_objects += child_summary.n_scanned;
            res.clauses.push(child_summary);
        }
    } else {
        match (&leaf.stage_type, &leaf.specific) {
            (StageType::CollScan, SpecificStats::CollScan { docs_tested }) => {
                res.cursor = Some("BasicCursor".into());
                res.n_scanned = *docs_tested;
                res.n_scanned_objects = *docs_tested;
                res.index_only = false;
            }
            (StageType::GeoNear2dSphere, _) => {
                res.cursor = Some("S2NearCursor".into());
                // The first work is an init; every subsequent work examines
                // a document.
                res.n_scanned = leaf.common.works;
                res.n_scanned_objects = leaf.common.works;
                res.is_multi_key = false;
                res.index_only = false;
            }
            (
                StageType::GeoNear2d,
                SpecificStats::GeoNear2d {
                    objects_loaded,
                    nscanned,
                },
            ) => {
                res.cursor = Some("GeoSearchCursor".into());
                res.n_scanned = *nscanned;
                res.n_scanned_objects = *objects_loaded;
                res.is_multi_key = false;
                res.index_only = false;
            }
            (
                StageType::Text,
                SpecificStats::Text {
                    keys_examined,
                    fetches,
                },
            ) => {
                res.cursor = Some("TextCursor".into());
                res.n_scanned = *keys_examined;
                res.n_scanned_objects = *fetches;
            }
            (
                StageType::IxScan,
                SpecificStats::IndexScan {
                    bounds,
                    is_multi_key,
                    index_type,
                    index_name,
                    direction,
                    keys_examined,
                    ..
                },
            ) => {
                let reverse = if *direction > 0 { "" } else { " reverse" };
                res.cursor = Some(format!("{} {}{}", index_type, index_name, reverse));
                res.n_scanned = *keys_examined;
                // Covered means no fetch is present, so by definition no
                // full document was loaded.
                res.n_scanned_objects = if covered { 0 } else { leaf.common.advanced };
                res.index_bounds = Some(bounds.clone());
                res.is_multi_key = *is_multi_key;
                res.index_only = covered;
            }
            _ => {
                return Err(QueryError::internal("cannot interpret execution plan"));
            }
        }
    }

    res.n = root.common.advanced;
    res.scan_and_order = sort_present;
    res.n_chunk_skips = chunk_skips;

    if full_details {
        res.n_yields = Some(root.common.yields);
        res.stats = Some(stats_to_json(root));
    }

    Ok(res)
}

/// Dumps a statistics tree to a document, one object per stage.
pub fn stats_to_json(stats: &PlanStageStats) -> Value {
    let mut doc = Map::new();
    doc.insert("type".into(), json!(stats.stage_type.as_str()));
    doc.insert("works".into(), json!(stats.common.works));
    doc.insert("yields".into(), json!(stats.common.yields));
    doc.insert("unyields".into(), json!(stats.common.unyields));
    doc.insert("invalidates".into(), json!(stats.common.invalidates));
    doc.insert("advanced".into(), json!(stats.common.advanced));
    doc.insert("needTime".into(), json!(stats.common.need_time));
    doc.insert("needFetch".into(), json!(stats.common.need_fetch));
    doc.insert("isEOF".into(), json!(stats.common.is_eof));

    match &stats.specific {
        SpecificStats::AndHash {
            flagged_but_passed,
            flagged_in_progress,
            map_after_child,
        } => {
            doc.insert("flaggedButPassed".into(), json!(flagged_but_passed));
            doc.insert("flaggedInProgress".into(), json!(flagged_in_progress));
            for (i, count) in map_after_child.iter().enumerate() {
                doc.insert(format!("mapAfterChild_{}", i), json!(count));
            }
        }
        SpecificStats::AndSorted {
            flagged,
            match_tested,
            failed_and,
        } => {
            doc.insert("flagged".into(), json!(flagged));
            doc.insert("matchTested".into(), json!(match_tested));
            for (i, count) in failed_and.iter().enumerate() {
                doc.insert(format!("failedAnd_{}", i), json!(count));
            }
        }
        SpecificStats::CollScan { docs_tested } => {
            doc.insert("docsTested".into(), json!(docs_tested));
        }
        SpecificStats::Fetch {
            already_has_obj,
            forced_fetches,
            match_tested,
        } => {
            doc.insert("alreadyHasObj".into(), json!(already_has_obj));
            doc.insert("forcedFetches".into(), json!(forced_fetches));
            doc.insert("matchTested".into(), json!(match_tested));
        }
        SpecificStats::GeoNear2d {
            objects_loaded,
            nscanned,
        } => {
            doc.insert("objectsLoaded".into(), json!(objects_loaded));
            doc.insert("nscanned".into(), json!(nscanned));
        }
        SpecificStats::IndexScan {
            key_pattern,
            bounds,
            is_multi_key,
            yield_moved_cursor,
            dups_tested,
            dups_dropped,
            seen_invalidated,
            match_tested,
            keys_examined,
            ..
        } => {
            doc.insert("keyPattern".into(), key_pattern.clone());
            doc.insert("bounds".into(), bounds.clone());
            doc.insert("isMultiKey".into(), json!(is_multi_key));
            doc.insert("yieldMovedCursor".into(), json!(yield_moved_cursor));
            doc.insert("dupsTested".into(), json!(dups_tested));
            doc.insert("dupsDropped".into(), json!(dups_dropped));
            doc.insert("seenInvalidated".into(), json!(seen_invalidated));
            doc.insert("matchTested".into(), json!(match_tested));
            doc.insert("keysExamined".into(), json!(keys_examined));
        }
        SpecificStats::Or {
            dups_tested,
            dups_dropped,
            locs_forgotten,
            match_tested,
        } => {
            doc.insert("dupsTested".into(), json!(dups_tested));
            doc.insert("dupsDropped".into(), json!(dups_dropped));
            doc.insert("locsForgotten".into(), json!(locs_forgotten));
            for (i, count) in match_tested.iter().enumerate() {
                doc.insert(format!("matchTested_{}", i), json!(count));
            }
        }
        SpecificStats::ShardingFilter { chunk_skips } => {
            doc.insert("chunkSkips".into(), json!(chunk_skips));
        }
        SpecificStats::Sort { forced_fetches } => {
            doc.insert("forcedFetches".into(), json!(forced_fetches));
        }
        SpecificStats::SortMerge {
            dups_tested,
            dups_dropped,
            forced_fetches,
        } => {
            doc.insert("dupsTested".into(), json!(dups_tested));
            doc.insert("dupsDropped".into(), json!(dups_dropped));
            doc.insert("forcedFetches".into(), json!(forced_fetches));
        }
        SpecificStats::Text {
            keys_examined,
            fetches,
        } => {
            doc.insert("keysExamined".into(), json!(keys_examined));
            doc.insert("fetches".into(), json!(fetches));
        }
        SpecificStats::None => {}
    }

    let children: Vec<Value> = stats.children.iter().map(stats_to_json).collect();
    doc.insert("children".into(), Value::Array(children));

    Value::Object(doc)
}
