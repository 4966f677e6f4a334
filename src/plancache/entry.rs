//! Plan cache entry types
//!
//! A cached plan is stored as compact, cloneable descriptions rather than
//! live plan trees: an index-tagged tree plus a solution-kind tag is enough
//! to re-hydrate the plan later. Everything handed out of the cache is a
//! deep clone with a lifetime independent of the cache.

use std::fmt;

use serde_json::Value;

use crate::query::ShapeKey;

/// The slice of an index catalog entry a cached plan needs to rebind
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    /// Index key pattern, e.g. `{a: 1, b: -1}`
    pub key_pattern: Value,
    /// Whether the index is multikey
    pub multikey: bool,
    /// Index name
    pub name: String,
}

impl IndexEntry {
    pub fn new(key_pattern: Value, name: impl Into<String>) -> Self {
        Self {
            key_pattern,
            multikey: false,
            name: name.into(),
        }
    }
}

/// Tree of plan nodes, each optionally bound to an index plus the position
/// of the predicate it satisfies. Children are owned by their parent.
#[derive(Debug, Clone, Default)]
pub struct PlanCacheIndexTree {
    pub entry: Option<IndexEntry>,
    pub index_pos: usize,
    pub children: Vec<PlanCacheIndexTree>,
}

impl PlanCacheIndexTree {
    pub fn set_index_entry(&mut self, entry: IndexEntry) {
        self.entry = Some(entry);
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, indents: usize) -> fmt::Result {
        if !self.children.is_empty() {
            writeln!(f, "{}Node", "-".repeat(3 * indents))?;
            for child in &self.children {
                child.fmt_indented(f, indents + 1)?;
            }
            Ok(())
        } else {
            write!(f, "{}Leaf ", "-".repeat(3 * indents))?;
            if let Some(entry) = &self.entry {
                write!(f, "{}, pos: {}", entry.key_pattern, self.index_pos)?;
            }
            writeln!(f)
        }
    }
}

impl fmt::Display for PlanCacheIndexTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}

/// Compact description of one cached plan
#[derive(Debug, Clone)]
pub enum SolutionCacheData {
    /// Scan of an entire index to provide a sort, in the given direction
    WholeIndexScan {
        tree: PlanCacheIndexTree,
        direction: i32,
        admin_hint_applied: bool,
    },
    /// Collection scan
    CollectionScan { admin_hint_applied: bool },
    /// Index-tagged expression tree
    IndexTags {
        tree: PlanCacheIndexTree,
        admin_hint_applied: bool,
    },
}

impl SolutionCacheData {
    pub fn tagged(tree: PlanCacheIndexTree) -> Self {
        SolutionCacheData::IndexTags {
            tree,
            admin_hint_applied: false,
        }
    }

    /// True if this plan was produced under an admin hint
    pub fn admin_hint_applied(&self) -> bool {
        match self {
            SolutionCacheData::WholeIndexScan {
                admin_hint_applied, ..
            }
            | SolutionCacheData::CollectionScan { admin_hint_applied }
            | SolutionCacheData::IndexTags {
                admin_hint_applied, ..
            } => *admin_hint_applied,
        }
    }
}

impl fmt::Display for SolutionCacheData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolutionCacheData::WholeIndexScan {
                tree, direction, ..
            } => write!(
                f,
                "(whole index scan solution: dir={}; tree={})",
                direction, tree
            ),
            SolutionCacheData::CollectionScan { .. } => write!(f, "(collection scan)"),
            SolutionCacheData::IndexTags { tree, .. } => {
                write!(f, "(index-tagged expression tree: tree={})", tree)
            }
        }
    }
}

/// The ranker's decision object; the cache stores it verbatim.
#[derive(Debug, Clone)]
pub struct PlanRankingDecision {
    /// Initial score of the winning plan
    pub score: f64,
}

impl PlanRankingDecision {
    pub fn new(score: f64) -> Self {
        Self { score }
    }
}

/// A candidate solution as handed to the cache by the planner
#[derive(Debug, Clone)]
pub struct QuerySolution {
    pub cache_data: SolutionCacheData,
    /// True if the plan contains a blocking sort stage
    pub has_sort_stage: bool,
}

/// Execution feedback for one run of a cached plan
#[derive(Debug, Clone)]
pub struct PlanCacheFeedback {
    pub score: f64,
    /// Optional execution summary for diagnostics
    pub summary: Option<Value>,
}

impl PlanCacheFeedback {
    pub fn new(score: f64) -> Self {
        Self {
            score,
            summary: None,
        }
    }
}

/// A cache-owned entry for one query shape
#[derive(Debug, Clone)]
pub struct PlanCacheEntry {
    pub(crate) planner_data: Vec<SolutionCacheData>,
    pub(crate) query: Value,
    pub(crate) sort: Value,
    pub(crate) projection: Value,
    pub(crate) decision: PlanRankingDecision,
    /// Index into `planner_data` of a solution without a blocking sort,
    /// preferred when the primary's sort proves unusable at runtime.
    pub(crate) backup_soln: Option<usize>,
    pub(crate) feedback: Vec<PlanCacheFeedback>,
    pub(crate) average_score: Option<f64>,
    pub(crate) stddev_score: Option<f64>,
}

impl PlanCacheEntry {
    /// Stored feedback window; the arrival that would land at this count
    /// triggers the degradation check instead.
    pub const MAX_FEEDBACK: usize = 20;

    /// Degradation threshold in standard deviations
    pub const STD_DEV_THRESHOLD: f64 = 2.0;

    pub(crate) fn new(solutions: &[QuerySolution], decision: PlanRankingDecision) -> Self {
        Self {
            planner_data: solutions.iter().map(|s| s.cache_data.clone()).collect(),
            query: Value::Null,
            sort: Value::Null,
            projection: Value::Null,
            decision,
            backup_soln: None,
            feedback: Vec::new(),
            average_score: None,
            stddev_score: None,
        }
    }

    /// Recorded feedback scores, oldest first
    pub fn feedback_scores(&self) -> Vec<f64> {
        self.feedback.iter().map(|f| f.score).collect()
    }
}

impl fmt::Display for PlanCacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(query: {}; sort: {}; projection: {}; solutions: {})",
            self.query,
            self.sort,
            self.projection,
            self.planner_data.len()
        )
    }
}

/// Snapshot of a cache entry returned to the planner. Owns its clones; its
/// lifetime is independent of the cache.
#[derive(Debug, Clone)]
pub struct CachedSolution {
    pub key: ShapeKey,
    pub planner_data: Vec<SolutionCacheData>,
    pub backup_soln: Option<usize>,
    pub query: Value,
    pub sort: Value,
    pub projection: Value,
    /// Initial score of the winning plan, from the ranking decision
    pub decision_score: f64,
    /// Feedback scores recorded so far, oldest first
    pub feedback_scores: Vec<f64>,
}

impl CachedSolution {
    pub(crate) fn new(key: &ShapeKey, entry: &PlanCacheEntry) -> Self {
        Self {
            key: key.clone(),
            planner_data: entry.planner_data.clone(),
            backup_soln: entry.backup_soln,
            query: entry.query.clone(),
            sort: entry.sort.clone(),
            projection: entry.projection.clone(),
            decision_score: entry.decision.score,
            feedback_scores: entry.feedback_scores(),
        }
    }
}
