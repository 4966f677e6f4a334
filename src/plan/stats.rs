//! Execution stage statistics
//!
//! The counters each stage accumulates while a plan runs. Explain walks
//! these trees; the plan cache attaches them to feedback for diagnostics.

use serde_json::Value;

use super::node::StageType;

/// Counters every stage tracks
#[derive(Debug, Clone, Default)]
pub struct CommonStats {
    pub works: u64,
    pub yields: u64,
    pub unyields: u64,
    pub invalidates: u64,
    pub advanced: u64,
    pub need_time: u64,
    pub need_fetch: u64,
    pub is_eof: bool,
}

/// Stage-specific counters
#[derive(Debug, Clone, Default)]
pub enum SpecificStats {
    #[default]
    None,
    AndHash {
        flagged_but_passed: u64,
        flagged_in_progress: u64,
        map_after_child: Vec<u64>,
    },
    AndSorted {
        flagged: u64,
        match_tested: u64,
        failed_and: Vec<u64>,
    },
    CollScan {
        docs_tested: u64,
    },
    Fetch {
        already_has_obj: u64,
        forced_fetches: u64,
        match_tested: u64,
    },
    GeoNear2d {
        objects_loaded: u64,
        nscanned: u64,
    },
    IndexScan {
        key_pattern: Value,
        bounds: Value,
        is_multi_key: bool,
        index_type: String,
        index_name: String,
        direction: i32,
        yield_moved_cursor: u64,
        dups_tested: u64,
        dups_dropped: u64,
        seen_invalidated: u64,
        match_tested: u64,
        keys_examined: u64,
    },
    Or {
        dups_tested: u64,
        dups_dropped: u64,
        locs_forgotten: u64,
        match_tested: Vec<u64>,
    },
    ShardingFilter {
        chunk_skips: u64,
    },
    Sort {
        forced_fetches: u64,
    },
    SortMerge {
        dups_tested: u64,
        dups_dropped: u64,
        forced_fetches: u64,
    },
    Text {
        keys_examined: u64,
        fetches: u64,
    },
}

/// Statistics tree for one executed plan
#[derive(Debug, Clone)]
pub struct PlanStageStats {
    pub stage_type: StageType,
    pub common: CommonStats,
    pub specific: SpecificStats,
    pub children: Vec<PlanStageStats>,
}

impl PlanStageStats {
    pub fn new(stage_type: StageType) -> Self {
        Self {
            stage_type,
            common: CommonStats::default(),
            specific: SpecificStats::default(),
            children: Vec::new(),
        }
    }
}
