//! Plan cache
//!
//! Thread-safe map from query shape to a previously chosen plan. The cache
//! is consulted from any thread; every operation serializes on one mutex
//! and the write-notification fast path rides a single atomic counter.
//!
//! Entries are admitted per `should_cache`, replaced wholesale on re-add,
//! evicted when execution feedback shows the plan degrading, and flushed in
//! bulk after enough writes to the collection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde_json::Value;
use tracing::debug;

use crate::query::{CanonicalQuery, MatchType, QueryError, QueryResult};
use crate::query::ShapeKey;

use super::entry::{
    CachedSolution, PlanCacheEntry, PlanCacheFeedback, PlanRankingDecision, QuerySolution,
};

fn is_empty_object(value: &Value) -> bool {
    value.as_object().map(|o| o.is_empty()).unwrap_or(true)
}

/// Decides whether a cached plan has degraded relative to its baseline.
///
/// The first time the feedback window fills, the mean and sample standard
/// deviation of the stored scores become the entry's baseline; if the
/// ranker's initial score already sits more than the threshold above the
/// mean, the entry is evicted without recording a baseline. Afterwards any
/// single score more than the threshold below the mean evicts.
fn has_plan_performance_degraded(entry: &mut PlanCacheEntry, latest: &PlanCacheFeedback) -> bool {
    if entry.average_score.is_none() {
        let n = entry.feedback.len() as f64;
        let sum: f64 = entry.feedback.iter().map(|f| f.score).sum();
        let mean = sum / n;

        let sum_of_squares: f64 = entry
            .feedback
            .iter()
            .map(|f| (f.score - mean) * (f.score - mean))
            .sum();
        let stddev = (sum_of_squares / (n - 1.0)).sqrt();

        let initial_score = entry.decision.score;
        if (initial_score - mean) > PlanCacheEntry::STD_DEV_THRESHOLD * stddev {
            return true;
        }

        entry.average_score = Some(mean);
        entry.stddev_score = Some(stddev);
    }

    let mean = entry.average_score.unwrap_or(0.0);
    let stddev = entry.stddev_score.unwrap_or(0.0);
    (mean - latest.score) > PlanCacheEntry::STD_DEV_THRESHOLD * stddev
}

/// Shape-keyed cache of chosen plans for one collection
#[derive(Debug, Default)]
pub struct PlanCache {
    cache: Mutex<HashMap<ShapeKey, PlanCacheEntry>>,
    write_operations: AtomicU64,
}

impl PlanCache {
    /// Writes tolerated before the whole cache is flushed
    pub const MAX_WRITE_OPERATIONS: u64 = 1000;

    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true iff caching is admissible for this query.
    ///
    /// Collection scans (no sort, empty `And` predicate) are not worth
    /// caching, and hinted / min-bounded / max-bounded queries bypass plan
    /// selection entirely.
    pub fn should_cache(query: &CanonicalQuery) -> bool {
        let parsed = query.parsed();
        let root = query.root();

        if is_empty_object(parsed.sort())
            && root.match_type() == MatchType::And
            && root.children().is_empty()
        {
            return false;
        }

        if !is_empty_object(parsed.hint()) {
            return false;
        }

        // Min and max queries are a special case of hinted queries.
        if !is_empty_object(parsed.min()) {
            return false;
        }
        if !is_empty_object(parsed.max()) {
            return false;
        }

        true
    }

    /// Installs (or replaces) the entry for the query's shape, taking
    /// ownership of the ranking decision.
    pub fn add(
        &self,
        query: &CanonicalQuery,
        solutions: &[QuerySolution],
        decision: PlanRankingDecision,
    ) -> QueryResult<()> {
        if solutions.is_empty() {
            return Err(QueryError::bad_value("no solutions provided"));
        }

        let mut entry = PlanCacheEntry::new(solutions, decision);
        let parsed = query.parsed();
        entry.query = parsed.filter().clone();
        entry.sort = parsed.sort().clone();
        entry.projection = parsed.projection().clone();

        // If the winning solution uses a blocking sort, record the first
        // fallback without one.
        if solutions[0].has_sort_stage {
            entry.backup_soln = solutions
                .iter()
                .enumerate()
                .skip(1)
                .find(|(_, s)| !s.has_sort_stage)
                .map(|(i, _)| i);
        }

        let mut cache = self.cache.lock().unwrap();
        debug!(shape = %query.shape_key(), solutions = solutions.len(), "caching plan");
        cache.insert(query.shape_key().clone(), entry);

        Ok(())
    }

    /// Returns a fresh snapshot of the cached plan for this shape.
    pub fn get(&self, query: &CanonicalQuery) -> QueryResult<CachedSolution> {
        let cache = self.cache.lock().unwrap();
        let entry = cache
            .get(query.shape_key())
            .ok_or_else(|| QueryError::bad_value("no such key in cache"))?;
        Ok(CachedSolution::new(query.shape_key(), entry))
    }

    /// Records execution feedback for the shape, evicting the entry when
    /// the scores show the plan degrading.
    pub fn feedback(
        &self,
        query: &CanonicalQuery,
        feedback: PlanCacheFeedback,
    ) -> QueryResult<()> {
        let mut cache = self.cache.lock().unwrap();
        let entry = cache
            .get_mut(query.shape_key())
            .ok_or_else(|| QueryError::bad_value("no such key in cache"))?;

        if entry.feedback.len() + 1 >= PlanCacheEntry::MAX_FEEDBACK {
            // Enough history to judge the plan; the triggering feedback is
            // itself never stored.
            if has_plan_performance_degraded(entry, &feedback) {
                debug!(shape = %query.shape_key(), score = feedback.score, "evicting degraded plan");
                cache.remove(query.shape_key());
            }
        } else {
            entry.feedback.push(feedback);
        }

        Ok(())
    }

    /// Deletes the entry for the query's shape.
    pub fn remove(&self, query: &CanonicalQuery) -> QueryResult<()> {
        let mut cache = self.cache.lock().unwrap();
        if cache.remove(query.shape_key()).is_none() {
            return Err(QueryError::bad_value("no such key in cache"));
        }
        Ok(())
    }

    /// Empties the cache and resets the write counter.
    pub fn clear(&self) {
        let mut cache = self.cache.lock().unwrap();
        cache.clear();
        self.write_operations.store(0, Ordering::SeqCst);
    }

    /// Snapshots every entry.
    pub fn get_all_solutions(&self) -> Vec<CachedSolution> {
        let cache = self.cache.lock().unwrap();
        cache
            .iter()
            .map(|(key, entry)| CachedSolution::new(key, entry))
            .collect()
    }

    /// Number of cached shapes
    pub fn size(&self) -> usize {
        let cache = self.cache.lock().unwrap();
        cache.len()
    }

    /// Counts a write against the collection; at the threshold the whole
    /// cache is flushed so plans are re-evaluated against the new data.
    ///
    /// Multiple threads crossing the threshold may each flush; clearing is
    /// idempotent so this is safe.
    pub fn notify_of_write_op(&self) {
        if self.write_operations.fetch_add(1, Ordering::SeqCst) + 1 < Self::MAX_WRITE_OPERATIONS {
            return;
        }
        debug!("write threshold reached, flushing plan cache");
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plancache::entry::SolutionCacheData;
    use serde_json::json;

    fn canonicalize(filter: Value) -> CanonicalQuery {
        CanonicalQuery::from_parts("test.c", filter, json!({}), json!({})).unwrap()
    }

    fn collscan_solution(has_sort_stage: bool) -> QuerySolution {
        QuerySolution {
            cache_data: SolutionCacheData::CollectionScan {
                admin_hint_applied: false,
            },
            has_sort_stage,
        }
    }

    #[test]
    fn test_should_cache_empty_filter_no_sort() {
        let query = canonicalize(json!({}));
        assert!(!PlanCache::should_cache(&query));
    }

    #[test]
    fn test_should_cache_simple_filter() {
        let query = canonicalize(json!({"a": 1}));
        assert!(PlanCache::should_cache(&query));
    }

    #[test]
    fn test_should_cache_empty_filter_with_sort() {
        let query = CanonicalQuery::from_parts("test.c", json!({}), json!({"a": 1}), json!({}))
            .unwrap();
        assert!(PlanCache::should_cache(&query));
    }

    #[test]
    fn test_should_cache_rejects_hint_min_max() {
        use crate::query::FindQuery;

        let builders: [fn(FindQuery) -> FindQuery; 3] = [
            |q| q.with_hint(json!({"a": 1})),
            |q| q.with_min(json!({"a": 0})),
            |q| q.with_max(json!({"a": 9})),
        ];
        for build in builders {
            let parsed = build(FindQuery::new("test.c", json!({"a": 1})));
            let query = CanonicalQuery::canonicalize(parsed).unwrap();
            assert!(!PlanCache::should_cache(&query));
        }
    }

    #[test]
    fn test_add_empty_solutions_rejected() {
        let cache = PlanCache::new();
        let query = canonicalize(json!({"a": 1}));
        assert!(cache
            .add(&query, &[], PlanRankingDecision::new(1.0))
            .is_err());
    }

    #[test]
    fn test_add_get_roundtrip() {
        let cache = PlanCache::new();
        let query = canonicalize(json!({"a": 1}));
        assert!(cache.get(&query).is_err());

        cache
            .add(
                &query,
                &[collscan_solution(false)],
                PlanRankingDecision::new(1.0),
            )
            .unwrap();

        let solution = cache.get(&query).unwrap();
        assert_eq!(&solution.key, query.shape_key());
        assert_eq!(solution.query, json!({"a": 1}));
        assert_eq!(solution.planner_data.len(), 1);
    }

    #[test]
    fn test_add_replaces_existing_entry() {
        let cache = PlanCache::new();
        let query = canonicalize(json!({"a": 1}));

        cache
            .add(
                &query,
                &[collscan_solution(false)],
                PlanRankingDecision::new(1.0),
            )
            .unwrap();
        cache
            .add(
                &query,
                &[collscan_solution(false), collscan_solution(false)],
                PlanRankingDecision::new(2.0),
            )
            .unwrap();

        assert_eq!(cache.size(), 1);
        assert_eq!(cache.get(&query).unwrap().planner_data.len(), 2);
    }

    #[test]
    fn test_same_shape_same_entry() {
        let cache = PlanCache::new();
        let one = canonicalize(json!({"a": 1}));
        let two = canonicalize(json!({"a": 2}));

        cache
            .add(
                &one,
                &[collscan_solution(false)],
                PlanRankingDecision::new(1.0),
            )
            .unwrap();

        // Same shape, different constant: hits the same entry.
        assert!(cache.get(&two).is_ok());
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn test_backup_solution_selection() {
        let cache = PlanCache::new();
        let query = canonicalize(json!({"a": 1}));

        cache
            .add(
                &query,
                &[
                    collscan_solution(true),
                    collscan_solution(true),
                    collscan_solution(false),
                ],
                PlanRankingDecision::new(1.0),
            )
            .unwrap();
        assert_eq!(cache.get(&query).unwrap().backup_soln, Some(2));

        cache
            .add(
                &query,
                &[collscan_solution(false), collscan_solution(true)],
                PlanRankingDecision::new(1.0),
            )
            .unwrap();
        assert_eq!(cache.get(&query).unwrap().backup_soln, None);
    }

    #[test]
    fn test_remove_and_clear() {
        let cache = PlanCache::new();
        let query = canonicalize(json!({"a": 1}));

        assert!(cache.remove(&query).is_err());

        cache
            .add(
                &query,
                &[collscan_solution(false)],
                PlanRankingDecision::new(1.0),
            )
            .unwrap();
        cache.remove(&query).unwrap();
        assert_eq!(cache.size(), 0);

        cache
            .add(
                &query,
                &[collscan_solution(false)],
                PlanRankingDecision::new(1.0),
            )
            .unwrap();
        cache.clear();
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_feedback_without_entry_rejected() {
        let cache = PlanCache::new();
        let query = canonicalize(json!({"a": 1}));
        assert!(cache
            .feedback(&query, PlanCacheFeedback::new(1.0))
            .is_err());
    }

    #[test]
    fn test_feedback_stores_up_to_window() {
        let cache = PlanCache::new();
        let query = canonicalize(json!({"a": 1}));
        cache
            .add(
                &query,
                &[collscan_solution(false)],
                PlanRankingDecision::new(1.0),
            )
            .unwrap();

        // A stable score stream fills the window and never evicts.
        for _ in 0..50 {
            cache
                .feedback(&query, PlanCacheFeedback::new(1.0))
                .unwrap();
        }
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn test_feedback_evicts_on_degradation() {
        let cache = PlanCache::new();
        let query = canonicalize(json!({"a": 1}));
        cache
            .add(
                &query,
                &[collscan_solution(false)],
                PlanRankingDecision::new(1.0),
            )
            .unwrap();

        // Scores with some spread so the stddev is non-zero.
        for i in 0..(PlanCacheEntry::MAX_FEEDBACK - 1) {
            let score = 1.0 + (i % 2) as f64 * 0.01;
            cache
                .feedback(&query, PlanCacheFeedback::new(score))
                .unwrap();
        }
        assert_eq!(cache.size(), 1);

        // A catastrophic score on a full window evicts.
        cache
            .feedback(&query, PlanCacheFeedback::new(-100.0))
            .unwrap();
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_feedback_evicts_when_baseline_already_degraded() {
        let cache = PlanCache::new();
        let query = canonicalize(json!({"a": 1}));
        // Initial score far above what execution actually delivers.
        cache
            .add(
                &query,
                &[collscan_solution(false)],
                PlanRankingDecision::new(100.0),
            )
            .unwrap();

        for i in 0..(PlanCacheEntry::MAX_FEEDBACK - 1) {
            let score = 1.0 + (i % 2) as f64 * 0.01;
            cache
                .feedback(&query, PlanCacheFeedback::new(score))
                .unwrap();
        }
        assert_eq!(cache.size(), 1);

        // Window full: the baseline check fires on the next feedback.
        cache
            .feedback(&query, PlanCacheFeedback::new(1.0))
            .unwrap();
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_notify_of_write_op_flushes_at_threshold() {
        let cache = PlanCache::new();
        let query = canonicalize(json!({"a": 1}));
        cache
            .add(
                &query,
                &[collscan_solution(false)],
                PlanRankingDecision::new(1.0),
            )
            .unwrap();

        for _ in 0..(PlanCache::MAX_WRITE_OPERATIONS - 1) {
            cache.notify_of_write_op();
        }
        assert_eq!(cache.size(), 1);

        cache.notify_of_write_op();
        assert_eq!(cache.size(), 0);

        // Counter reset: another full round is needed before the next flush.
        cache
            .add(
                &query,
                &[collscan_solution(false)],
                PlanRankingDecision::new(1.0),
            )
            .unwrap();
        cache.notify_of_write_op();
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn test_get_all_solutions() {
        let cache = PlanCache::new();
        let a = canonicalize(json!({"a": 1}));
        let b = canonicalize(json!({"b": 1}));
        cache
            .add(&a, &[collscan_solution(false)], PlanRankingDecision::new(1.0))
            .unwrap();
        cache
            .add(&b, &[collscan_solution(false)], PlanRankingDecision::new(1.0))
            .unwrap();

        let all = cache.get_all_solutions();
        assert_eq!(all.len(), 2);
        let keys: Vec<_> = all.iter().map(|s| s.key.clone()).collect();
        assert!(keys.contains(a.shape_key()));
        assert!(keys.contains(b.shape_key()));
    }
}
