//! Plan cache command surface
//!
//! Document-in, document-out commands over a collection's plan cache and
//! query settings. The hint commands pin, list and clear admin hints; the
//! plan cache commands introspect and drop cached shapes. Authorization is
//! checked before any command body runs, and failures are formatted as
//! `{ok: 0, code, errmsg}`.

use serde_json::{json, Value};

use crate::plancache::PlanCache;
use crate::query::{CanonicalQuery, QueryError, QueryResult};
use crate::settings::QuerySettings;

/// A collection's query-layer state: one plan cache and one hint store.
#[derive(Debug, Default)]
pub struct CollectionQueryInfo {
    plan_cache: PlanCache,
    query_settings: QuerySettings,
}

impl CollectionQueryInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plan_cache(&self) -> &PlanCache {
        &self.plan_cache
    }

    pub fn query_settings(&self) -> &QuerySettings {
        &self.query_settings
    }
}

/// Actions the command surface authorizes against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    PlanCacheHint,
    PlanCacheRead,
    PlanCacheWrite,
}

/// Authorization seam; the embedding server supplies the real session.
pub trait AuthorizationSession {
    fn is_authorized(&self, ns: &str, action: ActionType) -> bool;
}

/// Session that permits everything; for embedded and test use.
#[derive(Debug, Default)]
pub struct AllowAll;

impl AuthorizationSession for AllowAll {
    fn is_authorized(&self, _ns: &str, _action: ActionType) -> bool {
        true
    }
}

/// Extracts and canonicalizes the `{query, sort?, projection?}` shape
/// description shared by the shape-targeted commands.
pub fn canonicalize_shape(ns: &str, cmd: &Value) -> QueryResult<CanonicalQuery> {
    let query = match cmd.get("query") {
        None => return Err(QueryError::bad_value("required field query missing")),
        Some(q) if !q.is_object() => {
            return Err(QueryError::bad_value("required field query must be an object"));
        }
        Some(q) => q.clone(),
    };

    let sort = match cmd.get("sort") {
        None => json!({}),
        Some(s) if !s.is_object() => {
            return Err(QueryError::bad_value("optional field sort must be an object"));
        }
        Some(s) => s.clone(),
    };

    let projection = match cmd.get("projection") {
        None => json!({}),
        Some(p) if !p.is_object() => {
            return Err(QueryError::bad_value(
                "optional field projection must be an object",
            ));
        }
        Some(p) => p.clone(),
    };

    CanonicalQuery::from_parts(ns, query, sort, projection)
}

/// planCacheListHints: every pinned hint for the collection.
pub fn list_hints(query_settings: &QuerySettings) -> Value {
    let hints: Vec<Value> = query_settings
        .get_all_allowed_indices()
        .into_iter()
        .map(|entry| {
            json!({
                "query": entry.query,
                "sort": entry.sort,
                "projection": entry.projection,
                "indexes": entry.index_key_patterns,
            })
        })
        .collect();
    json!({ "hints": hints })
}

/// planCacheClearHints: drop one shape's hint, or every hint when no query
/// is given.
pub fn clear_hints(
    query_settings: &QuerySettings,
    plan_cache: &PlanCache,
    ns: &str,
    cmd: &Value,
) -> QueryResult<()> {
    if cmd.get("query").is_some() {
        let cq = canonicalize_shape(ns, cmd)?;
        query_settings.remove_allowed_indices(&cq);

        // The cached plan for the shape may have been influenced by the
        // hint; drop it so the next query re-plans. A missing entry is
        // fine.
        let _ = plan_cache.remove(&cq);
        return Ok(());
    }

    // Guard against clearing the entire collection because the caller
    // forgot the query field.
    if cmd.get("sort").is_some() || cmd.get("projection").is_some() {
        return Err(QueryError::bad_value("sort or projection provided without query"));
    }

    // Snapshot before clearing so the coupled plan cache entries can be
    // resolved from the stored (query, sort, projection) documents.
    let entries = query_settings.get_all_allowed_indices();
    query_settings.clear_allowed_indices();

    for entry in entries {
        // These documents canonicalized when the hint was set; failure to
        // locate the shape now just means the cache was flushed by another
        // path.
        if let Ok(cq) =
            CanonicalQuery::from_parts(ns, entry.query, entry.sort, entry.projection)
        {
            let _ = plan_cache.remove(&cq);
        }
    }

    Ok(())
}

/// planCacheSetHint: pin the allowed indexes for a shape, replacing any
/// previous hint, and invalidate the shape's cached plan.
pub fn set_hint(
    query_settings: &QuerySettings,
    plan_cache: &PlanCache,
    ns: &str,
    cmd: &Value,
) -> QueryResult<()> {
    let indexes_value = cmd
        .get("indexes")
        .ok_or_else(|| QueryError::bad_value("required field indexes missing"))?;
    let indexes_array = indexes_value
        .as_array()
        .ok_or_else(|| QueryError::bad_value("required field indexes must be an array"))?;
    if indexes_array.is_empty() {
        return Err(QueryError::bad_value(
            "required field indexes must contain at least one index",
        ));
    }
    let mut indexes = Vec::with_capacity(indexes_array.len());
    for item in indexes_array {
        let obj = item
            .as_object()
            .ok_or_else(|| QueryError::bad_value("each item in indexes must be an object"))?;
        if obj.is_empty() {
            return Err(QueryError::bad_value("index specification cannot be empty"));
        }
        indexes.push(item.clone());
    }

    let cq = canonicalize_shape(ns, cmd)?;

    // Pin the hint, then invalidate the shape's cached plan so the planner
    // re-plans under the new allowed set.
    query_settings.set_allowed_indices(&cq, &indexes);
    let _ = plan_cache.remove(&cq);

    Ok(())
}

/// planCacheListQueryShapes: the shapes currently cached.
pub fn list_query_shapes(plan_cache: &PlanCache) -> Value {
    let shapes: Vec<Value> = plan_cache
        .get_all_solutions()
        .into_iter()
        .map(|cs| {
            json!({
                "query": cs.query,
                "sort": cs.sort,
                "projection": cs.projection,
            })
        })
        .collect();
    json!({ "shapes": shapes })
}

/// planCacheClear: drop every cached plan.
pub fn clear_plans(plan_cache: &PlanCache) {
    plan_cache.clear();
}

/// planCacheDrop: drop one shape's cached plan.
pub fn drop_shape(plan_cache: &PlanCache, ns: &str, cmd: &Value) -> QueryResult<()> {
    let cq = canonicalize_shape(ns, cmd)?;
    plan_cache.remove(&cq)
}

/// planCacheListPlans: the cached plans for one shape.
pub fn list_plans(plan_cache: &PlanCache, ns: &str, cmd: &Value) -> QueryResult<Value> {
    let cq = canonicalize_shape(ns, cmd)?;
    let solution = plan_cache.get(&cq)?;

    let plans: Vec<Value> = solution
        .planner_data
        .iter()
        .map(|scd| {
            json!({
                "details": { "solution": scd.to_string() },
                "reason": { "score": solution.decision_score },
                "feedback": { "scores": solution.feedback_scores.clone() },
                "hint": scd.admin_hint_applied(),
            })
        })
        .collect();
    Ok(json!({ "plans": plans }))
}

fn required_action(name: &str) -> Option<ActionType> {
    match name {
        "planCacheListHints" | "planCacheClearHints" | "planCacheSetHint" => {
            Some(ActionType::PlanCacheHint)
        }
        "planCacheListQueryShapes" | "planCacheListPlans" => Some(ActionType::PlanCacheRead),
        "planCacheClear" | "planCacheDrop" => Some(ActionType::PlanCacheWrite),
        _ => None,
    }
}

/// Appends command status to the result payload.
fn status_response(result: QueryResult<Value>) -> Value {
    match result {
        Ok(Value::Object(mut doc)) => {
            doc.insert("ok".into(), json!(1.0));
            Value::Object(doc)
        }
        Ok(_) => json!({"ok": 1.0}),
        Err(err) => json!({
            "ok": 0.0,
            "code": err.code().code(),
            "errmsg": err.message(),
        }),
    }
}

/// Runs one plan cache command against a collection, checking authorization
/// first. Always returns a response document.
pub fn run_command(
    info: &CollectionQueryInfo,
    auth: &dyn AuthorizationSession,
    ns: &str,
    name: &str,
    cmd: &Value,
) -> Value {
    let Some(action) = required_action(name) else {
        return status_response(Err(QueryError::bad_value(format!(
            "no such command: {}",
            name
        ))));
    };

    if !auth.is_authorized(ns, action) {
        return status_response(Err(QueryError::unauthorized("unauthorized")));
    }

    let result = match name {
        "planCacheListHints" => Ok(list_hints(&info.query_settings)),
        "planCacheClearHints" => {
            clear_hints(&info.query_settings, &info.plan_cache, ns, cmd).map(|_| json!({}))
        }
        "planCacheSetHint" => {
            set_hint(&info.query_settings, &info.plan_cache, ns, cmd).map(|_| json!({}))
        }
        "planCacheListQueryShapes" => Ok(list_query_shapes(&info.plan_cache)),
        "planCacheClear" => {
            clear_plans(&info.plan_cache);
            Ok(json!({}))
        }
        "planCacheDrop" => drop_shape(&info.plan_cache, ns, cmd).map(|_| json!({})),
        "planCacheListPlans" => list_plans(&info.plan_cache, ns, cmd),
        _ => Err(QueryError::bad_value(format!("no such command: {}", name))),
    };

    status_response(result)
}
