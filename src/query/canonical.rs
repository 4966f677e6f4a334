//! Canonical queries
//!
//! A `FindQuery` is the raw, immutable request bundle. Canonicalization
//! parses its filter into a predicate tree, normalizes and validates the
//! tree, parses the projection against it, and computes the shape key. The
//! resulting `CanonicalQuery` is immutable and is what the planner, the
//! plan cache and the query settings all key on.

use serde_json::{json, Value};

use super::errors::{QueryError, QueryResult};
use super::expr::{self, MatchExpr};
use super::parser;
use super::projection::ParsedProjection;
use super::shape::{self, ShapeKey};

/// Raw query bundle, immutable after construction
#[derive(Debug, Clone)]
pub struct FindQuery {
    ns: String,
    filter: Value,
    sort: Value,
    projection: Value,
    skip: u64,
    limit: Option<u64>,
    hint: Value,
    min: Value,
    max: Value,
    snapshot: bool,
}

impl FindQuery {
    /// Creates a query over `ns` with the given filter and no other options
    pub fn new(ns: impl Into<String>, filter: Value) -> Self {
        Self {
            ns: ns.into(),
            filter,
            sort: json!({}),
            projection: json!({}),
            skip: 0,
            limit: None,
            hint: json!({}),
            min: json!({}),
            max: json!({}),
            snapshot: false,
        }
    }

    /// Sets the sort document
    pub fn with_sort(mut self, sort: Value) -> Self {
        self.sort = sort;
        self
    }

    /// Sets the projection document
    pub fn with_projection(mut self, projection: Value) -> Self {
        self.projection = projection;
        self
    }

    /// Sets the number of documents to skip
    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }

    /// Sets the result limit
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the index hint document
    pub fn with_hint(mut self, hint: Value) -> Self {
        self.hint = hint;
        self
    }

    /// Sets the min bound document
    pub fn with_min(mut self, min: Value) -> Self {
        self.min = min;
        self
    }

    /// Sets the max bound document
    pub fn with_max(mut self, max: Value) -> Self {
        self.max = max;
        self
    }

    /// Sets the snapshot flag
    pub fn with_snapshot(mut self, snapshot: bool) -> Self {
        self.snapshot = snapshot;
        self
    }

    pub fn ns(&self) -> &str {
        &self.ns
    }

    pub fn filter(&self) -> &Value {
        &self.filter
    }

    pub fn sort(&self) -> &Value {
        &self.sort
    }

    pub fn projection(&self) -> &Value {
        &self.projection
    }

    pub fn skip(&self) -> u64 {
        self.skip
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn hint(&self) -> &Value {
        &self.hint
    }

    pub fn min(&self) -> &Value {
        &self.min
    }

    pub fn max(&self) -> &Value {
        &self.max
    }

    pub fn is_snapshot(&self) -> bool {
        self.snapshot
    }

    /// Validates the raw bundle before any parsing happens.
    fn validate(&self) -> QueryResult<()> {
        for (name, doc) in [
            ("filter", &self.filter),
            ("sort", &self.sort),
            ("projection", &self.projection),
            ("hint", &self.hint),
            ("min", &self.min),
            ("max", &self.max),
        ] {
            if !doc.is_object() {
                return Err(QueryError::bad_value(format!("{} must be an object", name)));
            }
        }

        for value in self.sort.as_object().into_iter().flatten().map(|(_, v)| v) {
            let is_direction = value.as_i64() == Some(1)
                || value.as_i64() == Some(-1)
                || value.as_f64() == Some(1.0)
                || value.as_f64() == Some(-1.0);
            let is_meta = value
                .as_object()
                .and_then(|o| o.get("$meta"))
                .and_then(Value::as_str)
                == Some("textScore");
            if !is_direction && !is_meta {
                return Err(QueryError::bad_value("bad sort specification"));
            }
        }

        Ok(())
    }
}

fn is_empty_object(value: &Value) -> bool {
    value.as_object().map(|o| o.is_empty()).unwrap_or(true)
}

/// A parsed, normalized, validated, shape-keyed query
#[derive(Debug, Clone)]
pub struct CanonicalQuery {
    parsed: FindQuery,
    root: MatchExpr,
    shape_key: ShapeKey,
    projection: Option<ParsedProjection>,
}

impl CanonicalQuery {
    /// Canonicalizes a raw query bundle.
    ///
    /// Fails with `BadValue` on a malformed bundle, a filter grammar error,
    /// a legality-invariant breach, or a projection incompatible with the
    /// predicate.
    pub fn canonicalize(parsed: FindQuery) -> QueryResult<CanonicalQuery> {
        parsed.validate()?;

        let root = parser::parse(parsed.filter())?;
        let mut root = expr::normalize(root);
        expr::sort_tree(&mut root);
        expr::is_valid(&root)?;

        let projection = if is_empty_object(parsed.projection()) {
            None
        } else {
            Some(ParsedProjection::make(parsed.projection(), &root)?)
        };

        let shape_key = shape::encode(&root, parsed.sort(), parsed.projection());

        Ok(CanonicalQuery {
            parsed,
            root,
            shape_key,
            projection,
        })
    }

    /// Convenience constructor from the common (ns, filter, sort,
    /// projection) quadruple.
    pub fn from_parts(
        ns: impl Into<String>,
        filter: Value,
        sort: Value,
        projection: Value,
    ) -> QueryResult<CanonicalQuery> {
        Self::canonicalize(
            FindQuery::new(ns, filter)
                .with_sort(sort)
                .with_projection(projection),
        )
    }

    /// The raw bundle this query was canonicalized from
    pub fn parsed(&self) -> &FindQuery {
        &self.parsed
    }

    /// The normalized predicate root
    pub fn root(&self) -> &MatchExpr {
        &self.root
    }

    /// The shape key identifying this query's structural form
    pub fn shape_key(&self) -> &ShapeKey {
        &self.shape_key
    }

    /// The parsed projection, when one was supplied
    pub fn projection(&self) -> Option<&ParsedProjection> {
        self.projection.as_ref()
    }
}
