//! Index bounds
//!
//! Bounds over an index are a list of intervals per indexed field, in key
//! pattern order. An interval whose endpoints coincide (both inclusive) is
//! a point. A scan may instead carry a single contiguous min/max range,
//! flagged as a simple range; such bounds have no per-field structure.

use serde_json::{json, Value};

/// A closed or open interval over one field's values
#[derive(Debug, Clone, PartialEq)]
pub struct Interval {
    pub start: Value,
    pub end: Value,
    pub start_inclusive: bool,
    pub end_inclusive: bool,
}

impl Interval {
    /// The interval containing exactly one value
    pub fn point(value: Value) -> Self {
        Self {
            start: value.clone(),
            end: value,
            start_inclusive: true,
            end_inclusive: true,
        }
    }

    /// The interval containing every value
    pub fn all_values() -> Self {
        Self {
            start: json!({"$minKey": 1}),
            end: json!({"$maxKey": 1}),
            start_inclusive: true,
            end_inclusive: true,
        }
    }

    pub fn new(start: Value, end: Value, start_inclusive: bool, end_inclusive: bool) -> Self {
        Self {
            start,
            end,
            start_inclusive,
            end_inclusive,
        }
    }

    /// True if the endpoints coincide and both are included
    pub fn is_point(&self) -> bool {
        self.start_inclusive && self.end_inclusive && self.start == self.end
    }

    /// Document form, for stats dumps
    pub fn to_value(&self) -> Value {
        json!({
            "start": self.start,
            "end": self.end,
            "startInclusive": self.start_inclusive,
            "endInclusive": self.end_inclusive,
        })
    }
}

/// The intervals scanned for one indexed field, in scan order
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedIntervalList {
    pub field: String,
    pub intervals: Vec<Interval>,
}

impl OrderedIntervalList {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            intervals: Vec::new(),
        }
    }

    /// True if every interval in the list is a point
    pub fn is_union_of_points(&self) -> bool {
        self.intervals.iter().all(Interval::is_point)
    }
}

/// Bounds for every field of an index scan
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IndexBounds {
    pub fields: Vec<OrderedIntervalList>,
    /// A single contiguous min/max bound instead of per-field intervals
    pub is_simple_range: bool,
}

impl IndexBounds {
    pub fn to_value(&self) -> Value {
        let fields: Vec<Value> = self
            .fields
            .iter()
            .map(|oil| {
                json!({
                    "field": oil.field,
                    "intervals": oil.intervals.iter().map(Interval::to_value).collect::<Vec<_>>(),
                })
            })
            .collect();
        json!({ "fields": fields, "isSimpleRange": self.is_simple_range })
    }
}
