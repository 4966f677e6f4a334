//! Small document helpers shared across the query layer.

use serde_json::Value;

/// Field-order-sensitive document equality.
///
/// Object values in serde_json compare as maps, so `{a: 1, b: 1}` equals
/// `{b: 1, a: 1}`. Sort patterns and index key patterns are ordered
/// documents, so they are compared field by field in declaration order.
pub fn ordered_object_eq(a: &Value, b: &Value) -> bool {
    match (a.as_object(), b.as_object()) {
        (Some(a), Some(b)) => {
            a.len() == b.len()
                && a.iter()
                    .zip(b.iter())
                    .all(|((ka, va), (kb, vb))| ka == kb && ordered_object_eq(va, vb))
        }
        _ => a == b,
    }
}
