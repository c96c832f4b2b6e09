//! Deep merge of value mappings.

use crate::value::{Map, Value};

/// Create a new map that contains all keys from both `a` and `b`. The value
/// of `b` takes precedence for identical keys unless both values are maps, in
/// which case this function is called recursively.
///
/// If either side is empty the other is returned unchanged.
pub fn deep_merge(a: &Map, b: &Map) -> Map {
    if b.is_empty() {
        return a.clone();
    }
    if a.is_empty() {
        return b.clone();
    }
    let mut merged = a.clone();
    for (k, v) in b {
        let entry = match (merged.get(k), v) {
            (Some(Value::Map(ma)), Value::Map(mb)) => Value::Map(deep_merge(ma, mb)),
            _ => v.clone(),
        };
        merged.insert(k.clone(), entry);
    }
    merged
}
