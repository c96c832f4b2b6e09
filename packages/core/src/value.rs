//! The Value type - the tree every inventory snapshot is made of.
//!
//! A dynamically-typed tree covering exactly the shapes a version-2 inventory
//! document can contain: null, booleans, integers, strings, sequences and
//! insertion-ordered mappings with string keys. There is deliberately no
//! float variant, which keeps the whole tree `Eq` and `Hash`.

use std::hash::{Hash, Hasher};

use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

/// An insertion-ordered mapping from string keys to values.
///
/// Every mapping in an inventory document - `config`, `facts`, `vars`, the
/// merged target view - is one of these. Iteration yields entries in the
/// order they were first inserted.
pub type Map = IndexMap<String, Value>;

/// A tree-shaped value.
///
/// Snapshots published by a storage are built from these and shared behind
/// `Arc`; once published they are never mutated, so readers may keep
/// traversing a snapshot after the storage has moved on.
#[derive(Clone, Debug, Default)]
pub enum Value {
    /// Absence of a value. Distinct from "key doesn't exist".
    #[default]
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed 64-bit integer.
    Int(i64),
    /// UTF-8 string.
    String(String),
    /// Ordered sequence of values.
    Seq(Vec<Value>),
    /// Insertion-ordered mapping with string keys.
    Map(Map),
}

impl Value {
    /// Create an empty map value.
    pub fn map() -> Self {
        Value::Map(Map::new())
    }

    /// Create an empty sequence value.
    pub fn seq() -> Self {
        Value::Seq(Vec::new())
    }

    /// True for mappings and sequences, false for every scalar.
    ///
    /// Complex values are the ones a transport addresses through references;
    /// the diff emits `Create`/`Delete` for them and folds scalar changes
    /// into rolled-up `Change` events.
    pub fn is_complex(&self) -> bool {
        matches!(self, Value::Map(_) | Value::Seq(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&[Value]> {
        match self {
            Value::Seq(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

// Equality is structural and order-sensitive for mappings so that it stays
// consistent with `Hash`, which folds entries in iteration order.

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Seq(a), Value::Seq(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x == y)
            }
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Null => state.write_u8(0),
            Value::Bool(b) => {
                state.write_u8(1);
                b.hash(state);
            }
            Value::Int(i) => {
                state.write_u8(2);
                i.hash(state);
            }
            Value::String(s) => {
                state.write_u8(3);
                s.hash(state);
            }
            Value::Seq(s) => {
                state.write_u8(4);
                for v in s {
                    v.hash(state);
                }
            }
            Value::Map(m) => {
                state.write_u8(5);
                for (k, v) in m {
                    k.hash(state);
                    v.hash(state);
                }
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::String(s) => serializer.serialize_str(s),
            Value::Seq(s) => {
                let mut seq = serializer.serialize_seq(Some(s.len()))?;
                for v in s {
                    seq.serialize_element(v)?;
                }
                seq.end()
            }
            Value::Map(m) => {
                let mut map = serializer.serialize_map(Some(m.len()))?;
                for (k, v) in m {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

// Conversion from common types

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Map> for Value {
    fn from(v: Map) -> Self {
        Value::Map(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Seq(v.into_iter().map(Into::into).collect())
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Value {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Value::Map(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
