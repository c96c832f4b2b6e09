//! Query parameters and results.

use crate::value::Value;

/// The type of a query parameter value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    String,
}

/// Describes one parameter accepted when querying a specific resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Param {
    name: &'static str,
    kind: ParamKind,
    required: bool,
}

impl Param {
    pub fn new(name: &'static str, kind: ParamKind, required: bool) -> Self {
        Param {
            name,
            kind,
            required,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> ParamKind {
        self.kind
    }

    /// A query is unacceptable unless it includes a value for this parameter.
    pub fn required(&self) -> bool {
        self.required
    }
}

/// The reference associated with one query result entry.
///
/// Integer references index into the queried sequence, string references key
/// into a map-shaped result, and a singleton result carries no reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryRef {
    None,
    Index(usize),
    Key(String),
}

/// The ordered result of a query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryResult {
    entries: Vec<(QueryRef, Value)>,
    singleton: bool,
    is_map: bool,
}

impl QueryResult {
    /// A result whose references are sequence indices.
    pub fn collection() -> Self {
        QueryResult {
            entries: Vec::new(),
            singleton: false,
            is_map: false,
        }
    }

    /// A result whose references are string keys.
    pub fn model() -> Self {
        QueryResult {
            entries: Vec::new(),
            singleton: false,
            is_map: true,
        }
    }

    /// A result representing one single value rather than a one-element
    /// collection.
    pub fn singleton(value: Value) -> Self {
        QueryResult {
            entries: vec![(QueryRef::None, value)],
            singleton: true,
            is_map: false,
        }
    }

    /// Add an entry. Singleton results are fixed at construction.
    pub fn push(&mut self, reference: QueryRef, value: Value) {
        debug_assert!(!self.singleton, "attempt to add to a singleton result");
        self.entries.push((reference, value));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_map(&self) -> bool {
        self.is_map
    }

    pub fn is_singleton(&self) -> bool {
        self.singleton
    }

    pub fn iter(&self) -> impl Iterator<Item = (&QueryRef, &Value)> {
        self.entries.iter().map(|(r, v)| (r, v))
    }

    pub fn value(&self, index: usize) -> Option<&Value> {
        self.entries.get(index).map(|(_, v)| v)
    }

    pub fn reference(&self, index: usize) -> Option<&QueryRef> {
        self.entries.get(index).map(|(r, _)| r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_keeps_insertion_order() {
        let mut qr = QueryResult::collection();
        qr.push(QueryRef::Index(0), Value::from("a"));
        qr.push(QueryRef::Index(3), Value::from("b"));
        assert_eq!(qr.len(), 2);
        assert!(!qr.is_map());
        assert!(!qr.is_singleton());
        assert_eq!(qr.reference(1), Some(&QueryRef::Index(3)));
        assert_eq!(qr.value(1), Some(&Value::from("b")));
    }

    #[test]
    fn singleton_has_one_unreferenced_entry() {
        let qr = QueryResult::singleton(Value::from(42i64));
        assert!(qr.is_singleton());
        assert_eq!(qr.len(), 1);
        assert_eq!(qr.reference(0), Some(&QueryRef::None));
        assert_eq!(qr.value(0), Some(&Value::from(42i64)));
    }

    #[test]
    fn model_uses_key_references() {
        let mut qr = QueryResult::model();
        qr.push(QueryRef::Key("mc1".to_string()), Value::from("x"));
        assert!(qr.is_map());
        assert_eq!(qr.reference(0), Some(&QueryRef::Key("mc1".to_string())));
    }
}
