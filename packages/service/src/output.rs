//! Wire-shaped outputs: references, models, collections.

use indexmap::IndexMap;
use serde::Serialize;

use muster_core::{Map, Value};

/// A pointer to a resource delivered in place of its value.
///
/// Complex values are never embedded in a response; the transport receives a
/// reference carrying the resource's dotted name and fetches it separately
/// when the client asks. This keeps large sub-trees lazy and lets the
/// transport cache each resource once.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Reference {
    pub rid: String,
}

impl Reference {
    pub fn new(rid: impl Into<String>) -> Self {
        Reference { rid: rid.into() }
    }
}

/// A scalar delivered inline, or a reference standing in for a complex value.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutputValue {
    Ref(Reference),
    Inline(Value),
}

/// The key to value-or-reference view of a mapping resource.
pub type Model = IndexMap<String, OutputValue>;

/// A single value wrapped for the transport, which always delivers models.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LookupResult {
    pub value: OutputValue,
}

/// The shapes a resource can take on the wire.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Resource {
    Collection(Vec<OutputValue>),
    Model(Model),
    Value(LookupResult),
}

/// A query response: the resource plus the normalized query string that
/// identifies this result for cache keying.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QueryResponse {
    pub resource: Resource,
    pub query: String,
}

pub(crate) fn convert_value(rid: &str, value: &Value) -> OutputValue {
    if value.is_complex() {
        OutputValue::Ref(Reference::new(rid))
    } else {
        OutputValue::Inline(value.clone())
    }
}

pub(crate) fn seq_to_collection(items: &[Value], prefix: &str) -> Vec<OutputValue> {
    items
        .iter()
        .enumerate()
        .map(|(i, v)| convert_value(&format!("{prefix}{i}"), v))
        .collect()
}

pub(crate) fn map_to_model(m: &Map, prefix: &str) -> Model {
    m.iter()
        .map(|(k, v)| (k.clone(), convert_value(&format!("{prefix}{k}"), v)))
        .collect()
}
