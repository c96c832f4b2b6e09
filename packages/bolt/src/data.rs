//! The structure shared by groups and targets.
//!
//! Groups and targets live in per-realm arenas ([`crate::group::Inventory`])
//! and refer to each other by index, so the parsed tree has no ownership
//! cycles and can be shared wholesale once built.

use muster_core::{Map, Value};

/// Index of a group in its realm's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct GroupId(pub(crate) usize);

/// Index of a target in its realm's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct TargetId(pub(crate) usize);

/// The properties common to groups and targets.
#[derive(Clone, Debug, Default)]
pub(crate) struct Base {
    pub(crate) name: Option<String>,
    pub(crate) config: Map,
    pub(crate) facts: Map,
    pub(crate) vars: Map,
    pub(crate) features: Vec<String>,
    pub(crate) parent: Option<GroupId>,
}

impl Base {
    pub(crate) fn from_input(input: &Map, parent: Option<GroupId>) -> Base {
        Base {
            name: input
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string),
            config: data_map(input, "config"),
            facts: data_map(input, "facts"),
            vars: data_map(input, "vars"),
            features: string_seq(input, "features"),
            parent,
        }
    }
}

/// The data mapping at `key`, or an empty one if absent.
pub(crate) fn data_map(input: &Map, key: &str) -> Map {
    input
        .get(key)
        .and_then(Value::as_map)
        .cloned()
        .unwrap_or_default()
}

/// The string sequence at `key`, or an empty one if absent.
pub(crate) fn string_seq(input: &Map, key: &str) -> Vec<String> {
    input
        .get(key)
        .and_then(Value::as_seq)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
