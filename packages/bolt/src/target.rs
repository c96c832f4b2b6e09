//! Targets, per-target merges and the merged target view.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use thiserror::Error;

use muster_core::{deep_merge, Map, StorageError, Value};

use crate::data::{string_seq, Base, GroupId, TargetId};
use crate::group::Inventory;

/// One target declaration.
pub(crate) struct Target {
    pub(crate) base: Base,
    pub(crate) uri: Option<String>,
    pub(crate) aliases: Vec<String>,
}

impl Target {
    pub(crate) fn from_input(input: &Map, parent: GroupId) -> Target {
        let aliases = match input.get("alias") {
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Seq(_)) => string_seq(input, "alias"),
            _ => Vec::new(),
        };
        Target {
            base: Base::from_input(input, Some(parent)),
            uri: input.get("uri").and_then(Value::as_str).map(str::to_string),
            aliases,
        }
    }

    /// A minimal declaration produced by resolving a name reference.
    pub(crate) fn named(name: &str, parent: GroupId) -> Target {
        Target {
            base: Base {
                name: Some(name.to_string()),
                parent: Some(parent),
                ..Base::default()
            },
            uri: None,
            aliases: Vec::new(),
        }
    }

    /// A minimal declaration produced by resolving a uri reference.
    pub(crate) fn with_uri(uri: &str, parent: GroupId) -> Target {
        Target {
            base: Base {
                parent: Some(parent),
                ..Base::default()
            },
            uri: Some(uri.to_string()),
            aliases: Vec::new(),
        }
    }

    /// The key declarations of the same target accumulate under: the name if
    /// present, else the uri.
    pub(crate) fn canonical_key(&self) -> Option<&str> {
        self.base.name.as_deref().or(self.uri.as_deref())
    }
}

impl Inventory {
    /// Deep merge of `config` from the root group down to the target.
    pub(crate) fn target_config(&self, tid: TargetId) -> Map {
        let target = &self.targets[tid.0];
        let mut merged = Map::new();
        for gid in self.all_parents(&target.base) {
            merged = deep_merge(&merged, &self.groups[gid.0].base.config);
        }
        deep_merge(&merged, &target.base.config)
    }

    /// Deep merge of `facts` from the root group down to the target.
    pub(crate) fn target_facts(&self, tid: TargetId) -> Map {
        let target = &self.targets[tid.0];
        let mut merged = Map::new();
        for gid in self.all_parents(&target.base) {
            merged = deep_merge(&merged, &self.groups[gid.0].base.facts);
        }
        deep_merge(&merged, &target.base.facts)
    }

    /// Shallow merge of `vars`; mappings in a child take precedence.
    pub(crate) fn target_vars(&self, tid: TargetId) -> Map {
        let target = &self.targets[tid.0];
        let mut merged = Map::new();
        for gid in self.all_parents(&target.base) {
            for (k, v) in &self.groups[gid.0].base.vars {
                merged.insert(k.clone(), v.clone());
            }
        }
        for (k, v) in &target.base.vars {
            merged.insert(k.clone(), v.clone());
        }
        merged
    }

    /// Sorted, deduplicated union of `features` from root to target.
    pub(crate) fn target_features(&self, tid: TargetId) -> Vec<String> {
        let target = &self.targets[tid.0];
        let mut merged = Vec::new();
        for gid in self.all_parents(&target.base) {
            merged.extend(self.groups[gid.0].base.features.iter().cloned());
        }
        merged.extend(target.base.features.iter().cloned());
        merged.sort();
        merged.dedup();
        merged
    }
}

/// Fold one canonical key's declaration sequence into the merged,
/// user-visible target view.
///
/// `config` and `facts` deep-merge in declaration order, `features` is the
/// sorted deduplicated union, `vars` an ordered shallow union. The first
/// `name` and `uri` win; later conflicting values are warned about and
/// dropped.
///
/// # Errors
///
/// A declaration sequence with neither a name nor a uri is an internal
/// fault: the schema rejects such documents before they get here.
pub(crate) fn merge_declarations(
    inv: &Inventory,
    realm: &str,
    decls: &[TargetId],
) -> Result<Value, StorageError> {
    let mut config = Map::new();
    let mut facts = Map::new();
    let mut features: Vec<String> = Vec::new();
    let mut vars = Map::new();
    let mut name: Option<String> = None;
    let mut uri: Option<String> = None;

    for tid in decls {
        let target = &inv.targets[tid.0];
        config = deep_merge(&config, &inv.target_config(*tid));
        facts = deep_merge(&facts, &inv.target_facts(*tid));
        features.extend(inv.target_features(*tid));
        for (k, v) in inv.target_vars(*tid) {
            vars.insert(k, v);
        }
        if let Some(n) = &target.base.name {
            match &name {
                None => name = Some(n.clone()),
                Some(existing) if existing != n => {
                    log::warn!("target is using conflicting names: {existing} != {n}");
                }
                _ => {}
            }
        }
        if let Some(u) = &target.uri {
            match &uri {
                None => uri = Some(u.clone()),
                Some(existing) if existing != u => {
                    log::warn!(
                        "target {} is using conflicting uris: {existing} != {u}",
                        name.as_deref().unwrap_or("<unnamed>")
                    );
                }
                _ => {}
            }
        }
    }
    features.sort();
    features.dedup();

    let key = name.as_deref().or(uri.as_deref()).ok_or_else(|| {
        StorageError::Internal(format!("target in realm {realm:?} has no name and no uri"))
    })?;

    let mut merged = Map::new();
    merged.insert("id".to_string(), Value::from(make_id(realm, key)));
    merged.insert("realm".to_string(), Value::from(realm));
    if let Some(n) = name {
        merged.insert("name".to_string(), Value::from(n));
    }
    if let Some(u) = uri {
        merged.insert("uri".to_string(), Value::from(u));
    }
    if !config.is_empty() {
        merged.insert("config".to_string(), Value::Map(config));
    }
    if !facts.is_empty() {
        merged.insert("facts".to_string(), Value::Map(facts));
    }
    if !features.is_empty() {
        merged.insert("features".to_string(), Value::from(features));
    }
    if !vars.is_empty() {
        merged.insert("vars".to_string(), Value::Map(vars));
    }
    Ok(Value::Map(merged))
}

/// Failure decoding a resource id.
#[derive(Debug, Error)]
pub enum IdError {
    #[error("invalid resource id: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("invalid resource id: not valid utf-8")]
    NotUtf8,

    #[error("invalid resource id: missing realm separator")]
    MissingSeparator,
}

/// The stable, realm-scoped id of a merged target: the url-safe base64
/// encoding of `<realm>.<name-or-uri>`.
pub fn make_id(realm: &str, name: &str) -> String {
    URL_SAFE.encode(format!("{realm}.{name}"))
}

/// Recover the realm and target key from a resource id.
///
/// # Errors
///
/// Ids that are not base64, not utf-8, or carry no `.` separator.
pub fn split_id(id: &str) -> Result<(String, String), IdError> {
    let bytes = URL_SAFE.decode(id)?;
    let s = String::from_utf8(bytes).map_err(|_| IdError::NotUtf8)?;
    let at = s.find('.').filter(|at| *at >= 1).ok_or(IdError::MissingSeparator)?;
    Ok((s[..at].to_string(), s[at + 1..].to_string()))
}
