//! Modification records and the structural diff that produces them.
//!
//! `diff_map` and `diff_seq` compare two snapshots and emit the ordered
//! sequence of modifications that turns the first into the second. Resource
//! names are dotted paths rooted at the path prefix the caller passes in;
//! sequence elements are addressed by index.
//!
//! Within one mapping level, removals come first, then additions and
//! recursions in the order of the new mapping, and the rolled-up `Change`
//! for the level's own scalar fields comes last. Trailing sequence elements
//! are removed highest index first so that a consumer replaying the stream
//! can apply each removal at its stated index.

use indexmap::IndexMap;
use thiserror::Error;

use crate::value::{Map, Value};

/// Closed set of modification kinds carried on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ModKind {
    /// The value did not change.
    Unchanged = 0,
    /// A scalar was inserted into a sequence at an index.
    Add = 1,
    /// One or more scalar fields of a mapping changed.
    Change = 2,
    /// A complex sub-resource was added.
    Create = 3,
    /// A complex sub-resource was removed.
    Delete = 4,
    /// A scalar was removed from a sequence at an index.
    Remove = 5,
    /// The value at a resource changed shape.
    Reset = 6,
    /// A scalar was replaced in a sequence at an index.
    Set = 7,
}

impl ModKind {
    /// The integer code used on the wire.
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// The scalar fields that changed at one mapping level.
///
/// `None` marks a removed key; `Some` carries the new value. This is the
/// rolled-up payload of a `Change` modification.
pub type ChangedFields = IndexMap<String, Option<Value>>;

/// One entry in the ordered modification stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Modification {
    /// A scalar element was inserted at `index` of the sequence `resource`.
    Add {
        resource: String,
        index: usize,
        value: Value,
    },
    /// Scalar fields of the mapping `resource` changed.
    Change {
        resource: String,
        fields: ChangedFields,
    },
    /// The complex value `resource` came into existence.
    Create { resource: String, value: Value },
    /// The complex value `resource` was removed.
    Delete { resource: String },
    /// The scalar element at `index` of the sequence `resource` was removed.
    Remove { resource: String, index: usize },
    /// The value at `resource` changed shape (complex vs scalar, or mapping
    /// vs sequence). Carries the new value so the stream is replayable.
    Reset { resource: String, value: Value },
    /// The scalar element at `index` of the sequence `resource` was replaced.
    Set {
        resource: String,
        index: usize,
        value: Value,
    },
}

impl Modification {
    /// The dotted name of the container this modification applies to.
    pub fn resource(&self) -> &str {
        match self {
            Modification::Add { resource, .. }
            | Modification::Change { resource, .. }
            | Modification::Create { resource, .. }
            | Modification::Delete { resource }
            | Modification::Remove { resource, .. }
            | Modification::Reset { resource, .. }
            | Modification::Set { resource, .. } => resource,
        }
    }

    /// The wire kind of this modification.
    pub fn kind(&self) -> ModKind {
        match self {
            Modification::Add { .. } => ModKind::Add,
            Modification::Change { .. } => ModKind::Change,
            Modification::Create { .. } => ModKind::Create,
            Modification::Delete { .. } => ModKind::Delete,
            Modification::Remove { .. } => ModKind::Remove,
            Modification::Reset { .. } => ModKind::Reset,
            Modification::Set { .. } => ModKind::Set,
        }
    }
}

fn child_key(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

/// Append the modifications that turn mapping `prev` into mapping `next`.
///
/// `path` is the dotted resource name of the mapping itself.
pub fn diff_map(path: &str, prev: &Map, next: &Map, mods: &mut Vec<Modification>) {
    let mut changed = ChangedFields::new();

    for (k, old) in prev {
        if next.contains_key(k) {
            continue;
        }
        if old.is_complex() {
            mods.push(Modification::Delete {
                resource: child_key(path, k),
            });
        } else {
            changed.insert(k.clone(), None);
        }
    }

    for (k, new) in next {
        match prev.get(k) {
            None => {
                if new.is_complex() {
                    mods.push(Modification::Create {
                        resource: child_key(path, k),
                        value: new.clone(),
                    });
                } else {
                    changed.insert(k.clone(), Some(new.clone()));
                }
            }
            Some(old) if old == new => {}
            Some(Value::Map(om)) => {
                if let Value::Map(nm) = new {
                    diff_map(&child_key(path, k), om, nm, mods);
                } else {
                    mods.push(Modification::Reset {
                        resource: child_key(path, k),
                        value: new.clone(),
                    });
                }
            }
            Some(Value::Seq(os)) => {
                if let Value::Seq(ns) = new {
                    diff_seq(&child_key(path, k), os, ns, mods);
                } else {
                    mods.push(Modification::Reset {
                        resource: child_key(path, k),
                        value: new.clone(),
                    });
                }
            }
            Some(_) => {
                if new.is_complex() {
                    mods.push(Modification::Reset {
                        resource: child_key(path, k),
                        value: new.clone(),
                    });
                } else {
                    changed.insert(k.clone(), Some(new.clone()));
                }
            }
        }
    }

    if !changed.is_empty() {
        mods.push(Modification::Change {
            resource: path.to_string(),
            fields: changed,
        });
    }
}

/// Append the modifications that turn sequence `prev` into sequence `next`.
///
/// `path` is the dotted resource name of the sequence itself.
pub fn diff_seq(path: &str, prev: &[Value], next: &[Value], mods: &mut Vec<Modification>) {
    if prev.len() > next.len() {
        for i in (next.len()..prev.len()).rev() {
            if prev[i].is_complex() {
                mods.push(Modification::Delete {
                    resource: child_key(path, &i.to_string()),
                });
            } else {
                mods.push(Modification::Remove {
                    resource: path.to_string(),
                    index: i,
                });
            }
        }
    }

    for (i, new) in next.iter().enumerate() {
        match prev.get(i) {
            None => {
                if new.is_complex() {
                    mods.push(Modification::Create {
                        resource: child_key(path, &i.to_string()),
                        value: new.clone(),
                    });
                } else {
                    mods.push(Modification::Add {
                        resource: path.to_string(),
                        index: i,
                        value: new.clone(),
                    });
                }
            }
            Some(old) if old == new => {}
            Some(Value::Map(om)) => {
                if let Value::Map(nm) = new {
                    diff_map(&child_key(path, &i.to_string()), om, nm, mods);
                } else {
                    mods.push(Modification::Reset {
                        resource: child_key(path, &i.to_string()),
                        value: new.clone(),
                    });
                }
            }
            Some(Value::Seq(os)) => {
                if let Value::Seq(ns) = new {
                    diff_seq(&child_key(path, &i.to_string()), os, ns, mods);
                } else {
                    mods.push(Modification::Reset {
                        resource: child_key(path, &i.to_string()),
                        value: new.clone(),
                    });
                }
            }
            Some(_) => {
                if new.is_complex() {
                    mods.push(Modification::Reset {
                        resource: child_key(path, &i.to_string()),
                        value: new.clone(),
                    });
                } else {
                    mods.push(Modification::Set {
                        resource: path.to_string(),
                        index: i,
                        value: new.clone(),
                    });
                }
            }
        }
    }
}

/// Error replaying a modification stream.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApplyError {
    #[error("resource {0:?} does not resolve to a container")]
    Unresolvable(String),
    #[error("index {index} out of bounds applying to {resource:?}")]
    OutOfBounds { resource: String, index: usize },
}

fn locate<'a>(root: &'a mut Value, segments: &[&str]) -> Option<&'a mut Value> {
    let mut cur = root;
    for seg in segments {
        cur = match cur {
            Value::Map(m) => m.get_mut(*seg)?,
            Value::Seq(s) => {
                let i: usize = seg.parse().ok()?;
                s.get_mut(i)?
            }
            _ => return None,
        };
    }
    Some(cur)
}

/// Replay a modification stream onto `root`.
///
/// Resource names are resolved from `root`, which must be the container the
/// diff path prefix referred to (wrap a diffed value in a one-entry map when
/// the prefix was a key). Mirrors of a snapshot can be kept current with
/// this; the diff laws are verified against it.
///
/// # Errors
///
/// Fails when a resource name does not resolve to a container of the kind
/// the modification expects.
pub fn apply(root: &mut Value, mods: &[Modification]) -> Result<(), ApplyError> {
    for m in mods {
        apply_one(root, m)?;
    }
    Ok(())
}

fn apply_one(root: &mut Value, m: &Modification) -> Result<(), ApplyError> {
    let segments: Vec<&str> = m.resource().split('.').collect();
    let unresolvable = || ApplyError::Unresolvable(m.resource().to_string());

    match m {
        Modification::Add { index, value, .. } | Modification::Set { index, value, .. } => {
            let target = locate(root, &segments).ok_or_else(unresolvable)?;
            let seq = match target {
                Value::Seq(s) => s,
                _ => return Err(unresolvable()),
            };
            if matches!(m, Modification::Add { .. }) {
                if *index > seq.len() {
                    return Err(ApplyError::OutOfBounds {
                        resource: m.resource().to_string(),
                        index: *index,
                    });
                }
                seq.insert(*index, value.clone());
            } else {
                let slot = seq.get_mut(*index).ok_or(ApplyError::OutOfBounds {
                    resource: m.resource().to_string(),
                    index: *index,
                })?;
                *slot = value.clone();
            }
        }
        Modification::Remove { index, .. } => {
            let target = locate(root, &segments).ok_or_else(unresolvable)?;
            let seq = match target {
                Value::Seq(s) => s,
                _ => return Err(unresolvable()),
            };
            if *index >= seq.len() {
                return Err(ApplyError::OutOfBounds {
                    resource: m.resource().to_string(),
                    index: *index,
                });
            }
            seq.remove(*index);
        }
        Modification::Create { value, .. } | Modification::Reset { value, .. } => {
            let (last, parents) = segments.split_last().ok_or_else(unresolvable)?;
            let parent = locate(root, parents).ok_or_else(unresolvable)?;
            match parent {
                Value::Map(pm) => {
                    pm.insert(last.to_string(), value.clone());
                }
                Value::Seq(ps) => {
                    let i: usize = last.parse().map_err(|_| unresolvable())?;
                    if i == ps.len() {
                        ps.push(value.clone());
                    } else if i < ps.len() {
                        ps[i] = value.clone();
                    } else {
                        return Err(ApplyError::OutOfBounds {
                            resource: m.resource().to_string(),
                            index: i,
                        });
                    }
                }
                _ => return Err(unresolvable()),
            }
        }
        Modification::Delete { .. } => {
            let (last, parents) = segments.split_last().ok_or_else(unresolvable)?;
            let parent = locate(root, parents).ok_or_else(unresolvable)?;
            match parent {
                Value::Map(pm) => {
                    pm.shift_remove(*last);
                }
                Value::Seq(ps) => {
                    let i: usize = last.parse().map_err(|_| unresolvable())?;
                    if i < ps.len() {
                        ps.remove(i);
                    }
                }
                _ => return Err(unresolvable()),
            }
        }
        Modification::Change { fields, .. } => {
            let target = locate(root, &segments).ok_or_else(unresolvable)?;
            let map = match target {
                Value::Map(mp) => mp,
                _ => return Err(unresolvable()),
            };
            for (k, change) in fields {
                match change {
                    Some(v) => {
                        map.insert(k.clone(), v.clone());
                    }
                    None => {
                        map.shift_remove(k);
                    }
                }
            }
        }
    }
    Ok(())
}
