//! The group tree of one realm and its two-pass target resolution.
//!
//! Pass one collects every full target declaration under its canonical key
//! (name if present, else uri) and every alias. Pass two resolves the string
//! references: aliases are rewritten to their canonical key, references to
//! known targets add a minimal declaration parented at the referencing
//! group, and unknown non-name references become new uri-only targets.

use indexmap::IndexMap;
use url::Url;

use muster_core::{Map, Value};

use crate::data::{Base, GroupId, TargetId};
use crate::schema::SchemaSet;
use crate::target::Target;

/// Declaration sequences per canonical target key, in collection order.
pub(crate) type UnmergedTargets = IndexMap<String, Vec<TargetId>>;

/// Alias to canonical-key mapping.
pub(crate) type Aliases = IndexMap<String, String>;

pub(crate) struct Group {
    pub(crate) base: Base,
    pub(crate) groups: Vec<GroupId>,
    pub(crate) targets: Vec<TargetId>,
    pub(crate) string_targets: Vec<String>,
}

/// The arena holding one realm's parsed group tree.
///
/// Groups and targets refer to their parent by [`GroupId`]; the parent chain
/// is acyclic by construction since parents are always created before their
/// children.
pub(crate) struct Inventory {
    pub(crate) groups: Vec<Group>,
    pub(crate) targets: Vec<Target>,
    root: GroupId,
}

impl Inventory {
    /// Build the group tree for a schema-validated document. The root group
    /// carries the realm name.
    pub(crate) fn parse(realm: &str, input: &Map) -> Inventory {
        let mut inv = Inventory {
            groups: Vec::new(),
            targets: Vec::new(),
            root: GroupId(0),
        };
        inv.root = inv.add_group(None, input, Some(realm.to_string()));
        inv
    }

    fn add_group(
        &mut self,
        parent: Option<GroupId>,
        input: &Map,
        name_override: Option<String>,
    ) -> GroupId {
        let id = GroupId(self.groups.len());
        let mut base = Base::from_input(input, parent);
        if name_override.is_some() {
            base.name = name_override;
        }
        self.groups.push(Group {
            base,
            groups: Vec::new(),
            targets: Vec::new(),
            string_targets: Vec::new(),
        });

        if let Some(entries) = input.get("targets").and_then(Value::as_seq) {
            for entry in entries {
                match entry {
                    Value::String(s) => self.groups[id.0].string_targets.push(s.clone()),
                    Value::Map(m) => {
                        let tid = TargetId(self.targets.len());
                        self.targets.push(Target::from_input(m, id));
                        self.groups[id.0].targets.push(tid);
                    }
                    _ => {}
                }
            }
        }

        if let Some(subs) = input.get("groups").and_then(Value::as_seq) {
            for sub in subs {
                if let Value::Map(m) = sub {
                    let child = self.add_group(Some(id), m, None);
                    self.groups[id.0].groups.push(child);
                }
            }
        }
        id
    }

    pub(crate) fn root(&self) -> GroupId {
        self.root
    }

    fn group_display_name(&self, id: GroupId) -> &str {
        self.groups[id.0].base.name.as_deref().unwrap_or("<unnamed>")
    }

    /// Group ids in tree order (each group before its descendants).
    pub(crate) fn group_ids(&self) -> Vec<GroupId> {
        let mut out = Vec::with_capacity(self.groups.len());
        self.push_group_ids(self.root, &mut out);
        out
    }

    fn push_group_ids(&self, id: GroupId, out: &mut Vec<GroupId>) {
        out.push(id);
        for sub in &self.groups[id.0].groups {
            self.push_group_ids(*sub, out);
        }
    }

    /// The ancestor chain of `base`, from the root down to the immediate
    /// parent.
    pub(crate) fn all_parents(&self, base: &Base) -> Vec<GroupId> {
        let mut chain = Vec::new();
        let mut cur = base.parent;
        while let Some(gid) = cur {
            chain.push(gid);
            cur = self.groups[gid.0].base.parent;
        }
        chain.reverse();
        chain
    }

    /// True when `group` appears anywhere in the parent chain of `base`.
    pub(crate) fn has_ancestor(&self, base: &Base, group: GroupId) -> bool {
        let mut cur = base.parent;
        while let Some(gid) = cur {
            if gid == group {
                return true;
            }
            cur = self.groups[gid.0].base.parent;
        }
        false
    }

    /// All groups whose name contains `name_filter`.
    pub(crate) fn find_groups(&self, name_filter: &str) -> Vec<GroupId> {
        self.group_ids()
            .into_iter()
            .filter(|gid| {
                self.groups[gid.0]
                    .base
                    .name
                    .as_deref()
                    .is_some_and(|n| n.contains(name_filter))
            })
            .collect()
    }

    /// Pass one: register every full declaration under its canonical key.
    pub(crate) fn collect_targets(&self, all: &mut UnmergedTargets) {
        for gid in self.group_ids() {
            for tid in &self.groups[gid.0].targets {
                if let Some(key) = self.targets[tid.0].canonical_key() {
                    all.entry(key.to_string()).or_default().push(*tid);
                }
            }
        }
    }

    /// Pass one: register every alias of every full declaration.
    pub(crate) fn collect_aliases(&self, all: &mut Aliases) {
        for gid in self.group_ids() {
            for tid in &self.groups[gid.0].targets {
                let target = &self.targets[tid.0];
                if let Some(key) = target.canonical_key() {
                    for alias in &target.aliases {
                        all.insert(alias.clone(), key.to_string());
                    }
                }
            }
        }
    }

    /// Pass two: resolve every string reference in the tree, adding the
    /// resulting declarations to `all`.
    pub(crate) fn resolve_string_targets(
        &mut self,
        aliases: &Aliases,
        all: &mut UnmergedTargets,
        schemas: &SchemaSet,
    ) {
        for gid in self.group_ids() {
            let references = self.groups[gid.0].string_targets.clone();
            for reference in references {
                self.resolve_string_target(gid, &reference, aliases, all, schemas);
            }
        }
    }

    fn resolve_string_target(
        &mut self,
        gid: GroupId,
        reference: &str,
        aliases: &Aliases,
        all: &mut UnmergedTargets,
        schemas: &SchemaSet,
    ) {
        let key = aliases
            .get(reference)
            .map(String::as_str)
            .unwrap_or(reference);

        let already_declared_here = all.get(key).map(|decls| {
            decls
                .iter()
                .any(|tid| self.has_ancestor(&self.targets[tid.0].base, gid))
        });

        match already_declared_here {
            Some(true) => {
                log::warn!(
                    "ignoring duplicate target in {}: {}",
                    self.group_display_name(gid),
                    reference
                );
            }
            Some(false) => {
                let minimal = if schemas.is_name(key) {
                    Target::named(key, gid)
                } else {
                    Target::with_uri(key, gid)
                };
                let tid = TargetId(self.targets.len());
                self.targets.push(minimal);
                if let Some(decls) = all.get_mut(key) {
                    decls.push(tid);
                }
            }
            None => {
                if schemas.is_name(reference) {
                    log::warn!(
                        "ignoring reference to non existing target in {}: {}",
                        self.group_display_name(gid),
                        reference
                    );
                    return;
                }
                if !is_valid_uri(reference) {
                    log::warn!(
                        "ignoring reference with invalid uri in {}: {}",
                        self.group_display_name(gid),
                        reference
                    );
                    return;
                }
                let tid = TargetId(self.targets.len());
                self.targets.push(Target::with_uri(reference, gid));
                all.insert(reference.to_string(), vec![tid]);
            }
        }
    }
}

// Bare hosts and host:port strings are legitimate target URIs, so a relative
// reference without a scheme is accepted.
fn is_valid_uri(s: &str) -> bool {
    match Url::parse(s) {
        Ok(_) => true,
        Err(url::ParseError::RelativeUrlWithoutBase) => true,
        Err(_) => false,
    }
}
