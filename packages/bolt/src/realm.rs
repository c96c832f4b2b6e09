//! One realm: a single inventory file and its cached, merged view.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::SystemTime;

use indexmap::{IndexMap, IndexSet};

use muster_core::{StorageError, Value};

use crate::group::{Aliases, Inventory, UnmergedTargets};
use crate::schema::SchemaSet;
use crate::storage::{dig, MIN_REFRESH};
use crate::target::merge_declarations;

/// The cache for one inventory file.
///
/// A realm refreshes lazily: at most once per [`MIN_REFRESH`], and only
/// re-reads the file when its modification time has advanced. A file that
/// fails to load keeps the previous contents; a file that has disappeared
/// marks the realm for removal from the directory aggregate.
pub(crate) struct Realm {
    path: PathBuf,
    name: String,
    age: Option<SystemTime>,
    inventory: Option<Inventory>,
    unmerged: UnmergedTargets,
    aliases: Aliases,
    targets_by_id: IndexMap<String, Value>,
    targets_by_name: IndexMap<String, Value>,
    missing: bool,
}

impl Realm {
    pub(crate) fn new(name: String, path: PathBuf) -> Realm {
        Realm {
            path,
            name,
            age: None,
            inventory: None,
            unmerged: UnmergedTargets::new(),
            aliases: Aliases::new(),
            targets_by_id: IndexMap::new(),
            targets_by_name: IndexMap::new(),
            missing: false,
        }
    }

    /// True once the realm has attempted its first read.
    pub(crate) fn is_booted(&self) -> bool {
        self.age.is_some()
    }

    /// True when the backing file has disappeared; the storage drops such
    /// realms when it rebuilds the aggregate.
    pub(crate) fn is_missing(&self) -> bool {
        self.missing
    }

    pub(crate) fn targets_by_id(&self) -> &IndexMap<String, Value> {
        &self.targets_by_id
    }

    pub(crate) fn targets_by_name(&self) -> &IndexMap<String, Value> {
        &self.targets_by_name
    }

    /// Refresh the cached view if it is stale. Returns whether the contents
    /// may have changed.
    ///
    /// # Errors
    ///
    /// Filesystem faults other than the file having disappeared.
    pub(crate) fn refresh(&mut self, schemas: &SchemaSet) -> Result<bool, StorageError> {
        let now = SystemTime::now();
        let age = match self.age {
            None => {
                self.age = Some(now);
                self.read_inventory(schemas);
                return Ok(true);
            }
            Some(age) => age,
        };

        if now.duration_since(age).map_or(true, |d| d < MIN_REFRESH) {
            return Ok(false);
        }

        let meta = match fs::metadata(&self.path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("realm file {} disappeared", self.path.display());
                self.missing = true;
                self.targets_by_id.clear();
                self.targets_by_name.clear();
                self.age = Some(now);
                return Ok(true);
            }
            Err(e) => return Err(e.into()),
        };

        let changed = if meta.modified()? > age {
            self.read_inventory(schemas);
            true
        } else {
            false
        };
        self.age = Some(now);
        Ok(changed)
    }

    // Re-read the file and rebuild the merged view. On any load or
    // validation failure the previous contents stay in place.
    fn read_inventory(&mut self, schemas: &SchemaSet) {
        let input = match crate::yaml::read_inventory(&self.path) {
            Ok(input) => input,
            Err(e) => {
                log::error!("unable to read inventory from {}: {e}", self.path.display());
                return;
            }
        };
        if let Err(e) = schemas.validate(&input) {
            log::error!("rejecting inventory {}: {e}", self.path.display());
            return;
        }

        let mut inventory = Inventory::parse(&self.name, &input);
        let mut unmerged = UnmergedTargets::new();
        let mut aliases = Aliases::new();
        inventory.collect_targets(&mut unmerged);
        inventory.collect_aliases(&mut aliases);
        inventory.resolve_string_targets(&aliases, &mut unmerged, schemas);

        let mut by_id = IndexMap::with_capacity(unmerged.len());
        let mut by_name = IndexMap::with_capacity(unmerged.len());
        for (key, decls) in &unmerged {
            let merged = match merge_declarations(&inventory, &self.name, decls) {
                Ok(merged) => merged,
                Err(e) => {
                    log::error!("rejecting inventory {}: {e}", self.path.display());
                    return;
                }
            };
            let id = merged
                .as_map()
                .and_then(|m| m.get("id"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            by_id.insert(id, merged.clone());
            by_name.insert(key.clone(), merged);
        }

        log::debug!(
            "realm {} loaded with {} targets",
            self.name,
            by_name.len()
        );
        self.inventory = Some(inventory);
        self.unmerged = unmerged;
        self.aliases = aliases;
        self.targets_by_id = by_id;
        self.targets_by_name = by_name;
        self.missing = false;
    }

    /// Resolve a dot-path within this realm.
    ///
    /// `targets` addresses the realm's merged target sequence; any other
    /// first segment is a target name (or alias) looked up in the merged
    /// view. An empty path yields the whole by-name mapping.
    pub(crate) fn get(&self, parts: &[&str]) -> Option<Value> {
        match parts.split_first() {
            None => Some(Value::Map(self.targets_by_name.clone())),
            Some((&"targets", rest)) => match rest.split_first() {
                None => Some(self.targets_seq()),
                Some((index, tail)) => {
                    let i: usize = index.parse().ok()?;
                    let element = self.targets_by_name.values().nth(i)?;
                    dig(tail, element).cloned()
                }
            },
            Some((name, rest)) => {
                let target = self.target_by_name(name)?;
                dig(rest, target).cloned()
            }
        }
    }

    // Aliases keep resolving after the merge, so `<realm>.<alias>` addresses
    // the canonical target.
    fn target_by_name(&self, name: &str) -> Option<&Value> {
        self.targets_by_name.get(name).or_else(|| {
            let canonical = self.aliases.get(name)?;
            self.targets_by_name.get(canonical)
        })
    }

    pub(crate) fn targets_seq(&self) -> Value {
        Value::Seq(self.targets_by_name.values().cloned().collect())
    }

    /// Add the canonical key of every target that has an ancestor group whose
    /// name contains `group_filter`. Without a filter every key matches.
    pub(crate) fn matching_targets(&self, group_filter: Option<&str>, names: &mut IndexSet<String>) {
        let Some(inventory) = &self.inventory else {
            return;
        };
        match group_filter {
            None => names.extend(self.unmerged.keys().cloned()),
            Some(filter) => {
                for gid in inventory.find_groups(filter) {
                    for (key, decls) in &self.unmerged {
                        if decls
                            .iter()
                            .any(|tid| inventory.has_ancestor(&inventory.targets[tid.0].base, gid))
                        {
                            names.insert(key.clone());
                        }
                    }
                }
            }
        }
    }
}
