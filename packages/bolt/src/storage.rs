//! Directory-backed inventory storage: the realm cache and path engine.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use indexmap::{IndexMap, IndexSet};

use muster_core::change::{diff_map, diff_seq};
use muster_core::{
    Map, Modification, Param, ParamKind, QueryRef, QueryResult, Storage, StorageError, Value,
};

use crate::realm::Realm;
use crate::schema::SchemaSet;
use crate::target::split_id;

/// A realm or the directory is re-read at most once per this interval,
/// regardless of how many reads arrive.
pub const MIN_REFRESH: Duration = Duration::from_secs(1);

const TARGETS: &str = "targets";
const TARGET: &str = "target";

/// A [`Storage`] over a directory of inventory files.
///
/// Every `.yaml`/`.yml` file in the directory is one realm, named after the
/// file. The storage keeps a merged snapshot per realm plus the aggregate
/// target sequence across realms, refreshes with bounded staleness on every
/// read, and reports what changed as a modification stream.
///
/// All state sits behind one mutex; published values are owned clones, so a
/// caller may keep traversing a result after the storage has moved on.
pub struct DirectoryStorage {
    path: PathBuf,
    schemas: SchemaSet,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    booted: bool,
    age: Option<SystemTime>,
    realms: BTreeMap<String, Realm>,
    targets_by_id: IndexMap<String, Value>,
    targets: Vec<Value>,
}

impl DirectoryStorage {
    /// Create a storage for the inventory files in `path`. Nothing is read
    /// until the first access.
    pub fn new(path: impl Into<PathBuf>) -> DirectoryStorage {
        DirectoryStorage {
            path: path.into(),
            schemas: SchemaSet::new(),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bring the snapshot up to date and report what changed.
    ///
    /// The first refresh populates the aggregate silently; subsequent ones
    /// return the modification stream that turns the previous snapshot into
    /// the new one. Within the staleness window this is a no-op.
    ///
    /// # Errors
    ///
    /// Directory enumeration and stat faults. A single vanished realm file
    /// is not a fault; the realm is dropped and reported as modifications.
    pub fn refresh(&self) -> Result<Vec<Modification>, StorageError> {
        let mut inner = lock_or_recover(&self.inner);
        self.refresh_locked(&mut inner, false)
    }

    // A rescan that ignores the directory-level staleness window, used when
    // the watcher sees files appear or disappear. Per-realm staleness still
    // applies.
    pub(crate) fn force_refresh(&self) -> Result<Vec<Modification>, StorageError> {
        let mut inner = lock_or_recover(&self.inner);
        self.refresh_locked(&mut inner, true)
    }

    fn refresh_locked(
        &self,
        inner: &mut Inner,
        force_scan: bool,
    ) -> Result<Vec<Modification>, StorageError> {
        let now = SystemTime::now();
        let bootstrap = !inner.booted;
        if !bootstrap && !force_scan {
            if let Some(age) = inner.age {
                if now.duration_since(age).map_or(true, |d| d < MIN_REFRESH) {
                    return Ok(Vec::new());
                }
            }
        }
        inner.age = Some(now);

        let mut changed = false;

        let mut candidates: BTreeMap<String, PathBuf> = BTreeMap::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let Some(stem) = file_name
                .strip_suffix(".yaml")
                .or_else(|| file_name.strip_suffix(".yml"))
            else {
                continue;
            };
            if stem.is_empty() {
                continue;
            }
            candidates.insert(stem.to_string(), entry.path());
        }

        for (name, path) in &candidates {
            if !inner.realms.contains_key(name) {
                log::debug!("discovered realm {name} at {}", path.display());
                inner
                    .realms
                    .insert(name.clone(), Realm::new(name.clone(), path.clone()));
                changed = true;
            }
        }
        let gone: Vec<String> = inner
            .realms
            .keys()
            .filter(|name| !candidates.contains_key(*name))
            .cloned()
            .collect();
        for name in gone {
            log::debug!("realm {name} removed");
            inner.realms.remove(&name);
            changed = true;
        }

        // Refresh surviving realms in name order; content changes of a realm
        // that was already visible are reported against the realm's own
        // resource tree.
        let mut mods: Vec<Modification> = Vec::new();
        for (name, realm) in inner.realms.iter_mut() {
            let existed = realm.is_booted();
            let previous = if existed {
                realm.targets_by_name().clone()
            } else {
                IndexMap::new()
            };
            if realm.refresh(&self.schemas)? {
                changed = true;
                if existed && !realm.is_missing() {
                    diff_map(name, &previous, realm.targets_by_name(), &mut mods);
                }
            }
        }
        inner.realms.retain(|name, realm| {
            if realm.is_missing() {
                log::debug!("realm {name} dropped after its file disappeared");
                changed = true;
                false
            } else {
                true
            }
        });

        let mut by_id = IndexMap::new();
        for realm in inner.realms.values() {
            for (id, target) in realm.targets_by_id() {
                by_id.insert(id.clone(), target.clone());
            }
        }
        let next: Vec<Value> = by_id.values().cloned().collect();

        // The aggregate sequence is its own addressable resource, but its
        // events only concern membership; content changes inside a target
        // already went out against the realm tree above.
        if !bootstrap && changed && membership_changed(&inner.targets, &next) {
            diff_seq(TARGETS, &inner.targets, &next, &mut mods);
        }

        inner.targets = next;
        inner.targets_by_id = by_id;
        inner.booted = true;
        Ok(mods)
    }

    fn get_locked(
        &self,
        inner: &mut Inner,
        key: &str,
    ) -> Result<(Vec<Modification>, Option<Value>), StorageError> {
        let mods = self.refresh_locked(inner, false)?;
        let parts: Vec<&str> = key.split('.').collect();
        Ok((mods, lookup(inner, &parts)))
    }

    fn query_locked(
        &self,
        inner: &mut Inner,
        key: &str,
        params: &Map,
    ) -> Result<(Vec<Modification>, Option<QueryResult>), StorageError> {
        let (mods, value) = self.get_locked(inner, key)?;
        let items = match value.as_ref().and_then(Value::as_seq) {
            Some(items) if !items.is_empty() => items,
            _ => return Ok((mods, None)),
        };

        let string_param = |name: &str| params.get(name).and_then(Value::as_str).unwrap_or("");
        let realm_filter = string_param("realm");
        let group_filter = string_param("group");

        let mut names = IndexSet::new();
        for (name, realm) in &inner.realms {
            if !realm_filter.is_empty() && !name.contains(realm_filter) {
                continue;
            }
            let group = (!group_filter.is_empty()).then_some(group_filter);
            realm.matching_targets(group, &mut names);
        }
        if names.is_empty() {
            return Ok((mods, None));
        }

        let target_filter = string_param("target");
        if !target_filter.is_empty() {
            names.retain(|name| name.contains(target_filter));
            if names.is_empty() {
                return Ok((mods, None));
            }
        }

        let mut result = QueryResult::collection();
        for (i, item) in items.iter().enumerate() {
            let Some(target) = item.as_map() else {
                continue;
            };
            let name = target
                .get("name")
                .or_else(|| target.get("uri"))
                .and_then(Value::as_str)
                .unwrap_or("");
            if names.contains(name) {
                result.push(QueryRef::Index(i), item.clone());
            }
        }
        Ok((mods, Some(result)))
    }

    fn reject_write(
        &self,
        inner: &Inner,
        operation: &'static str,
        key: &str,
        value: Option<&Value>,
    ) -> StorageError {
        if let Some(id) = value
            .and_then(Value::as_map)
            .and_then(|target| target.get("id"))
            .and_then(Value::as_str)
        {
            if let Ok((realm, name)) = split_id(id) {
                if inner.realms.contains_key(&realm) {
                    return StorageError::Unsupported {
                        operation,
                        message: format!(
                            "modifying target {name:?} in realm {realm:?} is not implemented"
                        ),
                    };
                }
            }
        }
        StorageError::NotFound(key.to_string())
    }
}

impl Storage for DirectoryStorage {
    fn get(&self, key: &str) -> Result<(Vec<Modification>, Option<Value>), StorageError> {
        let mut inner = lock_or_recover(&self.inner);
        self.get_locked(&mut inner, key)
    }

    fn query(
        &self,
        key: &str,
        params: &Map,
    ) -> Result<(Vec<Modification>, Option<QueryResult>), StorageError> {
        let mut inner = lock_or_recover(&self.inner);
        self.query_locked(&mut inner, key, params)
    }

    fn query_keys(&self, key: &str) -> Vec<Param> {
        let parts: Vec<&str> = key.split('.').collect();
        match parts.as_slice() {
            [TARGETS] => vec![
                Param::new("target", ParamKind::String, false),
                Param::new("group", ParamKind::String, false),
                Param::new("realm", ParamKind::String, false),
            ],
            [_, TARGETS] => vec![
                Param::new("target", ParamKind::String, false),
                Param::new("group", ParamKind::String, false),
            ],
            _ => Vec::new(),
        }
    }

    fn set(&self, key: &str, _model: &Map) -> Result<Vec<Modification>, StorageError> {
        let mut inner = lock_or_recover(&self.inner);
        let (_, value) = self.get_locked(&mut inner, key)?;
        Err(self.reject_write(&inner, "set", key, value.as_ref()))
    }

    fn delete(&self, key: &str) -> Result<Vec<Modification>, StorageError> {
        let mut inner = lock_or_recover(&self.inner);
        let (_, value) = self.get_locked(&mut inner, key)?;
        Err(self.reject_write(&inner, "delete", key, value.as_ref()))
    }
}

fn lookup(inner: &Inner, parts: &[&str]) -> Option<Value> {
    let (first, rest) = parts.split_first()?;
    match *first {
        TARGETS => match rest.split_first() {
            None => Some(Value::Seq(inner.targets.clone())),
            Some((index, tail)) => {
                let i: usize = index.parse().ok()?;
                dig(tail, inner.targets.get(i)?).cloned()
            }
        },
        TARGET => {
            let (id, tail) = rest.split_first()?;
            dig(tail, inner.targets_by_id.get(*id)?).cloned()
        }
        _ => inner.realms.get(*first)?.get(rest),
    }
}

fn membership_changed(prev: &[Value], next: &[Value]) -> bool {
    fn id_of(target: &Value) -> Option<&str> {
        target.as_map()?.get("id")?.as_str()
    }
    prev.len() != next.len()
        || prev
            .iter()
            .zip(next)
            .any(|(a, b)| id_of(a) != id_of(b))
}

/// Step through `keys` left to right: sequences take in-bounds numeric
/// segments, mappings take string keys, anything else ends the walk.
pub(crate) fn dig<'a>(keys: &[&str], value: &'a Value) -> Option<&'a Value> {
    let mut current = value;
    for key in keys {
        current = match current {
            Value::Seq(items) => {
                let i: usize = key.parse().ok()?;
                items.get(i)?
            }
            Value::Map(m) => m.get(*key)?,
            _ => return None,
        };
    }
    Some(current)
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::make_id;
    use std::io::Write;

    const REALM_A: &str = r#"version: 2
groups:
  - name: memcached
    config:
      transport: ssh
      ssh:
        user: root
    targets:
      - name: mc1
        uri: 192.168.101.50
      - name: mc2
        uri: 192.168.101.60
  - name: winrm_targets
    config:
      transport: winrm
      winrm:
        realm: MYDOMAIN
        ssl: false
    targets:
      - uri: 172.16.219.20
      - uri: 172.16.219.30
"#;

    const REALM_B: &str = r#"version: 2
targets:
  - name: db01
    uri: 10.0.0.7
"#;

    fn write_realm(dir: &Path, file: &str, contents: &str) {
        let mut f = fs::File::create(dir.join(file)).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f.sync_all().unwrap();
    }

    fn storage_with_realm_a() -> (tempfile::TempDir, DirectoryStorage) {
        let dir = tempfile::tempdir().unwrap();
        write_realm(dir.path(), "realm_a.yaml", REALM_A);
        let storage = DirectoryStorage::new(dir.path());
        (dir, storage)
    }

    fn get_value(storage: &DirectoryStorage, key: &str) -> Option<Value> {
        let (mods, value) = storage.get(key).unwrap();
        assert!(mods.is_empty());
        value
    }

    #[test]
    fn bootstrap_refresh_emits_no_modifications() {
        let (_dir, storage) = storage_with_realm_a();
        assert!(storage.refresh().unwrap().is_empty());
    }

    #[test]
    fn deep_path_resolves_through_the_merged_config() {
        let (_dir, storage) = storage_with_realm_a();
        assert_eq!(
            get_value(&storage, "realm_a.mc1.config.transport"),
            Some(Value::from("ssh"))
        );
        assert_eq!(
            get_value(&storage, "realm_a.mc1.config.ssh.user"),
            Some(Value::from("root"))
        );
    }

    #[test]
    fn aggregate_targets_sequence_spans_the_realm() {
        let (_dir, storage) = storage_with_realm_a();
        let targets = get_value(&storage, "targets").unwrap();
        assert_eq!(targets.as_seq().unwrap().len(), 4);
        assert_eq!(
            get_value(&storage, "targets.0.name"),
            Some(Value::from("mc1"))
        );
    }

    #[test]
    fn targets_are_addressable_by_id() {
        let (_dir, storage) = storage_with_realm_a();
        let id = make_id("realm_a", "mc1");
        let by_id = get_value(&storage, &format!("target.{id}")).unwrap();
        assert_eq!(
            by_id.as_map().unwrap().get("name"),
            Some(&Value::from("mc1"))
        );
        assert_eq!(
            get_value(&storage, &format!("target.{id}.config.transport")),
            Some(Value::from("ssh"))
        );
    }

    #[test]
    fn unknown_keys_resolve_to_nothing() {
        let (_dir, storage) = storage_with_realm_a();
        assert_eq!(get_value(&storage, "realm_a.mc9"), None);
        assert_eq!(get_value(&storage, "realm_z.mc1"), None);
        assert_eq!(get_value(&storage, "targets.9"), None);
        assert_eq!(get_value(&storage, ""), None);
    }

    #[test]
    fn realm_targets_pseudo_key_lists_the_realm() {
        let (_dir, storage) = storage_with_realm_a();
        let seq = get_value(&storage, "realm_a.targets").unwrap();
        assert_eq!(seq.as_seq().unwrap().len(), 4);
        assert_eq!(
            get_value(&storage, "realm_a.targets.1.name"),
            Some(Value::from("mc2"))
        );
    }

    #[test]
    fn reads_within_the_window_see_the_cached_snapshot() {
        let (dir, storage) = storage_with_realm_a();
        assert_eq!(
            get_value(&storage, "realm_a.mc1.config.transport"),
            Some(Value::from("ssh"))
        );
        write_realm(
            dir.path(),
            "realm_a.yaml",
            &REALM_A.replace("transport: ssh", "transport: winrm"),
        );
        // Still within MIN_REFRESH: no stat, no re-read.
        assert_eq!(
            get_value(&storage, "realm_a.mc1.config.transport"),
            Some(Value::from("ssh"))
        );
    }

    #[test]
    fn edits_are_observed_after_the_window_with_a_realm_scoped_change() {
        let (dir, storage) = storage_with_realm_a();
        storage.refresh().unwrap();
        std::thread::sleep(Duration::from_millis(1100));
        write_realm(
            dir.path(),
            "realm_a.yaml",
            &REALM_A.replace("transport: ssh", "transport: winrm"),
        );

        let mods = storage.refresh().unwrap();
        assert_eq!(mods.len(), 2);
        for (index, resource) in [(0, "realm_a.mc1.config"), (1, "realm_a.mc2.config")] {
            match &mods[index] {
                Modification::Change { resource: r, fields } => {
                    assert_eq!(r, resource);
                    assert_eq!(fields.get("transport"), Some(&Some(Value::from("winrm"))));
                    assert_eq!(fields.len(), 1);
                }
                other => panic!("expected Change, got {other:?}"),
            }
        }

        assert_eq!(
            get_value(&storage, "realm_a.mc1.config.transport"),
            Some(Value::from("winrm"))
        );
    }

    #[test]
    fn added_realms_create_targets_in_the_aggregate() {
        let (dir, storage) = storage_with_realm_a();
        storage.refresh().unwrap();

        write_realm(dir.path(), "realm_b.yaml", REALM_B);
        let mods = storage.force_refresh().unwrap();
        assert_eq!(mods.len(), 1);
        match &mods[0] {
            Modification::Create { resource, value } => {
                assert_eq!(resource, "targets.4");
                assert_eq!(
                    value.as_map().unwrap().get("realm"),
                    Some(&Value::from("realm_b"))
                );
            }
            other => panic!("expected Create, got {other:?}"),
        }
    }

    #[test]
    fn removed_realms_delete_their_targets_from_the_aggregate() {
        let dir = tempfile::tempdir().unwrap();
        write_realm(dir.path(), "realm_a.yaml", REALM_A);
        write_realm(dir.path(), "realm_b.yaml", REALM_B);
        let storage = DirectoryStorage::new(dir.path());
        storage.refresh().unwrap();
        assert_eq!(get_value(&storage, "targets").unwrap().as_seq().unwrap().len(), 5);

        fs::remove_file(dir.path().join("realm_b.yaml")).unwrap();
        let mods = storage.force_refresh().unwrap();
        assert_eq!(mods.len(), 1);
        assert!(
            matches!(&mods[0], Modification::Delete { resource } if resource == "targets.4")
        );
        assert_eq!(get_value(&storage, "targets").unwrap().as_seq().unwrap().len(), 4);
        assert_eq!(get_value(&storage, "realm_b.db01"), None);
    }

    #[test]
    fn invalid_documents_keep_the_previous_contents() {
        let (dir, storage) = storage_with_realm_a();
        storage.refresh().unwrap();
        std::thread::sleep(Duration::from_millis(1100));
        write_realm(dir.path(), "realm_a.yaml", "version: 3\n");

        assert!(storage.refresh().unwrap().is_empty());
        assert_eq!(
            get_value(&storage, "realm_a.mc1.config.transport"),
            Some(Value::from("ssh"))
        );
    }

    #[test]
    fn query_by_group_returns_the_groups_targets() {
        let (_dir, storage) = storage_with_realm_a();
        let params: Map = Value::from_iter([("group", "memcached")])
            .as_map()
            .cloned()
            .unwrap();
        let (_, result) = storage.query("targets", &params).unwrap();
        let result = result.unwrap();
        assert_eq!(result.len(), 2);
        let names: Vec<&str> = result
            .iter()
            .filter_map(|(_, v)| v.as_map()?.get("name")?.as_str())
            .collect();
        assert_eq!(names, vec!["mc1", "mc2"]);
        assert_eq!(result.reference(0), Some(&QueryRef::Index(0)));
    }

    #[test]
    fn query_by_target_substring_matches_uris() {
        let (_dir, storage) = storage_with_realm_a();
        let params: Map = Value::from_iter([("target", "172.16")])
            .as_map()
            .cloned()
            .unwrap();
        let (_, result) = storage.query("targets", &params).unwrap();
        let result = result.unwrap();
        assert_eq!(result.len(), 2);
        for (_, target) in result.iter() {
            let m = target.as_map().unwrap();
            assert!(!m.contains_key("name"));
            let uri = m.get("uri").and_then(Value::as_str).unwrap();
            let id = m.get("id").and_then(Value::as_str).unwrap();
            assert_eq!(id, make_id("realm_a", uri));
        }
    }

    #[test]
    fn query_with_foreign_realm_filter_matches_nothing() {
        let (_dir, storage) = storage_with_realm_a();
        let params: Map = Value::from_iter([("realm", "realm_z")])
            .as_map()
            .cloned()
            .unwrap();
        let (_, result) = storage.query("targets", &params).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn query_on_a_non_sequence_key_returns_nothing() {
        let (_dir, storage) = storage_with_realm_a();
        let (_, result) = storage.query("realm_a.mc1", &Map::new()).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn query_keys_advertises_the_parameter_surface() {
        let (_dir, storage) = storage_with_realm_a();
        let names = |key: &str| {
            storage
                .query_keys(key)
                .iter()
                .map(Param::name)
                .collect::<Vec<_>>()
        };
        assert_eq!(names("targets"), vec!["target", "group", "realm"]);
        assert_eq!(names("realm_a.targets"), vec!["target", "group"]);
        assert!(names("realm_a.mc1").is_empty());
        assert!(names("target").is_empty());
    }

    #[test]
    fn set_and_delete_are_not_implemented_for_resolvable_targets() {
        let (_dir, storage) = storage_with_realm_a();
        match storage.set("realm_a.mc1", &Map::new()) {
            Err(StorageError::Unsupported { operation, .. }) => assert_eq!(operation, "set"),
            other => panic!("expected Unsupported, got {other:?}"),
        }
        match storage.delete("realm_a.mc1") {
            Err(StorageError::Unsupported { operation, .. }) => assert_eq!(operation, "delete"),
            other => panic!("expected Unsupported, got {other:?}"),
        }
    }

    #[test]
    fn set_and_delete_report_unresolvable_keys_as_not_found() {
        let (_dir, storage) = storage_with_realm_a();
        assert!(matches!(
            storage.set("realm_a.mc9", &Map::new()),
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            storage.delete("realm_a.mc9.config"),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn missing_directory_is_a_fault() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DirectoryStorage::new(dir.path().join("absent"));
        assert!(matches!(storage.refresh(), Err(StorageError::Io(_))));
    }
}
