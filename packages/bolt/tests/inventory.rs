//! End-to-end scenarios over a real inventory directory.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use muster_bolt::{make_id, DirectoryStorage};
use muster_core::change::apply;
use muster_core::{Map, ModKind, Modification, Storage, Value};

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
groups:
  - name: app
    config:
      role: frontend
    targets:
      - db_primary
  - name: db
    config:
      role: database
    targets:
      - name: db01
        uri: 10.0.0.7
        alias:
          - db_primary
"#;

fn write_realm(dir: &Path, file: &str, contents: &str) {
    let mut f = fs::File::create(dir.join(file)).unwrap();
    f.write_all(contents.as_bytes()).unwrap();
    f.sync_all().unwrap();
}

fn inventory_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_realm(dir.path(), "realm_a.yaml", REALM_A);
    write_realm(dir.path(), "realm_b.yaml", REALM_B);
    dir
}

fn get(storage: &DirectoryStorage, key: &str) -> Option<Value> {
    storage.get(key).unwrap().1
}

fn query(storage: &DirectoryStorage, key: &str, params: &[(&str, &str)]) -> Option<Vec<Value>> {
    let params: Map = params
        .iter()
        .map(|(k, v)| (k.to_string(), Value::from(*v)))
        .collect();
    let (_, result) = storage.query(key, &params).unwrap();
    result.map(|r| r.iter().map(|(_, v)| v.clone()).collect())
}

#[test]
fn deep_paths_resolve_to_merged_scalars() {
    let dir = inventory_dir();
    let storage = DirectoryStorage::new(dir.path());

    assert_eq!(
        get(&storage, "realm_a.mc1.config.transport"),
        Some(Value::from("ssh"))
    );
    assert_eq!(
        get(&storage, "realm_a.172.16.219.20.config.winrm.ssl"),
        None,
        "uri segments contain dots and are not addressable as a single segment"
    );
    assert_eq!(
        get(&storage, "realm_b.db01.config.role"),
        Some(Value::from("frontend"))
    );
}

#[test]
fn the_aggregate_spans_all_realms() {
    let dir = inventory_dir();
    let storage = DirectoryStorage::new(dir.path());

    let targets = get(&storage, "targets").unwrap();
    let realm_a = get(&storage, "realm_a.targets").unwrap();
    let realm_b = get(&storage, "realm_b.targets").unwrap();
    assert_eq!(
        targets.as_seq().unwrap().len(),
        realm_a.as_seq().unwrap().len() + realm_b.as_seq().unwrap().len()
    );
}

#[test]
fn targets_resolve_identically_by_id_and_by_position() {
    let dir = inventory_dir();
    let storage = DirectoryStorage::new(dir.path());

    let targets = get(&storage, "targets").unwrap();
    for (i, target) in targets.as_seq().unwrap().iter().enumerate() {
        let id = target
            .as_map()
            .and_then(|m| m.get("id"))
            .and_then(Value::as_str)
            .unwrap();
        assert_eq!(get(&storage, &format!("target.{id}")).as_ref(), Some(target));
        assert_eq!(get(&storage, &format!("targets.{i}")).as_ref(), Some(target));
    }
}

#[test]
fn group_query_returns_the_merged_group_members() {
    let dir = inventory_dir();
    let storage = DirectoryStorage::new(dir.path());

    let hits = query(&storage, "targets", &[("group", "memcached")]).unwrap();
    assert_eq!(hits.len(), 2);
    for (target, (name, uri)) in hits
        .iter()
        .zip([("mc1", "192.168.101.50"), ("mc2", "192.168.101.60")])
    {
        let m = target.as_map().unwrap();
        assert_eq!(m.get("name"), Some(&Value::from(name)));
        assert_eq!(m.get("uri"), Some(&Value::from(uri)));
        assert_eq!(m.get("realm"), Some(&Value::from("realm_a")));
        let config = m.get("config").and_then(Value::as_map).unwrap();
        assert_eq!(config.get("transport"), Some(&Value::from("ssh")));
        assert_eq!(
            config.get("ssh").and_then(Value::as_map).unwrap().get("user"),
            Some(&Value::from("root"))
        );
    }
}

#[test]
fn target_filter_matches_uri_substrings() {
    let dir = inventory_dir();
    let storage = DirectoryStorage::new(dir.path());

    let hits = query(&storage, "targets", &[("target", "172.16")]).unwrap();
    assert_eq!(hits.len(), 2);
    for (target, uri) in hits.iter().zip(["172.16.219.20", "172.16.219.30"]) {
        let m = target.as_map().unwrap();
        assert!(!m.contains_key("name"));
        assert_eq!(m.get("uri"), Some(&Value::from(uri)));
        assert_eq!(
            m.get("id").and_then(Value::as_str),
            Some(make_id("realm_a", uri)).as_deref()
        );
    }
}

#[test]
fn realm_filter_intersects_with_the_other_filters() {
    let dir = inventory_dir();
    let storage = DirectoryStorage::new(dir.path());

    let hits = query(&storage, "targets", &[("realm", "realm_b")]).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(
        hits[0].as_map().unwrap().get("name"),
        Some(&Value::from("db01"))
    );

    assert!(query(
        &storage,
        "targets",
        &[("realm", "realm_b"), ("group", "memcached")]
    )
    .is_none());
}

#[test]
fn alias_references_merge_into_one_target() {
    let dir = inventory_dir();
    let storage = DirectoryStorage::new(dir.path());

    // One merged target, reachable by its canonical name, carrying config
    // contributed by both declaring groups.
    let db01 = get(&storage, "realm_b.db01").unwrap();
    let m = db01.as_map().unwrap();
    assert_eq!(m.get("name"), Some(&Value::from("db01")));
    assert_eq!(m.get("uri"), Some(&Value::from("10.0.0.7")));

    let realm_b = get(&storage, "realm_b.targets").unwrap();
    assert_eq!(realm_b.as_seq().unwrap().len(), 1);

    // The alias keeps resolving in dot paths.
    assert_eq!(get(&storage, "realm_b.db_primary"), Some(db01.clone()));

    // Both ancestor chains make the target visible to group queries.
    for group in ["app", "db"] {
        let hits = query(&storage, "targets", &[("group", group)]).unwrap();
        assert_eq!(hits.len(), 1, "group {group} should see db01");
        assert_eq!(
            hits[0].as_map().unwrap().get("name"),
            Some(&Value::from("db01"))
        );
    }
}

#[test]
fn realm_scoped_queries_only_see_their_realm() {
    let dir = inventory_dir();
    let storage = DirectoryStorage::new(dir.path());

    let hits = query(&storage, "realm_a.targets", &[("group", "memcached")]).unwrap();
    assert_eq!(hits.len(), 2);

    // The db group exists in realm_b, so the name set is non-empty, but none
    // of realm_a's targets carry a matching name.
    let foreign = query(&storage, "realm_a.targets", &[("group", "db")]).unwrap();
    assert!(foreign.is_empty());
}

#[test]
fn an_edit_is_reported_as_one_realm_scoped_change() {
    let dir = inventory_dir();
    let storage = DirectoryStorage::new(dir.path());
    storage.refresh().unwrap();

    std::thread::sleep(Duration::from_millis(1100));
    write_realm(
        dir.path(),
        "realm_a.yaml",
        &REALM_A.replace("user: root", "user: admin"),
    );

    let mods = storage.refresh().unwrap();
    assert_eq!(mods.len(), 2);
    for (m, target) in mods.iter().zip(["mc1", "mc2"]) {
        assert_eq!(m.kind(), ModKind::Change);
        assert_eq!(m.resource(), format!("realm_a.{target}.config.ssh"));
        match m {
            Modification::Change { fields, .. } => {
                assert_eq!(fields.get("user"), Some(&Some(Value::from("admin"))));
                assert_eq!(fields.len(), 1);
            }
            other => panic!("expected Change, got {other:?}"),
        }
    }
}

#[test]
fn watcher_delivers_edit_and_removal_streams() {
    let dir = inventory_dir();
    let storage = Arc::new(DirectoryStorage::new(dir.path()));
    storage.refresh().unwrap();

    let (tx, rx) = mpsc::channel::<Vec<Modification>>();
    let handle = storage
        .watch(move |mods| {
            let _ = tx.send(mods.to_vec());
        })
        .unwrap();

    // An edit after the staleness window produces a realm-scoped change.
    std::thread::sleep(Duration::from_millis(1100));
    write_realm(
        dir.path(),
        "realm_a.yaml",
        &REALM_A.replace("transport: ssh", "transport: winrm"),
    );
    let mods = rx
        .recv_timeout(Duration::from_secs(10))
        .expect("no modifications after edit");
    assert!(mods
        .iter()
        .any(|m| m.kind() == ModKind::Change && m.resource() == "realm_a.mc1.config"));

    // Removing a realm file deletes its targets from the aggregate.
    let before = get(&storage, "targets").unwrap();
    fs::remove_file(dir.path().join("realm_b.yaml")).unwrap();
    let mods = rx
        .recv_timeout(Duration::from_secs(10))
        .expect("no modifications after removal");
    let after = get(&storage, "targets").unwrap();

    let mut replayed = Value::from_iter([("targets", before)]);
    apply(&mut replayed, &mods).unwrap();
    assert_eq!(
        replayed.as_map().unwrap().get("targets"),
        Some(&after)
    );
    let remaining = after.as_seq().unwrap();
    assert!(remaining
        .iter()
        .all(|t| t.as_map().unwrap().get("realm") == Some(&Value::from("realm_a"))));

    handle.stop();
}
