use rusqlite::Connection;
use tempfile::TempDir;

use super::*;

fn open_store(dir: &TempDir) -> PrivilegeDb {
    PrivilegeDb::open(&dir.path().join("privilege.db")).expect("open store")
}

fn install(db: &mut PrivilegeDb, app_id: &str, pkg_id: &str, uid: u32, privileges: &[&str]) {
    let privileges: Vec<String> = privileges.iter().map(ToString::to_string).collect();
    db.begin_transaction().expect("begin");
    db.add_application(app_id, pkg_id, uid).expect("add app");
    db.update_app_privileges(app_id, uid, &privileges)
        .expect("update privileges");
    db.commit_transaction().expect("commit");
}

#[test]
fn open_creates_schema_and_query_set() {
    let dir = TempDir::new().expect("temp dir");
    let db = open_store(&dir);
    assert!(!db.in_transaction());
    assert!(!db.pkg_id_exists("pkgA").expect("probe"));
}

#[test]
fn query_handles_are_reusable() {
    let dir = TempDir::new().expect("temp dir");
    let mut db = open_store(&dir);
    install(&mut db, "app1", "pkgA", 5000, &["net"]);

    // Same logical query twice in a row: bind -> execute -> reset must hold,
    // with no state leaking from the first use.
    let first = db.get_app_privileges("app1", 5000).expect("first use");
    let second = db.get_app_privileges("app1", 5000).expect("second use");
    assert_eq!(first, second);
    assert_eq!(first, vec!["net".to_string()]);
}

#[test]
fn get_app_pkg_id_distinguishes_not_found() {
    let dir = TempDir::new().expect("temp dir");
    let mut db = open_store(&dir);
    assert_eq!(db.get_app_pkg_id("ghost").expect("lookup"), None);

    install(&mut db, "app1", "pkgA", 5000, &[]);
    assert_eq!(
        db.get_app_pkg_id("app1").expect("lookup"),
        Some("pkgA".to_string())
    );
}

#[test]
fn privileges_are_deduplicated_and_sorted() {
    let dir = TempDir::new().expect("temp dir");
    let mut db = open_store(&dir);
    // Insertion order is not lexicographic, and "internet" repeats.
    install(
        &mut db,
        "app1",
        "pkgA",
        5000,
        &["internet", "camera", "internet"],
    );

    assert_eq!(
        db.get_app_privileges("app1", 5000).expect("app privileges"),
        vec!["camera".to_string(), "internet".to_string()]
    );
    assert_eq!(
        db.get_pkg_privileges("pkgA", 5000).expect("pkg privileges"),
        vec!["camera".to_string(), "internet".to_string()]
    );
}

#[test]
fn privileges_are_partitioned_by_uid() {
    let dir = TempDir::new().expect("temp dir");
    let mut db = open_store(&dir);
    install(&mut db, "app1", "pkgA", 5000, &["net"]);
    install(&mut db, "app1", "pkgA", 5001, &["camera"]);

    assert_eq!(
        db.get_app_privileges("app1", 5000).expect("uid 5000"),
        vec!["net".to_string()]
    );
    assert_eq!(
        db.get_app_privileges("app1", 5001).expect("uid 5001"),
        vec!["camera".to_string()]
    );
    assert!(db.get_app_privileges("app1", 9999).expect("uid 9999").is_empty());
}

#[test]
fn nested_begin_is_rejected() {
    let dir = TempDir::new().expect("temp dir");
    let mut db = open_store(&dir);
    db.begin_transaction().expect("begin");
    assert!(matches!(
        db.begin_transaction().unwrap_err(),
        StoreError::NestedTransaction
    ));
    // The original transaction is still usable.
    db.rollback_transaction().expect("rollback");
}

#[test]
fn commit_and_rollback_require_a_transaction() {
    let dir = TempDir::new().expect("temp dir");
    let mut db = open_store(&dir);
    assert!(matches!(
        db.commit_transaction().unwrap_err(),
        StoreError::NoTransaction
    ));
    assert!(matches!(
        db.rollback_transaction().unwrap_err(),
        StoreError::NoTransaction
    ));
}

#[test]
fn update_app_privileges_requires_a_transaction() {
    let dir = TempDir::new().expect("temp dir");
    let mut db = open_store(&dir);
    install(&mut db, "app1", "pkgA", 5000, &["net"]);

    let err = db
        .update_app_privileges("app1", 5000, &["camera".to_string()])
        .unwrap_err();
    assert!(matches!(err, StoreError::TransactionRequired));
    // Nothing changed.
    assert_eq!(
        db.get_app_privileges("app1", 5000).expect("privileges"),
        vec!["net".to_string()]
    );
}

#[test]
fn rollback_discards_privilege_replacement() {
    let dir = TempDir::new().expect("temp dir");
    let mut db = open_store(&dir);
    install(&mut db, "app1", "pkgA", 5000, &["net"]);

    db.begin_transaction().expect("begin");
    db.update_app_privileges("app1", 5000, &["camera".to_string()])
        .expect("update");
    db.rollback_transaction().expect("rollback");

    assert_eq!(
        db.get_app_privileges("app1", 5000).expect("privileges"),
        vec!["net".to_string()]
    );
}

#[test]
fn concurrent_reader_sees_old_set_until_commit() {
    let dir = TempDir::new().expect("temp dir");
    let db_path = dir.path().join("privilege.db");
    let mut db = PrivilegeDb::open(&db_path).expect("open store");
    install(&mut db, "app1", "pkgA", 5000, &["net", "gps"]);

    let reader = Connection::open(&db_path).expect("open reader");
    let read_set = |conn: &Connection| -> Vec<String> {
        let mut stmt = conn
            .prepare(
                "SELECT DISTINCT privilege_name FROM app_privilege \
                 WHERE app_id = ?1 AND uid = ?2 ORDER BY privilege_name",
            )
            .expect("prepare");
        stmt.query_map(rusqlite::params!["app1", 5000], |row| row.get(0))
            .expect("query")
            .collect::<rusqlite::Result<Vec<String>>>()
            .expect("rows")
    };

    let old_set = vec!["gps".to_string(), "net".to_string()];
    assert_eq!(read_set(&reader), old_set);

    // Mid-replacement the reader must still observe the complete old set,
    // never the partial state between remove-all and add-all.
    db.begin_transaction().expect("begin");
    db.update_app_privileges("app1", 5000, &["camera".to_string()])
        .expect("update");
    assert_eq!(read_set(&reader), old_set);
    db.commit_transaction().expect("commit");

    assert_eq!(read_set(&reader), vec!["camera".to_string()]);
}

#[test]
fn removing_last_app_drops_the_package() {
    let dir = TempDir::new().expect("temp dir");
    let mut db = open_store(&dir);
    install(&mut db, "app1", "pkgA", 5000, &["net"]);
    install(&mut db, "app2", "pkgA", 5000, &[]);

    db.begin_transaction().expect("begin");
    let gone = db.remove_application("app1", 5000).expect("remove app1");
    db.commit_transaction().expect("commit");
    assert!(!gone, "package still has app2");
    assert!(db.pkg_id_exists("pkgA").expect("probe"));

    db.begin_transaction().expect("begin");
    let gone = db.remove_application("app2", 5000).expect("remove app2");
    db.commit_transaction().expect("commit");
    assert!(gone, "last app removal must drop the package");
    assert!(!db.pkg_id_exists("pkgA").expect("probe"));
}

#[test]
fn removing_app_cascades_its_privileges() {
    let dir = TempDir::new().expect("temp dir");
    let mut db = open_store(&dir);
    install(&mut db, "app1", "pkgA", 5000, &["net", "camera"]);

    db.begin_transaction().expect("begin");
    db.remove_application("app1", 5000).expect("remove");
    db.commit_transaction().expect("commit");

    assert!(db.get_app_privileges("app1", 5000).expect("privileges").is_empty());
}

#[test]
fn remove_unknown_app_is_a_noop() {
    let dir = TempDir::new().expect("temp dir");
    let mut db = open_store(&dir);
    install(&mut db, "app1", "pkgA", 5000, &[]);

    db.begin_transaction().expect("begin");
    let gone = db.remove_application("ghost", 5000).expect("remove");
    db.commit_transaction().expect("commit");
    assert!(!gone);
    assert!(db.pkg_id_exists("pkgA").expect("probe"));
}

#[test]
fn duplicate_add_application_is_an_internal_error() {
    let dir = TempDir::new().expect("temp dir");
    let mut db = open_store(&dir);
    install(&mut db, "app1", "pkgA", 5000, &[]);

    let err = db.add_application("app1", "pkgA", 5000).unwrap_err();
    assert!(matches!(err, StoreError::Internal { .. }));
}

#[test]
fn user_and_package_app_listings() {
    let dir = TempDir::new().expect("temp dir");
    let mut db = open_store(&dir);
    install(&mut db, "app2", "pkgA", 5000, &[]);
    install(&mut db, "app1", "pkgA", 5000, &[]);
    install(&mut db, "app3", "pkgB", 5001, &[]);

    assert_eq!(
        db.get_user_apps(5000).expect("user apps"),
        vec!["app1".to_string(), "app2".to_string()]
    );
    assert_eq!(
        db.get_app_ids_for_pkg_id("pkgA").expect("pkg apps"),
        vec!["app1".to_string(), "app2".to_string()]
    );
    assert_eq!(
        db.get_app_ids_for_pkg_id("pkgB").expect("pkg apps"),
        vec!["app3".to_string()]
    );
}

#[test]
fn privilege_groups_resolve_sorted() {
    let dir = TempDir::new().expect("temp dir");
    let mut db = open_store(&dir);
    db.set_privilege_groups(
        "http://platform/privilege/internet",
        &["priv_net".to_string(), "priv_inet".to_string()],
    )
    .expect("seed groups");

    assert_eq!(
        db.get_privilege_groups("http://platform/privilege/internet")
            .expect("groups"),
        vec!["priv_inet".to_string(), "priv_net".to_string()]
    );
    assert!(db
        .get_privilege_groups("http://platform/privilege/unknown")
        .expect("groups")
        .is_empty());
}

#[test]
fn end_to_end_install_update_query_uninstall() {
    let dir = TempDir::new().expect("temp dir");
    let mut db = open_store(&dir);

    install(&mut db, "app1", "pkgA", 5000, &[]);
    db.begin_transaction().expect("begin");
    db.update_app_privileges("app1", 5000, &["net".to_string()])
        .expect("update");
    db.commit_transaction().expect("commit");

    assert_eq!(
        db.get_app_privileges("app1", 5000).expect("privileges"),
        vec!["net".to_string()]
    );

    db.begin_transaction().expect("begin");
    let pkg_id_is_no_more = db.remove_application("app1", 5000).expect("remove");
    db.commit_transaction().expect("commit");
    assert!(pkg_id_is_no_more);
}

#[test]
fn open_fails_on_unusable_path() {
    let dir = TempDir::new().expect("temp dir");
    // A directory is not a database file.
    let err = PrivilegeDb::open(dir.path()).unwrap_err();
    assert!(matches!(err, StoreError::Io { .. }));
}
