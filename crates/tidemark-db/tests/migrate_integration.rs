use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rusqlite::Connection;
use tidemark_common::Error;
use tidemark_db::{Direction, FLOOR_VERSION, Migration, Migrator, Registry, VersionStore};

const A: &str = "20200101T000000Z";
const B: &str = "20200201T000000Z";
const C: &str = "20200301T000000Z";

/// Three migrations building a small users/posts schema.
fn sample_registry() -> Registry {
    let mut registry = Registry::new();
    registry
        .register(Migration::sql(
            A,
            "create_users",
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL);",
            "DROP TABLE users;",
        ))
        .unwrap();
    registry
        .register(Migration::sql(
            B,
            "add_user_email",
            "ALTER TABLE users ADD COLUMN email TEXT;",
            "ALTER TABLE users DROP COLUMN email;",
        ))
        .unwrap();
    registry
        .register(Migration::sql(
            C,
            "create_posts",
            "CREATE TABLE posts (id INTEGER PRIMARY KEY, user_id INTEGER NOT NULL, body TEXT);",
            "DROP TABLE posts;",
        ))
        .unwrap();
    registry
}

fn table_exists(conn: &Connection, name: &str) -> bool {
    conn.query_row(
        "SELECT count(*) FROM sqlite_master WHERE type='table' AND name=?1",
        [name],
        |row| row.get::<_, i64>(0),
    )
    .unwrap()
        == 1
}

fn applied_versions(conn: &Connection) -> Vec<String> {
    VersionStore::new(conn)
        .list_applied()
        .unwrap()
        .into_iter()
        .map(|a| a.version)
        .collect()
}

#[test]
fn migrate_to_latest_applies_everything_in_order() {
    let registry = sample_registry();
    let migrator = Migrator::new(&registry);
    let mut conn = Connection::open_in_memory().unwrap();

    let report = migrator.migrate(&mut conn, "").unwrap();

    assert_eq!(report.direction, Direction::Up);
    assert_eq!(report.from, None);
    assert_eq!(report.to, C);
    assert_eq!(report.executed, vec![A, B, C]);
    assert_eq!(applied_versions(&conn), vec![A, B, C]);
    assert_eq!(
        VersionStore::new(&conn).current_version().unwrap().as_deref(),
        Some(C)
    );
    assert!(table_exists(&conn, "users"));
    assert!(table_exists(&conn, "posts"));
}

#[test]
fn migrate_down_keeps_the_target_applied() {
    let registry = sample_registry();
    let migrator = Migrator::new(&registry);
    let mut conn = Connection::open_in_memory().unwrap();
    migrator.migrate(&mut conn, "").unwrap();

    let report = migrator.migrate(&mut conn, A).unwrap();

    assert_eq!(report.direction, Direction::Down);
    assert_eq!(report.from.as_deref(), Some(C));
    assert_eq!(report.executed, vec![C, B]);
    assert_eq!(applied_versions(&conn), vec![A]);
    assert!(table_exists(&conn, "users"));
    assert!(!table_exists(&conn, "posts"));
}

#[test]
fn rerunning_the_same_target_is_a_no_op() {
    let registry = sample_registry();
    let migrator = Migrator::new(&registry);
    let mut conn = Connection::open_in_memory().unwrap();
    migrator.migrate(&mut conn, "").unwrap();
    let before = VersionStore::new(&conn).list_applied().unwrap();

    let report = migrator.migrate(&mut conn, "").unwrap();
    assert!(report.executed.is_empty());
    assert_eq!(VersionStore::new(&conn).list_applied().unwrap(), before);

    let report = migrator.migrate(&mut conn, C).unwrap();
    assert!(report.executed.is_empty());
}

#[test]
fn round_trip_to_the_floor_leaves_no_real_versions() {
    let registry = sample_registry();
    let migrator = Migrator::new(&registry);
    let mut conn = Connection::open_in_memory().unwrap();

    migrator.migrate(&mut conn, B).unwrap();
    assert_eq!(applied_versions(&conn), vec![A, B]);

    let report = migrator.migrate(&mut conn, FLOOR_VERSION).unwrap();
    assert_eq!(report.executed, vec![B, A]);
    assert!(applied_versions(&conn).is_empty());
    assert!(!table_exists(&conn, "users"));
}

#[test]
fn migrating_an_empty_store_to_the_floor_records_nothing() {
    let registry = sample_registry();
    let migrator = Migrator::new(&registry);
    let mut conn = Connection::open_in_memory().unwrap();

    let report = migrator.migrate(&mut conn, FLOOR_VERSION).unwrap();
    assert!(report.executed.is_empty());
    assert!(applied_versions(&conn).is_empty());
}

#[test]
fn failure_stops_the_run_and_rolls_back_only_that_migration() {
    let third_calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&third_calls);

    let mut registry = Registry::new();
    registry
        .register(Migration::sql(
            A,
            "create_users",
            "CREATE TABLE users (id INTEGER PRIMARY KEY);",
            "DROP TABLE users;",
        ))
        .unwrap();
    registry
        .register(
            Migration::new(B, "broken")
                .up(|tx| {
                    tx.execute_batch("CREATE TABLE half_done (id INTEGER);")?;
                    tx.execute_batch("INSERT INTO missing_table VALUES (1);")?;
                    Ok(())
                })
                .down(|_| Ok(())),
        )
        .unwrap();
    registry
        .register(
            Migration::new(C, "never_reached")
                .up(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .down(|_| Ok(())),
        )
        .unwrap();

    let migrator = Migrator::new(&registry);
    let mut conn = Connection::open_in_memory().unwrap();

    let err = migrator.migrate(&mut conn, "").unwrap_err();

    assert!(matches!(err, Error::Migration { .. }));
    assert_eq!(err.failed_version(), Some(B));
    assert!(err.to_string().contains("missing_table"));
    assert_eq!(applied_versions(&conn), vec![A]);
    assert!(table_exists(&conn, "users"));
    assert!(!table_exists(&conn, "half_done"));
    assert_eq!(third_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn bookkeeping_failure_rolls_back_the_migration_body() {
    let third_calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&third_calls);

    let mut registry = Registry::new();
    registry
        .register(Migration::sql(
            A,
            "create_users",
            "CREATE TABLE users (id INTEGER PRIMARY KEY);",
            "DROP TABLE users;",
        ))
        .unwrap();
    // The body succeeds but leaves nowhere to record itself.
    registry
        .register(
            Migration::new(B, "drops_bookkeeping")
                .up(|tx| {
                    tx.execute_batch("CREATE TABLE side_effect (id INTEGER); DROP TABLE versions;")?;
                    Ok(())
                })
                .down(|_| Ok(())),
        )
        .unwrap();
    registry
        .register(
            Migration::new(C, "never_reached")
                .up(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .down(|_| Ok(())),
        )
        .unwrap();

    let migrator = Migrator::new(&registry);
    let mut conn = Connection::open_in_memory().unwrap();

    let err = migrator.migrate(&mut conn, "").unwrap_err();

    assert_eq!(err.failed_version(), Some(B));
    assert!(err.to_string().contains("failed to record version"));
    assert!(!table_exists(&conn, "side_effect"));
    assert!(table_exists(&conn, "versions"));
    assert_eq!(applied_versions(&conn), vec![A]);
    assert_eq!(third_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn failed_down_migration_keeps_its_row() {
    let mut registry = Registry::new();
    registry
        .register(
            Migration::new(A, "irreversible")
                .up(|tx| Ok(tx.execute_batch("CREATE TABLE events (id INTEGER);")?))
                .down(|_| Err("cannot revert event log".into())),
        )
        .unwrap();

    let migrator = Migrator::new(&registry);
    let mut conn = Connection::open_in_memory().unwrap();
    migrator.migrate(&mut conn, "").unwrap();

    let err = migrator.migrate(&mut conn, FLOOR_VERSION).unwrap_err();
    assert_eq!(err.failed_version(), Some(A));
    assert_eq!(
        err.to_string(),
        format!("migration {A} failed: cannot revert event log")
    );
    assert_eq!(applied_versions(&conn), vec![A]);
    assert!(table_exists(&conn, "events"));
}

#[test]
fn plan_reads_state_without_writing() {
    let registry = sample_registry();
    let migrator = Migrator::new(&registry);
    let mut conn = Connection::open_in_memory().unwrap();
    migrator.migrate(&mut conn, A).unwrap();

    let plan = migrator.plan(&conn, "").unwrap();
    assert_eq!(plan.direction, Direction::Up);
    assert_eq!(plan.versions, vec![B, C]);
    assert_eq!(applied_versions(&conn), vec![A]);
}

#[test]
fn status_on_fresh_database_reports_everything_unapplied() {
    let registry = sample_registry();
    let migrator = Migrator::new(&registry);
    let conn = Connection::open_in_memory().unwrap();

    let report = migrator.status(&conn).unwrap();

    let versions: Vec<_> = report.entries.iter().map(|e| e.version.as_str()).collect();
    assert_eq!(versions, vec![FLOOR_VERSION, A, B, C]);
    assert!(report.entries.iter().all(|e| !e.applied));
    assert!(report.orphaned.is_empty());
    assert_eq!(
        report.to_string(),
        format!(
            "[ ] {FLOOR_VERSION} nil\n[ ] {A} create_users\n[ ] {B} add_user_email\n[ ] {C} create_posts\n"
        )
    );
}

#[test]
fn status_marks_applied_versions_and_leaves_floor_unapplied() {
    let registry = sample_registry();
    let migrator = Migrator::new(&registry);
    let mut conn = Connection::open_in_memory().unwrap();
    migrator.migrate(&mut conn, B).unwrap();

    let report = migrator.status(&conn).unwrap();

    let applied: Vec<_> = report
        .entries
        .iter()
        .map(|e| (e.version.as_str(), e.applied))
        .collect();
    assert_eq!(
        applied,
        vec![(FLOOR_VERSION, false), (A, true), (B, true), (C, false)]
    );
    assert!(report.entries[1].applied_at.is_some());
    assert!(report.entries[3].applied_at.is_none());
}

#[test]
fn status_lists_rows_without_a_registered_migration() {
    let registry = sample_registry();
    let migrator = Migrator::new(&registry);
    let conn = Connection::open_in_memory().unwrap();
    let store = VersionStore::new(&conn);
    store.ensure_schema().unwrap();
    store.record_applied("20190101T000000Z", "removed").unwrap();

    let report = migrator.status(&conn).unwrap();
    assert_eq!(report.orphaned.len(), 1);
    assert_eq!(report.orphaned[0].version, "20190101T000000Z");
    assert_eq!(report.applied_count(), 0);
}

#[test]
fn state_persists_across_connections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.db");
    let registry = sample_registry();
    let migrator = Migrator::new(&registry);

    {
        let mut conn = Connection::open(&path).unwrap();
        migrator.migrate(&mut conn, B).unwrap();
    }

    let mut conn = Connection::open(&path).unwrap();
    let report = migrator.migrate(&mut conn, "").unwrap();
    assert_eq!(report.from.as_deref(), Some(B));
    assert_eq!(report.executed, vec![C]);
}
