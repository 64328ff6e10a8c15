//! Version Store Tests
//!
//! Exercises version allocation, type lineage and concurrent appends against
//! a real SQLite file.

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use remote_config::{
    CancelToken, Interrupted, SqliteVersionStore, StoreConfig, StoreError, VersionStore,
};
use serde_json::json;
use tempfile::{tempdir, TempDir};

fn open_store(dir: &TempDir) -> SqliteVersionStore {
    SqliteVersionStore::open_path(dir.path().join("configs.db")).unwrap()
}

// =============================================================================
// Allocation
// =============================================================================

#[test]
fn test_versions_are_contiguous() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let cancel = CancelToken::new();

    store
        .create_first_version(&cancel, "feature_toggle", "qris", &json!({"enabled": true}))
        .unwrap();
    for i in 0..9 {
        let appended = store
            .append_next_version(&cancel, "qris", &json!({"enabled": i % 2 == 0}))
            .unwrap();
        assert_eq!(appended.version, i + 2);
    }

    let versions: Vec<i64> = store
        .read_all_versions(&cancel, "qris")
        .unwrap()
        .iter()
        .map(|v| v.version)
        .collect();
    assert_eq!(versions, (1..=10).collect::<Vec<_>>());
}

#[test]
fn test_create_twice_is_already_exists() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let cancel = CancelToken::new();

    store
        .create_first_version(&cancel, "feature_toggle", "qris", &json!({"enabled": true}))
        .unwrap();
    let err = store
        .create_first_version(&cancel, "rate_limit_policy", "qris", &json!({"enabled": false}))
        .unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists { ref name } if name == "qris"));

    let all = store.read_all_versions(&cancel, "qris").unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].config_type, "feature_toggle");
    assert_eq!(all[0].data, json!({"enabled": true}));
}

#[test]
fn test_append_to_missing_name_is_not_found() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let cancel = CancelToken::new();

    let err = store
        .append_next_version(&cancel, "ghost", &json!({"enabled": true}))
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound { version: None, .. }));
    assert!(store.read_all_versions(&cancel, "ghost").unwrap().is_empty());
}

#[test]
fn test_append_inherits_type() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let cancel = CancelToken::new();

    store
        .create_first_version(&cancel, "threshold_policy", "p95", &json!({"metric": "p95"}))
        .unwrap();
    store.append_next_version(&cancel, "p95", &json!({"metric": "p99"})).unwrap();
    store.append_next_version(&cancel, "p95", &json!({"metric": "p50"})).unwrap();

    for row in store.read_all_versions(&cancel, "p95").unwrap() {
        assert_eq!(row.config_type, "threshold_policy");
    }
}

// =============================================================================
// Reads
// =============================================================================

#[test]
fn test_read_paths() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let cancel = CancelToken::new();

    store
        .create_first_version(&cancel, "feature_toggle", "qris", &json!({"enabled": true}))
        .unwrap();
    store
        .append_next_version(&cancel, "qris", &json!({"enabled": false}))
        .unwrap();

    let latest = store.read_latest(&cancel, "qris").unwrap();
    assert_eq!(latest.version, 2);
    assert_eq!(latest.data, json!({"enabled": false}));

    let first = store.read_version(&cancel, "qris", 1).unwrap();
    assert_eq!(first.data, json!({"enabled": true}));

    let missing = store.read_version(&cancel, "qris", 99).unwrap_err();
    assert!(matches!(missing, StoreError::NotFound { version: Some(99), .. }));

    assert!(matches!(
        store.read_latest(&cancel, "ghost"),
        Err(StoreError::NotFound { .. })
    ));
}

#[test]
fn test_names_are_independent() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let cancel = CancelToken::new();

    store
        .create_first_version(&cancel, "feature_toggle", "a", &json!({"enabled": true}))
        .unwrap();
    store
        .create_first_version(&cancel, "feature_toggle", "b", &json!({"enabled": true}))
        .unwrap();
    store.append_next_version(&cancel, "a", &json!({"enabled": false})).unwrap();

    assert_eq!(store.read_latest(&cancel, "a").unwrap().version, 2);
    assert_eq!(store.read_latest(&cancel, "b").unwrap().version, 1);
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn test_concurrent_appends_are_contiguous() {
    const WRITERS: usize = 8;
    const APPENDS_PER_WRITER: usize = 5;

    let dir = tempdir().unwrap();
    let store = Arc::new(
        SqliteVersionStore::open(&StoreConfig {
            path: dir.path().join("configs.db"),
            busy_timeout_ms: 10_000,
            max_idle_connections: WRITERS,
            max_append_attempts: 10,
            wal: true,
        })
        .unwrap(),
    );
    let cancel = CancelToken::new();
    store
        .create_first_version(&cancel, "feature_toggle", "qris", &json!({"enabled": true}))
        .unwrap();

    let barrier = Arc::new(Barrier::new(WRITERS));
    let handles: Vec<_> = (0..WRITERS)
        .map(|writer| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let cancel = CancelToken::new();
                barrier.wait();
                (0..APPENDS_PER_WRITER)
                    .map(|i| {
                        store
                            .append_next_version(
                                &cancel,
                                "qris",
                                &json!({"writer": writer, "seq": i}),
                            )
                            .unwrap()
                            .version
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut claimed: Vec<i64> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    claimed.sort_unstable();

    let total = (WRITERS * APPENDS_PER_WRITER) as i64;
    assert_eq!(claimed, (2..=total + 1).collect::<Vec<_>>());

    let stored: Vec<i64> = store
        .read_all_versions(&cancel, "qris")
        .unwrap()
        .iter()
        .map(|v| v.version)
        .collect();
    assert_eq!(stored, (1..=total + 1).collect::<Vec<_>>());
}

#[test]
fn test_concurrent_creates_have_one_winner() {
    const WRITERS: usize = 6;

    let dir = tempdir().unwrap();
    let store = Arc::new(open_store(&dir));
    let barrier = Arc::new(Barrier::new(WRITERS));

    let handles: Vec<_> = (0..WRITERS)
        .map(|writer| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                store.create_first_version(
                    &CancelToken::new(),
                    "feature_toggle",
                    "qris",
                    &json!({"writer": writer}),
                )
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners = results.iter().filter(|r| r.is_ok()).count();
    let losers = results
        .iter()
        .filter(|r| matches!(r, Err(StoreError::AlreadyExists { .. })))
        .count();
    assert_eq!(winners, 1);
    assert_eq!(losers, WRITERS - 1);

    let all = store.read_all_versions(&CancelToken::new(), "qris").unwrap();
    assert_eq!(all.len(), 1);
}

#[test]
fn test_deadline_expires_while_write_lock_is_held() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("configs.db");
    let store = SqliteVersionStore::open_path(&path).unwrap();
    store
        .create_first_version(&CancelToken::new(), "feature_toggle", "qris", &json!({"enabled": true}))
        .unwrap();

    // Another process holds the write lock for the whole attempt
    let holder = rusqlite::Connection::open(&path).unwrap();
    holder.execute_batch("BEGIN IMMEDIATE").unwrap();

    let started = Instant::now();
    let err = store
        .append_next_version(
            &CancelToken::with_timeout(Duration::from_millis(200)),
            "qris",
            &json!({"enabled": false}),
        )
        .unwrap_err();
    let waited = started.elapsed();

    assert!(
        matches!(err, StoreError::Interrupted(Interrupted::DeadlineExceeded)),
        "unexpected error: {err}"
    );
    // Bounded by the deadline, not the 5s busy timeout
    assert!(waited < Duration::from_secs(3), "waited {waited:?}");

    holder.execute_batch("ROLLBACK").unwrap();
    let all = store.read_all_versions(&CancelToken::new(), "qris").unwrap();
    assert_eq!(all.len(), 1);
}
