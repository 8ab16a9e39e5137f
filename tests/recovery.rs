//! End-to-end persistence and crash-recovery scenarios against a real data
//! directory on disk: no mocked file system, no mocked WAL.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};

use nendb_core::{EngineCapacities, GraphDb};

fn caps() -> EngineCapacities {
    EngineCapacities {
        nodes: 256,
        edges: 256,
        embeddings: 0,
    }
}

#[test]
fn basic_persistence_survives_a_clean_close() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = GraphDb::open(dir.path(), caps()).unwrap();
        for id in 0..50 {
            db.insert_node(id, (id % 8) as u8).unwrap();
        }
        for id in 0..49 {
            db.insert_edge(id, id + 1, 0).unwrap();
        }
        db.close().unwrap();
    }

    let db = GraphDb::open(dir.path(), caps()).unwrap();
    let stats = db.get_stats();
    assert_eq!(stats.memory.node_count, 50);
    assert_eq!(stats.memory.edge_count, 49);
    for id in 0..50 {
        assert!(db.lookup_node(id).is_some());
    }
    db.close().unwrap();
}

#[test]
fn torn_wal_tail_from_an_unclean_shutdown_is_repaired_on_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = GraphDb::open(dir.path(), caps()).unwrap();
        for id in 0..20 {
            db.insert_node(id, 0).unwrap();
        }
        // No `close()`: simulate a crash that leaves the lockfile behind and
        // skips the final flush. The prior writes were already fsynced by
        // the WAL's own sync-every cadence or are acceptable to lose.
        std::mem::forget(db);
    }
    nendb_core::force_unlock(dir.path()).unwrap();

    // Simulate a crash mid-append: a stray, non-frame-aligned tail.
    let wal_path = dir.path().join("nendb.wal");
    let mut file = OpenOptions::new().append(true).open(&wal_path).unwrap();
    file.write_all(&[0xDE, 0xAD, 0xBE]).unwrap();
    drop(file);

    let db = GraphDb::open(dir.path(), caps()).unwrap();
    let stats = db.get_stats();
    assert!(stats.wal.truncations >= 1);
    assert!(stats.wal_healthy);
    // The repaired log must still accept new writes.
    db.insert_node(999, 1).unwrap();
    assert_eq!(db.lookup_node(999), Some((999, 1)));
    db.close().unwrap();
}

#[test]
fn snapshot_then_crash_replays_only_the_post_snapshot_tail() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = GraphDb::open(dir.path(), caps()).unwrap();
        for id in 0..30 {
            db.insert_node(id, 0).unwrap();
        }
        db.snapshot().unwrap();
        for id in 30..40 {
            db.insert_node(id, 0).unwrap();
        }
        std::mem::forget(db);
    }
    nendb_core::force_unlock(dir.path()).unwrap();

    let db = GraphDb::open(dir.path(), caps()).unwrap();
    assert_eq!(db.get_stats().memory.node_count, 40);
    for id in 0..40 {
        assert!(db.lookup_node(id).is_some(), "node {id} missing after recovery");
    }
    db.close().unwrap();
}

#[test]
fn a_second_writer_cannot_open_while_the_first_holds_the_directory() {
    let dir = tempfile::tempdir().unwrap();
    let first = GraphDb::open(dir.path(), caps()).unwrap();
    let second = GraphDb::open(dir.path(), caps());
    assert!(second.is_err());
    first.close().unwrap();
    // Once released, a new writer can open cleanly.
    GraphDb::open(dir.path(), caps()).unwrap().close().unwrap();
}

#[test]
fn segment_rotation_produces_a_historical_segment_file() {
    let dir = tempfile::tempdir().unwrap();
    // Small enough that a few dozen node inserts force at least one rotation.
    std::fs::write(dir.path().join("nendb.toml"), "segment_size_limit = 2048\n").unwrap();

    let db = GraphDb::open(dir.path(), caps()).unwrap();
    for id in 0..200 {
        db.insert_node(id, 0).unwrap();
    }
    assert!(db.get_stats().wal.segment_index >= 1);
    assert!(dir.path().join("nendb.wal.000001").exists());
    db.close().unwrap();

    let db = GraphDb::open(dir.path(), caps()).unwrap();
    assert_eq!(db.get_stats().memory.node_count, 200);
    db.close().unwrap();
}

#[test]
fn a_corrupted_current_snapshot_falls_back_to_the_backup_copy() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = GraphDb::open(dir.path(), caps()).unwrap();
        for id in 0..10 {
            db.insert_node(id, 0).unwrap();
        }
        db.snapshot().unwrap();
        for id in 10..15 {
            db.insert_node(id, 0).unwrap();
        }
        db.snapshot().unwrap();
        db.close().unwrap();
    }

    assert!(dir.path().join("nendb.snapshot.bak").exists());

    // Simulate a crash mid-write to the current snapshot: truncate it.
    let current = dir.path().join("nendb.snapshot");
    let mut file = OpenOptions::new().write(true).open(&current).unwrap();
    file.seek(SeekFrom::End(-2)).unwrap();
    let pos = file.stream_position().unwrap();
    file.set_len(pos).unwrap();
    drop(file);

    let db = GraphDb::open(dir.path(), caps()).unwrap();
    // Recovery falls back to the backup snapshot (10 nodes) and the active
    // WAL was truncated at the second `snapshot()` call, so the last 5
    // inserts are gone — this is the expected loss window, not a bug.
    assert_eq!(db.get_stats().memory.node_count, 10);
    db.close().unwrap();
}
