//! Concurrent reader/writer stress tests against a live [`GraphDb`].
//!
//! Uses finite operation counts per thread rather than a time-based loop, so
//! the test terminates deterministically and a slow CI runner cannot starve
//! either side.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use nendb_core::{EngineCapacities, GraphDb};

fn caps(n: usize) -> EngineCapacities {
    EngineCapacities {
        nodes: n,
        edges: n,
        embeddings: 0,
    }
}

#[test]
fn readers_never_observe_a_torn_node_while_a_single_writer_inserts() {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(GraphDb::open(dir.path(), caps(10_000)).unwrap());
    let total_ids = 2_000u64;

    let next_visible = Arc::new(AtomicU64::new(0));
    let done = Arc::new(AtomicBool::new(false));

    let writer = {
        let db = Arc::clone(&db);
        let next_visible = Arc::clone(&next_visible);
        thread::spawn(move || {
            for id in 0..total_ids {
                db.insert_node(id, (id % 256) as u8).unwrap();
                next_visible.store(id + 1, Ordering::Release);
            }
        })
    };

    let mut readers = Vec::new();
    for _ in 0..4 {
        let db = Arc::clone(&db);
        let next_visible = Arc::clone(&next_visible);
        let done = Arc::clone(&done);
        readers.push(thread::spawn(move || {
            while !done.load(Ordering::Acquire) {
                let visible = next_visible.load(Ordering::Acquire);
                if visible == 0 {
                    thread::yield_now();
                    continue;
                }
                let probe = visible - 1;
                // A node the writer has published must always read back with
                // the kind it was inserted with — never a half-written slot.
                if let Some((id, kind)) = db.lookup_node(probe) {
                    assert_eq!(id, probe);
                    assert_eq!(kind, (probe % 256) as u8);
                }
            }
        }));
    }

    writer.join().unwrap();
    done.store(true, Ordering::Release);
    for r in readers {
        r.join().unwrap();
    }

    assert_eq!(db.get_stats().memory.node_count, total_ids as usize);
}

#[test]
fn concurrent_readers_do_not_block_writer_progress() {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(GraphDb::open(dir.path(), caps(5_000)).unwrap());
    db.insert_node(0, 0).unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let mut readers = Vec::new();
    for _ in 0..8 {
        let db = Arc::clone(&db);
        let stop = Arc::clone(&stop);
        readers.push(thread::spawn(move || {
            let mut hits = 0u64;
            while !stop.load(Ordering::Acquire) {
                if db.lookup_node(0).is_some() {
                    hits += 1;
                }
            }
            hits
        }));
    }

    for id in 1..1_000u64 {
        db.insert_node(id, 0).unwrap();
    }
    stop.store(true, Ordering::Release);

    for r in readers {
        let hits = r.join().unwrap();
        assert!(hits > 0, "a reader should have observed the pre-seeded node");
    }

    assert_eq!(db.get_stats().memory.node_count, 1_000);
}

#[test]
fn two_writer_threads_serialize_through_one_handle_without_lost_updates() {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(GraphDb::open(dir.path(), caps(4_000)).unwrap());

    let w1 = {
        let db = Arc::clone(&db);
        thread::spawn(move || {
            for id in 0..1_000u64 {
                db.insert_node(id, 0).unwrap();
            }
        })
    };
    let w2 = {
        let db = Arc::clone(&db);
        thread::spawn(move || {
            for id in 1_000..2_000u64 {
                db.insert_node(id, 0).unwrap();
            }
        })
    };

    w1.join().unwrap();
    w2.join().unwrap();

    assert_eq!(db.get_stats().memory.node_count, 2_000);
    for id in 0..2_000u64 {
        assert!(db.lookup_node(id).is_some());
    }
}

// Loom model-checks the seqlock read/write protocol in isolation: the real
// `GraphDb` pulls in file I/O that loom cannot explore, so this reduces the
// protocol to its essential shape (a sequence counter plus a guarded value)
// the way the writer/reader pair in `engine.rs` is built.
#[cfg(loom)]
mod seqlock_model {
    use loom::sync::atomic::{AtomicU64, Ordering};
    use loom::sync::Arc;
    use loom::thread;
    use std::cell::UnsafeCell;

    struct SeqlockCell {
        seq: AtomicU64,
        value: UnsafeCell<u64>,
    }

    unsafe impl Sync for SeqlockCell {}

    impl SeqlockCell {
        fn new(initial: u64) -> Self {
            Self {
                seq: AtomicU64::new(0),
                value: UnsafeCell::new(initial),
            }
        }

        fn write(&self, value: u64) {
            self.seq.fetch_add(1, Ordering::AcqRel);
            unsafe {
                *self.value.get() = value;
            }
            self.seq.fetch_add(1, Ordering::AcqRel);
        }

        fn read(&self) -> u64 {
            loop {
                let before = self.seq.load(Ordering::Acquire);
                if before % 2 == 1 {
                    continue;
                }
                let value = unsafe { *self.value.get() };
                let after = self.seq.load(Ordering::Acquire);
                if before == after {
                    return value;
                }
            }
        }
    }

    #[test]
    fn reader_never_observes_a_torn_write() {
        loom::model(|| {
            let cell = Arc::new(SeqlockCell::new(0));

            let writer = {
                let cell = Arc::clone(&cell);
                thread::spawn(move || cell.write(42))
            };

            let reader = {
                let cell = Arc::clone(&cell);
                thread::spawn(move || {
                    let v = cell.read();
                    assert!(v == 0 || v == 42);
                })
            };

            writer.join().unwrap();
            reader.join().unwrap();
        });
    }
}
