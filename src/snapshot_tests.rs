use super::*;

fn caps() -> PoolCapacities {
    PoolCapacities {
        nodes: 16,
        edges: 16,
        embeddings: 4,
    }
}

#[test]
fn restore_with_no_files_yields_empty_pools() {
    let dir = tempfile::tempdir().unwrap();
    let (nodes, edges, embeddings, lsn) = restore(dir.path(), caps()).unwrap();
    assert_eq!(nodes.stats().count, 0);
    assert_eq!(edges.stats().count, 0);
    assert_eq!(embeddings.stats().count, 0);
    assert_eq!(lsn, 0);
}

#[test]
fn write_then_restore_roundtrips_pools() {
    let dir = tempfile::tempdir().unwrap();
    let mut nodes = NodePool::new(16);
    nodes.insert(1, 7).unwrap();
    nodes.insert(2, 9).unwrap();
    let mut edges = EdgePool::new(16);
    edges.insert(1, 2, 3).unwrap();
    let embeddings = EmbeddingPool::new(4);

    write(dir.path(), 42, &nodes, &edges, &embeddings).unwrap();

    let (r_nodes, r_edges, r_embeddings, lsn) = restore(dir.path(), caps()).unwrap();
    assert_eq!(lsn, 42);
    assert_eq!(r_nodes.stats().count, 2);
    assert_eq!(r_nodes.find_slot(1), Some(0));
    assert_eq!(r_edges.stats().count, 1);
    assert_eq!(r_embeddings.stats().count, 0);
}

#[test]
fn second_write_preserves_first_as_backup() {
    let dir = tempfile::tempdir().unwrap();
    let mut nodes = NodePool::new(16);
    nodes.insert(1, 1).unwrap();
    let edges = EdgePool::new(16);
    let embeddings = EmbeddingPool::new(4);
    write(dir.path(), 1, &nodes, &edges, &embeddings).unwrap();

    nodes.insert(2, 1).unwrap();
    write(dir.path(), 2, &nodes, &edges, &embeddings).unwrap();

    assert!(dir.path().join("nendb.snapshot").exists());
    assert!(dir.path().join("nendb.snapshot.bak").exists());

    // Simulate losing the current snapshot but keeping the backup.
    std::fs::remove_file(dir.path().join("nendb.snapshot")).unwrap();
    let (r_nodes, _, _, lsn) = restore(dir.path(), caps()).unwrap();
    assert_eq!(lsn, 1);
    assert_eq!(r_nodes.stats().count, 1);
}

#[test]
fn corrupted_current_falls_back_to_backup() {
    let dir = tempfile::tempdir().unwrap();
    let mut nodes = NodePool::new(16);
    nodes.insert(1, 1).unwrap();
    let edges = EdgePool::new(16);
    let embeddings = EmbeddingPool::new(4);
    write(dir.path(), 1, &nodes, &edges, &embeddings).unwrap();
    write(dir.path(), 2, &nodes, &edges, &embeddings).unwrap();

    let current = dir.path().join("nendb.snapshot");
    let mut bytes = std::fs::read(&current).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    std::fs::write(&current, bytes).unwrap();

    let (r_nodes, _, _, lsn) = restore(dir.path(), caps()).unwrap();
    assert_eq!(lsn, 1);
    assert_eq!(r_nodes.stats().count, 1);
}

#[test]
fn both_corrupted_falls_back_to_empty_pools() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("nendb.snapshot"), [0u8; 4]).unwrap();
    std::fs::write(dir.path().join("nendb.snapshot.bak"), [0u8; 4]).unwrap();

    let (nodes, _, _, lsn) = restore(dir.path(), caps()).unwrap();
    assert_eq!(nodes.stats().count, 0);
    assert_eq!(lsn, 0);
}
