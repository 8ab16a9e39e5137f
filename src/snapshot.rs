//! Atomic point-in-time image of the pools.
//!
//! File layout: `magic(4) | version(2) | last_lsn(8) | payload_length(8) |
//! crc32_le(4) | payload[payload_length]`. The payload packs each pool's live
//! slots in slot order so restores are deterministic: `node_count(8)` then
//! `(id(8), kind(1), props(N_PROPS))` per node, `edge_count(8)` then
//! `(from(8), to(8), label(2), props(N_EPROPS))` per edge, `embedding_count(8)`
//! then `(node_id(8), vector(EMBEDDING_DIM*4))` per embedding.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::pool::{EdgePool, EmbeddingPool, NodePool, EMBEDDING_DIM, N_EPROPS, N_PROPS};
use crate::wal::codec::{crc32, HEADER_SIZE as WAL_HEADER_SIZE, MAGIC, VERSION};
use crate::wal::fsync::{fsync_dir, strong_fsync_file};

const SNAPSHOT_FILE: &str = "nendb.snapshot";
const SNAPSHOT_TMP: &str = "nendb.snapshot.tmp";
const SNAPSHOT_BAK: &str = "nendb.snapshot.bak";

/// Header size: `magic(4) + version(2) + last_lsn(8) + payload_length(8) + crc32(4)`.
const HEADER_SIZE: usize = 26;

const _: () = assert!(WAL_HEADER_SIZE == 6, "snapshot header embeds the WAL magic/version layout");

const NODE_RECORD_SIZE: usize = 8 + 1 + N_PROPS;
const EDGE_RECORD_SIZE: usize = 8 + 8 + 2 + N_EPROPS;
const EMBEDDING_RECORD_SIZE: usize = 8 + EMBEDDING_DIM * 4;

/// Capacities used to size freshly constructed pools during restore.
#[derive(Debug, Clone, Copy)]
pub struct PoolCapacities {
    /// Node arena capacity.
    pub nodes: usize,
    /// Edge arena capacity.
    pub edges: usize,
    /// Embedding arena capacity.
    pub embeddings: usize,
}

fn encode_payload(nodes: &NodePool, edges: &EdgePool, embeddings: &EmbeddingPool) -> Vec<u8> {
    let node_stats = nodes.stats();
    let edge_stats = edges.stats();
    let embedding_stats = embeddings.stats();

    let mut payload = Vec::with_capacity(
        24 + node_stats.count * NODE_RECORD_SIZE
            + edge_stats.count * EDGE_RECORD_SIZE
            + embedding_stats.count * EMBEDDING_RECORD_SIZE,
    );

    payload.extend_from_slice(&(node_stats.count as u64).to_le_bytes());
    for (id, kind, props) in nodes.iter() {
        payload.extend_from_slice(&id.to_le_bytes());
        payload.push(kind);
        payload.extend_from_slice(props);
    }

    payload.extend_from_slice(&(edge_stats.count as u64).to_le_bytes());
    for (from, to, label, props) in edges.iter() {
        payload.extend_from_slice(&from.to_le_bytes());
        payload.extend_from_slice(&to.to_le_bytes());
        payload.extend_from_slice(&label.to_le_bytes());
        payload.extend_from_slice(props);
    }

    payload.extend_from_slice(&(embedding_stats.count as u64).to_le_bytes());
    for (node_id, vector) in embeddings.iter() {
        payload.extend_from_slice(&node_id.to_le_bytes());
        for component in vector {
            payload.extend_from_slice(&component.to_le_bytes());
        }
    }

    payload
}

fn take<'a>(payload: &'a [u8], cursor: &mut usize, n: usize) -> Result<&'a [u8]> {
    let end = *cursor + n;
    let slice = payload
        .get(*cursor..end)
        .ok_or_else(|| Error::Corrupt("snapshot payload truncated".into()))?;
    *cursor = end;
    Ok(slice)
}

fn decode_payload(payload: &[u8], caps: PoolCapacities) -> Result<(NodePool, EdgePool, EmbeddingPool)> {
    let mut cursor = 0usize;

    let node_count = u64::from_le_bytes(take(payload, &mut cursor, 8)?.try_into().unwrap()) as usize;
    let mut nodes = NodePool::new(caps.nodes);
    for _ in 0..node_count {
        let id = u64::from_le_bytes(take(payload, &mut cursor, 8)?.try_into().unwrap());
        let kind = take(payload, &mut cursor, 1)?[0];
        let mut props = [0u8; N_PROPS];
        props.copy_from_slice(take(payload, &mut cursor, N_PROPS)?);
        nodes.insert_with_props(id, kind, props)?;
    }

    let edge_count = u64::from_le_bytes(take(payload, &mut cursor, 8)?.try_into().unwrap()) as usize;
    let mut edges = EdgePool::new(caps.edges);
    for _ in 0..edge_count {
        let from = u64::from_le_bytes(take(payload, &mut cursor, 8)?.try_into().unwrap());
        let to = u64::from_le_bytes(take(payload, &mut cursor, 8)?.try_into().unwrap());
        let label = u16::from_le_bytes(take(payload, &mut cursor, 2)?.try_into().unwrap());
        let mut props = [0u8; N_EPROPS];
        props.copy_from_slice(take(payload, &mut cursor, N_EPROPS)?);
        edges.insert_with_props(from, to, label, props)?;
    }

    let embedding_count =
        u64::from_le_bytes(take(payload, &mut cursor, 8)?.try_into().unwrap()) as usize;
    let mut embeddings = EmbeddingPool::new(caps.embeddings);
    for _ in 0..embedding_count {
        let node_id = u64::from_le_bytes(take(payload, &mut cursor, 8)?.try_into().unwrap());
        let mut vector = [0f32; EMBEDDING_DIM];
        let bytes = take(payload, &mut cursor, EMBEDDING_DIM * 4)?;
        for (component, chunk) in vector.iter_mut().zip(bytes.chunks_exact(4)) {
            *component = f32::from_le_bytes(chunk.try_into().unwrap());
        }
        embeddings.insert(node_id, vector)?;
    }

    Ok((nodes, edges, embeddings))
}

/// Atomically publishes a new snapshot image, preserving the previous one as
/// `.bak`. Does not truncate the WAL; callers invoke
/// [`crate::wal::SegmentedLog::truncate_to_header`] after this succeeds.
pub fn write(
    dir: &Path,
    last_lsn: u64,
    nodes: &NodePool,
    edges: &EdgePool,
    embeddings: &EmbeddingPool,
) -> Result<()> {
    let payload = encode_payload(nodes, edges, embeddings);
    let crc = crc32(&payload);

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&MAGIC.to_le_bytes());
    buf.extend_from_slice(&VERSION.to_le_bytes());
    buf.extend_from_slice(&last_lsn.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    buf.extend_from_slice(&crc.to_le_bytes());
    buf.extend_from_slice(&payload);

    let tmp_path = dir.join(SNAPSHOT_TMP);
    let mut tmp_file = File::create(&tmp_path).map_err(|e| Error::io(&tmp_path, e))?;
    tmp_file.write_all(&buf).map_err(|e| Error::io(&tmp_path, e))?;
    strong_fsync_file(&tmp_file).map_err(|e| Error::io(&tmp_path, e))?;
    drop(tmp_file);

    let current_path = dir.join(SNAPSHOT_FILE);
    let bak_path = dir.join(SNAPSHOT_BAK);
    if current_path.exists() {
        fs::rename(&current_path, &bak_path).map_err(|e| Error::io(&bak_path, e))?;
    }
    fs::rename(&tmp_path, &current_path).map_err(|e| Error::io(&current_path, e))?;
    fsync_dir(dir).map_err(|e| Error::io(dir, e))?;

    info!(last_lsn, bytes = buf.len(), "wrote snapshot");
    Ok(())
}

enum LoadOutcome {
    Missing,
    Corrupt(String),
    Loaded(NodePool, EdgePool, EmbeddingPool, u64),
}

fn load_one(path: &Path, caps: PoolCapacities) -> Result<LoadOutcome> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(LoadOutcome::Missing),
        Err(e) => return Err(Error::io(path, e)),
    };

    let mut header = [0u8; HEADER_SIZE];
    if file.read_exact(&mut header).is_err() {
        return Ok(LoadOutcome::Corrupt("header truncated".into()));
    }

    let magic = u32::from_le_bytes(header[0..4].try_into().unwrap());
    let version = u16::from_le_bytes(header[4..6].try_into().unwrap());
    let last_lsn = u64::from_le_bytes(header[6..14].try_into().unwrap());
    let payload_length = u64::from_le_bytes(header[14..22].try_into().unwrap()) as usize;
    let stored_crc = u32::from_le_bytes(header[22..26].try_into().unwrap());

    if magic != MAGIC || version != VERSION {
        return Ok(LoadOutcome::Corrupt("bad snapshot magic/version".into()));
    }

    let mut payload = vec![0u8; payload_length];
    if file.read_exact(&mut payload).is_err() {
        return Ok(LoadOutcome::Corrupt("payload truncated".into()));
    }

    if crc32(&payload) != stored_crc {
        return Ok(LoadOutcome::Corrupt("payload CRC mismatch".into()));
    }

    let (nodes, edges, embeddings) = decode_payload(&payload, caps)?;
    Ok(LoadOutcome::Loaded(nodes, edges, embeddings, last_lsn))
}

/// Restores pools from `nendb.snapshot`, falling back to `.bak` on corruption
/// and to empty pools with `last_lsn = 0` if neither is usable.
pub fn restore(dir: &Path, caps: PoolCapacities) -> Result<(NodePool, EdgePool, EmbeddingPool, u64)> {
    let current_path = dir.join(SNAPSHOT_FILE);
    match load_one(&current_path, caps)? {
        LoadOutcome::Loaded(nodes, edges, embeddings, lsn) => return Ok((nodes, edges, embeddings, lsn)),
        LoadOutcome::Missing => {}
        LoadOutcome::Corrupt(reason) => warn!(reason, "snapshot corrupt, trying backup"),
    }

    let bak_path = dir.join(SNAPSHOT_BAK);
    match load_one(&bak_path, caps)? {
        LoadOutcome::Loaded(nodes, edges, embeddings, lsn) => return Ok((nodes, edges, embeddings, lsn)),
        LoadOutcome::Missing => {}
        LoadOutcome::Corrupt(reason) => warn!(reason, "snapshot backup also corrupt"),
    }

    Ok((
        NodePool::new(caps.nodes),
        EdgePool::new(caps.edges),
        EmbeddingPool::new(caps.embeddings),
        0,
    ))
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
