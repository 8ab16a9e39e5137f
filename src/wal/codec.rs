//! WAL frame encoding, decoding, and CRC validation.
//!
//! Frames are tagged rather than carrying a single untagged record shape, so
//! `insert_edge` is as durable as `insert_node`: every frame starts with a
//! one-byte tag, which sits inside the CRC scope. Frame size is fixed per
//! tag — never length-prefixed — so a segment never mixes framing schemes.
//!
//! CRC32 is the IEEE 802.3 polynomial, computed with a compile-time table,
//! the same construction used for snapshot integrity, applied here to WAL
//! frames instead.

use crate::error::{Error, Result};
use crate::pool::{N_EPROPS, N_PROPS};

/// WAL segment/active-file header magic: ASCII `NEND` as a little-endian `u32`.
pub const MAGIC: u32 = 0x4E45_4E44;
/// Current WAL format version.
pub const VERSION: u16 = 0x0001;
/// Header size in bytes: `magic(4) + version(2)`.
pub const HEADER_SIZE: usize = 6;

const TAG_NODE_INSERT: u8 = 0x01;
const TAG_EDGE_INSERT: u8 = 0x02;

/// Frame size for a node-insert record: `tag(1) + id(8) + kind(1) + props(N_PROPS) + crc(4)`.
pub const NODE_FRAME_SIZE: usize = 1 + 8 + 1 + N_PROPS + 4;
/// Frame size for an edge-insert record: `tag(1) + from(8) + to(8) + label(2) + props(N_EPROPS) + crc(4)`.
pub const EDGE_FRAME_SIZE: usize = 1 + 8 + 8 + 2 + N_EPROPS + 4;

/// A decoded WAL record.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A durable `insert_node` record.
    NodeInsert {
        /// Caller-supplied node id.
        id: u64,
        /// Caller-chosen node kind.
        kind: u8,
        /// Opaque property bytes.
        props: [u8; N_PROPS],
    },
    /// A durable `insert_edge` record.
    EdgeInsert {
        /// Source node id.
        from: u64,
        /// Target node id.
        to: u64,
        /// Opaque edge label.
        label: u16,
        /// Opaque property bytes.
        props: [u8; N_EPROPS],
    },
}

impl Frame {
    /// On-disk size of this frame's encoding.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        match self {
            Frame::NodeInsert { .. } => NODE_FRAME_SIZE,
            Frame::EdgeInsert { .. } => EDGE_FRAME_SIZE,
        }
    }

    /// Encodes the frame, including its trailing CRC32.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        match *self {
            Frame::NodeInsert { id, kind, props } => {
                let mut buf = Vec::with_capacity(NODE_FRAME_SIZE);
                buf.push(TAG_NODE_INSERT);
                buf.extend_from_slice(&id.to_le_bytes());
                buf.push(kind);
                buf.extend_from_slice(&props);
                let crc = crc32(&buf);
                buf.extend_from_slice(&crc.to_le_bytes());
                buf
            }
            Frame::EdgeInsert {
                from,
                to,
                label,
                props,
            } => {
                let mut buf = Vec::with_capacity(EDGE_FRAME_SIZE);
                buf.push(TAG_EDGE_INSERT);
                buf.extend_from_slice(&from.to_le_bytes());
                buf.extend_from_slice(&to.to_le_bytes());
                buf.extend_from_slice(&label.to_le_bytes());
                buf.extend_from_slice(&props);
                let crc = crc32(&buf);
                buf.extend_from_slice(&crc.to_le_bytes());
                buf
            }
        }
    }

    /// Determines the full on-disk frame size from a leading tag byte, or
    /// `None` for an unrecognized tag (treated as corruption by the caller).
    #[must_use]
    pub fn size_for_tag(tag: u8) -> Option<usize> {
        match tag {
            TAG_NODE_INSERT => Some(NODE_FRAME_SIZE),
            TAG_EDGE_INSERT => Some(EDGE_FRAME_SIZE),
            _ => None,
        }
    }

    /// Decodes and CRC-validates a complete frame (including its trailing CRC).
    ///
    /// # Errors
    ///
    /// [`Error::Corrupt`] on an unknown tag, wrong length, or CRC mismatch.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (&tag, rest) = bytes
            .split_first()
            .ok_or_else(|| Error::Corrupt("empty frame".into()))?;
        let expected_len = Self::size_for_tag(tag)
            .ok_or_else(|| Error::Corrupt(format!("unknown WAL frame tag {tag:#04x}")))?;
        if bytes.len() != expected_len {
            return Err(Error::Corrupt(format!(
                "frame length {} does not match expected {expected_len} for tag {tag:#04x}",
                bytes.len()
            )));
        }

        let payload_end = bytes.len() - 4;
        let stored_crc = u32::from_le_bytes(bytes[payload_end..].try_into().unwrap());
        let computed_crc = crc32(&bytes[..payload_end]);
        if stored_crc != computed_crc {
            return Err(Error::Corrupt(format!(
                "CRC mismatch: stored {stored_crc:#010x}, computed {computed_crc:#010x}"
            )));
        }

        match tag {
            TAG_NODE_INSERT => {
                let id = u64::from_le_bytes(rest[0..8].try_into().unwrap());
                let kind = rest[8];
                let mut props = [0u8; N_PROPS];
                props.copy_from_slice(&rest[9..9 + N_PROPS]);
                Ok(Frame::NodeInsert { id, kind, props })
            }
            TAG_EDGE_INSERT => {
                let from = u64::from_le_bytes(rest[0..8].try_into().unwrap());
                let to = u64::from_le_bytes(rest[8..16].try_into().unwrap());
                let label = u16::from_le_bytes(rest[16..18].try_into().unwrap());
                let mut props = [0u8; N_EPROPS];
                props.copy_from_slice(&rest[18..18 + N_EPROPS]);
                Ok(Frame::EdgeInsert {
                    from,
                    to,
                    label,
                    props,
                })
            }
            _ => unreachable!("size_for_tag already rejected unknown tags"),
        }
    }
}

/// Encodes the 6-byte segment/active-file header.
#[must_use]
pub fn encode_header() -> [u8; HEADER_SIZE] {
    let mut buf = [0u8; HEADER_SIZE];
    buf[0..4].copy_from_slice(&MAGIC.to_le_bytes());
    buf[4..6].copy_from_slice(&VERSION.to_le_bytes());
    buf
}

/// Validates a header buffer's magic and version.
///
/// # Errors
///
/// [`Error::Corrupt`] if the magic or version does not match.
pub fn validate_header(bytes: &[u8; HEADER_SIZE]) -> Result<()> {
    let magic = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    let version = u16::from_le_bytes(bytes[4..6].try_into().unwrap());
    if magic != MAGIC {
        return Err(Error::Corrupt(format!("bad WAL magic {magic:#010x}")));
    }
    if version != VERSION {
        return Err(Error::Corrupt(format!("unsupported WAL version {version}")));
    }
    Ok(())
}

/// IEEE 802.3 CRC-32, little-endian convention, computed with a compile-time table.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let idx = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ TABLE[idx];
    }
    !crc
}

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;
