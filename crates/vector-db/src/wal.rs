//! write-ahead log record encoding and replay
//!
//! each record is `op(u32 LE) || id(u64 LE)`, followed by `dimension` bytes
//! of vector data when `op == INSERT`. the log is append-only; replay walks
//! it once on open to reconstruct `wal_map` and the set of base ids it
//! tombstones.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

pub const RECORD_HEADER_LEN: usize = 4 + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum WalOp {
    Delete = 1,
    Insert = 2,
}

impl WalOp {
    fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(WalOp::Delete),
            2 => Some(WalOp::Insert),
            _ => None,
        }
    }
}

pub fn encode_insert(id: u64, vector: &[i8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(RECORD_HEADER_LEN + vector.len());
    buf.extend_from_slice(&(WalOp::Insert as u32).to_le_bytes());
    buf.extend_from_slice(&id.to_le_bytes());
    buf.extend(vector.iter().map(|&b| b as u8));
    buf
}

pub fn encode_delete(id: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(RECORD_HEADER_LEN);
    buf.extend_from_slice(&(WalOp::Delete as u32).to_le_bytes());
    buf.extend_from_slice(&id.to_le_bytes());
    buf
}

/// the logical state recovered by replaying a WAL body (the bytes after its
/// header) against a configured vector `dimension`.
#[derive(Debug, Default)]
pub struct Replay {
    /// live inserts that haven't been compacted into the base file yet.
    pub wal_map: BTreeMap<u64, Vec<i8>>,
    /// ids deleted by the WAL that must be tombstoned wherever they land in
    /// the base file (an id never in `wal_map` to begin with).
    pub base_deleted_ids: std::collections::HashSet<u64>,
    /// one past the highest id observed in the log, if any.
    pub max_id_plus_one: Option<u64>,
}

pub fn replay(body: &[u8], dimension: usize) -> Result<Replay> {
    let mut out = Replay::default();
    let mut offset = 0usize;

    while offset < body.len() {
        if offset + RECORD_HEADER_LEN > body.len() {
            return Err(Error::Malformed("truncated WAL record header".into()));
        }
        let op_raw = u32::from_le_bytes(body[offset..offset + 4].try_into().unwrap());
        let op = WalOp::from_u32(op_raw)
            .ok_or_else(|| Error::Malformed(format!("unknown WAL record type {op_raw}")))?;
        offset += 4;
        let id = u64::from_le_bytes(body[offset..offset + 8].try_into().unwrap());
        offset += 8;

        out.max_id_plus_one = Some(id + 1);

        match op {
            WalOp::Delete => {
                if out.wal_map.remove(&id).is_none() {
                    out.base_deleted_ids.insert(id);
                }
            }
            WalOp::Insert => {
                if offset + dimension > body.len() {
                    return Err(Error::Malformed("truncated WAL insert payload".into()));
                }
                let vector = body[offset..offset + dimension]
                    .iter()
                    .map(|&b| b as i8)
                    .collect();
                offset += dimension;
                out.wal_map.insert(id, vector);
            }
        }
    }

    if offset != body.len() {
        return Err(Error::Malformed("trailing bytes after last WAL record".into()));
    }

    Ok(out)
}
