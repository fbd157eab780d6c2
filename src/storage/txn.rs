//! Transaction log records and their on-disk frame.
//!
//! A frame is `[len: u32 BE][crc32: u32 BE][bincode body]`; the checksum
//! covers the body only.

use std::io::Read;

use flate2::Crc;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;
use crate::SerializationError;
use crate::SessionId;
use crate::StorageError;
use crate::Zxid;

pub(crate) const TXN_FRAME_HEADER_LEN: usize = 8;

/// A committed state change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Txn {
    CreateSession {
        timeout_ms: u64,
    },
    /// Explicit close or expiration; removes the session's ephemerals
    CloseSession,
    Create {
        /// Final path, sequential suffix included
        path: String,
        data: Vec<u8>,
        /// Owning session for ephemeral nodes, 0 otherwise
        ephemeral_owner: SessionId,
    },
    Delete {
        path: String,
    },
    SetData {
        path: String,
        data: Vec<u8>,
        /// Version the node carries after the change
        version: i32,
    },
}

impl Txn {
    pub fn name(&self) -> &'static str {
        match self {
            Txn::CreateSession { .. } => "create_session",
            Txn::CloseSession => "close_session",
            Txn::Create { .. } => "create",
            Txn::Delete { .. } => "delete",
            Txn::SetData { .. } => "set_data",
        }
    }
}

/// One record of the append-only transaction log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnEntry {
    pub zxid: Zxid,
    /// Session that issued the change
    pub session_id: SessionId,
    /// Wall clock at commit, becomes ctime/mtime on replay
    pub time: u64,
    pub txn: Txn,
}

pub(crate) fn crc32(buf: &[u8]) -> u32 {
    let mut crc = Crc::new();
    crc.update(buf);
    crc.sum()
}

/// Encodes an entry into a checksummed frame
pub fn encode_txn_frame(entry: &TxnEntry) -> Result<Vec<u8>> {
    let body = bincode::serialize(entry).map_err(SerializationError::Bincode)?;
    let mut frame = Vec::with_capacity(TXN_FRAME_HEADER_LEN + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&crc32(&body).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Outcome of scanning a buffer of frames
#[derive(Debug, Default)]
pub(crate) struct FrameScan {
    pub entries: Vec<TxnEntry>,
    /// Offset just past the last complete frame
    pub valid_len: usize,
    /// Trailing bytes that do not form a complete frame
    pub torn_bytes: usize,
}

/// Decodes consecutive frames from `buf`.
///
/// A final incomplete frame is reported as torn, not as an error. A checksum
/// mismatch or an undecodable body is corruption.
pub(crate) fn decode_txn_frames(
    buf: &[u8],
    location: &str,
) -> Result<FrameScan> {
    let mut scan = FrameScan::default();
    let mut pos = 0;
    while pos < buf.len() {
        if buf.len() - pos < TXN_FRAME_HEADER_LEN {
            break;
        }
        let len = u32::from_be_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]]) as usize;
        let expected_crc =
            u32::from_be_bytes([buf[pos + 4], buf[pos + 5], buf[pos + 6], buf[pos + 7]]);
        let body_start = pos + TXN_FRAME_HEADER_LEN;
        if buf.len() - body_start < len {
            break;
        }
        let body = &buf[body_start..body_start + len];
        if crc32(body) != expected_crc {
            return Err(StorageError::DataCorruption {
                location: format!("{location} offset {pos}: checksum mismatch"),
            }
            .into());
        }
        let entry: TxnEntry = bincode::deserialize(body).map_err(|e| StorageError::DataCorruption {
            location: format!("{location} offset {pos}: {e}"),
        })?;
        scan.entries.push(entry);
        pos = body_start + len;
    }
    scan.valid_len = pos;
    scan.torn_bytes = buf.len() - pos;
    Ok(scan)
}

/// Reads a whole log source and decodes it
pub(crate) fn read_txn_frames(
    mut reader: impl Read,
    location: &str,
) -> Result<FrameScan> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).map_err(StorageError::IoError)?;
    decode_txn_frames(&buf, location)
}
