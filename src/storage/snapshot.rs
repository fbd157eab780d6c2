//! Point-in-time images of the tree and the session table.
//!
//! A snapshot blob is `[crc32: u32 BE][zlib(bincode(SnapshotImage))]`.

use std::collections::BTreeMap;
use std::io::Read;
use std::io::Write;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::Deserialize;
use serde::Serialize;

use super::txn::crc32;
use crate::DataTree;
use crate::Result;
use crate::SerializationError;
use crate::SessionId;
use crate::StorageError;
use crate::Zxid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotImage {
    /// Highest zxid reflected in the image
    pub last_zxid: Zxid,
    pub tree: DataTree,
    /// Live sessions and their negotiated timeouts
    pub sessions: BTreeMap<SessionId, u64>,
}

/// Serializes and compresses `image` into an opaque blob
pub fn encode_snapshot(image: &SnapshotImage) -> Result<Vec<u8>> {
    let raw = bincode::serialize(image).map_err(SerializationError::Bincode)?;
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&raw).map_err(StorageError::IoError)?;
    let compressed = encoder.finish().map_err(StorageError::IoError)?;

    let mut blob = Vec::with_capacity(4 + compressed.len());
    blob.extend_from_slice(&crc32(&compressed).to_be_bytes());
    blob.extend_from_slice(&compressed);
    Ok(blob)
}

/// Restores an image from a blob produced by [`encode_snapshot`]
pub fn decode_snapshot(
    blob: &[u8],
    location: &str,
) -> Result<SnapshotImage> {
    let corrupt = |reason: String| StorageError::DataCorruption {
        location: format!("{location}: {reason}"),
    };
    if blob.len() < 4 {
        return Err(corrupt("snapshot shorter than its header".into()).into());
    }
    let expected = u32::from_be_bytes([blob[0], blob[1], blob[2], blob[3]]);
    let compressed = &blob[4..];
    if crc32(compressed) != expected {
        return Err(corrupt("checksum mismatch".into()).into());
    }

    let mut raw = Vec::new();
    ZlibDecoder::new(compressed)
        .read_to_end(&mut raw)
        .map_err(|e| corrupt(e.to_string()))?;
    let mut image: SnapshotImage =
        bincode::deserialize(&raw).map_err(|e| corrupt(e.to_string()))?;
    image.tree.rebuild_ephemerals();
    Ok(image)
}
