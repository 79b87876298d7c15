//! Durable image framing
//!
//! ```text
//! +------------------+
//! | Magic "FSTO"     | (4 bytes)
//! +------------------+
//! | Format Version   | (u32 LE)
//! +------------------+
//! | Payload Length   | (u32 LE)
//! +------------------+
//! | Payload          | (JSON working set)
//! +------------------+
//! | Checksum         | (u32 LE)
//! +------------------+
//! ```
//!
//! Checksum is CRC32 over all bytes before it.

use crate::error::{StoreError, StoreResult};

use super::working_set::WorkingSet;

/// Leading bytes of every image file
pub const MAGIC: &[u8; 4] = b"FSTO";

/// Current image format version
pub const FORMAT_VERSION: u32 = 1;

const HEADER_LEN: usize = 12;
const CHECKSUM_LEN: usize = 4;

/// Serialize a working set into a framed image
pub fn encode(working_set: &WorkingSet) -> StoreResult<Vec<u8>> {
    let payload = serde_json::to_vec(working_set).map_err(|e| {
        StoreError::adapter_io_no_source(format!("failed to serialize working set: {}", e))
    })?;
    let payload_len = u32::try_from(payload.len()).map_err(|_| {
        StoreError::adapter_io_no_source(format!(
            "working set too large for image: {} bytes",
            payload.len()
        ))
    })?;

    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len() + CHECKSUM_LEN);
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&payload_len.to_le_bytes());
    buf.extend_from_slice(&payload);

    let checksum = crc32fast::hash(&buf);
    buf.extend_from_slice(&checksum.to_le_bytes());

    Ok(buf)
}

/// Parse and verify a framed image
pub fn decode(bytes: &[u8]) -> StoreResult<WorkingSet> {
    if bytes.len() < HEADER_LEN + CHECKSUM_LEN {
        return Err(StoreError::DataCorruption(format!(
            "image truncated: {} bytes",
            bytes.len()
        )));
    }

    if &bytes[0..4] != MAGIC {
        return Err(StoreError::DataCorruption("bad image magic".into()));
    }

    let version = read_u32(&bytes[4..8]);
    if version != FORMAT_VERSION {
        return Err(StoreError::DataCorruption(format!(
            "unsupported image format version {}",
            version
        )));
    }

    let payload_len = read_u32(&bytes[8..12]) as usize;
    let expected_len = HEADER_LEN + payload_len + CHECKSUM_LEN;
    if bytes.len() != expected_len {
        return Err(StoreError::DataCorruption(format!(
            "image length {} does not match framed length {}",
            bytes.len(),
            expected_len
        )));
    }

    let body_end = HEADER_LEN + payload_len;
    let stored = read_u32(&bytes[body_end..]);
    let computed = crc32fast::hash(&bytes[..body_end]);
    if stored != computed {
        return Err(StoreError::DataCorruption(format!(
            "checksum mismatch: stored {:08x}, computed {:08x}",
            stored, computed
        )));
    }

    serde_json::from_slice(&bytes[HEADER_LEN..body_end])
        .map_err(|e| StoreError::DataCorruption(format!("undecodable payload: {}", e)))
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}
