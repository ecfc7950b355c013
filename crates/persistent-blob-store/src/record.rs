//! On-disk record format
//!
//! Each record file is a fixed 32-byte little-endian header followed by the
//! payload:
//!
//! | offset | size | field                                   |
//! |--------|------|-----------------------------------------|
//! | 0      | 4    | magic `VCR1`                            |
//! | 4      | 4    | flags (bit 0 = locked)                  |
//! | 8      | 8    | stored-at, ms since the Unix epoch      |
//! | 16     | 8    | payload length                          |
//! | 24     | 8    | first 8 bytes of SHA-256 of the payload |

use crate::error::{Result, StoreError};
use chrono::{DateTime, TimeZone, Utc};
use sha2::{Digest, Sha256};

pub const MAGIC: [u8; 4] = *b"VCR1";
pub const HEADER_LEN: usize = 32;

const FLAG_LOCKED: u32 = 1;

/// Decoded record header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub locked: bool,
    pub stored_at: DateTime<Utc>,
    pub payload_len: u64,
    pub checksum: u64,
}

impl RecordHeader {
    pub fn for_payload(payload: &[u8], locked: bool, stored_at: DateTime<Utc>) -> Self {
        Self {
            locked,
            stored_at,
            payload_len: payload.len() as u64,
            checksum: checksum(payload),
        }
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        let flags = if self.locked { FLAG_LOCKED } else { 0 };
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4..8].copy_from_slice(&flags.to_le_bytes());
        buf[8..16].copy_from_slice(&self.stored_at.timestamp_millis().to_le_bytes());
        buf[16..24].copy_from_slice(&self.payload_len.to_le_bytes());
        buf[24..32].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(StoreError::Corrupt(format!(
                "header truncated to {} bytes",
                bytes.len()
            )));
        }
        if bytes[0..4] != MAGIC {
            return Err(StoreError::Corrupt("bad magic".to_string()));
        }

        let flags = u32::from_le_bytes(field(bytes, 4));
        let millis = i64::from_le_bytes(field(bytes, 8));
        let payload_len = u64::from_le_bytes(field(bytes, 16));
        let checksum = u64::from_le_bytes(field(bytes, 24));

        let stored_at = Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| StoreError::Corrupt(format!("invalid timestamp {}", millis)))?;

        Ok(Self {
            locked: flags & FLAG_LOCKED != 0,
            stored_at,
            payload_len,
            checksum,
        })
    }
}

/// Serialize a header and payload into a single record buffer
pub fn encode(header: &RecordHeader, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    buf
}

/// Parse a full record, verifying its length and checksum
pub fn decode(bytes: &[u8]) -> Result<(RecordHeader, &[u8])> {
    let header = RecordHeader::decode(bytes)?;
    let payload = &bytes[HEADER_LEN..];

    if payload.len() as u64 != header.payload_len {
        return Err(StoreError::Corrupt(format!(
            "payload is {} bytes, header says {}",
            payload.len(),
            header.payload_len
        )));
    }
    if checksum(payload) != header.checksum {
        return Err(StoreError::Corrupt("checksum mismatch".to_string()));
    }

    Ok((header, payload))
}

fn checksum(payload: &[u8]) -> u64 {
    let digest = Sha256::digest(payload);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(prefix)
}

fn field<const N: usize>(bytes: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[offset..offset + N]);
    out
}
