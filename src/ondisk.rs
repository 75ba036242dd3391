//! Fixed-layout on-disk slot record.
//!
//! A record is a 16-byte constant header `{magic, crc32c, version, length}`
//! followed by the dynamic region holding the persisted subset of a slot
//! descriptor. All integers are little-endian; the CRC-32C (Castagnoli)
//! covers the dynamic region only, so the header can be inspected before
//! the checksum is trusted.

use crate::name::NAME_MAX;
use crate::types::{DatabaseId, Lsn, SlotPersistency, TransactionId};
use crc::{Crc, CRC_32_ISCSI};
use thiserror::Error;

pub const SLOT_MAGIC: u32 = 0x736C_6F74;
pub const SLOT_VERSION: u32 = 1;

pub const ONDISK_CONSTANT_SIZE: usize = 16;
pub const ONDISK_DYNAMIC_SIZE: usize = NAME_MAX + 4 + 1 + 1 + 2 + 8 + 8 + 8;
pub const ONDISK_TOTAL_SIZE: usize = ONDISK_CONSTANT_SIZE + ONDISK_DYNAMIC_SIZE;

const CRC32C: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// The subset of a slot descriptor that survives restart.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SlotPersistentData {
    pub name: String,
    pub database: DatabaseId,
    pub persistency: SlotPersistency,
    pub xmin: TransactionId,
    pub catalog_xmin: TransactionId,
    pub restart_lsn: Lsn,
    pub is_dummy_standby: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("slot record too short: {len} of {expected} bytes")]
    TooShort { len: usize, expected: usize },
    #[error("slot record has wrong magic {found:#x} instead of {SLOT_MAGIC:#x}")]
    BadMagic { found: u32 },
    #[error("slot record has unsupported version {found}")]
    BadVersion { found: u32 },
    #[error("slot record has corrupted length {found}")]
    BadLength { found: u32 },
    #[error("slot record checksum mismatch, is {computed:#010x}, should be {stored:#010x}")]
    CrcMismatch { computed: u32, stored: u32 },
    #[error("slot record carries unknown persistency byte {found}")]
    BadPersistency { found: u8 },
    #[error("slot record carries a malformed name field")]
    BadName,
}

/// One versioned slot record, ready to be written or freshly decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRecord {
    pub version: u32,
    pub data: SlotPersistentData,
}

impl SlotRecord {
    pub fn new(data: SlotPersistentData) -> SlotRecord {
        SlotRecord {
            version: SLOT_VERSION,
            data,
        }
    }

    pub fn encode(&self) -> [u8; ONDISK_TOTAL_SIZE] {
        let dynamic = encode_dynamic(&self.data);
        let checksum = CRC32C.checksum(&dynamic);

        let mut bytes = [0u8; ONDISK_TOTAL_SIZE];
        bytes[0..4].copy_from_slice(&SLOT_MAGIC.to_le_bytes());
        bytes[4..8].copy_from_slice(&checksum.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.version.to_le_bytes());
        bytes[12..16].copy_from_slice(&(ONDISK_DYNAMIC_SIZE as u32).to_le_bytes());
        bytes[ONDISK_CONSTANT_SIZE..].copy_from_slice(&dynamic);
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<SlotRecord, RecordError> {
        if bytes.len() < ONDISK_TOTAL_SIZE {
            return Err(RecordError::TooShort {
                len: bytes.len(),
                expected: ONDISK_TOTAL_SIZE,
            });
        }

        let magic = read_u32(bytes, 0);
        if magic != SLOT_MAGIC {
            return Err(RecordError::BadMagic { found: magic });
        }
        let stored_crc = read_u32(bytes, 4);
        let version = read_u32(bytes, 8);
        if version != SLOT_VERSION {
            return Err(RecordError::BadVersion { found: version });
        }
        let length = read_u32(bytes, 12);
        if length as usize != ONDISK_DYNAMIC_SIZE {
            return Err(RecordError::BadLength { found: length });
        }

        let dynamic = &bytes[ONDISK_CONSTANT_SIZE..ONDISK_TOTAL_SIZE];
        let computed = CRC32C.checksum(dynamic);
        if computed != stored_crc {
            return Err(RecordError::CrcMismatch {
                computed,
                stored: stored_crc,
            });
        }

        Ok(SlotRecord {
            version,
            data: decode_dynamic(dynamic)?,
        })
    }
}

fn encode_dynamic(data: &SlotPersistentData) -> [u8; ONDISK_DYNAMIC_SIZE] {
    let mut bytes = [0u8; ONDISK_DYNAMIC_SIZE];

    let name = data.name.as_bytes();
    let name_len = name.len().min(NAME_MAX - 1);
    bytes[..name_len].copy_from_slice(&name[..name_len]);

    let mut off = NAME_MAX;
    bytes[off..off + 4].copy_from_slice(&data.database.0.to_le_bytes());
    off += 4;
    bytes[off] = data.persistency.to_wire();
    bytes[off + 1] = u8::from(data.is_dummy_standby);
    // two reserved bytes stay zero
    off += 4;
    bytes[off..off + 8].copy_from_slice(&data.xmin.0.to_le_bytes());
    off += 8;
    bytes[off..off + 8].copy_from_slice(&data.catalog_xmin.0.to_le_bytes());
    off += 8;
    bytes[off..off + 8].copy_from_slice(&data.restart_lsn.0.to_le_bytes());

    bytes
}

fn decode_dynamic(bytes: &[u8]) -> Result<SlotPersistentData, RecordError> {
    let name_field = &bytes[..NAME_MAX];
    let name_len = name_field
        .iter()
        .position(|&b| b == 0)
        .ok_or(RecordError::BadName)?;
    let name = std::str::from_utf8(&name_field[..name_len])
        .map_err(|_| RecordError::BadName)?
        .to_string();

    let mut off = NAME_MAX;
    let database = DatabaseId(read_u32(bytes, off));
    off += 4;
    let persistency = SlotPersistency::from_wire(bytes[off])
        .ok_or(RecordError::BadPersistency { found: bytes[off] })?;
    let is_dummy_standby = bytes[off + 1] != 0;
    off += 4;
    let xmin = TransactionId(read_u64(bytes, off));
    off += 8;
    let catalog_xmin = TransactionId(read_u64(bytes, off));
    off += 8;
    let restart_lsn = Lsn(read_u64(bytes, off));

    Ok(SlotPersistentData {
        name,
        database,
        persistency,
        xmin,
        catalog_xmin,
        restart_lsn,
        is_dummy_standby,
    })
}

fn read_u32(bytes: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(bytes[off..off + 4].try_into().expect("4-byte slice"))
}

fn read_u64(bytes: &[u8], off: usize) -> u64 {
    u64::from_le_bytes(bytes[off..off + 8].try_into().expect("8-byte slice"))
}
