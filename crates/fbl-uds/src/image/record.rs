//! Image status record persisted in front of each A/B slot.
//!
//! Written once, when a download passes the programming dependency check.
//! Read at every boot decision and whenever the next download target is
//! chosen.
//!
//! # Layout
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │  erase-ok flag (1)                  │  offset 0
//! │  program-ok flag (1)                │  offset 1
//! │  struct-valid flag (1)              │  offset 2
//! │  app counter (1)                    │  offset 3
//! ├─────────────────────────────────────┤
//! │  Fingerprint (9)                    │  offset 4
//! ├─────────────────────────────────────┤
//! │  Reset vector, big endian (4)       │  offset 13
//! │  Image length, big endian (4)       │  offset 17
//! ├─────────────────────────────────────┤
//! │  CRC-32 of bytes 0..21 (4)          │  offset 21
//! └─────────────────────────────────────┘
//! ```
//!
//! A flag is set only when it holds [`FLAG_SET`]; erased flash (0xFF) reads
//! as "not set" and never carries a matching CRC.

use crc::{Crc, CRC_32_ISO_HDLC};

use crate::error::RecordError;

// ── Layout constants ───────────────────────────────────────────────────────

pub const FINGERPRINT_LEN: usize = 9;

const FLAGS_OFFSET: usize = 0;
const COUNTER_OFFSET: usize = 3;
const FINGERPRINT_OFFSET: usize = 4;
const RESET_VECTOR_OFFSET: usize = FINGERPRINT_OFFSET + FINGERPRINT_LEN; // 13
const IMAGE_LENGTH_OFFSET: usize = RESET_VECTOR_OFFSET + 4; // 17
const CRC_OFFSET: usize = IMAGE_LENGTH_OFFSET + 4; // 21

/// Serialized size including the trailing CRC
pub const RECORD_LEN: usize = CRC_OFFSET + 4; // 25

/// Marker byte of a set flag
pub const FLAG_SET: u8 = 0xA5;
const FLAG_CLEAR: u8 = 0x00;

/// App counter value reserved as "invalid"
pub const COUNTER_INVALID: u8 = 0xFF;

const RECORD_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

// ── Record ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageStatusRecord {
    pub erase_ok: bool,
    pub program_ok: bool,
    pub struct_valid: bool,
    pub app_counter: u8,
    pub fingerprint: [u8; FINGERPRINT_LEN],
    pub reset_vector: u32,
    pub image_length: u32,
}

impl ImageStatusRecord {
    /// All three download stages completed
    pub fn is_bootable(&self) -> bool {
        self.erase_ok && self.program_ok && self.struct_valid
    }

    /// Serialize, appending the self-CRC
    pub fn to_bytes(&self) -> [u8; RECORD_LEN] {
        let flag = |set: bool| if set { FLAG_SET } else { FLAG_CLEAR };

        let mut bytes = [0u8; RECORD_LEN];
        bytes[FLAGS_OFFSET] = flag(self.erase_ok);
        bytes[FLAGS_OFFSET + 1] = flag(self.program_ok);
        bytes[FLAGS_OFFSET + 2] = flag(self.struct_valid);
        bytes[COUNTER_OFFSET] = self.app_counter;
        bytes[FINGERPRINT_OFFSET..RESET_VECTOR_OFFSET].copy_from_slice(&self.fingerprint);
        bytes[RESET_VECTOR_OFFSET..IMAGE_LENGTH_OFFSET]
            .copy_from_slice(&self.reset_vector.to_be_bytes());
        bytes[IMAGE_LENGTH_OFFSET..CRC_OFFSET].copy_from_slice(&self.image_length.to_be_bytes());

        let crc = RECORD_CRC.checksum(&bytes[..CRC_OFFSET]);
        bytes[CRC_OFFSET..].copy_from_slice(&crc.to_be_bytes());
        bytes
    }

    /// Parse a stored record, rejecting it unless its self-CRC matches
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RecordError> {
        if bytes.len() < RECORD_LEN {
            return Err(RecordError::TooShort { len: bytes.len() });
        }

        let stored = u32::from_be_bytes([
            bytes[CRC_OFFSET],
            bytes[CRC_OFFSET + 1],
            bytes[CRC_OFFSET + 2],
            bytes[CRC_OFFSET + 3],
        ]);
        let computed = RECORD_CRC.checksum(&bytes[..CRC_OFFSET]);
        if stored != computed {
            return Err(RecordError::CrcMismatch { stored, computed });
        }

        let mut fingerprint = [0u8; FINGERPRINT_LEN];
        fingerprint.copy_from_slice(&bytes[FINGERPRINT_OFFSET..RESET_VECTOR_OFFSET]);

        Ok(Self {
            erase_ok: bytes[FLAGS_OFFSET] == FLAG_SET,
            program_ok: bytes[FLAGS_OFFSET + 1] == FLAG_SET,
            struct_valid: bytes[FLAGS_OFFSET + 2] == FLAG_SET,
            app_counter: bytes[COUNTER_OFFSET],
            fingerprint,
            reset_vector: read_u32(&bytes[RESET_VECTOR_OFFSET..]),
            image_length: read_u32(&bytes[IMAGE_LENGTH_OFFSET..]),
        })
    }
}

/// Recompute the CRC over everything but the trailing self-CRC and compare
pub fn is_record_valid(bytes: &[u8]) -> bool {
    ImageStatusRecord::from_bytes(bytes).is_ok()
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
