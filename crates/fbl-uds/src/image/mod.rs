//! A/B image status records and slot selection

mod record;
mod selector;

use std::fmt;

use tracing::debug;

use crate::config::FlashConfig;
use crate::error::FlashError;
use crate::hal::FlashHal;

pub use record::{
    is_record_valid, ImageStatusRecord, COUNTER_INVALID, FINGERPRINT_LEN, FLAG_SET, RECORD_LEN,
};
pub use selector::{next_app_counter, select_newest, select_oldest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    A,
    B,
}

impl Slot {
    pub fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }

    /// Wire encoding used by the image status DID
    pub fn index(self) -> u8 {
        match self {
            Self::A => 0,
            Self::B => 1,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
        }
    }
}

/// Both slots' records as read from flash; invalid records are `None`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotRecords {
    pub a: Option<ImageStatusRecord>,
    pub b: Option<ImageStatusRecord>,
}

impl SlotRecords {
    pub fn read<F: FlashHal + ?Sized>(flash: &mut F, config: &FlashConfig) -> Result<Self, FlashError> {
        Ok(Self {
            a: read_record(flash, config.slot_a.record_address)?,
            b: read_record(flash, config.slot_b.record_address)?,
        })
    }

    pub fn get(&self, slot: Slot) -> Option<&ImageStatusRecord> {
        match slot {
            Slot::A => self.a.as_ref(),
            Slot::B => self.b.as_ref(),
        }
    }

    pub fn newest(&self) -> Option<Slot> {
        select_newest(self.a.as_ref(), self.b.as_ref())
    }

    pub fn oldest(&self) -> Slot {
        select_oldest(self.a.as_ref(), self.b.as_ref())
    }

    /// Keep only records whose download stages all completed
    pub fn bootable(&self) -> Self {
        let keep = |r: &Option<ImageStatusRecord>| r.clone().filter(|r| r.is_bootable());
        Self {
            a: keep(&self.a),
            b: keep(&self.b),
        }
    }
}

/// Read and validate one record. A record failing its CRC reads as `None`.
pub fn read_record<F: FlashHal + ?Sized>(
    flash: &mut F,
    address: u32,
) -> Result<Option<ImageStatusRecord>, FlashError> {
    let mut bytes = [0u8; RECORD_LEN];
    flash.read(address, &mut bytes)?;
    match ImageStatusRecord::from_bytes(&bytes) {
        Ok(record) => Ok(Some(record)),
        Err(e) => {
            debug!(address = format!("0x{:08X}", address), error = %e, "No valid image status record");
            Ok(None)
        }
    }
}
