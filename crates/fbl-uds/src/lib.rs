//! fbl-uds - UDS (ISO 14229) server side of the flash bootloader
//!
//! Gates inbound diagnostic requests by addressing, session and security
//! level, dispatches them to the service handlers, and drives the flash
//! download sequence through its background jobs.
//!
//! # Architecture
//!
//! ```text
//!   handle_request(addressing, pdu) ──► Dispatcher ──► service handlers
//!                                           │                │
//!   tick() ──► S3 countdown                 │                ▼
//!                                           │        DownloadOrchestrator ──► FlashHal
//!   poll() ──► background job step ─────────┘                │                 CrcService
//!                                                            ▼
//!                                                  ImageStatusRecord (A/B)
//! ```
//!
//! Nothing here blocks: long flash operations are split into per-pass steps
//! and answered with "response pending" until they finish.

pub mod config;
pub mod context;
pub mod dispatcher;
pub mod download;
pub mod error;
pub mod hal;
pub mod image;
pub mod nrc;
pub mod response;
mod services;
#[cfg(test)]
mod testing;

pub use config::{DiagConfig, FlashConfig, SlotConfig, UdsConfig};
pub use context::{
    AddressingMask, DiagnosticContext, RequestAddressing, SecurityLevel, SecurityMask, Session,
    SessionMask,
};
pub use dispatcher::Dispatcher;
pub use download::{DownloadOrchestrator, DownloadTransferState, FlashOperationJob, TransferStep};
pub use error::{ConfigError, FlashError, RecordError, ServiceError};
pub use hal::{CrcService, FlashHal, ResetControl, SecurityProvider};
pub use image::{select_newest, select_oldest, ImageStatusRecord, Slot};
pub use nrc::NegativeResponseCode;
pub use response::{PostAction, Reply, ResetKind, ResetRequest, Response};

/// Standard UDS service ID constants
pub mod service_id {
    pub const DIAGNOSTIC_SESSION_CONTROL: u8 = 0x10;
    pub const ECU_RESET: u8 = 0x11;
    pub const READ_DATA_BY_ID: u8 = 0x22;
    pub const SECURITY_ACCESS: u8 = 0x27;
    pub const COMMUNICATION_CONTROL: u8 = 0x28;
    pub const WRITE_DATA_BY_ID: u8 = 0x2E;
    pub const ROUTINE_CONTROL: u8 = 0x31;
    pub const REQUEST_DOWNLOAD: u8 = 0x34;
    pub const TRANSFER_DATA: u8 = 0x36;
    pub const REQUEST_TRANSFER_EXIT: u8 = 0x37;
    pub const TESTER_PRESENT: u8 = 0x3E;
    pub const CONTROL_DTC_SETTING: u8 = 0x85;
    pub const NEGATIVE_RESPONSE: u8 = 0x7F;
}

/// Bit 7 of a sub-function byte: suppress the positive response
pub const SUPPRESS_POSITIVE_RESPONSE: u8 = 0x80;

/// ECUReset (0x11) sub-functions
pub mod reset_type {
    /// Hard reset - complete restart of the ECU
    pub const HARD_RESET: u8 = 0x01;
    /// Soft reset - restart of the running software
    pub const SOFT_RESET: u8 = 0x03;
}

/// RoutineControl (0x31) sub-functions
pub mod routine_sub_function {
    pub const START_ROUTINE: u8 = 0x01;
}

/// Routine identifiers handled by the bootloader
pub mod routine_id {
    pub const ERASE_MEMORY: u16 = 0xFF00;
    pub const CHECK_MEMORY: u16 = 0x0202;
    pub const CHECK_PROGRAMMING_DEPENDENCIES: u16 = 0xFF01;
}

/// Data identifiers served by 0x22/0x2E
pub mod did {
    /// Tester fingerprint stamped into the image status record
    pub const FINGERPRINT: u16 = 0xF15A;
    pub const ACTIVE_DIAGNOSTIC_SESSION: u16 = 0xF186;
    /// Boot slot and per-slot app counters
    pub const IMAGE_STATUS: u16 = 0xF1A0;
}

/// addressAndLengthFormatIdentifier for 4-byte address and 4-byte size
pub const ADDRESS_AND_LENGTH_FORMAT: u8 = 0x44;
