//! UDS server errors

use thiserror::Error;

use crate::nrc::NegativeResponseCode;

/// A rejected request. Each variant maps to exactly one NRC byte.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ServiceError {
    #[error("Service not supported")]
    ServiceNotSupported,

    #[error("Sub-function not supported")]
    SubFunctionNotSupported,

    #[error("Incorrect message length or format")]
    IncorrectMessageLength,

    #[error("Conditions not correct")]
    ConditionsNotCorrect,

    #[error("Request sequence error")]
    RequestSequenceError,

    #[error("Request out of range")]
    RequestOutOfRange,

    #[error("Invalid key")]
    InvalidKey,

    #[error("General programming failure")]
    GeneralProgrammingFailure,
}

impl From<ServiceError> for NegativeResponseCode {
    fn from(error: ServiceError) -> Self {
        match error {
            ServiceError::ServiceNotSupported => Self::ServiceNotSupported,
            ServiceError::SubFunctionNotSupported => Self::SubFunctionNotSupported,
            ServiceError::IncorrectMessageLength => Self::IncorrectMessageLengthOrFormat,
            ServiceError::ConditionsNotCorrect => Self::ConditionsNotCorrect,
            ServiceError::RequestSequenceError => Self::RequestSequenceError,
            ServiceError::RequestOutOfRange => Self::RequestOutOfRange,
            ServiceError::InvalidKey => Self::InvalidKey,
            ServiceError::GeneralProgrammingFailure => Self::GeneralProgrammingFailure,
        }
    }
}

/// Failures of the flash path during a download
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FlashError {
    #[error("Erase failed at 0x{address:08X}")]
    EraseFailed { address: u32 },

    #[error("Program failed at 0x{address:08X}")]
    ProgramFailed { address: u32 },

    #[error("Read failed at 0x{address:08X}")]
    ReadFailed { address: u32 },

    #[error("Checksum mismatch: expected 0x{expected:08X}, computed 0x{computed:08X}")]
    ChecksumMismatch { expected: u32, computed: u32 },

    #[error("Download step sequence violated")]
    SequenceViolation,
}

impl From<FlashError> for ServiceError {
    fn from(error: FlashError) -> Self {
        match error {
            FlashError::SequenceViolation => ServiceError::RequestSequenceError,
            _ => ServiceError::GeneralProgrammingFailure,
        }
    }
}

/// Decoding failures of a persisted image status record
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RecordError {
    #[error("Record too short: {len} bytes")]
    TooShort { len: usize },

    #[error("Record CRC mismatch: stored 0x{stored:08X}, computed 0x{computed:08X}")]
    CrcMismatch { stored: u32, computed: u32 },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid UDS configuration: {0}")]
    Invalid(String),
}
