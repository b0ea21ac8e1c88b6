//! CAN-TP errors

use thiserror::Error;

/// Protocol violations and timeouts that abort an exchange.
///
/// None of these are retried by the transport; the upper layer has to
/// re-initiate the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// N_As/N_Ar expired waiting for the transport to confirm a frame
    #[error("Timeout waiting for transmit confirmation (N_As/N_Ar)")]
    TimeoutA,

    /// N_Bs expired waiting for a flow control frame
    #[error("Timeout waiting for flow control (N_Bs)")]
    TimeoutBs,

    /// N_Cr expired waiting for the next consecutive frame
    #[error("Timeout waiting for consecutive frame (N_Cr)")]
    TimeoutCr,

    #[error("Wrong sequence number: expected {expected}, got {got}")]
    WrongSequenceNumber { expected: u8, got: u8 },

    /// A single or first frame arrived in the middle of a reassembly
    #[error("Unexpected PDU during reassembly")]
    UnexpectedPdu,

    #[error("Buffer overflow")]
    BufferOverflow,

    #[error("Invalid flow status 0x{0:X}")]
    InvalidFlowStatus(u8),

    #[error("Flow control wait limit exceeded")]
    WaitLimitExceeded,
}

/// Errors returned synchronously by [`crate::CanTp::send_pdu`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TpError {
    /// Another exchange is already live
    #[error("Transport busy")]
    Busy,

    #[error("Payload too large: {len} bytes (maximum {max})")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("Empty payload")]
    EmptyPayload,

    #[error("Transport IO error: {0}")]
    Io(#[from] IoError),
}

/// Frame decoding errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("Empty frame")]
    Empty,

    #[error("Unknown PCI type 0x{0:X}")]
    UnknownPci(u8),

    #[error("Frame too short for its PCI type")]
    TooShort,

    #[error("Invalid length field")]
    InvalidLength,
}

/// Errors reported by a [`crate::TransportIo`] implementation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IoError {
    /// The transmit mailbox is full; the frame may be retried later
    #[error("Transmit mailbox busy")]
    Busy,

    #[error("Bus error: {0}")]
    Bus(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid CAN-TP configuration: {0}")]
    Invalid(String),
}
