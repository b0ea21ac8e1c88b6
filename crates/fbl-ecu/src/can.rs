//! Raw CAN frame IO for the node
//!
//! [`FrameIo`] extends the engine's [`TransportIo`] with the receive side
//! and the transmit-confirmation flag the scheduler polls.

use std::collections::VecDeque;

use fbl_cantp::{IoError, TransportIo};
use tracing::trace;

/// Bidirectional frame IO polled once per scheduler pass
pub trait FrameIo: TransportIo {
    /// Next received frame, `None` when nothing is pending
    fn recv_frame(&mut self) -> Result<Option<(u32, Vec<u8>)>, IoError>;

    /// True once per frame the controller reported as transmitted
    fn take_tx_confirm(&mut self) -> bool;
}

/// In-memory IO: frames pushed in are received, frames sent are collected.
/// Every accepted frame is confirmed on the next pass.
#[derive(Debug, Default)]
pub struct LoopbackIo {
    inbox: VecDeque<(u32, Vec<u8>)>,
    sent: Vec<(u32, Vec<u8>)>,
    unconfirmed: bool,
    /// Refuse sends with `Busy`, as a full controller mailbox would
    pub busy: bool,
}

impl LoopbackIo {
    pub fn push_frame(&mut self, id: u32, frame: &[u8]) {
        self.inbox.push_back((id, frame.to_vec()));
    }

    pub fn take_sent(&mut self) -> Vec<(u32, Vec<u8>)> {
        std::mem::take(&mut self.sent)
    }
}

impl TransportIo for LoopbackIo {
    fn send(&mut self, id: u32, frame: &[u8]) -> Result<(), IoError> {
        if self.busy {
            return Err(IoError::Busy);
        }
        self.sent.push((id, frame.to_vec()));
        self.unconfirmed = true;
        Ok(())
    }

    fn abort_send(&mut self) {
        self.unconfirmed = false;
    }
}

impl FrameIo for LoopbackIo {
    fn recv_frame(&mut self) -> Result<Option<(u32, Vec<u8>)>, IoError> {
        Ok(self.inbox.pop_front())
    }

    fn take_tx_confirm(&mut self) -> bool {
        std::mem::take(&mut self.unconfirmed)
    }
}

#[cfg(feature = "socketcan")]
pub use self::socket::SocketCanIo;

#[cfg(feature = "socketcan")]
mod socket {
    use std::io::ErrorKind;

    use socketcan::{
        CanFrame, CanSocket, EmbeddedFrame, ExtendedId, Frame, Id, Socket, StandardId,
    };
    use tracing::{debug, info};

    use super::*;

    /// Raw SocketCAN interface. Writes complete synchronously, so a frame
    /// the kernel accepted is confirmed on the next pass.
    pub struct SocketCanIo {
        socket: CanSocket,
        interface: String,
        unconfirmed: bool,
    }

    impl SocketCanIo {
        pub fn open(interface: &str) -> Result<Self, IoError> {
            let socket = CanSocket::open(interface).map_err(|e| {
                IoError::Bus(format!("Failed to open CAN socket on {}: {}", interface, e))
            })?;
            socket
                .set_nonblocking(true)
                .map_err(|e| IoError::Bus(format!("Failed to set non-blocking: {}", e)))?;
            info!(interface = %interface, "CAN socket opened");
            Ok(Self {
                socket,
                interface: interface.to_string(),
                unconfirmed: false,
            })
        }

        pub fn interface(&self) -> &str {
            &self.interface
        }
    }

    fn can_id(id: u32) -> Option<Id> {
        if id <= 0x7FF {
            StandardId::new(id as u16).map(Id::Standard)
        } else {
            ExtendedId::new(id).map(Id::Extended)
        }
    }

    impl TransportIo for SocketCanIo {
        fn send(&mut self, id: u32, frame: &[u8]) -> Result<(), IoError> {
            let can_id =
                can_id(id).ok_or_else(|| IoError::Bus(format!("Invalid CAN ID: 0x{:X}", id)))?;
            let can_frame = CanFrame::new(can_id, frame)
                .ok_or_else(|| IoError::Bus(format!("Invalid frame length {}", frame.len())))?;

            match self.socket.write_frame(&can_frame) {
                Ok(()) => {
                    self.unconfirmed = true;
                    Ok(())
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => Err(IoError::Busy),
                Err(e) => Err(IoError::Bus(e.to_string())),
            }
        }

        fn abort_send(&mut self) {
            self.unconfirmed = false;
        }
    }

    impl FrameIo for SocketCanIo {
        fn recv_frame(&mut self) -> Result<Option<(u32, Vec<u8>)>, IoError> {
            match self.socket.read_frame() {
                Ok(CanFrame::Data(frame)) => {
                    trace!(can_id = format!("0x{:X}", frame.raw_id()), "Frame received");
                    Ok(Some((frame.raw_id(), frame.data().to_vec())))
                }
                Ok(_) => {
                    debug!(interface = %self.interface, "Ignoring remote or error frame");
                    Ok(None)
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
                Err(e) => Err(IoError::Bus(e.to_string())),
            }
        }

        fn take_tx_confirm(&mut self) -> bool {
            std::mem::take(&mut self.unconfirmed)
        }
    }
}
