//! Transport collaborator consumed by the engine

use crate::error::IoError;

/// Raw CAN frame output.
///
/// `send` only hands the frame to the hardware. Completion is signalled
/// asynchronously by the owner calling [`crate::CanTp::on_tx_confirm`] once
/// the controller reports the frame on the bus.
pub trait TransportIo {
    fn send(&mut self, id: u32, frame: &[u8]) -> Result<(), IoError>;

    /// Drop a frame that was handed over but not yet confirmed
    fn abort_send(&mut self);
}

impl<T: TransportIo + ?Sized> TransportIo for Box<T> {
    fn send(&mut self, id: u32, frame: &[u8]) -> Result<(), IoError> {
        (**self).send(id, frame)
    }

    fn abort_send(&mut self) {
        (**self).abort_send()
    }
}
