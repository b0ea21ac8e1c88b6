//! Collaborators the diagnostic server consumes
//!
//! Register-level flash access, the CRC engine, the seed/key cipher and the
//! reset mechanism are platform concerns. The server only sees these traits.

use crate::error::FlashError;
use crate::response::ResetRequest;

/// Non-volatile memory
pub trait FlashHal {
    /// Erase `len` bytes starting at a sector boundary
    fn erase_sector(&mut self, address: u32, len: u32) -> Result<(), FlashError>;

    fn program(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError>;

    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), FlashError>;
}

/// Streaming CRC engine used to verify downloaded images
pub trait CrcService {
    /// Start a new computation, discarding any previous state
    fn begin(&mut self);

    fn accumulate(&mut self, data: &[u8]);

    /// Final CRC value; the engine is ready for `begin` again
    fn finish(&mut self) -> u32;
}

/// Seed/key challenge collaborator
#[cfg_attr(test, mockall::automock)]
pub trait SecurityProvider {
    /// Fill `buf` with random seed bytes
    fn random_bytes(&mut self, buf: &mut [u8]);

    /// Decrypt the tester's key and compare it with the issued seed
    fn decrypt_and_compare(&self, key: &[u8], seed: &[u8]) -> bool;
}

/// Performs the actual device reset
pub trait ResetControl {
    fn reset(&mut self, request: ResetRequest);
}

impl<T: FlashHal + ?Sized> FlashHal for Box<T> {
    fn erase_sector(&mut self, address: u32, len: u32) -> Result<(), FlashError> {
        (**self).erase_sector(address, len)
    }

    fn program(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        (**self).program(address, data)
    }

    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        (**self).read(address, buf)
    }
}
