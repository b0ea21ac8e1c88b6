//! Download step machine: RequestDownload -> TransferData -> RequestTransferExit -> checksum

use tracing::{debug, warn};

use crate::error::FlashError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStep {
    /// Waiting for RequestDownload
    Request,
    /// Accepting TransferData blocks
    Transfer,
    /// All data received, waiting for RequestTransferExit
    ExitTransfer,
    /// Waiting for the check memory routine
    Checksum,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTransferState {
    step: TransferStep,
    start_address: u32,
    next_address: u32,
    total_length: u32,
    remaining: u32,
    block_sequence: u8,
}

impl Default for DownloadTransferState {
    fn default() -> Self {
        Self {
            step: TransferStep::Request,
            start_address: 0,
            next_address: 0,
            total_length: 0,
            remaining: 0,
            block_sequence: 1,
        }
    }
}

impl DownloadTransferState {
    pub fn step(&self) -> TransferStep {
        self.step
    }

    /// Physical address of the first downloaded byte
    pub fn start_address(&self) -> u32 {
        self.start_address
    }

    /// Physical address the next TransferData block is programmed at
    pub fn next_address(&self) -> u32 {
        self.next_address
    }

    pub fn total_length(&self) -> u32 {
        self.total_length
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Block sequence counter expected in the next TransferData
    pub fn expected_block(&self) -> u8 {
        self.block_sequence
    }

    /// Fail closed: a request arriving in the wrong step resets the whole
    /// download back to `Request`.
    pub fn expect(&mut self, step: TransferStep) -> Result<(), FlashError> {
        if self.step == step {
            return Ok(());
        }
        warn!(
            expected = ?step,
            current = ?self.step,
            "Download step sequence violated, resetting download"
        );
        self.reset();
        Err(FlashError::SequenceViolation)
    }

    /// RequestDownload accepted
    pub fn begin(&mut self, start_address: u32, length: u32) {
        self.step = TransferStep::Transfer;
        self.start_address = start_address;
        self.next_address = start_address;
        self.total_length = length;
        self.remaining = length;
        self.block_sequence = 1;
    }

    /// A TransferData block has been programmed
    pub fn complete_block(&mut self, len: u32) {
        self.next_address += len;
        self.remaining = self.remaining.saturating_sub(len);
        self.block_sequence = self.block_sequence.wrapping_add(1);
        if self.remaining == 0 {
            debug!(total = self.total_length, "All download data received");
            self.step = TransferStep::ExitTransfer;
        }
    }

    pub fn advance(&mut self, step: TransferStep) {
        self.step = step;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
