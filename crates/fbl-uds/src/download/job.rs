//! The single background flash job slot

use crate::service_id;

/// Sector-by-sector erase of a slot: its record sector first, then the
/// requested part of its application region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EraseJob {
    pub record_sector: Option<u32>,
    pub start: u32,
    pub next: u32,
    pub end: u32,
    /// Sectors left before the tester has to be asked for more time
    pub budget: u32,
}

/// One TransferData block being written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramJob {
    pub block_counter: u8,
    pub address: u32,
    pub data: Vec<u8>,
    pub written: usize,
}

/// Streams the downloaded range through the CRC collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckJob {
    pub next: u32,
    pub end: u32,
    pub expected: u32,
}

/// Only one job can exist at a time; the dispatcher owns exactly one slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FlashOperationJob {
    #[default]
    Idle,
    Erasing(EraseJob),
    Programming(ProgramJob),
    Checking(CheckJob),
    /// Erase budget spent; another response pending was sent and the erase
    /// resumes on the next pass
    WaitingForTesterTime(EraseJob),
}

impl FlashOperationJob {
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Idle)
    }

    /// Service whose final response the job owes
    pub fn service_id(&self) -> Option<u8> {
        match self {
            Self::Idle => None,
            Self::Erasing(_) | Self::Checking(_) | Self::WaitingForTesterTime(_) => {
                Some(service_id::ROUTINE_CONTROL)
            }
            Self::Programming(_) => Some(service_id::TRANSFER_DATA),
        }
    }
}
