//! In-memory collaborators for unit tests

use crc::{Crc, Digest, CRC_32_ISO_HDLC};

use crate::error::FlashError;
use crate::hal::{CrcService, FlashHal};

pub static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// NOR-like flash: erase sets 0xFF, programming can only clear bits
pub struct MemFlash {
    pub data: Vec<u8>,
    pub erase_calls: Vec<u32>,
    pub fail_erase_at: Option<u32>,
    pub fail_program: bool,
}

impl MemFlash {
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0xFF; size],
            erase_calls: Vec::new(),
            fail_erase_at: None,
            fail_program: false,
        }
    }
}

impl FlashHal for MemFlash {
    fn erase_sector(&mut self, address: u32, len: u32) -> Result<(), FlashError> {
        if self.fail_erase_at == Some(address) {
            return Err(FlashError::EraseFailed { address });
        }
        self.erase_calls.push(address);
        let start = address as usize;
        self.data[start..start + len as usize].fill(0xFF);
        Ok(())
    }

    fn program(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        if self.fail_program {
            return Err(FlashError::ProgramFailed { address });
        }
        let start = address as usize;
        for (cell, byte) in self.data[start..start + data.len()].iter_mut().zip(data) {
            *cell &= *byte;
        }
        if &self.data[start..start + data.len()] != data {
            return Err(FlashError::ProgramFailed { address });
        }
        Ok(())
    }

    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        let start = address as usize;
        buf.copy_from_slice(&self.data[start..start + buf.len()]);
        Ok(())
    }
}

#[derive(Default)]
pub struct TestCrc {
    digest: Option<Digest<'static, u32>>,
}

impl CrcService for TestCrc {
    fn begin(&mut self) {
        self.digest = Some(CRC32.digest());
    }

    fn accumulate(&mut self, data: &[u8]) {
        if let Some(digest) = self.digest.as_mut() {
            digest.update(data);
        }
    }

    fn finish(&mut self) -> u32 {
        self.digest.take().map(|d| d.finalize()).unwrap_or(0)
    }
}
