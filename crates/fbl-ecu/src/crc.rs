//! CRC-32 collaborator used by the check memory routine

use ::crc::{Crc, Digest, CRC_32_ISO_HDLC};
use fbl_uds::CrcService;

pub static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Streaming CRC-32 (ISO-HDLC), the value a tester computes over the image
#[derive(Default)]
pub struct Crc32Engine {
    digest: Option<Digest<'static, u32>>,
}

impl CrcService for Crc32Engine {
    fn begin(&mut self) {
        self.digest = Some(CRC32.digest());
    }

    fn accumulate(&mut self, data: &[u8]) {
        // Data before `begin` starts a fresh computation
        self.digest.get_or_insert_with(|| CRC32.digest()).update(data);
    }

    fn finish(&mut self) -> u32 {
        self.digest
            .take()
            .map_or_else(|| CRC32.checksum(&[]), |digest| digest.finalize())
    }
}
