//! Simulated NOR flash
//!
//! Erase sets a whole sector to 0xFF; programming can only clear bits, so
//! writing over unerased data fails the same way real NOR does. The image
//! can be backed by a file so slot records survive a restart.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use fbl_uds::{FlashError, FlashHal};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{NodeError, NodeResult};

const ERASED: u8 = 0xFF;

struct FlashImage {
    data: Vec<u8>,
    sector_size: u32,
    path: Option<PathBuf>,
    dirty: bool,
}

/// Cloneable handle to one flash image. The dispatcher programs through one
/// clone while the node keeps another for persistence and boot decisions.
#[derive(Clone)]
pub struct SimulatedFlash {
    inner: Arc<Mutex<FlashImage>>,
}

impl SimulatedFlash {
    /// Fully erased in-memory flash
    pub fn new(size: u32, sector_size: u32) -> Self {
        Self::from_image(vec![ERASED; size as usize], sector_size, None)
    }

    /// Flash backed by `path`. A missing file starts erased and is created
    /// on the first sync.
    pub fn open(path: impl AsRef<Path>, size: u32, sector_size: u32) -> NodeResult<Self> {
        let path = path.as_ref().to_path_buf();
        let data = match std::fs::read(&path) {
            Ok(data) => {
                if data.len() != size as usize {
                    return Err(NodeError::Config(format!(
                        "Flash image {} is {} bytes, expected {}",
                        path.display(),
                        data.len(),
                        size
                    )));
                }
                info!(path = %path.display(), "Loaded flash image");
                data
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No flash image yet, starting erased");
                vec![ERASED; size as usize]
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self::from_image(data, sector_size, Some(path)))
    }

    fn from_image(data: Vec<u8>, sector_size: u32, path: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(FlashImage {
                data,
                sector_size,
                path,
                dirty: false,
            })),
        }
    }

    pub fn size(&self) -> u32 {
        self.inner.lock().data.len() as u32
    }

    /// Copy of `len` bytes at `address`, for inspection
    pub fn snapshot(&self, address: u32, len: usize) -> Option<Vec<u8>> {
        let image = self.inner.lock();
        let start = address as usize;
        image.data.get(start..start + len).map(<[u8]>::to_vec)
    }

    /// Write pending changes to the backing file, if any
    pub fn sync(&self) -> NodeResult<()> {
        let mut image = self.inner.lock();
        if !image.dirty {
            return Ok(());
        }
        if let Some(path) = &image.path {
            std::fs::write(path, &image.data)?;
            debug!(path = %path.display(), "Flash image persisted");
        }
        image.dirty = false;
        Ok(())
    }
}

impl FlashImage {
    fn range(&self, address: u32, len: usize) -> Option<std::ops::Range<usize>> {
        let start = address as usize;
        let end = start.checked_add(len)?;
        (end <= self.data.len()).then_some(start..end)
    }
}

impl FlashHal for SimulatedFlash {
    fn erase_sector(&mut self, address: u32, len: u32) -> Result<(), FlashError> {
        let mut image = self.inner.lock();
        if address % image.sector_size != 0 || len % image.sector_size != 0 {
            warn!(address = format!("0x{:08X}", address), len, "Unaligned erase");
            return Err(FlashError::EraseFailed { address });
        }
        let range = image
            .range(address, len as usize)
            .ok_or(FlashError::EraseFailed { address })?;
        image.data[range].fill(ERASED);
        image.dirty = true;
        debug!(address = format!("0x{:08X}", address), len, "Sector erased");
        Ok(())
    }

    fn program(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        let mut image = self.inner.lock();
        let range = image
            .range(address, data.len())
            .ok_or(FlashError::ProgramFailed { address })?;
        let cells = &mut image.data[range];
        for (cell, byte) in cells.iter_mut().zip(data) {
            *cell &= *byte;
        }
        let verified = &cells[..] == data;
        image.dirty = true;
        if !verified {
            warn!(address = format!("0x{:08X}", address), "Program over unerased cells");
            return Err(FlashError::ProgramFailed { address });
        }
        Ok(())
    }

    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        let image = self.inner.lock();
        let range = image
            .range(address, buf.len())
            .ok_or(FlashError::ReadFailed { address })?;
        buf.copy_from_slice(&image.data[range]);
        Ok(())
    }
}
