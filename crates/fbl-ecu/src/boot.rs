//! Boot-time A/B decision

use fbl_uds::image::SlotRecords;
use fbl_uds::{FlashConfig, FlashError, FlashHal, Slot};
use tracing::info;

/// Application image to hand over to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootTarget {
    pub slot: Slot,
    pub reset_vector: u32,
    pub image_length: u32,
    pub app_counter: u8,
}

/// Newest slot whose record is valid and complete, or `None` to stay in the
/// bootloader
pub fn select_boot_target<F: FlashHal + ?Sized>(
    flash: &mut F,
    layout: &FlashConfig,
) -> Result<Option<BootTarget>, FlashError> {
    let records = SlotRecords::read(flash, layout)?.bootable();
    let target = records.newest().and_then(|slot| {
        records.get(slot).map(|record| BootTarget {
            slot,
            reset_vector: record.reset_vector,
            image_length: record.image_length,
            app_counter: record.app_counter,
        })
    });

    match &target {
        Some(target) => info!(
            slot = %target.slot,
            app_counter = target.app_counter,
            reset_vector = format!("0x{:08X}", target.reset_vector),
            "Boot target selected"
        ),
        None => info!("No bootable image, staying in bootloader"),
    }
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash::SimulatedFlash;
    use fbl_uds::ImageStatusRecord;
    use pretty_assertions::assert_eq;

    fn record(counter: u8, program_ok: bool) -> ImageStatusRecord {
        ImageStatusRecord {
            erase_ok: true,
            program_ok,
            struct_valid: true,
            app_counter: counter,
            fingerprint: *b"TESTER-01",
            reset_vector: 0x0000_5000 + counter as u32,
            image_length: 0x100,
        }
    }

    fn flash_with(a: Option<ImageStatusRecord>, b: Option<ImageStatusRecord>) -> SimulatedFlash {
        let layout = FlashConfig::default();
        let mut flash = SimulatedFlash::new(layout.flash_size, layout.sector_size);
        if let Some(a) = a {
            flash.program(layout.slot_a.record_address, &a.to_bytes()).unwrap();
        }
        if let Some(b) = b {
            flash.program(layout.slot_b.record_address, &b.to_bytes()).unwrap();
        }
        flash
    }

    #[test]
    fn test_erased_flash_stays_in_bootloader() {
        let mut flash = flash_with(None, None);
        assert_eq!(select_boot_target(&mut flash, &FlashConfig::default()), Ok(None));
    }

    #[test]
    fn test_newest_complete_slot_wins() {
        let mut flash = flash_with(Some(record(4, true)), Some(record(5, true)));
        let target = select_boot_target(&mut flash, &FlashConfig::default())
            .unwrap()
            .unwrap();
        assert_eq!(target.slot, Slot::B);
        assert_eq!(target.reset_vector, 0x5005);
    }

    #[test]
    fn test_incomplete_record_falls_back() {
        let mut flash = flash_with(Some(record(4, true)), Some(record(5, false)));
        let target = select_boot_target(&mut flash, &FlashConfig::default())
            .unwrap()
            .unwrap();
        assert_eq!(target.slot, Slot::A);
        assert_eq!(target.app_counter, 4);
    }

    #[test]
    fn test_corrupted_record_ignored() {
        let layout = FlashConfig::default();
        let mut flash = flash_with(Some(record(4, true)), Some(record(5, true)));
        // Clear bits inside B's reset vector (0x5005); its CRC no longer matches
        flash
            .program(layout.slot_b.record_address + 15, &[0x10])
            .unwrap();
        let target = select_boot_target(&mut flash, &layout).unwrap().unwrap();
        assert_eq!(target.slot, Slot::A);
    }
}
