//! Newest/oldest slot selection over the 8-bit rolling app counter.
//!
//! Counters advance by one per download and skip [`COUNTER_INVALID`], so the
//! step across the wrap (0xFE -> 0x00) shows up as a modular distance of 2.

use super::record::{ImageStatusRecord, COUNTER_INVALID};
use super::Slot;

/// The slot holding the most recent download, `None` when neither record is
/// valid. Records are passed as `None` when they failed validation.
pub fn select_newest(
    a: Option<&ImageStatusRecord>,
    b: Option<&ImageStatusRecord>,
) -> Option<Slot> {
    match (a, b) {
        (None, None) => None,
        (Some(_), None) => Some(Slot::A),
        (None, Some(_)) => Some(Slot::B),
        (Some(a), Some(b)) => Some(newer_by_counter(a.app_counter, b.app_counter)),
    }
}

/// The slot to erase and program next. Always the one not selected as
/// newest, so a working fallback image survives the download.
pub fn select_oldest(a: Option<&ImageStatusRecord>, b: Option<&ImageStatusRecord>) -> Slot {
    match select_newest(a, b) {
        Some(newest) => newest.other(),
        None => Slot::A,
    }
}

/// Counter for the record written after a successful download
pub fn next_app_counter(newest: Option<u8>) -> u8 {
    match newest {
        None => 0,
        Some(counter) => match counter.wrapping_add(1) {
            COUNTER_INVALID => 0,
            next => next,
        },
    }
}

fn newer_by_counter(a: u8, b: u8) -> Slot {
    if a == COUNTER_INVALID && b != COUNTER_INVALID {
        return Slot::B;
    }
    if b == COUNTER_INVALID && a != COUNTER_INVALID {
        return Slot::A;
    }

    match a.wrapping_sub(b) {
        0x01 | 0x02 => Slot::A,
        0xFF | 0xFE => Slot::B,
        _ => Slot::A,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(counter: u8) -> ImageStatusRecord {
        ImageStatusRecord {
            erase_ok: true,
            program_ok: true,
            struct_valid: true,
            app_counter: counter,
            fingerprint: [0; 9],
            reset_vector: 0,
            image_length: 0,
        }
    }

    fn newest(a: u8, b: u8) -> Option<Slot> {
        select_newest(Some(&record(a)), Some(&record(b)))
    }

    #[test]
    fn test_single_valid_record_wins() {
        assert_eq!(select_newest(Some(&record(3)), None), Some(Slot::A));
        assert_eq!(select_newest(None, Some(&record(3))), Some(Slot::B));
        assert_eq!(select_newest(None, None), None);
    }

    #[test]
    fn test_forward_delta_of_one() {
        assert_eq!(newest(5, 4), Some(Slot::A));
        assert_eq!(newest(4, 5), Some(Slot::B));
    }

    #[test]
    fn test_wrap_across_reserved_value() {
        assert_eq!(newest(0xFE, 0x00), Some(Slot::B));
        assert_eq!(newest(0x00, 0xFE), Some(Slot::A));
    }

    #[test]
    fn test_reserved_counter_cedes() {
        assert_eq!(newest(0xFF, 0x10), Some(Slot::B));
        assert_eq!(newest(0x10, 0xFF), Some(Slot::A));
    }

    #[test]
    fn test_ambiguous_tie_defaults_to_a() {
        assert_eq!(newest(9, 9), Some(Slot::A));
        assert_eq!(newest(0x10, 0x80), Some(Slot::A));
        assert_eq!(newest(0xFF, 0xFF), Some(Slot::A));
    }

    #[test]
    fn test_oldest_is_complement() {
        assert_eq!(select_oldest(None, None), Slot::A);
        assert_eq!(select_oldest(Some(&record(1)), None), Slot::B);
        assert_eq!(
            select_oldest(Some(&record(0xFE)), Some(&record(0x00))),
            Slot::A
        );
    }

    #[test]
    fn test_next_counter_skips_reserved_value() {
        assert_eq!(next_app_counter(None), 0);
        assert_eq!(next_app_counter(Some(4)), 5);
        assert_eq!(next_app_counter(Some(0xFE)), 0);
    }
}
