//! Frame codec: PCI classification and encoding for SF/FF/CF/FC frames
//!
//! Pure functions, no state.
//!
//! # PCI layout
//!
//! ```text
//! byte 0 high nibble   type          rest
//! ──────────────────   ───────────   ──────────────────────────────────────────
//! 0                    Single        low nibble = length (0 = CAN-FD escape,
//!                                    byte 1 carries the length)
//! 1                    First         12-bit length in low nibble + byte 1
//!                                    (0 = 32-bit escape in bytes 2..6)
//! 2                    Consecutive   low nibble = sequence number
//! 3                    FlowControl   low nibble = flow status,
//!                                    byte 1 = block size, byte 2 = STmin
//! ```

use std::fmt;

use crate::error::FrameError;

/// Classic CAN frame data length
pub const CLASSIC_FRAME_LEN: usize = 8;
/// Largest CAN-FD frame data length
pub const FD_FRAME_LEN: usize = 64;
/// Largest length the 12-bit first frame field can carry
pub const FF_DL_12BIT_MAX: usize = 0x0FFF;

const FD_DATA_LENGTHS: [usize; 8] = [8, 12, 16, 20, 24, 32, 48, 64];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PciType {
    Single,
    First,
    Consecutive,
    FlowControl,
}

impl PciType {
    pub fn from_byte(byte0: u8) -> Option<Self> {
        match byte0 >> 4 {
            0x0 => Some(Self::Single),
            0x1 => Some(Self::First),
            0x2 => Some(Self::Consecutive),
            0x3 => Some(Self::FlowControl),
            _ => None,
        }
    }
}

/// Flow control status nibble
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStatus {
    ContinueToSend,
    Wait,
    Overflow,
}

impl FlowStatus {
    pub fn from_nibble(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Self::ContinueToSend),
            0x1 => Some(Self::Wait),
            0x2 => Some(Self::Overflow),
            _ => None,
        }
    }

    pub fn as_nibble(self) -> u8 {
        match self {
            Self::ContinueToSend => 0x0,
            Self::Wait => 0x1,
            Self::Overflow => 0x2,
        }
    }
}

/// A decoded frame, borrowing its payload from the raw bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame<'a> {
    Single {
        payload: &'a [u8],
    },
    First {
        total_len: u32,
        payload: &'a [u8],
    },
    Consecutive {
        sequence: u8,
        payload: &'a [u8],
    },
    /// `status` is the raw nibble so that invalid values can be reported
    FlowControl {
        status: u8,
        block_size: u8,
        st_min: u8,
    },
}

/// Frame geometry for the active bus mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    pub frame_len: usize,
    pub can_fd: bool,
    pub padding: Option<u8>,
}

impl Default for FrameLayout {
    fn default() -> Self {
        Self {
            frame_len: CLASSIC_FRAME_LEN,
            can_fd: false,
            padding: Some(0xCC),
        }
    }
}

impl FrameLayout {
    pub fn is_valid_fd_len(len: usize) -> bool {
        len <= CLASSIC_FRAME_LEN || FD_DATA_LENGTHS.contains(&len)
    }

    fn escaped_single(&self) -> bool {
        self.can_fd && self.frame_len > CLASSIC_FRAME_LEN
    }

    /// Largest payload a single frame can carry
    pub fn single_frame_max(&self) -> usize {
        if self.escaped_single() {
            self.frame_len - 2
        } else {
            self.frame_len - 1
        }
    }

    /// Payload bytes carried by the first frame of a `total_len` PDU
    pub fn first_frame_payload(&self, total_len: usize) -> usize {
        if total_len > FF_DL_12BIT_MAX {
            self.frame_len - 6
        } else {
            self.frame_len - 2
        }
    }

    pub fn consecutive_payload(&self) -> usize {
        self.frame_len - 1
    }
}

/// An encoded outbound frame
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FrameBuffer {
    data: [u8; FD_FRAME_LEN],
    len: usize,
}

impl FrameBuffer {
    fn new() -> Self {
        Self {
            data: [0u8; FD_FRAME_LEN],
            len: 0,
        }
    }

    fn push(&mut self, byte: u8) {
        self.data[self.len] = byte;
        self.len += 1;
    }

    fn extend(&mut self, bytes: &[u8]) {
        self.data[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
    }

    /// Pad to the configured length, and for CAN-FD up to the next valid DLC
    fn finish(mut self, layout: &FrameLayout) -> Self {
        let mut target = self.len;
        if layout.padding.is_some() {
            target = target.max(layout.frame_len.min(CLASSIC_FRAME_LEN));
            if !layout.can_fd {
                target = layout.frame_len;
            }
        }
        if layout.can_fd && target > CLASSIC_FRAME_LEN {
            target = FD_DATA_LENGTHS
                .iter()
                .copied()
                .find(|&len| len >= target)
                .unwrap_or(FD_FRAME_LEN);
        }
        let fill = layout.padding.unwrap_or(0xCC);
        while self.len < target {
            self.push(fill);
        }
        self
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FrameBuffer({:02X?})", self.as_bytes())
    }
}

/// Classify and decode a raw frame
pub fn decode<'a>(bytes: &'a [u8], layout: &FrameLayout) -> Result<Frame<'a>, FrameError> {
    let byte0 = *bytes.first().ok_or(FrameError::Empty)?;
    let pci = PciType::from_byte(byte0).ok_or(FrameError::UnknownPci(byte0 >> 4))?;

    match pci {
        PciType::Single => {
            let nibble = (byte0 & 0x0F) as usize;
            if nibble == 0 {
                // Escape form only exists for CAN-FD frames longer than 8 bytes
                if !layout.can_fd || bytes.len() <= CLASSIC_FRAME_LEN {
                    return Err(FrameError::InvalidLength);
                }
                let len = *bytes.get(1).ok_or(FrameError::TooShort)? as usize;
                if len == 0 || 2 + len > bytes.len() {
                    return Err(FrameError::InvalidLength);
                }
                Ok(Frame::Single {
                    payload: &bytes[2..2 + len],
                })
            } else {
                if 1 + nibble > bytes.len() || nibble > CLASSIC_FRAME_LEN - 1 {
                    return Err(FrameError::InvalidLength);
                }
                Ok(Frame::Single {
                    payload: &bytes[1..1 + nibble],
                })
            }
        }
        PciType::First => {
            if bytes.len() < 2 {
                return Err(FrameError::TooShort);
            }
            let short_len = (((byte0 & 0x0F) as u32) << 8) | bytes[1] as u32;
            if short_len != 0 {
                return Ok(Frame::First {
                    total_len: short_len,
                    payload: &bytes[2..],
                });
            }
            if bytes.len() < 6 {
                return Err(FrameError::TooShort);
            }
            let total_len = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
            if total_len as usize <= FF_DL_12BIT_MAX {
                return Err(FrameError::InvalidLength);
            }
            Ok(Frame::First {
                total_len,
                payload: &bytes[6..],
            })
        }
        PciType::Consecutive => Ok(Frame::Consecutive {
            sequence: byte0 & 0x0F,
            payload: &bytes[1..],
        }),
        PciType::FlowControl => {
            if bytes.len() < 3 {
                return Err(FrameError::TooShort);
            }
            Ok(Frame::FlowControl {
                status: byte0 & 0x0F,
                block_size: bytes[1],
                st_min: bytes[2],
            })
        }
    }
}

/// Encode a single frame. `payload` must fit [`FrameLayout::single_frame_max`].
pub fn encode_single(layout: &FrameLayout, payload: &[u8]) -> FrameBuffer {
    debug_assert!(payload.len() <= layout.single_frame_max());
    let mut buf = FrameBuffer::new();
    if payload.len() < CLASSIC_FRAME_LEN {
        buf.push(payload.len() as u8);
    } else {
        buf.push(0x00);
        buf.push(payload.len() as u8);
    }
    buf.extend(payload);
    buf.finish(layout)
}

/// Encode a first frame announcing `total_len` bytes and carrying `chunk`
pub fn encode_first(layout: &FrameLayout, total_len: usize, chunk: &[u8]) -> FrameBuffer {
    let mut buf = FrameBuffer::new();
    if total_len <= FF_DL_12BIT_MAX {
        buf.push(0x10 | ((total_len >> 8) as u8 & 0x0F));
        buf.push((total_len & 0xFF) as u8);
    } else {
        buf.push(0x10);
        buf.push(0x00);
        buf.extend(&(total_len as u32).to_be_bytes());
    }
    buf.extend(chunk);
    buf.finish(layout)
}

pub fn encode_consecutive(layout: &FrameLayout, sequence: u8, chunk: &[u8]) -> FrameBuffer {
    let mut buf = FrameBuffer::new();
    buf.push(0x20 | (sequence & 0x0F));
    buf.extend(chunk);
    buf.finish(layout)
}

pub fn encode_flow_control(
    layout: &FrameLayout,
    status: FlowStatus,
    block_size: u8,
    st_min: u8,
) -> FrameBuffer {
    let mut buf = FrameBuffer::new();
    buf.push(0x30 | status.as_nibble());
    buf.push(block_size);
    buf.push(st_min);
    buf.finish(layout)
}

/// Separation time encoded in an STmin byte, in microseconds.
///
/// Reserved values are treated as the longest legal value (127 ms).
pub fn st_min_micros(st_min: u8) -> u32 {
    match st_min {
        0x00..=0x7F => st_min as u32 * 1000,
        0xF1..=0xF9 => (st_min - 0xF0) as u32 * 100,
        _ => 127_000,
    }
}

/// STmin in scheduler ticks, rounded up so the gap is never shorter
pub fn st_min_ticks(st_min: u8, tick_ms: u32) -> u32 {
    st_min_micros(st_min).div_ceil(tick_ms.max(1) * 1000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fd_layout() -> FrameLayout {
        FrameLayout {
            frame_len: 64,
            can_fd: true,
            padding: Some(0xAA),
        }
    }

    #[test]
    fn test_pci_classification() {
        assert_eq!(PciType::from_byte(0x07), Some(PciType::Single));
        assert_eq!(PciType::from_byte(0x1F), Some(PciType::First));
        assert_eq!(PciType::from_byte(0x2A), Some(PciType::Consecutive));
        assert_eq!(PciType::from_byte(0x30), Some(PciType::FlowControl));
        assert_eq!(PciType::from_byte(0x40), None);
    }

    #[test]
    fn test_single_frame_is_padded() {
        let frame = encode_single(&FrameLayout::default(), &[0x3E, 0x00]);
        assert_eq!(
            frame.as_bytes(),
            &[0x02, 0x3E, 0x00, 0xCC, 0xCC, 0xCC, 0xCC, 0xCC]
        );
    }

    #[test]
    fn test_unpadded_single_frame() {
        let layout = FrameLayout {
            padding: None,
            ..Default::default()
        };
        let frame = encode_single(&layout, &[0x10, 0x02]);
        assert_eq!(frame.as_bytes(), &[0x02, 0x10, 0x02]);
    }

    #[test]
    fn test_single_frame_length_boundary() {
        let layout = FrameLayout::default();
        assert_eq!(layout.single_frame_max(), 7);

        let max = [0x07, 1, 2, 3, 4, 5, 6, 7];
        assert_eq!(
            decode(&max, &layout),
            Ok(Frame::Single {
                payload: &[1, 2, 3, 4, 5, 6, 7]
            })
        );

        let too_long = [0x08, 1, 2, 3, 4, 5, 6, 7];
        assert_eq!(decode(&too_long, &layout), Err(FrameError::InvalidLength));
    }

    #[test]
    fn test_fd_escaped_single_frame() {
        let layout = fd_layout();
        assert_eq!(layout.single_frame_max(), 62);

        let payload = [0x5Au8; 62];
        let frame = encode_single(&layout, &payload);
        assert_eq!(frame.len(), 64);
        assert_eq!(&frame.as_bytes()[..2], &[0x00, 62]);
        assert_eq!(
            decode(frame.as_bytes(), &layout),
            Ok(Frame::Single { payload: &payload })
        );

        let mut too_long = frame.as_bytes().to_vec();
        too_long[1] = 63;
        assert_eq!(decode(&too_long, &layout), Err(FrameError::InvalidLength));
    }

    #[test]
    fn test_escape_rejected_on_classic_can() {
        let raw = [0x00, 0x03, 1, 2, 3, 0, 0, 0];
        assert_eq!(
            decode(&raw, &FrameLayout::default()),
            Err(FrameError::InvalidLength)
        );
    }

    #[test]
    fn test_first_frame_12bit_length() {
        let layout = FrameLayout::default();
        let frame = encode_first(&layout, 0x123, &[1, 2, 3, 4, 5, 6]);
        assert_eq!(frame.as_bytes(), &[0x11, 0x23, 1, 2, 3, 4, 5, 6]);
        assert_eq!(
            decode(frame.as_bytes(), &layout),
            Ok(Frame::First {
                total_len: 0x123,
                payload: &[1, 2, 3, 4, 5, 6]
            })
        );
    }

    #[test]
    fn test_first_frame_32bit_escape() {
        let layout = FrameLayout::default();
        assert_eq!(layout.first_frame_payload(5000), 2);

        let frame = encode_first(&layout, 5000, &[0xAB, 0xCD]);
        assert_eq!(
            frame.as_bytes(),
            &[0x10, 0x00, 0x00, 0x00, 0x13, 0x88, 0xAB, 0xCD]
        );
        assert_eq!(
            decode(frame.as_bytes(), &layout),
            Ok(Frame::First {
                total_len: 5000,
                payload: &[0xAB, 0xCD]
            })
        );
    }

    #[test]
    fn test_consecutive_frame_sequence_masked() {
        let layout = FrameLayout::default();
        let frame = encode_consecutive(&layout, 0x11, &[9, 9]);
        assert_eq!(frame.as_bytes()[0], 0x21);
        assert_eq!(
            decode(frame.as_bytes(), &layout).unwrap(),
            Frame::Consecutive {
                sequence: 1,
                payload: &[9, 9, 0xCC, 0xCC, 0xCC, 0xCC, 0xCC]
            }
        );
    }

    #[test]
    fn test_flow_control_layout() {
        let layout = FrameLayout::default();
        let frame = encode_flow_control(&layout, FlowStatus::Wait, 8, 0x14);
        assert_eq!(&frame.as_bytes()[..3], &[0x31, 0x08, 0x14]);
        assert_eq!(
            decode(frame.as_bytes(), &layout),
            Ok(Frame::FlowControl {
                status: 1,
                block_size: 8,
                st_min: 0x14
            })
        );
    }

    #[test]
    fn test_short_frames_rejected() {
        let layout = FrameLayout::default();
        assert_eq!(decode(&[], &layout), Err(FrameError::Empty));
        assert_eq!(decode(&[0x10], &layout), Err(FrameError::TooShort));
        assert_eq!(decode(&[0x30, 0x00], &layout), Err(FrameError::TooShort));
        assert_eq!(decode(&[0x50, 0x00], &layout), Err(FrameError::UnknownPci(5)));
    }

    #[test]
    fn test_st_min_conversion() {
        assert_eq!(st_min_micros(0x00), 0);
        assert_eq!(st_min_micros(0x14), 20_000);
        assert_eq!(st_min_micros(0xF3), 300);
        assert_eq!(st_min_micros(0x80), 127_000);
        assert_eq!(st_min_ticks(0x14, 1), 20);
        assert_eq!(st_min_ticks(0xF1, 1), 1);
        assert_eq!(st_min_ticks(0x05, 10), 1);
    }
}
