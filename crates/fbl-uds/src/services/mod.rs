//! Service handlers, one module per service family. Each handler receives
//! the complete request PDU after the dispatcher's gates have passed.

mod data;
mod routine;
mod security;
mod session;
mod transfer;

use crate::response::Response;
use crate::SUPPRESS_POSITIVE_RESPONSE;

/// Split a sub-function byte into its value and the suppress bit
pub(crate) fn sub_function(byte: u8) -> (u8, bool) {
    (
        byte & !SUPPRESS_POSITIVE_RESPONSE,
        byte & SUPPRESS_POSITIVE_RESPONSE != 0,
    )
}

pub(crate) fn positive_or_suppressed(sid: u8, data: &[u8], suppress: bool) -> Response {
    if suppress {
        Response::Suppressed
    } else {
        Response::positive(sid, data)
    }
}

pub(crate) fn read_u16(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

pub(crate) fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
