//! fbl-cantp - ISO 15765-2 transport for the flash bootloader
//!
//! Segments outbound PDUs into Single/First/Consecutive frames and
//! reassembles inbound ones, driving flow control and the N_xx timers from
//! a fixed-period tick.
//!
//! # Architecture
//!
//! ```text
//!   receive_frame(id, bytes) ──► frame::decode ──┐
//!                                                 ▼
//!   send_pdu(id, bytes) ───────────────────► CanTp state machine ──► TransportIo::send
//!   on_tx_confirm() ─────────────────────────────┘   ▲    │
//!   tick() ──────────────────────────────────────────┘    └──► poll_event() -> TpEvent
//! ```
//!
//! The engine is strictly half duplex: at most one exchange is live at any
//! time, and every timeout or sequencing violation hard-aborts it.

pub mod config;
pub mod engine;
pub mod error;
pub mod frame;
pub mod io;
pub mod timer;

pub use config::{TpAddresses, TpConfig};
pub use engine::{Addressing, CanTp, Direction, PendingFrame, TpEvent, TpState};
pub use error::{ConfigError, FrameError, IoError, ProtocolError, TpError};
pub use frame::{FlowStatus, Frame, FrameBuffer, FrameLayout, PciType};
pub use io::TransportIo;
pub use timer::{ticks_from_ms, Deadline, TimerKind, TpTimings};
