//! CAN-TP segmentation/reassembly state machine
//!
//! One combined RX/TX state machine, reflecting strict half duplex:
//!
//! ```text
//!                 ┌──────── inbound SF ───────► deliver ──┐
//!                 │                                       │
//!   Idle ─────────┼── inbound FF ──► TransmitFlowControl ─► WaitingTxConfirm(FC)
//!    ▲            │                                           │ confirm: arm N_Cr
//!    │            │                                           ▼
//!    │            │                    ReceiveConsecutive ◄───┘ (BS exhausted → FC again)
//!    │            │
//!    │            ├── send_pdu ≤ SF max ──► WaitingTxConfirm(SF) ── confirm ──► Idle
//!    │            │
//!    │            └── send_pdu > SF max ──► WaitingTxConfirm(FF) ── confirm: arm N_Bs
//!    │                                          │
//!    │                 ReceiveFlowControl ◄─────┘◄──── BS exhausted ─────┐
//!    │                  │ CTS                                            │
//!    │                  ▼                                                │
//!    │            TransmitConsecutive ── STmin ──► WaitingTxConfirm(CF) ─┘
//!    └───────────────────────────── all data confirmed ─────┘
//! ```
//!
//! Any timeout or sequencing violation aborts the exchange and returns to
//! Idle. Completions and aborts are queued as [`TpEvent`]s.

use std::collections::VecDeque;

use tracing::{debug, trace, warn};

use crate::config::{TpAddresses, TpConfig};
use crate::error::{ConfigError, IoError, ProtocolError, TpError};
use crate::frame::{self, FlowStatus, Frame, FrameBuffer, FrameLayout};
use crate::io::TransportIo;
use crate::timer::{Deadline, TimerKind, TpTimings};

const EVENT_QUEUE_DEPTH: usize = 8;

/// How a request reached us
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
    Physical,
    Functional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Receive,
    Transmit,
}

/// The frame whose transmit confirmation is outstanding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingFrame {
    Single,
    First,
    Consecutive,
    FlowControl,
    /// Overflow flow control; the reception is already abandoned
    Overflow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TpState {
    Idle,
    /// Flow control due, transport has not accepted it yet (N_Br)
    TransmitFlowControl,
    /// Waiting for the next consecutive frame (N_Cr)
    ReceiveConsecutive,
    /// First frame or block sent, waiting for flow control (N_Bs)
    ReceiveFlowControl,
    /// Waiting for STmin, then sending the next consecutive frame (N_Cs)
    TransmitConsecutive,
    /// A frame was handed to the transport (N_As/N_Ar)
    WaitingTxConfirm(PendingFrame),
}

impl TpState {
    fn direction(self) -> Option<Direction> {
        match self {
            Self::Idle => None,
            Self::TransmitFlowControl | Self::ReceiveConsecutive => Some(Direction::Receive),
            Self::ReceiveFlowControl | Self::TransmitConsecutive => Some(Direction::Transmit),
            Self::WaitingTxConfirm(PendingFrame::FlowControl | PendingFrame::Overflow) => {
                Some(Direction::Receive)
            }
            Self::WaitingTxConfirm(_) => Some(Direction::Transmit),
        }
    }
}

/// Completion and failure notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TpEvent {
    /// A complete inbound PDU
    Received {
        addressing: Addressing,
        id: u32,
        pdu: Vec<u8>,
    },
    /// The last frame of an outbound PDU was confirmed
    TransmitComplete { id: u32 },
    Aborted {
        direction: Direction,
        error: ProtocolError,
    },
}

#[derive(Debug)]
struct RxExchange {
    peer: u32,
    buffer: Vec<u8>,
    total_len: usize,
    next_sequence: u8,
    block_remaining: u8,
}

#[derive(Debug)]
struct TxExchange {
    peer: u32,
    data: Vec<u8>,
    offset: usize,
    next_sequence: u8,
    block_size: u8,
    block_remaining: u8,
    st_min_ticks: u32,
    wait_count: u8,
}

/// ISO 15765-2 transport engine
pub struct CanTp<T> {
    config: TpConfig,
    layout: FrameLayout,
    timings: TpTimings,
    addresses: TpAddresses,
    io: T,
    state: TpState,
    rx: RxExchange,
    tx: TxExchange,
    deadline: Deadline,
    st_min_remaining: u32,
    events: VecDeque<TpEvent>,
}

impl<T: TransportIo> CanTp<T> {
    pub fn new(config: TpConfig, addresses: TpAddresses, io: T) -> Result<Self, ConfigError> {
        config.validate()?;
        let capacity = config.buffer_capacity;
        Ok(Self {
            layout: config.layout(),
            timings: config.timings(),
            config,
            addresses,
            io,
            state: TpState::Idle,
            rx: RxExchange {
                peer: 0,
                buffer: Vec::with_capacity(capacity),
                total_len: 0,
                next_sequence: 0,
                block_remaining: 0,
            },
            tx: TxExchange {
                peer: 0,
                data: Vec::with_capacity(capacity),
                offset: 0,
                next_sequence: 0,
                block_size: 0,
                block_remaining: 0,
                st_min_ticks: 0,
                wait_count: 0,
            },
            deadline: Deadline::default(),
            st_min_remaining: 0,
            events: VecDeque::with_capacity(EVENT_QUEUE_DEPTH),
        })
    }

    pub fn state(&self) -> TpState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == TpState::Idle
    }

    pub fn config(&self) -> &TpConfig {
        &self.config
    }

    pub fn addresses(&self) -> &TpAddresses {
        &self.addresses
    }

    /// The running protocol timer and its remaining ticks
    pub fn deadline(&self) -> Deadline {
        self.deadline
    }

    pub fn io(&self) -> &T {
        &self.io
    }

    pub fn io_mut(&mut self) -> &mut T {
        &mut self.io
    }

    /// Next queued completion or abort
    pub fn poll_event(&mut self) -> Option<TpEvent> {
        self.events.pop_front()
    }

    /// Classify an inbound CAN frame and feed it to the state machine
    pub fn receive_frame(&mut self, id: u32, bytes: &[u8]) {
        let addressing = if id == self.addresses.rx_id {
            Addressing::Physical
        } else if Some(id) == self.addresses.functional_id {
            Addressing::Functional
        } else {
            return;
        };

        let frame = match frame::decode(bytes, &self.layout) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(can_id = format!("0x{:X}", id), error = %e, "Dropping malformed frame");
                return;
            }
        };

        match (frame, addressing) {
            (Frame::Single { payload }, _) => self.on_single(id, addressing, payload),
            (Frame::First { total_len, payload }, Addressing::Physical) => {
                self.on_first(id, total_len as usize, payload)
            }
            (Frame::Consecutive { sequence, payload }, Addressing::Physical) => {
                self.on_consecutive(id, sequence, payload)
            }
            (
                Frame::FlowControl {
                    status,
                    block_size,
                    st_min,
                },
                Addressing::Physical,
            ) => self.on_flow_control(status, block_size, st_min),
            (frame, Addressing::Functional) => {
                debug!(?frame, "Ignoring multi-frame PCI on functional address");
            }
        }
    }

    /// Enqueue an outbound PDU. Fails with `Busy` while any exchange is live.
    pub fn send_pdu(&mut self, id: u32, data: &[u8]) -> Result<(), TpError> {
        if self.state != TpState::Idle {
            return Err(TpError::Busy);
        }
        if data.is_empty() {
            return Err(TpError::EmptyPayload);
        }
        if data.len() > self.config.buffer_capacity {
            return Err(TpError::PayloadTooLarge {
                len: data.len(),
                max: self.config.buffer_capacity,
            });
        }

        self.tx.peer = id;
        self.tx.data.clear();
        self.tx.data.extend_from_slice(data);
        self.tx.wait_count = 0;

        if data.len() <= self.layout.single_frame_max() {
            let frame = frame::encode_single(&self.layout, data);
            self.io.send(id, frame.as_bytes())?;
            trace!(can_id = format!("0x{:X}", id), len = data.len(), "Single frame sent");
            self.enter_tx_confirm(PendingFrame::Single);
        } else {
            let chunk = self.layout.first_frame_payload(data.len());
            let frame = frame::encode_first(&self.layout, data.len(), &data[..chunk]);
            self.io.send(id, frame.as_bytes())?;
            debug!(
                can_id = format!("0x{:X}", id),
                len = data.len(),
                "First frame sent"
            );
            self.tx.offset = chunk;
            self.tx.next_sequence = 1;
            self.enter_tx_confirm(PendingFrame::First);
        }
        Ok(())
    }

    /// The transport confirmed the frame handed over last
    pub fn on_tx_confirm(&mut self) {
        let TpState::WaitingTxConfirm(pending) = self.state else {
            trace!(state = ?self.state, "Ignoring transmit confirmation");
            return;
        };
        self.deadline.disarm();

        match pending {
            PendingFrame::Single => self.complete_transmit(),
            PendingFrame::First => {
                self.arm(TimerKind::Bs);
                self.state = TpState::ReceiveFlowControl;
            }
            PendingFrame::Consecutive => {
                if self.tx.offset >= self.tx.data.len() {
                    self.complete_transmit();
                } else if self.tx.block_size != 0 && self.tx.block_remaining == 0 {
                    self.arm(TimerKind::Bs);
                    self.state = TpState::ReceiveFlowControl;
                } else {
                    self.st_min_remaining = self.tx.st_min_ticks;
                    self.state = TpState::TransmitConsecutive;
                }
            }
            PendingFrame::FlowControl => {
                self.arm(TimerKind::Cr);
                self.state = TpState::ReceiveConsecutive;
            }
            PendingFrame::Overflow => self.reset(),
        }
    }

    /// Advance all timers by one scheduler period
    pub fn tick(&mut self) {
        if let Some(kind) = self.deadline.tick() {
            self.on_timeout(kind);
            return;
        }

        match self.state {
            TpState::TransmitFlowControl => self.try_send_flow_control(),
            TpState::TransmitConsecutive => {
                if self.st_min_remaining > 0 {
                    self.st_min_remaining -= 1;
                    if self.st_min_remaining > 0 {
                        return;
                    }
                }
                if !self.deadline.is_armed() {
                    self.arm(TimerKind::Cs);
                }
                self.try_send_consecutive();
            }
            _ => {}
        }
    }

    fn on_single(&mut self, id: u32, addressing: Addressing, payload: &[u8]) {
        if !self.make_room_for_reception(id) {
            return;
        }
        if payload.len() > self.layout.single_frame_max() {
            debug!(len = payload.len(), "Single frame exceeds maximum length");
            return;
        }
        trace!(can_id = format!("0x{:X}", id), len = payload.len(), "Single frame received");
        self.push_event(TpEvent::Received {
            addressing,
            id,
            pdu: payload.to_vec(),
        });
    }

    fn on_first(&mut self, id: u32, total_len: usize, payload: &[u8]) {
        if !self.make_room_for_reception(id) {
            return;
        }
        if total_len <= self.layout.single_frame_max() {
            debug!(total_len, "First frame length fits a single frame, ignoring");
            return;
        }

        self.rx.peer = id;
        self.rx.buffer.clear();
        self.rx.total_len = total_len;
        self.rx.next_sequence = 1;
        self.rx.block_remaining = self.config.block_size;

        if total_len > self.config.buffer_capacity {
            warn!(
                total_len,
                capacity = self.config.buffer_capacity,
                "First frame exceeds reassembly capacity"
            );
            self.push_event(TpEvent::Aborted {
                direction: Direction::Receive,
                error: ProtocolError::BufferOverflow,
            });
            let fc = frame::encode_flow_control(&self.layout, FlowStatus::Overflow, 0, 0);
            match self.io.send(self.addresses.tx_id, fc.as_bytes()) {
                Ok(()) => {
                    self.state = TpState::WaitingTxConfirm(PendingFrame::Overflow);
                    self.arm(TimerKind::Ar);
                }
                Err(_) => self.reset(),
            }
            return;
        }

        let take = payload.len().min(total_len);
        self.rx.buffer.extend_from_slice(&payload[..take]);
        debug!(can_id = format!("0x{:X}", id), total_len, "First frame received");

        self.arm(TimerKind::Br);
        self.state = TpState::TransmitFlowControl;
        self.try_send_flow_control();
    }

    fn on_consecutive(&mut self, id: u32, sequence: u8, payload: &[u8]) {
        if self.state != TpState::ReceiveConsecutive || id != self.rx.peer {
            trace!(state = ?self.state, sequence, "Ignoring unexpected consecutive frame");
            return;
        }
        if sequence != self.rx.next_sequence {
            self.abort(
                Direction::Receive,
                ProtocolError::WrongSequenceNumber {
                    expected: self.rx.next_sequence,
                    got: sequence,
                },
            );
            return;
        }

        let remaining = self.rx.total_len - self.rx.buffer.len();
        let take = payload.len().min(remaining);
        self.rx.buffer.extend_from_slice(&payload[..take]);
        self.rx.next_sequence = (self.rx.next_sequence + 1) & 0x0F;

        if self.rx.buffer.len() >= self.rx.total_len {
            debug!(len = self.rx.total_len, "Reassembly complete");
            let pdu = self.rx.buffer.clone();
            let peer = self.rx.peer;
            self.reset();
            self.push_event(TpEvent::Received {
                addressing: Addressing::Physical,
                id: peer,
                pdu,
            });
            return;
        }

        if self.config.block_size != 0 {
            self.rx.block_remaining = self.rx.block_remaining.saturating_sub(1);
            if self.rx.block_remaining == 0 {
                self.rx.block_remaining = self.config.block_size;
                self.arm(TimerKind::Br);
                self.state = TpState::TransmitFlowControl;
                self.try_send_flow_control();
                return;
            }
        }
        self.arm(TimerKind::Cr);
    }

    fn on_flow_control(&mut self, status: u8, block_size: u8, st_min: u8) {
        if self.state != TpState::ReceiveFlowControl {
            trace!(state = ?self.state, "Ignoring unexpected flow control");
            return;
        }

        match FlowStatus::from_nibble(status) {
            Some(FlowStatus::ContinueToSend) => {
                self.tx.block_size = block_size;
                self.tx.block_remaining = block_size;
                self.tx.st_min_ticks = frame::st_min_ticks(st_min, self.config.tick_ms);
                self.tx.wait_count = 0;
                self.st_min_remaining = 0;
                self.deadline.disarm();
                self.state = TpState::TransmitConsecutive;
                trace!(block_size, st_min, "Flow control: continue to send");
            }
            Some(FlowStatus::Wait) => {
                self.tx.wait_count = self.tx.wait_count.saturating_add(1);
                if self.config.wft_max != 0 && self.tx.wait_count > self.config.wft_max {
                    self.abort(Direction::Transmit, ProtocolError::WaitLimitExceeded);
                    return;
                }
                trace!(wait_count = self.tx.wait_count, "Flow control: wait");
                self.arm(TimerKind::Bs);
            }
            Some(FlowStatus::Overflow) => {
                self.abort(Direction::Transmit, ProtocolError::BufferOverflow);
            }
            None => {
                self.abort(Direction::Transmit, ProtocolError::InvalidFlowStatus(status));
            }
        }
    }

    /// Abort a reception in progress so a new SF/FF from the same peer can
    /// start one. A single frame on another address (functional tester
    /// present) leaves the reassembly alone. Returns false when a
    /// transmission owns the half-duplex channel.
    fn make_room_for_reception(&mut self, id: u32) -> bool {
        match self.state.direction() {
            None => true,
            Some(Direction::Receive) if id != self.rx.peer => {
                trace!(can_id = format!("0x{:X}", id), "Frame from another address during reassembly");
                true
            }
            Some(Direction::Receive) => {
                self.abort(Direction::Receive, ProtocolError::UnexpectedPdu);
                true
            }
            Some(Direction::Transmit) => {
                debug!(state = ?self.state, "Ignoring new reception while transmitting");
                false
            }
        }
    }

    fn try_send_flow_control(&mut self) {
        let fc = frame::encode_flow_control(
            &self.layout,
            FlowStatus::ContinueToSend,
            self.config.block_size,
            self.config.st_min,
        );
        match self.io.send(self.addresses.tx_id, fc.as_bytes()) {
            Ok(()) => {
                trace!("Flow control sent");
                self.enter_tx_confirm(PendingFrame::FlowControl);
            }
            Err(e) => self.log_refused(&e),
        }
    }

    fn try_send_consecutive(&mut self) {
        let start = self.tx.offset;
        let end = (start + self.layout.consecutive_payload()).min(self.tx.data.len());
        let frame: FrameBuffer =
            frame::encode_consecutive(&self.layout, self.tx.next_sequence, &self.tx.data[start..end]);

        match self.io.send(self.tx.peer, frame.as_bytes()) {
            Ok(()) => {
                trace!(sequence = self.tx.next_sequence, offset = start, "Consecutive frame sent");
                self.tx.offset = end;
                self.tx.next_sequence = (self.tx.next_sequence + 1) & 0x0F;
                if self.tx.block_size != 0 {
                    self.tx.block_remaining = self.tx.block_remaining.saturating_sub(1);
                }
                self.enter_tx_confirm(PendingFrame::Consecutive);
            }
            Err(e) => self.log_refused(&e),
        }
    }

    fn log_refused(&self, error: &IoError) {
        match error {
            IoError::Busy => trace!(state = ?self.state, "Transport busy, retrying next tick"),
            IoError::Bus(msg) => warn!(state = ?self.state, error = %msg, "Transport refused frame"),
        }
    }

    fn enter_tx_confirm(&mut self, pending: PendingFrame) {
        let kind = match pending {
            PendingFrame::FlowControl | PendingFrame::Overflow => TimerKind::Ar,
            _ => TimerKind::As,
        };
        self.arm(kind);
        self.state = TpState::WaitingTxConfirm(pending);
    }

    fn on_timeout(&mut self, kind: TimerKind) {
        let (direction, error) = match kind {
            TimerKind::As => (Direction::Transmit, ProtocolError::TimeoutA),
            TimerKind::Ar => (Direction::Receive, ProtocolError::TimeoutA),
            TimerKind::Bs => (Direction::Transmit, ProtocolError::TimeoutBs),
            TimerKind::Cs => (Direction::Transmit, ProtocolError::TimeoutA),
            TimerKind::Br => (Direction::Receive, ProtocolError::TimeoutA),
            TimerKind::Cr => (Direction::Receive, ProtocolError::TimeoutCr),
        };

        if self.state == TpState::WaitingTxConfirm(PendingFrame::Overflow) {
            // The abort was already reported when the overflow was detected
            self.io.abort_send();
            self.reset();
            return;
        }
        // As/Ar only run while a confirmation is outstanding; abort() drops the frame
        self.abort(direction, error);
    }

    fn abort(&mut self, direction: Direction, error: ProtocolError) {
        warn!(?direction, state = ?self.state, %error, "CAN-TP exchange aborted");
        if let TpState::WaitingTxConfirm(_) = self.state {
            self.io.abort_send();
        }
        self.reset();
        self.push_event(TpEvent::Aborted { direction, error });
    }

    fn complete_transmit(&mut self) {
        let id = self.tx.peer;
        debug!(can_id = format!("0x{:X}", id), len = self.tx.data.len(), "Transmit complete");
        self.reset();
        self.push_event(TpEvent::TransmitComplete { id });
    }

    fn arm(&mut self, kind: TimerKind) {
        self.deadline.arm(kind, self.timings.ticks(kind));
    }

    fn reset(&mut self) {
        self.state = TpState::Idle;
        self.deadline.disarm();
        self.st_min_remaining = 0;
        self.rx.buffer.clear();
        self.rx.total_len = 0;
        self.tx.data.clear();
        self.tx.offset = 0;
    }

    fn push_event(&mut self, event: TpEvent) {
        if self.events.len() == EVENT_QUEUE_DEPTH {
            if let Some(dropped) = self.events.pop_front() {
                warn!(?dropped, "CAN-TP event queue full, dropping oldest event");
            }
        }
        self.events.push_back(event);
    }
}
