//! Tick-driven countdown timers
//!
//! All protocol timers are configured in milliseconds and converted once to
//! ticks of the scheduler period. Nothing here reads a clock: the owner calls
//! [`Deadline::tick`] once per scheduler pass.

/// Convert a millisecond budget to scheduler ticks (integer division).
pub fn ticks_from_ms(ms: u32, tick_ms: u32) -> u32 {
    ms / tick_ms.max(1)
}

/// Which ISO 15765-2 timer is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Sender: frame handed to the transport, waiting for confirmation
    As,
    /// Receiver: flow control handed to the transport, waiting for confirmation
    Ar,
    /// Sender: waiting for flow control
    Bs,
    /// Receiver: flow control due
    Br,
    /// Sender: consecutive frame due
    Cs,
    /// Receiver: waiting for the next consecutive frame
    Cr,
}

/// Timer budgets already converted to ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TpTimings {
    pub n_as: u32,
    pub n_ar: u32,
    pub n_bs: u32,
    pub n_br: u32,
    pub n_cs: u32,
    pub n_cr: u32,
}

impl TpTimings {
    pub fn ticks(&self, kind: TimerKind) -> u32 {
        match kind {
            TimerKind::As => self.n_as,
            TimerKind::Ar => self.n_ar,
            TimerKind::Bs => self.n_bs,
            TimerKind::Br => self.n_br,
            TimerKind::Cs => self.n_cs,
            TimerKind::Cr => self.n_cr,
        }
    }
}

/// The single protocol deadline of a half-duplex exchange.
///
/// Only one N_xx timer is meaningful at a time, so arming a new one
/// replaces the previous.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    armed: Option<(TimerKind, u32)>,
}

impl Deadline {
    pub fn arm(&mut self, kind: TimerKind, ticks: u32) {
        self.armed = Some((kind, ticks));
    }

    pub fn disarm(&mut self) {
        self.armed = None;
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    pub fn kind(&self) -> Option<TimerKind> {
        self.armed.map(|(kind, _)| kind)
    }

    pub fn remaining(&self) -> Option<u32> {
        self.armed.map(|(_, remaining)| remaining)
    }

    /// Advance by one tick. Returns the timer that expired, if any.
    pub fn tick(&mut self) -> Option<TimerKind> {
        let (kind, remaining) = self.armed?;
        if remaining <= 1 {
            self.armed = None;
            Some(kind)
        } else {
            self.armed = Some((kind, remaining - 1));
            None
        }
    }
}
