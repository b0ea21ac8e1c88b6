//! Diagnostic context: session, security level, addressing and S3 timer

use bitflags::bitflags;
use tracing::{debug, info};

bitflags! {
    /// Sessions a service is allowed in
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SessionMask: u8 {
        const DEFAULT     = 0x01;
        const PROGRAMMING = 0x02;
        const EXTENDED    = 0x04;
    }
}

bitflags! {
    /// Addressing modes a service accepts
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AddressingMask: u8 {
        const PHYSICAL   = 0x01;
        const FUNCTIONAL = 0x02;
    }
}

bitflags! {
    /// Nested security levels: each level carries the bits of all lower ones,
    /// so a service requiring LEVEL1 is also open at LEVEL2.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SecurityMask: u8 {
        /// Present at every level; a service requiring only this is unrestricted
        const LOCKED = 0b001;
        const LEVEL1 = 0b010;
        const LEVEL2 = 0b100;
    }
}

/// Diagnostic session, valued as its DiagnosticSessionControl sub-function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Session {
    Default = 0x01,
    Programming = 0x02,
    Extended = 0x03,
}

impl Session {
    pub fn from_sub_function(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Default),
            0x02 => Some(Self::Programming),
            0x03 => Some(Self::Extended),
            _ => None,
        }
    }

    pub fn mask(self) -> SessionMask {
        match self {
            Self::Default => SessionMask::DEFAULT,
            Self::Programming => SessionMask::PROGRAMMING,
            Self::Extended => SessionMask::EXTENDED,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SecurityLevel {
    None,
    Level1,
    Level2,
}

impl SecurityLevel {
    pub fn mask(self) -> SecurityMask {
        match self {
            Self::None => SecurityMask::LOCKED,
            Self::Level1 => SecurityMask::LOCKED | SecurityMask::LEVEL1,
            Self::Level2 => SecurityMask::all(),
        }
    }
}

/// How the current request reached the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestAddressing {
    Physical,
    Functional,
}

impl RequestAddressing {
    pub fn mask(self) -> AddressingMask {
        match self {
            Self::Physical => AddressingMask::PHYSICAL,
            Self::Functional => AddressingMask::FUNCTIONAL,
        }
    }
}

/// CommunicationControl (0x28) state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommunicationState {
    pub control_type: u8,
    pub communication_type: u8,
}

impl Default for CommunicationState {
    fn default() -> Self {
        Self {
            control_type: 0x00, // enableRxAndTx
            communication_type: 0x01,
        }
    }
}

/// Process-wide diagnostic state owned by the dispatcher
#[derive(Debug, Clone)]
pub struct DiagnosticContext {
    session: Session,
    security: SecurityLevel,
    addressing: Option<RequestAddressing>,
    s3_ticks: u32,
    s3_remaining: u32,
    communication: CommunicationState,
    dtc_setting_enabled: bool,
}

impl DiagnosticContext {
    pub fn new(s3_ticks: u32) -> Self {
        Self {
            session: Session::Default,
            security: SecurityLevel::None,
            addressing: None,
            s3_ticks,
            s3_remaining: 0,
            communication: CommunicationState::default(),
            dtc_setting_enabled: true,
        }
    }

    pub fn session(&self) -> Session {
        self.session
    }

    pub fn security(&self) -> SecurityLevel {
        self.security
    }

    /// Addressing of the last request that passed the gates
    pub fn addressing(&self) -> Option<RequestAddressing> {
        self.addressing
    }

    pub fn set_addressing(&mut self, addressing: RequestAddressing) {
        self.addressing = Some(addressing);
    }

    /// Ticks left before S3 expires; zero when the timer is stopped
    pub fn s3_remaining(&self) -> u32 {
        self.s3_remaining
    }

    pub fn communication(&self) -> CommunicationState {
        self.communication
    }

    pub fn set_communication(&mut self, state: CommunicationState) {
        self.communication = state;
    }

    pub fn dtc_setting_enabled(&self) -> bool {
        self.dtc_setting_enabled
    }

    pub fn set_dtc_setting(&mut self, enabled: bool) {
        self.dtc_setting_enabled = enabled;
    }

    /// Switch session. Any change relocks security; non-default sessions
    /// (re)start S3. Returns whether the session changed.
    pub fn set_session(&mut self, session: Session) -> bool {
        let changed = session != self.session;
        if changed {
            info!(from = ?self.session, to = ?session, "Diagnostic session changed");
            if self.security != SecurityLevel::None {
                info!("Session change: security access reset to locked");
            }
            self.security = SecurityLevel::None;
        }
        self.session = session;

        if session == Session::Default {
            self.s3_remaining = 0;
            self.communication = CommunicationState::default();
            self.dtc_setting_enabled = true;
        } else {
            self.s3_remaining = self.s3_ticks;
        }
        changed
    }

    pub fn unlock(&mut self, level: SecurityLevel) {
        info!(?level, "Security access granted");
        self.security = level;
    }

    /// Restart S3 on tester activity. No effect in the default session.
    pub fn restart_s3(&mut self) {
        if self.session != Session::Default {
            self.s3_remaining = self.s3_ticks;
        }
    }

    /// Advance S3 by one tick. Returns true when it expired and the context
    /// fell back to the default session.
    pub fn tick(&mut self) -> bool {
        if self.s3_remaining == 0 {
            return false;
        }
        self.s3_remaining -= 1;
        if self.s3_remaining > 0 {
            return false;
        }
        info!(session = ?self.session, "S3 timeout, returning to default session");
        self.reset();
        true
    }

    /// Back to {Default, None}
    pub fn reset(&mut self) {
        debug!("Diagnostic context reset");
        self.session = Session::Default;
        self.security = SecurityLevel::None;
        self.addressing = None;
        self.s3_remaining = 0;
        self.communication = CommunicationState::default();
        self.dtc_setting_enabled = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_security_levels_are_nested() {
        assert!(SecurityLevel::None.mask().intersects(SecurityMask::LOCKED));
        assert!(!SecurityLevel::None.mask().intersects(SecurityMask::LEVEL1));
        assert!(SecurityLevel::Level1.mask().intersects(SecurityMask::LEVEL1));
        assert!(SecurityLevel::Level2.mask().intersects(SecurityMask::LEVEL1));
        assert!(!SecurityLevel::Level1.mask().intersects(SecurityMask::LEVEL2));
    }

    #[test]
    fn test_session_change_relocks_security() {
        let mut ctx = DiagnosticContext::new(100);
        ctx.set_session(Session::Extended);
        ctx.unlock(SecurityLevel::Level1);
        assert!(ctx.set_session(Session::Programming));
        assert_eq!(ctx.security(), SecurityLevel::None);

        ctx.unlock(SecurityLevel::Level1);
        assert!(!ctx.set_session(Session::Programming));
        assert_eq!(ctx.security(), SecurityLevel::Level1);
    }

    #[test]
    fn test_s3_expiry_resets_context() {
        let mut ctx = DiagnosticContext::new(3);
        ctx.set_session(Session::Programming);
        ctx.unlock(SecurityLevel::Level1);
        assert!(!ctx.tick());
        assert!(!ctx.tick());
        assert!(ctx.tick());
        assert_eq!(ctx.session(), Session::Default);
        assert_eq!(ctx.security(), SecurityLevel::None);
        assert_eq!(ctx.s3_remaining(), 0);
    }

    #[test]
    fn test_activity_restarts_s3() {
        let mut ctx = DiagnosticContext::new(3);
        ctx.set_session(Session::Extended);
        ctx.tick();
        ctx.tick();
        ctx.restart_s3();
        assert_eq!(ctx.s3_remaining(), 3);
        assert!(!ctx.tick());
    }

    #[test]
    fn test_s3_not_running_in_default_session() {
        let mut ctx = DiagnosticContext::new(3);
        ctx.restart_s3();
        for _ in 0..10 {
            assert!(!ctx.tick());
        }
        assert_eq!(ctx.session(), Session::Default);
    }
}
