//! UDS request dispatcher
//!
//! Looks each request up in a static service table, gates it by addressing,
//! session and security level, and hands it to the matching handler in
//! `services`. Every gate failure answers serviceNotSupported.

use tracing::{debug, warn};

use crate::config::{DiagConfig, UdsConfig};
use crate::context::{AddressingMask, DiagnosticContext, RequestAddressing, SecurityMask, SessionMask};
use crate::download::DownloadOrchestrator;
use crate::error::{ConfigError, ServiceError};
use crate::hal::{CrcService, FlashHal, SecurityProvider};
use crate::nrc::NegativeResponseCode;
use crate::response::{Reply, Response};
use crate::service_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Service {
    SessionControl,
    EcuReset,
    ReadDataById,
    SecurityAccess,
    CommunicationControl,
    WriteDataById,
    RoutineControl,
    RequestDownload,
    TransferData,
    RequestTransferExit,
    TesterPresent,
    ControlDtcSetting,
}

/// One row of the service table
#[derive(Debug, Clone, Copy)]
pub(crate) struct ServiceEntry {
    pub sid: u8,
    pub sessions: SessionMask,
    pub addressing: AddressingMask,
    /// Security bits of which the current level must hold at least one
    pub security: SecurityMask,
    pub service: Service,
}

const ALL_SESSIONS: SessionMask = SessionMask::all();
const NON_DEFAULT: SessionMask = SessionMask::PROGRAMMING.union(SessionMask::EXTENDED);
const PROGRAMMING: SessionMask = SessionMask::PROGRAMMING;
const PHYS: AddressingMask = AddressingMask::PHYSICAL;
const PHYS_FUNC: AddressingMask = AddressingMask::all();
const ANY_LEVEL: SecurityMask = SecurityMask::all();
const UNLOCKED: SecurityMask = SecurityMask::LEVEL1.union(SecurityMask::LEVEL2);

const fn entry(
    sid: u8,
    sessions: SessionMask,
    addressing: AddressingMask,
    security: SecurityMask,
    service: Service,
) -> ServiceEntry {
    ServiceEntry {
        sid,
        sessions,
        addressing,
        security,
        service,
    }
}

pub(crate) static SERVICE_TABLE: &[ServiceEntry] = &[
    entry(service_id::DIAGNOSTIC_SESSION_CONTROL, ALL_SESSIONS, PHYS_FUNC, ANY_LEVEL, Service::SessionControl),
    entry(service_id::ECU_RESET, ALL_SESSIONS, PHYS_FUNC, ANY_LEVEL, Service::EcuReset),
    entry(service_id::READ_DATA_BY_ID, ALL_SESSIONS, PHYS_FUNC, ANY_LEVEL, Service::ReadDataById),
    entry(service_id::SECURITY_ACCESS, NON_DEFAULT, PHYS, ANY_LEVEL, Service::SecurityAccess),
    entry(service_id::COMMUNICATION_CONTROL, NON_DEFAULT, PHYS_FUNC, ANY_LEVEL, Service::CommunicationControl),
    entry(service_id::WRITE_DATA_BY_ID, PROGRAMMING, PHYS, UNLOCKED, Service::WriteDataById),
    entry(service_id::ROUTINE_CONTROL, PROGRAMMING, PHYS, UNLOCKED, Service::RoutineControl),
    entry(service_id::REQUEST_DOWNLOAD, PROGRAMMING, PHYS, UNLOCKED, Service::RequestDownload),
    entry(service_id::TRANSFER_DATA, PROGRAMMING, PHYS, UNLOCKED, Service::TransferData),
    entry(service_id::REQUEST_TRANSFER_EXIT, PROGRAMMING, PHYS, UNLOCKED, Service::RequestTransferExit),
    entry(service_id::TESTER_PRESENT, ALL_SESSIONS, PHYS_FUNC, ANY_LEVEL, Service::TesterPresent),
    entry(service_id::CONTROL_DTC_SETTING, NON_DEFAULT, PHYS_FUNC, ANY_LEVEL, Service::ControlDtcSetting),
];

pub(crate) fn lookup(sid: u8) -> Option<&'static ServiceEntry> {
    SERVICE_TABLE.iter().find(|entry| entry.sid == sid)
}

pub struct Dispatcher<F, C, S> {
    pub(crate) config: DiagConfig,
    pub(crate) context: DiagnosticContext,
    pub(crate) security: S,
    /// Seed issued by the last seed request, consumed by the next key
    pub(crate) pending_seed: Option<Vec<u8>>,
    pub(crate) download: DownloadOrchestrator<F, C>,
}

impl<F: FlashHal, C: CrcService, S: SecurityProvider> Dispatcher<F, C, S> {
    pub fn new(config: UdsConfig, flash: F, crc: C, security: S) -> Result<Self, ConfigError> {
        config.validate()?;
        let UdsConfig { diag, flash: layout } = config;
        let download =
            DownloadOrchestrator::new(layout, diag.s3_ms, diag.max_block_length, flash, crc);
        Ok(Self {
            context: DiagnosticContext::new(diag.s3_ticks()),
            config: diag,
            security,
            pending_seed: None,
            download,
        })
    }

    pub fn context(&self) -> &DiagnosticContext {
        &self.context
    }

    pub fn download(&self) -> &DownloadOrchestrator<F, C> {
        &self.download
    }

    pub fn download_mut(&mut self) -> &mut DownloadOrchestrator<F, C> {
        &mut self.download
    }

    /// Handle one complete request PDU
    pub fn handle_request(&mut self, addressing: RequestAddressing, request: &[u8]) -> Reply {
        let Some(&sid) = request.first() else {
            return self.reject(0x00, ServiceError::IncorrectMessageLength).into();
        };

        self.context.restart_s3();

        let Some(entry) = lookup(sid) else {
            debug!(service_id = format!("0x{:02X}", sid), "Unsupported service");
            return self.reject(sid, ServiceError::ServiceNotSupported).into();
        };

        if let Err(gate) = self.check_gates(entry, addressing) {
            debug!(
                service_id = format!("0x{:02X}", sid),
                gate,
                session = ?self.context.session(),
                security = ?self.context.security(),
                ?addressing,
                "Request rejected by service table"
            );
            return self.reject(sid, ServiceError::ServiceNotSupported).into();
        }

        self.context.set_addressing(addressing);

        match self.dispatch(entry.service, request) {
            Ok(reply) => {
                log_negative(&reply.response);
                reply
            }
            Err(e) => self.reject(sid, e).into(),
        }
    }

    /// Advance the S3 timer by one tick. On expiry the context is back in
    /// the default session and any download in progress is dropped.
    pub fn tick(&mut self) -> bool {
        if !self.context.tick() {
            return false;
        }
        self.pending_seed = None;
        self.download.abandon();
        true
    }

    /// Step the background flash job. A response produced here counts as
    /// server activity and restarts S3.
    pub fn poll(&mut self) -> Option<Response> {
        let response = self.download.poll()?;
        self.context.restart_s3();
        log_negative(&response);
        Some(response)
    }

    fn check_gates(
        &self,
        entry: &ServiceEntry,
        addressing: RequestAddressing,
    ) -> Result<(), &'static str> {
        if !entry.addressing.contains(addressing.mask()) {
            return Err("addressing");
        }
        if !entry.sessions.contains(self.context.session().mask()) {
            return Err("session");
        }
        if !entry.security.intersects(self.context.security().mask()) {
            return Err("security");
        }
        Ok(())
    }

    fn dispatch(&mut self, service: Service, request: &[u8]) -> Result<Reply, ServiceError> {
        match service {
            Service::SessionControl => self.session_control(request),
            Service::EcuReset => self.ecu_reset(request),
            Service::ReadDataById => self.read_data_by_id(request),
            Service::SecurityAccess => self.security_access(request),
            Service::CommunicationControl => self.communication_control(request),
            Service::WriteDataById => self.write_data_by_id(request),
            Service::RoutineControl => self.routine_control(request),
            Service::RequestDownload => self.request_download(request),
            Service::TransferData => self.transfer_data(request),
            Service::RequestTransferExit => self.request_transfer_exit(request),
            Service::TesterPresent => self.tester_present(request),
            Service::ControlDtcSetting => self.control_dtc_setting(request),
        }
    }

    fn reject(&self, sid: u8, error: ServiceError) -> Response {
        warn!(service_id = format!("0x{:02X}", sid), error = %error, "Request rejected");
        Response::negative(sid, error)
    }
}

fn log_negative(response: &Response) {
    if let Response::Negative { sid, nrc } = response {
        if *nrc != NegativeResponseCode::ResponsePending {
            warn!(service_id = format!("0x{:02X}", sid), nrc = %nrc, "Negative response");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{SecurityLevel, Session};
    use crate::hal::MockSecurityProvider;
    use crate::response::{PostAction, ResetKind, ResetRequest};
    use crate::testing::{MemFlash, TestCrc, CRC32};
    use pretty_assertions::assert_eq;

    const SEED: [u8; 4] = [0x11, 0x22, 0x33, 0x44];

    type TestDispatcher = Dispatcher<MemFlash, TestCrc, MockSecurityProvider>;

    /// Fixed seed; the valid key is the seed with every bit inverted
    fn security() -> MockSecurityProvider {
        let mut security = MockSecurityProvider::new();
        security
            .expect_random_bytes()
            .returning(|buf| buf.copy_from_slice(&SEED[..buf.len()]));
        security
            .expect_decrypt_and_compare()
            .returning(|key, seed| {
                key.len() == seed.len() && key.iter().zip(seed).all(|(k, s)| *k == !*s)
            });
        security
    }

    fn dispatcher() -> TestDispatcher {
        Dispatcher::new(
            UdsConfig::default(),
            MemFlash::new(0x4_0000),
            TestCrc::default(),
            security(),
        )
        .unwrap()
    }

    fn request(d: &mut TestDispatcher, pdu: &[u8]) -> Option<Vec<u8>> {
        d.handle_request(RequestAddressing::Physical, pdu)
            .response
            .to_bytes()
    }

    fn functional(d: &mut TestDispatcher, pdu: &[u8]) -> Option<Vec<u8>> {
        d.handle_request(RequestAddressing::Functional, pdu)
            .response
            .to_bytes()
    }

    /// Poll the background job to completion, returning the last response
    fn finish_job(d: &mut TestDispatcher) -> Vec<u8> {
        let mut last = None;
        while d.download().is_busy() {
            if let Some(response) = d.poll() {
                last = response.to_bytes();
            }
        }
        last.expect("job produced no response")
    }

    fn unlock(d: &mut TestDispatcher) {
        assert_eq!(
            request(d, &[0x10, 0x02]),
            Some(vec![0x50, 0x02, 0x00, 0x19, 0x01, 0xF4])
        );
        assert_eq!(
            request(d, &[0x27, 0x01]),
            Some(vec![0x67, 0x01, 0x11, 0x22, 0x33, 0x44])
        );
        assert_eq!(
            request(d, &[0x27, 0x02, 0xEE, 0xDD, 0xCC, 0xBB]),
            Some(vec![0x67, 0x02])
        );
        assert_eq!(d.context().security(), SecurityLevel::Level1);
    }

    fn nrc(sid: u8, code: u8) -> Option<Vec<u8>> {
        Some(vec![0x7F, sid, code])
    }

    #[test]
    fn test_empty_and_unknown_requests() {
        let mut d = dispatcher();
        assert_eq!(request(&mut d, &[]), nrc(0x00, 0x13));
        assert_eq!(request(&mut d, &[0x19, 0x02]), nrc(0x19, 0x11));
    }

    #[test]
    fn test_gates_answer_service_not_supported() {
        let mut d = dispatcher();
        // Session gate
        assert_eq!(request(&mut d, &[0x27, 0x01]), nrc(0x27, 0x11));
        assert_eq!(request(&mut d, &[0x28, 0x00, 0x01]), nrc(0x28, 0x11));

        request(&mut d, &[0x10, 0x02]);
        // Addressing gate
        assert_eq!(functional(&mut d, &[0x27, 0x01]), nrc(0x27, 0x11));
        // Security gate
        assert_eq!(request(&mut d, &[0x31, 0x01, 0xFF, 0x00]), nrc(0x31, 0x11));
        assert_eq!(
            request(&mut d, &[0x34, 0x00, 0x44, 0x08, 0, 0, 0, 0, 0, 0, 0x10]),
            nrc(0x34, 0x11)
        );

        request(&mut d, &[0x10, 0x03]);
        unlock(&mut d);
        request(&mut d, &[0x10, 0x03]);
        // Extended session, security relocked by the session change
        assert_eq!(d.context().security(), SecurityLevel::None);
        assert_eq!(request(&mut d, &[0x31, 0x01, 0xFF, 0x00]), nrc(0x31, 0x11));
    }

    #[test]
    fn test_session_control() {
        let mut d = dispatcher();
        assert_eq!(
            request(&mut d, &[0x10, 0x03]),
            Some(vec![0x50, 0x03, 0x00, 0x19, 0x01, 0xF4])
        );
        assert_eq!(d.context().session(), Session::Extended);

        assert_eq!(request(&mut d, &[0x10, 0x81]), None);
        assert_eq!(d.context().session(), Session::Default);

        assert_eq!(request(&mut d, &[0x10, 0x04]), nrc(0x10, 0x12));
        assert_eq!(request(&mut d, &[0x10]), nrc(0x10, 0x13));
    }

    #[test]
    fn test_security_access_flow() {
        let mut d = dispatcher();
        request(&mut d, &[0x10, 0x02]);

        // Key without a seed
        assert_eq!(request(&mut d, &[0x27, 0x02, 0x00]), nrc(0x27, 0x24));

        request(&mut d, &[0x27, 0x01]);
        assert_eq!(
            request(&mut d, &[0x27, 0x02, 0x00, 0x00, 0x00, 0x00]),
            nrc(0x27, 0x35)
        );
        // The seed is spent after one attempt
        assert_eq!(
            request(&mut d, &[0x27, 0x02, 0xEE, 0xDD, 0xCC, 0xBB]),
            nrc(0x27, 0x24)
        );
        assert_eq!(d.context().security(), SecurityLevel::None);

        unlock(&mut d);
        assert_eq!(
            request(&mut d, &[0x27, 0x01]),
            Some(vec![0x67, 0x01, 0x00, 0x00, 0x00, 0x00])
        );
        assert_eq!(request(&mut d, &[0x27, 0x05]), nrc(0x27, 0x12));
    }

    #[test]
    fn test_tester_present_and_housekeeping() {
        let mut d = dispatcher();
        assert_eq!(request(&mut d, &[0x3E, 0x00]), Some(vec![0x7E, 0x00]));
        assert_eq!(functional(&mut d, &[0x3E, 0x80]), None);
        assert_eq!(request(&mut d, &[0x3E, 0x01]), nrc(0x3E, 0x12));

        request(&mut d, &[0x10, 0x03]);
        assert_eq!(request(&mut d, &[0x28, 0x03, 0x01]), Some(vec![0x68, 0x03]));
        assert_eq!(d.context().communication().control_type, 0x03);
        assert_eq!(functional(&mut d, &[0x28, 0x80, 0x01]), None);
        assert_eq!(request(&mut d, &[0x28, 0x04, 0x01]), nrc(0x28, 0x12));

        assert_eq!(request(&mut d, &[0x85, 0x02]), Some(vec![0xC5, 0x02]));
        assert!(!d.context().dtc_setting_enabled());
        assert_eq!(request(&mut d, &[0x85, 0x81]), None);
        assert!(d.context().dtc_setting_enabled());
    }

    #[test]
    fn test_read_data_by_identifier() {
        let mut d = dispatcher();
        assert_eq!(
            request(&mut d, &[0x22, 0xF1, 0x86, 0xF1, 0xA0]),
            Some(vec![0x62, 0xF1, 0x86, 0x01, 0xF1, 0xA0, 0xFF, 0xFF, 0xFF])
        );
        assert_eq!(request(&mut d, &[0x22, 0x12, 0x34]), nrc(0x22, 0x31));
        assert_eq!(request(&mut d, &[0x22, 0xF1]), nrc(0x22, 0x13));
    }

    #[test]
    fn test_full_download_through_dispatcher() {
        let mut d = dispatcher();
        unlock(&mut d);

        let mut write = vec![0x2E, 0xF1, 0x5A];
        write.extend_from_slice(b"BENCH-001");
        assert_eq!(request(&mut d, &write), Some(vec![0x6E, 0xF1, 0x5A]));

        assert_eq!(request(&mut d, &[0x31, 0x01, 0xFF, 0x00]), nrc(0x31, 0x78));
        assert_eq!(finish_job(&mut d), vec![0x71, 0x01, 0xFF, 0x00, 0x00]);

        let image: Vec<u8> = (0..256u32).map(|i| (i * 7) as u8).collect();
        assert_eq!(
            request(&mut d, &[0x34, 0x00, 0x44, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00]),
            Some(vec![0x74, 0x20, 0x0F, 0xFF])
        );
        for (counter, block) in image.chunks(128).enumerate() {
            let counter = counter as u8 + 1;
            let mut pdu = vec![0x36, counter];
            pdu.extend_from_slice(block);
            assert_eq!(request(&mut d, &pdu), nrc(0x36, 0x78));
            assert_eq!(finish_job(&mut d), vec![0x76, counter]);
        }
        assert_eq!(request(&mut d, &[0x37]), Some(vec![0x77]));

        let mut check = vec![0x31, 0x01, 0x02, 0x02];
        check.extend_from_slice(&CRC32.checksum(&image).to_be_bytes());
        assert_eq!(request(&mut d, &check), nrc(0x31, 0x78));
        assert_eq!(finish_job(&mut d), vec![0x71, 0x01, 0x02, 0x02, 0x00]);

        assert_eq!(
            request(&mut d, &[0x31, 0x01, 0xFF, 0x01]),
            Some(vec![0x71, 0x01, 0xFF, 0x01, 0x00])
        );
        assert_eq!(
            request(&mut d, &[0x22, 0xF1, 0xA0]),
            Some(vec![0x62, 0xF1, 0xA0, 0x00, 0x00, 0xFF])
        );

        let reply = d.handle_request(RequestAddressing::Physical, &[0x11, 0x01]);
        assert_eq!(reply.response.to_bytes(), Some(vec![0x51, 0x01]));
        assert_eq!(
            reply.after_transmit,
            Some(PostAction::Reset(ResetRequest {
                kind: ResetKind::Hard,
                download_successful: true,
            }))
        );
    }

    #[test]
    fn test_wrong_block_counter() {
        let mut d = dispatcher();
        unlock(&mut d);
        request(&mut d, &[0x31, 0x01, 0xFF, 0x00, 0x44, 0x08, 0, 0, 0, 0, 0, 0x10, 0]);
        finish_job(&mut d);
        request(&mut d, &[0x34, 0x00, 0x44, 0x08, 0, 0, 0, 0, 0, 0x01, 0]);

        assert_eq!(request(&mut d, &[0x36, 0x02, 0xAA]), nrc(0x36, 0x24));
        assert_eq!(request(&mut d, &[0x36, 0x01, 0xAA]), nrc(0x36, 0x24));
    }

    #[test]
    fn test_request_while_job_busy() {
        let mut d = dispatcher();
        unlock(&mut d);
        request(&mut d, &[0x31, 0x01, 0xFF, 0x00]);
        assert_eq!(
            request(&mut d, &[0x34, 0x00, 0x44, 0x08, 0, 0, 0, 0, 0, 0, 0x10]),
            nrc(0x34, 0x22)
        );
        assert_eq!(request(&mut d, &[0x31, 0x01, 0xFF, 0x00]), nrc(0x31, 0x22));
    }

    #[test]
    fn test_routine_control_validation() {
        let mut d = dispatcher();
        unlock(&mut d);
        assert_eq!(request(&mut d, &[0x31, 0x01, 0xFF]), nrc(0x31, 0x13));
        assert_eq!(request(&mut d, &[0x31, 0x02, 0xFF, 0x00]), nrc(0x31, 0x12));
        assert_eq!(request(&mut d, &[0x31, 0x01, 0x12, 0x34]), nrc(0x31, 0x31));
        assert_eq!(request(&mut d, &[0x31, 0x01, 0x02, 0x02, 0x00]), nrc(0x31, 0x13));
        // Dependencies before any download
        assert_eq!(request(&mut d, &[0x31, 0x01, 0xFF, 0x01]), nrc(0x31, 0x12));
    }

    #[test]
    fn test_s3_expiry_abandons_download() {
        let mut d = dispatcher();
        unlock(&mut d);
        request(&mut d, &[0x31, 0x01, 0xFF, 0x00]);
        finish_job(&mut d);
        assert!(d.download().target().is_some());

        let s3_ticks = d.config.s3_ticks();
        for _ in 1..s3_ticks {
            assert!(!d.tick());
        }
        // Tester present keeps the session alive
        request(&mut d, &[0x3E, 0x80]);
        for _ in 1..s3_ticks {
            assert!(!d.tick());
        }
        assert!(d.tick());

        assert_eq!(d.context().session(), Session::Default);
        assert_eq!(d.context().security(), SecurityLevel::None);
        assert_eq!(d.download().target(), None);
    }

    #[test]
    fn test_default_session_abandons_download() {
        let mut d = dispatcher();
        unlock(&mut d);
        request(&mut d, &[0x31, 0x01, 0xFF, 0x00]);
        finish_job(&mut d);
        request(&mut d, &[0x10, 0x01]);
        assert_eq!(d.download().target(), None);
        assert!(!d.tick());
    }
}
