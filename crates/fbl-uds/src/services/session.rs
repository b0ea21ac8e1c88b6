//! Session, reset and communication housekeeping services

use tracing::{debug, info};

use super::{positive_or_suppressed, sub_function};
use crate::context::{CommunicationState, Session};
use crate::dispatcher::Dispatcher;
use crate::error::ServiceError;
use crate::hal::{CrcService, FlashHal, SecurityProvider};
use crate::response::{PostAction, Reply, ResetKind, ResetRequest};
use crate::{reset_type, service_id};

/// CommunicationControl control types 0x00..=0x03
const MAX_CONTROL_TYPE: u8 = 0x03;

const DTC_SETTING_ON: u8 = 0x01;
const DTC_SETTING_OFF: u8 = 0x02;

impl<F: FlashHal, C: CrcService, S: SecurityProvider> Dispatcher<F, C, S> {
    pub(crate) fn session_control(&mut self, request: &[u8]) -> Result<Reply, ServiceError> {
        if request.len() != 2 {
            return Err(ServiceError::IncorrectMessageLength);
        }
        let (value, suppress) = sub_function(request[1]);
        let session = Session::from_sub_function(value).ok_or_else(|| {
            debug!(session = format!("0x{:02X}", value), "Unsupported session type");
            ServiceError::SubFunctionNotSupported
        })?;

        if self.context.set_session(session) {
            self.pending_seed = None;
        }
        if session == Session::Default {
            self.download.abandon();
        }

        // [session, P2 hi, P2 lo, P2* hi, P2* lo], P2* in 10 ms units
        let p2 = self.config.p2_ms.to_be_bytes();
        let p2_star = ((self.config.p2_star_ms / 10).min(u16::MAX as u32) as u16).to_be_bytes();
        Ok(positive_or_suppressed(
            service_id::DIAGNOSTIC_SESSION_CONTROL,
            &[value, p2[0], p2[1], p2_star[0], p2_star[1]],
            suppress,
        )
        .into())
    }

    pub(crate) fn ecu_reset(&mut self, request: &[u8]) -> Result<Reply, ServiceError> {
        if request.len() != 2 {
            return Err(ServiceError::IncorrectMessageLength);
        }
        let (value, suppress) = sub_function(request[1]);
        let kind = match value {
            reset_type::HARD_RESET => ResetKind::Hard,
            reset_type::SOFT_RESET => ResetKind::Soft,
            _ => return Err(ServiceError::SubFunctionNotSupported),
        };

        let download_successful = self.download.download_successful();
        info!(?kind, download_successful, "ECU reset requested");

        Ok(Reply::with_action(
            positive_or_suppressed(service_id::ECU_RESET, &[value], suppress),
            PostAction::Reset(ResetRequest {
                kind,
                download_successful,
            }),
        ))
    }

    pub(crate) fn tester_present(&mut self, request: &[u8]) -> Result<Reply, ServiceError> {
        if request.len() != 2 {
            return Err(ServiceError::IncorrectMessageLength);
        }
        let (value, suppress) = sub_function(request[1]);
        if value != 0x00 {
            return Err(ServiceError::SubFunctionNotSupported);
        }
        Ok(positive_or_suppressed(service_id::TESTER_PRESENT, &[value], suppress).into())
    }

    pub(crate) fn communication_control(&mut self, request: &[u8]) -> Result<Reply, ServiceError> {
        if request.len() != 3 {
            return Err(ServiceError::IncorrectMessageLength);
        }
        let (control_type, suppress) = sub_function(request[1]);
        if control_type > MAX_CONTROL_TYPE {
            return Err(ServiceError::SubFunctionNotSupported);
        }

        let state = CommunicationState {
            control_type,
            communication_type: request[2],
        };
        info!(
            control_type = format!("0x{:02X}", control_type),
            communication_type = format!("0x{:02X}", request[2]),
            "Communication control"
        );
        self.context.set_communication(state);

        Ok(positive_or_suppressed(service_id::COMMUNICATION_CONTROL, &[control_type], suppress).into())
    }

    pub(crate) fn control_dtc_setting(&mut self, request: &[u8]) -> Result<Reply, ServiceError> {
        if request.len() < 2 {
            return Err(ServiceError::IncorrectMessageLength);
        }
        let (setting, suppress) = sub_function(request[1]);
        let enabled = match setting {
            DTC_SETTING_ON => true,
            DTC_SETTING_OFF => false,
            _ => return Err(ServiceError::SubFunctionNotSupported),
        };
        info!(enabled, "DTC setting changed");
        self.context.set_dtc_setting(enabled);

        Ok(positive_or_suppressed(service_id::CONTROL_DTC_SETTING, &[setting], suppress).into())
    }
}
