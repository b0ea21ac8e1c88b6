//! Response PDUs and post-transmit actions

use crate::nrc::NegativeResponseCode;
use crate::service_id;

/// Create a positive response for a service
pub fn positive_response(service_id: u8, data: &[u8]) -> Vec<u8> {
    let mut response = Vec::with_capacity(1 + data.len());
    response.push(service_id + 0x40); // Positive response = service + 0x40
    response.extend_from_slice(data);
    response
}

/// Create a negative response
pub fn negative_response(service_id: u8, nrc: NegativeResponseCode) -> Vec<u8> {
    vec![service_id::NEGATIVE_RESPONSE, service_id, nrc.into()]
}

/// Outcome of one request, or of one background job step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Complete positive response PDU (service id + 0x40 first)
    Positive(Vec<u8>),
    Negative { sid: u8, nrc: NegativeResponseCode },
    /// Positive response suppressed by the sub-function bit
    Suppressed,
}

impl Response {
    pub fn positive(sid: u8, data: &[u8]) -> Self {
        Self::Positive(positive_response(sid, data))
    }

    pub fn negative(sid: u8, nrc: impl Into<NegativeResponseCode>) -> Self {
        Self::Negative {
            sid,
            nrc: nrc.into(),
        }
    }

    /// 0x7F sid 0x78
    pub fn pending(sid: u8) -> Self {
        Self::negative(sid, NegativeResponseCode::ResponsePending)
    }

    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            Self::Negative {
                nrc: NegativeResponseCode::ResponsePending,
                ..
            }
        )
    }

    /// Bytes to hand to the transport, if anything is to be sent
    pub fn to_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Self::Positive(pdu) => Some(pdu.clone()),
            Self::Negative { sid, nrc } => Some(negative_response(*sid, *nrc)),
            Self::Suppressed => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetKind {
    Hard,
    Soft,
}

/// What the reset collaborator is asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetRequest {
    pub kind: ResetKind,
    /// A download was committed in this session; the new image should boot
    pub download_successful: bool,
}

/// Work that must only happen once the response has left the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostAction {
    Reset(ResetRequest),
}

/// Dispatcher result: the response plus an optional post-transmit action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub response: Response,
    pub after_transmit: Option<PostAction>,
}

impl Reply {
    pub fn with_action(response: Response, action: PostAction) -> Self {
        Self {
            response,
            after_transmit: Some(action),
        }
    }
}

impl From<Response> for Reply {
    fn from(response: Response) -> Self {
        Self {
            response,
            after_transmit: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_positive_response_adds_offset() {
        assert_eq!(positive_response(0x10, &[0x02]), vec![0x50, 0x02]);
        assert_eq!(
            Response::positive(0x3E, &[0x00]).to_bytes(),
            Some(vec![0x7E, 0x00])
        );
    }

    #[test]
    fn test_negative_response_layout() {
        let response = Response::negative(0x36, ServiceError::RequestSequenceError);
        assert_eq!(response.to_bytes(), Some(vec![0x7F, 0x36, 0x24]));
        assert!(!response.is_pending());
        assert!(Response::pending(0x31).is_pending());
        assert_eq!(Response::pending(0x31).to_bytes(), Some(vec![0x7F, 0x31, 0x78]));
    }

    #[test]
    fn test_suppressed_sends_nothing() {
        assert_eq!(Response::Suppressed.to_bytes(), None);
    }
}
