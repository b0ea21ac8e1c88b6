//! ReadDataByIdentifier (0x22) and WriteDataByIdentifier (0x2E)

use tracing::{debug, error, info};

use super::read_u16;
use crate::dispatcher::Dispatcher;
use crate::error::ServiceError;
use crate::hal::{CrcService, FlashHal, SecurityProvider};
use crate::image::{ImageStatusRecord, COUNTER_INVALID, FINGERPRINT_LEN};
use crate::response::{Reply, Response};
use crate::{did, service_id};

/// Reported for a slot without a usable record
const NO_SLOT: u8 = 0xFF;

impl<F: FlashHal, C: CrcService, S: SecurityProvider> Dispatcher<F, C, S> {
    pub(crate) fn read_data_by_id(&mut self, request: &[u8]) -> Result<Reply, ServiceError> {
        if request.len() < 3 || (request.len() - 1) % 2 != 0 {
            return Err(ServiceError::IncorrectMessageLength);
        }

        let mut data = Vec::new();
        for chunk in request[1..].chunks_exact(2) {
            let identifier = read_u16(chunk);
            data.extend_from_slice(chunk);
            match identifier {
                did::FINGERPRINT => {
                    let fingerprint = self.download.fingerprint().unwrap_or([0; FINGERPRINT_LEN]);
                    data.extend_from_slice(&fingerprint);
                }
                did::ACTIVE_DIAGNOSTIC_SESSION => data.push(self.context.session() as u8),
                did::IMAGE_STATUS => data.extend_from_slice(&self.image_status()?),
                _ => {
                    debug!(did = format!("0x{:04X}", identifier), "Unknown DID");
                    return Err(ServiceError::RequestOutOfRange);
                }
            }
        }

        Ok(Response::positive(service_id::READ_DATA_BY_ID, &data).into())
    }

    pub(crate) fn write_data_by_id(&mut self, request: &[u8]) -> Result<Reply, ServiceError> {
        if request.len() < 3 {
            return Err(ServiceError::IncorrectMessageLength);
        }
        let identifier = read_u16(&request[1..3]);
        if identifier != did::FINGERPRINT {
            return Err(ServiceError::RequestOutOfRange);
        }

        let fingerprint: [u8; FINGERPRINT_LEN] = request[3..]
            .try_into()
            .map_err(|_| ServiceError::IncorrectMessageLength)?;
        info!(did = format!("0x{:04X}", identifier), "Write data by identifier");
        self.download.set_fingerprint(fingerprint);

        Ok(Response::positive(service_id::WRITE_DATA_BY_ID, &request[1..3]).into())
    }

    /// [boot slot, counter A, counter B]; 0xFF where nothing valid exists
    fn image_status(&mut self) -> Result<[u8; 3], ServiceError> {
        let records = self.download.records().map_err(|e| {
            error!(error = %e, "Failed to read image status records");
            ServiceError::GeneralProgrammingFailure
        })?;
        let counter = |record: Option<&ImageStatusRecord>| {
            record.map_or(COUNTER_INVALID, |r| r.app_counter)
        };
        let boot = records.bootable().newest().map_or(NO_SLOT, |slot| slot.index());
        Ok([boot, counter(records.a.as_ref()), counter(records.b.as_ref())])
    }
}
