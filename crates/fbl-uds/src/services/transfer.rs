//! RequestDownload (0x34), TransferData (0x36), RequestTransferExit (0x37)

use super::read_u32;
use crate::dispatcher::Dispatcher;
use crate::error::ServiceError;
use crate::hal::{CrcService, FlashHal, SecurityProvider};
use crate::response::Reply;
use crate::ADDRESS_AND_LENGTH_FORMAT;

/// Only uncompressed, unencrypted data is accepted
const DATA_FORMAT_PLAIN: u8 = 0x00;

impl<F: FlashHal, C: CrcService, S: SecurityProvider> Dispatcher<F, C, S> {
    pub(crate) fn request_download(&mut self, request: &[u8]) -> Result<Reply, ServiceError> {
        // 34 dataFormat 44 addr(4) size(4)
        if request.len() != 11 {
            return Err(ServiceError::IncorrectMessageLength);
        }
        if request[1] != DATA_FORMAT_PLAIN || request[2] != ADDRESS_AND_LENGTH_FORMAT {
            return Err(ServiceError::RequestOutOfRange);
        }
        let address = read_u32(&request[3..7]);
        let size = read_u32(&request[7..11]);
        Ok(self.download.request_download(address, size)?.into())
    }

    pub(crate) fn transfer_data(&mut self, request: &[u8]) -> Result<Reply, ServiceError> {
        if request.len() < 3 {
            return Err(ServiceError::IncorrectMessageLength);
        }
        Ok(self.download.transfer_data(request[1], &request[2..])?.into())
    }

    pub(crate) fn request_transfer_exit(&mut self, request: &[u8]) -> Result<Reply, ServiceError> {
        if request.len() != 1 {
            return Err(ServiceError::IncorrectMessageLength);
        }
        Ok(self.download.transfer_exit()?.into())
    }
}
