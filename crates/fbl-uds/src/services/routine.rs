//! RoutineControl (0x31): erase memory, check memory, check programming
//! dependencies

use tracing::debug;

use super::{read_u16, read_u32};
use crate::dispatcher::Dispatcher;
use crate::error::ServiceError;
use crate::hal::{CrcService, FlashHal, SecurityProvider};
use crate::response::Reply;
use crate::{routine_id, routine_sub_function, ADDRESS_AND_LENGTH_FORMAT};

impl<F: FlashHal, C: CrcService, S: SecurityProvider> Dispatcher<F, C, S> {
    pub(crate) fn routine_control(&mut self, request: &[u8]) -> Result<Reply, ServiceError> {
        if request.len() < 4 {
            return Err(ServiceError::IncorrectMessageLength);
        }
        if request[1] != routine_sub_function::START_ROUTINE {
            return Err(ServiceError::SubFunctionNotSupported);
        }
        let routine = read_u16(&request[2..4]);
        let option = &request[4..];
        debug!(
            routine = format!("0x{:04X}", routine),
            option_len = option.len(),
            "Routine control"
        );

        let response = match routine {
            routine_id::ERASE_MEMORY => {
                let range = match option {
                    [] => None,
                    [format, rest @ ..] if *format == ADDRESS_AND_LENGTH_FORMAT => {
                        if rest.len() != 8 {
                            return Err(ServiceError::IncorrectMessageLength);
                        }
                        Some((read_u32(&rest[..4]), read_u32(&rest[4..])))
                    }
                    _ => return Err(ServiceError::RequestOutOfRange),
                };
                self.download.start_erase(range)?
            }
            routine_id::CHECK_MEMORY => {
                if option.len() != 4 {
                    return Err(ServiceError::IncorrectMessageLength);
                }
                self.download.start_checksum(read_u32(option))?
            }
            routine_id::CHECK_PROGRAMMING_DEPENDENCIES => {
                if !option.is_empty() {
                    return Err(ServiceError::IncorrectMessageLength);
                }
                self.download.check_dependencies()?
            }
            _ => return Err(ServiceError::RequestOutOfRange),
        };
        Ok(response.into())
    }
}
