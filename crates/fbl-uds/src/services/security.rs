//! SecurityAccess (0x27) seed/key exchange

use tracing::info;

use crate::context::SecurityLevel;
use crate::dispatcher::Dispatcher;
use crate::error::ServiceError;
use crate::hal::{CrcService, FlashHal, SecurityProvider};
use crate::response::{Reply, Response};
use crate::service_id;

const REQUEST_SEED: u8 = 0x01;
const SEND_KEY: u8 = 0x02;

impl<F: FlashHal, C: CrcService, S: SecurityProvider> Dispatcher<F, C, S> {
    pub(crate) fn security_access(&mut self, request: &[u8]) -> Result<Reply, ServiceError> {
        if request.len() < 2 {
            return Err(ServiceError::IncorrectMessageLength);
        }

        match request[1] {
            REQUEST_SEED => {
                if request.len() != 2 {
                    return Err(ServiceError::IncorrectMessageLength);
                }
                let mut seed = vec![0u8; self.config.seed_len];
                if self.context.security() >= SecurityLevel::Level1 {
                    // Already unlocked: a zero seed tells the tester no key is needed
                    info!("Security access: already unlocked");
                    self.pending_seed = None;
                } else {
                    self.security.random_bytes(&mut seed);
                    info!(seed = %hex::encode(&seed), "Security access: providing seed");
                    self.pending_seed = Some(seed.clone());
                }

                let mut data = Vec::with_capacity(1 + seed.len());
                data.push(REQUEST_SEED);
                data.extend_from_slice(&seed);
                Ok(Response::positive(service_id::SECURITY_ACCESS, &data).into())
            }
            SEND_KEY => {
                if request.len() < 3 {
                    return Err(ServiceError::IncorrectMessageLength);
                }
                // One attempt per seed
                let seed = self
                    .pending_seed
                    .take()
                    .ok_or(ServiceError::RequestSequenceError)?;
                let key = &request[2..];

                if !self.security.decrypt_and_compare(key, &seed) {
                    info!(received = %hex::encode(key), "Security access: invalid key");
                    return Err(ServiceError::InvalidKey);
                }
                self.context.unlock(SecurityLevel::Level1);
                Ok(Response::positive(service_id::SECURITY_ACCESS, &[SEND_KEY]).into())
            }
            _ => Err(ServiceError::SubFunctionNotSupported),
        }
    }
}
