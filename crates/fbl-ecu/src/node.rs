//! Cooperative scheduler node
//!
//! One [`BootloaderNode::pass`] per tick: transmit confirmations and
//! received frames go into the CAN-TP engine, timers advance, completed
//! requests are dispatched, the background flash job takes one step and
//! queued responses go out whenever the half-duplex engine is free.

use std::collections::VecDeque;

use fbl_cantp::{Addressing, CanTp, Direction, IoError, TpError, TpEvent};
use fbl_uds::{Dispatcher, PostAction, Reply, RequestAddressing, ResetControl, ResetRequest};
use tracing::{debug, error, info, warn};

use crate::can::FrameIo;
use crate::config::EcuConfig;
use crate::crc::Crc32Engine;
use crate::error::NodeResult;
use crate::flash::SimulatedFlash;
use crate::security::XorSecurity;

const OUTBOX_DEPTH: usize = 8;

pub type EcuDispatcher = Dispatcher<SimulatedFlash, Crc32Engine, XorSecurity>;

/// Records the reset request so the owner of the node can act on it after
/// the pass returns
#[derive(Debug, Default)]
pub struct ResetLatch {
    requested: Option<ResetRequest>,
}

impl ResetLatch {
    pub fn take(&mut self) -> Option<ResetRequest> {
        self.requested.take()
    }

    pub fn is_requested(&self) -> bool {
        self.requested.is_some()
    }
}

impl ResetControl for ResetLatch {
    fn reset(&mut self, request: ResetRequest) {
        info!(kind = ?request.kind, download_successful = request.download_successful, "Reset latched");
        self.requested = Some(request);
    }
}

struct Outgoing {
    pdu: Vec<u8>,
    action: Option<PostAction>,
}

pub struct BootloaderNode<T, R> {
    tp: CanTp<T>,
    dispatcher: EcuDispatcher,
    flash: SimulatedFlash,
    reset: R,
    outbox: VecDeque<Outgoing>,
    /// Action owed once the response in flight is confirmed
    in_flight: Option<PostAction>,
}

impl<T: FrameIo, R: ResetControl> BootloaderNode<T, R> {
    pub fn new(config: &EcuConfig, flash: SimulatedFlash, io: T, reset: R) -> NodeResult<Self> {
        let tp = CanTp::new(config.tp.clone(), config.addresses()?, io)?;
        let security = XorSecurity::new(config.security.secret_bytes()?);
        let dispatcher = Dispatcher::new(
            config.uds(),
            flash.clone(),
            Crc32Engine::default(),
            security,
        )?;

        info!(
            rx_id = format!("0x{:X}", tp.addresses().rx_id),
            tx_id = format!("0x{:X}", tp.addresses().tx_id),
            "Bootloader node ready"
        );

        Ok(Self {
            tp,
            dispatcher,
            flash,
            reset,
            outbox: VecDeque::with_capacity(OUTBOX_DEPTH),
            in_flight: None,
        })
    }

    pub fn io(&self) -> &T {
        self.tp.io()
    }

    pub fn io_mut(&mut self) -> &mut T {
        self.tp.io_mut()
    }

    pub fn transport(&self) -> &CanTp<T> {
        &self.tp
    }

    pub fn dispatcher(&self) -> &EcuDispatcher {
        &self.dispatcher
    }

    pub fn flash(&self) -> &SimulatedFlash {
        &self.flash
    }

    pub fn reset_control(&self) -> &R {
        &self.reset
    }

    pub fn reset_control_mut(&mut self) -> &mut R {
        &mut self.reset
    }

    /// Run one scheduler pass
    pub fn pass(&mut self) -> NodeResult<()> {
        if self.tp.io_mut().take_tx_confirm() {
            self.tp.on_tx_confirm();
        }
        self.receive_frames();

        self.tp.tick();
        self.dispatcher.tick();
        self.handle_events();

        if let Some(response) = self.dispatcher.poll() {
            self.enqueue(response.into());
        }
        self.transmit();

        if !self.dispatcher.download().is_busy() {
            self.flash.sync()?;
        }
        Ok(())
    }

    fn receive_frames(&mut self) {
        loop {
            match self.tp.io_mut().recv_frame() {
                Ok(Some((id, frame))) => self.tp.receive_frame(id, &frame),
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "CAN receive failed");
                    break;
                }
            }
        }
    }

    fn handle_events(&mut self) {
        while let Some(event) = self.tp.poll_event() {
            match event {
                TpEvent::Received {
                    addressing, pdu, ..
                } => {
                    let addressing = match addressing {
                        Addressing::Physical => RequestAddressing::Physical,
                        Addressing::Functional => RequestAddressing::Functional,
                    };
                    debug!(request = %hex::encode(&pdu), ?addressing, "Received UDS request");
                    let reply = self.dispatcher.handle_request(addressing, &pdu);
                    self.enqueue(reply);
                }
                TpEvent::TransmitComplete { .. } => {
                    if let Some(action) = self.in_flight.take() {
                        self.perform(action);
                    }
                }
                TpEvent::Aborted { direction, error } => {
                    warn!(?direction, error = %error, "CAN-TP exchange aborted");
                    if direction == Direction::Transmit {
                        if let Some(action) = self.in_flight.take() {
                            warn!(?action, "Response not delivered, dropping post-transmit action");
                        }
                    }
                }
            }
        }
    }

    fn enqueue(&mut self, reply: Reply) {
        let Reply {
            response,
            after_transmit,
        } = reply;

        let Some(pdu) = response.to_bytes() else {
            // Suppressed: nothing to wait for
            if let Some(action) = after_transmit {
                self.perform(action);
            }
            return;
        };

        if self.outbox.len() >= OUTBOX_DEPTH {
            if let Some(dropped) = self.outbox.pop_front() {
                warn!(response = %hex::encode(&dropped.pdu), "Outbox full, dropping oldest response");
            }
        }
        self.outbox.push_back(Outgoing {
            pdu,
            action: after_transmit,
        });
    }

    fn transmit(&mut self) {
        if !self.tp.is_idle() {
            return;
        }
        let Some(next) = self.outbox.front() else {
            return;
        };

        let tx_id = self.tp.addresses().tx_id;
        match self.tp.send_pdu(tx_id, &next.pdu) {
            Ok(()) => {
                if let Some(sent) = self.outbox.pop_front() {
                    debug!(response = %hex::encode(&sent.pdu), "Sending UDS response");
                    self.in_flight = sent.action;
                }
            }
            Err(TpError::Busy) | Err(TpError::Io(IoError::Busy)) => {
                // Retried on the next pass
            }
            Err(e) => {
                if let Some(dropped) = self.outbox.pop_front() {
                    error!(error = %e, response = %hex::encode(&dropped.pdu), "Failed to send response");
                }
            }
        }
    }

    fn perform(&mut self, action: PostAction) {
        match action {
            PostAction::Reset(request) => {
                info!(kind = ?request.kind, "Performing ECU reset");
                self.reset.reset(request);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::can::LoopbackIo;
    use fbl_uds::ResetKind;
    use pretty_assertions::assert_eq;

    const PHYSICAL: u32 = 0x7E0;
    const FUNCTIONAL: u32 = 0x7DF;
    const RESPONSE: u32 = 0x7E8;

    fn node() -> BootloaderNode<LoopbackIo, ResetLatch> {
        let config = EcuConfig::default();
        let flash = SimulatedFlash::new(config.flash.flash_size, config.flash.sector_size);
        BootloaderNode::new(&config, flash, LoopbackIo::default(), ResetLatch::default()).unwrap()
    }

    fn single_frame(payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![payload.len() as u8];
        frame.extend_from_slice(payload);
        frame.resize(8, 0xCC);
        frame
    }

    #[test]
    fn test_single_frame_request_answered() {
        let mut node = node();
        node.io_mut().push_frame(PHYSICAL, &single_frame(&[0x3E, 0x00]));
        node.pass().unwrap();
        assert_eq!(
            node.io_mut().take_sent(),
            vec![(RESPONSE, single_frame(&[0x7E, 0x00]))]
        );
    }

    #[test]
    fn test_functional_suppressed_request_is_silent() {
        let mut node = node();
        node.io_mut().push_frame(FUNCTIONAL, &single_frame(&[0x3E, 0x80]));
        node.pass().unwrap();
        node.pass().unwrap();
        assert!(node.io_mut().take_sent().is_empty());
    }

    #[test]
    fn test_reset_waits_for_transmit_confirmation() {
        let mut node = node();
        node.io_mut().push_frame(PHYSICAL, &single_frame(&[0x11, 0x01]));
        node.pass().unwrap();
        assert_eq!(
            node.io_mut().take_sent(),
            vec![(RESPONSE, single_frame(&[0x51, 0x01]))]
        );
        assert!(!node.reset_control().is_requested());

        node.pass().unwrap();
        assert_eq!(
            node.reset_control_mut().take(),
            Some(ResetRequest {
                kind: ResetKind::Hard,
                download_successful: false,
            })
        );
    }

    #[test]
    fn test_suppressed_reset_is_immediate() {
        let mut node = node();
        node.io_mut().push_frame(PHYSICAL, &single_frame(&[0x11, 0x83]));
        node.pass().unwrap();
        assert!(node.io_mut().take_sent().is_empty());
        assert_eq!(
            node.reset_control_mut().take().map(|r| r.kind),
            Some(ResetKind::Soft)
        );
    }

    #[test]
    fn test_busy_controller_retries_response() {
        let mut node = node();
        node.io_mut().busy = true;
        node.io_mut().push_frame(PHYSICAL, &single_frame(&[0x3E, 0x00]));
        node.pass().unwrap();
        node.pass().unwrap();
        assert!(node.io_mut().take_sent().is_empty());

        node.io_mut().busy = false;
        node.pass().unwrap();
        assert_eq!(
            node.io_mut().take_sent(),
            vec![(RESPONSE, single_frame(&[0x7E, 0x00]))]
        );
    }
}
