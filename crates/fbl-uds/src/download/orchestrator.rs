//! Flash download orchestration
//!
//! Owns the flash and CRC collaborators, the download step machine and the
//! single background job slot. Request-side methods validate and arm a job,
//! answering "response pending"; [`DownloadOrchestrator::poll`] advances the
//! job by one bounded step per scheduler pass and yields the final response.

use tracing::{debug, error, info, warn};

use super::job::{CheckJob, EraseJob, FlashOperationJob, ProgramJob};
use super::state::{DownloadTransferState, TransferStep};
use crate::config::{FlashConfig, SlotConfig};
use crate::error::{FlashError, ServiceError};
use crate::hal::{CrcService, FlashHal};
use crate::image::{next_app_counter, ImageStatusRecord, Slot, SlotRecords, FINGERPRINT_LEN};
use crate::response::Response;
use crate::{routine_id, routine_sub_function, service_id};

/// routineStatusRecord values
const ROUTINE_CORRECT: u8 = 0x00;
const ROUTINE_INCORRECT: u8 = 0x01;

/// Length format identifier: maxNumberOfBlockLength is 2 bytes
const LENGTH_FORMAT_ID: u8 = 0x20;

/// Progress of the image being staged in the target slot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct StagedImage {
    erase_ok: bool,
    program_ok: bool,
    struct_valid: bool,
    fingerprint: Option<[u8; FINGERPRINT_LEN]>,
    /// Physical start and length of the verified download
    programmed: Option<(u32, u32)>,
}

pub struct DownloadOrchestrator<F, C> {
    config: FlashConfig,
    erase_budget: u32,
    max_block_length: u16,
    flash: F,
    crc: C,
    transfer: DownloadTransferState,
    job: FlashOperationJob,
    staged: StagedImage,
    target: Option<Slot>,
    /// Physical range erased in this session, start and end
    erased: Option<(u32, u32)>,
    committed: bool,
    scratch: Vec<u8>,
}

impl<F: FlashHal, C: CrcService> DownloadOrchestrator<F, C> {
    pub fn new(config: FlashConfig, s3_ms: u32, max_block_length: u16, flash: F, crc: C) -> Self {
        let erase_budget = config.erase_budget(s3_ms);
        let scratch = vec![0u8; config.checksum_chunk];
        Self {
            config,
            erase_budget,
            max_block_length,
            flash,
            crc,
            transfer: DownloadTransferState::default(),
            job: FlashOperationJob::Idle,
            staged: StagedImage::default(),
            target: None,
            erased: None,
            committed: false,
            scratch,
        }
    }

    pub fn config(&self) -> &FlashConfig {
        &self.config
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    pub fn transfer(&self) -> &DownloadTransferState {
        &self.transfer
    }

    pub fn job(&self) -> &FlashOperationJob {
        &self.job
    }

    pub fn is_busy(&self) -> bool {
        self.job.is_active()
    }

    /// Slot chosen as the erase/program target in this session
    pub fn target(&self) -> Option<Slot> {
        self.target
    }

    /// A record was committed in this session
    pub fn download_successful(&self) -> bool {
        self.committed
    }

    pub fn records(&mut self) -> Result<SlotRecords, FlashError> {
        SlotRecords::read(&mut self.flash, &self.config)
    }

    pub fn fingerprint(&self) -> Option<[u8; FINGERPRINT_LEN]> {
        self.staged.fingerprint
    }

    pub fn set_fingerprint(&mut self, fingerprint: [u8; FINGERPRINT_LEN]) {
        info!(fingerprint = %hex::encode(fingerprint), "Fingerprint staged");
        self.staged.fingerprint = Some(fingerprint);
    }

    // ── Erase memory routine ───────────────────────────────────────────────

    /// Arm an erase of the oldest slot. `range` is a logical address and size
    /// inside the application region; `None` erases the whole region.
    pub fn start_erase(&mut self, range: Option<(u32, u32)>) -> Result<Response, ServiceError> {
        self.ensure_idle()?;

        let records = self.records().map_err(|e| {
            error!(error = %e, "Failed to read image status records");
            ServiceError::GeneralProgrammingFailure
        })?;
        let slot = records.oldest();
        let slot_config = *self.config.slot(slot);

        let (start, end) = match range {
            None => (slot_config.app_base, slot_config.app_end()),
            Some((address, size)) => {
                let start = self
                    .map_range(&slot_config, address, size)
                    .ok_or(ServiceError::RequestOutOfRange)?;
                let sector = self.config.sector_size;
                let aligned_start = start - start % sector;
                let aligned_end = (start + size).div_ceil(sector) * sector;
                (aligned_start, aligned_end.min(slot_config.app_end()))
            }
        };

        self.transfer.reset();
        self.staged.erase_ok = false;
        self.staged.program_ok = false;
        self.staged.struct_valid = false;
        self.staged.programmed = None;
        self.committed = false;
        self.erased = None;
        self.target = Some(slot);

        info!(
            slot = %slot,
            start = format!("0x{:08X}", start),
            end = format!("0x{:08X}", end),
            budget = self.erase_budget,
            "EraseMemory: erasing target slot"
        );

        self.job = FlashOperationJob::Erasing(EraseJob {
            record_sector: Some(slot_config.record_address),
            start,
            next: start,
            end,
            budget: self.erase_budget,
        });
        Ok(Response::pending(service_id::ROUTINE_CONTROL))
    }

    // ── RequestDownload / TransferData / RequestTransferExit ───────────────

    pub fn request_download(&mut self, address: u32, size: u32) -> Result<Response, ServiceError> {
        self.ensure_idle()?;
        self.expect_step(TransferStep::Request)?;

        let slot = self.target.ok_or_else(|| {
            debug!("RequestDownload: no slot erased in this session");
            ServiceError::ConditionsNotCorrect
        })?;
        let slot_config = *self.config.slot(slot);
        let start = self
            .map_range(&slot_config, address, size)
            .ok_or(ServiceError::RequestOutOfRange)?;
        let end = start + size;

        match self.erased {
            Some((erased_start, erased_end)) if start >= erased_start && end <= erased_end => {}
            _ => {
                debug!(
                    start = format!("0x{:08X}", start),
                    end = format!("0x{:08X}", end),
                    "RequestDownload: range not erased"
                );
                return Err(ServiceError::ConditionsNotCorrect);
            }
        }

        info!(
            address = format!("0x{:08X}", address),
            physical = format!("0x{:08X}", start),
            size,
            slot = %slot,
            "RequestDownload: initiating download"
        );

        self.transfer.begin(start, size);
        self.staged.program_ok = false;
        self.staged.programmed = None;

        Ok(Response::positive(
            service_id::REQUEST_DOWNLOAD,
            &[
                LENGTH_FORMAT_ID,
                (self.max_block_length >> 8) as u8,
                (self.max_block_length & 0xFF) as u8,
            ],
        ))
    }

    pub fn transfer_data(&mut self, block_counter: u8, data: &[u8]) -> Result<Response, ServiceError> {
        self.ensure_idle()?;
        self.expect_step(TransferStep::Transfer)?;

        if block_counter != self.transfer.expected_block() {
            warn!(
                expected = self.transfer.expected_block(),
                received = block_counter,
                "TransferData: wrong block sequence counter, resetting download"
            );
            self.discard_staged();
            return Err(ServiceError::RequestSequenceError);
        }
        if data.len() + 2 > self.max_block_length as usize {
            return Err(ServiceError::IncorrectMessageLength);
        }
        if data.len() as u32 > self.transfer.remaining() {
            warn!(
                data_len = data.len(),
                remaining = self.transfer.remaining(),
                "TransferData: data exceeds requested size, resetting download"
            );
            self.discard_staged();
            return Err(ServiceError::RequestOutOfRange);
        }

        debug!(
            block = block_counter,
            bytes = data.len(),
            address = format!("0x{:08X}", self.transfer.next_address()),
            "TransferData: programming block"
        );

        self.job = FlashOperationJob::Programming(ProgramJob {
            block_counter,
            address: self.transfer.next_address(),
            data: data.to_vec(),
            written: 0,
        });
        Ok(Response::pending(service_id::TRANSFER_DATA))
    }

    pub fn transfer_exit(&mut self) -> Result<Response, ServiceError> {
        self.ensure_idle()?;
        self.expect_step(TransferStep::ExitTransfer)?;
        info!(
            total = self.transfer.total_length(),
            "RequestTransferExit: waiting for checksum"
        );
        self.transfer.advance(TransferStep::Checksum);
        Ok(Response::positive(service_id::REQUEST_TRANSFER_EXIT, &[]))
    }

    // ── Check memory routine ───────────────────────────────────────────────

    pub fn start_checksum(&mut self, expected: u32) -> Result<Response, ServiceError> {
        self.ensure_idle()?;
        self.expect_step(TransferStep::Checksum)?;

        let start = self.transfer.start_address();
        let end = start + self.transfer.total_length();
        info!(
            expected = format!("0x{:08X}", expected),
            start = format!("0x{:08X}", start),
            end = format!("0x{:08X}", end),
            "CheckMemory: verifying download"
        );

        self.crc.begin();
        self.job = FlashOperationJob::Checking(CheckJob {
            next: start,
            end,
            expected,
        });
        Ok(Response::pending(service_id::ROUTINE_CONTROL))
    }

    // ── Check programming dependencies routine ─────────────────────────────

    /// Promote the staged image: write its status record with the next app
    /// counter. Refused unless erase, program and structure checks all passed.
    pub fn check_dependencies(&mut self) -> Result<Response, ServiceError> {
        self.ensure_idle()?;

        let staged = &self.staged;
        let (slot, (start, length)) = match (self.target, staged.programmed) {
            (Some(slot), Some(programmed))
                if staged.erase_ok && staged.program_ok && staged.struct_valid =>
            {
                (slot, programmed)
            }
            _ => {
                warn!(
                    erase_ok = staged.erase_ok,
                    program_ok = staged.program_ok,
                    struct_valid = staged.struct_valid,
                    "CheckProgrammingDependencies: image not promotable"
                );
                return Err(ServiceError::SubFunctionNotSupported);
            }
        };

        let records = self
            .records()
            .map_err(|_| ServiceError::GeneralProgrammingFailure)?;
        let newest_counter = records
            .newest()
            .and_then(|newest| records.get(newest))
            .map(|record| record.app_counter);

        let record = ImageStatusRecord {
            erase_ok: true,
            program_ok: true,
            struct_valid: true,
            app_counter: next_app_counter(newest_counter),
            fingerprint: self.staged.fingerprint.unwrap_or([0; FINGERPRINT_LEN]),
            reset_vector: start,
            image_length: length,
        };

        let record_address = self.config.slot(slot).record_address;
        if let Err(e) = self.flash.program(record_address, &record.to_bytes()) {
            error!(error = %e, slot = %slot, "Failed to write image status record");
            return Err(ServiceError::GeneralProgrammingFailure);
        }
        match self.records().map(|records| records.get(slot).cloned()) {
            Ok(Some(written)) if written == record => {}
            _ => {
                error!(slot = %slot, "Image status record read-back mismatch");
                return Err(ServiceError::GeneralProgrammingFailure);
            }
        }

        info!(
            slot = %slot,
            app_counter = record.app_counter,
            reset_vector = format!("0x{:08X}", start),
            length,
            "Image committed"
        );

        self.committed = true;
        self.staged = StagedImage::default();
        self.erased = None;
        self.target = None;
        Ok(routine_response(
            routine_id::CHECK_PROGRAMMING_DEPENDENCIES,
            ROUTINE_CORRECT,
        ))
    }

    /// Drop the download in progress (session left, S3 expired). Records
    /// already written stay untouched.
    pub fn abandon(&mut self) {
        let in_progress = self.job.is_active()
            || self.transfer.step() != TransferStep::Request
            || self.target.is_some();
        if in_progress {
            info!(job = ?self.job.service_id(), step = ?self.transfer.step(), "Download abandoned");
        }
        self.job = FlashOperationJob::Idle;
        self.transfer.reset();
        self.staged = StagedImage::default();
        self.target = None;
        self.erased = None;
    }

    // ── Background job ─────────────────────────────────────────────────────

    /// Advance the active job by one step. Returns a response when the job
    /// needs more tester time or has finished.
    pub fn poll(&mut self) -> Option<Response> {
        match std::mem::take(&mut self.job) {
            FlashOperationJob::Idle => None,
            FlashOperationJob::Erasing(job) => self.step_erase(job),
            FlashOperationJob::WaitingForTesterTime(mut job) => {
                job.budget = self.erase_budget;
                self.job = FlashOperationJob::Erasing(job);
                None
            }
            FlashOperationJob::Programming(job) => self.step_program(job),
            FlashOperationJob::Checking(job) => self.step_check(job),
        }
    }

    fn step_erase(&mut self, mut job: EraseJob) -> Option<Response> {
        let sector = self.config.sector_size;
        let address = match job.record_sector.take() {
            Some(address) => address,
            None => {
                let address = job.next;
                job.next += sector;
                address
            }
        };

        if let Err(e) = self.flash.erase_sector(address, sector) {
            error!(error = %e, "EraseMemory: sector erase failed");
            self.discard_staged();
            return Some(Response::negative(
                service_id::ROUTINE_CONTROL,
                ServiceError::from(e),
            ));
        }

        if job.record_sector.is_none() && job.next >= job.end {
            return Some(self.finish_erase(&job));
        }

        job.budget = job.budget.saturating_sub(1);
        if job.budget == 0 {
            debug!(
                next = format!("0x{:08X}", job.next),
                "EraseMemory: budget spent, requesting more time"
            );
            self.job = FlashOperationJob::WaitingForTesterTime(job);
            return Some(Response::pending(service_id::ROUTINE_CONTROL));
        }

        self.job = FlashOperationJob::Erasing(job);
        None
    }

    fn finish_erase(&mut self, job: &EraseJob) -> Response {
        self.staged.erase_ok = true;
        self.staged.program_ok = false;
        self.staged.struct_valid = true;
        self.erased = Some((job.start, job.end));
        info!("EraseMemory: complete");
        routine_response(routine_id::ERASE_MEMORY, ROUTINE_CORRECT)
    }

    fn step_program(&mut self, mut job: ProgramJob) -> Option<Response> {
        let chunk = self.config.program_chunk.min(job.data.len() - job.written);
        let address = job.address + job.written as u32;

        if let Err(e) = self
            .flash
            .program(address, &job.data[job.written..job.written + chunk])
        {
            error!(error = %e, "TransferData: programming failed, resetting download");
            self.discard_staged();
            return Some(Response::negative(
                service_id::TRANSFER_DATA,
                ServiceError::from(e),
            ));
        }

        job.written += chunk;
        if job.written < job.data.len() {
            self.job = FlashOperationJob::Programming(job);
            return None;
        }

        self.transfer.complete_block(job.data.len() as u32);
        Some(Response::positive(
            service_id::TRANSFER_DATA,
            &[job.block_counter],
        ))
    }

    fn step_check(&mut self, mut job: CheckJob) -> Option<Response> {
        let chunk = (self.scratch.len() as u32).min(job.end - job.next) as usize;
        if chunk > 0 {
            if let Err(e) = self.flash.read(job.next, &mut self.scratch[..chunk]) {
                error!(error = %e, "CheckMemory: read failed, resetting download");
                self.discard_staged();
                return Some(Response::negative(
                    service_id::ROUTINE_CONTROL,
                    ServiceError::from(e),
                ));
            }
            self.crc.accumulate(&self.scratch[..chunk]);
            job.next += chunk as u32;
        }

        if job.next < job.end {
            self.job = FlashOperationJob::Checking(job);
            return None;
        }

        let computed = self.crc.finish();
        let start = self.transfer.start_address();
        let length = self.transfer.total_length();
        self.transfer.advance(TransferStep::Request);

        if computed == job.expected {
            info!(crc = format!("0x{:08X}", computed), "CheckMemory: checksum correct");
            self.staged.program_ok = true;
            self.staged.programmed = Some((start, length));
            Some(routine_response(routine_id::CHECK_MEMORY, ROUTINE_CORRECT))
        } else {
            let e = FlashError::ChecksumMismatch {
                expected: job.expected,
                computed,
            };
            warn!(error = %e, "CheckMemory: image rejected");
            self.discard_staged();
            Some(routine_response(routine_id::CHECK_MEMORY, ROUTINE_INCORRECT))
        }
    }

    /// Step check for 0x34/0x36/0x37/checksum. A violation once data may
    /// already be in flash discards the staged image as well.
    fn expect_step(&mut self, step: TransferStep) -> Result<(), ServiceError> {
        let current = self.transfer.step();
        if let Err(e) = self.transfer.expect(step) {
            if current != TransferStep::Request {
                self.discard_staged();
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Any failure after the erase leaves the slot contents unknown: the
    /// staged image can no longer be promoted and the slot must be erased
    /// again before the next RequestDownload.
    fn discard_staged(&mut self) {
        if self.erased.is_some() {
            warn!(slot = ?self.target, "Staged image discarded, erase required");
        }
        self.transfer.reset();
        self.staged.erase_ok = false;
        self.staged.program_ok = false;
        self.staged.struct_valid = false;
        self.staged.programmed = None;
        self.erased = None;
    }

    fn ensure_idle(&self) -> Result<(), ServiceError> {
        if self.job.is_active() {
            debug!(job = ?self.job.service_id(), "Flash job in progress");
            return Err(ServiceError::ConditionsNotCorrect);
        }
        Ok(())
    }

    /// Map a logical download range into a slot's application region,
    /// returning the physical start
    fn map_range(&self, slot: &SlotConfig, address: u32, size: u32) -> Option<u32> {
        let offset = address.checked_sub(self.config.download_base)?;
        let end = offset.checked_add(size)?;
        if size == 0 || end > slot.app_size {
            return None;
        }
        Some(slot.app_base + offset)
    }
}

fn routine_response(routine: u16, status: u8) -> Response {
    Response::positive(
        service_id::ROUTINE_CONTROL,
        &[
            routine_sub_function::START_ROUTINE,
            (routine >> 8) as u8,
            (routine & 0xFF) as u8,
            status,
        ],
    )
}
