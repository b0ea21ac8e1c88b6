//! End-to-end flash download: a tester-side CAN-TP engine talks to a full
//! bootloader node frame by frame.

use std::path::Path;

use fbl_cantp::{CanTp, TpAddresses, TpConfig, TpEvent};
use fbl_ecu::security::compute_key;
use fbl_ecu::{
    select_boot_target, BootloaderNode, EcuConfig, LoopbackIo, ResetLatch, SimulatedFlash,
};
use fbl_uds::{ResetKind, ResetRequest, Slot};
use pretty_assertions::assert_eq;

const ECU_RX: u32 = 0x7E0;
const ECU_TX: u32 = 0x7E8;
const DOWNLOAD_BASE: u32 = 0x0800_0000;

struct Bench {
    config: EcuConfig,
    flash: SimulatedFlash,
    node: BootloaderNode<LoopbackIo, ResetLatch>,
    tester: CanTp<LoopbackIo>,
}

impl Bench {
    fn new(config: EcuConfig, flash: SimulatedFlash) -> Self {
        let node =
            BootloaderNode::new(&config, flash.clone(), LoopbackIo::default(), ResetLatch::default())
                .unwrap();
        let tester = CanTp::new(
            TpConfig::default(),
            TpAddresses {
                rx_id: ECU_TX,
                tx_id: ECU_RX,
                functional_id: None,
            },
            LoopbackIo::default(),
        )
        .unwrap();
        Self {
            config,
            flash,
            node,
            tester,
        }
    }

    fn in_memory() -> Self {
        let config = EcuConfig::default();
        let flash = SimulatedFlash::new(config.flash.flash_size, config.flash.sector_size);
        Self::new(config, flash)
    }

    /// Power cycle: a fresh node on the same flash
    fn restart(&mut self) {
        *self = Self::new(self.config.clone(), self.flash.clone());
    }

    /// One tick on both sides, frames delivered in between
    fn step(&mut self) {
        for (id, frame) in self.tester.io_mut().take_sent() {
            self.tester.on_tx_confirm();
            self.node.io_mut().push_frame(id, &frame);
        }
        self.tester.tick();
        self.node.pass().unwrap();
        for (id, frame) in self.node.io_mut().take_sent() {
            self.tester.receive_frame(id, &frame);
        }
    }

    /// Send a request and wait for its final response, skipping 0x78
    fn request(&mut self, pdu: &[u8]) -> Vec<u8> {
        self.tester.send_pdu(ECU_RX, pdu).unwrap();
        for _ in 0..100_000 {
            self.step();
            while let Some(event) = self.tester.poll_event() {
                match event {
                    TpEvent::Received { pdu, .. } => {
                        if pdu.len() == 3 && pdu[0] == 0x7F && pdu[2] == 0x78 {
                            continue;
                        }
                        return pdu;
                    }
                    TpEvent::TransmitComplete { .. } => {}
                    TpEvent::Aborted { direction, error } => {
                        panic!("tester exchange aborted ({:?}): {}", direction, error)
                    }
                }
            }
        }
        panic!("no response to {:02X?}", &pdu[..pdu.len().min(4)]);
    }

    fn unlock(&mut self) {
        assert_eq!(self.request(&[0x10, 0x02])[..2], [0x50, 0x02]);
        let seed = self.request(&[0x27, 0x01]);
        assert_eq!(seed[..2], [0x67, 0x01]);

        let secret = self.config.security.secret_bytes().unwrap();
        let mut key = vec![0x27, 0x02];
        key.extend(compute_key(&seed[2..], &secret));
        assert_eq!(self.request(&key), vec![0x67, 0x02]);
    }

    /// Complete programming sequence, ending with the ECU reset
    fn download(&mut self, image: &[u8]) -> ResetRequest {
        self.unlock();

        let mut fingerprint = vec![0x2E, 0xF1, 0x5A];
        fingerprint.extend_from_slice(b"BENCH-007");
        assert_eq!(self.request(&fingerprint), vec![0x6E, 0xF1, 0x5A]);

        let address = DOWNLOAD_BASE.to_be_bytes();
        let size = (image.len() as u32).to_be_bytes();

        let mut erase = vec![0x31, 0x01, 0xFF, 0x00, 0x44];
        erase.extend_from_slice(&address);
        erase.extend_from_slice(&size);
        assert_eq!(self.request(&erase), vec![0x71, 0x01, 0xFF, 0x00, 0x00]);

        let mut request_download = vec![0x34, 0x00, 0x44];
        request_download.extend_from_slice(&address);
        request_download.extend_from_slice(&size);
        let response = self.request(&request_download);
        assert_eq!(response[..2], [0x74, 0x20]);
        let max_block = u16::from_be_bytes([response[2], response[3]]) as usize;

        for (index, block) in image.chunks(max_block - 2).enumerate() {
            let counter = (index + 1) as u8;
            let mut transfer = vec![0x36, counter];
            transfer.extend_from_slice(block);
            assert_eq!(self.request(&transfer), vec![0x76, counter]);
        }
        assert_eq!(self.request(&[0x37]), vec![0x77]);

        let mut check = vec![0x31, 0x01, 0x02, 0x02];
        check.extend_from_slice(&fbl_ecu::crc::CRC32.checksum(image).to_be_bytes());
        assert_eq!(self.request(&check), vec![0x71, 0x01, 0x02, 0x02, 0x00]);

        assert_eq!(
            self.request(&[0x31, 0x01, 0xFF, 0x01]),
            vec![0x71, 0x01, 0xFF, 0x01, 0x00]
        );

        assert_eq!(self.request(&[0x11, 0x01]), vec![0x51, 0x01]);
        for _ in 0..10 {
            if let Some(request) = self.node.reset_control_mut().take() {
                return request;
            }
            self.step();
        }
        panic!("reset was not performed");
    }
}

fn image(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

fn boot_slot(flash: &SimulatedFlash, config: &EcuConfig) -> Option<(Slot, u32, u32)> {
    select_boot_target(&mut flash.clone(), &config.flash)
        .unwrap()
        .map(|target| (target.slot, target.reset_vector, target.image_length))
}

#[test]
fn test_download_commits_slot_a() {
    let mut bench = Bench::in_memory();
    assert_eq!(boot_slot(&bench.flash, &bench.config), None);

    let app = image(10_000, 3);
    let reset = bench.download(&app);
    assert_eq!(
        reset,
        ResetRequest {
            kind: ResetKind::Hard,
            download_successful: true,
        }
    );

    let slot_a = bench.config.flash.slot_a;
    assert_eq!(bench.flash.snapshot(slot_a.app_base, app.len()), Some(app.clone()));
    assert_eq!(
        boot_slot(&bench.flash, &bench.config),
        Some((Slot::A, slot_a.app_base, 10_000))
    );
}

#[test]
fn test_second_download_alternates_slots() {
    let mut bench = Bench::in_memory();
    bench.download(&image(3000, 1));
    bench.restart();
    assert_eq!(
        bench.request(&[0x22, 0xF1, 0xA0]),
        vec![0x62, 0xF1, 0xA0, 0x00, 0x00, 0xFF]
    );

    let second = image(5000, 2);
    bench.download(&second);
    bench.restart();
    assert_eq!(
        bench.request(&[0x22, 0xF1, 0xA0]),
        vec![0x62, 0xF1, 0xA0, 0x01, 0x00, 0x01]
    );

    let slot_b = bench.config.flash.slot_b;
    assert_eq!(bench.flash.snapshot(slot_b.app_base, second.len()), Some(second));
    assert_eq!(
        boot_slot(&bench.flash, &bench.config),
        Some((Slot::B, slot_b.app_base, 5000))
    );
}

#[test]
fn test_records_survive_restart_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flash.bin");
    let config = EcuConfig::default();
    let open = |path: &Path| {
        SimulatedFlash::open(path, config.flash.flash_size, config.flash.sector_size).unwrap()
    };

    let mut bench = Bench::new(config.clone(), open(&path));
    bench.download(&image(2048, 9));
    drop(bench);

    let flash = open(&path);
    assert_eq!(
        boot_slot(&flash, &config),
        Some((Slot::A, config.flash.slot_a.app_base, 2048))
    );
}

#[test]
fn test_programming_services_need_security() {
    let mut bench = Bench::in_memory();
    assert_eq!(bench.request(&[0x10, 0x02])[..2], [0x50, 0x02]);
    assert_eq!(
        bench.request(&[0x31, 0x01, 0xFF, 0x00]),
        vec![0x7F, 0x31, 0x11]
    );
    assert_eq!(bench.request(&[0x27, 0x01])[..2], [0x67, 0x01]);
    assert_eq!(
        bench.request(&[0x27, 0x02, 0x00, 0x00, 0x00, 0x00]),
        vec![0x7F, 0x27, 0x35]
    );
    assert_eq!(
        bench.request(&[0x34, 0x00, 0x44, 0x08, 0, 0, 0, 0, 0, 0x10, 0]),
        vec![0x7F, 0x34, 0x11]
    );
}

#[test]
fn test_s3_timeout_returns_to_default_session() {
    let mut config = EcuConfig::default();
    config.diag.s3_ms = 200;
    let flash = SimulatedFlash::new(config.flash.flash_size, config.flash.sector_size);
    let mut bench = Bench::new(config, flash);

    bench.unlock();
    assert_eq!(
        bench.request(&[0x22, 0xF1, 0x86]),
        vec![0x62, 0xF1, 0x86, 0x02]
    );
    for _ in 0..250 {
        bench.step();
    }
    assert_eq!(
        bench.request(&[0x22, 0xF1, 0x86]),
        vec![0x62, 0xF1, 0x86, 0x01]
    );
    assert_eq!(
        bench.request(&[0x31, 0x01, 0xFF, 0x00]),
        vec![0x7F, 0x31, 0x11]
    );
}
