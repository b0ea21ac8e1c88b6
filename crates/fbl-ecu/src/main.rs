//! Flash bootloader node
//!
//! Runs the bootloader on a SocketCAN interface with a simulated,
//! optionally file-backed flash.
//!
//! # Usage
//!
//! ```bash
//! ./fbl-ecu --interface vcan0 --flash-image /tmp/fbl-flash.bin
//! ./fbl-ecu --config config/fbl-ecu.toml
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use fbl_ecu::{select_boot_target, BootloaderNode, EcuConfig, ResetLatch, SimulatedFlash};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "fbl-ecu")]
#[command(about = "Flash bootloader node with A/B image slots")]
struct Args {
    /// Configuration file path (TOML format)
    /// If provided, overrides command-line options
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// CAN interface name
    #[arg(short, long, default_value = "vcan0")]
    interface: String,

    /// ECU's receive CAN ID (tester sends to this)
    #[arg(long, default_value = "0x7E0")]
    rx_id: String,

    /// ECU's transmit CAN ID (ECU sends from this)
    #[arg(long, default_value = "0x7E8")]
    tx_id: String,

    /// File backing the simulated flash
    #[arg(long)]
    flash_image: Option<PathBuf>,

    /// Security access shared secret (hex string, e.g., "deadbeef")
    #[arg(long, default_value = "ff")]
    security_secret: String,

    /// Exit instead of restarting the bootloader when a reset finds a
    /// bootable image
    #[arg(long)]
    handover: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        "fbl_ecu=debug,fbl_uds=debug,fbl_cantp=debug"
    } else {
        "fbl_ecu=info,fbl_uds=info,fbl_cantp=info"
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = if let Some(path) = &args.config {
        info!(path = %path.display(), "Loading config");
        EcuConfig::load(path).context("Failed to load config")?
    } else {
        let mut config = EcuConfig::default();
        config.transport.interface = args.interface.clone();
        config.transport.rx_id = args.rx_id.clone();
        config.transport.tx_id = args.tx_id.clone();
        config.security.secret = args.security_secret.clone();
        config.storage.flash_image = args.flash_image.clone();
        config.validate().context("Invalid configuration")?;
        config
    };

    info!(
        interface = %config.transport.interface,
        rx_id = %config.transport.rx_id,
        tx_id = %config.transport.tx_id,
        "Starting flash bootloader"
    );

    let flash = match &config.storage.flash_image {
        Some(path) => SimulatedFlash::open(path, config.flash.flash_size, config.flash.sector_size)?,
        None => SimulatedFlash::new(config.flash.flash_size, config.flash.sector_size),
    };

    let running = Arc::new(AtomicBool::new(true));
    let running_for_loop = running.clone();
    let handover = args.handover;
    let mut scheduler =
        tokio::task::spawn_blocking(move || run(config, flash, handover, running_for_loop));

    tokio::select! {
        result = &mut scheduler => {
            return result.context("Scheduler task panicked")?;
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutting down...");
        }
    }

    running.store(false, Ordering::SeqCst);
    match tokio::time::timeout(Duration::from_secs(2), scheduler).await {
        Ok(result) => result.context("Scheduler task panicked")??,
        Err(_) => warn!("Scheduler did not stop in time"),
    }

    info!("Flash bootloader stopped");
    Ok(())
}

/// Boot decision, then the scheduler loop. A reset re-runs the decision on
/// the same flash and starts a fresh bootloader session.
fn run(config: EcuConfig, flash: SimulatedFlash, handover: bool, running: Arc<AtomicBool>) -> Result<()> {
    let tick = Duration::from_millis(config.tp.tick_ms as u64);

    while running.load(Ordering::SeqCst) {
        let target = select_boot_target(&mut flash.clone(), &config.flash)?;
        if let (Some(target), true) = (target, handover) {
            info!(
                slot = %target.slot,
                reset_vector = format!("0x{:08X}", target.reset_vector),
                "Handing over to application"
            );
            return Ok(());
        }

        let mut node = BootloaderNode::new(&config, flash.clone(), open_io(&config)?, ResetLatch::default())?;
        info!("Bootloader ready - waiting for requests");

        while running.load(Ordering::SeqCst) {
            if let Err(e) = node.pass() {
                error!(error = %e, "Scheduler pass failed");
            }
            if let Some(request) = node.reset_control_mut().take() {
                info!(
                    kind = ?request.kind,
                    download_successful = request.download_successful,
                    "ECU reset"
                );
                break;
            }
            std::thread::sleep(tick);
        }
        flash.sync()?;
    }
    Ok(())
}

#[cfg(feature = "socketcan")]
fn open_io(config: &EcuConfig) -> Result<fbl_ecu::can::SocketCanIo> {
    fbl_ecu::can::SocketCanIo::open(&config.transport.interface)
        .map_err(|e| anyhow::anyhow!("{}", e))
}

#[cfg(not(feature = "socketcan"))]
fn open_io(_config: &EcuConfig) -> Result<fbl_ecu::LoopbackIo> {
    warn!("Built without SocketCAN support, running on loopback IO");
    Ok(fbl_ecu::LoopbackIo::default())
}
