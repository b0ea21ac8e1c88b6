//! fbl-ecu - flash bootloader node
//!
//! Wires the CAN-TP engine, the UDS dispatcher and the download
//! orchestrator into one cooperative scheduler, and supplies the platform
//! collaborators they consume.
//!
//! # Modules
//!
//! - [`node`] - scheduler pass: frames in, requests dispatched, responses out
//! - [`flash`] - simulated NOR flash with optional file persistence
//! - [`boot`] - A/B boot decision
//! - [`can`] - SocketCAN and loopback frame IO
//! - [`crc`] - CRC-32 collaborator
//! - [`security`] - XOR seed/key collaborator
//! - [`config`] - TOML configuration

pub mod boot;
pub mod can;
pub mod config;
pub mod crc;
pub mod error;
pub mod flash;
pub mod node;
pub mod security;

pub use boot::{select_boot_target, BootTarget};
pub use can::{FrameIo, LoopbackIo};
pub use config::EcuConfig;
pub use error::NodeError;
pub use flash::SimulatedFlash;
pub use node::{BootloaderNode, ResetLatch};
