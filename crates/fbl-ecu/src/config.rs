//! Bootloader node configuration
//!
//! One TOML file carries the transport wiring, the security secret, the
//! flash persistence path and the protocol sections of the library crates.

use std::path::{Path, PathBuf};

use fbl_cantp::{TpAddresses, TpConfig};
use fbl_uds::{DiagConfig, FlashConfig, UdsConfig};
use serde::{Deserialize, Serialize};

use crate::error::{NodeError, NodeResult};

/// Complete node configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EcuConfig {
    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    /// CAN-TP timing and framing
    #[serde(default)]
    pub tp: TpConfig,

    /// Diagnostic server timing
    #[serde(default)]
    pub diag: DiagConfig,

    /// Flash layout and job pacing
    #[serde(default)]
    pub flash: FlashConfig,
}

impl EcuConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> NodeResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> NodeResult<()> {
        self.tp.validate()?;
        self.uds().validate()?;
        self.addresses()?;
        self.security.secret_bytes()?;
        if self.tp.tick_ms != self.diag.tick_ms {
            return Err(NodeError::Config(format!(
                "tp.tick_ms ({}) and diag.tick_ms ({}) must match",
                self.tp.tick_ms, self.diag.tick_ms
            )));
        }
        Ok(())
    }

    pub fn uds(&self) -> UdsConfig {
        UdsConfig {
            diag: self.diag.clone(),
            flash: self.flash.clone(),
        }
    }

    pub fn addresses(&self) -> NodeResult<TpAddresses> {
        let functional_id = match &self.transport.functional_id {
            Some(id) => Some(parse_can_id(id)?),
            None => None,
        };
        Ok(TpAddresses {
            rx_id: parse_can_id(&self.transport.rx_id)?,
            tx_id: parse_can_id(&self.transport.tx_id)?,
            functional_id,
        })
    }
}

// =============================================================================
// Transport Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// CAN interface
    #[serde(default = "default_interface")]
    pub interface: String,

    /// ECU's receive CAN ID (tester sends to this)
    #[serde(default = "default_rx_id")]
    pub rx_id: String,

    /// ECU's transmit CAN ID (ECU sends from this)
    #[serde(default = "default_tx_id")]
    pub tx_id: String,

    /// Functional (broadcast) request CAN ID
    #[serde(default = "default_functional_id")]
    pub functional_id: Option<String>,
}

fn default_interface() -> String {
    "vcan0".to_string()
}

fn default_rx_id() -> String {
    "0x7E0".to_string()
}

fn default_tx_id() -> String {
    "0x7E8".to_string()
}

fn default_functional_id() -> Option<String> {
    Some("0x7DF".to_string())
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            rx_id: default_rx_id(),
            tx_id: default_tx_id(),
            functional_id: default_functional_id(),
        }
    }
}

// =============================================================================
// Security Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Shared seed/key secret as a hex string
    #[serde(default = "default_secret")]
    pub secret: String,
}

fn default_secret() -> String {
    "ff".to_string()
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            secret: default_secret(),
        }
    }
}

impl SecurityConfig {
    pub fn secret_bytes(&self) -> NodeResult<Vec<u8>> {
        parse_hex_string(&self.secret)
    }
}

// =============================================================================
// Storage Configuration
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// File backing the simulated flash. Without it the image lives in
    /// memory only and every start sees erased flash.
    #[serde(default)]
    pub flash_image: Option<PathBuf>,
}

// =============================================================================
// Parsing helpers
// =============================================================================

pub fn parse_can_id(s: &str) -> NodeResult<u32> {
    let s = s.trim();
    let s = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    let id = u32::from_str_radix(s, 16)
        .map_err(|e| NodeError::Config(format!("Invalid CAN ID '{}': {}", s, e)))?;
    if id > 0x1FFF_FFFF {
        return Err(NodeError::Config(format!("CAN ID 0x{:X} out of range", id)));
    }
    Ok(id)
}

pub fn parse_hex_string(s: &str) -> NodeResult<Vec<u8>> {
    let s = s.trim();
    let s = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    let bytes = hex::decode(s).map_err(|e| NodeError::Config(format!("Invalid hex: {}", e)))?;
    if bytes.is_empty() {
        return Err(NodeError::Config("Security secret must not be empty".to_string()));
    }
    Ok(bytes)
}
