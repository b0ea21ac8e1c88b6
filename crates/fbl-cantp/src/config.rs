//! CAN-TP configuration
//!
//! Timer budgets are given in milliseconds and converted to ticks once, when
//! the engine is created.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::frame::{FrameLayout, CLASSIC_FRAME_LEN, FD_FRAME_LEN};
use crate::timer::{ticks_from_ms, TpTimings};

/// Transport protocol parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TpConfig {
    /// Scheduler period that drives `tick()`
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u32,

    #[serde(default = "default_n_a_ms")]
    pub n_as_ms: u32,
    #[serde(default = "default_n_a_ms")]
    pub n_ar_ms: u32,
    #[serde(default = "default_n_bs_ms")]
    pub n_bs_ms: u32,
    #[serde(default = "default_n_br_ms")]
    pub n_br_ms: u32,
    #[serde(default = "default_n_br_ms")]
    pub n_cs_ms: u32,
    #[serde(default = "default_n_cr_ms")]
    pub n_cr_ms: u32,

    /// Block size advertised in our flow control frames (0 = unlimited)
    #[serde(default)]
    pub block_size: u8,

    /// STmin byte advertised in our flow control frames
    #[serde(default)]
    pub st_min: u8,

    /// Maximum consecutive FC.Wait frames accepted (0 = unlimited)
    #[serde(default)]
    pub wft_max: u8,

    /// Reassembly and segmentation buffer capacity in bytes
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// CAN frame data length (8 for classic CAN, up to 64 for CAN-FD)
    #[serde(default = "default_frame_len")]
    pub frame_len: usize,

    #[serde(default)]
    pub can_fd: bool,

    /// TX padding byte value (None = send frames unpadded)
    #[serde(default = "default_padding")]
    pub padding: Option<u8>,
}

fn default_tick_ms() -> u32 {
    1
}

fn default_n_a_ms() -> u32 {
    70
}

fn default_n_bs_ms() -> u32 {
    150
}

fn default_n_br_ms() -> u32 {
    50
}

fn default_n_cr_ms() -> u32 {
    150
}

fn default_buffer_capacity() -> usize {
    4095
}

fn default_frame_len() -> usize {
    CLASSIC_FRAME_LEN
}

fn default_padding() -> Option<u8> {
    Some(0xCC)
}

impl Default for TpConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            n_as_ms: default_n_a_ms(),
            n_ar_ms: default_n_a_ms(),
            n_bs_ms: default_n_bs_ms(),
            n_br_ms: default_n_br_ms(),
            n_cs_ms: default_n_br_ms(),
            n_cr_ms: default_n_cr_ms(),
            block_size: 0,
            st_min: 0,
            wft_max: 0,
            buffer_capacity: default_buffer_capacity(),
            frame_len: default_frame_len(),
            can_fd: false,
            padding: default_padding(),
        }
    }
}

impl TpConfig {
    /// Reject settings the engine cannot honour
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_ms == 0 {
            return Err(ConfigError::Invalid("tick_ms must be nonzero".to_string()));
        }
        if self.buffer_capacity == 0 {
            return Err(ConfigError::Invalid(
                "buffer_capacity must be nonzero".to_string(),
            ));
        }
        if self.can_fd {
            if !FrameLayout::is_valid_fd_len(self.frame_len) || self.frame_len > FD_FRAME_LEN {
                return Err(ConfigError::Invalid(format!(
                    "frame_len {} is not a valid CAN-FD data length",
                    self.frame_len
                )));
            }
        } else if self.frame_len != CLASSIC_FRAME_LEN {
            return Err(ConfigError::Invalid(format!(
                "frame_len {} requires can_fd",
                self.frame_len
            )));
        }
        Ok(())
    }

    pub fn layout(&self) -> FrameLayout {
        FrameLayout {
            frame_len: self.frame_len,
            can_fd: self.can_fd,
            padding: self.padding,
        }
    }

    /// Timer budgets converted to ticks of `tick_ms`
    pub fn timings(&self) -> TpTimings {
        TpTimings {
            n_as: ticks_from_ms(self.n_as_ms, self.tick_ms),
            n_ar: ticks_from_ms(self.n_ar_ms, self.tick_ms),
            n_bs: ticks_from_ms(self.n_bs_ms, self.tick_ms),
            n_br: ticks_from_ms(self.n_br_ms, self.tick_ms),
            n_cs: ticks_from_ms(self.n_cs_ms, self.tick_ms),
            n_cr: ticks_from_ms(self.n_cr_ms, self.tick_ms),
        }
    }
}

/// CAN identifiers the engine listens and answers on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TpAddresses {
    /// Physical request identifier (tester -> ECU)
    pub rx_id: u32,
    /// Response identifier (ECU -> tester), also used for flow control
    pub tx_id: u32,
    /// Functional (broadcast) request identifier
    #[serde(default)]
    pub functional_id: Option<u32>,
}

impl Default for TpAddresses {
    fn default() -> Self {
        Self {
            rx_id: 0x7E0,
            tx_id: 0x7E8,
            functional_id: Some(0x7DF),
        }
    }
}
