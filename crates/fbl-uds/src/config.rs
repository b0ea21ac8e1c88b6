//! Diagnostic server and flash layout configuration

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::image::Slot;

// =============================================================================
// Diagnostic server
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagConfig {
    /// Scheduler period that drives `tick()`
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u32,

    /// S3 server inactivity timeout
    #[serde(default = "default_s3_ms")]
    pub s3_ms: u32,

    /// P2 reported in the session control response
    #[serde(default = "default_p2_ms")]
    pub p2_ms: u16,

    /// P2* reported in the session control response (encoded in 10 ms units)
    #[serde(default = "default_p2_star_ms")]
    pub p2_star_ms: u32,

    #[serde(default = "default_seed_len")]
    pub seed_len: usize,

    /// maxNumberOfBlockLength reported by RequestDownload (SID and counter included)
    #[serde(default = "default_max_block_length")]
    pub max_block_length: u16,
}

fn default_tick_ms() -> u32 {
    1
}

fn default_s3_ms() -> u32 {
    5000
}

fn default_p2_ms() -> u16 {
    25
}

fn default_p2_star_ms() -> u32 {
    5000
}

fn default_seed_len() -> usize {
    4
}

fn default_max_block_length() -> u16 {
    4095
}

impl Default for DiagConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            s3_ms: default_s3_ms(),
            p2_ms: default_p2_ms(),
            p2_star_ms: default_p2_star_ms(),
            seed_len: default_seed_len(),
            max_block_length: default_max_block_length(),
        }
    }
}

impl DiagConfig {
    pub fn s3_ticks(&self) -> u32 {
        self.s3_ms / self.tick_ms.max(1)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_ms == 0 {
            return Err(ConfigError::Invalid("tick_ms must be nonzero".to_string()));
        }
        if self.s3_ticks() == 0 {
            return Err(ConfigError::Invalid(
                "s3_ms must cover at least one tick".to_string(),
            ));
        }
        if self.seed_len == 0 {
            return Err(ConfigError::Invalid("seed_len must be nonzero".to_string()));
        }
        if self.max_block_length < 3 {
            return Err(ConfigError::Invalid(
                "max_block_length must leave room for data".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Flash layout and job pacing
// =============================================================================

/// One A/B slot: its status record sector and its application region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotConfig {
    pub record_address: u32,
    pub app_base: u32,
    pub app_size: u32,
}

impl SlotConfig {
    pub fn app_end(&self) -> u32 {
        self.app_base + self.app_size
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlashConfig {
    /// Share of the S3 window that erasing may use before asking for more time
    #[serde(default = "default_s3_watermark_pct")]
    pub s3_watermark_pct: u32,

    /// Worst-case duration of a single sector erase
    #[serde(default = "default_sector_erase_ms")]
    pub sector_erase_ms: u32,

    /// Bytes programmed per scheduler pass
    #[serde(default = "default_program_chunk")]
    pub program_chunk: usize,

    /// Bytes fed to the CRC per scheduler pass
    #[serde(default = "default_checksum_chunk")]
    pub checksum_chunk: usize,

    /// Address the application is linked at; downloads use this address space
    #[serde(default = "default_download_base")]
    pub download_base: u32,

    #[serde(default = "default_sector_size")]
    pub sector_size: u32,

    #[serde(default = "default_flash_size")]
    pub flash_size: u32,

    #[serde(default = "default_slot_a")]
    pub slot_a: SlotConfig,

    #[serde(default = "default_slot_b")]
    pub slot_b: SlotConfig,
}

fn default_s3_watermark_pct() -> u32 {
    50
}

fn default_sector_erase_ms() -> u32 {
    100
}

fn default_program_chunk() -> usize {
    256
}

fn default_checksum_chunk() -> usize {
    1024
}

fn default_download_base() -> u32 {
    0x0800_0000
}

fn default_sector_size() -> u32 {
    0x1000
}

fn default_flash_size() -> u32 {
    0x4_0000
}

fn default_slot_a() -> SlotConfig {
    SlotConfig {
        record_address: 0x0000_4000,
        app_base: 0x0000_5000,
        app_size: 0x0001_B000,
    }
}

fn default_slot_b() -> SlotConfig {
    SlotConfig {
        record_address: 0x0002_0000,
        app_base: 0x0002_1000,
        app_size: 0x0001_B000,
    }
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            s3_watermark_pct: default_s3_watermark_pct(),
            sector_erase_ms: default_sector_erase_ms(),
            program_chunk: default_program_chunk(),
            checksum_chunk: default_checksum_chunk(),
            download_base: default_download_base(),
            sector_size: default_sector_size(),
            flash_size: default_flash_size(),
            slot_a: default_slot_a(),
            slot_b: default_slot_b(),
        }
    }
}

impl FlashConfig {
    pub fn slot(&self, slot: Slot) -> &SlotConfig {
        match slot {
            Slot::A => &self.slot_a,
            Slot::B => &self.slot_b,
        }
    }

    /// Sectors that fit into one S3 watermark window (at least one)
    pub fn erase_budget(&self, s3_ms: u32) -> u32 {
        let window = (s3_ms as u64 * self.s3_watermark_pct as u64 / 100) as u32;
        (window / self.sector_erase_ms.max(1)).max(1)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.sector_size == 0 {
            return Err(ConfigError::Invalid("sector_size must be nonzero".to_string()));
        }
        if self.s3_watermark_pct == 0 || self.s3_watermark_pct > 100 {
            return Err(ConfigError::Invalid(format!(
                "s3_watermark_pct {} outside 1..=100",
                self.s3_watermark_pct
            )));
        }
        if self.sector_erase_ms == 0 || self.program_chunk == 0 || self.checksum_chunk == 0 {
            return Err(ConfigError::Invalid(
                "sector_erase_ms, program_chunk and checksum_chunk must be nonzero".to_string(),
            ));
        }

        for (name, slot) in [("slot_a", &self.slot_a), ("slot_b", &self.slot_b)] {
            let aligned = |value: u32| value % self.sector_size == 0;
            if !aligned(slot.record_address) || !aligned(slot.app_base) || !aligned(slot.app_size)
            {
                return Err(ConfigError::Invalid(format!(
                    "{} is not sector aligned",
                    name
                )));
            }
            if slot.app_size == 0 {
                return Err(ConfigError::Invalid(format!("{} has an empty application region", name)));
            }
            let end = slot.app_base as u64 + slot.app_size as u64;
            if end > self.flash_size as u64 || slot.record_address >= self.flash_size {
                return Err(ConfigError::Invalid(format!("{} exceeds the flash size", name)));
            }
            if slot.record_address >= slot.app_base && slot.record_address < slot.app_end() {
                return Err(ConfigError::Invalid(format!(
                    "{} record sector overlaps its application region",
                    name
                )));
            }
        }

        let (a, b) = (&self.slot_a, &self.slot_b);
        if a.app_base < b.app_end() && b.app_base < a.app_end() {
            return Err(ConfigError::Invalid(
                "slot application regions overlap".to_string(),
            ));
        }
        if a.record_address == b.record_address {
            return Err(ConfigError::Invalid(
                "slots share a record sector".to_string(),
            ));
        }
        if (a.record_address >= b.app_base && a.record_address < b.app_end())
            || (b.record_address >= a.app_base && b.record_address < a.app_end())
        {
            return Err(ConfigError::Invalid(
                "record sector overlaps the other slot".to_string(),
            ));
        }
        Ok(())
    }
}

/// Complete configuration of the diagnostic server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UdsConfig {
    #[serde(default)]
    pub diag: DiagConfig,
    #[serde(default)]
    pub flash: FlashConfig,
}

impl UdsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.diag.validate()?;
        self.flash.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(UdsConfig::default().validate().is_ok());
    }

    #[test]
    fn test_erase_budget() {
        let config = FlashConfig::default();
        // 50% of 5000 ms over 100 ms per sector
        assert_eq!(config.erase_budget(5000), 25);

        let slow = FlashConfig {
            sector_erase_ms: 10_000,
            ..Default::default()
        };
        assert_eq!(slow.erase_budget(5000), 1);
    }

    #[test]
    fn test_overlapping_slots_rejected() {
        let config = UdsConfig {
            flash: FlashConfig {
                slot_b: SlotConfig {
                    record_address: 0x0002_0000,
                    app_base: 0x0001_0000,
                    app_size: 0x0001_0000,
                },
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_misaligned_slot_rejected() {
        let mut config = UdsConfig::default();
        config.flash.slot_a.app_base = 0x5001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_from_toml() {
        let config: UdsConfig = toml::from_str(
            r#"
            [diag]
            s3_ms = 3000

            [flash]
            sector_erase_ms = 50

            [flash.slot_a]
            record_address = 0x4000
            app_base = 0x5000
            app_size = 0x1B000
            "#,
        )
        .unwrap();
        assert_eq!(config.diag.s3_ms, 3000);
        assert_eq!(config.diag.seed_len, 4);
        assert_eq!(config.flash.sector_erase_ms, 50);
        assert_eq!(config.flash.slot_b, default_slot_b());
        assert!(config.validate().is_ok());
    }
}
