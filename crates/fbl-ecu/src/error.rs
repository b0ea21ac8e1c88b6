//! Node errors

use thiserror::Error;

use fbl_uds::FlashError;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Transport(#[from] fbl_cantp::ConfigError),

    #[error(transparent)]
    Diagnostic(#[from] fbl_uds::ConfigError),

    #[error("CAN I/O error: {0}")]
    Can(#[from] fbl_cantp::IoError),

    #[error("Flash error: {0}")]
    Flash(#[from] FlashError),
}

pub type NodeResult<T> = Result<T, NodeError>;
