//! Error types for PetalStream

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PetalStreamError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Audio format error: {0}")]
    AudioFormat(String),

    #[error("Audio loading error: {0}")]
    AudioLoading(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Engine error: {0}")]
    Engine(String),
}

pub type Result<T> = std::result::Result<T, PetalStreamError>;
