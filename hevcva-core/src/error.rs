//! Error kinds reported by the decode session.

use thiserror::Error;

use crate::va::VaError;

#[derive(Debug, Error)]
pub enum DecodeError {
    /// Stream file missing, unreadable or empty.
    #[error("I/O error: {0}")]
    Io(String),
    /// Render device or VA display could not be opened or initialized.
    #[error("Device error: {0}")]
    Device(String),
    /// Profile/entrypoint unsupported by the driver, or bad session config.
    #[error("Config error: {0}")]
    Config(String),
    /// Surface or context creation failed.
    #[error("Allocation error: {0}")]
    Allocation(String),
    /// Begin/render/end picture failed.
    #[error("Submission error: {0}")]
    Submission(String),
    #[error("Sync error: {0}")]
    Sync(String),
    /// Derive, create, get or map of the surface image failed.
    #[error("Export error: {0}")]
    Export(String),
    /// Stream or surface layout the pipeline cannot handle.
    #[error("Format error: {0}")]
    Format(String),
    #[error("Decoder not initialized")]
    NotInitialized,
}

pub type Result<T> = std::result::Result<T, DecodeError>;

impl DecodeError {
    pub(crate) fn device(err: VaError) -> Self {
        Self::Device(err.to_string())
    }

    pub(crate) fn config(err: VaError) -> Self {
        Self::Config(err.to_string())
    }

    pub(crate) fn allocation(err: VaError) -> Self {
        Self::Allocation(err.to_string())
    }

    pub(crate) fn export(err: VaError) -> Self {
        Self::Export(err.to_string())
    }
}

impl From<std::io::Error> for DecodeError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
