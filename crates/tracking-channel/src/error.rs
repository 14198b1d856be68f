use thiserror::Error;

pub type Result<T, E = ChannelError> = core::result::Result<T, E>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("not connected")]
    NotConnected,
    #[error("timeout")]
    Timeout,
    #[error("connection refused: {0}")]
    Refused(String),
    #[error("device not found: {0}")]
    DeviceNotFound(u32),
    #[error("buffer too small, {required} bytes required")]
    InsufficientBuffer { required: usize },
    #[error("no data available: {0}")]
    NotAvailable(&'static str),
    #[error("operation not supported on this backend: {0}")]
    Unsupported(&'static str),
    #[error("I/O error: {0}")]
    Io(String),
}

impl ChannelError {
    /// Poll results that are part of normal operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChannelError::Timeout)
    }
}
