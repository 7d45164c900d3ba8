use thiserror::Error;

#[derive(Debug, Error)]
pub enum StackError {
    // Physical layer errors
    #[error("Link error: {0}")]
    LinkError(String),

    // Transport layer errors
    #[error("ISO-TP error: {0}")]
    IsoTpError(String),
    #[error("Message too large ({len} bytes, maximum is {max})")]
    TooLarge { len: usize, max: usize },
    #[error("Transmission already in progress")]
    TransmissionInProgress,
    #[error("Malformed frame: {0}")]
    Malformed(String),

    // Application layer errors
    #[error("Device error: {0}")]
    DeviceError(String),

    // Generic errors
    #[error("Operation timed out")]
    Timeout,
    #[error("Invalid parameter: {0}")]
    InvalidParameter(&'static str),
    #[error("Component not initialized")]
    NotInitialized,
}

pub type Result<T> = std::result::Result<T, StackError>;
