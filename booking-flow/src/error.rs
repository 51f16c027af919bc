use thiserror::Error;

#[derive(Error, Debug)]
pub enum BookingError {
    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("Unknown booking step: {0}")]
    UnknownStep(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Verification request failed: {0}")]
    Verification(String),

    #[error("No payment reference found in query or storage")]
    MissingReference,

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, BookingError>;
