use thiserror::Error;

/// Top-level error type for netpresence.
#[derive(Error, Debug)]
pub enum PresenceError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Expiry {value} out of range [1, 2678400]")]
    ExpiryOutOfRange { value: u32 },

    #[error("Unknown expiry unit: {0}")]
    UnknownUnit(String),

    #[error("Identifier {id} does not belong to this installation")]
    ForeignIdentifier { id: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PresenceError>;
