//! Error types for the presence-monitor crate.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} reported an error: {stderr}")]
    CommandFailed { program: String, stderr: String },

    #[error("All {batches} ping batches failed")]
    SweepFailed { batches: usize },

    #[error("Device error: {0}")]
    Presence(#[from] presence_core::PresenceError),
}

pub type Result<T> = std::result::Result<T, MonitorError>;
