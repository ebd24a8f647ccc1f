use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Interval {kind} must be at least {min} seconds (got {seconds})")]
    InvalidInterval { kind: String, seconds: u64, min: u64 },

    #[error("Unknown interval type: {0}")]
    UnknownInterval(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
