//! Errors raised outside the protocol machines.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Configuration loading and wire-vocabulary lookup failures. Protocol steps
/// report through `devauth_core::ProtocolError` instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The config file is not valid JSON for [`crate::DevAuthConfig`].
    #[error("malformed config: {0}")]
    Serialization(String),

    /// Parsed, but a value is out of range.
    #[error("invalid config: {0}")]
    Config(String),

    /// Operation code, user type or algorithm name not known on this side.
    #[error("unknown value: {0}")]
    UnknownValue(String),
}

impl Error {
    pub fn serialization(msg: impl std::fmt::Display) -> Self {
        Self::Serialization(msg.to_string())
    }

    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }

    pub fn unknown_value(msg: impl std::fmt::Display) -> Self {
        Self::UnknownValue(msg.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err)
    }
}
