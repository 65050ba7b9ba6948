//! Protocol error type.

use devauth_crypto::CryptoError;
use thiserror::Error;

/// Failure of a protocol step. Any of these aborts the exchange; duplicates
/// are not errors (see [`crate::task::Outcome::Ignore`]).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("allocation failure: {0}")]
    AllocFailure(String),

    #[error("bad message: {0}")]
    BadMessage(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("crypto failure: {0}")]
    CryptoFailure(#[from] CryptoError),

    #[error("missing or malformed field: {0}")]
    JsonAccessFailure(String),

    #[error("peer reported error {0:#06x}")]
    PeerReported(i64),
}

impl ProtocolError {
    pub fn alloc(msg: impl std::fmt::Display) -> Self {
        Self::AllocFailure(msg.to_string())
    }

    pub fn bad_message(msg: impl std::fmt::Display) -> Self {
        Self::BadMessage(msg.to_string())
    }

    pub fn invalid_params(msg: impl std::fmt::Display) -> Self {
        Self::InvalidParams(msg.to_string())
    }

    pub fn json(field: impl std::fmt::Display) -> Self {
        Self::JsonAccessFailure(field.to_string())
    }

    /// Stable numeric code carried in `errorCode` of an error notice.
    pub fn code(&self) -> i64 {
        match self {
            Self::AllocFailure(_) => 0x0001,
            Self::BadMessage(_) => 0x0002,
            Self::InvalidParams(_) => 0x0003,
            Self::CryptoFailure(_) => 0x0004,
            Self::JsonAccessFailure(_) => 0x0005,
            Self::PeerReported(code) => *code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct() {
        let errors = [
            ProtocolError::alloc("x"),
            ProtocolError::bad_message("x"),
            ProtocolError::invalid_params("x"),
            ProtocolError::from(CryptoError::VerificationFailed),
            ProtocolError::json("x"),
        ];
        let mut codes: Vec<i64> = errors.iter().map(ProtocolError::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_peer_reported_keeps_code() {
        assert_eq!(ProtocolError::PeerReported(0x42).code(), 0x42);
    }
}
