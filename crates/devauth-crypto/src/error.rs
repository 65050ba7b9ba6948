//! Cryptographic error types.

use thiserror::Error;

/// Errors produced by devauth primitives.
///
/// Verification failures are never transient: callers must treat them as a
/// possible attack and abort the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("random generation failed: {0}")]
    Random(String),

    #[error("invalid key length")]
    InvalidKeyLength,

    #[error("key derivation failed: cannot expand {0} bytes")]
    KeyDerivation(usize),

    #[error("verification failed")]
    VerificationFailed,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("encryption failed")]
    Encryption,

    #[error("decryption failed: authentication tag mismatch")]
    Decryption,
}
