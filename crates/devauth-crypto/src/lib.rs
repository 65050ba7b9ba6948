//! Cryptographic primitives for devauth.
//!
//! This crate provides:
//! - Zeroizing secret buffers for keys, PSKs and tokens
//! - ISO token / return-MAC / session-key derivation (HMAC-SHA256, HKDF-SHA256)
//! - EC-SPEKE over Ristretto255 with key-confirmation MACs
//! - ChaCha20-Poly1305 sealing for the unbind standard exchange
//!
//! Every function here is a pure primitive: no message parsing and no
//! protocol state. Ordering of transcript inputs is fixed by the
//! `*Transcript` types so both roles always agree.

#![forbid(unsafe_code)]

pub mod error;
pub mod exchange;
pub mod iso;
pub mod pake;
pub mod secret;

pub use error::CryptoError;
pub use secret::{SecretArray, SecretBytes};

use rand::rngs::OsRng;
use rand::RngCore;

/// Fill a fixed-size array from the OS CSPRNG.
pub fn random_array<const N: usize>() -> Result<[u8; N], CryptoError> {
    let mut out = [0u8; N];
    OsRng
        .try_fill_bytes(&mut out)
        .map_err(|e| CryptoError::Random(e.to_string()))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_array_is_not_constant() {
        let a: [u8; 32] = random_array().unwrap();
        let b: [u8; 32] = random_array().unwrap();
        assert_ne!(a, b);
    }
}
