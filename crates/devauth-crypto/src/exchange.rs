//! Sealing for the unbind standard exchange.
//!
//! The exchange key is derived from the PAKE session key and both
//! challenges; requests and results are sealed with ChaCha20-Poly1305 under
//! a fresh 12-byte nonce and a direction-specific AAD.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use sha2::Sha256;

use devauth_common::EXCHANGE_NONCE_LEN;

use crate::error::CryptoError;
use crate::random_array;
use crate::secret::{SecretArray, SecretBytes};

pub const EXCHANGE_KEY_LEN: usize = 32;

const EXCHANGE_INFO: &[u8] = b"devauth unbind exchange";

/// AAD for the client's removal request.
pub const REQUEST_AAD: &[u8] = b"devauth unbind request";
/// AAD for the server's removal result.
pub const RESULT_AAD: &[u8] = b"devauth unbind result";

pub fn derive_exchange_key(
    session_key: &[u8],
    challenge_client: &[u8],
    challenge_server: &[u8],
) -> Result<SecretArray<EXCHANGE_KEY_LEN>, CryptoError> {
    if session_key.is_empty() {
        return Err(CryptoError::InvalidKeyLength);
    }
    let mut salt = Vec::with_capacity(challenge_client.len() + challenge_server.len());
    salt.extend_from_slice(challenge_client);
    salt.extend_from_slice(challenge_server);

    let hk = Hkdf::<Sha256>::new(Some(&salt), session_key);
    let mut key = [0u8; EXCHANGE_KEY_LEN];
    hk.expand(EXCHANGE_INFO, &mut key)
        .map_err(|_| CryptoError::KeyDerivation(EXCHANGE_KEY_LEN))?;
    Ok(SecretArray::new(key))
}

pub fn generate_nonce() -> Result<[u8; EXCHANGE_NONCE_LEN], CryptoError> {
    random_array()
}

pub fn seal(
    key: &SecretArray<EXCHANGE_KEY_LEN>,
    nonce: &[u8; EXCHANGE_NONCE_LEN],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.expose()));
    cipher
        .encrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| CryptoError::Encryption)
}

/// Open a sealed message. The plaintext is returned in a zeroizing buffer.
pub fn open(
    key: &SecretArray<EXCHANGE_KEY_LEN>,
    nonce: &[u8],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<SecretBytes, CryptoError> {
    if nonce.len() != EXCHANGE_NONCE_LEN {
        return Err(CryptoError::Decryption);
    }
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.expose()));
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map(SecretBytes::new)
        .map_err(|_| CryptoError::Decryption)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SecretArray<EXCHANGE_KEY_LEN> {
        derive_exchange_key(&[0x42u8; 32], &[1u8; 16], &[2u8; 16]).unwrap()
    }

    #[test]
    fn test_seal_open() {
        let key = key();
        let nonce = generate_nonce().unwrap();
        let sealed = seal(&key, &nonce, REQUEST_AAD, b"{\"authId\":\"AB\"}").unwrap();
        let opened = open(&key, &nonce, REQUEST_AAD, &sealed).unwrap();
        assert_eq!(opened.expose(), b"{\"authId\":\"AB\"}");
    }

    #[test]
    fn test_direction_is_bound() {
        let key = key();
        let nonce = generate_nonce().unwrap();
        let sealed = seal(&key, &nonce, REQUEST_AAD, b"payload").unwrap();
        assert_eq!(
            open(&key, &nonce, RESULT_AAD, &sealed).unwrap_err(),
            CryptoError::Decryption
        );
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = key();
        let nonce = generate_nonce().unwrap();
        let mut sealed = seal(&key, &nonce, REQUEST_AAD, b"payload").unwrap();
        sealed[0] ^= 0x01;
        assert!(open(&key, &nonce, REQUEST_AAD, &sealed).is_err());
    }

    #[test]
    fn test_short_nonce_fails_closed() {
        let key = key();
        assert_eq!(
            open(&key, &[0u8; 4], REQUEST_AAD, &[0u8; 32]).unwrap_err(),
            CryptoError::Decryption
        );
    }

    #[test]
    fn test_key_depends_on_challenges() {
        let a = derive_exchange_key(&[0x42u8; 32], &[1u8; 16], &[2u8; 16]).unwrap();
        let b = derive_exchange_key(&[0x42u8; 32], &[2u8; 16], &[1u8; 16]).unwrap();
        assert_ne!(a.expose(), b.expose());
        assert!(derive_exchange_key(&[], &[1u8; 16], &[2u8; 16]).is_err());
    }
}
