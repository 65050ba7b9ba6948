//! ISO primitives: PSK derivation, mutual tokens, return-code MAC and session
//! key derivation. All MACs are HMAC-SHA256; the session key is HKDF-SHA256.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use devauth_common::{HMAC_LEN, ISO_TOKEN_LEN};

use crate::error::CryptoError;
use crate::pake::prepend_len;
use crate::secret::{SecretArray, SecretBytes};

type HmacSha256 = Hmac<Sha256>;

pub const PSK_LEN: usize = 32;

const SESSION_KEY_INFO: &[u8] = b"devauth iso session key";

fn keyed(key: &[u8], parts: &[&[u8]]) -> Result<HmacSha256, CryptoError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength)?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac)
}

/// Like [`keyed`], with each part length-prefixed so boundaries between
/// variable-length ids cannot shift.
fn keyed_framed(key: &[u8], parts: &[&[u8]]) -> Result<HmacSha256, CryptoError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength)?;
    for part in parts {
        mac.update(&prepend_len(part));
    }
    Ok(mac)
}

/// `psk = HMAC(secret, seed)`.
pub fn derive_psk(secret: &[u8], seed: &[u8]) -> Result<SecretArray<PSK_LEN>, CryptoError> {
    let out = keyed(secret, &[seed])?.finalize().into_bytes();
    let mut psk = [0u8; PSK_LEN];
    psk.copy_from_slice(&out);
    Ok(SecretArray::new(psk))
}

/// The values both tokens are bound to. Field order inside each token is
/// fixed here so client and server cannot disagree.
#[derive(Debug, Clone, Copy)]
pub struct TokenTranscript<'a> {
    pub salt_client: &'a [u8],
    pub salt_server: &'a [u8],
    pub id_client: &'a [u8],
    pub id_server: &'a [u8],
}

impl TokenTranscript<'_> {
    fn server_parts(&self) -> [&[u8]; 4] {
        [self.salt_client, self.salt_server, self.id_server, self.id_client]
    }

    fn client_parts(&self) -> [&[u8]; 4] {
        [self.salt_server, self.salt_client, self.id_client, self.id_server]
    }

    pub fn server_token(&self, psk: &[u8]) -> Result<[u8; ISO_TOKEN_LEN], CryptoError> {
        Ok(finish(keyed_framed(psk, &self.server_parts())?))
    }

    pub fn client_token(&self, psk: &[u8]) -> Result<[u8; ISO_TOKEN_LEN], CryptoError> {
        Ok(finish(keyed_framed(psk, &self.client_parts())?))
    }

    pub fn verify_server_token(&self, psk: &[u8], token: &[u8]) -> Result<(), CryptoError> {
        keyed_framed(psk, &self.server_parts())?
            .verify_slice(token)
            .map_err(|_| CryptoError::VerificationFailed)
    }

    pub fn verify_client_token(&self, psk: &[u8], token: &[u8]) -> Result<(), CryptoError> {
        keyed_framed(psk, &self.client_parts())?
            .verify_slice(token)
            .map_err(|_| CryptoError::VerificationFailed)
    }
}

fn finish(mac: HmacSha256) -> [u8; HMAC_LEN] {
    let mut out = [0u8; HMAC_LEN];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

/// `HMAC(psk, be32(return_code))`.
pub fn return_code_mac(psk: &[u8], return_code: u32) -> Result<[u8; HMAC_LEN], CryptoError> {
    let code = return_code.to_be_bytes();
    Ok(finish(keyed(psk, &[&code[..]])?))
}

pub fn verify_return_code_mac(psk: &[u8], return_code: u32, mac: &[u8]) -> Result<(), CryptoError> {
    let code = return_code.to_be_bytes();
    keyed(psk, &[&code[..]])?
        .verify_slice(mac)
        .map_err(|_| CryptoError::VerificationFailed)
}

/// HKDF over the PSK, salted with both exchange salts (client first).
pub fn session_key(
    psk: &[u8],
    salt_client: &[u8],
    salt_server: &[u8],
    key_len: usize,
) -> Result<SecretBytes, CryptoError> {
    let mut salt = Vec::with_capacity(salt_client.len() + salt_server.len());
    salt.extend_from_slice(salt_client);
    salt.extend_from_slice(salt_server);

    let hk = Hkdf::<Sha256>::new(Some(&salt), psk);
    let mut okm = vec![0u8; key_len];
    hk.expand(SESSION_KEY_INFO, &mut okm)
        .map_err(|_| CryptoError::KeyDerivation(key_len))?;
    Ok(SecretBytes::new(okm))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transcript() -> TokenTranscript<'static> {
        TokenTranscript {
            salt_client: &[1u8; 16],
            salt_server: &[2u8; 16],
            id_client: b"client-device",
            id_server: b"server-device",
        }
    }

    #[test]
    fn test_tokens_verify_and_differ_by_direction() {
        let psk = derive_psk(b"123456", &[9u8; 32]).unwrap();
        let t = transcript();

        let server = t.server_token(psk.expose()).unwrap();
        let client = t.client_token(psk.expose()).unwrap();
        assert_ne!(server, client);

        t.verify_server_token(psk.expose(), &server).unwrap();
        t.verify_client_token(psk.expose(), &client).unwrap();
        assert_eq!(
            t.verify_server_token(psk.expose(), &client),
            Err(CryptoError::VerificationFailed)
        );
    }

    #[test]
    fn test_id_boundary_is_bound() {
        let psk = [7u8; 32];
        let split = |id_client: &'static [u8], id_server: &'static [u8]| TokenTranscript {
            id_client,
            id_server,
            ..transcript()
        };
        let a = split(b"ab", b"c");
        let b = split(b"a", b"bc");
        assert_ne!(a.server_token(&psk).unwrap(), b.server_token(&psk).unwrap());
        assert_ne!(a.client_token(&psk).unwrap(), b.client_token(&psk).unwrap());
        let token = a.client_token(&psk).unwrap();
        assert!(b.verify_client_token(&psk, &token).is_err());
    }

    #[test]
    fn test_wrong_secret_fails_verification() {
        let good = derive_psk(b"123456", &[9u8; 32]).unwrap();
        let bad = derive_psk(b"654321", &[9u8; 32]).unwrap();
        let t = transcript();

        let token = t.server_token(good.expose()).unwrap();
        assert!(t.verify_server_token(bad.expose(), &token).is_err());
    }

    #[test]
    fn test_truncated_token_is_rejected() {
        let psk = derive_psk(b"123456", &[9u8; 32]).unwrap();
        let t = transcript();
        let token = t.client_token(psk.expose()).unwrap();
        assert!(t.verify_client_token(psk.expose(), &token[..16]).is_err());
    }

    #[test]
    fn test_return_code_mac_binds_code() {
        let psk = [7u8; 32];
        let mac = return_code_mac(&psk, 0).unwrap();
        verify_return_code_mac(&psk, 0, &mac).unwrap();
        assert!(verify_return_code_mac(&psk, 1, &mac).is_err());
    }

    #[test]
    fn test_session_key_length_and_salt_order() {
        let psk = [7u8; 32];
        let a = session_key(&psk, &[1u8; 16], &[2u8; 16], 48).unwrap();
        let b = session_key(&psk, &[2u8; 16], &[1u8; 16], 48).unwrap();
        assert_eq!(a.len(), 48);
        assert_ne!(a.expose(), b.expose());
    }

    #[test]
    fn test_session_key_rejects_oversized_output() {
        let psk = [7u8; 32];
        let too_long = 255 * 32 + 1;
        assert_eq!(
            session_key(&psk, &[1u8; 16], &[2u8; 16], too_long).unwrap_err(),
            CryptoError::KeyDerivation(too_long)
        );
    }
}
