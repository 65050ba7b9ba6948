//! EC-SPEKE over Ristretto255.
//!
//! The password-derived generator is hashed to the group with SHA-512, so
//! the discrete log of `G` is unknown to both parties. Shared points that
//! decode to the identity are rejected.

use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::traits::Identity;
use curve25519_dalek::Scalar;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};
use zeroize::{Zeroize, ZeroizeOnDrop};

use devauth_common::{KCF_DATA_LEN, PAKE_EPK_LEN};

use crate::error::CryptoError;
use crate::random_array;
use crate::secret::{SecretArray, SecretBytes};

type HmacSha256 = Hmac<Sha256>;

const DSI: &[u8] = b"devauth-EC-SPEKE-Ristretto255";
const PSK_LABEL: &[u8] = b"devauth pake psk";
const KCF_INFO: &[u8] = b"devauth pake kcf";
const RETURN_KEY_INFO: &[u8] = b"devauth pake return key";

pub const PSK_LEN: usize = 32;
pub const KCF_KEY_LEN: usize = 32;

/// LEB128 length prefix followed by the data.
pub(crate) fn prepend_len(data: &[u8]) -> Vec<u8> {
    let mut length = data.len();
    let mut encoded = Vec::with_capacity(data.len() + 2);
    loop {
        if length < 128 {
            encoded.push(length as u8);
        } else {
            encoded.push((length & 0x7f) as u8 + 0x80);
        }
        length >>= 7;
        if length == 0 {
            break;
        }
    }
    encoded.extend_from_slice(data);
    encoded
}

/// `psk = HMAC(auth_key, "devauth pake psk" || salt)`, used when both sides
/// negotiated PSK_SPEKE.
pub fn derive_psk(auth_key: &[u8], salt: &[u8]) -> Result<SecretArray<PSK_LEN>, CryptoError> {
    let mut mac =
        HmacSha256::new_from_slice(auth_key).map_err(|_| CryptoError::InvalidKeyLength)?;
    mac.update(PSK_LABEL);
    mac.update(salt);
    let mut psk = [0u8; PSK_LEN];
    psk.copy_from_slice(&mac.finalize().into_bytes());
    Ok(SecretArray::new(psk))
}

fn generator(psk: &[u8], salt: &[u8]) -> RistrettoPoint {
    let mut hasher = Sha512::new();
    hasher.update(prepend_len(DSI));
    hasher.update(prepend_len(psk));
    hasher.update(prepend_len(salt));
    let mut wide = [0u8; 64];
    wide.copy_from_slice(&hasher.finalize());
    let point = RistrettoPoint::from_uniform_bytes(&wide);
    wide.zeroize();
    point
}

/// Ephemeral SPEKE scalar. Zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct EphemeralSecret {
    scalar: Scalar,
}

impl EphemeralSecret {
    pub fn generate() -> Result<Self, CryptoError> {
        let mut wide: [u8; 64] = random_array()?;
        let scalar = Scalar::from_bytes_mod_order_wide(&wide);
        wide.zeroize();
        Ok(Self { scalar })
    }

    /// `esk * G(psk, salt)`, compressed.
    pub fn public_key(&self, psk: &[u8], salt: &[u8]) -> [u8; PAKE_EPK_LEN] {
        (generator(psk, salt) * self.scalar).compress().to_bytes()
    }

    /// `esk * epk_peer`. Fails on malformed points and on the identity.
    pub fn shared_secret(&self, peer_epk: &[u8]) -> Result<SecretArray<32>, CryptoError> {
        let bytes: [u8; PAKE_EPK_LEN] = peer_epk
            .try_into()
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        let peer = CompressedRistretto(bytes)
            .decompress()
            .ok_or(CryptoError::InvalidPublicKey)?;
        if peer == RistrettoPoint::identity() {
            return Err(CryptoError::InvalidPublicKey);
        }

        let shared = peer * self.scalar;
        if shared == RistrettoPoint::identity() {
            return Err(CryptoError::InvalidPublicKey);
        }
        Ok(SecretArray::new(shared.compress().to_bytes()))
    }
}

impl std::fmt::Debug for EphemeralSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EphemeralSecret([REDACTED])")
    }
}

/// Keys derived from the shared point.
#[derive(Debug)]
pub struct SessionKeys {
    pub kcf_key: SecretArray<KCF_KEY_LEN>,
    pub return_key: SecretBytes,
}

pub fn derive_session_keys(
    shared: &SecretArray<32>,
    salt: &[u8],
    key_len: usize,
) -> Result<SessionKeys, CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), shared.expose());

    let mut kcf = [0u8; KCF_KEY_LEN];
    hk.expand(KCF_INFO, &mut kcf)
        .map_err(|_| CryptoError::KeyDerivation(KCF_KEY_LEN))?;
    let kcf_key = SecretArray::new(kcf);
    kcf.zeroize();

    let mut okm = vec![0u8; key_len];
    hk.expand(RETURN_KEY_INFO, &mut okm)
        .map_err(|_| CryptoError::KeyDerivation(key_len))?;

    Ok(SessionKeys {
        kcf_key,
        return_key: SecretBytes::new(okm),
    })
}

/// Key-confirmation transcript. Each side MACs its own values first.
#[derive(Debug, Clone, Copy)]
pub struct ConfirmTranscript<'a> {
    pub challenge_client: &'a [u8],
    pub challenge_server: &'a [u8],
    pub epk_client: &'a [u8],
    pub epk_server: &'a [u8],
}

impl ConfirmTranscript<'_> {
    fn mac(kcf_key: &[u8], parts: [&[u8]; 4]) -> Result<HmacSha256, CryptoError> {
        let mut mac =
            HmacSha256::new_from_slice(kcf_key).map_err(|_| CryptoError::InvalidKeyLength)?;
        for part in parts {
            mac.update(part);
        }
        Ok(mac)
    }

    fn client_parts(&self) -> [&[u8]; 4] {
        [
            self.challenge_client,
            self.challenge_server,
            self.epk_client,
            self.epk_server,
        ]
    }

    fn server_parts(&self) -> [&[u8]; 4] {
        [
            self.challenge_server,
            self.challenge_client,
            self.epk_server,
            self.epk_client,
        ]
    }

    pub fn client_kcf(&self, kcf_key: &[u8]) -> Result<[u8; KCF_DATA_LEN], CryptoError> {
        let mut out = [0u8; KCF_DATA_LEN];
        out.copy_from_slice(&Self::mac(kcf_key, self.client_parts())?.finalize().into_bytes());
        Ok(out)
    }

    pub fn server_kcf(&self, kcf_key: &[u8]) -> Result<[u8; KCF_DATA_LEN], CryptoError> {
        let mut out = [0u8; KCF_DATA_LEN];
        out.copy_from_slice(&Self::mac(kcf_key, self.server_parts())?.finalize().into_bytes());
        Ok(out)
    }

    pub fn verify_client_kcf(&self, kcf_key: &[u8], kcf_data: &[u8]) -> Result<(), CryptoError> {
        Self::mac(kcf_key, self.client_parts())?
            .verify_slice(kcf_data)
            .map_err(|_| CryptoError::VerificationFailed)
    }

    pub fn verify_server_kcf(&self, kcf_key: &[u8], kcf_data: &[u8]) -> Result<(), CryptoError> {
        Self::mac(kcf_key, self.server_parts())?
            .verify_slice(kcf_data)
            .map_err(|_| CryptoError::VerificationFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SALT: [u8; 16] = [3u8; 16];

    #[test]
    fn test_prepend_len() {
        assert_eq!(prepend_len(b"ab"), vec![2, b'a', b'b']);
        let long = vec![0u8; 200];
        let encoded = prepend_len(&long);
        assert_eq!(&encoded[..2], &[0xC8, 0x01]);
        assert_eq!(encoded.len(), 202);
    }

    #[test]
    fn test_same_password_agrees() {
        let a = EphemeralSecret::generate().unwrap();
        let b = EphemeralSecret::generate().unwrap();
        let epk_a = a.public_key(b"123456", &SALT);
        let epk_b = b.public_key(b"123456", &SALT);

        let k_a = a.shared_secret(&epk_b).unwrap();
        let k_b = b.shared_secret(&epk_a).unwrap();
        assert_eq!(k_a.expose(), k_b.expose());
    }

    #[test]
    fn test_different_password_disagrees() {
        let a = EphemeralSecret::generate().unwrap();
        let b = EphemeralSecret::generate().unwrap();
        let epk_a = a.public_key(b"123456", &SALT);
        let epk_b = b.public_key(b"000000", &SALT);

        let k_a = a.shared_secret(&epk_b).unwrap();
        let k_b = b.shared_secret(&epk_a).unwrap();
        assert_ne!(k_a.expose(), k_b.expose());
    }

    #[test]
    fn test_identity_and_garbage_points_rejected() {
        let a = EphemeralSecret::generate().unwrap();
        let identity = RistrettoPoint::identity().compress().to_bytes();
        assert_eq!(
            a.shared_secret(&identity).unwrap_err(),
            CryptoError::InvalidPublicKey
        );
        assert_eq!(
            a.shared_secret(&[0xFFu8; 32]).unwrap_err(),
            CryptoError::InvalidPublicKey
        );
        assert_eq!(
            a.shared_secret(&[1u8; 31]).unwrap_err(),
            CryptoError::InvalidPublicKey
        );
    }

    #[test]
    fn test_kcf_round_trip_and_direction() {
        let shared = SecretArray::new([5u8; 32]);
        let keys = derive_session_keys(&shared, &SALT, 32).unwrap();
        let t = ConfirmTranscript {
            challenge_client: &[1u8; 16],
            challenge_server: &[2u8; 16],
            epk_client: &[3u8; 32],
            epk_server: &[4u8; 32],
        };
        let kcf = keys.kcf_key.expose();
        let client = t.client_kcf(kcf).unwrap();
        let server = t.server_kcf(kcf).unwrap();
        assert_ne!(client, server);
        t.verify_client_kcf(kcf, &client).unwrap();
        t.verify_server_kcf(kcf, &server).unwrap();
        assert!(t.verify_server_kcf(kcf, &client).is_err());
    }

    #[test]
    fn test_return_key_length_and_independence() {
        let shared = SecretArray::new([5u8; 32]);
        let keys = derive_session_keys(&shared, &SALT, 64).unwrap();
        assert_eq!(keys.return_key.len(), 64);
        assert_ne!(&keys.return_key.expose()[..32], keys.kcf_key.expose());
    }

    #[test]
    fn test_psk_depends_on_salt() {
        let a = derive_psk(b"auth-key", &[1u8; 16]).unwrap();
        let b = derive_psk(b"auth-key", &[2u8; 16]).unwrap();
        assert_ne!(a.expose(), b.expose());
    }
}
