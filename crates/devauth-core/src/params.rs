//! Per-exchange parameters owned by a task.

use devauth_common::{
    helpers::constant_time_eq, OperationCode, PakeAlg, UserType, CHALLENGE_LEN, DEFAULT_KEY_LENGTH,
    ISO_SALT_LEN, ISO_SEED_LEN, MAX_AUTH_ID_LEN, MAX_KEY_LENGTH, MIN_KEY_LENGTH, PAKE_EPK_LEN,
    PAKE_SALT_LEN,
};
use devauth_crypto::pake::{EphemeralSecret, KCF_KEY_LEN};
use devauth_crypto::{SecretArray, SecretBytes};

use crate::error::ProtocolError;

/// State shared by every machine.
#[derive(Debug)]
pub struct ExchangeParams {
    pub op_code: OperationCode,
    pub auth_id_self: Vec<u8>,
    /// Expected peer id for authenticate/unbind, learned during bind.
    pub auth_id_peer: Option<Vec<u8>>,
    pub rand_self: Option<[u8; ISO_SALT_LEN]>,
    pub rand_peer: Option<[u8; ISO_SALT_LEN]>,
    pub challenge_self: Option<[u8; CHALLENGE_LEN]>,
    pub challenge_peer: Option<[u8; CHALLENGE_LEN]>,
    /// PIN for bind, stored auth key otherwise.
    pub secret: SecretBytes,
    pub psk: Option<SecretBytes>,
    pub key_len: usize,
    pub session_key: Option<SecretBytes>,
}

impl ExchangeParams {
    pub fn new(op_code: OperationCode, auth_id_self: impl Into<Vec<u8>>, secret: SecretBytes) -> Self {
        Self {
            op_code,
            auth_id_self: auth_id_self.into(),
            auth_id_peer: None,
            rand_self: None,
            rand_peer: None,
            challenge_self: None,
            challenge_peer: None,
            secret,
            psk: None,
            key_len: DEFAULT_KEY_LENGTH,
            session_key: None,
        }
    }

    pub fn with_peer(mut self, auth_id_peer: impl Into<Vec<u8>>) -> Self {
        self.auth_id_peer = Some(auth_id_peer.into());
        self
    }

    pub fn with_key_len(mut self, key_len: usize) -> Self {
        self.key_len = key_len;
        self
    }

    /// Checks a caller can get wrong before any message is exchanged.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.auth_id_self.is_empty() || self.auth_id_self.len() > MAX_AUTH_ID_LEN {
            return Err(ProtocolError::invalid_params("auth id length"));
        }
        if self.op_code.requires_known_peer() && self.auth_id_peer.is_none() {
            return Err(ProtocolError::invalid_params(
                "peer auth id required for authenticate/unbind",
            ));
        }
        validate_key_len(self.key_len)?;
        Ok(())
    }

    /// Bind learns the peer id; other operations must see the stored one.
    pub fn accept_peer_id(&mut self, peer_id: Vec<u8>) -> Result<(), ProtocolError> {
        if peer_id.is_empty() || peer_id.len() > MAX_AUTH_ID_LEN {
            return Err(ProtocolError::invalid_params("peer auth id length"));
        }
        match &self.auth_id_peer {
            Some(expected) if self.op_code.requires_known_peer() => {
                if constant_time_eq(expected, &peer_id) {
                    Ok(())
                } else {
                    Err(ProtocolError::invalid_params("peer auth id mismatch"))
                }
            }
            Some(learned) => {
                if constant_time_eq(learned, &peer_id) {
                    Ok(())
                } else {
                    Err(ProtocolError::invalid_params("peer auth id changed"))
                }
            }
            None => {
                self.auth_id_peer = Some(peer_id);
                Ok(())
            }
        }
    }

    pub fn peer_id(&self) -> Result<&[u8], ProtocolError> {
        self.auth_id_peer
            .as_deref()
            .ok_or_else(|| ProtocolError::invalid_params("peer auth id unknown"))
    }

    pub fn psk(&self) -> Result<&[u8], ProtocolError> {
        self.psk
            .as_ref()
            .map(SecretBytes::expose)
            .ok_or_else(|| ProtocolError::invalid_params("psk not derived"))
    }

    /// Drop derived material after a failed step.
    pub fn abort(&mut self) {
        if let Some(psk) = self.psk.as_mut() {
            psk.wipe();
        }
        if let Some(key) = self.session_key.as_mut() {
            key.wipe();
        }
        self.psk = None;
        self.session_key = None;
    }

    /// Zero every secret in place. Buffers keep their length so the result
    /// can be inspected until the params are dropped.
    pub fn clear_secrets(&mut self) {
        self.secret.wipe();
        if let Some(psk) = self.psk.as_mut() {
            psk.wipe();
        }
        if let Some(key) = self.session_key.as_mut() {
            key.wipe();
        }
    }
}

pub fn validate_key_len(key_len: usize) -> Result<(), ProtocolError> {
    if (MIN_KEY_LENGTH..=MAX_KEY_LENGTH).contains(&key_len) {
        Ok(())
    } else {
        Err(ProtocolError::invalid_params(format!(
            "key length {key_len} outside {MIN_KEY_LENGTH}..={MAX_KEY_LENGTH}"
        )))
    }
}

/// ISO exchange parameters.
#[derive(Debug)]
pub struct IsoParams {
    pub base: ExchangeParams,
    pub seed: Option<[u8; ISO_SEED_LEN]>,
    pub user_type_self: UserType,
    pub user_type_peer: Option<UserType>,
    pub pkg_name: String,
    pub service_type: String,
}

impl IsoParams {
    pub fn new(base: ExchangeParams, user_type_self: UserType) -> Self {
        Self {
            base,
            seed: None,
            user_type_self,
            user_type_peer: None,
            pkg_name: String::new(),
            service_type: String::new(),
        }
    }

    pub fn with_service(mut self, pkg_name: impl Into<String>, service_type: impl Into<String>) -> Self {
        self.pkg_name = pkg_name.into();
        self.service_type = service_type.into();
        self
    }
}

/// PAKE exchange parameters.
#[derive(Debug)]
pub struct PakeParams {
    pub base: ExchangeParams,
    /// Locally supported set before negotiation, intersection after.
    pub alg: PakeAlg,
    pub salt: Option<[u8; PAKE_SALT_LEN]>,
    pub esk: Option<EphemeralSecret>,
    pub epk_self: Option<[u8; PAKE_EPK_LEN]>,
    pub epk_peer: Option<[u8; PAKE_EPK_LEN]>,
    pub kcf_key: Option<SecretArray<KCF_KEY_LEN>>,
}

impl PakeParams {
    pub fn new(base: ExchangeParams, alg: PakeAlg) -> Self {
        Self {
            base,
            alg,
            salt: None,
            esk: None,
            epk_self: None,
            epk_peer: None,
            kcf_key: None,
        }
    }

    /// Narrow the local set to what the peer offered. EC_SPEKE is mandatory.
    pub fn negotiate(&mut self, offered: i64) -> Result<PakeAlg, ProtocolError> {
        let offered = u32::try_from(offered)
            .map(PakeAlg::from_bits_truncate)
            .map_err(|_| ProtocolError::invalid_params("supported pake alg"))?;
        let agreed = self.alg & offered;
        if !agreed.contains(PakeAlg::EC_SPEKE) {
            return Err(ProtocolError::invalid_params(format!(
                "no common pake algorithm (local {:?}, peer {:?})",
                self.alg, offered
            )));
        }
        self.alg = agreed;
        Ok(agreed)
    }

    /// The SPEKE password for this exchange.
    pub fn install_psk(&mut self, salt: &[u8]) -> Result<(), ProtocolError> {
        let psk = if self.alg.contains(PakeAlg::PSK_SPEKE) && self.base.op_code.requires_known_peer()
        {
            let derived = devauth_crypto::pake::derive_psk(self.base.secret.expose(), salt)?;
            SecretBytes::from_slice(derived.expose())
        } else {
            self.base.secret.clone()
        };
        self.base.psk = Some(psk);
        Ok(())
    }

    pub fn abort(&mut self) {
        self.base.abort();
        self.esk = None;
        self.kcf_key = None;
    }

    pub fn clear_secrets(&mut self) {
        self.base.clear_secrets();
        if let Some(kcf) = self.kcf_key.as_mut() {
            kcf.wipe();
        }
        self.esk = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(op: OperationCode) -> ExchangeParams {
        ExchangeParams::new(op, b"self".to_vec(), SecretBytes::from_slice(b"123456"))
    }

    #[test]
    fn test_bind_learns_peer_once() {
        let mut p = params(OperationCode::Bind);
        p.accept_peer_id(b"peer".to_vec()).unwrap();
        assert_eq!(p.peer_id().unwrap(), b"peer");
        p.accept_peer_id(b"peer".to_vec()).unwrap();
        assert!(p.accept_peer_id(b"other".to_vec()).is_err());
    }

    #[test]
    fn test_authenticate_requires_matching_peer() {
        let p = params(OperationCode::Authenticate);
        assert!(p.validate().is_err());

        let mut p = p.with_peer(b"peer".to_vec());
        p.validate().unwrap();
        p.accept_peer_id(b"peer".to_vec()).unwrap();
        assert_eq!(
            p.accept_peer_id(b"intruder".to_vec()).unwrap_err(),
            ProtocolError::invalid_params("peer auth id mismatch")
        );
    }

    #[test]
    fn test_key_len_bounds() {
        assert!(validate_key_len(MIN_KEY_LENGTH - 1).is_err());
        validate_key_len(MIN_KEY_LENGTH).unwrap();
        validate_key_len(MAX_KEY_LENGTH).unwrap();
        assert!(validate_key_len(MAX_KEY_LENGTH + 1).is_err());
    }

    #[test]
    fn test_clear_secrets_wipes_in_place() {
        let mut p = params(OperationCode::Bind);
        p.psk = Some(SecretBytes::from_slice(&[0xAA; 32]));
        p.session_key = Some(SecretBytes::from_slice(&[0xBB; 32]));
        p.clear_secrets();
        assert!(p.secret.is_wiped());
        assert_eq!(p.secret.len(), 6);
        assert!(p.psk.as_ref().unwrap().is_wiped());
        assert!(p.session_key.as_ref().unwrap().is_wiped());
    }

    #[test]
    fn test_negotiate() {
        let mut p = PakeParams::new(
            params(OperationCode::Authenticate),
            PakeAlg::EC_SPEKE | PakeAlg::PSK_SPEKE,
        );
        let agreed = p.negotiate(PakeAlg::EC_SPEKE.bits() as i64).unwrap();
        assert_eq!(agreed, PakeAlg::EC_SPEKE);

        let mut p = PakeParams::new(params(OperationCode::Bind), PakeAlg::EC_SPEKE);
        assert!(p.negotiate(PakeAlg::PSK_SPEKE.bits() as i64).is_err());
        assert!(p.negotiate(-1).is_err());
    }

    #[test]
    fn test_psk_speke_only_for_known_peer() {
        let mut bind = PakeParams::new(params(OperationCode::Bind), PakeAlg::all());
        bind.install_psk(&[1u8; 16]).unwrap();
        assert_eq!(bind.base.psk().unwrap(), b"123456");

        let mut auth = PakeParams::new(
            params(OperationCode::Authenticate).with_peer(b"peer".to_vec()),
            PakeAlg::all(),
        );
        auth.install_psk(&[1u8; 16]).unwrap();
        assert_eq!(auth.base.psk().unwrap().len(), 32);
        assert_ne!(auth.base.psk().unwrap(), b"123456");
    }
}
