//! Wire-level vocabulary shared by every devauth component: field names,
//! message codes, operation codes and algorithm flags.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// JSON field names used on the wire.
pub mod field {
    pub const MESSAGE: &str = "message";
    pub const AUTH_FORM: &str = "authForm";
    pub const PAYLOAD: &str = "payload";
    pub const OPERATION_CODE: &str = "operationCode";
    pub const ERROR_CODE: &str = "errorCode";

    pub const ISO_SALT: &str = "isoSalt";
    pub const SEED: &str = "seed";
    pub const TOKEN: &str = "token";
    pub const RETURN_CODE_MAC: &str = "returnCodeMac";
    pub const PEER_AUTH_ID: &str = "peerAuthId";
    pub const PEER_USER_TYPE: &str = "peerUserType";
    pub const PKG_NAME: &str = "pkgName";
    pub const SERVICE_TYPE: &str = "serviceType";
    pub const KEY_LENGTH: &str = "keyLength";

    pub const SALT: &str = "salt";
    pub const EPK: &str = "epk";
    pub const CHALLENGE: &str = "challenge";
    pub const KCF_DATA: &str = "kcfData";
    pub const SUPPORTED_PAKE_ALG: &str = "supportedPakeAlg";

    pub const RMV_AUTH_INFO: &str = "rmvAuthInfo";
    pub const RMV_RETURN: &str = "rmvReturn";
    pub const NONCE: &str = "nonce";
    pub const EX_AUTH_INFO: &str = "exAuthInfo";
    pub const AUTH_ID: &str = "authId";
    pub const RESULT: &str = "result";
}

/// Message codes carried in the `message` field.
pub mod message_code {
    pub const STEP_ONE: u32 = 1;
    pub const STEP_TWO: u32 = 2;
    pub const STEP_THREE: u32 = 3;

    /// Set on every step code a server emits.
    pub const SERVER_FLAG: u32 = 0x8000;
    /// Error notice sent to the peer when an asymmetric exchange aborts.
    pub const ERR_MESSAGE: u32 = 0x8080;

    pub const UNBIND_EXCHANGE_REQUEST: u32 = 0x0005;
    pub const UNBIND_EXCHANGE_RESPONSE: u32 = 0x8005;
}

pub const ISO_SALT_LEN: usize = 16;
pub const ISO_SEED_LEN: usize = 32;
pub const ISO_TOKEN_LEN: usize = 32;
pub const HMAC_LEN: usize = 32;

pub const PAKE_SALT_LEN: usize = 16;
pub const PAKE_EPK_LEN: usize = 32;
pub const CHALLENGE_LEN: usize = 16;
pub const KCF_DATA_LEN: usize = 32;

pub const EXCHANGE_NONCE_LEN: usize = 12;

pub const MAX_AUTH_ID_LEN: usize = 256;
pub const MIN_KEY_LENGTH: usize = 16;
pub const MAX_KEY_LENGTH: usize = 1024;
pub const DEFAULT_KEY_LENGTH: usize = 32;

/// Operation an exchange is run for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationCode {
    Bind,
    Authenticate,
    Unbind,
}

impl OperationCode {
    pub fn code(self) -> i64 {
        match self {
            Self::Bind => 1,
            Self::Authenticate => 2,
            Self::Unbind => 5,
        }
    }

    pub fn from_code(code: i64) -> Result<Self, Error> {
        match code {
            1 => Ok(Self::Bind),
            2 => Ok(Self::Authenticate),
            5 => Ok(Self::Unbind),
            other => Err(Error::unknown_value(format!("operation code {other}"))),
        }
    }

    /// Authenticate and unbind run against an already trusted peer whose
    /// identity must match the stored one; bind learns the peer identity.
    pub fn requires_known_peer(self) -> bool {
        matches!(self, Self::Authenticate | Self::Unbind)
    }
}

/// Device role announced in `peerUserType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserType {
    Accessory,
    Controller,
    Proxy,
}

impl UserType {
    pub fn code(self) -> i64 {
        match self {
            Self::Accessory => 0,
            Self::Controller => 1,
            Self::Proxy => 2,
        }
    }

    pub fn from_code(code: i64) -> Result<Self, Error> {
        match code {
            0 => Ok(Self::Accessory),
            1 => Ok(Self::Controller),
            2 => Ok(Self::Proxy),
            other => Err(Error::unknown_value(format!("user type {other}"))),
        }
    }
}

/// Value of the `authForm` envelope field.
pub const AUTH_FORM_ACCOUNT_UNRELATED: i64 = 0;

bitflags::bitflags! {
    /// PAKE algorithm families a device supports.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct PakeAlg: u32 {
        /// Elliptic-curve SPEKE; mandatory for every exchange.
        const EC_SPEKE = 0x0002;
        /// Derive the SPEKE password from the stored auth key instead of using it directly.
        const PSK_SPEKE = 0x0004;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_code_round_trip() {
        for op in [
            OperationCode::Bind,
            OperationCode::Authenticate,
            OperationCode::Unbind,
        ] {
            assert_eq!(OperationCode::from_code(op.code()).unwrap(), op);
        }
        assert!(OperationCode::from_code(42).is_err());
    }

    #[test]
    fn test_known_peer_requirement() {
        assert!(!OperationCode::Bind.requires_known_peer());
        assert!(OperationCode::Authenticate.requires_known_peer());
        assert!(OperationCode::Unbind.requires_known_peer());
    }

    #[test]
    fn test_pake_alg_names() {
        assert_eq!(PakeAlg::from_name("EC_SPEKE").unwrap(), PakeAlg::EC_SPEKE);
        assert_eq!(PakeAlg::from_name("PSK_SPEKE").unwrap(), PakeAlg::PSK_SPEKE);
        assert!(PakeAlg::from_name("DL_SPEKE").is_none());
    }

    #[test]
    fn test_server_flag_does_not_collide_with_steps() {
        for step in [
            message_code::STEP_ONE,
            message_code::STEP_TWO,
            message_code::STEP_THREE,
        ] {
            assert_eq!(step & message_code::SERVER_FLAG, 0);
        }
    }
}
