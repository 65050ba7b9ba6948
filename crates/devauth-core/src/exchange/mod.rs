//! Standard exchange for unbind, run on the session key of a finished PAKE.
//!
//! Unlike the ISO and PAKE machines this sub-protocol multiplexes on the
//! `message` type: `0x0005` carries the sealed removal request, `0x8005` the
//! sealed result. The first message a task sees, whatever its type, starts it.
//! PAKE steps that reach a task after the handover are replays and are ignored.

mod client;
mod server;

pub use client::{UnbindExchangeClientStatus, UnbindExchangeClientTask};
pub use server::{UnbindExchangeServerStatus, UnbindExchangeServerTask};

use devauth_common::{field, message_code, EXCHANGE_NONCE_LEN};
use devauth_crypto::exchange::{self, EXCHANGE_KEY_LEN};
use devauth_crypto::SecretArray;

use crate::error::ProtocolError;
use crate::message::Message;
use crate::params::ExchangeParams;

/// Result code reported for a successful removal.
pub const UNBIND_RESULT_OK: i64 = 0;

/// Ciphertexts and nonce observed during one exchange.
#[derive(Debug, Default, Clone)]
pub struct ExchangeCiphers {
    pub nonce: Option<[u8; EXCHANGE_NONCE_LEN]>,
    pub request_cipher: Vec<u8>,
    pub result_cipher: Vec<u8>,
}

/// PAKE client steps the server consumed before handing the slot over.
const PAKE_CLIENT_STEPS: [u32; 2] = [message_code::STEP_ONE, message_code::STEP_TWO];

/// PAKE server steps the client consumed before handing the slot over.
const PAKE_SERVER_STEPS: [u32; 2] = [
    message_code::STEP_ONE | message_code::SERVER_FLAG,
    message_code::STEP_TWO | message_code::SERVER_FLAG,
];

fn validate(params: &ExchangeParams) -> Result<(), ProtocolError> {
    match &params.session_key {
        Some(key) if !key.is_empty() => {}
        _ => return Err(ProtocolError::invalid_params("exchange needs a session key")),
    }
    params.peer_id()?;
    Ok(())
}

fn exchange_key(
    params: &ExchangeParams,
    challenge_client: &[u8],
    challenge_server: &[u8],
) -> Result<SecretArray<EXCHANGE_KEY_LEN>, ProtocolError> {
    let session_key = params
        .session_key
        .as_ref()
        .ok_or_else(|| ProtocolError::invalid_params("session key consumed"))?;
    Ok(exchange::derive_exchange_key(
        session_key.expose(),
        challenge_client,
        challenge_server,
    )?)
}

fn package_nonce_and_cipher(nonce: &[u8], cipher: &[u8]) -> Message {
    let mut out = Message::new();
    out.add_bytes(field::NONCE, nonce)
        .add_bytes(field::EX_AUTH_INFO, cipher);
    out
}

fn parse_nonce_and_cipher(
    payload: &Message,
    key: &str,
) -> Result<([u8; EXCHANGE_NONCE_LEN], Vec<u8>), ProtocolError> {
    let info = payload.get_object(key)?;
    let nonce = info.get_array(field::NONCE)?;
    let cipher = info.get_bytes(field::EX_AUTH_INFO)?;
    Ok((nonce, cipher))
}

fn wipe_session_key(params: &mut ExchangeParams) {
    if let Some(key) = params.session_key.as_mut() {
        key.wipe();
    }
}
