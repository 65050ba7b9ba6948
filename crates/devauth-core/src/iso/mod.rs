//! ISO protocol: symmetric PSK mutual authentication with exchanged tokens.
//!
//! ```text
//! client                                   server
//!   start            -- 1 {isoSalt, seed, ..} -->
//!                    <-- 1|S {isoSalt, token} --   start
//!   calculate_token  -- 2 {token} ------------->
//!                    <-- 2|S {returnCodeMac} ---   cal_token_and_gen_session_key
//!   generate_session_key
//! ```

mod client;
mod server;

pub use client::{IsoClientStatus, IsoClientTask};
pub use server::{IsoServerStatus, IsoServerTask};

use devauth_common::{field, UserType};

use crate::error::ProtocolError;
use crate::message::Message;

/// Return code the server MACs on success.
pub(crate) const RETURN_CODE_OK: u32 = 0;

fn peer_user_type(payload: &Message) -> Result<UserType, ProtocolError> {
    let code = payload.get_int(field::PEER_USER_TYPE)?;
    UserType::from_code(code).map_err(ProtocolError::invalid_params)
}
