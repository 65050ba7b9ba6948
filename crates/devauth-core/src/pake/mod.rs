//! PAKE protocol: EC-SPEKE with challenge-bound key confirmation.
//!
//! ```text
//! client                                        server
//!   request          -- 1 {supportedPakeAlg} -------->
//!                    <-- 1|S {salt, epk, challenge} --   respond
//!   client_confirm   -- 2 {epk, kcfData, challenge} ->
//!                    <-- 2|S {kcfData} ---------------   confirm
//!   client_verify_confirm
//! ```
//!
//! Either side that fails sends an error notice so the peer can abort early.

mod client;
mod server;

pub use client::{PakeClientStatus, PakeClientTask};
pub use server::{PakeServerStatus, PakeServerTask};

use devauth_common::OperationCode;

use crate::params::{ExchangeParams, PakeParams};
use devauth_crypto::SecretBytes;

/// Move what the unbind exchange needs out of a finished PAKE.
fn handover_params(params: &mut PakeParams) -> Option<ExchangeParams> {
    let session_key = params.base.session_key.take()?;
    let base = &params.base;
    let mut next = ExchangeParams::new(
        OperationCode::Unbind,
        base.auth_id_self.clone(),
        SecretBytes::default(),
    )
    .with_key_len(base.key_len);
    next.auth_id_peer = base.auth_id_peer.clone();
    next.session_key = Some(session_key);
    Some(next)
}
