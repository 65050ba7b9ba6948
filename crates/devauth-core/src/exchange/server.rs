use tracing::{debug, error, info};

use devauth_common::{field, helpers::constant_time_eq, message_code, OperationCode, CHALLENGE_LEN};
use devauth_crypto::exchange::{self, REQUEST_AAD, RESULT_AAD};
use devauth_crypto::{random_array, SecretBytes};

use super::{
    exchange_key, package_nonce_and_cipher, parse_nonce_and_cipher, validate, wipe_session_key,
    ExchangeCiphers, PAKE_CLIENT_STEPS, UNBIND_RESULT_OK,
};
use crate::error::ProtocolError;
use crate::message::Message;
use crate::params::ExchangeParams;
use crate::task::{check_transition, Outcome, ProtocolTask, Role, TaskKind, TaskOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UnbindExchangeServerStatus {
    Begin,
    Started,
    Responded,
}

#[derive(Debug)]
pub struct UnbindExchangeServerTask {
    status: UnbindExchangeServerStatus,
    params: ExchangeParams,
    ciphers: ExchangeCiphers,
}

impl UnbindExchangeServerTask {
    /// `params` must carry the PAKE session key and the authenticated peer id.
    pub fn new(params: ExchangeParams) -> Result<Self, ProtocolError> {
        validate(&params)?;
        Ok(Self {
            status: UnbindExchangeServerStatus::Begin,
            params,
            ciphers: ExchangeCiphers::default(),
        })
    }

    pub fn status(&self) -> UnbindExchangeServerStatus {
        self.status
    }

    pub fn params(&self) -> &ExchangeParams {
        &self.params
    }

    pub fn ciphers(&self) -> &ExchangeCiphers {
        &self.ciphers
    }

    fn exchange_start(&mut self) -> Result<TaskOutput, ProtocolError> {
        let mut send_to_peer = None;
        if self.params.challenge_self.is_none() {
            let challenge: [u8; CHALLENGE_LEN] = random_array()?;
            self.params.challenge_self = Some(challenge);

            let mut payload = Message::new();
            payload.add_bytes(field::CHALLENGE, &challenge);
            let mut out = Message::new();
            out.add_object(field::PAYLOAD, payload);
            send_to_peer = Some(out);
        }

        self.status = UnbindExchangeServerStatus::Started;
        debug!(
            sent_challenge = send_to_peer.is_some(),
            "unbind exchange server started"
        );
        Ok(TaskOutput {
            outcome: Outcome::Continue,
            send_to_peer,
        })
    }

    fn exchange_response(&mut self, inbound: &Message) -> Result<TaskOutput, ProtocolError> {
        if !check_transition(self.status, UnbindExchangeServerStatus::Started)? {
            return Ok(TaskOutput::ignore());
        }
        let payload = inbound.payload()?;
        if self.params.challenge_peer.is_none() {
            self.params.challenge_peer = Some(payload.get_array(field::CHALLENGE)?);
        }
        let (nonce, request_cipher) = parse_nonce_and_cipher(&payload, field::RMV_AUTH_INFO)?;
        self.ciphers.nonce = Some(nonce);
        self.ciphers.request_cipher = request_cipher;

        let missing = || ProtocolError::invalid_params("challenges not exchanged");
        let challenge_client = self.params.challenge_peer.ok_or_else(missing)?;
        let challenge_server = self.params.challenge_self.ok_or_else(missing)?;
        let key = exchange_key(&self.params, &challenge_client, &challenge_server)?;

        let request = exchange::open(&key, &nonce, REQUEST_AAD, &self.ciphers.request_cipher)?;
        let request = Message::parse(request.expose())?;
        let requester = request.get_bytes(field::AUTH_ID)?;
        if !constant_time_eq(&requester, self.params.peer_id()?) {
            return Err(ProtocolError::invalid_params(
                "removal requested by an unauthenticated peer",
            ));
        }

        let mut result = Message::new();
        result
            .add_bytes(field::AUTH_ID, &self.params.auth_id_self)
            .add_int(field::RESULT, UNBIND_RESULT_OK);
        let result_nonce = exchange::generate_nonce()?;
        self.ciphers.result_cipher =
            exchange::seal(&key, &result_nonce, RESULT_AAD, &result.to_bytes()?)?;

        let mut rmv_return = Message::new();
        rmv_return.add_object(
            field::RMV_RETURN,
            package_nonce_and_cipher(&result_nonce, &self.ciphers.result_cipher),
        );
        let mut out = Message::new();
        out.add_int(
            field::MESSAGE,
            i64::from(message_code::UNBIND_EXCHANGE_RESPONSE),
        )
        .add_object(field::PAYLOAD, rmv_return);

        self.params.session_key = None;
        self.status = UnbindExchangeServerStatus::Responded;
        debug!("unbind exchange server accepted removal request");
        Ok(TaskOutput::finish(Some(out)))
    }

    fn dispatch(&mut self, inbound: &Message) -> Result<TaskOutput, ProtocolError> {
        if self.status == UnbindExchangeServerStatus::Begin {
            return self.exchange_start();
        }
        let message = inbound.get_int(field::MESSAGE)?;
        match u32::try_from(message) {
            Ok(message_code::UNBIND_EXCHANGE_REQUEST) => self.exchange_response(inbound),
            Ok(message_code::ERR_MESSAGE) => Err(ProtocolError::PeerReported(
                inbound
                    .payload()
                    .and_then(|p| p.get_int(field::ERROR_CODE))
                    .unwrap_or(0),
            )),
            Ok(code) if PAKE_CLIENT_STEPS.contains(&code) => {
                info!(status = ?self.status, message, "message is repeated, ignoring");
                Ok(TaskOutput::ignore())
            }
            _ => Err(ProtocolError::invalid_params(format!(
                "unexpected exchange message {message:#x}"
            ))),
        }
    }
}

impl ProtocolTask for UnbindExchangeServerTask {
    fn kind(&self) -> TaskKind {
        TaskKind::UnbindStandardExchange
    }

    fn role(&self) -> Role {
        Role::Server
    }

    fn op_code(&self) -> OperationCode {
        self.params.op_code
    }

    fn process(&mut self, inbound: &Message) -> Result<TaskOutput, ProtocolError> {
        let result = self.dispatch(inbound);
        if let Err(e) = &result {
            error!(status = ?self.status, error = %e, "unbind exchange server failed");
            wipe_session_key(&mut self.params);
        }
        result
    }

    fn session_key(&self) -> Option<&SecretBytes> {
        None
    }

    fn take_session_key(&mut self) -> Option<SecretBytes> {
        None
    }

    fn destroy(&mut self) {
        self.params.clear_secrets();
    }
}
