use tracing::{debug, error, info};

use devauth_common::{field, helpers::constant_time_eq, message_code, OperationCode, CHALLENGE_LEN};
use devauth_crypto::exchange::{self, REQUEST_AAD, RESULT_AAD};
use devauth_crypto::{random_array, SecretBytes};

use super::{
    exchange_key, package_nonce_and_cipher, parse_nonce_and_cipher, validate, wipe_session_key,
    ExchangeCiphers, PAKE_SERVER_STEPS, UNBIND_RESULT_OK,
};
use crate::error::ProtocolError;
use crate::message::Message;
use crate::params::ExchangeParams;
use crate::task::{check_transition, ProtocolTask, Role, TaskKind, TaskOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UnbindExchangeClientStatus {
    Begin,
    Requested,
    Done,
}

#[derive(Debug)]
pub struct UnbindExchangeClientTask {
    status: UnbindExchangeClientStatus,
    params: ExchangeParams,
    ciphers: ExchangeCiphers,
}

impl UnbindExchangeClientTask {
    pub fn new(params: ExchangeParams) -> Result<Self, ProtocolError> {
        validate(&params)?;
        Ok(Self {
            status: UnbindExchangeClientStatus::Begin,
            params,
            ciphers: ExchangeCiphers::default(),
        })
    }

    pub fn status(&self) -> UnbindExchangeClientStatus {
        self.status
    }

    pub fn params(&self) -> &ExchangeParams {
        &self.params
    }

    pub fn ciphers(&self) -> &ExchangeCiphers {
        &self.ciphers
    }

    fn exchange_request(&mut self, inbound: &Message) -> Result<TaskOutput, ProtocolError> {
        if self.params.challenge_peer.is_none() {
            let payload = inbound.payload()?;
            self.params.challenge_peer = Some(payload.get_array(field::CHALLENGE)?);
        }
        let challenge_client: [u8; CHALLENGE_LEN] = random_array()?;
        self.params.challenge_self = Some(challenge_client);
        let challenge_server = self
            .params
            .challenge_peer
            .ok_or_else(|| ProtocolError::invalid_params("server challenge unknown"))?;
        let key = exchange_key(&self.params, &challenge_client, &challenge_server)?;

        let mut request = Message::new();
        request.add_bytes(field::AUTH_ID, &self.params.auth_id_self);
        let nonce = exchange::generate_nonce()?;
        self.ciphers.nonce = Some(nonce);
        self.ciphers.request_cipher = exchange::seal(&key, &nonce, REQUEST_AAD, &request.to_bytes()?)?;

        let mut payload = Message::new();
        payload
            .add_bytes(field::CHALLENGE, &challenge_client)
            .add_object(
                field::RMV_AUTH_INFO,
                package_nonce_and_cipher(&nonce, &self.ciphers.request_cipher),
            );
        let mut out = Message::new();
        out.add_int(
            field::MESSAGE,
            i64::from(message_code::UNBIND_EXCHANGE_REQUEST),
        )
        .add_object(field::PAYLOAD, payload);

        self.status = UnbindExchangeClientStatus::Requested;
        debug!("unbind exchange client sent removal request");
        Ok(TaskOutput::proceed(out))
    }

    fn exchange_confirm(&mut self, inbound: &Message) -> Result<TaskOutput, ProtocolError> {
        if !check_transition(self.status, UnbindExchangeClientStatus::Requested)? {
            return Ok(TaskOutput::ignore());
        }
        let payload = inbound.payload()?;
        let (nonce, result_cipher) = parse_nonce_and_cipher(&payload, field::RMV_RETURN)?;
        self.ciphers.result_cipher = result_cipher;

        let missing = || ProtocolError::invalid_params("challenges not exchanged");
        let challenge_client = self.params.challenge_self.ok_or_else(missing)?;
        let challenge_server = self.params.challenge_peer.ok_or_else(missing)?;
        let key = exchange_key(&self.params, &challenge_client, &challenge_server)?;

        let result = exchange::open(&key, &nonce, RESULT_AAD, &self.ciphers.result_cipher)?;
        let result = Message::parse(result.expose())?;
        let responder = result.get_bytes(field::AUTH_ID)?;
        if !constant_time_eq(&responder, self.params.peer_id()?) {
            return Err(ProtocolError::invalid_params(
                "removal result from an unauthenticated peer",
            ));
        }
        let code = result.get_int(field::RESULT)?;
        if code != UNBIND_RESULT_OK {
            return Err(ProtocolError::PeerReported(code));
        }

        self.params.session_key = None;
        self.status = UnbindExchangeClientStatus::Done;
        debug!("unbind exchange client confirmed removal");
        Ok(TaskOutput::finish(None))
    }

    fn dispatch(&mut self, inbound: &Message) -> Result<TaskOutput, ProtocolError> {
        if self.status == UnbindExchangeClientStatus::Begin {
            return self.exchange_request(inbound);
        }
        let message = inbound.get_int(field::MESSAGE)?;
        match u32::try_from(message) {
            Ok(message_code::UNBIND_EXCHANGE_RESPONSE) => self.exchange_confirm(inbound),
            Ok(message_code::ERR_MESSAGE) => Err(ProtocolError::PeerReported(
                inbound
                    .payload()
                    .and_then(|p| p.get_int(field::ERROR_CODE))
                    .unwrap_or(0),
            )),
            Ok(code) if PAKE_SERVER_STEPS.contains(&code) => {
                info!(status = ?self.status, message, "message is repeated, ignoring");
                Ok(TaskOutput::ignore())
            }
            _ => Err(ProtocolError::invalid_params(format!(
                "unexpected exchange message {message:#x}"
            ))),
        }
    }
}

impl ProtocolTask for UnbindExchangeClientTask {
    fn kind(&self) -> TaskKind {
        TaskKind::UnbindStandardExchange
    }

    fn role(&self) -> Role {
        Role::Client
    }

    fn op_code(&self) -> OperationCode {
        self.params.op_code
    }

    fn process(&mut self, inbound: &Message) -> Result<TaskOutput, ProtocolError> {
        let result = self.dispatch(inbound);
        if let Err(e) = &result {
            error!(status = ?self.status, error = %e, "unbind exchange client failed");
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
