use tracing::{debug, error};

use devauth_common::{
    field, message_code, OperationCode, CHALLENGE_LEN, KCF_DATA_LEN, PAKE_EPK_LEN, PAKE_SALT_LEN,
};
use devauth_crypto::pake::{self, ConfirmTranscript, EphemeralSecret};
use devauth_crypto::{random_array, SecretBytes};

use super::handover_params;
use crate::envelope::{
    check_operation, error_notice, protocol_message_in, server_message_out, InboundStep,
};
use crate::error::ProtocolError;
use crate::message::Message;
use crate::params::{validate_key_len, ExchangeParams, PakeParams};
use crate::task::{check_transition, ProtocolTask, Role, TaskKind, TaskOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PakeServerStatus {
    Begin,
    Responded,
    Confirmed,
}

#[derive(Debug)]
pub struct PakeServerTask {
    status: PakeServerStatus,
    params: PakeParams,
}

impl PakeServerTask {
    pub fn new(params: PakeParams) -> Result<Self, ProtocolError> {
        params.base.validate()?;
        Ok(Self {
            status: PakeServerStatus::Begin,
            params,
        })
    }

    pub fn status(&self) -> PakeServerStatus {
        self.status
    }

    pub fn params(&self) -> &PakeParams {
        &self.params
    }

    pub(crate) fn handover(&mut self) -> Option<ExchangeParams> {
        match self.status {
            PakeServerStatus::Confirmed => handover_params(&mut self.params),
            _ => None,
        }
    }

    fn respond(&mut self, inbound: &Message) -> Result<TaskOutput, ProtocolError> {
        if !check_transition(self.status, PakeServerStatus::Begin)? {
            return Ok(TaskOutput::ignore());
        }
        let payload = inbound.payload()?;
        let offered = payload.get_int(field::SUPPORTED_PAKE_ALG)?;
        let op_code = self.params.base.op_code;
        if op_code.requires_known_peer() {
            let peer_id = payload.get_bytes(field::PEER_AUTH_ID)?;
            self.params.base.accept_peer_id(peer_id)?;
            let key_len = usize::try_from(payload.get_int(field::KEY_LENGTH)?)
                .map_err(|_| ProtocolError::invalid_params("key length"))?;
            validate_key_len(key_len)?;
            self.params.base.key_len = key_len;
        }
        let agreed = self.params.negotiate(offered)?;

        let salt: [u8; PAKE_SALT_LEN] = random_array()?;
        let challenge: [u8; CHALLENGE_LEN] = random_array()?;
        self.params.install_psk(&salt)?;
        let esk = EphemeralSecret::generate()?;
        let epk = esk.public_key(self.params.base.psk()?, &salt);

        self.params.salt = Some(salt);
        self.params.esk = Some(esk);
        self.params.epk_self = Some(epk);
        self.params.base.challenge_self = Some(challenge);

        let mut out = Message::new();
        out.add_bytes(field::SALT, &salt)
            .add_bytes(field::EPK, &epk)
            .add_bytes(field::CHALLENGE, &challenge)
            .add_int(field::SUPPORTED_PAKE_ALG, i64::from(agreed.bits()))
            .add_bytes(field::PEER_AUTH_ID, &self.params.base.auth_id_self);

        self.status = PakeServerStatus::Responded;
        debug!(?op_code, alg = ?agreed, "pake server responded");
        Ok(TaskOutput::proceed(out))
    }

    fn confirm(&mut self, inbound: &Message) -> Result<TaskOutput, ProtocolError> {
        if !check_transition(self.status, PakeServerStatus::Responded)? {
            return Ok(TaskOutput::ignore());
        }
        let payload = inbound.payload()?;
        let epk_client: [u8; PAKE_EPK_LEN] = payload.get_array(field::EPK)?;
        let kcf_client: [u8; KCF_DATA_LEN] = payload.get_array(field::KCF_DATA)?;
        let challenge_client: [u8; CHALLENGE_LEN] = payload.get_array(field::CHALLENGE)?;

        let params = &self.params;
        let missing = || ProtocolError::invalid_params("response state incomplete");
        let esk = params.esk.as_ref().ok_or_else(missing)?;
        let salt = params.salt.ok_or_else(missing)?;
        let epk_server = params.epk_self.ok_or_else(missing)?;
        let challenge_server = params.base.challenge_self.ok_or_else(missing)?;

        let shared = esk.shared_secret(&epk_client)?;
        let keys = pake::derive_session_keys(&shared, &salt, params.base.key_len)?;
        let transcript = ConfirmTranscript {
            challenge_client: &challenge_client,
            challenge_server: &challenge_server,
            epk_client: &epk_client,
            epk_server: &epk_server,
        };
        transcript.verify_client_kcf(keys.kcf_key.expose(), &kcf_client)?;
        let kcf_server = transcript.server_kcf(keys.kcf_key.expose())?;

        self.params.epk_peer = Some(epk_client);
        self.params.base.challenge_peer = Some(challenge_client);
        self.params.base.session_key = Some(keys.return_key);
        self.params.kcf_key = None;
        self.params.esk = None;
        self.params.base.psk = None;

        let mut out = Message::new();
        out.add_bytes(field::KCF_DATA, &kcf_server);

        self.status = PakeServerStatus::Confirmed;
        debug!("pake server confirmed client");
        Ok(TaskOutput::finish(Some(out)))
    }

    fn dispatch(&mut self, inbound: &Message) -> Result<TaskOutput, ProtocolError> {
        let step = match protocol_message_in(inbound)? {
            InboundStep::Initiating => {
                return Err(ProtocolError::bad_message("server received no step"))
            }
            InboundStep::PeerError(code) => return Err(ProtocolError::PeerReported(code)),
            InboundStep::Step(step) => step,
        };
        check_operation(inbound, self.params.base.op_code)?;

        let output = match step {
            message_code::STEP_ONE => self.respond(inbound)?,
            message_code::STEP_TWO => self.confirm(inbound)?,
            other => {
                return Err(ProtocolError::bad_message(format!(
                    "unexpected client step {other}"
                )))
            }
        };
        let op_code = self.params.base.op_code;
        Ok(output.map_message(|payload| server_message_out(payload, op_code, step)))
    }
}

impl ProtocolTask for PakeServerTask {
    fn kind(&self) -> TaskKind {
        TaskKind::PakeProtocol
    }

    fn role(&self) -> Role {
        Role::Server
    }

    fn op_code(&self) -> OperationCode {
        self.params.base.op_code
    }

    fn process(&mut self, inbound: &Message) -> Result<TaskOutput, ProtocolError> {
        let result = self.dispatch(inbound);
        if let Err(e) = &result {
            error!(status = ?self.status, error = %e, "pake server step failed");
            self.params.abort();
        }
        result
    }

    fn session_key(&self) -> Option<&SecretBytes> {
        match self.status {
            PakeServerStatus::Confirmed => self.params.base.session_key.as_ref(),
            _ => None,
        }
    }

    fn take_session_key(&mut self) -> Option<SecretBytes> {
        match self.status {
            PakeServerStatus::Confirmed => self.params.base.session_key.take(),
            _ => None,
        }
    }

    fn destroy(&mut self) {
        self.params.clear_secrets();
    }

    fn peer_error_notice(&self, error: &ProtocolError) -> Option<Message> {
        match error {
            ProtocolError::PeerReported(_) => None,
            other => Some(error_notice(self.params.base.op_code, other)),
        }
    }
}
