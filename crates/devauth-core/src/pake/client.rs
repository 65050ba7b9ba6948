use tracing::{debug, error};

use devauth_common::{
    field, message_code, OperationCode, CHALLENGE_LEN, KCF_DATA_LEN, PAKE_EPK_LEN, PAKE_SALT_LEN,
};
use devauth_crypto::pake::{self, ConfirmTranscript, EphemeralSecret};
use devauth_crypto::{random_array, SecretBytes};

use super::handover_params;
use crate::envelope::{client_message_out, error_notice, protocol_message_in, InboundStep};
use crate::error::ProtocolError;
use crate::message::Message;
use crate::params::{validate_key_len, ExchangeParams, PakeParams};
use crate::task::{check_transition, ProtocolTask, Role, TaskKind, TaskOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PakeClientStatus {
    Begin,
    Requested,
    Confirmed,
    Verified,
}

#[derive(Debug)]
pub struct PakeClientTask {
    status: PakeClientStatus,
    params: PakeParams,
}

impl PakeClientTask {
    pub fn new(params: PakeParams) -> Result<Self, ProtocolError> {
        params.base.validate()?;
        Ok(Self {
            status: PakeClientStatus::Begin,
            params,
        })
    }

    pub fn status(&self) -> PakeClientStatus {
        self.status
    }

    pub fn params(&self) -> &PakeParams {
        &self.params
    }

    pub(crate) fn handover(&mut self) -> Option<ExchangeParams> {
        match self.status {
            PakeClientStatus::Verified => handover_params(&mut self.params),
            _ => None,
        }
    }

    fn request(&mut self, start: &Message) -> Result<TaskOutput, ProtocolError> {
        if !check_transition(self.status, PakeClientStatus::Begin)? {
            return Ok(TaskOutput::ignore());
        }
        let op_code = self.params.base.op_code;
        if let Some(key_len) = start.get_opt_int(field::KEY_LENGTH)? {
            let key_len = usize::try_from(key_len)
                .map_err(|_| ProtocolError::invalid_params("key length"))?;
            validate_key_len(key_len)?;
            self.params.base.key_len = key_len;
        }
        self.params.esk = Some(EphemeralSecret::generate()?);

        let mut out = Message::new();
        out.add_int(field::SUPPORTED_PAKE_ALG, i64::from(self.params.alg.bits()));
        if op_code.requires_known_peer() {
            out.add_bytes(field::PEER_AUTH_ID, &self.params.base.auth_id_self)
                .add_int(field::KEY_LENGTH, self.params.base.key_len as i64);
        }

        self.status = PakeClientStatus::Requested;
        debug!(?op_code, alg = ?self.params.alg, "pake client sent request");
        Ok(TaskOutput::proceed(out))
    }

    fn client_confirm(&mut self, inbound: &Message) -> Result<TaskOutput, ProtocolError> {
        if !check_transition(self.status, PakeClientStatus::Requested)? {
            return Ok(TaskOutput::ignore());
        }
        let payload = inbound.payload()?;
        let salt: [u8; PAKE_SALT_LEN] = payload.get_array(field::SALT)?;
        let epk_server: [u8; PAKE_EPK_LEN] = payload.get_array(field::EPK)?;
        let challenge_server: [u8; CHALLENGE_LEN] = payload.get_array(field::CHALLENGE)?;
        let offered = payload.get_int(field::SUPPORTED_PAKE_ALG)?;
        let peer_id = payload.get_bytes(field::PEER_AUTH_ID)?;

        self.params.negotiate(offered)?;
        self.params.base.accept_peer_id(peer_id)?;
        self.params.install_psk(&salt)?;

        let esk = self
            .params
            .esk
            .as_ref()
            .ok_or_else(|| ProtocolError::invalid_params("ephemeral key not generated"))?;
        let epk_client = esk.public_key(self.params.base.psk()?, &salt);
        let shared = esk.shared_secret(&epk_server)?;
        let keys = pake::derive_session_keys(&shared, &salt, self.params.base.key_len)?;

        let challenge_client: [u8; CHALLENGE_LEN] = random_array()?;
        let kcf_data = ConfirmTranscript {
            challenge_client: &challenge_client,
            challenge_server: &challenge_server,
            epk_client: &epk_client,
            epk_server: &epk_server,
        }
        .client_kcf(keys.kcf_key.expose())?;

        self.params.salt = Some(salt);
        self.params.epk_self = Some(epk_client);
        self.params.epk_peer = Some(epk_server);
        self.params.kcf_key = Some(keys.kcf_key);
        self.params.base.session_key = Some(keys.return_key);
        self.params.base.challenge_self = Some(challenge_client);
        self.params.base.challenge_peer = Some(challenge_server);

        let mut out = Message::new();
        out.add_bytes(field::EPK, &epk_client)
            .add_bytes(field::KCF_DATA, &kcf_data)
            .add_bytes(field::CHALLENGE, &challenge_client);

        self.status = PakeClientStatus::Confirmed;
        debug!(alg = ?self.params.alg, "pake client sent confirmation");
        Ok(TaskOutput::proceed(out))
    }

    fn client_verify_confirm(&mut self, inbound: &Message) -> Result<TaskOutput, ProtocolError> {
        if !check_transition(self.status, PakeClientStatus::Confirmed)? {
            return Ok(TaskOutput::ignore());
        }
        let payload = inbound.payload()?;
        let kcf_data: [u8; KCF_DATA_LEN] = payload.get_array(field::KCF_DATA)?;

        let params = &self.params;
        let missing = || ProtocolError::invalid_params("confirmation state incomplete");
        let kcf_key = params.kcf_key.as_ref().ok_or_else(missing)?;
        ConfirmTranscript {
            challenge_client: params.base.challenge_self.as_ref().ok_or_else(missing)?,
            challenge_server: params.base.challenge_peer.as_ref().ok_or_else(missing)?,
            epk_client: params.epk_self.as_ref().ok_or_else(missing)?,
            epk_server: params.epk_peer.as_ref().ok_or_else(missing)?,
        }
        .verify_server_kcf(kcf_key.expose(), &kcf_data)?;

        self.params.kcf_key = None;
        self.params.esk = None;
        self.params.base.psk = None;
        self.status = PakeClientStatus::Verified;
        debug!("pake client verified server confirmation");
        Ok(TaskOutput::finish(None))
    }

    fn dispatch(&mut self, inbound: &Message) -> Result<TaskOutput, ProtocolError> {
        let (step, output) = match protocol_message_in(inbound)? {
            InboundStep::Initiating => (message_code::STEP_ONE, self.request(inbound)?),
            InboundStep::PeerError(code) => return Err(ProtocolError::PeerReported(code)),
            InboundStep::Step(peer_step) => {
                let step = peer_step.saturating_add(1);
                let output = match step {
                    message_code::STEP_TWO => self.client_confirm(inbound)?,
                    message_code::STEP_THREE => self.client_verify_confirm(inbound)?,
                    _ => {
                        return Err(ProtocolError::bad_message(format!(
                            "unexpected peer step {peer_step}"
                        )))
                    }
                };
                (step, output)
            }
        };
        let op_code = self.params.base.op_code;
        Ok(output.map_message(|payload| client_message_out(payload, op_code, step)))
    }
}

impl ProtocolTask for PakeClientTask {
    fn kind(&self) -> TaskKind {
        TaskKind::PakeProtocol
    }

    fn role(&self) -> Role {
        Role::Client
    }

    fn op_code(&self) -> OperationCode {
        self.params.base.op_code
    }

    fn process(&mut self, inbound: &Message) -> Result<TaskOutput, ProtocolError> {
        let result = self.dispatch(inbound);
        if let Err(e) = &result {
            error!(status = ?self.status, error = %e, "pake client step failed");
            self.params.abort();
        }
        result
    }

    fn session_key(&self) -> Option<&SecretBytes> {
        match self.status {
            PakeClientStatus::Verified => self.params.base.session_key.as_ref(),
            _ => None,
        }
    }

    fn take_session_key(&mut self) -> Option<SecretBytes> {
        match self.status {
            PakeClientStatus::Verified => self.params.base.session_key.take(),
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
