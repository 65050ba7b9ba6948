use tracing::{debug, error};

use devauth_common::{field, message_code, OperationCode, ISO_SALT_LEN, ISO_SEED_LEN, ISO_TOKEN_LEN};
use devauth_crypto::iso::{self, TokenTranscript};
use devauth_crypto::{random_array, SecretBytes};

use super::{peer_user_type, RETURN_CODE_OK};
use crate::envelope::{client_message_out, protocol_message_in, InboundStep};
use crate::error::ProtocolError;
use crate::message::Message;
use crate::params::{validate_key_len, IsoParams};
use crate::task::{check_transition, ProtocolTask, Role, TaskKind, TaskOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IsoClientStatus {
    Begin,
    ServerRespondedToken,
    GenSessionKey,
    Final,
}

#[derive(Debug)]
pub struct IsoClientTask {
    status: IsoClientStatus,
    params: IsoParams,
}

impl IsoClientTask {
    pub fn new(params: IsoParams) -> Result<Self, ProtocolError> {
        params.base.validate()?;
        Ok(Self {
            status: IsoClientStatus::Begin,
            params,
        })
    }

    pub fn status(&self) -> IsoClientStatus {
        self.status
    }

    pub fn params(&self) -> &IsoParams {
        &self.params
    }

    fn start(&mut self, start: &Message) -> Result<TaskOutput, ProtocolError> {
        if !check_transition(self.status, IsoClientStatus::Begin)? {
            return Ok(TaskOutput::ignore());
        }
        let base = &mut self.params.base;
        if let Some(key_len) = start.get_opt_int(field::KEY_LENGTH)? {
            let key_len = usize::try_from(key_len)
                .map_err(|_| ProtocolError::invalid_params("key length"))?;
            validate_key_len(key_len)?;
            base.key_len = key_len;
        }

        let salt: [u8; ISO_SALT_LEN] = random_array()?;
        let seed: [u8; ISO_SEED_LEN] = random_array()?;
        base.rand_self = Some(salt);
        self.params.seed = Some(seed);

        let op_code = self.params.base.op_code;
        let mut payload = Message::new();
        payload
            .add_bytes(field::ISO_SALT, &salt)
            .add_bytes(field::PEER_AUTH_ID, &self.params.base.auth_id_self)
            .add_int(field::OPERATION_CODE, op_code.code())
            .add_bytes(field::SEED, &seed)
            .add_int(field::PEER_USER_TYPE, self.params.user_type_self.code());
        if op_code.requires_known_peer() {
            payload
                .add_string(field::PKG_NAME, &self.params.pkg_name)
                .add_string(field::SERVICE_TYPE, &self.params.service_type)
                .add_int(field::KEY_LENGTH, self.params.base.key_len as i64);
        }

        self.status = IsoClientStatus::ServerRespondedToken;
        debug!(?op_code, "iso client started");
        Ok(TaskOutput::proceed(payload))
    }

    fn calculate_token(&mut self, inbound: &Message) -> Result<TaskOutput, ProtocolError> {
        if !check_transition(self.status, IsoClientStatus::ServerRespondedToken)? {
            return Ok(TaskOutput::ignore());
        }
        let payload = inbound.payload()?;
        let peer_id = payload.get_bytes(field::PEER_AUTH_ID)?;
        let salt_server: [u8; ISO_SALT_LEN] = payload.get_array(field::ISO_SALT)?;
        let server_token: [u8; ISO_TOKEN_LEN] = payload.get_array(field::TOKEN)?;
        let user_type = peer_user_type(&payload)?;

        let base = &mut self.params.base;
        base.accept_peer_id(peer_id)?;
        let seed = self
            .params
            .seed
            .ok_or_else(|| ProtocolError::invalid_params("seed not generated"))?;
        let salt_client = base
            .rand_self
            .ok_or_else(|| ProtocolError::invalid_params("salt not generated"))?;

        let psk = iso::derive_psk(base.secret.expose(), &seed)?;
        let client_token = {
            let transcript = TokenTranscript {
                salt_client: &salt_client,
                salt_server: &salt_server,
                id_client: &base.auth_id_self,
                id_server: base.peer_id()?,
            };
            transcript.verify_server_token(psk.expose(), &server_token)?;
            transcript.client_token(psk.expose())?
        };

        base.psk = Some(SecretBytes::from_slice(psk.expose()));
        base.rand_peer = Some(salt_server);
        self.params.user_type_peer = Some(user_type);

        let mut out = Message::new();
        out.add_bytes(field::PEER_AUTH_ID, &self.params.base.auth_id_self)
            .add_bytes(field::TOKEN, &client_token);

        self.status = IsoClientStatus::GenSessionKey;
        debug!("iso client verified server token");
        Ok(TaskOutput::proceed(out))
    }

    fn generate_session_key(&mut self, inbound: &Message) -> Result<TaskOutput, ProtocolError> {
        if !check_transition(self.status, IsoClientStatus::GenSessionKey)? {
            return Ok(TaskOutput::ignore());
        }
        let payload = inbound.payload()?;
        let mac: [u8; ISO_TOKEN_LEN] = payload.get_array(field::RETURN_CODE_MAC)?;

        let base = &mut self.params.base;
        let (salt_client, salt_server) = base
            .rand_self
            .zip(base.rand_peer)
            .ok_or_else(|| ProtocolError::invalid_params("salts not exchanged"))?;
        iso::verify_return_code_mac(base.psk()?, RETURN_CODE_OK, &mac)?;
        let session_key = iso::session_key(base.psk()?, &salt_client, &salt_server, base.key_len)?;

        base.session_key = Some(session_key);
        base.psk = None;
        self.status = IsoClientStatus::Final;
        debug!(key_len = base.key_len, "iso client derived session key");
        Ok(TaskOutput::finish(None))
    }

    fn dispatch(&mut self, inbound: &Message) -> Result<TaskOutput, ProtocolError> {
        let (step, output) = match protocol_message_in(inbound)? {
            InboundStep::Initiating => (message_code::STEP_ONE, self.start(inbound)?),
            InboundStep::PeerError(code) => return Err(ProtocolError::PeerReported(code)),
            InboundStep::Step(peer_step) => {
                // Receiving peer step N means running our step N + 1.
                let step = peer_step.saturating_add(1);
                let output = match step {
                    message_code::STEP_TWO => self.calculate_token(inbound)?,
                    message_code::STEP_THREE => self.generate_session_key(inbound)?,
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

impl ProtocolTask for IsoClientTask {
    fn kind(&self) -> TaskKind {
        TaskKind::IsoProtocol
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
            error!(status = ?self.status, error = %e, "iso client step failed");
            self.params.base.abort();
        }
        result
    }

    fn session_key(&self) -> Option<&SecretBytes> {
        match self.status {
            IsoClientStatus::Final => self.params.base.session_key.as_ref(),
            _ => None,
        }
    }

    fn take_session_key(&mut self) -> Option<SecretBytes> {
        match self.status {
            IsoClientStatus::Final => self.params.base.session_key.take(),
            _ => None,
        }
    }

    fn destroy(&mut self) {
        self.params.base.clear_secrets();
    }
}
