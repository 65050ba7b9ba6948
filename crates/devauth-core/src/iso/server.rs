use tracing::{debug, error};

use devauth_common::{field, message_code, OperationCode, ISO_SALT_LEN, ISO_SEED_LEN, ISO_TOKEN_LEN};
use devauth_crypto::iso::{self, TokenTranscript};
use devauth_crypto::{random_array, SecretBytes};

use super::{peer_user_type, RETURN_CODE_OK};
use crate::envelope::{check_operation, protocol_message_in, server_message_out, InboundStep};
use crate::error::ProtocolError;
use crate::message::Message;
use crate::params::{validate_key_len, IsoParams};
use crate::task::{check_transition, ProtocolTask, Role, TaskKind, TaskOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IsoServerStatus {
    Begin,
    CmdRespondedToken,
    GenSessionKey,
}

#[derive(Debug)]
pub struct IsoServerTask {
    status: IsoServerStatus,
    params: IsoParams,
}

impl IsoServerTask {
    pub fn new(params: IsoParams) -> Result<Self, ProtocolError> {
        params.base.validate()?;
        Ok(Self {
            status: IsoServerStatus::Begin,
            params,
        })
    }

    pub fn status(&self) -> IsoServerStatus {
        self.status
    }

    pub fn params(&self) -> &IsoParams {
        &self.params
    }

    fn start(&mut self, inbound: &Message) -> Result<TaskOutput, ProtocolError> {
        if !check_transition(self.status, IsoServerStatus::Begin)? {
            return Ok(TaskOutput::ignore());
        }
        let payload = inbound.payload()?;
        check_operation(&payload, self.params.base.op_code)?;
        let peer_id = payload.get_bytes(field::PEER_AUTH_ID)?;
        let salt_client: [u8; ISO_SALT_LEN] = payload.get_array(field::ISO_SALT)?;
        let seed: [u8; ISO_SEED_LEN] = payload.get_array(field::SEED)?;
        let user_type = peer_user_type(&payload)?;

        let op_code = self.params.base.op_code;
        if op_code.requires_known_peer() {
            let key_len = usize::try_from(payload.get_int(field::KEY_LENGTH)?)
                .map_err(|_| ProtocolError::invalid_params("key length"))?;
            validate_key_len(key_len)?;
            self.params.base.key_len = key_len;
            self.params.pkg_name = payload.get_string(field::PKG_NAME)?.to_string();
            self.params.service_type = payload.get_string(field::SERVICE_TYPE)?.to_string();
        }

        let base = &mut self.params.base;
        base.accept_peer_id(peer_id)?;

        let psk = iso::derive_psk(base.secret.expose(), &seed)?;
        let salt_server: [u8; ISO_SALT_LEN] = random_array()?;
        let token = TokenTranscript {
            salt_client: &salt_client,
            salt_server: &salt_server,
            id_client: base.peer_id()?,
            id_server: &base.auth_id_self,
        }
        .server_token(psk.expose())?;

        base.psk = Some(SecretBytes::from_slice(psk.expose()));
        base.rand_self = Some(salt_server);
        base.rand_peer = Some(salt_client);
        self.params.seed = Some(seed);
        self.params.user_type_peer = Some(user_type);

        let mut out = Message::new();
        out.add_bytes(field::ISO_SALT, &salt_server)
            .add_bytes(field::TOKEN, &token)
            .add_bytes(field::PEER_AUTH_ID, &self.params.base.auth_id_self)
            .add_int(field::PEER_USER_TYPE, self.params.user_type_self.code())
            .add_int(field::OPERATION_CODE, op_code.code());

        self.status = IsoServerStatus::CmdRespondedToken;
        debug!(?op_code, "iso server responded with token");
        Ok(TaskOutput::proceed(out))
    }

    fn cal_token_and_gen_session_key(
        &mut self,
        inbound: &Message,
    ) -> Result<TaskOutput, ProtocolError> {
        if !check_transition(self.status, IsoServerStatus::CmdRespondedToken)? {
            return Ok(TaskOutput::ignore());
        }
        let payload = inbound.payload()?;
        let peer_id = payload.get_bytes(field::PEER_AUTH_ID)?;
        let client_token: [u8; ISO_TOKEN_LEN] = payload.get_array(field::TOKEN)?;

        let base = &mut self.params.base;
        base.accept_peer_id(peer_id)?;
        let (salt_server, salt_client) = base
            .rand_self
            .zip(base.rand_peer)
            .ok_or_else(|| ProtocolError::invalid_params("salts not exchanged"))?;

        TokenTranscript {
            salt_client: &salt_client,
            salt_server: &salt_server,
            id_client: base.peer_id()?,
            id_server: &base.auth_id_self,
        }
        .verify_client_token(base.psk()?, &client_token)?;

        let session_key = iso::session_key(base.psk()?, &salt_client, &salt_server, base.key_len)?;
        let mac = iso::return_code_mac(base.psk()?, RETURN_CODE_OK)?;
        base.session_key = Some(session_key);
        base.psk = None;

        let op_code = base.op_code;
        let mut out = Message::new();
        out.add_bytes(field::PEER_AUTH_ID, &base.auth_id_self)
            .add_bytes(field::RETURN_CODE_MAC, &mac)
            .add_int(field::OPERATION_CODE, op_code.code());

        self.status = IsoServerStatus::GenSessionKey;
        debug!(key_len = self.params.base.key_len, "iso server derived session key");
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
            message_code::STEP_ONE => self.start(inbound)?,
            message_code::STEP_TWO => self.cal_token_and_gen_session_key(inbound)?,
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

impl ProtocolTask for IsoServerTask {
    fn kind(&self) -> TaskKind {
        TaskKind::IsoProtocol
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
            error!(status = ?self.status, error = %e, "iso server step failed");
            self.params.base.abort();
        }
        result
    }

    fn session_key(&self) -> Option<&SecretBytes> {
        match self.status {
            IsoServerStatus::GenSessionKey => self.params.base.session_key.as_ref(),
            _ => None,
        }
    }

    fn take_session_key(&mut self) -> Option<SecretBytes> {
        match self.status {
            IsoServerStatus::GenSessionKey => self.params.base.session_key.take(),
            _ => None,
        }
    }

    fn destroy(&mut self) {
        self.params.base.clear_secrets();
    }
}
