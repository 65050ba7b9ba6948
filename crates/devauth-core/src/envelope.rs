//! Envelope handling shared by the ISO and PAKE machines: reading the step a
//! peer completed, and wrapping outbound payloads with step and operation.

use devauth_common::{field, message_code, OperationCode, AUTH_FORM_ACCOUNT_UNRELATED};

use crate::error::ProtocolError;
use crate::message::Message;

/// What an inbound message means for a step-multiplexed machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundStep {
    /// No `message` field: the caller is starting the exchange.
    Initiating,
    /// The step the peer most recently completed, server flag stripped.
    Step(u32),
    /// The peer aborted and sent an error notice.
    PeerError(i64),
}

pub fn protocol_message_in(inbound: &Message) -> Result<InboundStep, ProtocolError> {
    let Some(code) = inbound.get_opt_int(field::MESSAGE)? else {
        return Ok(InboundStep::Initiating);
    };
    let code = u32::try_from(code)
        .map_err(|_| ProtocolError::bad_message(format!("message code {code}")))?;

    if code == message_code::ERR_MESSAGE {
        let error_code = inbound
            .payload()
            .and_then(|p| p.get_int(field::ERROR_CODE))
            .unwrap_or(0);
        return Ok(InboundStep::PeerError(error_code));
    }
    Ok(InboundStep::Step(code & !message_code::SERVER_FLAG))
}

fn message_out(payload: Message, op_code: OperationCode, code: u32) -> Message {
    let mut out = Message::new();
    out.add_int(field::MESSAGE, i64::from(code))
        .add_int(field::OPERATION_CODE, op_code.code())
        .add_object(field::PAYLOAD, payload);
    out
}

/// Wrap a client payload for `step`. The first step also carries `authForm`.
pub fn client_message_out(payload: Message, op_code: OperationCode, step: u32) -> Message {
    let mut out = message_out(payload, op_code, step);
    if step == message_code::STEP_ONE {
        out.add_int(field::AUTH_FORM, AUTH_FORM_ACCOUNT_UNRELATED);
    }
    out
}

pub fn server_message_out(payload: Message, op_code: OperationCode, step: u32) -> Message {
    message_out(payload, op_code, step | message_code::SERVER_FLAG)
}

/// `{message: 0x8080, operationCode, payload: {errorCode}}`.
pub fn error_notice(op_code: OperationCode, error: &ProtocolError) -> Message {
    let mut payload = Message::new();
    payload.add_int(field::ERROR_CODE, error.code());
    message_out(payload, op_code, message_code::ERR_MESSAGE)
}

/// Servers reject a message whose envelope names a different or unknown
/// operation.
pub fn check_operation(inbound: &Message, expected: OperationCode) -> Result<(), ProtocolError> {
    let Some(code) = inbound.get_opt_int(field::OPERATION_CODE)? else {
        return Ok(());
    };
    let op = OperationCode::from_code(code).map_err(ProtocolError::bad_message)?;
    if op != expected {
        return Err(ProtocolError::bad_message(format!(
            "operation {op:?}, expected {expected:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_message_is_initiating() {
        let msg = Message::parse(br#"{"payload":{}}"#).unwrap();
        assert_eq!(protocol_message_in(&msg).unwrap(), InboundStep::Initiating);
    }

    #[test]
    fn test_server_flag_stripped() {
        let msg = Message::parse(br#"{"message":32770}"#).unwrap();
        assert_eq!(protocol_message_in(&msg).unwrap(), InboundStep::Step(2));
    }

    #[test]
    fn test_error_notice_round_trip() {
        let notice = error_notice(
            OperationCode::Bind,
            &ProtocolError::bad_message("skipped step"),
        );
        assert_eq!(
            notice.get_int(field::MESSAGE).unwrap(),
            i64::from(message_code::ERR_MESSAGE)
        );
        assert_eq!(
            protocol_message_in(&notice).unwrap(),
            InboundStep::PeerError(0x0002)
        );
    }

    #[test]
    fn test_negative_code_is_bad_message() {
        let msg = Message::parse(br#"{"message":-1}"#).unwrap();
        assert!(matches!(
            protocol_message_in(&msg),
            Err(ProtocolError::BadMessage(_))
        ));
    }

    #[test]
    fn test_client_first_step_has_auth_form() {
        let out = client_message_out(Message::new(), OperationCode::Authenticate, 1);
        assert_eq!(
            out.get_int(field::AUTH_FORM).unwrap(),
            AUTH_FORM_ACCOUNT_UNRELATED
        );
        let out = client_message_out(Message::new(), OperationCode::Authenticate, 2);
        assert!(!out.contains(field::AUTH_FORM));
    }

    #[test]
    fn test_operation_mismatch() {
        let out = client_message_out(Message::new(), OperationCode::Bind, 1);
        check_operation(&out, OperationCode::Bind).unwrap();
        assert!(matches!(
            check_operation(&out, OperationCode::Unbind),
            Err(ProtocolError::BadMessage(_))
        ));
    }

    #[test]
    fn test_unknown_operation_is_bad_message() {
        let msg = Message::parse(br#"{"message":1,"operationCode":3}"#).unwrap();
        let err = check_operation(&msg, OperationCode::Bind).unwrap_err();
        assert!(matches!(&err, ProtocolError::BadMessage(m) if m.contains("operation code 3")));
    }
}
