//! Task abstraction: the transition rule, step outcomes, the
//! [`ProtocolTask`] trait and the closed [`Task`] set the dispatcher holds.

use devauth_common::OperationCode;
use devauth_crypto::SecretBytes;

use crate::error::ProtocolError;
use crate::exchange::{UnbindExchangeClientTask, UnbindExchangeServerTask};
use crate::iso::{IsoClientTask, IsoServerTask};
use crate::message::Message;
use crate::pake::{PakeClientTask, PakeServerTask};

/// Decision for a handler whose precondition is `expected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Advance,
    /// Duplicate of a step already processed.
    Ignore,
    /// The message skips ahead of the current status.
    Reject,
}

pub fn transition<S: Ord>(current: S, expected: S) -> Transition {
    match current.cmp(&expected) {
        std::cmp::Ordering::Equal => Transition::Advance,
        std::cmp::Ordering::Greater => Transition::Ignore,
        std::cmp::Ordering::Less => Transition::Reject,
    }
}

/// `Ok(true)` to run the handler, `Ok(false)` for a duplicate.
pub(crate) fn check_transition<S: Ord + Copy + std::fmt::Debug>(
    current: S,
    expected: S,
) -> Result<bool, ProtocolError> {
    match transition(current, expected) {
        Transition::Advance => Ok(true),
        Transition::Ignore => {
            tracing::info!(status = ?current, "message is repeated, ignoring");
            Ok(false)
        }
        Transition::Reject => Err(ProtocolError::bad_message(format!(
            "status {current:?} has not reached {expected:?}"
        ))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    Finish,
    Ignore,
}

/// Result of a successful `process` call.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutput {
    pub outcome: Outcome,
    pub send_to_peer: Option<Message>,
}

impl TaskOutput {
    pub fn ignore() -> Self {
        Self {
            outcome: Outcome::Ignore,
            send_to_peer: None,
        }
    }

    pub fn proceed(send_to_peer: Message) -> Self {
        Self {
            outcome: Outcome::Continue,
            send_to_peer: Some(send_to_peer),
        }
    }

    pub fn finish(send_to_peer: Option<Message>) -> Self {
        Self {
            outcome: Outcome::Finish,
            send_to_peer,
        }
    }

    /// Apply `wrap` to the outbound payload, if any.
    pub fn map_message(mut self, wrap: impl FnOnce(Message) -> Message) -> Self {
        self.send_to_peer = self.send_to_peer.map(wrap);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    IsoProtocol,
    PakeProtocol,
    UnbindStandardExchange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// One side of one exchange.
pub trait ProtocolTask: Send {
    fn kind(&self) -> TaskKind;

    fn role(&self) -> Role;

    fn op_code(&self) -> OperationCode;

    /// Run the step `inbound` asks for. On error the task has already wiped
    /// its derived secrets and must not be driven further.
    fn process(&mut self, inbound: &Message) -> Result<TaskOutput, ProtocolError>;

    /// The negotiated session key, once the exchange has finished.
    fn session_key(&self) -> Option<&SecretBytes>;

    fn take_session_key(&mut self) -> Option<SecretBytes>;

    /// Zero every secret the task holds.
    fn destroy(&mut self);

    /// Message telling the peer this side aborted, if the protocol sends one.
    fn peer_error_notice(&self, _error: &ProtocolError) -> Option<Message> {
        None
    }
}

/// Every machine the dispatcher can hold.
#[derive(Debug)]
pub enum Task {
    IsoClient(IsoClientTask),
    IsoServer(IsoServerTask),
    PakeClient(PakeClientTask),
    PakeServer(PakeServerTask),
    UnbindExchangeClient(UnbindExchangeClientTask),
    UnbindExchangeServer(UnbindExchangeServerTask),
}

macro_rules! each_task {
    ($self:expr, $task:ident => $body:expr) => {
        match $self {
            Task::IsoClient($task) => $body,
            Task::IsoServer($task) => $body,
            Task::PakeClient($task) => $body,
            Task::PakeServer($task) => $body,
            Task::UnbindExchangeClient($task) => $body,
            Task::UnbindExchangeServer($task) => $body,
        }
    };
}

impl ProtocolTask for Task {
    fn kind(&self) -> TaskKind {
        each_task!(self, t => t.kind())
    }

    fn role(&self) -> Role {
        each_task!(self, t => t.role())
    }

    fn op_code(&self) -> OperationCode {
        each_task!(self, t => t.op_code())
    }

    fn process(&mut self, inbound: &Message) -> Result<TaskOutput, ProtocolError> {
        each_task!(self, t => t.process(inbound))
    }

    fn session_key(&self) -> Option<&SecretBytes> {
        each_task!(self, t => t.session_key())
    }

    fn take_session_key(&mut self) -> Option<SecretBytes> {
        each_task!(self, t => t.take_session_key())
    }

    fn destroy(&mut self) {
        each_task!(self, t => t.destroy())
    }

    fn peer_error_notice(&self, error: &ProtocolError) -> Option<Message> {
        each_task!(self, t => t.peer_error_notice(error))
    }
}

impl Task {
    /// For a finished PAKE unbind, build the standard exchange that runs on
    /// its session key. The key moves out of the PAKE task.
    pub fn unbind_successor(&mut self) -> Result<Option<Task>, ProtocolError> {
        match self {
            Task::PakeServer(t) if t.op_code() == OperationCode::Unbind => t
                .handover()
                .map(|params| UnbindExchangeServerTask::new(params).map(Task::UnbindExchangeServer))
                .transpose(),
            Task::PakeClient(t) if t.op_code() == OperationCode::Unbind => t
                .handover()
                .map(|params| UnbindExchangeClientTask::new(params).map(Task::UnbindExchangeClient))
                .transpose(),
            _ => Ok(None),
        }
    }
}

impl From<IsoClientTask> for Task {
    fn from(task: IsoClientTask) -> Self {
        Task::IsoClient(task)
    }
}

impl From<IsoServerTask> for Task {
    fn from(task: IsoServerTask) -> Self {
        Task::IsoServer(task)
    }
}

impl From<PakeClientTask> for Task {
    fn from(task: PakeClientTask) -> Self {
        Task::PakeClient(task)
    }
}

impl From<PakeServerTask> for Task {
    fn from(task: PakeServerTask) -> Self {
        Task::PakeServer(task)
    }
}

impl From<UnbindExchangeClientTask> for Task {
    fn from(task: UnbindExchangeClientTask) -> Self {
        Task::UnbindExchangeClient(task)
    }
}

impl From<UnbindExchangeServerTask> for Task {
    fn from(task: UnbindExchangeServerTask) -> Self {
        Task::UnbindExchangeServer(task)
    }
}
