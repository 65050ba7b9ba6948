//! devauth protocol core.
//!
//! This crate provides:
//! - The JSON message document and envelope helpers
//! - ISO and PAKE authenticated key exchange machines (client and server)
//! - The standard exchange that completes an unbind over a PAKE session key
//! - A dispatcher that routes serialized messages to tasks by request id
//!
//! Every machine is synchronous: `process` runs one step to completion and
//! returns the message to send, if any. Transport is the caller's job.

#![forbid(unsafe_code)]

pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod exchange;
pub mod iso;
pub mod message;
pub mod pake;
pub mod params;
pub mod task;

pub use dispatcher::{DispatchError, DispatchOutcome, TaskDispatcher};
pub use error::ProtocolError;
pub use message::Message;
pub use params::{ExchangeParams, IsoParams, PakeParams};
pub use task::{Outcome, ProtocolTask, Role, Task, TaskKind, TaskOutput};
