//! Task table keyed by request id.
//!
//! The dispatcher parses inbound bytes, drives the task registered for the
//! request id and hands serialized replies back to the caller. It never
//! transmits anything itself.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use devauth_common::{DevAuthConfig, OperationCode};
use devauth_crypto::SecretBytes;

use crate::error::ProtocolError;
use crate::message::Message;
use crate::params::{ExchangeParams, PakeParams};
use crate::task::{Outcome, ProtocolTask, Task, TaskOutput};

/// What the caller should do after a successful `process_data`.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Send `outbound` (if any) and wait for the next message.
    Continue { outbound: Option<Vec<u8>> },
    /// The exchange is complete; the task has been removed.
    Finish {
        outbound: Option<Vec<u8>>,
        session_key: Option<SecretBytes>,
    },
    /// Duplicate message; nothing changed.
    Ignored,
}

/// A failed step. The task has been destroyed; `outbound` is an error notice
/// for the peer when the protocol sends one.
#[derive(Debug, Error)]
#[error("request failed: {error}")]
pub struct DispatchError {
    #[source]
    pub error: ProtocolError,
    pub outbound: Option<Vec<u8>>,
}

impl From<ProtocolError> for DispatchError {
    fn from(error: ProtocolError) -> Self {
        Self {
            error,
            outbound: None,
        }
    }
}

#[derive(Debug)]
struct TaskSlot {
    task: Task,
    last_active: Instant,
    removed: bool,
}

type SharedSlot = Arc<Mutex<TaskSlot>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
pub struct TaskDispatcher {
    config: DevAuthConfig,
    slots: Mutex<HashMap<i64, SharedSlot>>,
}

impl TaskDispatcher {
    pub fn new(config: DevAuthConfig) -> Self {
        Self {
            config,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &DevAuthConfig {
        &self.config
    }

    /// Parameters for a new task, sized to the configured default key length.
    pub fn exchange_params(
        &self,
        op_code: OperationCode,
        auth_id_self: impl Into<Vec<u8>>,
        secret: SecretBytes,
    ) -> ExchangeParams {
        ExchangeParams::new(op_code, auth_id_self, secret).with_key_len(self.config.default_key_length)
    }

    /// PAKE parameters offering the configured algorithms.
    pub fn pake_params(&self, base: ExchangeParams) -> Result<PakeParams, ProtocolError> {
        let alg = self
            .config
            .pake_alg()
            .map_err(ProtocolError::invalid_params)?;
        Ok(PakeParams::new(base, alg))
    }

    pub fn len(&self) -> usize {
        lock(&self.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, request_id: i64) -> bool {
        lock(&self.slots).contains_key(&request_id)
    }

    /// Add a task that waits for its first message from the peer.
    pub fn register(&self, request_id: i64, task: impl Into<Task>) -> Result<(), ProtocolError> {
        let mut slots = lock(&self.slots);
        if slots.contains_key(&request_id) {
            return Err(ProtocolError::invalid_params(format!(
                "request {request_id} already has a task"
            )));
        }
        if slots.len() >= self.config.max_tasks {
            warn!(request_id, max_tasks = self.config.max_tasks, "task table full");
            return Err(ProtocolError::alloc("task table full"));
        }
        let task = task.into();
        debug!(request_id, kind = ?task.kind(), role = ?task.role(), "task registered");
        slots.insert(
            request_id,
            Arc::new(Mutex::new(TaskSlot {
                task,
                last_active: Instant::now(),
                removed: false,
            })),
        );
        Ok(())
    }

    /// Register a client task and run its initiating step. `start_params`
    /// must not carry a `message` field.
    pub fn start(
        &self,
        request_id: i64,
        task: impl Into<Task>,
        start_params: &Message,
    ) -> Result<DispatchOutcome, DispatchError> {
        self.register(request_id, task)?;
        let slot = self.slot(request_id)?;
        self.drive(request_id, &slot, start_params)
    }

    /// Feed one serialized message to the task for `request_id`.
    pub fn process_data(&self, request_id: i64, data: &[u8]) -> Result<DispatchOutcome, DispatchError> {
        let slot = self.slot(request_id)?;
        match Message::parse(data) {
            Ok(inbound) => self.drive(request_id, &slot, &inbound),
            Err(error) => {
                let mut guard = lock(&slot);
                self.remove(request_id, &mut guard);
                Err(error.into())
            }
        }
    }

    /// Destroy and remove the task for `request_id`, if any.
    pub fn destroy(&self, request_id: i64) -> bool {
        let Some(slot) = lock(&self.slots).get(&request_id).cloned() else {
            return false;
        };
        let mut guard = lock(&slot);
        self.remove(request_id, &mut guard);
        true
    }

    /// Evict tasks idle for longer than the configured timeout.
    pub fn evict_idle(&self) -> usize {
        self.evict_older_than(self.config.task_timeout())
    }

    pub fn evict_older_than(&self, max_idle: Duration) -> usize {
        let candidates: Vec<(i64, SharedSlot)> = lock(&self.slots)
            .iter()
            .map(|(id, slot)| (*id, Arc::clone(slot)))
            .collect();

        let mut evicted = 0;
        for (request_id, slot) in candidates {
            // A slot being processed right now is not idle.
            let Ok(mut guard) = slot.try_lock() else {
                continue;
            };
            if !guard.removed && guard.last_active.elapsed() >= max_idle {
                info!(request_id, "evicting idle task");
                self.remove(request_id, &mut guard);
                evicted += 1;
            }
        }
        evicted
    }

    fn slot(&self, request_id: i64) -> Result<SharedSlot, ProtocolError> {
        lock(&self.slots)
            .get(&request_id)
            .cloned()
            .ok_or_else(|| ProtocolError::invalid_params(format!("no task for request {request_id}")))
    }

    fn remove(&self, request_id: i64, slot: &mut TaskSlot) {
        if slot.removed {
            return;
        }
        slot.task.destroy();
        slot.removed = true;
        lock(&self.slots).remove(&request_id);
        debug!(request_id, "task removed");
    }

    fn drive(
        &self,
        request_id: i64,
        slot: &SharedSlot,
        inbound: &Message,
    ) -> Result<DispatchOutcome, DispatchError> {
        let mut guard = lock(slot);
        if guard.removed {
            return Err(ProtocolError::invalid_params(format!("no task for request {request_id}")).into());
        }

        match guard.task.process(inbound) {
            Ok(output) => self.advance(request_id, &mut guard, inbound, output),
            Err(error) => Err(self.fail(request_id, &mut guard, error)),
        }
    }

    fn advance(
        &self,
        request_id: i64,
        slot: &mut TaskSlot,
        inbound: &Message,
        output: TaskOutput,
    ) -> Result<DispatchOutcome, DispatchError> {
        match output.outcome {
            Outcome::Ignore => {
                debug!(request_id, "duplicate message ignored");
                Ok(DispatchOutcome::Ignored)
            }
            Outcome::Continue => {
                slot.last_active = Instant::now();
                let outbound = serialize(output.send_to_peer)
                    .map_err(|error| self.fail(request_id, slot, error))?;
                Ok(DispatchOutcome::Continue { outbound })
            }
            Outcome::Finish => {
                let successor = slot
                    .task
                    .unbind_successor()
                    .map_err(|error| self.fail(request_id, slot, error))?;
                match successor {
                    Some(next) => self.chain(request_id, slot, inbound, output.send_to_peer, next),
                    None => {
                        let session_key = slot.task.take_session_key();
                        let outbound = serialize(output.send_to_peer);
                        self.remove(request_id, slot);
                        info!(request_id, "exchange finished");
                        Ok(DispatchOutcome::Finish {
                            outbound: outbound?,
                            session_key,
                        })
                    }
                }
            }
        }
    }

    /// Replace a finished PAKE unbind with its standard exchange and start it
    /// on the same inbound message.
    fn chain(
        &self,
        request_id: i64,
        slot: &mut TaskSlot,
        inbound: &Message,
        pake_final: Option<Message>,
        next: Task,
    ) -> Result<DispatchOutcome, DispatchError> {
        slot.task.destroy();
        slot.task = next;
        slot.last_active = Instant::now();
        debug!(request_id, role = ?slot.task.role(), "pake finished, starting unbind exchange");

        let started = slot
            .task
            .process(inbound)
            .map_err(|error| self.fail(request_id, slot, error))?;

        let outbound = match (pake_final, started.send_to_peer) {
            (Some(mut fin), Some(exchange_start)) => {
                if let Ok(extra) = exchange_start.payload() {
                    fin.merge_payload(extra);
                }
                Some(fin)
            }
            (fin, exchange_out) => fin.or(exchange_out),
        };
        let outbound = serialize(outbound).map_err(|error| self.fail(request_id, slot, error))?;
        Ok(DispatchOutcome::Continue { outbound })
    }

    fn fail(&self, request_id: i64, slot: &mut TaskSlot, error: ProtocolError) -> DispatchError {
        warn!(request_id, error = %error, "exchange aborted");
        let outbound = slot
            .task
            .peer_error_notice(&error)
            .and_then(|notice| notice.to_bytes().ok());
        self.remove(request_id, slot);
        DispatchError { error, outbound }
    }
}

fn serialize(message: Option<Message>) -> Result<Option<Vec<u8>>, ProtocolError> {
    message.map(|m| m.to_bytes()).transpose()
}
