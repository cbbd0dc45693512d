//! Session arena: one slot per authenticating interface, indexed by a small
//! integer handle.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use wpaent_core::{AuthResult, Error, Result, SupplicantConfig};

use crate::outer::OuterMachine;
use crate::task::OuterMsg;
use crate::tls::TlsEngineFactory;
use crate::transport::{CredentialSink, Transport};

/// Everything one session needs from the caller.
pub struct SessionParams<T: Transport> {
    pub config: SupplicantConfig,
    pub transport: Arc<T>,
    pub tls: Arc<dyn TlsEngineFactory>,
    pub credentials: Arc<dyn CredentialSink>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub usize);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

struct Slot<F> {
    events: mpsc::Sender<OuterMsg<F>>,
    result: watch::Receiver<AuthResult>,
    join: JoinHandle<()>,
}

/// Cloneable inbound path into one session, for receive loops that run
/// outside the arena's owner.
pub struct SessionHandle<F> {
    id: SessionId,
    events: mpsc::Sender<OuterMsg<F>>,
}

impl<F> Clone for SessionHandle<F> {
    fn clone(&self) -> Self {
        SessionHandle {
            id: self.id,
            events: self.events.clone(),
        }
    }
}

impl<F: Send + 'static> SessionHandle<F> {
    pub(crate) fn new(id: SessionId, events: mpsc::Sender<OuterMsg<F>>) -> Self {
        SessionHandle { id, events }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub async fn deliver(&self, frame: F) -> Result<()> {
        self.events
            .send(OuterMsg::Frame(frame))
            .await
            .map_err(|_| Error::BadParameter(format!("{} is closed", self.id)))
    }

    /// Non-blocking delivery; a full queue drops the frame.
    pub fn try_deliver(&self, frame: F) -> Result<()> {
        self.events.try_send(OuterMsg::Frame(frame)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                Error::OutOfMemory(format!("{} inbound queue full", self.id))
            }
            mpsc::error::TrySendError::Closed(_) => {
                Error::BadParameter(format!("{} is closed", self.id))
            }
        })
    }
}

/// Owns every running session. Sessions share nothing; each slot holds its
/// own queue and tasks.
pub struct Supplicant<T: Transport> {
    slots: Vec<Option<Slot<T::Frame>>>,
}

impl<T: Transport> Supplicant<T> {
    /// Sizes the arena from `max_sessions`.
    pub fn new(config: &SupplicantConfig) -> Self {
        Supplicant {
            slots: (0..config.max_sessions).map(|_| None).collect(),
        }
    }

    /// Validates the configuration and spawns the outer state machine.
    pub fn start(&mut self, params: SessionParams<T>) -> Result<SessionId> {
        params.config.validate()?;
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or_else(|| {
                Error::BadParameter(format!("all {} session slots in use", self.slots.len()))
            })?;

        let (events_tx, events_rx) = mpsc::channel(params.config.queue_depth);
        let (result_tx, result_rx) = watch::channel(AuthResult::InProgress);
        let machine = OuterMachine::new(
            params.config,
            params.transport,
            params.tls,
            params.credentials,
            (events_tx.clone(), events_rx),
            result_tx,
        );
        let join = tokio::spawn(machine.run());

        let id = SessionId(index);
        self.slots[index] = Some(Slot {
            events: events_tx,
            result: result_rx,
            join,
        });
        info!("Started {}", id);
        Ok(id)
    }

    /// Aborts the session and waits for its tasks to finish. The slot is
    /// free again afterwards.
    pub async fn stop(&mut self, id: SessionId) -> Result<AuthResult> {
        let slot = self
            .slots
            .get_mut(id.0)
            .and_then(Option::take)
            .ok_or_else(|| Error::BadParameter(format!("no such session {}", id)))?;

        if slot.events.send(OuterMsg::Abort).await.is_err() {
            warn!("{} already exited", id);
        }
        if let Err(e) = slot.join.await {
            warn!("{} ended abnormally: {}", id, e);
        }
        let result = *slot.result.borrow();
        info!("Stopped {} with {:?}", id, result);
        Ok(result)
    }

    pub fn result(&self, id: SessionId) -> Result<AuthResult> {
        Ok(*self.slot(id)?.result.borrow())
    }

    /// Resolves at the first success or failure.
    pub async fn wait_result(&self, id: SessionId) -> Result<AuthResult> {
        let mut result = self.slot(id)?.result.clone();
        let terminal = result
            .wait_for(AuthResult::is_terminal)
            .await
            .map_err(|_| Error::Aborted)?;
        Ok(*terminal)
    }

    pub async fn deliver(&self, id: SessionId, frame: T::Frame) -> Result<()> {
        self.handle(id)?.deliver(frame).await
    }

    pub fn handle(&self, id: SessionId) -> Result<SessionHandle<T::Frame>> {
        Ok(SessionHandle::new(id, self.slot(id)?.events.clone()))
    }

    pub fn active(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    fn slot(&self, id: SessionId) -> Result<&Slot<T::Frame>> {
        self.slots
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| Error::BadParameter(format!("no such session {}", id)))
    }
}
