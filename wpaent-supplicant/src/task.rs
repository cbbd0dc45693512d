//! Messages exchanged between the three per-session tasks, and the handle
//! used to cancel and join a helper task.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use wpaent_core::{CipherMetadata, Error, Phase2Result};
use wpaent_net::eap_tls::EapTlsPacket;

use crate::tls::TlsTunnel;

/// Everything the outer state machine waits on.
pub(crate) enum OuterMsg<F> {
    /// An inbound EAPOL frame from the transport.
    Frame(F),
    /// EAP-TLS payloads to send, first one now, the rest on each ack.
    Output {
        generation: u64,
        packets: Vec<EapTlsPacket>,
    },
    /// The agent is done. `output` is the final flight or the terminal empty
    /// response, sent only once the handshake is recorded as complete.
    HandshakeDone {
        generation: u64,
        tunnel: Box<TlsTunnel>,
        output: Vec<EapTlsPacket>,
        resumed: bool,
        cipher: CipherMetadata,
        session: Option<Vec<u8>>,
    },
    Phase2 {
        generation: u64,
        result: Phase2Result,
    },
    TaskFailed {
        generation: u64,
        error: Error,
    },
    /// Tear the session down.
    Abort,
}

/// One EAP-TLS fragment relayed to the TLS agent or the Phase2 engine. The
/// frame travels with the message and is released when it is dropped.
pub(crate) struct TunnelMsg<F> {
    pub frame: F,
    /// Start of the EAP-TLS flags byte inside the frame.
    pub offset: usize,
    pub len: usize,
    /// Identifier of the outer request that carried the fragment.
    pub id: u8,
}

/// Cancellation token plus join handle of a spawned helper task.
pub(crate) struct TaskHandle {
    name: &'static str,
    generation: u64,
    cancel: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl TaskHandle {
    pub fn spawn<Fut>(
        name: &'static str,
        generation: u64,
        run: impl FnOnce(watch::Receiver<bool>) -> Fut,
    ) -> Self
    where
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (cancel, cancel_rx) = watch::channel(false);
        let join = tokio::spawn(run(cancel_rx));
        TaskHandle {
            name,
            generation,
            cancel,
            join,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Signals cancellation and blocks until the task has exited.
    pub async fn stop(self) {
        let _ = self.cancel.send(true);
        match self.join.await {
            Ok(()) => debug!("{} task {} joined", self.name, self.generation),
            Err(e) => warn!("{} task {} ended abnormally: {}", self.name, self.generation, e),
        }
    }
}

/// Resolves once cancellation is signalled or the canceller is gone.
pub(crate) async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let _ = cancel.wait_for(|c| *c).await;
}

/// Queues an event for the outer machine unless cancelled first, so a task
/// being joined never blocks on a full queue.
pub(crate) async fn send_event<F>(
    events: &mpsc::Sender<OuterMsg<F>>,
    cancel: &mut watch::Receiver<bool>,
    msg: OuterMsg<F>,
) -> Result<(), Error> {
    tokio::select! {
        biased;
        _ = cancelled(cancel) => Err(Error::Aborted),
        sent = events.send(msg) => sent.map_err(|_| Error::Aborted),
    }
}

/// Waits for the next relayed fragment. A wait longer than `wait` is logged
/// and the wait goes on; the outer timers decide when to give up. `None`
/// on cancellation.
pub(crate) async fn next_fragment<F>(
    inbox: &mut mpsc::Receiver<TunnelMsg<F>>,
    cancel: &mut watch::Receiver<bool>,
    wait: Duration,
    who: &str,
) -> Option<TunnelMsg<F>> {
    loop {
        tokio::select! {
            biased;
            _ = cancelled(cancel) => return None,
            received = tokio::time::timeout(wait, inbox.recv()) => match received {
                Ok(msg) => return msg,
                Err(_) => warn!("{}: no EAP-TLS fragment within {:?}, still waiting", who, wait),
            },
        }
    }
}

/// Releases every frame still queued for a task that is exiting.
pub(crate) fn drain<F>(inbox: &mut mpsc::Receiver<TunnelMsg<F>>) -> usize {
    inbox.close();
    let mut released = 0;
    while let Ok(msg) = inbox.try_recv() {
        drop(msg);
        released += 1;
    }
    released
}
