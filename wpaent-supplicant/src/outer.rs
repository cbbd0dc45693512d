//! Outer EAP state machine. Owns the session workspace, dispatches inbound
//! frames, runs the timers and starts or stops the helper tasks.

use std::collections::VecDeque;
use std::sync::Arc;

use pnet::datalink::MacAddr;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};
use wpaent_core::logging::hex_preview;
use wpaent_core::{
    AuthResult, CipherMetadata, Error, FailureKind, MainStage, Phase2Result, Result, SubStage,
    SupplicantConfig,
};
use wpaent_net::eap::{EapCode, EapPacket, EapType, EAP_HEADER_LEN};
use wpaent_net::eap_tls::{EapTlsFragment, EapTlsPacket};
use wpaent_net::eapol::{EapolFrame, EapolType, PAE_GROUP_ADDR};

use crate::agent::{run_agent, AgentContext};
use crate::phase2::{run_phase2, Phase2, Phase2Context};
use crate::task::{OuterMsg, TaskHandle, TunnelMsg};
use crate::tls::{TlsEngineFactory, TlsTunnel};
use crate::transport::{send_eapol, send_status, CredentialSink, FrameHandle, Transport};

/// Per-session state owned by the outer machine.
#[derive(Debug, Clone, Default, PartialEq)]
struct Workspace {
    main: MainStage,
    sub: SubStage,
    /// Identifier of the last request, echoed on every response.
    last_id: u8,
    authenticator: Option<[u8; 6]>,
    cipher: CipherMetadata,
    phase2_result: Phase2Result,
    handshake_complete: bool,
    resumed: bool,
    authenticated: bool,
    identity_deadline: Option<Instant>,
    attempt_deadline: Option<Instant>,
    handshake_deadline: Option<Instant>,
}

impl Workspace {
    fn reset_handshake(&mut self) {
        self.sub = SubStage::Start;
        self.cipher = CipherMetadata::default();
        self.phase2_result = Phase2Result::InProgress;
        self.handshake_complete = false;
        self.resumed = false;
    }

    fn next_deadline(&self) -> Option<Instant> {
        [
            self.identity_deadline,
            self.attempt_deadline,
            self.handshake_deadline,
        ]
        .into_iter()
        .flatten()
        .min()
    }
}

enum Flow {
    Continue,
    Exit,
}

pub(crate) struct OuterMachine<T: Transport> {
    config: SupplicantConfig,
    transport: Arc<T>,
    tls: Arc<dyn TlsEngineFactory>,
    credentials: Arc<dyn CredentialSink>,
    ws: Workspace,
    events_tx: mpsc::Sender<OuterMsg<T::Frame>>,
    events_rx: mpsc::Receiver<OuterMsg<T::Frame>>,
    result_tx: watch::Sender<AuthResult>,
    agent: Option<TaskHandle>,
    phase2: Option<TaskHandle>,
    tunnel_tx: Option<mpsc::Sender<TunnelMsg<T::Frame>>>,
    /// Fragments waiting for the authenticator's next empty request.
    pending: VecDeque<EapTlsPacket>,
    saved_session: Option<Vec<u8>>,
    /// Exported after the handshake, kept once the authenticator agrees.
    pending_session: Option<Vec<u8>>,
    generation: u64,
}

impl<T: Transport> OuterMachine<T> {
    pub fn new(
        config: SupplicantConfig,
        transport: Arc<T>,
        tls: Arc<dyn TlsEngineFactory>,
        credentials: Arc<dyn CredentialSink>,
        events: (mpsc::Sender<OuterMsg<T::Frame>>, mpsc::Receiver<OuterMsg<T::Frame>>),
        result_tx: watch::Sender<AuthResult>,
    ) -> Self {
        let (events_tx, events_rx) = events;
        OuterMachine {
            config,
            transport,
            tls,
            credentials,
            ws: Workspace::default(),
            events_tx,
            events_rx,
            result_tx,
            agent: None,
            phase2: None,
            tunnel_tx: None,
            pending: VecDeque::new(),
            saved_session: None,
            pending_session: None,
            generation: 0,
        }
    }

    pub async fn run(mut self) {
        let now = Instant::now();
        self.ws.main = MainStage::Initialising;
        self.ws.identity_deadline = Some(now + self.config.identity_timeout());
        self.ws.attempt_deadline = Some(now + self.config.attempt_timeout());
        info!(
            "Supplicant on {} started ({:?}/{:?})",
            self.config.interface, self.config.method, self.config.phase2
        );

        loop {
            let received = match self.ws.next_deadline() {
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline, self.events_rx.recv()).await {
                        Ok(msg) => msg,
                        Err(_) => {
                            self.on_deadline().await;
                            continue;
                        }
                    }
                }
                None => self.events_rx.recv().await,
            };
            let Some(msg) = received else {
                break;
            };
            if let Flow::Exit = self.on_message(msg).await {
                break;
            }
        }

        self.ws.main = MainStage::Closing;
        self.events_rx.close();
        while let Ok(msg) = self.events_rx.try_recv() {
            drop(msg);
        }
        info!("Supplicant on {} closed", self.config.interface);
    }

    async fn on_message(&mut self, msg: OuterMsg<T::Frame>) -> Flow {
        let outcome = match msg {
            OuterMsg::Frame(frame) => self.on_frame(frame).await,
            OuterMsg::Abort => {
                self.on_abort().await;
                return Flow::Exit;
            }
            OuterMsg::Output { generation, packets } => {
                if !self.is_current(generation) {
                    debug!("Dropping stale output of handshake {}", generation);
                    return Flow::Continue;
                }
                self.pending = packets.into();
                self.send_next_fragment()
            }
            OuterMsg::HandshakeDone {
                generation,
                tunnel,
                output,
                resumed,
                cipher,
                session,
            } => {
                if !self.is_current(generation) {
                    debug!("Dropping stale handshake {}", generation);
                    return Flow::Continue;
                }
                self.ws.resumed = resumed;
                self.ws.cipher = cipher;
                self.pending_session = session;
                self.on_handshake_done(*tunnel, output).await
            }
            OuterMsg::Phase2 { generation, result } => {
                if self.is_current(generation) {
                    debug!("Phase2 result {:?}", result);
                    self.ws.phase2_result = result;
                }
                Ok(())
            }
            OuterMsg::TaskFailed { generation, error } => {
                if self.is_current(generation) {
                    Err(error)
                } else {
                    Ok(())
                }
            }
        };
        if let Err(error) = outcome {
            error!("Handshake aborted: {}", error);
            self.finish_attempt(AuthResult::Failure(error.failure_kind())).await;
        }
        Flow::Continue
    }

    /// Events from a stopped task may still sit in the queue.
    fn is_current(&self, generation: u64) -> bool {
        generation == self.generation && (self.agent.is_some() || self.phase2.is_some())
    }

    async fn on_deadline(&mut self) {
        let now = Instant::now();
        let expired = |deadline: Option<Instant>| deadline.map_or(false, |d| d <= now);

        if expired(self.ws.attempt_deadline) || expired(self.ws.handshake_deadline) {
            warn!(
                "Authentication timed out in {:?}/{:?}",
                self.ws.main, self.ws.sub
            );
            self.finish_attempt(AuthResult::Failure(FailureKind::Timeout)).await;
            return;
        }
        if expired(self.ws.identity_deadline) {
            self.ws.identity_deadline = None;
            let destination = self.start_destination();
            info!("No identity request, sending EAPOL-Start to {}", MacAddr::from(destination));
            send_status(
                self.transport.as_ref(),
                destination,
                self.config.eapol_version,
                EapolType::Start,
            );
        }
    }

    fn start_destination(&self) -> [u8; 6] {
        self.ws
            .authenticator
            .or_else(|| self.config.peer_bssid())
            .or_else(|| self.transport.peer_bssid())
            .unwrap_or(PAE_GROUP_ADDR)
    }

    async fn on_frame(&mut self, frame: T::Frame) -> Result<()> {
        trace!("RX {}", hex_preview(frame.data(), 32));
        let (source, packet) = {
            let parsed = match EapolFrame::parse(frame.data()) {
                Ok(parsed) => parsed,
                Err(e) => {
                    debug!("Dropping frame: {}", e);
                    return Ok(());
                }
            };
            if parsed.destination != self.transport.local_mac()
                && parsed.destination != PAE_GROUP_ADDR
            {
                trace!("Frame for {} ignored", MacAddr::from(parsed.destination));
                return Ok(());
            }
            if parsed.eapol.packet_type != EapolType::Eap {
                trace!("EAPOL {:?} ignored", parsed.eapol.packet_type);
                return Ok(());
            }
            match EapPacket::from_bytes(parsed.eapol.payload) {
                Ok(packet) => (parsed.source, packet),
                Err(e) => {
                    debug!("Dropping malformed EAP packet: {}", e);
                    return Ok(());
                }
            }
        };

        match packet.code {
            EapCode::Request => {
                self.ws.last_id = packet.identifier;
                self.on_request(frame, source, &packet).await
            }
            EapCode::Success | EapCode::Failure => {
                self.on_verdict(packet.code).await;
                Ok(())
            }
            EapCode::Response => {
                trace!("EAP response from {} ignored", MacAddr::from(source));
                Ok(())
            }
        }
    }

    async fn on_request(
        &mut self,
        frame: T::Frame,
        source: [u8; 6],
        packet: &EapPacket,
    ) -> Result<()> {
        let id = packet.identifier;
        let Some(eap_type) = packet.type_byte() else {
            return Ok(());
        };
        let desired = self.config.method.eap_type();

        if eap_type == EapType::Identity as u8 {
            return self.on_identity_request(source, id).await;
        }
        if eap_type == EapType::Notification as u8 {
            info!("EAP notification: {}", String::from_utf8_lossy(packet.type_data()));
            return self.send_eap(&EapPacket::notification_response(id));
        }

        match self.ws.sub {
            SubStage::Identity | SubStage::Nak if eap_type == desired => {
                info!("Authenticator offered {:?}, starting TLS agent", self.config.method);
                self.start_agent().await
            }
            SubStage::Identity | SubStage::Nak => {
                info!("EAP type {} offered, NAK with {}", eap_type, desired);
                self.ws.sub = SubStage::Nak;
                self.send_eap(&EapPacket::nak(id, desired))
            }
            SubStage::Method if eap_type == desired => self.on_method_request(frame, packet).await,
            stage => {
                debug!("EAP type {} request ignored in {:?}", eap_type, stage);
                Ok(())
            }
        }
    }

    async fn on_identity_request(&mut self, source: [u8; 6], id: u8) -> Result<()> {
        info!("EAP identity request from {}", MacAddr::from(source));
        self.ws.identity_deadline = None;
        self.cleanup().await;

        self.ws.authenticator = Some(source);
        self.send_eap(&EapPacket::identity_response(id, &self.config.identity))?;
        self.ws.main = MainStage::EapHandshake;
        self.ws.sub = SubStage::Identity;

        let now = Instant::now();
        if self.ws.handshake_deadline.is_none() {
            self.ws.handshake_deadline = Some(now + self.config.handshake_timeout());
        }
        if self.ws.attempt_deadline.is_none() {
            self.ws.attempt_deadline = Some(now + self.config.attempt_timeout());
        }
        self.set_result(AuthResult::InProgress);
        Ok(())
    }

    async fn on_method_request(&mut self, frame: T::Frame, packet: &EapPacket) -> Result<()> {
        let fragment = EapTlsFragment::parse(packet.type_data())?;
        if fragment.flags.start() {
            info!("EAP-TLS start during handshake, restarting");
            return self.start_agent().await;
        }

        if fragment.data.is_empty() {
            if self.pending.is_empty() {
                debug!("Empty EAP-TLS request with nothing queued");
                return Ok(());
            }
            return self.send_next_fragment();
        }

        if fragment.flags.more_fragments() {
            self.send_eap_tls(EapTlsPacket::ack())?;
        }
        let Some(tunnel_tx) = &self.tunnel_tx else {
            debug!("EAP-TLS data with no tunnel task, dropped");
            return Ok(());
        };
        let msg = TunnelMsg {
            frame,
            offset: EapolFrame::payload_offset() + EAP_HEADER_LEN + 1,
            len: packet.type_data().len(),
            id: packet.identifier,
        };
        match tunnel_tx.try_send(msg) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                Err(Error::OutOfMemory("tunnel queue full".into()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Tunnel task gone, fragment dropped");
                Ok(())
            }
        }
    }

    async fn on_verdict(&mut self, code: EapCode) {
        if self.ws.main != MainStage::EapHandshake {
            debug!("EAP {:?} outside a handshake ignored", code);
            return;
        }
        let result = if code == EapCode::Failure {
            warn!("EAP-Failure from authenticator");
            self.saved_session = None;
            AuthResult::Failure(FailureKind::Rejected)
        } else if !self.ws.handshake_complete {
            error!("EAP-Success before the TLS handshake completed");
            AuthResult::Failure(FailureKind::Protocol)
        } else if self.config.method.is_tunneled()
            && !self.ws.resumed
            && !matches!(
                self.ws.phase2_result,
                Phase2Result::Success | Phase2Result::Aborted
            )
        {
            error!(
                "EAP-Success with inner result {:?}",
                self.ws.phase2_result
            );
            AuthResult::Failure(FailureKind::Protocol)
        } else {
            if let Some(session) = self.pending_session.take() {
                self.saved_session = Some(session);
            }
            AuthResult::Success
        };
        self.finish_attempt(result).await;
    }

    async fn on_handshake_done(
        &mut self,
        tunnel: TlsTunnel,
        output: Vec<EapTlsPacket>,
    ) -> Result<()> {
        if let Some(agent) = self.agent.take() {
            agent.stop().await;
        }
        self.tunnel_tx = None;
        self.ws.handshake_complete = true;

        if self.config.method.is_tunneled() && !self.ws.resumed {
            return self.start_phase2(tunnel);
        }
        self.pending = output.into();
        self.send_next_fragment()
    }

    /// Spawns a fresh TLS agent. Any earlier handshake is torn down first.
    async fn start_agent(&mut self) -> Result<()> {
        self.cleanup().await;
        self.generation += 1;

        let saved = self.saved_session.as_deref();
        let engine = self.tls.create(saved)?;
        let tunnel = TlsTunnel::new(
            engine,
            self.config.reassembly_capacity,
            self.config.fragment_budget(),
            saved.is_some(),
        );
        let (tunnel_tx, inbox) = mpsc::channel(self.config.queue_depth);
        let ctx = AgentContext {
            generation: self.generation,
            method: self.config.method,
            security: self.config.security,
            tunnel_wait: self.config.tunnel_wait(),
            credentials: self.credentials.clone(),
            events: self.events_tx.clone(),
        };
        self.agent = Some(TaskHandle::spawn("TLS agent", self.generation, move |cancel| {
            run_agent(tunnel, ctx, inbox, cancel)
        }));
        self.tunnel_tx = Some(tunnel_tx);
        self.ws.sub = SubStage::Method;
        Ok(())
    }

    fn start_phase2(&mut self, tunnel: TlsTunnel) -> Result<()> {
        let phase2 = Phase2::new(
            self.config.method,
            self.config.phase2,
            self.config.inner_identity(),
            self.config.inner_password(),
            tunnel.capacity(),
            self.ws.cipher,
        )?;
        let (tunnel_tx, inbox) = mpsc::channel(self.config.queue_depth);
        let ctx = Phase2Context {
            generation: self.generation,
            tunnel_wait: self.config.tunnel_wait(),
            events: self.events_tx.clone(),
        };
        info!("Starting Phase2 ({:?})", self.config.phase2);
        self.phase2 = Some(TaskHandle::spawn("Phase2", self.generation, move |cancel| {
            run_phase2(tunnel, phase2, ctx, inbox, cancel)
        }));
        self.tunnel_tx = Some(tunnel_tx);
        Ok(())
    }

    async fn on_abort(&mut self) {
        if self.ws.main == MainStage::EapHandshake || self.ws.authenticated {
            let destination = self.start_destination();
            send_status(
                self.transport.as_ref(),
                destination,
                self.config.eapol_version,
                EapolType::Logoff,
            );
        }
        self.cleanup().await;
        if !self.result_tx.borrow().is_terminal() {
            self.set_result(AuthResult::Failure(FailureKind::Aborted));
        }
        self.ws.authenticated = false;
    }

    /// Stops Phase2, then the agent, and forgets the handshake. A no-op when
    /// nothing is running.
    async fn cleanup(&mut self) {
        if let Some(phase2) = self.phase2.take() {
            debug!("Stopping Phase2 of handshake {}", phase2.generation());
            phase2.stop().await;
        }
        if let Some(agent) = self.agent.take() {
            agent.stop().await;
        }
        self.tunnel_tx = None;
        if !self.pending.is_empty() {
            debug!("Discarding {} unsent fragment(s)", self.pending.len());
            self.pending.clear();
        }
        self.ws.reset_handshake();
    }

    async fn finish_attempt(&mut self, result: AuthResult) {
        self.cleanup().await;
        self.ws.authenticated = result == AuthResult::Success;
        self.ws.main = MainStage::Initialising;
        self.ws.identity_deadline = None;
        self.ws.attempt_deadline = None;
        self.ws.handshake_deadline = None;
        self.pending_session = None;
        self.set_result(result);
    }

    fn set_result(&self, result: AuthResult) {
        let previous = self.result_tx.send_replace(result);
        if previous != result {
            info!("Authentication result {:?} -> {:?}", previous, result);
        }
    }

    fn send_next_fragment(&mut self) -> Result<()> {
        match self.pending.pop_front() {
            Some(packet) => self.send_eap_tls(packet),
            None => Ok(()),
        }
    }

    fn send_eap_tls(&self, packet: EapTlsPacket) -> Result<()> {
        let eap = EapPacket::response(
            self.ws.last_id,
            self.config.method.eap_type(),
            &packet.to_eap_data(),
        );
        self.send_eap(&eap)
    }

    fn send_eap(&self, packet: &EapPacket) -> Result<()> {
        let destination = self.ws.authenticator.unwrap_or(PAE_GROUP_ADDR);
        send_eapol(
            self.transport.as_ref(),
            destination,
            self.config.eapol_version,
            EapolType::Eap,
            &packet.to_bytes(),
        )
    }
}
