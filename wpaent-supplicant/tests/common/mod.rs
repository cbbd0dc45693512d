#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use wpaent_core::{
    CipherMetadata, Error, HandshakeState, InnerMethod, OuterMethod, Result, SupplicantConfig,
};
use wpaent_net::eap::{EapCode, EapPacket};
use wpaent_net::eap_tls::{EapTlsFragment, TlsFlags};
use wpaent_net::eapol::{self, EapolFrame, EapolType};
use wpaent_supplicant::{
    CredentialSink, FrameHandle, HandshakeStatus, SessionId, SessionParams, Supplicant, TlsBio,
    TlsEngine, TlsEngineFactory, Transport,
};

pub const STA: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];
pub const AP: [u8; 6] = [0x00, 0x11, 0x22, 0x33, 0x44, 0x55];

/// First byte of a scripted server flight.
pub const FULL_HANDSHAKE: u8 = 0x02;
pub const RESUME_HANDSHAKE: u8 = 0x05;
pub const SESSION_TICKET: &[u8] = b"session-1";

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

pub struct MockFrame {
    buf: Vec<u8>,
    len: usize,
    released: Arc<AtomicUsize>,
}

impl FrameHandle for MockFrame {
    fn data(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    fn set_len(&mut self, len: usize) {
        self.len = len;
    }
}

impl Drop for MockFrame {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Captures every sent frame and counts frame allocations and releases.
pub struct MockTransport {
    sent: mpsc::UnboundedSender<Vec<u8>>,
    allocated: AtomicUsize,
    released: Arc<AtomicUsize>,
}

impl MockTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (sent, rx) = mpsc::unbounded_channel();
        let transport = MockTransport {
            sent,
            allocated: AtomicUsize::new(0),
            released: Arc::new(AtomicUsize::new(0)),
        };
        (Arc::new(transport), rx)
    }

    /// Wraps inbound bytes the way a driver would hand them over.
    pub fn inbound(&self, bytes: &[u8]) -> MockFrame {
        self.allocated.fetch_add(1, Ordering::SeqCst);
        MockFrame {
            buf: bytes.to_vec(),
            len: bytes.len(),
            released: self.released.clone(),
        }
    }

    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl Transport for MockTransport {
    type Frame = MockFrame;

    fn alloc(&self, len: usize) -> Result<MockFrame> {
        self.allocated.fetch_add(1, Ordering::SeqCst);
        Ok(MockFrame {
            buf: vec![0u8; len],
            len,
            released: self.released.clone(),
        })
    }

    fn send(&self, frame: MockFrame, _payload_len: usize) -> Result<()> {
        self.sent
            .send(frame.data().to_vec())
            .map_err(|_| Error::Transport("capture closed".into()))
    }

    fn local_mac(&self) -> [u8; 6] {
        STA
    }

    fn peer_bssid(&self) -> Option<[u8; 6]> {
        None
    }
}

// ---------------------------------------------------------------------------
// Credential sink
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingSink {
    pub installed: Mutex<Vec<Vec<u8>>>,
}

impl CredentialSink for RecordingSink {
    fn install_psk(&self, pmk: &[u8]) -> Result<()> {
        self.installed.lock().unwrap().push(pmk.to_vec());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Scripted TLS engine
// ---------------------------------------------------------------------------

/// Deterministic keying material for `label`.
pub fn scripted_keys(label: &str) -> Vec<u8> {
    (0..128).map(|i| (i as u8) ^ (label.len() as u8)).collect()
}

/// Application data framing used by the scripted engine: `0x17 ‖ u16 len ‖ data`.
pub fn app_record(data: &[u8]) -> Vec<u8> {
    let mut out = vec![0x17];
    out.extend_from_slice(&(data.len() as u16).to_be_bytes());
    out.extend_from_slice(data);
    out
}

pub fn split_records(mut bytes: &[u8]) -> Vec<Vec<u8>> {
    let mut records = Vec::new();
    while bytes.len() >= 3 {
        let len = u16::from_be_bytes([bytes[1], bytes[2]]) as usize;
        records.push(bytes[3..3 + len].to_vec());
        bytes = &bytes[3 + len..];
    }
    records
}

pub fn server_flight(kind: u8, len: usize) -> Vec<u8> {
    let mut flight = vec![0x16; len];
    flight[0] = kind;
    flight
}

fn read_available(bio: &mut dyn TlsBio) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut buf = [0u8; 512];
    loop {
        match bio.read(&mut buf) {
            Ok(n) => out.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(out),
            Err(e) => return Err(Error::Tls(e.to_string())),
        }
    }
}

fn write_all(bio: &mut dyn TlsBio, data: &[u8]) -> Result<()> {
    bio.write(data)
        .map(|_| ())
        .map_err(|e| match e.kind() {
            io::ErrorKind::OutOfMemory => Error::OutOfMemory(e.to_string()),
            _ => Error::Tls(e.to_string()),
        })
}

/// Plays the client side of a two-round handshake with no cryptography.
pub struct ScriptedEngine {
    state: HandshakeState,
    client_hello_len: usize,
    client_flight_len: usize,
    resumed: bool,
}

impl TlsEngine for ScriptedEngine {
    fn state(&self) -> HandshakeState {
        self.state
    }

    fn handshake_step(&mut self, bio: &mut dyn TlsBio) -> Result<HandshakeStatus> {
        match self.state {
            HandshakeState::HelloRequest => {
                write_all(bio, &vec![0x16; self.client_hello_len])?;
                self.state = HandshakeState::ServerHello;
                Ok(HandshakeStatus::InProgress)
            }
            HandshakeState::ServerHello => {
                let flight = read_available(bio)?;
                match flight.first() {
                    None => Ok(HandshakeStatus::WantRead),
                    Some(&FULL_HANDSHAKE) => {
                        write_all(bio, &vec![0x16; self.client_flight_len])?;
                        self.state = HandshakeState::ServerChangeCipherSpec;
                        Ok(HandshakeStatus::InProgress)
                    }
                    Some(&RESUME_HANDSHAKE) => {
                        write_all(bio, &[0x14, 0x03, 0x03, 0x00, 0x01, 0x01])?;
                        self.resumed = true;
                        self.state = HandshakeState::HandshakeOver;
                        Ok(HandshakeStatus::Complete)
                    }
                    Some(other) => {
                        Err(Error::Tls(format!("unexpected server flight {:#x}", other)))
                    }
                }
            }
            HandshakeState::ServerChangeCipherSpec => {
                if read_available(bio)?.is_empty() {
                    return Ok(HandshakeStatus::WantRead);
                }
                self.state = HandshakeState::HandshakeOver;
                Ok(HandshakeStatus::Complete)
            }
            _ => Ok(HandshakeStatus::Complete),
        }
    }

    fn is_resumed(&self) -> bool {
        self.resumed
    }

    fn read_app_data(&mut self, bio: &mut dyn TlsBio, buf: &mut [u8]) -> Result<Option<usize>> {
        let mut header = [0u8; 3];
        match bio.read(&mut header) {
            Ok(3) => {}
            Ok(_) => return Err(Error::Tls("short record header".into())),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
            Err(e) => return Err(Error::Tls(e.to_string())),
        }
        let len = u16::from_be_bytes([header[1], header[2]]) as usize;
        let mut read = 0;
        while read < len {
            read += bio
                .read(&mut buf[read..len])
                .map_err(|e| Error::Tls(e.to_string()))?;
        }
        Ok(Some(len))
    }

    fn write_app_data(&mut self, bio: &mut dyn TlsBio, data: &[u8]) -> Result<()> {
        write_all(bio, &app_record(data))
    }

    fn export_session(&self) -> Option<Vec<u8>> {
        Some(SESSION_TICKET.to_vec())
    }

    fn export_keying_material(&self, label: &str, out: &mut [u8]) -> Result<()> {
        out.copy_from_slice(&scripted_keys(label)[..out.len()]);
        Ok(())
    }

    fn cipher_metadata(&self) -> CipherMetadata {
        CipherMetadata {
            tag_len: 16,
            iv_len: 8,
            mac_len: 0,
        }
    }
}

pub struct ScriptedFactory {
    pub client_hello_len: usize,
    pub client_flight_len: usize,
    /// Saved session handed to each engine created.
    pub offered: Mutex<Vec<Option<Vec<u8>>>>,
}

impl ScriptedFactory {
    pub fn new(client_hello_len: usize, client_flight_len: usize) -> Self {
        ScriptedFactory {
            client_hello_len,
            client_flight_len,
            offered: Mutex::new(Vec::new()),
        }
    }
}

impl TlsEngineFactory for ScriptedFactory {
    fn create(&self, saved_session: Option<&[u8]>) -> Result<Box<dyn TlsEngine>> {
        self.offered
            .lock()
            .unwrap()
            .push(saved_session.map(<[u8]>::to_vec));
        Ok(Box::new(ScriptedEngine {
            state: HandshakeState::HelloRequest,
            client_hello_len: self.client_hello_len,
            client_flight_len: self.client_flight_len,
            resumed: false,
        }))
    }
}

// ---------------------------------------------------------------------------
// Authenticator side
// ---------------------------------------------------------------------------

pub fn config(method: OuterMethod, phase2: InnerMethod) -> SupplicantConfig {
    SupplicantConfig {
        method,
        phase2,
        identity: "anonymous@example.org".into(),
        password: "clientPass".into(),
        inner_identity: Some("User".into()),
        ..SupplicantConfig::default()
    }
}

/// One captured outbound frame.
#[derive(Debug)]
pub struct Sent {
    pub destination: [u8; 6],
    pub packet_type: EapolType,
    pub eap: Option<EapPacket>,
}

impl Sent {
    pub fn eap(&self) -> &EapPacket {
        self.eap.as_ref().expect("EAP payload")
    }

    pub fn tls(&self) -> EapTlsFragment<'_> {
        EapTlsFragment::parse(self.eap().type_data()).expect("EAP-TLS payload")
    }
}

pub struct Harness {
    pub supplicant: Supplicant<MockTransport>,
    pub id: SessionId,
    pub transport: Arc<MockTransport>,
    pub sent: mpsc::UnboundedReceiver<Vec<u8>>,
    pub sink: Arc<RecordingSink>,
    pub factory: Arc<ScriptedFactory>,
    pub method: OuterMethod,
}

impl Harness {
    pub fn start(config: SupplicantConfig, factory: ScriptedFactory) -> Harness {
        let method = config.method;
        let (transport, sent) = MockTransport::new();
        let sink = Arc::new(RecordingSink::default());
        let factory = Arc::new(factory);
        let mut supplicant = Supplicant::new(&config);
        let id = supplicant
            .start(SessionParams {
                config,
                transport: transport.clone(),
                tls: factory.clone(),
                credentials: sink.clone(),
            })
            .expect("session starts");
        Harness {
            supplicant,
            id,
            transport,
            sent,
            sink,
            factory,
            method,
        }
    }

    pub async fn deliver_eap(&self, packet: &EapPacket) {
        let payload = packet.to_bytes();
        let mut buf = vec![0u8; eapol::frame_len(payload.len())];
        eapol::write_frame(&mut buf, STA, AP, 1, EapolType::Eap, &payload).unwrap();
        let frame = self.transport.inbound(&buf);
        self.supplicant.deliver(self.id, frame).await.unwrap();
    }

    pub async fn identity_request(&self, id: u8) {
        self.deliver_eap(&EapPacket::request(id, 1, &[])).await;
    }

    pub async fn method_request(&self, id: u8, data: &[u8]) {
        self.deliver_eap(&EapPacket::request(id, self.method.eap_type(), data))
            .await;
    }

    pub async fn tls_start(&self, id: u8) {
        self.method_request(id, &[TlsFlags::START]).await;
    }

    /// The authenticator's empty request pulling the next fragment.
    pub async fn tls_ack(&self, id: u8) {
        self.method_request(id, &[0]).await;
    }

    /// Sends `data` as a fragmented EAP-TLS message, `budget` bytes each,
    /// checking the supplicant acks every non-final fragment. Returns the
    /// next identifier.
    pub async fn send_tls(&mut self, mut id: u8, data: &[u8], budget: usize) -> u8 {
        let chunks: Vec<&[u8]> = data.chunks(budget).collect();
        for (i, chunk) in chunks.iter().enumerate() {
            let first = i == 0;
            let more = i + 1 < chunks.len();
            let mut body = vec![TlsFlags::new(first && more, more, false).as_u8()];
            if first && more {
                body.extend_from_slice(&(data.len() as u32).to_be_bytes());
            }
            body.extend_from_slice(chunk);
            self.method_request(id, &body).await;
            if more {
                let ack = self.next_eap().await;
                assert_eq!(ack.eap().identifier, id);
                assert!(ack.tls().data.is_empty(), "expected a fragment ack");
            }
            id = id.wrapping_add(1);
        }
        id
    }

    /// Sends one tunneled record in a single fragment.
    pub async fn send_record(&mut self, id: u8, plaintext: &[u8]) {
        let mut body = vec![0u8];
        body.extend(app_record(plaintext));
        self.method_request(id, &body).await;
    }

    /// Collects fragments of the supplicant's next EAP-TLS message, pulling
    /// each one with an empty request. Returns the reassembled bytes.
    pub async fn recv_tls(&mut self, mut next_id: u8) -> (Vec<u8>, u8) {
        let mut out = Vec::new();
        loop {
            let sent = self.next_eap().await;
            let fragment = sent.tls();
            out.extend_from_slice(fragment.data);
            if !fragment.flags.more_fragments() {
                return (out, next_id);
            }
            self.tls_ack(next_id).await;
            next_id = next_id.wrapping_add(1);
        }
    }

    /// The decrypted records of the supplicant's next EAP-TLS response.
    pub async fn recv_records(&mut self) -> Vec<Vec<u8>> {
        let sent = self.next_eap().await;
        split_records(sent.tls().data)
    }

    pub async fn next_frame(&mut self) -> Sent {
        let bytes = tokio::time::timeout(Duration::from_secs(5), self.sent.recv())
            .await
            .expect("frame within 5s")
            .expect("transport open");
        let frame = EapolFrame::parse(&bytes).expect("valid EAPOL frame");
        let eap = match frame.eapol.packet_type {
            EapolType::Eap => Some(EapPacket::from_bytes(frame.eapol.payload).expect("valid EAP")),
            _ => None,
        };
        Sent {
            destination: frame.destination,
            packet_type: frame.eapol.packet_type,
            eap,
        }
    }

    pub async fn next_eap(&mut self) -> Sent {
        let sent = self.next_frame().await;
        assert_eq!(sent.packet_type, EapolType::Eap);
        assert_eq!(sent.eap().code, EapCode::Response);
        sent
    }

    /// Identity exchange, EAP-TLS start and the full scripted handshake.
    /// Returns the next identifier to use.
    pub async fn handshake(&mut self, server_flight_len: usize) -> u8 {
        self.identity_request(1).await;
        let identity = self.next_eap().await;
        assert_eq!(identity.eap().type_data(), b"anonymous@example.org");

        self.tls_start(2).await;
        let (hello, id) = self.recv_tls(3).await;
        assert_eq!(hello.len(), self.factory.client_hello_len);

        let id = self
            .send_tls(id, &server_flight(FULL_HANDSHAKE, server_flight_len), 1000)
            .await;
        let (flight, id) = self.recv_tls(id).await;
        assert_eq!(flight.len(), self.factory.client_flight_len);

        // Server ChangeCipherSpec + Finished.
        self.method_request(id, &[0, 0x14, 0x03, 0x03, 0x00, 0x01, 0x01])
            .await;
        id.wrapping_add(1)
    }

    pub async fn no_more_frames(&mut self) {
        tokio::task::yield_now().await;
        assert!(self.sent.try_recv().is_err(), "unexpected extra frame");
    }
}
