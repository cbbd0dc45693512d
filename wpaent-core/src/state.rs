//! Stage and result vocabulary for an 802.1X supplicant session.

use crate::error::FailureKind;

/// Top-level lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MainStage {
    #[default]
    Start,
    /// Link is up, no handshake in progress.
    Initialising,
    EapHandshake,
    Closing,
}

/// Position inside an EAP conversation. Used by both the outer state
/// machine and the Phase2 engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubStage {
    #[default]
    Start,
    Identity,
    Nak,
    Method,
}

/// LEAP runs a mutual challenge in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LeapStage {
    #[default]
    Identity,
    /// We answered the authenticator's challenge.
    RespondChallenge,
    /// We sent our own challenge and wait for the authenticator's answer.
    RequestChallenge,
    Done,
}

/// One-byte result code of the inner conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Phase2Result {
    #[default]
    InProgress = 0,
    Success = 1,
    /// Set by the PEAP extension exchange. The inner conversation is over and
    /// the outer EAP-Success/Failure decides.
    Aborted = 2,
    Error = 3,
}

/// The only state visible to the caller of `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthResult {
    #[default]
    InProgress,
    Success,
    Failure(FailureKind),
}

impl AuthResult {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AuthResult::InProgress)
    }
}

/// Handshake position reported by the TLS engine, client side. The
/// reassembly engine decides flight boundaries from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandshakeState {
    #[default]
    HelloRequest,
    ClientHello,
    ServerHello,
    ServerCertificate,
    ServerKeyExchange,
    CertificateRequest,
    ServerHelloDone,
    ClientCertificate,
    ClientKeyExchange,
    CertificateVerify,
    ClientChangeCipherSpec,
    ClientFinished,
    ServerChangeCipherSpec,
    ServerFinished,
    FlushBuffers,
    HandshakeWrapup,
    HandshakeOver,
}

/// Per-flight cipher sizes needed to bound an encrypted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CipherMetadata {
    pub tag_len: usize,
    pub iv_len: usize,
    pub mac_len: usize,
}

impl CipherMetadata {
    /// TLS record header plus every per-record addition of the cipher.
    pub fn record_overhead(&self) -> usize {
        5 + self.tag_len + self.iv_len + self.mac_len
    }
}
