//! Error taxonomy shared by every supplicant component.

use thiserror::Error;

/// Error types for the supplicant.
#[derive(Debug, Error)]
pub enum Error {
    /// Caller misuse. Never retried.
    #[error("bad parameter: {0}")]
    BadParameter(String),

    /// A buffer or queue could not hold what was asked of it.
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// A queue wait or handshake timer expired.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Malformed frame, unexpected state or failed challenge check.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Send or allocate failure reported by the transport.
    #[error("transport error: {0}")]
    Transport(String),

    /// The TLS engine refused the handshake or a record.
    #[error("TLS engine error: {0}")]
    Tls(String),

    /// The handshake was cancelled by an abort event.
    #[error("handshake aborted")]
    Aborted,

    #[error("config parse error: {0}")]
    Config(#[from] toml::de::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Why an authentication attempt did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The authenticator sent EAP-Failure.
    Rejected,
    Timeout,
    Protocol,
    Transport,
    OutOfMemory,
    Aborted,
    BadParameter,
}

impl Error {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Error::BadParameter(_) | Error::Config(_) => FailureKind::BadParameter,
            Error::OutOfMemory(_) => FailureKind::OutOfMemory,
            Error::Timeout(_) => FailureKind::Timeout,
            Error::Protocol(_) | Error::Tls(_) => FailureKind::Protocol,
            Error::Transport(_) | Error::Io(_) => FailureKind::Transport,
            Error::Aborted => FailureKind::Aborted,
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Rejected => write!(f, "rejected"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Protocol => write!(f, "protocol"),
            FailureKind::Transport => write!(f, "transport"),
            FailureKind::OutOfMemory => write!(f, "out-of-memory"),
            FailureKind::Aborted => write!(f, "aborted"),
            FailureKind::BadParameter => write!(f, "bad-parameter"),
        }
    }
}
