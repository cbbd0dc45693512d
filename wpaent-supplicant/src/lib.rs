//! 802.1X/EAP supplicant for enterprise wireless networks.
//!
//! Each session runs three cooperating tasks: the outer EAP state machine,
//! the TLS tunnel agent and the Phase2 engine. They talk over bounded
//! queues; frames travel with the messages.

mod agent;
mod outer;
pub mod phase2;
pub mod pnet_transport;
pub mod session;
mod task;
pub mod tls;
pub mod transport;

pub use phase2::Phase2;
pub use pnet_transport::{PnetFrame, PnetReceiver, PnetTransport};
pub use session::{SessionHandle, SessionId, SessionParams, Supplicant};
pub use tls::{HandshakeStatus, KeyMaterial, TlsBio, TlsEngine, TlsEngineFactory, TlsTunnel};
pub use transport::{CredentialSink, FrameHandle, Transport};
