//! TLS engine interface and the tunnel state wrapped around it.
//!
//! The engine does all record and handshake work. It talks to the network
//! only through a [`TlsBio`]: reads are served from the reassembly buffer,
//! writes collect outbound handshake bytes for the fragmenter.

use std::io;

use wpaent_core::{CipherMetadata, Error, HandshakeState, Result};
use wpaent_net::eap_tls::{EapTlsFragment, EapTlsPacket};
use wpaent_net::fragment::{Fragmenter, ReadCursor, Reassembly};

/// Keying material exported after the handshake: MSK followed by EMSK.
pub const KEY_MATERIAL_LEN: usize = 128;
pub const MSK_LEN: usize = 64;

/// Byte-stream callbacks handed to the engine.
pub trait TlsBio {
    /// Returns `ErrorKind::WouldBlock` when no inbound bytes are buffered.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    /// Progress was made; call again.
    InProgress,
    /// The engine needs the next inbound flight.
    WantRead,
    Complete,
}

/// Client-side TLS engine.
pub trait TlsEngine: Send {
    /// The state the engine is waiting in.
    fn state(&self) -> HandshakeState;
    /// Advances the handshake by one step.
    fn handshake_step(&mut self, bio: &mut dyn TlsBio) -> Result<HandshakeStatus>;
    /// True when the server accepted the offered session.
    fn is_resumed(&self) -> bool;
    /// Decrypts one application-data record into `buf`. `None` means more
    /// inbound bytes are needed.
    fn read_app_data(&mut self, bio: &mut dyn TlsBio, buf: &mut [u8]) -> Result<Option<usize>>;
    fn write_app_data(&mut self, bio: &mut dyn TlsBio, data: &[u8]) -> Result<()>;
    /// Serialized session for later resumption.
    fn export_session(&self) -> Option<Vec<u8>>;
    fn export_keying_material(&self, label: &str, out: &mut [u8]) -> Result<()>;
    fn cipher_metadata(&self) -> CipherMetadata;
}

/// Creates one engine per handshake.
pub trait TlsEngineFactory: Send + Sync + 'static {
    fn create(&self, saved_session: Option<&[u8]>) -> Result<Box<dyn TlsEngine>>;
}

struct TunnelBio<'a> {
    inbound: &'a mut Reassembly,
    outbound: &'a mut Vec<u8>,
    limit: usize,
}

impl TlsBio for TunnelBio<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inbound.read(buf) {
            0 if !buf.is_empty() => Err(io::ErrorKind::WouldBlock.into()),
            n => Ok(n),
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.outbound.len() + buf.len() > self.limit {
            return Err(io::Error::new(
                io::ErrorKind::OutOfMemory,
                "outbound TLS buffer full",
            ));
        }
        self.outbound.extend_from_slice(buf);
        Ok(buf.len())
    }
}

/// Exported keying material: the MSK, then the EMSK (unused here).
pub struct KeyMaterial {
    bytes: [u8; KEY_MATERIAL_LEN],
}

impl KeyMaterial {
    pub fn msk(&self) -> &[u8] {
        &self.bytes[..MSK_LEN]
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyMaterial(..)")
    }
}

/// Engine handle plus the host-side buffers feeding it. Owned by the TLS
/// agent during the handshake, then by the Phase2 engine.
pub struct TlsTunnel {
    engine: Box<dyn TlsEngine>,
    inbound: Reassembly,
    outbound: Vec<u8>,
    fragmenter: Fragmenter,
    resuming: bool,
}

impl TlsTunnel {
    pub fn new(
        engine: Box<dyn TlsEngine>,
        capacity: usize,
        fragment_budget: usize,
        resuming: bool,
    ) -> Self {
        TlsTunnel {
            engine,
            inbound: Reassembly::new(capacity),
            outbound: Vec::new(),
            fragmenter: Fragmenter::new(fragment_budget),
            resuming,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.engine.state()
    }

    pub fn is_resuming(&self) -> bool {
        self.resuming
    }

    /// Largest outbound flight or inner reply the tunnel holds.
    pub fn capacity(&self) -> usize {
        self.inbound.capacity()
    }

    /// Feeds one received fragment. `true` once the message is complete.
    pub fn accept(&mut self, fragment: &EapTlsFragment<'_>) -> Result<bool> {
        let state = self.engine.state();
        Ok(self.inbound.accept(fragment, state, self.resuming)?)
    }

    pub fn cursor(&self) -> ReadCursor {
        self.inbound.cursor()
    }

    pub fn handshake_step(&mut self) -> Result<HandshakeStatus> {
        let limit = self.inbound.capacity();
        let mut bio = TunnelBio {
            inbound: &mut self.inbound,
            outbound: &mut self.outbound,
            limit,
        };
        self.engine.handshake_step(&mut bio)
    }

    pub fn read_app_data(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        let limit = self.inbound.capacity();
        let mut bio = TunnelBio {
            inbound: &mut self.inbound,
            outbound: &mut self.outbound,
            limit,
        };
        self.engine.read_app_data(&mut bio, buf)
    }

    pub fn write_app_data(&mut self, data: &[u8]) -> Result<()> {
        let limit = self.inbound.capacity();
        let mut bio = TunnelBio {
            inbound: &mut self.inbound,
            outbound: &mut self.outbound,
            limit,
        };
        self.engine.write_app_data(&mut bio, data)
    }

    /// Fragments everything written since the last call. Empty when the
    /// engine wrote nothing.
    pub fn take_outbound(&mut self) -> Vec<EapTlsPacket> {
        if self.outbound.is_empty() {
            return Vec::new();
        }
        let packets = self.fragmenter.split(&self.outbound);
        self.outbound.clear();
        packets
    }

    pub fn is_resumed(&self) -> bool {
        self.engine.is_resumed()
    }

    pub fn export_session(&self) -> Option<Vec<u8>> {
        self.engine.export_session()
    }

    pub fn export_keys(&self, label: &str) -> Result<KeyMaterial> {
        let mut bytes = [0u8; KEY_MATERIAL_LEN];
        self.engine.export_keying_material(label, &mut bytes)?;
        Ok(KeyMaterial { bytes })
    }

    /// Negotiated cipher sizes. Meaningful once the handshake is over.
    pub fn cipher(&self) -> CipherMetadata {
        self.engine.cipher_metadata()
    }
}

impl std::fmt::Debug for TlsTunnel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsTunnel")
            .field("state", &self.engine.state())
            .field("inbound", &self.inbound.cursor())
            .field("outbound", &self.outbound.len())
            .field("resuming", &self.resuming)
            .finish()
    }
}

/// Maps a bio error raised inside an engine back to the supplicant taxonomy.
pub fn bio_error(err: io::Error) -> Error {
    match err.kind() {
        io::ErrorKind::OutOfMemory => Error::OutOfMemory(err.to_string()),
        _ => Error::Tls(err.to_string()),
    }
}
