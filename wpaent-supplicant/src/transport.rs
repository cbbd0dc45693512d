//! Collaborator interfaces the supplicant consumes: the link-layer transport
//! and the network-credential sink.

use tracing::{debug, warn};
use wpaent_core::{Error, Result};
use wpaent_net::eapol::{self, EapolType};

/// A driver-owned packet buffer. Dropping the handle releases it.
pub trait FrameHandle: Send + 'static {
    /// The valid bytes of the frame.
    fn data(&self) -> &[u8];
    /// The whole writable region.
    fn buffer_mut(&mut self) -> &mut [u8];
    fn set_len(&mut self, len: usize);
}

/// Sends and allocates Ethernet frames on one interface.
pub trait Transport: Send + Sync + 'static {
    type Frame: FrameHandle;

    /// A frame with at least `len` writable bytes.
    fn alloc(&self, len: usize) -> Result<Self::Frame>;
    /// Hands `frame` to the driver. `payload_len` counts the EAPOL body only.
    fn send(&self, frame: Self::Frame, payload_len: usize) -> Result<()>;
    fn local_mac(&self) -> [u8; 6];
    /// BSSID of the associated AP, once known.
    fn peer_bssid(&self) -> Option<[u8; 6]>;
}

/// Receives the pairwise master key derived from the TLS session.
pub trait CredentialSink: Send + Sync + 'static {
    fn install_psk(&self, pmk: &[u8]) -> Result<()>;
}

/// Builds an EAPOL frame in a transport buffer and sends it.
pub fn send_eapol<T: Transport + ?Sized>(
    transport: &T,
    destination: [u8; 6],
    version: u8,
    packet_type: EapolType,
    payload: &[u8],
) -> Result<()> {
    let len = eapol::frame_len(payload.len());
    let mut frame = transport.alloc(len)?;
    let written = eapol::write_frame(
        frame.buffer_mut(),
        destination,
        transport.local_mac(),
        version,
        packet_type,
        payload,
    )
    .map_err(|e| Error::Transport(format!("frame buffer too small: {}", e)))?;
    frame.set_len(written);
    debug!("TX EAPOL {:?}, {} byte body", packet_type, payload.len());
    transport.send(frame, payload.len())
}

/// Sends a status frame whose loss the protocol recovers from on its own
/// (EAPOL-Start, EAPOL-Logoff). Failures are logged only.
pub fn send_status<T: Transport + ?Sized>(
    transport: &T,
    destination: [u8; 6],
    version: u8,
    packet_type: EapolType,
) {
    if let Err(e) = send_eapol(transport, destination, version, packet_type, &[]) {
        warn!("Failed to send EAPOL {:?}: {}", packet_type, e);
    }
}
