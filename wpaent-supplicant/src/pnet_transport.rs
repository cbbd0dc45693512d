//! Raw-socket transport on a Linux interface, through `pnet::datalink`.

use std::sync::Mutex;
use std::time::Duration;

use pnet::datalink::{self, DataLinkReceiver, DataLinkSender, NetworkInterface};
use pnet::packet::ethernet::EthernetPacket;
use tracing::{debug, error, info, warn};
use wpaent_core::{Error, Result, SupplicantConfig};
use wpaent_net::eapol::ETH_P_EAPOL;

use crate::session::SessionHandle;
use crate::transport::{FrameHandle, Transport};

/// A heap buffer standing in for a driver frame.
#[derive(Debug)]
pub struct PnetFrame {
    buf: Vec<u8>,
    len: usize,
}

impl PnetFrame {
    pub fn from_slice(data: &[u8]) -> Self {
        PnetFrame {
            buf: data.to_vec(),
            len: data.len(),
        }
    }
}

impl FrameHandle for PnetFrame {
    fn data(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    fn set_len(&mut self, len: usize) {
        self.len = len.min(self.buf.len());
    }
}

pub struct PnetTransport {
    sender: Mutex<Box<dyn DataLinkSender>>,
    mac: [u8; 6],
    bssid: Option<[u8; 6]>,
}

/// Receive half, run on its own thread.
pub struct PnetReceiver {
    rx: Box<dyn DataLinkReceiver>,
    interface: String,
}

/// Opens a datalink channel on `config.interface`.
pub fn open(config: &SupplicantConfig) -> Result<(PnetTransport, PnetReceiver)> {
    let interface = datalink::interfaces()
        .into_iter()
        .find(|iface: &NetworkInterface| iface.name == config.interface)
        .ok_or_else(|| Error::BadParameter(format!("interface {} not found", config.interface)))?;
    let mac = interface
        .mac
        .ok_or_else(|| Error::BadParameter(format!("{} has no MAC address", config.interface)))?;

    let mut channel_config = datalink::Config::default();
    channel_config.read_timeout = Some(Duration::from_millis(100));
    let (tx, rx) = match datalink::channel(&interface, channel_config) {
        Ok(datalink::Channel::Ethernet(tx, rx)) => (tx, rx),
        Ok(_) => return Err(Error::Transport("unhandled channel type".into())),
        Err(e) => return Err(Error::Transport(format!("datalink channel: {}", e))),
    };
    info!("Opened {} ({})", config.interface, mac);
    let datalink::MacAddr(a, b, c, d, e, f) = mac;

    Ok((
        PnetTransport {
            sender: Mutex::new(tx),
            mac: [a, b, c, d, e, f],
            bssid: config.peer_bssid(),
        },
        PnetReceiver {
            rx,
            interface: config.interface.clone(),
        },
    ))
}

impl Transport for PnetTransport {
    type Frame = PnetFrame;

    fn alloc(&self, len: usize) -> Result<PnetFrame> {
        Ok(PnetFrame {
            buf: vec![0u8; len],
            len,
        })
    }

    fn send(&self, frame: PnetFrame, payload_len: usize) -> Result<()> {
        let mut sender = self
            .sender
            .lock()
            .map_err(|_| Error::Transport("sender lock poisoned".into()))?;
        match sender.send_to(frame.data(), None) {
            Some(Ok(())) => {
                debug!("Sent {} byte frame ({} byte payload)", frame.len, payload_len);
                Ok(())
            }
            Some(Err(e)) => Err(Error::Transport(e.to_string())),
            None => Err(Error::Transport("datalink sender refused frame".into())),
        }
    }

    fn local_mac(&self) -> [u8; 6] {
        self.mac
    }

    fn peer_bssid(&self) -> Option<[u8; 6]> {
        self.bssid
    }
}

/// Hands one captured packet to the session when it carries EAPOL. Returns
/// `false` once the session is gone and receiving should stop.
pub fn deliver_packet(handle: &SessionHandle<PnetFrame>, interface: &str, packet: &[u8]) -> bool {
    let is_eapol = EthernetPacket::new(packet)
        .map(|eth| eth.get_ethertype().0 == ETH_P_EAPOL)
        .unwrap_or(false);
    if !is_eapol {
        return true;
    }
    match handle.try_deliver(PnetFrame::from_slice(packet)) {
        Ok(()) => true,
        Err(Error::OutOfMemory(e)) => {
            warn!("Dropped EAPOL frame: {}", e);
            true
        }
        Err(e) => {
            info!("{}: receive loop stopping: {}", interface, e);
            false
        }
    }
}

impl PnetReceiver {
    /// Delivers every EAPOL frame to `handle` until the session closes or
    /// the channel fails. Blocks the calling thread.
    pub fn run(mut self, handle: SessionHandle<PnetFrame>) {
        loop {
            match self.rx.next() {
                Ok(packet) => {
                    if !deliver_packet(&handle, &self.interface, packet) {
                        return;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => {
                    error!("An error occurred while reading from {}: {}", self.interface, e);
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use wpaent_net::eapol::{self, EapolType, PAE_GROUP_ADDR};

    use crate::session::SessionId;
    use crate::task::OuterMsg;

    const STA: [u8; 6] = [0x02, 0, 0, 0, 0, 0x01];

    fn eapol_start() -> Vec<u8> {
        let mut buf = vec![0u8; eapol::frame_len(0)];
        eapol::write_frame(&mut buf, PAE_GROUP_ADDR, STA, 1, EapolType::Start, &[]).unwrap();
        buf
    }

    #[test]
    fn test_only_eapol_is_delivered() {
        let (tx, mut rx) = mpsc::channel(4);
        let handle = SessionHandle::new(SessionId(0), tx);

        let mut ipv4 = eapol_start();
        ipv4[12..14].copy_from_slice(&[0x08, 0x00]);
        assert!(deliver_packet(&handle, "wlan0", &ipv4));
        assert!(deliver_packet(&handle, "wlan0", &[0x01, 0x02]));
        assert!(rx.try_recv().is_err());

        let start = eapol_start();
        assert!(deliver_packet(&handle, "wlan0", &start));
        match rx.try_recv() {
            Ok(OuterMsg::Frame(frame)) => assert_eq!(frame.data(), &start[..]),
            _ => panic!("expected the EAPOL frame"),
        }
    }

    #[test]
    fn test_full_queue_drops_and_closed_session_stops() {
        let (tx, rx) = mpsc::channel(1);
        let handle = SessionHandle::new(SessionId(1), tx);
        assert!(deliver_packet(&handle, "wlan0", &eapol_start()));
        // Queue full: the frame is dropped, receiving goes on.
        assert!(deliver_packet(&handle, "wlan0", &eapol_start()));

        drop(rx);
        assert!(!deliver_packet(&handle, "wlan0", &eapol_start()));
    }

    #[test]
    fn test_frame_len_is_clamped() {
        let mut frame = PnetFrame::from_slice(&[1, 2, 3, 4]);
        frame.set_len(2);
        assert_eq!(frame.data(), &[1, 2]);
        frame.set_len(10);
        assert_eq!(frame.data().len(), 4);
        assert_eq!(frame.buffer_mut().len(), 4);
    }
}
