//! EAP-TLS fragmentation of outbound handshake bytes and reassembly of
//! inbound flights.

use tracing::trace;
use wpaent_core::HandshakeState;

use crate::eap_tls::{EapTlsFragment, EapTlsPacket, TlsFlags};
use crate::error::CodecError;

/// Splits an outbound TLS byte-stream into EAP-TLS payloads of at most
/// `budget` TLS bytes each.
#[derive(Debug, Clone, Copy)]
pub struct Fragmenter {
    budget: usize,
}

impl Fragmenter {
    pub fn new(budget: usize) -> Self {
        Fragmenter {
            budget: budget.max(1),
        }
    }

    /// Number of fragments `split` produces for `len` bytes.
    pub fn count(&self, len: usize) -> usize {
        if len == 0 {
            1
        } else {
            len.div_ceil(self.budget)
        }
    }

    /// The first fragment carries L and the total length; every fragment but
    /// the last carries M. An empty stream yields one zero-length payload.
    pub fn split(&self, tls_data: &[u8]) -> Vec<EapTlsPacket> {
        if tls_data.is_empty() {
            return vec![EapTlsPacket::ack()];
        }

        let total_length = tls_data.len() as u32;
        let last = self.count(tls_data.len()) - 1;
        tls_data
            .chunks(self.budget)
            .enumerate()
            .map(|(index, chunk)| {
                let first = index == 0;
                EapTlsPacket::new(
                    TlsFlags::new(first, index != last, false),
                    first.then_some(total_length),
                    chunk.to_vec(),
                )
            })
            .collect()
    }
}

/// What a received fragment does to the current flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightAction {
    /// Drop bytes the TLS engine already consumed, then append.
    Begin,
    Append,
    /// Append, then close: the next fragment starts from an empty buffer.
    Close,
}

/// Flight boundary rule, keyed on the handshake state the engine is waiting
/// in when the fragment arrives.
pub fn flight_action(state: HandshakeState, resuming: bool, mid_flight: bool) -> FlightAction {
    if mid_flight {
        return FlightAction::Append;
    }
    match state {
        HandshakeState::ServerHello
        | HandshakeState::ServerCertificate
        | HandshakeState::ServerKeyExchange => FlightAction::Begin,
        HandshakeState::ServerFinished if resuming => FlightAction::Begin,
        HandshakeState::ServerChangeCipherSpec => FlightAction::Close,
        HandshakeState::FlushBuffers | HandshakeState::HandshakeWrapup if resuming => {
            FlightAction::Close
        }
        _ => FlightAction::Append,
    }
}

/// Host-side read position over the reassembly buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadCursor {
    pub consumed: usize,
    pub remaining: usize,
    pub total: usize,
}

/// Accumulates the TLS bytes of an inbound flight and serves them to the TLS
/// engine's reader. Bounded: growing past `capacity` is an error, never a
/// silent truncation.
#[derive(Debug)]
pub struct Reassembly {
    buf: Vec<u8>,
    capacity: usize,
    /// First unread byte.
    start: usize,
    mid_flight: bool,
    closed: bool,
    expected: Option<u32>,
    received: usize,
}

impl Reassembly {
    pub fn new(capacity: usize) -> Self {
        Reassembly {
            buf: Vec::with_capacity(capacity),
            capacity,
            start: 0,
            mid_flight: false,
            closed: false,
            expected: None,
            received: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Adds one fragment. Returns `true` when the fragment completes the
    /// message (no M flag), after checking the total against the L field.
    pub fn accept(
        &mut self,
        fragment: &EapTlsFragment<'_>,
        state: HandshakeState,
        resuming: bool,
    ) -> Result<bool, CodecError> {
        let action = flight_action(state, resuming, self.mid_flight);
        if self.closed {
            self.reset();
        }
        if action == FlightAction::Begin || self.unread() == 0 {
            self.compact();
        }

        let end = self.buf.len();
        if end + fragment.data.len() > self.capacity {
            return Err(CodecError::CapacityExceeded {
                capacity: self.capacity,
                needed: end + fragment.data.len() - self.capacity,
            });
        }
        self.buf.extend_from_slice(fragment.data);

        if self.expected.is_none() {
            self.expected = fragment.message_length;
        }
        self.received += fragment.data.len();
        self.mid_flight = fragment.flags.more_fragments();
        if action == FlightAction::Close {
            self.closed = true;
        }
        trace!(
            "reassembly {:?} in {:?}: +{} bytes, {} buffered, more={}",
            action,
            state,
            fragment.data.len(),
            self.unread(),
            self.mid_flight
        );

        if self.mid_flight {
            return Ok(false);
        }
        let expected = self.expected.take();
        let received = std::mem::take(&mut self.received);
        match expected {
            Some(total) if total as usize != received => Err(CodecError::InvalidLength(received)),
            _ => Ok(true),
        }
    }

    /// Copies unread bytes into `out`. Returns how many were copied; zero
    /// means the engine must wait for the next fragment.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.unread());
        out[..n].copy_from_slice(&self.buf[self.start..self.start + n]);
        self.start += n;
        n
    }

    pub fn unread(&self) -> usize {
        self.buf.len() - self.start
    }

    pub fn cursor(&self) -> ReadCursor {
        ReadCursor {
            consumed: self.start,
            remaining: self.unread(),
            total: self.buf.len(),
        }
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.start = 0;
        self.mid_flight = false;
        self.closed = false;
        self.expected = None;
        self.received = 0;
    }

    fn compact(&mut self) {
        self.buf.drain(..self.start);
        self.start = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_sets_flags() {
        let fragmenter = Fragmenter::new(4);
        let packets = fragmenter.split(&[1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(packets.len(), 3);
        assert_eq!(packets[0].flags.as_u8(), 0xC0);
        assert_eq!(packets[0].tls_message_length, Some(9));
        assert_eq!(packets[1].flags.as_u8(), 0x40);
        assert_eq!(packets[1].tls_message_length, None);
        assert_eq!(packets[2].flags.as_u8(), 0x00);
        assert_eq!(packets[2].tls_data, vec![9]);
    }

    #[test]
    fn test_single_fragment_has_length_without_more() {
        let packets = Fragmenter::new(100).split(&[7; 10]);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].flags.as_u8(), 0x80);
        assert_eq!(packets[0].tls_message_length, Some(10));
    }

    #[test]
    fn test_empty_stream_is_one_ack() {
        let packets = Fragmenter::new(100).split(&[]);
        assert_eq!(packets, vec![EapTlsPacket::ack()]);
    }

    #[test]
    fn test_flight_rule() {
        use HandshakeState::*;
        assert_eq!(flight_action(ServerHello, false, false), FlightAction::Begin);
        assert_eq!(flight_action(ServerHello, false, true), FlightAction::Append);
        assert_eq!(flight_action(ServerCertificate, false, false), FlightAction::Begin);
        assert_eq!(flight_action(ServerKeyExchange, false, false), FlightAction::Begin);
        assert_eq!(flight_action(ServerFinished, false, false), FlightAction::Append);
        assert_eq!(flight_action(ServerFinished, true, false), FlightAction::Begin);
        assert_eq!(flight_action(ServerChangeCipherSpec, false, false), FlightAction::Close);
        assert_eq!(flight_action(FlushBuffers, false, false), FlightAction::Append);
        assert_eq!(flight_action(FlushBuffers, true, false), FlightAction::Close);
        assert_eq!(flight_action(HandshakeWrapup, true, false), FlightAction::Close);
        assert_eq!(flight_action(HandshakeOver, false, false), FlightAction::Append);
    }

    #[test]
    fn test_begin_discards_consumed_bytes() {
        let mut reassembly = Reassembly::new(64);
        let first = [0x80, 0, 0, 0, 4, 1, 2, 3, 4];
        let fragment = EapTlsFragment::parse(&first).unwrap();
        assert!(reassembly
            .accept(&fragment, HandshakeState::ServerHello, false)
            .unwrap());

        let mut out = [0u8; 3];
        assert_eq!(reassembly.read(&mut out), 3);
        assert_eq!(
            reassembly.cursor(),
            ReadCursor { consumed: 3, remaining: 1, total: 4 }
        );

        let second = [0x00, 9, 9];
        let fragment = EapTlsFragment::parse(&second).unwrap();
        reassembly
            .accept(&fragment, HandshakeState::ServerCertificate, false)
            .unwrap();
        // The unread byte survives, the consumed ones are gone.
        assert_eq!(
            reassembly.cursor(),
            ReadCursor { consumed: 0, remaining: 3, total: 3 }
        );
        let mut out = [0u8; 8];
        assert_eq!(reassembly.read(&mut out), 3);
        assert_eq!(&out[..3], &[4, 9, 9]);
        assert_eq!(reassembly.read(&mut out), 0);
    }

    #[test]
    fn test_close_resets_on_next_fragment() {
        let mut reassembly = Reassembly::new(64);
        let ccs = [0x00, 0x14, 0x03, 0x03];
        let fragment = EapTlsFragment::parse(&ccs).unwrap();
        reassembly
            .accept(&fragment, HandshakeState::ServerChangeCipherSpec, false)
            .unwrap();
        assert_eq!(reassembly.unread(), 3);

        let next = [0x00, 0x17];
        let fragment = EapTlsFragment::parse(&next).unwrap();
        reassembly
            .accept(&fragment, HandshakeState::HandshakeOver, false)
            .unwrap();
        assert_eq!(reassembly.cursor().total, 1);
    }

    #[test]
    fn test_length_mismatch_is_rejected() {
        let mut reassembly = Reassembly::new(64);
        let first = [0xC0, 0, 0, 0, 5, 1, 2];
        let last = [0x00, 3, 4];
        let fragment = EapTlsFragment::parse(&first).unwrap();
        assert!(!reassembly
            .accept(&fragment, HandshakeState::ServerHello, false)
            .unwrap());
        let fragment = EapTlsFragment::parse(&last).unwrap();
        assert_eq!(
            reassembly.accept(&fragment, HandshakeState::ServerHello, false),
            Err(CodecError::InvalidLength(4))
        );
    }

    #[test]
    fn test_capacity_is_enforced() {
        let mut reassembly = Reassembly::new(4);
        let data = [0x00, 1, 2, 3, 4, 5];
        let fragment = EapTlsFragment::parse(&data).unwrap();
        assert_eq!(
            reassembly.accept(&fragment, HandshakeState::ServerHello, false),
            Err(CodecError::CapacityExceeded { capacity: 4, needed: 1 })
        );
        assert_eq!(reassembly.unread(), 0);
    }

    #[test]
    fn test_length_repeated_on_every_fragment() {
        // Some authenticators set L on every fragment of a message.
        let mut reassembly = Reassembly::new(64);
        let first = [0xC0, 0, 0, 0, 4, 1, 2];
        let last = [0x80, 0, 0, 0, 4, 3, 4];
        for (bytes, done) in [(&first[..], false), (&last[..], true)] {
            let fragment = EapTlsFragment::parse(bytes).unwrap();
            assert_eq!(
                reassembly
                    .accept(&fragment, HandshakeState::ServerHello, false)
                    .unwrap(),
                done
            );
        }
        assert_eq!(reassembly.unread(), 4);
    }
}
