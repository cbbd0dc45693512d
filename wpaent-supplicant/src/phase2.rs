//! Phase2 tunnel engine: the inner EAP conversation inside PEAP or TTLS.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use wpaent_core::{
    CipherMetadata, Error, InnerMethod, LeapStage, OuterMethod, Phase2Result, Result, SubStage,
};
use wpaent_net::eap::{EapCode, EapPacket, EapType};
use wpaent_net::eap_mschapv2::{self, MsChapV2Request};
use wpaent_net::leap::{self, LeapPacket, LEAP_RESPONSE_LENGTH};
use wpaent_net::mschapv2::{self, AUTH_RESPONSE_LENGTH};
use wpaent_net::tunnel::{self, Envelope, TlvResult};

use crate::agent::{accept_fragment, flush};
use crate::task::{drain, next_fragment, send_event, OuterMsg, TunnelMsg};
use crate::tls::TlsTunnel;
use crate::transport::FrameHandle;

/// Inner conversation state. Pure: consumes decrypted records, produces
/// replies ready for `write_app_data`.
pub struct Phase2 {
    envelope: Envelope,
    inner: InnerMethod,
    identity: String,
    password: String,
    sub_stage: SubStage,
    leap_stage: LeapStage,
    leap_challenge: Option<[u8; 8]>,
    /// `S=` string the authenticator must return for our last response.
    mschap_expected: Option<[u8; AUTH_RESPONSE_LENGTH]>,
    result: Phase2Result,
    reply_limit: usize,
    cipher: CipherMetadata,
}

impl Phase2 {
    /// `reply_limit` bounds one encrypted reply; `cipher` gives the record
    /// overhead added on top of the plaintext.
    pub fn new(
        method: OuterMethod,
        inner: InnerMethod,
        identity: &str,
        password: &str,
        reply_limit: usize,
        cipher: CipherMetadata,
    ) -> Result<Self> {
        let envelope = match method {
            OuterMethod::Peap => Envelope::Peap,
            OuterMethod::Ttls => Envelope::Ttls,
            OuterMethod::Tls => {
                return Err(Error::BadParameter("EAP-TLS has no inner method".into()))
            }
        };
        Ok(Phase2 {
            envelope,
            inner,
            identity: identity.to_string(),
            password: password.to_string(),
            sub_stage: SubStage::Start,
            leap_stage: LeapStage::Identity,
            leap_challenge: None,
            mschap_expected: None,
            result: Phase2Result::InProgress,
            reply_limit,
            cipher,
        })
    }

    pub fn result(&self) -> Phase2Result {
        self.result
    }

    pub fn sub_stage(&self) -> SubStage {
        self.sub_stage
    }

    pub fn leap_stage(&self) -> LeapStage {
        self.leap_stage
    }

    /// TTLS peers send the inner identity without waiting to be asked.
    pub fn start(&mut self) -> Result<Option<Vec<u8>>> {
        match self.envelope {
            Envelope::Ttls => {
                self.sub_stage = SubStage::Identity;
                let identity = EapPacket::identity_response(0, &self.identity);
                self.seal(&identity).map(Some)
            }
            Envelope::Peap => Ok(None),
        }
    }

    /// Handles one decrypted record. `outer_id` rebuilds stripped PEAP headers.
    pub fn process(&mut self, plaintext: &[u8], outer_id: u8) -> Result<Option<Vec<u8>>> {
        let packet = self.envelope.unwrap(plaintext, outer_id)?;
        debug!(
            "Inner EAP {:?} id={} type={:?} in {:?}",
            packet.code,
            packet.identifier,
            packet.type_byte(),
            self.sub_stage
        );
        match self.dispatch(&packet)? {
            Some(reply) => self.seal(&reply).map(Some),
            None => Ok(None),
        }
    }

    fn seal(&self, reply: &EapPacket) -> Result<Vec<u8>> {
        let bytes = self.envelope.wrap(reply);
        let needed = bytes.len() + self.cipher.record_overhead();
        if needed > self.reply_limit {
            return Err(Error::OutOfMemory(format!(
                "inner reply needs {} bytes, tunnel holds {}",
                needed, self.reply_limit
            )));
        }
        Ok(bytes)
    }

    fn dispatch(&mut self, packet: &EapPacket) -> Result<Option<EapPacket>> {
        match packet.code {
            EapCode::Success => self.on_inner_success(packet),
            EapCode::Failure => {
                warn!("Inner EAP-Failure");
                self.result = Phase2Result::Error;
                Ok(None)
            }
            EapCode::Response => self.on_leap_response(packet),
            EapCode::Request => self.on_request(packet),
        }
    }

    fn on_request(&mut self, packet: &EapPacket) -> Result<Option<EapPacket>> {
        let id = packet.identifier;
        let Some(eap_type) = packet.type_byte() else {
            return Err(Error::Protocol("inner request without a type".into()));
        };

        if eap_type == EapType::Identity as u8 {
            self.sub_stage = SubStage::Identity;
            return Ok(Some(EapPacket::identity_response(id, &self.identity)));
        }
        if eap_type == EapType::Notification as u8 {
            info!(
                "Inner notification: {}",
                String::from_utf8_lossy(packet.type_data())
            );
            return Ok(Some(EapPacket::notification_response(id)));
        }
        if eap_type == EapType::Extensions as u8 && self.envelope == Envelope::Peap {
            return self.on_extensions(packet);
        }
        // PEAP rebuilds every stripped packet as a Request, including the
        // authenticator's answer to our LEAP challenge.
        if eap_type == EapType::Leap as u8 && self.leap_stage == LeapStage::RequestChallenge {
            return self.on_leap_response(packet);
        }
        if eap_type == self.inner.eap_type() {
            self.sub_stage = SubStage::Method;
            return match self.inner {
                InnerMethod::Mschapv2 => self.on_mschapv2(packet),
                InnerMethod::Leap => self.on_leap_challenge(packet),
            };
        }
        if matches!(self.sub_stage, SubStage::Start | SubStage::Identity | SubStage::Nak) {
            info!(
                "Inner type {} offered, asking for {:?}",
                eap_type, self.inner
            );
            self.sub_stage = SubStage::Nak;
            return Ok(Some(EapPacket::nak(id, self.inner.eap_type())));
        }
        Err(Error::Protocol(format!(
            "unexpected inner type {} in {:?}",
            eap_type, self.sub_stage
        )))
    }

    /// PEAP extension exchange. Completion is signalled by the Result TLV;
    /// the outer EAP-Success/Failure still decides.
    fn on_extensions(&mut self, packet: &EapPacket) -> Result<Option<EapPacket>> {
        let result = tunnel::parse_result_tlv(packet.type_data())?
            .ok_or_else(|| Error::Protocol("extensions request without Result TLV".into()))?;
        match result {
            TlvResult::Success if self.result != Phase2Result::Error => {
                self.result = Phase2Result::Aborted;
            }
            TlvResult::Success => {}
            TlvResult::Failure => {
                warn!("PEAP Result TLV reports failure");
                self.result = Phase2Result::Error;
            }
        }
        let echo = if self.result == Phase2Result::Error {
            TlvResult::Failure
        } else {
            result
        };
        Ok(Some(EapPacket::response(
            packet.identifier,
            EapType::Extensions as u8,
            &tunnel::build_result_tlv(echo),
        )))
    }

    fn on_mschapv2(&mut self, packet: &EapPacket) -> Result<Option<EapPacket>> {
        let id = packet.identifier;
        let reply = match MsChapV2Request::parse(packet.type_data())? {
            MsChapV2Request::Challenge {
                ms_id, challenge, ..
            } => {
                let peer_challenge = mschapv2::generate_challenge()?;
                let nt_response = mschapv2::generate_nt_response(
                    &challenge,
                    &peer_challenge,
                    &self.identity,
                    &self.password,
                );
                let expected = mschapv2::generate_authenticator_response(
                    &self.password,
                    &nt_response,
                    &peer_challenge,
                    &challenge,
                    &self.identity,
                );
                self.mschap_expected = Some(expected);
                eap_mschapv2::build_response(ms_id, &peer_challenge, &nt_response, &self.identity)
            }
            MsChapV2Request::Success { message, .. } => {
                let verified = self
                    .mschap_expected
                    .as_ref()
                    .map(|expected| mschapv2::check_authenticator_response(&message, expected))
                    .unwrap_or(false);
                if verified {
                    info!("MSCHAPv2 authenticator response verified");
                    self.result = Phase2Result::Success;
                    eap_mschapv2::build_success_ack()
                } else {
                    error!("MSCHAPv2 authenticator response mismatch");
                    self.result = Phase2Result::Error;
                    eap_mschapv2::build_failure_ack()
                }
            }
            MsChapV2Request::Failure { message, .. } => {
                warn!(
                    "MSCHAPv2 failure, code {:?}",
                    eap_mschapv2::failure_code(&message)
                );
                self.result = Phase2Result::Error;
                eap_mschapv2::build_failure_ack()
            }
        };
        Ok(Some(EapPacket::response(id, EapType::MsChapV2 as u8, &reply)))
    }

    fn on_leap_challenge(&mut self, packet: &EapPacket) -> Result<Option<EapPacket>> {
        if self.leap_stage != LeapStage::Identity {
            return Err(Error::Protocol(format!(
                "LEAP challenge in {:?}",
                self.leap_stage
            )));
        }
        let challenge = LeapPacket::parse(packet.type_data())?.challenge()?;
        let response = leap::peer_response(&challenge, &self.password);
        self.leap_stage = LeapStage::RespondChallenge;
        Ok(Some(EapPacket::response(
            packet.identifier,
            EapType::Leap as u8,
            &LeapPacket::new(&response, &self.identity).to_bytes(),
        )))
    }

    fn on_inner_success(&mut self, packet: &EapPacket) -> Result<Option<EapPacket>> {
        if self.inner == InnerMethod::Leap && self.leap_stage == LeapStage::RespondChallenge {
            // Our turn to challenge the authenticator.
            let challenge = leap::generate_peer_challenge()?;
            self.leap_challenge = Some(challenge);
            self.leap_stage = LeapStage::RequestChallenge;
            return Ok(Some(EapPacket::request(
                packet.identifier,
                EapType::Leap as u8,
                &LeapPacket::new(&challenge, &self.identity).to_bytes(),
            )));
        }
        if self.result == Phase2Result::InProgress {
            self.result = Phase2Result::Success;
        }
        Ok(None)
    }

    /// The authenticator's answer to our LEAP challenge. A mismatch marks the
    /// conversation failed; it is never a transport or codec error.
    fn on_leap_response(&mut self, packet: &EapPacket) -> Result<Option<EapPacket>> {
        if packet.type_byte() != Some(EapType::Leap as u8)
            || self.leap_stage != LeapStage::RequestChallenge
        {
            return Err(Error::Protocol("unexpected inner response".into()));
        }
        let Some(challenge) = self.leap_challenge.take() else {
            return Err(Error::Protocol("LEAP response without our challenge".into()));
        };
        let expected = leap::expected_ap_response(&challenge, &self.password);
        let received = LeapPacket::parse(packet.type_data())
            .ok()
            .and_then(|p| p.response().ok())
            .unwrap_or([0u8; LEAP_RESPONSE_LENGTH]);

        self.leap_stage = LeapStage::Done;
        if received == expected {
            info!("LEAP authenticator response verified");
            self.result = Phase2Result::Success;
        } else {
            error!("LEAP authenticator response mismatch");
            self.result = Phase2Result::Error;
        }
        Ok(None)
    }
}

pub(crate) struct Phase2Context<F> {
    pub generation: u64,
    pub tunnel_wait: Duration,
    pub events: mpsc::Sender<OuterMsg<F>>,
}

pub(crate) async fn run_phase2<F: FrameHandle>(
    mut tunnel: TlsTunnel,
    mut phase2: Phase2,
    ctx: Phase2Context<F>,
    mut inbox: mpsc::Receiver<TunnelMsg<F>>,
    mut cancel: watch::Receiver<bool>,
) {
    info!("Phase2 engine {} started", ctx.generation);
    let outcome = converse(&mut tunnel, &mut phase2, &ctx, &mut inbox, &mut cancel).await;

    let released = drain(&mut inbox);
    if released > 0 {
        debug!("Phase2 engine {} released {} queued frame(s)", ctx.generation, released);
    }
    match outcome {
        Ok(()) | Err(Error::Aborted) => debug!("Phase2 engine {} stopped", ctx.generation),
        Err(error) => {
            warn!("Phase2 failed: {}", error);
            let event = OuterMsg::TaskFailed { generation: ctx.generation, error };
            let _ = send_event(&ctx.events, &mut cancel, event).await;
        }
    }
}

async fn converse<F: FrameHandle>(
    tunnel: &mut TlsTunnel,
    phase2: &mut Phase2,
    ctx: &Phase2Context<F>,
    inbox: &mut mpsc::Receiver<TunnelMsg<F>>,
    cancel: &mut watch::Receiver<bool>,
) -> Result<()> {
    if let Some(first) = phase2.start()? {
        tunnel.write_app_data(&first)?;
    }
    flush(tunnel, ctx.generation, &ctx.events, cancel, true).await?;

    let mut record = vec![0u8; tunnel.capacity()];
    loop {
        let Some(msg) = next_fragment(inbox, cancel, ctx.tunnel_wait, "Phase2").await else {
            return Ok(());
        };
        let outer_id = msg.id;
        if !accept_fragment(tunnel, msg)? {
            continue;
        }

        while let Some(n) = tunnel.read_app_data(&mut record)? {
            let before = phase2.result();
            if let Some(reply) = phase2.process(&record[..n], outer_id)? {
                tunnel.write_app_data(&reply)?;
            }
            let after = phase2.result();
            if after != before {
                let event = OuterMsg::Phase2 { generation: ctx.generation, result: after };
                send_event(&ctx.events, cancel, event).await?;
            }
        }
        flush(tunnel, ctx.generation, &ctx.events, cancel, true).await?;
    }
}
