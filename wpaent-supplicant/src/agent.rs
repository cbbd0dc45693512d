//! TLS tunnel agent: drives one handshake over relayed EAP-TLS fragments.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use wpaent_core::{Error, OuterMethod, Result, SecurityMode};
use wpaent_net::eap_tls::{EapTlsFragment, EapTlsPacket};

use crate::task::{drain, next_fragment, send_event, OuterMsg, TunnelMsg};
use crate::tls::{HandshakeStatus, TlsTunnel};
use crate::transport::{CredentialSink, FrameHandle};

/// What the agent needs besides its tunnel and inbox.
pub(crate) struct AgentContext<F> {
    pub generation: u64,
    pub method: OuterMethod,
    pub security: SecurityMode,
    pub tunnel_wait: Duration,
    pub credentials: Arc<dyn CredentialSink>,
    pub events: mpsc::Sender<OuterMsg<F>>,
}

/// Feeds one relayed fragment to the tunnel. The frame is released on
/// return. `true` when the fragment completed a message.
pub(crate) fn accept_fragment<F: FrameHandle>(
    tunnel: &mut TlsTunnel,
    msg: TunnelMsg<F>,
) -> Result<bool> {
    let data = msg
        .frame
        .data()
        .get(msg.offset..msg.offset + msg.len)
        .ok_or_else(|| Error::Protocol("relayed fragment outside its frame".into()))?;
    let fragment = EapTlsFragment::parse(data)?;
    tunnel.accept(&fragment)
}

/// Hands the tunnel's pending output to the outer machine. With nothing
/// pending and `ack_if_empty`, sends the zero-length payload instead.
pub(crate) async fn flush<F>(
    tunnel: &mut TlsTunnel,
    generation: u64,
    events: &mpsc::Sender<OuterMsg<F>>,
    cancel: &mut watch::Receiver<bool>,
    ack_if_empty: bool,
) -> Result<()> {
    let packets = outbound(tunnel, ack_if_empty);
    if packets.is_empty() {
        return Ok(());
    }
    debug!("Flushing {} EAP-TLS fragment(s)", packets.len());
    send_event(events, cancel, OuterMsg::Output { generation, packets }).await
}

fn outbound(tunnel: &mut TlsTunnel, ack_if_empty: bool) -> Vec<EapTlsPacket> {
    let mut packets = tunnel.take_outbound();
    if packets.is_empty() && ack_if_empty {
        packets.push(EapTlsPacket::ack());
    }
    packets
}

pub(crate) async fn run_agent<F: FrameHandle>(
    mut tunnel: TlsTunnel,
    ctx: AgentContext<F>,
    mut inbox: mpsc::Receiver<TunnelMsg<F>>,
    mut cancel: watch::Receiver<bool>,
) {
    info!(
        "TLS agent {} started ({:?}, resuming={})",
        ctx.generation,
        ctx.method,
        tunnel.is_resuming()
    );
    let outcome = handshake(&mut tunnel, &ctx, &mut inbox, &mut cancel).await;

    let released = drain(&mut inbox);
    if released > 0 {
        debug!("TLS agent {} released {} queued frame(s)", ctx.generation, released);
    }

    let msg = match outcome {
        Ok(true) => match finish(tunnel, &ctx) {
            Ok(msg) => msg,
            Err(error) => {
                error!("TLS agent {}: post-handshake failed: {}", ctx.generation, error);
                OuterMsg::TaskFailed { generation: ctx.generation, error }
            }
        },
        Ok(false) => {
            info!("TLS agent {} cancelled", ctx.generation);
            return;
        }
        Err(Error::Aborted) => return,
        Err(error) => {
            warn!("TLS handshake failed: {}", error);
            OuterMsg::TaskFailed { generation: ctx.generation, error }
        }
    };
    if send_event(&ctx.events, &mut cancel, msg).await.is_err() {
        debug!("TLS agent {}: outer machine no longer listening", ctx.generation);
    }
}

/// `Ok(true)` on completion, `Ok(false)` when cancelled.
async fn handshake<F: FrameHandle>(
    tunnel: &mut TlsTunnel,
    ctx: &AgentContext<F>,
    inbox: &mut mpsc::Receiver<TunnelMsg<F>>,
    cancel: &mut watch::Receiver<bool>,
) -> Result<bool> {
    loop {
        match tunnel.handshake_step()? {
            HandshakeStatus::InProgress => continue,
            HandshakeStatus::Complete => return Ok(true),
            HandshakeStatus::WantRead => {
                flush(tunnel, ctx.generation, &ctx.events, cancel, true).await?;
                loop {
                    let Some(msg) = next_fragment(inbox, cancel, ctx.tunnel_wait, "TLS agent").await
                    else {
                        return Ok(false);
                    };
                    if accept_fragment(tunnel, msg)? {
                        debug!(
                            "Flight complete in {:?}: {:?}",
                            tunnel.state(),
                            tunnel.cursor()
                        );
                        break;
                    }
                }
            }
        }
    }
}

/// Exports keys, installs the PMK and decides who answers next.
fn finish<F>(mut tunnel: TlsTunnel, ctx: &AgentContext<F>) -> Result<OuterMsg<F>> {
    let cipher = tunnel.cipher();
    let keys = tunnel.export_keys(ctx.method.key_label())?;
    ctx.credentials
        .install_psk(&keys.msk()[ctx.security.pmk_range()])?;

    let resumed = tunnel.is_resumed();
    info!(
        "TLS handshake complete ({:?}, resumed={}, record overhead {} bytes)",
        ctx.method,
        resumed,
        cipher.record_overhead()
    );

    // Without an inner conversation we answer with our last flight, or the
    // zero-length payload that ends the method.
    let output = if !ctx.method.is_tunneled() || resumed {
        outbound(&mut tunnel, true)
    } else {
        Vec::new()
    };

    let session = tunnel.export_session();
    Ok(OuterMsg::HandshakeDone {
        generation: ctx.generation,
        tunnel: Box::new(tunnel),
        output,
        resumed,
        cipher,
        session,
    })
}
