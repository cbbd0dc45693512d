mod common;

use std::sync::Arc;

use common::*;
use wpaent_core::{AuthResult, Error, FailureKind, InnerMethod, OuterMethod};
use wpaent_net::eapol::EapolType;
use wpaent_supplicant::{SessionParams, Supplicant};

fn params(transport: Arc<MockTransport>) -> SessionParams<MockTransport> {
    SessionParams {
        config: config(OuterMethod::Peap, InnerMethod::Mschapv2),
        transport,
        tls: Arc::new(ScriptedFactory::new(100, 200)),
        credentials: Arc::new(RecordingSink::default()),
    }
}

#[tokio::test]
async fn test_arena_is_bounded_and_slots_are_reused() {
    let (transport, _sent) = MockTransport::new();
    let mut arena = config(OuterMethod::Peap, InnerMethod::Mschapv2);
    arena.max_sessions = 2;
    let mut supplicant = Supplicant::new(&arena);
    let first = supplicant.start(params(transport.clone())).unwrap();
    let second = supplicant.start(params(transport.clone())).unwrap();
    assert_ne!(first, second);
    assert_eq!(supplicant.active(), 2);

    assert!(matches!(
        supplicant.start(params(transport.clone())),
        Err(Error::BadParameter(_))
    ));

    supplicant.stop(first).await.unwrap();
    assert_eq!(supplicant.active(), 1);
    assert!(matches!(supplicant.result(first), Err(Error::BadParameter(_))));
    let third = supplicant.start(params(transport.clone())).unwrap();
    assert_eq!(third, first);
}

#[tokio::test]
async fn test_invalid_config_is_refused() {
    let (transport, _sent) = MockTransport::new();
    let mut params = params(transport);
    let mut supplicant = Supplicant::new(&params.config);
    params.config.identity.clear();
    assert!(matches!(supplicant.start(params), Err(Error::BadParameter(_))));
    assert_eq!(supplicant.active(), 0);
}

#[tokio::test]
async fn test_stop_mid_handshake_sends_logoff() {
    let mut h = Harness::start(
        config(OuterMethod::Peap, InnerMethod::Mschapv2),
        ScriptedFactory::new(100, 200),
    );
    h.identity_request(1).await;
    h.next_eap().await;
    h.tls_start(2).await;
    h.next_eap().await;

    let result = h.supplicant.stop(h.id).await.unwrap();
    assert_eq!(result, AuthResult::Failure(FailureKind::Aborted));
    let logoff = h.next_frame().await;
    assert_eq!(logoff.packet_type, EapolType::Logoff);
    assert_eq!(logoff.destination, AP);
    assert_eq!(h.transport.allocated(), h.transport.released());
}

#[tokio::test]
async fn test_stop_while_idle_sends_no_logoff() {
    let mut h = Harness::start(
        config(OuterMethod::Tls, InnerMethod::Mschapv2),
        ScriptedFactory::new(100, 200),
    );
    let result = h.supplicant.stop(h.id).await.unwrap();
    assert_eq!(result, AuthResult::Failure(FailureKind::Aborted));
    assert!(h.sent.try_recv().is_err());
}

#[tokio::test]
async fn test_stop_mid_phase2_releases_every_frame() {
    let mut h = Harness::start(
        config(OuterMethod::Peap, InnerMethod::Mschapv2),
        ScriptedFactory::new(100, 1800),
    );
    let id = h.handshake(2500).await;
    h.next_eap().await;
    h.send_record(id, &[1]).await;
    h.recv_records().await;

    let result = h.supplicant.stop(h.id).await.unwrap();
    assert_eq!(result, AuthResult::Failure(FailureKind::Aborted));
    assert_eq!(h.next_frame().await.packet_type, EapolType::Logoff);
    assert_eq!(h.transport.allocated(), h.transport.released());
}

#[tokio::test]
async fn test_success_then_stop_logs_off() {
    let mut h = Harness::start(
        config(OuterMethod::Tls, InnerMethod::Mschapv2),
        ScriptedFactory::new(100, 200),
    );
    let id = h.handshake(400).await;
    h.next_eap().await;
    h.deliver_eap(&wpaent_net::eap::EapPacket::success(id)).await;
    assert_eq!(h.supplicant.wait_result(h.id).await.unwrap(), AuthResult::Success);

    // A terminal result survives the stop.
    assert_eq!(h.supplicant.stop(h.id).await.unwrap(), AuthResult::Success);
    assert_eq!(h.next_frame().await.packet_type, EapolType::Logoff);
}
