#![no_main]

use libfuzzer_sys::fuzz_target;
use wpaent_net::eap::EapPacket;
use wpaent_net::eap_tls::EapTlsFragment;
use wpaent_net::eapol::EapolFrame;

fuzz_target!(|data: &[u8]| {
    // Walk the whole receive path; only panics matter.
    let Ok(frame) = EapolFrame::parse(data) else {
        return;
    };
    let Ok(packet) = EapPacket::from_bytes(frame.eapol.payload) else {
        return;
    };
    let _ = EapTlsFragment::parse(packet.type_data());
});
