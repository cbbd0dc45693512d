#![no_main]

use libfuzzer_sys::fuzz_target;
use wpaent_net::tunnel::Envelope;

fuzz_target!(|data: &[u8]| {
    let _ = Envelope::Ttls.unwrap(data, 0);
    let _ = Envelope::Peap.unwrap(data, 0);
});
