#![no_main]

use libfuzzer_sys::fuzz_target;
use wpaent_net::avp::AvpIter;

fuzz_target!(|data: &[u8]| {
    for avp in AvpIter::new(data) {
        let Ok(avp) = avp else { break };
        let _ = avp.is_vendor();
    }
});
