#![no_main]

extern crate proto;

use libfuzzer_sys::fuzz_target;
use proto::fuzzing::TransportParameters;

fuzz_target!(|data: &[u8]| {
    if let Ok(params) = TransportParameters::read(&mut &data[..]) {
        let mut out = Vec::new();
        params.write(&mut out);
        assert_eq!(TransportParameters::read(&mut &out[..]), Ok(params));
    }
});
