#![no_main]

extern crate proto;

use libfuzzer_sys::fuzz_target;
use proto::Ack;

fuzz_target!(|data: (bool, &[u8])| {
    let (ecn, mut buf) = data;
    if let Ok(ack) = Ack::decode(&mut buf, ecn) {
        assert_eq!(ack.ranges.max(), Some(ack.largest));
        let mut out = Vec::new();
        ack.encode(&mut out);
        let mut reencoded = &out[1..];
        assert_eq!(Ack::decode(&mut reencoded, ecn), Ok(ack));
    }
});
