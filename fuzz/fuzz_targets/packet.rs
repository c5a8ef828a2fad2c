#![no_main]

extern crate proto;

use bytes::Buf;
use libfuzzer_sys::fuzz_target;
use proto::fuzzing::{Header, PacketParams};

fuzz_target!(|data: PacketParams| {
    let host_cid_len = usize::from(data.host_cid_len);
    let mut buf = &data.buf[..];
    let Ok(header) = Header::decode(&mut buf, host_cid_len) else {
        return;
    };
    if header.is_retry() {
        assert_eq!(buf.remaining(), 0);
    }

    let mut out = Vec::new();
    header.encode(&mut out);
    let reparsed = Header::decode(&mut &out[..], host_cid_len).unwrap();
    assert_eq!(reparsed.version(), header.version());
    assert_eq!(reparsed.packet_type(), header.packet_type());
    assert_eq!(reparsed.dst_cid(), header.dst_cid());
    assert_eq!(reparsed.src_cid(), header.src_cid());
    assert_eq!(reparsed.orig_dst_cid(), header.orig_dst_cid());
    assert_eq!(reparsed.token(), header.token());
});
