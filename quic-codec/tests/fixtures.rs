//! Decoding of captured draft-24 packets and handshake parameter blocks

use std::{
    io::{self, Write},
    net::{Ipv4Addr, Ipv6Addr, SocketAddrV4, SocketAddrV6},
    str,
};

use assert_matches::assert_matches;
use bytes::{Buf, Bytes};
use hex_literal::hex;
use quic_codec::{
    encode_version_negotiation, Ack, CidField, ConnectionId, Header, PacketDecodeError,
    PreferredAddress, RangeSet, ResetToken, TransportParameters, VarInt, DRAFT_24,
};
use rand::{rngs::StdRng, SeedableRng};
use tracing_subscriber::EnvFilter;

fn subscribe() -> tracing::subscriber::DefaultGuard {
    let sub = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(|| TestWriter)
        .finish();
    tracing::subscriber::set_default(sub)
}

struct TestWriter;

impl Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        print!(
            "{}",
            str::from_utf8(buf).expect("tried to log invalid UTF-8")
        );
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        io::stdout().flush()
    }
}

/// Decode a header with the 8-byte local connection IDs used by all captures, returning it with
/// the number of bytes consumed
fn decode(data: &[u8]) -> Result<(Header, usize), PacketDecodeError> {
    let mut buf = data;
    let header = Header::decode(&mut buf, 8)?;
    Ok((header, data.len() - buf.remaining()))
}

const VN_PACKET: [u8; 31] = hex!(
    "80 00000000 08 9aac5a49ba87a849 08 f92f4336fa951ba1 45474716 ff000018"
);

const RETRY_TOKEN: [u8; 41] = hex!(
    "5282f57f85a1a5c50de5aac2ff7dba43ff34524737099ec41c4b8e8c76734f935e8efd51177dbbe764"
);

const PA_CID: [u8; 18] = hex!("62c4518d63013f0c287ed3573efa90956037");
const PA_TOKEN: [u8; 16] = hex!("46b2e02d45480ba6643e5c6e7d48ecb4");

#[test]
fn empty() {
    let _guard = subscribe();
    assert_eq!(decode(&[]), Err(PacketDecodeError::UnexpectedEnd));
}

#[test]
fn initial_client() {
    let _guard = subscribe();
    let mut data = hex!("c3 ff000018 08 858b39368b8e3c6e 00 00 44ee").to_vec();
    data.extend_from_slice(&[0; 1262]);
    let (header, pos) = decode(&data).unwrap();
    assert!(header.is_long_header());
    assert_eq!(header.version(), Some(DRAFT_24));
    assert_eq!(header.packet_type(), Some(0xc0));
    assert_eq!(&header.dst_cid()[..], hex!("858b39368b8e3c6e"));
    assert!(header.src_cid().is_empty());
    assert!(header.orig_dst_cid().is_empty());
    assert!(header.token().is_empty());
    assert_eq!(header.rest_len(), 1262);
    assert_eq!(pos, 18);
}

#[test]
fn initial_server() {
    let _guard = subscribe();
    let data = hex!("c1 ff000018 00 08 195c68344e28d479 00 40b8");
    let (header, pos) = decode(&data).unwrap();
    assert_matches!(header, Header::Initial { .. });
    assert!(header.dst_cid().is_empty());
    assert_eq!(header.src_cid(), hex!("195c68344e28d479"));
    assert!(header.token().is_empty());
    assert_eq!(header.rest_len(), 184);
    assert_eq!(pos, 18);
}

#[test]
fn retry() {
    let _guard = subscribe();
    let mut data =
        hex!("f5 ff000018 08 fee746dfde699d61 08 59aa0942fd2f11e9 08 d61e7448e0d63dff").to_vec();
    data.extend_from_slice(&RETRY_TOKEN);
    let (header, pos) = decode(&data).unwrap();
    assert!(header.is_retry());
    assert_eq!(header.version(), Some(DRAFT_24));
    assert_eq!(header.packet_type(), Some(0xf0));
    assert_eq!(&header.dst_cid()[..], hex!("fee746dfde699d61"));
    assert_eq!(header.src_cid(), hex!("59aa0942fd2f11e9"));
    assert_eq!(header.orig_dst_cid(), hex!("d61e7448e0d63dff"));
    assert_eq!(header.token(), RETRY_TOKEN);
    assert_eq!(header.rest_len(), 0);
    assert_eq!(pos, 73);

    // Re-encoding only normalises the unused low bits of the first byte
    let mut out = Vec::new();
    header.encode(&mut out);
    assert_eq!(out[0], 0xf0);
    assert_eq!(out[1..], data[1..]);
}

#[test]
fn version_negotiation() {
    let _guard = subscribe();
    let (header, pos) = decode(&VN_PACKET).unwrap();
    assert!(header.is_long_header());
    assert_eq!(header.version(), Some(0));
    assert_eq!(header.packet_type(), None);
    assert_eq!(&header.dst_cid()[..], hex!("9aac5a49ba87a849"));
    assert_eq!(header.src_cid(), hex!("f92f4336fa951ba1"));
    assert!(header.orig_dst_cid().is_empty());
    assert!(header.token().is_empty());
    assert_eq!(header.rest_len(), 8);
    assert_eq!(pos, 23);
}

#[test]
fn encode_version_negotiation_matches_capture() {
    let mut rng = StdRng::seed_from_u64(0);
    let mut data = Vec::new();
    encode_version_negotiation(
        &mut rng,
        &ConnectionId::new(&hex!("9aac5a49ba87a849")),
        &ConnectionId::new(&hex!("f92f4336fa951ba1")),
        &[0x4547_4716, DRAFT_24],
        &mut data,
    );
    assert_eq!(data[0] & 0x80, 0x80);
    assert_eq!(data[1..], VN_PACKET[1..]);
}

#[test]
fn short_header() {
    let _guard = subscribe();
    let mut data = hex!("50 f45aa7b59c0e1ad6").to_vec();
    data.extend_from_slice(&[0xaa; 12]);
    let (header, pos) = decode(&data).unwrap();
    assert!(!header.is_long_header());
    assert_eq!(header.version(), None);
    assert_eq!(header.packet_type(), Some(0x50));
    assert_eq!(&header.dst_cid()[..], hex!("f45aa7b59c0e1ad6"));
    assert!(header.src_cid().is_empty());
    assert!(header.orig_dst_cid().is_empty());
    assert!(header.token().is_empty());
    assert_eq!(header.rest_len(), 12);
    assert_eq!(header.spin(), Some(false));
    assert_eq!(pos, 9);
}

#[test]
fn destination_cid_too_long() {
    let _guard = subscribe();
    let data = hex!(
        "c6ff000016150000000000000000000000000000000000000000000000401c51"
        "4f99ec4bbf1f7a30f9b0c94fef717f1c1d07fec24c99a864da7ede"
    );
    let err = decode(&data).unwrap_err();
    assert_eq!(
        err,
        PacketDecodeError::CidTooLong {
            field: CidField::Destination,
            len: 21
        }
    );
    assert_eq!(err.to_string(), "Destination CID is too long (21 bytes)");
    assert!(!err.is_truncation());
}

#[test]
fn source_cid_too_long() {
    let _guard = subscribe();
    let data = hex!(
        "c2ff000016001500000000000000000000000000000000000000000000401cfc"
        "ee99ec4bbf1f7a30f9b0c9417b8c263cdd8cc972a4439d68a46320"
    );
    let err = decode(&data).unwrap_err();
    assert_eq!(err.to_string(), "Source CID is too long (21 bytes)");
}

#[test]
fn fixed_bit_unset() {
    let _guard = subscribe();
    let long = decode(&hex!("80ff00001100 00")).unwrap_err();
    let short = decode(&hex!("00")).unwrap_err();
    assert_eq!(long, PacketDecodeError::FixedBitUnset);
    assert_eq!(long, short);
    assert_eq!(long.to_string(), "Packet fixed bit is zero");
}

#[test]
fn long_header_too_short() {
    let _guard = subscribe();
    let err = decode(&hex!("c000")).unwrap_err();
    assert!(err.is_truncation());
}

fn transport_parameters(data: &[u8]) -> TransportParameters {
    let mut buf = data;
    let params = TransportParameters::read(&mut buf).unwrap();
    assert!(buf.is_empty());
    params
}

fn var(x: u32) -> Option<VarInt> {
    Some(VarInt::from_u32(x))
}

#[test]
fn params_out_of_order() {
    let _guard = subscribe();
    let data = hex!(
        "004700020010cc2fd6e7d97a53ab5be85b28d75c800800080001060001000267"
        "10000600048000ffff000500048000ffff000400048005fffa000a000103000b"
        "0001190003000247e4"
    );
    let params = transport_parameters(&data);
    assert_eq!(
        params,
        TransportParameters {
            idle_timeout: var(10000),
            stateless_reset_token: Some(ResetToken::from(hex!(
                "cc2fd6e7d97a53ab5be85b28d75c8008"
            ))),
            max_packet_size: var(2020),
            initial_max_data: var(393210),
            initial_max_stream_data_bidi_local: var(65535),
            initial_max_stream_data_bidi_remote: var(65535),
            initial_max_streams_bidi: var(6),
            ack_delay_exponent: var(3),
            max_ack_delay: var(25),
            ..TransportParameters::default()
        }
    );

    // Written in ID order, so only the length is preserved
    let mut out = Vec::new();
    params.write(&mut out);
    assert_eq!(out.len(), data.len());
    assert_eq!(transport_parameters(&out), params);
}

#[test]
fn params_with_preferred_address() {
    let _guard = subscribe();
    let data = hex!(
        "008b000100048000753000020010191adf238f8041a56a5fa7a88ddd14f30004"
        "0004801000000005000480040000000600048004000000070004800400000008"
        "000240640009000103000d003b8ba27b8611532400890200000000f03c91fffe"
        "69a45411531262c4518d63013f0c287ed3573efa9095603746b2e02d45480ba6"
        "643e5c6e7d48ecb4000e000107"
    );
    let params = transport_parameters(&data);
    assert_eq!(
        params,
        TransportParameters {
            idle_timeout: var(30000),
            stateless_reset_token: Some(ResetToken::from(hex!(
                "191adf238f8041a56a5fa7a88ddd14f3"
            ))),
            initial_max_data: var(1048576),
            initial_max_stream_data_bidi_local: var(262144),
            initial_max_stream_data_bidi_remote: var(262144),
            initial_max_stream_data_uni: var(262144),
            initial_max_streams_bidi: var(100),
            initial_max_streams_uni: var(3),
            preferred_address: Some(PreferredAddress {
                address_v4: Some(SocketAddrV4::new(Ipv4Addr::new(139, 162, 123, 134), 4435)),
                address_v6: Some(SocketAddrV6::new(
                    "2400:8902::f03c:91ff:fe69:a454".parse().unwrap(),
                    4435,
                    0,
                    0
                )),
                connection_id: ConnectionId::new(&PA_CID),
                stateless_reset_token: ResetToken::from(PA_TOKEN),
            }),
            active_connection_id_limit: var(7),
            ..TransportParameters::default()
        }
    );

    let mut out = Vec::new();
    params.write(&mut out);
    assert_eq!(out, data);
}

#[test]
fn params_unknown_id_ignored() {
    let _guard = subscribe();
    let data = hex!(
        "0064000500048001040000060004800104000007000480010400000400048010"
        "000000080008c0000000ffffffff00090008c0000000ffffffff000100048000"
        "ea60000a00010300030002500000020010616161616262626263636363646464"
        "64ff00000100"
    );
    let params = transport_parameters(&data);
    assert_eq!(
        params,
        TransportParameters {
            idle_timeout: var(60000),
            stateless_reset_token: Some(ResetToken::from(*b"aaaabbbbccccdddd")),
            max_packet_size: var(4096),
            initial_max_data: var(1048576),
            initial_max_stream_data_bidi_local: var(66560),
            initial_max_stream_data_bidi_remote: var(66560),
            initial_max_stream_data_uni: var(66560),
            initial_max_streams_bidi: var(4294967295),
            initial_max_streams_uni: var(4294967295),
            ack_delay_exponent: var(3),
            ..TransportParameters::default()
        }
    );
}

fn preferred_address(data: &[u8]) -> PreferredAddress {
    let mut buf = data;
    let pa = PreferredAddress::read(&mut buf).unwrap();
    assert!(buf.is_empty());
    let mut out = Vec::new();
    pa.write(&mut out);
    assert_eq!(out, data);
    pa
}

#[test]
fn preferred_address_ipv4_only() {
    let pa = preferred_address(&hex!(
        "8ba27b8611530000000000000000000000000000000000001262c4518d63013f"
        "0c287ed3573efa9095603746b2e02d45480ba6643e5c6e7d48ecb4"
    ));
    assert_eq!(
        pa,
        PreferredAddress {
            address_v4: Some(SocketAddrV4::new(Ipv4Addr::new(139, 162, 123, 134), 4435)),
            address_v6: None,
            connection_id: ConnectionId::new(&PA_CID),
            stateless_reset_token: ResetToken::from(PA_TOKEN),
        }
    );
    assert_eq!(
        pa.address_v4.map(|x| x.ip().to_string()).as_deref(),
        Some("139.162.123.134")
    );
}

#[test]
fn preferred_address_ipv6_only() {
    let pa = preferred_address(&hex!(
        "0000000000002400890200000000f03c91fffe69a45411531262c4518d63013f"
        "0c287ed3573efa9095603746b2e02d45480ba6643e5c6e7d48ecb4"
    ));
    assert_eq!(pa.address_v4, None);
    let v6 = pa.address_v6.unwrap();
    assert_eq!(
        *v6.ip(),
        Ipv6Addr::new(0x2400, 0x8902, 0, 0, 0xf03c, 0x91ff, 0xfe69, 0xa454)
    );
    assert_eq!(v6.ip().to_string(), "2400:8902::f03c:91ff:fe69:a454");
    assert_eq!(v6.port(), 4435);
}

#[test]
fn ack_frames() {
    for (data, expected) in [
        (&hex!("00020000")[..], vec![0..1]),
        (&hex!("020201000000")[..], vec![0..1, 2..3]),
        (&hex!("050201000003")[..], vec![0..4, 5..6]),
        (&hex!("050201000102")[..], vec![0..3, 5..6]),
        (&hex!("0402020000000000")[..], vec![0..1, 2..3, 4..5]),
    ] {
        let mut buf = Bytes::copy_from_slice(data);
        let ack = Ack::decode(&mut buf, false).unwrap();
        assert_eq!(ack.delay, 2);
        assert_eq!(ack.ranges.iter().collect::<Vec<_>>(), expected);

        let mut out = Vec::new();
        Ack::encode_body(ack.delay, &ack.ranges, None, &mut out);
        assert_eq!(out, data);
    }
}

#[test]
fn ack_roundtrip_many_ranges() {
    let ranges = (0..50u64)
        .map(|i| i * 10..i * 10 + 1 + i % 4)
        .collect::<RangeSet>();
    let mut out = Vec::new();
    Ack::encode_body(25, &ranges, None, &mut out);
    let ack = Ack::decode(&mut &out[..], false).unwrap();
    assert_eq!(ack.largest, ranges.max().unwrap());
    assert_eq!(ack.delay, 25);
    assert_eq!(ack.ranges, ranges);
}
