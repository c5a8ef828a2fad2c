//! Wire-format codec for the QUIC transport protocol
//!
//! quic-codec turns raw packet bytes into structured values and back, byte for byte. It contains
//! no connection state, no packet protection and no networking code: callers hand it a
//! [`bytes::Buf`] positioned at a packet (or sub-structure) boundary and get typed values back.
//!
//! The most important entry points are:
//!
//! - [`Header::decode`], which classifies and decodes long and short packet headers, and
//!   [`decode_packet_number`] which reconstructs truncated packet numbers
//! - [`TransportParameters`], the handshake parameter TLV codec including the nested
//!   [`PreferredAddress`]
//! - [`Ack`], the gap/block run-length codec for acknowledged packet number ranges, collected
//!   into a [`RangeSet`]

#![warn(missing_docs)]
#![warn(unreachable_pub)]
#![cfg_attr(test, allow(dead_code))]
#![allow(clippy::too_many_arguments)]

pub mod coding;
mod frame;
mod packet;
mod range_set;
mod shared;
mod transport_error;
pub mod transport_parameters;
mod varint;

pub use crate::frame::{
    Ack, ApplicationClose, Close, ConnectionClose, EcnCounts, Frame, FrameType, InvalidFrame,
    Iter as FrameIter, NewConnectionId, NewToken,
};
pub use crate::packet::{
    decode_packet_number, encode_retry, encode_version_negotiation, CidField, Header,
    LongHeaderType, LongType, PacketDecodeError, PacketNumber,
};
pub use crate::range_set::RangeSet;
pub use crate::shared::{ConnectionId, ResetToken};
pub use crate::transport_error::{Code as TransportErrorCode, Error as TransportError};
pub use crate::transport_parameters::{PreferredAddress, TransportParameters};
pub use crate::varint::{VarInt, VarIntBoundsExceeded};

/// Reserved version number identifying Version Negotiation packets
pub const VERSION_NEGOTIATION: u32 = 0;
/// QUIC draft-23
pub const DRAFT_23: u32 = 0xff00_0017;
/// QUIC draft-24
pub const DRAFT_24: u32 = 0xff00_0018;

/// The QUIC protocol versions this codec understands, in order of preference
pub const DEFAULT_SUPPORTED_VERSIONS: &[u32] = &[DRAFT_24, DRAFT_23];

/// Whether `version` is one of [`DEFAULT_SUPPORTED_VERSIONS`]
pub fn is_supported_version(version: u32) -> bool {
    DEFAULT_SUPPORTED_VERSIONS.contains(&version)
}

/// Maximum length of a connection ID
pub const MAX_CID_SIZE: usize = 20;
/// Length of a stateless reset token
pub const RESET_TOKEN_SIZE: usize = 16;

#[cfg(feature = "arbitrary")]
#[doc(hidden)]
#[allow(missing_docs)]
pub mod fuzzing {
    pub use crate::packet::Header;
    pub use crate::transport_parameters::TransportParameters;
    use arbitrary::Arbitrary;

    #[derive(Arbitrary, Debug)]
    pub struct PacketParams {
        pub host_cid_len: u8,
        pub buf: Vec<u8>,
    }
}
