use std::fmt;

use bytes::{Buf, BufMut, Bytes};
use rand::Rng;
use thiserror::Error;
use tracing::debug;

use crate::{
    coding::{self, BufExt, BufMutExt},
    shared::{ConnectionId, LongCidError},
    MAX_CID_SIZE, VERSION_NEGOTIATION,
};

/// Decoded QUIC packet header
///
/// Only the parts of the header that are not covered by packet protection are decoded here. For
/// long headers `rest_len` is the declared length of what follows (packet number and protected
/// payload); for short headers it is simply whatever is left in the datagram.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Header {
    /// Initial packet, which may carry an address validation token
    Initial {
        /// QUIC version
        version: u32,
        /// Destination connection ID
        dst_cid: ConnectionId,
        /// Source connection ID
        src_cid: ConnectionId,
        /// Address validation token, possibly empty
        token: Bytes,
        /// Declared length of the remainder of the packet
        rest_len: u64,
    },
    /// 0-RTT or Handshake packet
    Long {
        /// Which of the two
        ty: LongType,
        /// QUIC version
        version: u32,
        /// Destination connection ID
        dst_cid: ConnectionId,
        /// Source connection ID
        src_cid: ConnectionId,
        /// Declared length of the remainder of the packet
        rest_len: u64,
    },
    /// Retry packet
    ///
    /// The token extends to the end of the datagram, so nothing remains after it.
    Retry {
        /// QUIC version
        version: u32,
        /// Destination connection ID
        dst_cid: ConnectionId,
        /// Source connection ID
        src_cid: ConnectionId,
        /// The destination connection ID the client used in its first Initial
        orig_dst_cid: ConnectionId,
        /// Retry token
        token: Bytes,
    },
    /// Version Negotiation packet
    VersionNegotiate {
        /// The low 7 bits of the first byte, which carry no meaning
        random: u8,
        /// Destination connection ID
        dst_cid: ConnectionId,
        /// Source connection ID
        src_cid: ConnectionId,
        /// Length of the supported version list that follows
        rest_len: u64,
    },
    /// Short header packet
    Short {
        /// The unprotected first byte
        first: u8,
        /// Destination connection ID, of the length the local endpoint chose
        dst_cid: ConnectionId,
        /// Bytes remaining in the datagram
        rest_len: u64,
    },
}

impl Header {
    /// Decode a header from the start of `buf`
    ///
    /// `host_cid_len` is the length of the connection IDs this endpoint issues, which short headers
    /// do not encode. On success `buf` is positioned immediately after the header.
    pub fn decode<R: Buf>(buf: &mut R, host_cid_len: usize) -> Result<Self, PacketDecodeError> {
        let first = buf.get::<u8>()?;
        if first & LONG_HEADER_FORM == 0 {
            if first & FIXED_BIT == 0 {
                debug!(first, "short header packet with fixed bit unset");
                return Err(PacketDecodeError::FixedBitUnset);
            }
            if host_cid_len > MAX_CID_SIZE {
                return Err(PacketDecodeError::CidTooLong {
                    field: CidField::Destination,
                    len: host_cid_len,
                });
            }
            if buf.remaining() < host_cid_len {
                return Err(PacketDecodeError::UnexpectedEnd);
            }
            let dst_cid = ConnectionId::from_buf(buf, host_cid_len);
            return Ok(Self::Short {
                first,
                dst_cid,
                rest_len: buf.remaining() as u64,
            });
        }

        let version = buf.get::<u32>()?;
        let dst_cid = decode_cid(buf, CidField::Destination)?;
        let src_cid = decode_cid(buf, CidField::Source)?;

        if version == VERSION_NEGOTIATION {
            return Ok(Self::VersionNegotiate {
                random: first & !LONG_HEADER_FORM,
                dst_cid,
                src_cid,
                rest_len: buf.remaining() as u64,
            });
        }

        Ok(match LongHeaderType::from_byte(first)? {
            LongHeaderType::Initial => {
                let token_len = buf.get_var()?;
                if token_len > buf.remaining() as u64 {
                    return Err(PacketDecodeError::UnexpectedEnd);
                }
                let token = buf.get_bytes(token_len as usize)?;
                Self::Initial {
                    version,
                    dst_cid,
                    src_cid,
                    token,
                    rest_len: buf.get_var()?,
                }
            }
            LongHeaderType::Retry => {
                let orig_dst_cid = decode_cid(buf, CidField::OriginalDestination)?;
                let token = buf.copy_to_bytes(buf.remaining());
                Self::Retry {
                    version,
                    dst_cid,
                    src_cid,
                    orig_dst_cid,
                    token,
                }
            }
            LongHeaderType::Standard(ty) => Self::Long {
                ty,
                version,
                dst_cid,
                src_cid,
                rest_len: buf.get_var()?,
            },
        })
    }

    /// Write the header back out
    ///
    /// Bits of the first byte that are not part of the decoded representation (packet number
    /// length, reserved bits) are written as zero.
    pub fn encode<W: BufMut>(&self, w: &mut W) {
        use Header::*;
        match *self {
            Initial {
                version,
                ref dst_cid,
                ref src_cid,
                ref token,
                rest_len,
            } => {
                w.write(u8::from(LongHeaderType::Initial));
                w.write(version);
                dst_cid.encode_long(w);
                src_cid.encode_long(w);
                w.write_var(token.len() as u64);
                w.put_slice(token);
                w.write_var(rest_len);
            }
            Long {
                ty,
                version,
                ref dst_cid,
                ref src_cid,
                rest_len,
            } => {
                w.write(u8::from(LongHeaderType::Standard(ty)));
                w.write(version);
                dst_cid.encode_long(w);
                src_cid.encode_long(w);
                w.write_var(rest_len);
            }
            Retry {
                version,
                ref dst_cid,
                ref src_cid,
                ref orig_dst_cid,
                ref token,
            } => encode_retry(version, dst_cid, src_cid, orig_dst_cid, token, w),
            VersionNegotiate {
                random,
                ref dst_cid,
                ref src_cid,
                ..
            } => {
                w.write(LONG_HEADER_FORM | random);
                w.write(VERSION_NEGOTIATION);
                dst_cid.encode_long(w);
                src_cid.encode_long(w);
            }
            Short {
                first, ref dst_cid, ..
            } => {
                w.write(first);
                w.put_slice(dst_cid);
            }
        }
    }

    /// Whether the packet uses the long header form
    pub fn is_long_header(&self) -> bool {
        !matches!(*self, Self::Short { .. })
    }

    /// The QUIC version, `Some(0)` for Version Negotiation and `None` for short headers
    pub fn version(&self) -> Option<u32> {
        use Header::*;
        match *self {
            Initial { version, .. } | Long { version, .. } | Retry { version, .. } => Some(version),
            VersionNegotiate { .. } => Some(VERSION_NEGOTIATION),
            Short { .. } => None,
        }
    }

    /// The packet type tag
    ///
    /// For long headers this is the first byte with the type-specific low bits masked off, so it
    /// compares equal to `u8::from(LongHeaderType)`. Short headers report the whole first byte.
    /// Version Negotiation packets have no type.
    pub fn packet_type(&self) -> Option<u8> {
        use Header::*;
        match *self {
            Initial { .. } => Some(LongHeaderType::Initial.into()),
            Long { ty, .. } => Some(LongHeaderType::Standard(ty).into()),
            Retry { .. } => Some(LongHeaderType::Retry.into()),
            VersionNegotiate { .. } => None,
            Short { first, .. } => Some(first),
        }
    }

    /// Destination connection ID
    pub fn dst_cid(&self) -> &ConnectionId {
        use Header::*;
        match self {
            Initial { dst_cid, .. }
            | Long { dst_cid, .. }
            | Retry { dst_cid, .. }
            | VersionNegotiate { dst_cid, .. }
            | Short { dst_cid, .. } => dst_cid,
        }
    }

    /// Source connection ID, empty for short headers
    pub fn src_cid(&self) -> &[u8] {
        use Header::*;
        match self {
            Initial { src_cid, .. }
            | Long { src_cid, .. }
            | Retry { src_cid, .. }
            | VersionNegotiate { src_cid, .. } => &src_cid[..],
            Short { .. } => &[],
        }
    }

    /// Original destination connection ID, empty unless this is a Retry
    pub fn orig_dst_cid(&self) -> &[u8] {
        match self {
            Self::Retry { orig_dst_cid, .. } => &orig_dst_cid[..],
            _ => &[],
        }
    }

    /// Token carried by Initial and Retry packets, empty otherwise
    pub fn token(&self) -> &[u8] {
        match self {
            Self::Initial { token, .. } | Self::Retry { token, .. } => &token[..],
            _ => &[],
        }
    }

    /// Number of bytes that follow the header
    pub fn rest_len(&self) -> u64 {
        use Header::*;
        match *self {
            Initial { rest_len, .. }
            | Long { rest_len, .. }
            | VersionNegotiate { rest_len, .. }
            | Short { rest_len, .. } => rest_len,
            Retry { .. } => 0,
        }
    }

    /// The latency spin bit of a short header packet
    pub fn spin(&self) -> Option<bool> {
        match *self {
            Self::Short { first, .. } => Some(first & SPIN_BIT != 0),
            _ => None,
        }
    }

    /// Whether this is a Retry packet
    pub fn is_retry(&self) -> bool {
        matches!(*self, Self::Retry { .. })
    }
}

fn decode_cid<R: Buf>(buf: &mut R, field: CidField) -> Result<ConnectionId, PacketDecodeError> {
    ConnectionId::decode_long(buf).map_err(|e| match e {
        LongCidError::UnexpectedEnd => PacketDecodeError::UnexpectedEnd,
        LongCidError::TooLong(len) => {
            debug!(%field, len, "rejecting oversized connection ID");
            PacketDecodeError::CidTooLong { field, len }
        }
    })
}

/// Write a Version Negotiation packet listing `supported_versions`
///
/// The unused bits of the first byte are drawn from `rng`.
pub fn encode_version_negotiation<R: Rng + ?Sized, W: BufMut>(
    rng: &mut R,
    dst_cid: &ConnectionId,
    src_cid: &ConnectionId,
    supported_versions: &[u32],
    w: &mut W,
) {
    Header::VersionNegotiate {
        random: rng.random::<u8>() & !LONG_HEADER_FORM,
        dst_cid: *dst_cid,
        src_cid: *src_cid,
        rest_len: 0,
    }
    .encode(w);
    for &version in supported_versions {
        w.write(version);
    }
}

/// Write a Retry packet carrying `token`
pub fn encode_retry<W: BufMut>(
    version: u32,
    dst_cid: &ConnectionId,
    src_cid: &ConnectionId,
    orig_dst_cid: &ConnectionId,
    token: &[u8],
    w: &mut W,
) {
    w.write(u8::from(LongHeaderType::Retry));
    w.write(version);
    dst_cid.encode_long(w);
    src_cid.encode_long(w);
    orig_dst_cid.encode_long(w);
    w.put_slice(token);
}

/// Reconstruct a full packet number from its `num_bits` least significant bits
///
/// `expected` is one more than the largest packet number received so far. The result is the
/// value closest to `expected` whose low bits equal `truncated`, and never exceeds the varint
/// range by adding a window.
pub fn decode_packet_number(truncated: u64, num_bits: u32, expected: u64) -> u64 {
    debug_assert!(num_bits <= 32, "packet numbers are at most 4 bytes");
    let window = 1u64 << num_bits;
    let half = window / 2;
    let candidate = (expected & !(window - 1)) | truncated;
    if expected.checked_sub(half).is_some_and(|x| candidate <= x)
        && candidate.checked_add(window).is_some_and(|x| x < 1 << 62)
    {
        candidate + window
    } else if candidate > expected.saturating_add(half) && candidate >= window {
        candidate - window
    } else {
        candidate
    }
}

/// Packet number as it appears on the wire, truncated to 1-4 bytes
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PacketNumber {
    /// 1 byte
    U8(u8),
    /// 2 bytes
    U16(u16),
    /// 3 bytes
    U24(u32),
    /// 4 bytes
    U32(u32),
}

impl PacketNumber {
    /// Truncate `n` to the shortest form the peer can still expand unambiguously
    ///
    /// The window must cover twice the distance to `largest_acked`. Distances that do not fit in
    /// 32 bits are clamped to the widest form.
    pub fn new(n: u64, largest_acked: u64) -> Self {
        let range = n.saturating_sub(largest_acked).saturating_mul(2);
        if range < 1 << 8 {
            Self::U8(n as u8)
        } else if range < 1 << 16 {
            Self::U16(n as u16)
        } else if range < 1 << 24 {
            Self::U24(n as u32 & 0x00ff_ffff)
        } else {
            Self::U32(n as u32)
        }
    }

    /// Encoded length in bytes
    pub fn len(self) -> usize {
        use PacketNumber::*;
        match self {
            U8(_) => 1,
            U16(_) => 2,
            U24(_) => 3,
            U32(_) => 4,
        }
    }

    /// Write the truncated packet number
    pub fn encode<W: BufMut>(self, w: &mut W) {
        use PacketNumber::*;
        match self {
            U8(x) => w.write(x),
            U16(x) => w.write(x),
            U24(x) => w.put_uint(u64::from(x), 3),
            U32(x) => w.write(x),
        }
    }

    /// Read a packet number of `len` bytes
    ///
    /// # Panics
    ///
    /// If `len` is not between 1 and 4; use [`PacketNumber::decode_len`] to obtain it.
    pub fn decode<R: Buf>(len: usize, r: &mut R) -> coding::Result<Self> {
        use PacketNumber::*;
        Ok(match len {
            1 => U8(r.get()?),
            2 => U16(r.get()?),
            3 => {
                let b = r.get_array::<3>()?;
                U24(u32::from_be_bytes([0, b[0], b[1], b[2]]))
            }
            4 => U32(r.get()?),
            _ => unreachable!("invalid packet number length {len}"),
        })
    }

    /// Packet number length encoded in the low two bits of an unprotected first byte
    pub fn decode_len(tag: u8) -> usize {
        1 + (tag & 0x03) as usize
    }

    /// The first-byte bits announcing this packet number's length
    pub fn tag(self) -> u8 {
        use PacketNumber::*;
        match self {
            U8(_) => 0b00,
            U16(_) => 0b01,
            U24(_) => 0b10,
            U32(_) => 0b11,
        }
    }

    /// Recover the full packet number given the next expected one
    pub fn expand(self, expected: u64) -> u64 {
        use PacketNumber::*;
        let truncated = match self {
            U8(x) => u64::from(x),
            U16(x) => u64::from(x),
            U24(x) | U32(x) => u64::from(x),
        };
        decode_packet_number(truncated, self.len() as u32 * 8, expected)
    }
}

/// Long packet type including non-uniform cases
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LongHeaderType {
    /// Initial
    Initial,
    /// Retry
    Retry,
    /// 0-RTT or Handshake
    Standard(LongType),
}

impl LongHeaderType {
    fn from_byte(b: u8) -> Result<Self, PacketDecodeError> {
        use self::{LongHeaderType::*, LongType::*};
        debug_assert!(b & LONG_HEADER_FORM != 0, "not a long packet");
        if b & FIXED_BIT == 0 {
            debug!(first = b, "long header packet with fixed bit unset");
            return Err(PacketDecodeError::FixedBitUnset);
        }
        Ok(match (b & 0x30) >> 4 {
            0x0 => Initial,
            0x1 => Standard(ZeroRtt),
            0x2 => Standard(Handshake),
            _ => Retry,
        })
    }
}

impl From<LongHeaderType> for u8 {
    fn from(ty: LongHeaderType) -> Self {
        use self::{LongHeaderType::*, LongType::*};
        match ty {
            Initial => LONG_HEADER_FORM | FIXED_BIT,
            Standard(ZeroRtt) => LONG_HEADER_FORM | FIXED_BIT | (0x1 << 4),
            Standard(Handshake) => LONG_HEADER_FORM | FIXED_BIT | (0x2 << 4),
            Retry => LONG_HEADER_FORM | FIXED_BIT | (0x3 << 4),
        }
    }
}

/// Long packet types with uniform header structure
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LongType {
    /// Handshake
    Handshake,
    /// 0-RTT
    ZeroRtt,
}

/// Which connection ID a [`PacketDecodeError::CidTooLong`] refers to
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CidField {
    /// Destination connection ID
    Destination,
    /// Source connection ID
    Source,
    /// Original destination connection ID of a Retry
    OriginalDestination,
}

impl fmt::Display for CidField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Destination => "Destination",
            Self::Source => "Source",
            Self::OriginalDestination => "Original destination",
        })
    }
}

/// Reasons why a packet header could not be decoded
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PacketDecodeError {
    /// The packet ended before the header did
    #[error("unexpected end of packet")]
    UnexpectedEnd,
    /// The fixed bit of the first byte was zero
    #[error("Packet fixed bit is zero")]
    FixedBitUnset,
    /// A connection ID length exceeded the protocol maximum
    #[error("{field} CID is too long ({len} bytes)")]
    CidTooLong {
        /// Which connection ID was oversized
        field: CidField,
        /// The declared length
        len: usize,
    },
}

impl PacketDecodeError {
    /// Whether more input could have made the header decodable
    pub fn is_truncation(&self) -> bool {
        matches!(*self, Self::UnexpectedEnd)
    }
}

impl From<coding::UnexpectedEnd> for PacketDecodeError {
    fn from(_: coding::UnexpectedEnd) -> Self {
        Self::UnexpectedEnd
    }
}

const LONG_HEADER_FORM: u8 = 0x80;
const FIXED_BIT: u8 = 0x40;
const SPIN_BIT: u8 = 0x20;
