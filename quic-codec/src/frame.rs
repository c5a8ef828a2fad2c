use std::{fmt, ops::RangeInclusive};

use bytes::{Buf, BufMut, Bytes};
use thiserror::Error;

use crate::{
    coding::{self, BufExt, BufMutExt, UnexpectedEnd},
    range_set::RangeSet,
    shared::{ConnectionId, ResetToken},
    TransportError, TransportErrorCode, VarInt, MAX_CID_SIZE, RESET_TOKEN_SIZE,
};

#[cfg(feature = "arbitrary")]
use arbitrary::Arbitrary;

/// A QUIC frame type
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct FrameType(u64);

impl FrameType {
    /// Whether this is one of the eight STREAM frame types
    pub fn is_stream(self) -> bool {
        STREAM_TYS.contains(&self.0)
    }
}

impl coding::Codec for FrameType {
    fn decode<B: Buf>(buf: &mut B) -> coding::Result<Self> {
        Ok(Self(buf.get_var()?))
    }
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.write_var(self.0);
    }
}

impl From<FrameType> for u64 {
    fn from(x: FrameType) -> Self {
        x.0
    }
}

macro_rules! frame_types {
    {$($name:ident = $val:expr,)*} => {
        impl FrameType {
            $(#[allow(missing_docs)] pub const $name: FrameType = FrameType($val);)*
        }

        impl fmt::Debug for FrameType {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self.0 {
                    $(x if x == $val => f.write_str(stringify!($name)),)*
                    _ => write!(f, "Type({:02x})", self.0)
                }
            }
        }

        impl fmt::Display for FrameType {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self.0 {
                    $(x if x == $val => f.write_str(stringify!($name)),)*
                    x if STREAM_TYS.contains(&x) => f.write_str("STREAM"),
                    _ => write!(f, "<unknown {:02x}>", self.0),
                }
            }
        }
    }
}

frame_types! {
    PADDING = 0x00,
    PING = 0x01,
    ACK = 0x02,
    ACK_ECN = 0x03,
    RESET_STREAM = 0x04,
    STOP_SENDING = 0x05,
    CRYPTO = 0x06,
    NEW_TOKEN = 0x07,
    // STREAM
    MAX_DATA = 0x10,
    MAX_STREAM_DATA = 0x11,
    MAX_STREAMS_BIDI = 0x12,
    MAX_STREAMS_UNI = 0x13,
    DATA_BLOCKED = 0x14,
    STREAM_DATA_BLOCKED = 0x15,
    STREAMS_BLOCKED_BIDI = 0x16,
    STREAMS_BLOCKED_UNI = 0x17,
    NEW_CONNECTION_ID = 0x18,
    RETIRE_CONNECTION_ID = 0x19,
    PATH_CHALLENGE = 0x1a,
    PATH_RESPONSE = 0x1b,
    CONNECTION_CLOSE = 0x1c,
    APPLICATION_CLOSE = 0x1d,
}

const STREAM_TYS: RangeInclusive<u64> = RangeInclusive::new(0x08, 0x0f);

/// A decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// PADDING
    Padding,
    /// PING
    Ping,
    /// ACK or ACK_ECN
    Ack(Ack),
    /// NEW_TOKEN
    NewToken(NewToken),
    /// NEW_CONNECTION_ID
    NewConnectionId(NewConnectionId),
    /// CONNECTION_CLOSE or APPLICATION_CLOSE
    Close(Close),
}

impl Frame {
    /// Decode one frame, including its type, from the front of `buf`
    ///
    /// Frame types this codec has no representation for are reported as
    /// [`InvalidFrame::Unsupported`] and leave the rest of `buf` unread.
    pub fn decode(buf: &mut Bytes) -> Result<Self, InvalidFrame> {
        let ty = buf.get::<FrameType>()?;
        Ok(match ty {
            FrameType::PADDING => Self::Padding,
            FrameType::PING => Self::Ping,
            FrameType::ACK => Self::Ack(Ack::decode(buf, false)?),
            FrameType::ACK_ECN => Self::Ack(Ack::decode(buf, true)?),
            FrameType::NEW_TOKEN => Self::NewToken(NewToken::decode(buf)?),
            FrameType::NEW_CONNECTION_ID => Self::NewConnectionId(NewConnectionId::decode(buf)?),
            FrameType::CONNECTION_CLOSE => {
                Self::Close(Close::Connection(ConnectionClose::decode(buf)?))
            }
            FrameType::APPLICATION_CLOSE => {
                Self::Close(Close::Application(ApplicationClose::decode(buf)?))
            }
            _ => return Err(InvalidFrame::Unsupported(ty)),
        })
    }

    /// Write the frame, including its type
    pub fn encode<W: BufMut>(&self, out: &mut W) {
        match *self {
            Self::Padding => out.write(FrameType::PADDING),
            Self::Ping => out.write(FrameType::PING),
            Self::Ack(ref x) => x.encode(out),
            Self::NewToken(ref x) => x.encode(out),
            Self::NewConnectionId(ref x) => x.encode(out),
            Self::Close(ref x) => x.encode(out, usize::MAX),
        }
    }

    /// The frame type this frame is encoded with
    pub fn ty(&self) -> FrameType {
        match *self {
            Self::Padding => FrameType::PADDING,
            Self::Ping => FrameType::PING,
            Self::Ack(ref x) => x.ty(),
            Self::NewToken(_) => FrameType::NEW_TOKEN,
            Self::NewConnectionId(_) => FrameType::NEW_CONNECTION_ID,
            Self::Close(Close::Connection(_)) => FrameType::CONNECTION_CLOSE,
            Self::Close(Close::Application(_)) => FrameType::APPLICATION_CLOSE,
        }
    }
}

/// Iterator over the frames of a decrypted packet payload
pub struct Iter {
    bytes: Bytes,
}

impl Iter {
    /// Start iterating over `payload`, which must contain at least one frame
    pub fn new(payload: Bytes) -> Result<Self, TransportError> {
        if payload.is_empty() {
            return Err(TransportError::PROTOCOL_VIOLATION(
                "packet payload is empty",
            ));
        }
        Ok(Self { bytes: payload })
    }
}

impl Iterator for Iter {
    type Item = Result<Frame, InvalidFrame>;
    fn next(&mut self) -> Option<Self::Item> {
        if !self.bytes.has_remaining() {
            return None;
        }
        match Frame::decode(&mut self.bytes) {
            Ok(x) => Some(Ok(x)),
            Err(e) => {
                // Corrupt frame, skip it and everything that follows
                self.bytes.clear();
                Some(Err(e))
            }
        }
    }
}

/// Reasons why a frame could not be decoded
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum InvalidFrame {
    /// The payload ended in the middle of a frame
    #[error("unexpected end of frame")]
    UnexpectedEnd,
    /// A field was out of range or inconsistent with another
    #[error("malformed {ty} frame: {reason}")]
    Malformed {
        /// Type of the offending frame
        ty: FrameType,
        /// What was wrong with it
        reason: &'static str,
    },
    /// The frame type has no representation in this codec
    #[error("unsupported frame type {0}")]
    Unsupported(FrameType),
}

impl From<UnexpectedEnd> for InvalidFrame {
    fn from(_: UnexpectedEnd) -> Self {
        Self::UnexpectedEnd
    }
}

impl From<InvalidFrame> for TransportError {
    fn from(err: InvalidFrame) -> Self {
        match err {
            InvalidFrame::UnexpectedEnd => Self::FRAME_ENCODING_ERROR("unexpected end"),
            InvalidFrame::Malformed { ty, reason } => {
                let mut te = Self::FRAME_ENCODING_ERROR(reason);
                te.frame = Some(ty);
                te
            }
            InvalidFrame::Unsupported(ty) => {
                let mut te = Self::FRAME_ENCODING_ERROR("unsupported frame type");
                te.frame = Some(ty);
                te
            }
        }
    }
}

/// Acknowledged packet numbers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    /// Largest acknowledged packet number
    ///
    /// Set by `decode`. `encode` derives the largest from `ranges` instead.
    pub largest: u64,
    /// Encoded ACK delay, in units scaled by the peer's ack delay exponent
    pub delay: u64,
    /// Every acknowledged packet number
    pub ranges: RangeSet,
    /// ECN counters, present iff the frame type was ACK_ECN
    pub ecn: Option<EcnCounts>,
}

impl Ack {
    /// Decode the body of an ACK frame, whose type has already been read
    ///
    /// `ecn` selects whether the trailing ECN counts of ACK_ECN are expected. Ranges that would
    /// extend below packet number zero are rejected.
    pub fn decode<R: Buf>(buf: &mut R, ecn: bool) -> Result<Self, InvalidFrame> {
        let malformed = InvalidFrame::Malformed {
            ty: if ecn {
                FrameType::ACK_ECN
            } else {
                FrameType::ACK
            },
            reason: "ACK range underflow",
        };
        let largest = buf.get_var()?;
        let delay = buf.get_var()?;
        let count = buf.get_var()?;
        let first = buf.get_var()?;

        let mut smallest = largest.checked_sub(first).ok_or(malformed)?;
        let mut ranges = RangeSet::new();
        ranges.insert(smallest..largest + 1);
        for _ in 0..count {
            let gap = buf.get_var()?;
            let len = buf.get_var()?;
            let upper = smallest.checked_sub(gap + 2).ok_or(malformed)?;
            smallest = upper.checked_sub(len).ok_or(malformed)?;
            ranges.insert(smallest..upper + 1);
        }

        let ecn = match ecn {
            true => Some(EcnCounts::decode(buf)?),
            false => None,
        };
        Ok(Self {
            largest,
            delay,
            ranges,
            ecn,
        })
    }

    /// Write the frame body for `ranges`, highest range first
    ///
    /// `ranges` must not be empty.
    pub fn encode_body<W: BufMut>(
        delay: u64,
        ranges: &RangeSet,
        ecn: Option<&EcnCounts>,
        buf: &mut W,
    ) {
        let mut rest = ranges.iter().rev();
        let Some(first) = rest.next() else {
            debug_assert!(false, "cannot encode an empty ACK range set");
            return;
        };
        let largest = first.end - 1;
        let first_size = first.end - first.start;
        buf.write_var(largest);
        buf.write_var(delay);
        buf.write_var(ranges.len() as u64 - 1);
        buf.write_var(first_size - 1);
        let mut prev = first.start;
        for block in rest {
            let size = block.end - block.start;
            buf.write_var(prev - block.end - 1);
            buf.write_var(size - 1);
            prev = block.start;
        }
        if let Some(x) = ecn {
            x.encode(buf)
        }
    }

    /// Write the frame type followed by the body
    ///
    /// Nothing is written if `ranges` is empty.
    pub fn encode<W: BufMut>(&self, buf: &mut W) {
        if self.ranges.is_empty() {
            debug_assert!(false, "cannot encode an empty ACK range set");
            return;
        }
        buf.write(self.ty());
        Self::encode_body(self.delay, &self.ranges, self.ecn.as_ref(), buf);
    }

    fn ty(&self) -> FrameType {
        match self.ecn {
            Some(_) => FrameType::ACK_ECN,
            None => FrameType::ACK,
        }
    }
}

/// Explicit congestion notification counters carried by ACK_ECN
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
#[cfg_attr(feature = "arbitrary", derive(Arbitrary))]
pub struct EcnCounts {
    /// Packets received with the ECT(0) codepoint
    pub ect0: u64,
    /// Packets received with the ECT(1) codepoint
    pub ect1: u64,
    /// Packets received with the CE codepoint
    pub ce: u64,
}

impl EcnCounts {
    /// All counters zero
    pub const ZERO: Self = Self {
        ect0: 0,
        ect1: 0,
        ce: 0,
    };

    /// Write the three counters
    pub fn encode<W: BufMut>(&self, out: &mut W) {
        out.write_var(self.ect0);
        out.write_var(self.ect1);
        out.write_var(self.ce);
    }

    fn decode<R: Buf>(buf: &mut R) -> coding::Result<Self> {
        Ok(Self {
            ect0: buf.get_var()?,
            ect1: buf.get_var()?,
            ce: buf.get_var()?,
        })
    }
}

/// An address validation token for future connections
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewToken {
    /// Opaque token
    pub token: Bytes,
}

impl NewToken {
    /// Write the frame, including its type
    pub fn encode<W: BufMut>(&self, out: &mut W) {
        out.write(FrameType::NEW_TOKEN);
        out.write_var(self.token.len() as u64);
        out.put_slice(&self.token);
    }

    fn decode<R: Buf>(buf: &mut R) -> Result<Self, InvalidFrame> {
        Ok(Self {
            token: take_len(buf)?,
        })
    }
}

/// A connection ID the peer may switch to
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct NewConnectionId {
    /// Sequence number of this connection ID
    pub sequence: u64,
    /// The connection ID
    pub id: ConnectionId,
    /// Token for the peer to recognise a stateless reset for this connection ID
    pub reset_token: ResetToken,
}

impl NewConnectionId {
    /// Write the frame, including its type
    pub fn encode<W: BufMut>(&self, out: &mut W) {
        out.write(FrameType::NEW_CONNECTION_ID);
        out.write_var(self.sequence);
        self.id.encode_long(out);
        out.put_slice(&self.reset_token);
    }

    fn decode<R: Buf>(buf: &mut R) -> Result<Self, InvalidFrame> {
        let sequence = buf.get_var()?;
        let length = buf.get::<u8>()? as usize;
        if length > MAX_CID_SIZE || length == 0 {
            return Err(InvalidFrame::Malformed {
                ty: FrameType::NEW_CONNECTION_ID,
                reason: "illegal connection ID length",
            });
        }
        if buf.remaining() < length + RESET_TOKEN_SIZE {
            return Err(InvalidFrame::UnexpectedEnd);
        }
        let id = ConnectionId::from_buf(buf, length);
        let reset_token = buf.get_array::<RESET_TOKEN_SIZE>()?.into();
        Ok(Self {
            sequence,
            id,
            reset_token,
        })
    }
}

/// Reason given for closing a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Close {
    /// Closed by the transport
    Connection(ConnectionClose),
    /// Closed by the application
    Application(ApplicationClose),
}

impl Close {
    /// Write the frame, truncating the reason so the whole frame fits in `max_len`
    pub fn encode<W: BufMut>(&self, out: &mut W, max_len: usize) {
        match *self {
            Self::Connection(ref x) => x.encode(out, max_len),
            Self::Application(ref x) => x.encode(out, max_len),
        }
    }

    /// Whether the transport, rather than the application, closed the connection
    pub fn is_transport_layer(&self) -> bool {
        matches!(*self, Self::Connection(_))
    }
}

impl From<TransportError> for Close {
    fn from(x: TransportError) -> Self {
        Self::Connection(x.into())
    }
}

impl From<ConnectionClose> for Close {
    fn from(x: ConnectionClose) -> Self {
        Self::Connection(x)
    }
}

impl From<ApplicationClose> for Close {
    fn from(x: ApplicationClose) -> Self {
        Self::Application(x)
    }
}

/// Reason given by the transport for closing the connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionClose {
    /// Class of error
    pub error_code: TransportErrorCode,
    /// Type of frame that caused the close
    pub frame_type: Option<FrameType>,
    /// Human-readable reason for the close
    pub reason: Bytes,
}

impl fmt::Display for ConnectionClose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error_code)?;
        if !self.reason.is_empty() {
            f.write_str(": ")?;
            f.write_str(&String::from_utf8_lossy(&self.reason))?;
        }
        Ok(())
    }
}

impl From<TransportError> for ConnectionClose {
    fn from(x: TransportError) -> Self {
        Self {
            error_code: x.code,
            frame_type: x.frame,
            reason: x.reason.into(),
        }
    }
}

impl ConnectionClose {
    /// Write the frame, truncating the reason so the whole frame fits in `max_len`
    pub fn encode<W: BufMut>(&self, out: &mut W, max_len: usize) {
        out.write(FrameType::CONNECTION_CLOSE); // 1 byte
        out.write(self.error_code); // <= 8 bytes
        let ty = self.frame_type.map_or(0, |x| x.0);
        out.write_var(ty); // <= 8 bytes
        let max_len = max_len
            .saturating_sub(1 + varint_size(self.error_code.into()) + varint_size(ty))
            .saturating_sub(varint_size(self.reason.len() as u64));
        let actual_len = self.reason.len().min(max_len);
        out.write_var(actual_len as u64); // <= 8 bytes
        out.put_slice(&self.reason[0..actual_len]); // whatever's left
    }

    fn decode<R: Buf>(buf: &mut R) -> Result<Self, InvalidFrame> {
        let error_code = buf.get()?;
        let frame_type = match buf.get_var()? {
            0 => None,
            x => Some(FrameType(x)),
        };
        Ok(Self {
            error_code,
            frame_type,
            reason: take_reason(buf, FrameType::CONNECTION_CLOSE)?,
        })
    }
}

/// Reason given by an application for closing the connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationClose {
    /// Application-specific reason code
    pub error_code: VarInt,
    /// Human-readable reason for the close
    pub reason: Bytes,
}

impl fmt::Display for ApplicationClose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.reason.is_empty() {
            f.write_str(&String::from_utf8_lossy(&self.reason))?;
            write!(f, " (code {})", self.error_code)
        } else {
            write!(f, "{}", self.error_code)
        }
    }
}

impl ApplicationClose {
    /// Write the frame, truncating the reason so the whole frame fits in `max_len`
    pub fn encode<W: BufMut>(&self, out: &mut W, max_len: usize) {
        out.write(FrameType::APPLICATION_CLOSE); // 1 byte
        out.write(self.error_code); // <= 8 bytes
        let max_len = max_len
            .saturating_sub(1 + self.error_code.size())
            .saturating_sub(varint_size(self.reason.len() as u64));
        let actual_len = self.reason.len().min(max_len);
        out.write_var(actual_len as u64); // <= 8 bytes
        out.put_slice(&self.reason[0..actual_len]); // whatever's left
    }

    fn decode<R: Buf>(buf: &mut R) -> Result<Self, InvalidFrame> {
        Ok(Self {
            error_code: buf.get()?,
            reason: take_reason(buf, FrameType::APPLICATION_CLOSE)?,
        })
    }
}

fn varint_size(x: u64) -> usize {
    VarInt::from_u64(x).map_or(VarInt::MAX_SIZE, VarInt::size)
}

fn take_len<R: Buf>(buf: &mut R) -> coding::Result<Bytes> {
    let len = buf.get_var()?;
    if len > buf.remaining() as u64 {
        return Err(UnexpectedEnd);
    }
    buf.get_bytes(len as usize)
}

fn take_reason<R: Buf>(buf: &mut R, ty: FrameType) -> Result<Bytes, InvalidFrame> {
    let reason = take_len(buf)?;
    if std::str::from_utf8(&reason).is_err() {
        return Err(InvalidFrame::Malformed {
            ty,
            reason: "reason phrase is not UTF-8",
        });
    }
    Ok(reason)
}
