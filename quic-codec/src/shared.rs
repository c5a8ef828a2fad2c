use std::{fmt, ops::Deref};

use bytes::{Buf, BufMut};

#[cfg(feature = "arbitrary")]
use arbitrary::Arbitrary;

use crate::{
    coding::{BufExt, UnexpectedEnd},
    MAX_CID_SIZE, RESET_TOKEN_SIZE,
};

/// Protocol-level identifier for a connection.
///
/// Mainly useful for identifying this connection's packets on the wire with tools like Wireshark.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ConnectionId {
    len: u8,
    bytes: [u8; MAX_CID_SIZE],
}

impl ConnectionId {
    /// Construct a connection ID from its raw bytes
    ///
    /// # Panics
    ///
    /// If `bytes` is longer than [`MAX_CID_SIZE`].
    pub fn new(bytes: &[u8]) -> Self {
        assert!(bytes.len() <= MAX_CID_SIZE, "connection ID too long");
        let mut res = Self {
            len: bytes.len() as u8,
            bytes: [0; MAX_CID_SIZE],
        };
        res.bytes[..bytes.len()].copy_from_slice(bytes);
        res
    }

    /// Read `len` bytes from `buf`, which must hold at least that many
    pub(crate) fn from_buf(buf: &mut impl Buf, len: usize) -> Self {
        debug_assert!(len <= MAX_CID_SIZE && buf.remaining() >= len);
        let mut res = Self {
            len: len as u8,
            bytes: [0; MAX_CID_SIZE],
        };
        buf.copy_to_slice(&mut res.bytes[..len]);
        res
    }

    /// Decode from long header format
    ///
    /// An oversized length prefix is rejected before any of the connection ID bytes are
    /// consumed.
    pub(crate) fn decode_long(buf: &mut impl Buf) -> Result<Self, LongCidError> {
        let len = buf.get::<u8>()? as usize;
        if len > MAX_CID_SIZE {
            return Err(LongCidError::TooLong(len));
        }
        if buf.remaining() < len {
            return Err(LongCidError::UnexpectedEnd);
        }
        Ok(Self::from_buf(buf, len))
    }

    /// Encode in long header format
    pub(crate) fn encode_long(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.len);
        buf.put_slice(self);
    }
}

impl Deref for ConnectionId {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.bytes[0..self.len as usize]
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.bytes[0..self.len as usize].fmt(f)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.iter() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Why a length-prefixed connection ID could not be decoded
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum LongCidError {
    UnexpectedEnd,
    /// The length prefix exceeds [`MAX_CID_SIZE`]
    TooLong(usize),
}

impl From<UnexpectedEnd> for LongCidError {
    fn from(_: UnexpectedEnd) -> Self {
        Self::UnexpectedEnd
    }
}

#[cfg(feature = "arbitrary")]
impl<'arbitrary> Arbitrary<'arbitrary> for ConnectionId {
    fn arbitrary(u: &mut arbitrary::Unstructured<'arbitrary>) -> arbitrary::Result<Self> {
        let len = u.int_in_range(0..=MAX_CID_SIZE)?;
        Ok(Self::new(u.bytes(len)?))
    }
}

/// Stateless reset token
///
/// Used for an endpoint to securely communicate that it has lost state for a connection.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Default)]
#[cfg_attr(feature = "arbitrary", derive(Arbitrary))]
pub struct ResetToken([u8; RESET_TOKEN_SIZE]);

impl From<[u8; RESET_TOKEN_SIZE]> for ResetToken {
    fn from(x: [u8; RESET_TOKEN_SIZE]) -> Self {
        Self(x)
    }
}

impl Deref for ResetToken {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for ResetToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.iter() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}
