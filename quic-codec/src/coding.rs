//! Coding related traits.

use std::net::{Ipv4Addr, Ipv6Addr};

use bytes::{Buf, BufMut, Bytes};
use thiserror::Error;

use crate::VarInt;

/// Error indicating that the provided buffer was too small
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq)]
#[error("unexpected end of buffer")]
pub struct UnexpectedEnd;

/// Coding result type
pub type Result<T> = ::std::result::Result<T, UnexpectedEnd>;

/// Infallible encoding and decoding of QUIC primitives
pub trait Codec: Sized {
    /// Decode a `Self` from the provided buffer, if the buffer is large enough
    fn decode<B: Buf>(buf: &mut B) -> Result<Self>;
    /// Append the encoding of `self` to the provided buffer
    fn encode<B: BufMut>(&self, buf: &mut B);
}

// Fixed-width big-endian integers
macro_rules! int_codec {
    ($($ty:ty => $get:ident, $put:ident;)*) => {
        $(
            impl Codec for $ty {
                fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
                    if buf.remaining() < std::mem::size_of::<$ty>() {
                        return Err(UnexpectedEnd);
                    }
                    Ok(buf.$get())
                }
                fn encode<B: BufMut>(&self, buf: &mut B) {
                    buf.$put(*self);
                }
            }
        )*
    };
}

int_codec! {
    u8 => get_u8, put_u8;
    u16 => get_u16, put_u16;
    u32 => get_u32, put_u32;
    u64 => get_u64, put_u64;
}

impl Codec for Ipv4Addr {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        Ok(buf.get_array::<4>()?.into())
    }
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_slice(&self.octets());
    }
}

impl Codec for Ipv6Addr {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        Ok(buf.get_array::<16>()?.into())
    }
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_slice(&self.octets());
    }
}

/// Extension trait for reading from buffers
pub trait BufExt {
    /// Read and decode a value from the buffer
    fn get<T: Codec>(&mut self) -> Result<T>;
    /// Read a variable-length integer from the buffer
    fn get_var(&mut self) -> Result<u64>;
    /// Read exactly `N` bytes
    fn get_array<const N: usize>(&mut self) -> Result<[u8; N]>;
    /// Split off the next `len` bytes, failing rather than returning fewer
    fn get_bytes(&mut self, len: usize) -> Result<Bytes>;
}

impl<T: Buf> BufExt for T {
    fn get<U: Codec>(&mut self) -> Result<U> {
        U::decode(self)
    }

    fn get_var(&mut self) -> Result<u64> {
        Ok(VarInt::decode(self)?.into_inner())
    }

    fn get_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        if self.remaining() < N {
            return Err(UnexpectedEnd);
        }
        let mut out = [0; N];
        self.copy_to_slice(&mut out);
        Ok(out)
    }

    fn get_bytes(&mut self, len: usize) -> Result<Bytes> {
        if self.remaining() < len {
            return Err(UnexpectedEnd);
        }
        Ok(self.copy_to_bytes(len))
    }
}

/// Extension trait for writing to buffers
pub trait BufMutExt {
    /// Write and encode a value to the buffer
    fn write<T: Codec>(&mut self, x: T);
    /// Write a variable-length integer to the buffer
    ///
    /// `x` must be less than 2^62.
    fn write_var(&mut self, x: u64);
}

impl<T: BufMut> BufMutExt for T {
    fn write<U: Codec>(&mut self, x: U) {
        x.encode(self);
    }

    fn write_var(&mut self, x: u64) {
        match VarInt::from_u64(x) {
            Ok(var) => var.encode(self),
            Err(_) => debug_assert!(false, "value {x} does not fit in a varint"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn short_reads_consume_nothing_useful() {
        let mut buf = Bytes::from_static(&[0x01, 0x02, 0x03]);
        assert_eq!(buf.get::<u32>(), Err(UnexpectedEnd));
        assert_eq!(buf.get::<u16>(), Ok(0x0102));
        assert_eq!(buf.get_bytes(2), Err(UnexpectedEnd));
        assert_eq!(buf.get_array::<1>(), Ok([0x03]));
        assert!(!buf.has_remaining());
    }

    #[test]
    fn addresses() {
        let mut out = Vec::new();
        out.write(Ipv4Addr::new(139, 162, 123, 134));
        out.write(Ipv6Addr::LOCALHOST);
        assert_eq!(out.len(), 20);
        let mut buf = Bytes::from(out);
        assert_eq!(buf.get::<Ipv4Addr>(), Ok(Ipv4Addr::new(139, 162, 123, 134)));
        assert_eq!(buf.get::<Ipv6Addr>(), Ok(Ipv6Addr::LOCALHOST));
    }
}
