//! QUIC connection transport parameters
//!
//! The `TransportParameters` type represents the transport parameters an endpoint announces during
//! the handshake. On the wire they are a block with a 16-bit length, containing a sequence of
//! parameters each made of a 16-bit ID, a 16-bit length and the value. Every parameter is
//! optional, and whether it was present survives a decode/encode round trip.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddrV4, SocketAddrV6};

use bytes::{Buf, BufMut};
use thiserror::Error;
use tracing::trace;

use crate::{
    coding::{BufExt, BufMutExt, UnexpectedEnd},
    shared::{ConnectionId, ResetToken},
    TransportError, VarInt, MAX_CID_SIZE, RESET_TOKEN_SIZE,
};

// Apply a given macro to a list of all the transport parameters having integer types, along with
// their IDs. Decoding, encoding and the struct definition all expand from this one list.
macro_rules! apply_params {
    ($macro:ident) => {
        $macro! {
            // #[doc] name (id),
            /// Milliseconds, disabled if zero
            idle_timeout(IdleTimeout),
            /// Limits the size of packets that the endpoint is willing to receive
            max_packet_size(MaxPacketSize),

            /// Initial value for the maximum amount of data that can be sent on the connection
            initial_max_data(InitialMaxData),
            /// Initial flow control limit for locally-initiated bidirectional streams
            initial_max_stream_data_bidi_local(InitialMaxStreamDataBidiLocal),
            /// Initial flow control limit for peer-initiated bidirectional streams
            initial_max_stream_data_bidi_remote(InitialMaxStreamDataBidiRemote),
            /// Initial flow control limit for unidirectional streams
            initial_max_stream_data_uni(InitialMaxStreamDataUni),

            /// Initial maximum number of bidirectional streams the peer may initiate
            initial_max_streams_bidi(InitialMaxStreamsBidi),
            /// Initial maximum number of unidirectional streams the peer may initiate
            initial_max_streams_uni(InitialMaxStreamsUni),

            /// Exponent used to decode the ACK Delay field in the ACK frame
            ack_delay_exponent(AckDelayExponent),
            /// Maximum amount of time in milliseconds by which the endpoint will delay sending
            /// acknowledgments
            max_ack_delay(MaxAckDelay),
            /// Maximum number of connection IDs from the peer that an endpoint is willing to store
            active_connection_id_limit(ActiveConnectionIdLimit),
        }
    };
}

macro_rules! make_struct {
    {$($(#[$doc:meta])* $name:ident ($id:ident),)*} => {
        /// Transport parameters used to negotiate connection-level preferences between peers
        ///
        /// `Default` has every parameter absent.
        #[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
        pub struct TransportParameters {
            /// The destination connection ID of the client's first Initial, echoed by a server
            /// that sent a Retry
            pub original_connection_id: Option<ConnectionId>,
            /// Token used by the client to verify a stateless reset from the server
            pub stateless_reset_token: Option<ResetToken>,
            /// Whether the endpoint refuses active connection migration
            pub disable_active_migration: bool,
            /// The server's preferred address for communication after handshake completion
            pub preferred_address: Option<PreferredAddress>,

            $($(#[$doc])* pub $name: Option<VarInt>,)*
        }
    }
}

apply_params!(make_struct);

impl TransportParameters {
    /// Encode the parameters, in ascending ID order, prefixed with the block length
    pub fn write<W: BufMut>(&self, w: &mut W) {
        let mut body = Vec::new();
        for &id in TransportParameterId::SUPPORTED.iter() {
            match id {
                TransportParameterId::OriginalConnectionId => {
                    if let Some(ref cid) = self.original_connection_id {
                        body.write_id(id);
                        body.write::<u16>(cid.len() as u16);
                        body.put_slice(cid);
                    }
                }
                TransportParameterId::StatelessResetToken => {
                    if let Some(ref token) = self.stateless_reset_token {
                        body.write_id(id);
                        body.write::<u16>(RESET_TOKEN_SIZE as u16);
                        body.put_slice(token);
                    }
                }
                TransportParameterId::DisableActiveMigration => {
                    if self.disable_active_migration {
                        body.write_id(id);
                        body.write::<u16>(0);
                    }
                }
                TransportParameterId::PreferredAddress => {
                    if let Some(ref x) = self.preferred_address {
                        body.write_id(id);
                        body.write::<u16>(x.wire_size());
                        x.write(&mut body);
                    }
                }
                _ => {
                    macro_rules! write_params {
                        {$($(#[$doc:meta])* $name:ident ($id:ident),)*} => {
                            match id {
                                $(TransportParameterId::$id => {
                                    if let Some(value) = self.$name {
                                        body.write_id(id);
                                        body.write::<u16>(value.size() as u16);
                                        body.write(value);
                                    }
                                })*
                                _ => {}
                            }
                        }
                    }
                    apply_params!(write_params);
                }
            }
        }

        debug_assert!(body.len() <= u16::MAX as usize);
        w.write::<u16>(body.len() as u16);
        w.put_slice(&body);
    }

    /// Decode a parameter block
    ///
    /// Parameters with unknown IDs are skipped.
    pub fn read<R: Buf>(r: &mut R) -> Result<Self, Error> {
        let mut params = Self::default();

        let len = r.get::<u16>()? as usize;
        let mut block = r.get_bytes(len)?;
        while block.has_remaining() {
            let id = block.get::<u16>()?;
            let len = block.get::<u16>()? as usize;
            if block.remaining() < len {
                return Err(Error::UnexpectedEnd);
            }
            let mut value = block.split_to(len);

            let Ok(id) = TransportParameterId::try_from(id) else {
                trace!(id, len, "skipping unknown transport parameter");
                continue;
            };

            match id {
                TransportParameterId::OriginalConnectionId => {
                    if len > MAX_CID_SIZE || params.original_connection_id.is_some() {
                        return Err(Error::Malformed);
                    }
                    params.original_connection_id = Some(ConnectionId::new(&value));
                }
                TransportParameterId::StatelessResetToken => {
                    if len != RESET_TOKEN_SIZE || params.stateless_reset_token.is_some() {
                        return Err(Error::Malformed);
                    }
                    let token = value.get_array::<RESET_TOKEN_SIZE>()?;
                    params.stateless_reset_token = Some(token.into());
                }
                TransportParameterId::DisableActiveMigration => {
                    if params.disable_active_migration {
                        return Err(Error::Malformed);
                    }
                    if len != 0 {
                        trace!(len, "ignoring disable_active_migration payload");
                    }
                    params.disable_active_migration = true;
                }
                TransportParameterId::PreferredAddress => {
                    if params.preferred_address.is_some() {
                        return Err(Error::Malformed);
                    }
                    let x = PreferredAddress::read(&mut value).map_err(|_| Error::Malformed)?;
                    if value.has_remaining() {
                        return Err(Error::Malformed);
                    }
                    params.preferred_address = Some(x);
                }
                _ => {
                    macro_rules! parse {
                        {$($(#[$doc:meta])* $name:ident ($id:ident),)*} => {
                            match id {
                                $(TransportParameterId::$id => {
                                    let value = value.get::<VarInt>().map_err(|_| Error::Malformed)?;
                                    if len != value.size() || params.$name.is_some() {
                                        return Err(Error::Malformed);
                                    }
                                    params.$name = Some(value);
                                })*
                                _ => {}
                            }
                        }
                    }
                    apply_params!(parse);
                }
            }
        }

        Ok(params)
    }
}

trait WriteId {
    fn write_id(&mut self, id: TransportParameterId);
}

impl<W: BufMut> WriteId for W {
    fn write_id(&mut self, id: TransportParameterId) {
        self.write::<u16>(id as u16);
    }
}

/// A server's preferred address
///
/// This is communicated as a transport parameter during the handshake. An address family the
/// server has no address for is encoded as all zeroes.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PreferredAddress {
    /// IPv4 address and port
    pub address_v4: Option<SocketAddrV4>,
    /// IPv6 address and port
    ///
    /// Only the address and port are encoded; `flowinfo` and `scope_id` are not carried on the
    /// wire and decode as zero.
    pub address_v6: Option<SocketAddrV6>,
    /// Connection ID to use on the preferred address
    pub connection_id: ConnectionId,
    /// Stateless reset token for `connection_id`
    pub stateless_reset_token: ResetToken,
}

impl PreferredAddress {
    fn wire_size(&self) -> u16 {
        4 + 2 + 16 + 2 + 1 + self.connection_id.len() as u16 + RESET_TOKEN_SIZE as u16
    }

    /// Encode the preferred address value
    pub fn write<W: BufMut>(&self, w: &mut W) {
        w.write(self.address_v4.map_or(Ipv4Addr::UNSPECIFIED, |x| *x.ip()));
        w.write::<u16>(self.address_v4.map_or(0, |x| x.port()));
        w.write(self.address_v6.map_or(Ipv6Addr::UNSPECIFIED, |x| *x.ip()));
        w.write::<u16>(self.address_v6.map_or(0, |x| x.port()));
        self.connection_id.encode_long(w);
        w.put_slice(&self.stateless_reset_token);
    }

    /// Decode a preferred address value
    pub fn read<R: Buf>(r: &mut R) -> Result<Self, Error> {
        let ip_v4 = r.get::<Ipv4Addr>()?;
        let port_v4 = r.get::<u16>()?;
        let ip_v6 = r.get::<Ipv6Addr>()?;
        let port_v6 = r.get::<u16>()?;
        let cid_len = r.get::<u8>()? as usize;
        if cid_len > MAX_CID_SIZE {
            return Err(Error::Malformed);
        }
        if r.remaining() < cid_len {
            return Err(Error::UnexpectedEnd);
        }
        let connection_id = ConnectionId::from_buf(r, cid_len);
        let stateless_reset_token = r.get_array::<RESET_TOKEN_SIZE>()?.into();

        let address_v4 = if ip_v4.is_unspecified() && port_v4 == 0 {
            None
        } else {
            Some(SocketAddrV4::new(ip_v4, port_v4))
        };
        let address_v6 = if ip_v6.is_unspecified() && port_v6 == 0 {
            None
        } else {
            Some(SocketAddrV6::new(ip_v6, port_v6, 0, 0))
        };
        Ok(Self {
            address_v4,
            address_v6,
            connection_id,
            stateless_reset_token,
        })
    }
}

/// Errors encountered while decoding `TransportParameters`
#[derive(Debug, Copy, Clone, Eq, PartialEq, Error)]
pub enum Error {
    /// The input ended inside the parameter block
    #[error("transport parameters were truncated")]
    UnexpectedEnd,
    /// A parameter's length disagreed with its value, or a parameter was repeated
    #[error("parameters were malformed")]
    Malformed,
}

impl From<UnexpectedEnd> for Error {
    fn from(_: UnexpectedEnd) -> Self {
        Self::UnexpectedEnd
    }
}

impl From<Error> for TransportError {
    fn from(e: Error) -> Self {
        match e {
            Error::UnexpectedEnd => Self::TRANSPORT_PARAMETER_ERROR("truncated"),
            Error::Malformed => Self::TRANSPORT_PARAMETER_ERROR("malformed"),
        }
    }
}

/// Transport parameter IDs known to this codec
#[repr(u16)]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(crate) enum TransportParameterId {
    OriginalConnectionId = 0x00,
    IdleTimeout = 0x01,
    StatelessResetToken = 0x02,
    MaxPacketSize = 0x03,
    InitialMaxData = 0x04,
    InitialMaxStreamDataBidiLocal = 0x05,
    InitialMaxStreamDataBidiRemote = 0x06,
    InitialMaxStreamDataUni = 0x07,
    InitialMaxStreamsBidi = 0x08,
    InitialMaxStreamsUni = 0x09,
    AckDelayExponent = 0x0a,
    MaxAckDelay = 0x0b,
    DisableActiveMigration = 0x0c,
    PreferredAddress = 0x0d,
    ActiveConnectionIdLimit = 0x0e,
}

impl TransportParameterId {
    /// Every known ID, in the order parameters are written
    const SUPPORTED: [Self; 15] = [
        Self::OriginalConnectionId,
        Self::IdleTimeout,
        Self::StatelessResetToken,
        Self::MaxPacketSize,
        Self::InitialMaxData,
        Self::InitialMaxStreamDataBidiLocal,
        Self::InitialMaxStreamDataBidiRemote,
        Self::InitialMaxStreamDataUni,
        Self::InitialMaxStreamsBidi,
        Self::InitialMaxStreamsUni,
        Self::AckDelayExponent,
        Self::MaxAckDelay,
        Self::DisableActiveMigration,
        Self::PreferredAddress,
        Self::ActiveConnectionIdLimit,
    ];
}

impl TryFrom<u16> for TransportParameterId {
    type Error = ();

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::SUPPORTED
            .iter()
            .copied()
            .find(|&id| id as u16 == value)
            .ok_or(())
    }
}
