//! Dual-protocol packet codec for sqlmux.
//!
//! Every message on the internal transport starts with an indicator byte:
//! `0x01` for a netstring, `0x00` for a MySQL packet. The decoders for each
//! protocol reject the other's indicator with `WrongPacketKind` without
//! consuming anything, so one read loop can serve both.
//!
//! - [`Packet`] is the unified message representation
//! - [`netstring`] and [`mysql`] are the stateless codecs
//! - [`PacketStream`] reads packets off a byte stream, flattening composites
//! - [`primitives`] holds the little-endian and length-encoded helpers

pub mod codes;
pub mod mysql;
pub mod netstring;
pub mod packet;
pub mod primitives;
pub mod stream;

pub use codes::{DataType, EorCode, NetstringCommand, ResponseCode};
pub use packet::{MYSQL_INDICATOR, NETSTRING_INDICATOR, Packet, Protocol};
pub use stream::{DecodeStrategy, PacketStream, ReadState};

use sqlmux_core::{Error, FramingErrorKind, Result};

/// Decode one indicator-prefixed packet of either protocol.
pub fn decode(buf: &[u8]) -> Result<(Packet, usize)> {
    match buf.first().copied().and_then(Protocol::from_indicator) {
        Some(Protocol::Netstring) => netstring::decode(buf),
        Some(Protocol::MySql) => mysql::decode(buf),
        None => Err(Error::framing(
            FramingErrorKind::UnknownPacketKind,
            "missing or invalid indicator byte",
        )),
    }
}
