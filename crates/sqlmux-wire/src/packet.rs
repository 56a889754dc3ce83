//! The unified in-memory packet.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

/// Indicator byte preceding a MySQL packet on the internal transport.
pub const MYSQL_INDICATOR: u8 = 0x00;
/// Indicator byte preceding a netstring on the internal transport.
pub const NETSTRING_INDICATOR: u8 = 0x01;

/// Which wire protocol produced a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Netstring,
    MySql,
}

impl Protocol {
    /// The indicator byte for this protocol.
    pub const fn indicator(self) -> u8 {
        match self {
            Protocol::Netstring => NETSTRING_INDICATOR,
            Protocol::MySql => MYSQL_INDICATOR,
        }
    }

    /// Map an indicator byte back to its protocol.
    pub const fn from_indicator(byte: u8) -> Option<Self> {
        match byte {
            NETSTRING_INDICATOR => Some(Protocol::Netstring),
            MYSQL_INDICATOR => Some(Protocol::MySql),
            _ => None,
        }
    }

    /// The protocol a tagged reader falls back to.
    pub const fn other(self) -> Self {
        match self {
            Protocol::Netstring => Protocol::MySql,
            Protocol::MySql => Protocol::Netstring,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Netstring => f.write_str("netstring"),
            Protocol::MySql => f.write_str("mysql"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Body {
    /// Payload is a contiguous slice of the serialized form
    Framed(Range<usize>),
    /// Payload was reassembled from several MySQL frames
    Joined(Vec<u8>),
}

/// One protocol message, regardless of source protocol.
///
/// Packets are immutable: the codec builds them on decode, the response
/// coder builds new ones on encode, and nothing edits them in between.
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    command: u32,
    serialized: Vec<u8>,
    body: Body,
    sequence_id: u8,
    protocol: Protocol,
}

impl Packet {
    /// Build a packet whose payload is `serialized[range]`.
    pub(crate) fn framed(
        protocol: Protocol,
        command: u32,
        serialized: Vec<u8>,
        range: Range<usize>,
        sequence_id: u8,
    ) -> Self {
        debug_assert!(range.end <= serialized.len());
        debug_assert_eq!(serialized.first(), Some(&protocol.indicator()));
        Self {
            command,
            serialized,
            body: Body::Framed(range),
            sequence_id,
            protocol,
        }
    }

    /// Build a packet whose payload was reassembled from continuation frames.
    pub(crate) fn joined(
        protocol: Protocol,
        command: u32,
        serialized: Vec<u8>,
        payload: Vec<u8>,
        sequence_id: u8,
    ) -> Self {
        Self {
            command,
            serialized,
            body: Body::Joined(payload),
            sequence_id,
            protocol,
        }
    }

    /// Command opcode; its meaning depends on [`Packet::protocol`].
    pub fn command(&self) -> u32 {
        self.command
    }

    /// Complete wire bytes, starting with the indicator byte.
    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }

    /// Wire bytes as the client sees them, without the indicator byte.
    pub fn client_bytes(&self) -> &[u8] {
        &self.serialized[1..]
    }

    /// Message content, excluding framing.
    pub fn payload(&self) -> &[u8] {
        match &self.body {
            Body::Framed(range) => &self.serialized[range.clone()],
            Body::Joined(payload) => payload,
        }
    }

    /// Payload length.
    pub fn len(&self) -> usize {
        self.payload().len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload().is_empty()
    }

    /// MySQL sequence id of the last frame; always 0 for netstrings.
    pub fn sequence_id(&self) -> u8 {
        self.sequence_id
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Payload as UTF-8 text, lossily.
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(self.payload())
    }

    /// Is this a netstring composite (command 0) carrying nested messages?
    pub fn is_composite(&self) -> bool {
        self.protocol == Protocol::Netstring && self.command == crate::netstring::COMPOSITE_COMMAND
    }

    /// Consume the packet, returning its wire bytes.
    pub fn into_serialized(self) -> Vec<u8> {
        self.serialized
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("protocol", &self.protocol)
            .field("command", &self.command)
            .field("sequence_id", &self.sequence_id)
            .field("payload", &self.payload_str())
            .finish()
    }
}
